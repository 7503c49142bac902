use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::playlist::{
    ENCODING_MARKER, EXT_MARKER, Encoding, IMAGE_MARKER, INFO_MARKER, Playlist, TITLE_MARKER,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Truncate,
    Append,
}

/// Forces a `.m3u` (or `.m3u8` for UNICODE) suffix unless one is already there.
pub fn playlist_path(requested: &str, encoding: Option<Encoding>) -> PathBuf {
    let lower = requested.to_lowercase();
    if lower.ends_with(".m3u") || lower.ends_with(".m3u8") {
        return PathBuf::from(requested);
    }
    let ext = if encoding == Some(Encoding::Unicode) {
        "m3u8"
    } else {
        "m3u"
    };
    PathBuf::from(format!("{}.{}", requested, ext))
}

// "my road trip" -> "My Road Trip"
fn capitalize_words(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut start = true;
    for c in title.chars() {
        if c.is_whitespace() {
            start = true;
            out.push(c);
        } else if start {
            out.extend(c.to_uppercase());
            start = false;
        } else {
            out.extend(c.to_lowercase());
        }
    }
    out
}

/// Renders the playlist text, stopping after `max_tracks` entries.
pub fn render(playlist: &Playlist, max_tracks: Option<usize>) -> String {
    let mut out = String::new();
    let mut line = |s: &str| {
        out.push_str(s);
        out.push('\n');
    };

    let ext = playlist.extension_enabled;
    if ext {
        if playlist.header.marker {
            line(EXT_MARKER);
        }
        if let Some(title) = playlist.title.as_deref().filter(|_| playlist.header.title) {
            line(&format!("{}{}", TITLE_MARKER, capitalize_words(title)));
        }
        if let Some(enc) = playlist.encoding.filter(|_| playlist.header.encoding) {
            line(&format!("{}{}", ENCODING_MARKER, enc));
        }
    }

    let limit = max_tracks.unwrap_or(usize::MAX);
    for entry in playlist.entries.iter().take(limit) {
        if ext {
            if let Some(image) = &entry.image {
                line(&format!("{}{}", IMAGE_MARKER, image));
            }
            if let Some(info) = &entry.info {
                line(&format!("{}{}", INFO_MARKER, info));
            }
        }
        line(&entry.location);
    }

    out
}

/// Maps rendered text onto the requested encoding, dropping what cannot be represented.
fn encode(text: String, encoding: Option<Encoding>) -> Vec<u8> {
    match encoding {
        Some(Encoding::Ascii) => text
            .chars()
            .filter(char::is_ascii)
            .collect::<String>()
            .into_bytes(),
        Some(Encoding::Utf8) | Some(Encoding::Unicode) | None => text.into_bytes(),
    }
}

pub fn write(
    path: &Path,
    mode: WriteMode,
    playlist: &Playlist,
    max_tracks: Option<usize>,
) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(mode == WriteMode::Append)
        .truncate(mode == WriteMode::Truncate)
        .open(path)
        .with_context(|| format!("Could not open playlist {:?}", path))?;

    let written = playlist.entries.len().min(max_tracks.unwrap_or(usize::MAX));
    log::info!(
        "Writing {} of {} entries to {:?} ({:?})",
        written,
        playlist.entries.len(),
        path,
        mode
    );

    let mut writer = BufWriter::new(file);
    writer
        .write_all(&encode(render(playlist, max_tracks), playlist.encoding))
        .and_then(|_| writer.flush())
        .with_context(|| format!("Could not write playlist {:?}", path))?;

    log::debug!("Playlist flush to disk complete.");
    Ok(())
}
