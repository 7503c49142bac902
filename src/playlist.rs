use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::collector::{PathOptions, transform_location};

pub const EXT_MARKER: &str = "#EXTM3U";
pub const TITLE_MARKER: &str = "#PLAYLIST:";
pub const ENCODING_MARKER: &str = "#EXTENC:";
pub const IMAGE_MARKER: &str = "#EXTIMG:";
pub const INFO_MARKER: &str = "#EXTINF:";

/// How many leading lines of an existing playlist are inspected in append mode.
const HEADER_PROBE_LINES: usize = 3;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub location: String,
    pub image: Option<String>,
    pub info: Option<String>,
}

impl PlaylistEntry {
    pub fn bare(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            image: None,
            info: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum Encoding {
    #[value(name = "UTF-8")]
    Utf8,
    #[value(name = "ASCII")]
    Ascii,
    #[value(name = "UNICODE")]
    Unicode,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Encoding::Utf8 => "UTF-8",
            Encoding::Ascii => "ASCII",
            Encoding::Unicode => "UNICODE",
        })
    }
}

/// Which header lines are still to be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeaderLines {
    pub marker: bool,
    pub title: bool,
    pub encoding: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Playlist {
    pub entries: Vec<PlaylistEntry>,
    pub extension_enabled: bool,
    pub title: Option<String>,
    /// Text encoding of the file; also what the encoding marker announces.
    pub encoding: Option<Encoding>,
    pub header: HeaderLines,
}

/// Extended attributes asked for on the command line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderOptions {
    pub title: Option<String>,
    pub encoding: Option<Encoding>,
    pub image: Option<String>,
    pub info: bool,
}

impl HeaderOptions {
    pub fn wants_extension(&self) -> bool {
        self.title.is_some() || self.encoding.is_some() || self.image.is_some() || self.info
    }
}

/// Entries that come from somewhere other than the directory walk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extras {
    pub join: Vec<PathBuf>,
    pub links: Vec<String>,
    pub files: Vec<PathBuf>,
}

/// Keeps only http(s) links.
pub fn valid_links(links: &[String]) -> Vec<String> {
    links
        .iter()
        .filter(|l| {
            let ok = l.starts_with("http://") || l.starts_with("https://");
            if !ok {
                log::warn!("'{}' is not a valid http/https link, skipped", l);
            }
            ok
        })
        .cloned()
        .collect()
}

/// Keeps only extra files that exist on disk.
pub fn existing_files(files: &[PathBuf]) -> Vec<PathBuf> {
    files
        .iter()
        .filter(|f| {
            let ok = f.is_file();
            if !ok {
                log::warn!("File {:?} does not exist, skipped", f);
            }
            ok
        })
        .cloned()
        .collect()
}

// editors on Windows like to start UTF-8 files with one
fn strip_bom(line: &str) -> &str {
    line.strip_prefix('\u{feff}').unwrap_or(line)
}

/// Reads the media lines of another playlist, ignoring every `#` line.
pub fn read_join(path: &Path) -> Vec<PlaylistEntry> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            log::warn!("Cannot join playlist {:?}: {}", path, e);
            return Vec::new();
        }
    };

    let mut entries = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                log::warn!("Stopped reading {:?} at line {}: {}", path, n + 1, e);
                break;
            }
        };
        let line = strip_bom(line.trim_end_matches(['\r', '\n']));
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        entries.push(PlaylistEntry::bare(line));
    }

    log::debug!("Joined {} entries from {:?}", entries.len(), path);
    entries
}

/// Extension markers found at the top of a playlist we are about to append to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExistingMarkers {
    pub extm3u: bool,
    pub title: bool,
    pub encoding: bool,
}

impl ExistingMarkers {
    /// `None` when there is nothing to reconcile with (missing or empty file).
    pub fn detect(path: &Path) -> Option<Self> {
        let meta = path.metadata().ok()?;
        if !meta.is_file() || meta.len() == 0 {
            return None;
        }

        let mut markers = Self::default();
        match File::open(path) {
            Ok(file) => {
                for line in BufReader::new(file)
                    .lines()
                    .take(HEADER_PROBE_LINES)
                    .map_while(Result::ok)
                {
                    let line = strip_bom(line.trim_end());
                    markers.extm3u |= line == EXT_MARKER;
                    markers.title |= line.starts_with(TITLE_MARKER);
                    markers.encoding |= line.starts_with(ENCODING_MARKER);
                }
            }
            Err(e) => log::warn!("Cannot inspect existing playlist {:?}: {}", path, e),
        }
        log::debug!("Existing markers in {:?}: {:?}", path, markers);
        Some(markers)
    }
}

/// Merges the walk result with the extra sources and settles the header.
///
/// `existing` is only given in append mode, and only when the destination
/// already has content.
pub fn assemble(
    mut entries: Vec<PlaylistEntry>,
    extras: &Extras,
    header: &HeaderOptions,
    paths: &PathOptions,
    existing: Option<ExistingMarkers>,
) -> Playlist {
    for join in &extras.join {
        entries.extend(read_join(join));
    }

    entries.extend(extras.links.iter().map(|link| PlaylistEntry {
        location: link.clone(),
        image: header.image.clone(),
        info: None,
    }));

    entries.extend(extras.files.iter().map(|file| PlaylistEntry {
        location: transform_location(file, paths),
        image: header.image.clone(),
        info: None,
    }));

    let mut playlist = Playlist {
        entries,
        extension_enabled: header.wants_extension(),
        title: header.title.clone(),
        encoding: header.encoding,
        header: HeaderLines {
            marker: true,
            title: header.title.is_some(),
            encoding: header.encoding.is_some(),
        },
    };

    if let Some(markers) = existing {
        reconcile(&mut playlist, header, markers);
    }

    playlist
}

fn reconcile(playlist: &mut Playlist, header: &HeaderOptions, markers: ExistingMarkers) {
    playlist.header.marker = false;

    if markers.extm3u {
        if markers.title && playlist.header.title {
            log::info!("Playlist already has a title, keeping the existing one");
            playlist.header.title = false;
        }
        if markers.encoding && playlist.header.encoding {
            log::info!("Playlist already declares an encoding, not repeating it");
            playlist.header.encoding = false;
        }
        return;
    }

    if !playlist.extension_enabled {
        return;
    }

    // a plain playlist cannot grow extended lines halfway through
    let dropped = [
        (header.image.is_some(), "image option"),
        (header.title.is_some(), "title"),
        (header.encoding.is_some(), "encoding"),
        (header.info, "track info"),
    ];
    for (_, what) in dropped.iter().filter(|(set, _)| *set) {
        log::warn!("No {EXT_MARKER} header to append to, {what} ignored");
    }
    for entry in &mut playlist.entries {
        entry.image = None;
    }
    playlist.extension_enabled = false;
    playlist.header = HeaderLines::default();
}
