use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::{ItemKey, Tag, TagType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Logical tag fields, shared by every tag dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagKey {
    Artist,
    Title,
    Album,
    Genre,
    Year,
    Track,
}

impl TagKey {
    pub const ALL: [TagKey; 6] = [
        TagKey::Artist,
        TagKey::Title,
        TagKey::Album,
        TagKey::Genre,
        TagKey::Year,
        TagKey::Track,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TagKey::Artist => "artist",
            TagKey::Title => "title",
            TagKey::Album => "album",
            TagKey::Genre => "genre",
            TagKey::Year => "year",
            TagKey::Track => "track",
        }
    }
}

impl fmt::Display for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TagKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TagKey::ALL
            .into_iter()
            .find(|k| k.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| format!("unknown tag key '{}'", s))
    }
}

pub type TagMap = BTreeMap<TagKey, String>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaInfo {
    pub tags: Option<TagMap>,
    pub duration: Option<f64>,
}

/// Narrow boundary to whatever reads embedded metadata.
///
/// Implementations never fail: unsupported, unreadable or untagged files
/// simply yield `None`.
pub trait TagSource {
    fn read(&self, path: &Path) -> MediaInfo;

    fn read_tags(&self, path: &Path) -> Option<TagMap> {
        self.read(path).tags
    }

    fn read_duration(&self, path: &Path) -> Option<f64> {
        self.read(path).duration
    }
}

// dialects

/// One family of tag containers, mapping logical keys onto the item keys
/// that container stores them under.
trait TagDialect {
    fn name(&self) -> &'static str;

    fn item_keys(&self, key: TagKey) -> Vec<ItemKey>;

    fn normalize(&self, key: TagKey, raw: &str) -> Option<String> {
        normalize_common(key, raw)
    }

    fn lookup(&self, tag: &Tag, key: TagKey) -> Option<String> {
        self.item_keys(key)
            .iter()
            .find_map(|k| tag.get_string(*k))
            .and_then(|raw| self.normalize(key, raw))
    }

    fn tag_map(&self, tag: &Tag) -> TagMap {
        TagKey::ALL
            .into_iter()
            .filter_map(|k| self.lookup(tag, k).map(|v| (k, v)))
            .collect()
    }
}

/// ID3v2 style containers (TIT2, TPE1, TALB, TCON, TDRC/TYER, TRCK).
struct FrameCodes;

impl TagDialect for FrameCodes {
    fn name(&self) -> &'static str {
        "frame-code"
    }

    fn item_keys(&self, key: TagKey) -> Vec<ItemKey> {
        match key {
            TagKey::Artist => vec![ItemKey::TrackArtist, ItemKey::AlbumArtist],
            TagKey::Title => vec![ItemKey::TrackTitle],
            TagKey::Album => vec![ItemKey::AlbumTitle],
            TagKey::Genre => vec![ItemKey::Genre],
            // TDRC on v2.4, TYER on v2.3, TDOR as last resort
            TagKey::Year => vec![
                ItemKey::RecordingDate,
                ItemKey::Year,
                ItemKey::OriginalReleaseDate,
            ],
            TagKey::Track => vec![ItemKey::TrackNumber],
        }
    }

    fn normalize(&self, key: TagKey, raw: &str) -> Option<String> {
        match key {
            // legacy TCON references like "(17)" or "(17)Rock"
            TagKey::Genre => {
                let trimmed = raw.trim();
                let cleaned = match trimmed.strip_prefix('(') {
                    Some(rest) => match rest.split_once(')') {
                        Some((_, tail)) if !tail.trim().is_empty() => tail,
                        _ => trimmed,
                    },
                    None => trimmed,
                };
                normalize_common(key, cleaned)
            }
            _ => normalize_common(key, raw),
        }
    }
}

/// MP4 `ilst` atoms (©nam, ©ART, ©alb, ©gen/gnre, ©day, trkn).
struct AtomNames;

impl TagDialect for AtomNames {
    fn name(&self) -> &'static str {
        "atom"
    }

    fn item_keys(&self, key: TagKey) -> Vec<ItemKey> {
        match key {
            TagKey::Artist => vec![ItemKey::TrackArtist, ItemKey::AlbumArtist],
            TagKey::Title => vec![ItemKey::TrackTitle],
            TagKey::Album => vec![ItemKey::AlbumTitle],
            TagKey::Genre => vec![ItemKey::Genre],
            TagKey::Year => vec![ItemKey::RecordingDate, ItemKey::ReleaseDate],
            TagKey::Track => vec![ItemKey::TrackNumber],
        }
    }
}

/// Everything else lofty understands (Vorbis comments, APE, RIFF INFO...).
struct Generic;

impl TagDialect for Generic {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn item_keys(&self, key: TagKey) -> Vec<ItemKey> {
        match key {
            TagKey::Artist => vec![ItemKey::TrackArtist, ItemKey::AlbumArtist],
            TagKey::Title => vec![ItemKey::TrackTitle],
            TagKey::Album => vec![ItemKey::AlbumTitle],
            TagKey::Genre => vec![ItemKey::Genre],
            TagKey::Year => vec![ItemKey::Year, ItemKey::RecordingDate],
            TagKey::Track => vec![ItemKey::TrackNumber],
        }
    }
}

fn dialect_for(tag_type: TagType) -> &'static dyn TagDialect {
    match tag_type {
        TagType::Id3v2 => &FrameCodes,
        TagType::Mp4Ilst => &AtomNames,
        _ => &Generic,
    }
}

fn normalize_common(key: TagKey, raw: &str) -> Option<String> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    match key {
        // "3/12" -> "3"
        TagKey::Track => value
            .split('/')
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from),
        // "2019-05-01T00:00" -> "2019"
        TagKey::Year => match value.get(..4) {
            Some(head) if head.chars().all(|c| c.is_ascii_digit()) => Some(head.to_string()),
            _ => Some(value.to_string()),
        },
        _ => Some(value.to_string()),
    }
}

/// Parses the leading run of digits, so "07", "7/12" and "2019-01" all work.
pub fn leading_number(value: &str) -> Option<u64> {
    let digits: String = value
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

// lofty backed reader

pub struct LoftyTags {
    audio_exts: HashSet<String>,
}

impl LoftyTags {
    pub fn new<I, S>(audio_exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            audio_exts: audio_exts
                .into_iter()
                .map(|e| e.as_ref().trim().trim_start_matches('.').to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    pub fn is_audio(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.audio_exts.contains(&e.to_lowercase()))
            .unwrap_or(false)
    }
}

impl TagSource for LoftyTags {
    fn read(&self, path: &Path) -> MediaInfo {
        if !self.is_audio(path) {
            log::trace!("Not an audio type, skipping metadata: {:?}", path);
            return MediaInfo::default();
        }

        let tagged_file = match Probe::open(path).and_then(|p| p.read()) {
            Ok(f) => f,
            Err(e) => {
                log::warn!("Could not read metadata for {:?}: {}", path, e);
                return MediaInfo::default();
            }
        };

        let duration = Some(tagged_file.properties().duration().as_secs_f64())
            .filter(|d| *d > 0.0);

        let tags = tagged_file
            .primary_tag()
            .or_else(|| tagged_file.first_tag())
            .map(|tag| {
                let dialect = dialect_for(tag.tag_type());
                log::trace!("Reading {:?} as {} tags", path, dialect.name());
                dialect.tag_map(tag)
            })
            .filter(|map| !map.is_empty());

        MediaInfo { tags, duration }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn tag_with(tag_type: TagType, items: &[(ItemKey, &str)]) -> Tag {
        let mut tag = Tag::new(tag_type);
        for (key, value) in items {
            tag.insert_text(key.clone(), value.to_string());
        }
        tag
    }

    #[test]
    fn tag_key_parses_case_insensitively() {
        assert_eq!("Genre".parse::<TagKey>(), Ok(TagKey::Genre));
        assert_eq!(" year ".parse::<TagKey>(), Ok(TagKey::Year));
        assert!("bitrate".parse::<TagKey>().is_err());
    }

    #[test]
    fn leading_number_handles_slashes_and_garbage() {
        assert_eq!(leading_number("07"), Some(7));
        assert_eq!(leading_number("7/12"), Some(7));
        assert_eq!(leading_number("2019-05-01"), Some(2019));
        assert_eq!(leading_number("side A"), None);
        assert_eq!(leading_number(""), None);
    }

    #[test]
    fn both_dialects_normalize_into_the_same_keys() {
        let id3 = tag_with(
            TagType::Id3v2,
            &[
                (ItemKey::TrackTitle, "Song"),
                (ItemKey::TrackArtist, "Band"),
                (ItemKey::RecordingDate, "2019-05-01"),
                (ItemKey::TrackNumber, "3/12"),
                (ItemKey::Genre, "(17)Rock"),
            ],
        );
        let mp4 = tag_with(
            TagType::Mp4Ilst,
            &[
                (ItemKey::TrackTitle, "Song"),
                (ItemKey::TrackArtist, "Band"),
                (ItemKey::RecordingDate, "2019"),
                (ItemKey::TrackNumber, "3"),
                (ItemKey::Genre, "Rock"),
            ],
        );

        let a = dialect_for(TagType::Id3v2).tag_map(&id3);
        let b = dialect_for(TagType::Mp4Ilst).tag_map(&mp4);

        assert_eq!(a, b);
        assert_eq!(a.get(&TagKey::Year).map(String::as_str), Some("2019"));
        assert_eq!(a.get(&TagKey::Track).map(String::as_str), Some("3"));
        assert_eq!(a.get(&TagKey::Genre).map(String::as_str), Some("Rock"));
    }

    #[test]
    fn blank_values_are_dropped() {
        let tag = tag_with(TagType::VorbisComments, &[(ItemKey::TrackTitle, "   ")]);
        let dialect = dialect_for(TagType::VorbisComments);
        assert!(dialect.tag_map(&tag).is_empty());
    }

    #[test]
    fn unsupported_and_corrupt_files_yield_nothing() {
        let dir = tempdir().unwrap();
        let corrupt = dir.path().join("broken.mp3");
        let text = dir.path().join("notes.txt");
        fs::write(&corrupt, b"definitely not mpeg").unwrap();
        fs::write(&text, b"hello").unwrap();

        let reader = LoftyTags::new(["mp3", ".FLAC"]);
        assert!(reader.is_audio(Path::new("x.MP3")));
        assert!(reader.is_audio(Path::new("x.flac")));
        assert!(!reader.is_audio(&text));

        assert_eq!(reader.read(&corrupt), MediaInfo::default());
        assert_eq!(reader.read(&text), MediaInfo::default());
        let missing = dir.path().join("missing.mp3");
        assert_eq!(reader.read(&missing), MediaInfo::default());
    }
}
