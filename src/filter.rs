use anyhow::{Context, Result, bail};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::cell::OnceCell;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::metadata::{MediaInfo, TagKey, TagMap, TagSource};
use crate::prompt::Confirm;

/// Duration assumed for files whose length cannot be read.
pub const UNKNOWN_DURATION: f64 = 0.1;

const FILTER_KEYS: [TagKey; 5] = [
    TagKey::Album,
    TagKey::Artist,
    TagKey::Genre,
    TagKey::Title,
    TagKey::Year,
];

/// `key=value` predicate over one tag, value matched as a case-insensitive regex.
#[derive(Debug, Clone)]
pub struct FilterSpec {
    pub key: TagKey,
    pattern: Regex,
}

impl FilterSpec {
    pub fn parse(raw: &str) -> Result<Self> {
        let (key, value) = raw
            .split_once('=')
            .with_context(|| format!("Invalid filter '{}', expected KEY=VALUE", raw))?;

        let key: TagKey = key
            .parse()
            .ok()
            .filter(|k| FILTER_KEYS.contains(k))
            .with_context(|| {
                format!(
                    "Invalid filter key '{}', valid keys are: album, artist, genre, title, year",
                    key.trim()
                )
            })?;

        let pattern = RegexBuilder::new(value.trim())
            .case_insensitive(true)
            .build()
            .with_context(|| format!("Invalid filter value '{}'", value))?;

        Ok(Self { key, pattern })
    }

    pub fn matches(&self, tags: &TagMap) -> bool {
        tags.get(&self.key)
            .map(|v| self.pattern.is_match(v))
            .unwrap_or(false)
    }
}

/// Parses every raw filter, warning about and dropping the bad ones.
pub fn parse_filters(raw: &[String]) -> Vec<FilterSpec> {
    raw.iter()
        .filter_map(|r| match FilterSpec::parse(r) {
            Ok(spec) => Some(spec),
            Err(e) => {
                log::warn!("{:#}. Filter ignored.", e);
                None
            }
        })
        .collect()
}

/// Same as [`parse_filters`] but keeps the raw text of the valid ones.
pub fn valid_filters(raw: &[String]) -> Vec<String> {
    raw.iter()
        .filter(|r| match FilterSpec::parse(r) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("{:#}. Filter ignored.", e);
                false
            }
        })
        .cloned()
        .collect()
}

/// Equal or inverted min/max bounds can never match anything.
pub fn check_bounds(opts: &FilterOptions) -> Result<()> {
    if let (Some(min), Some(max)) = (opts.min_size, opts.max_size) {
        if min >= max {
            bail!(
                "Minimum size ({}) must be lower than maximum size ({})",
                min,
                max
            );
        }
    }
    if let (Some(min), Some(max)) = (opts.min_length, opts.max_length) {
        if min >= max {
            bail!(
                "Minimum length ({}) must be lower than maximum length ({})",
                min,
                max
            );
        }
    }
    Ok(())
}

/// Everything the filter chain is configured with.
///
/// Kept as plain data so it can double as part of a cache key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterOptions {
    pub extensions: BTreeSet<String>,
    pub exclude_dirs: Vec<String>,
    pub pattern: Option<String>,
    pub exclude_pattern: Option<String>,
    pub tag_filters: Vec<String>,
    pub unique: bool,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub min_length: Option<f64>,
    pub max_length: Option<f64>,
    pub interactive: bool,
}

/// A file found during the walk, with metadata read at most once and only on demand.
pub struct Candidate<'a> {
    pub path: PathBuf,
    pub size: u64,
    source: &'a dyn TagSource,
    media: OnceCell<MediaInfo>,
}

impl<'a> Candidate<'a> {
    pub fn new(path: PathBuf, size: u64, source: &'a dyn TagSource) -> Self {
        Self {
            path,
            size,
            source,
            media: OnceCell::new(),
        }
    }

    pub fn media(&self) -> &MediaInfo {
        self.media.get_or_init(|| self.source.read(&self.path))
    }

    pub fn tags(&self) -> Option<&TagMap> {
        self.media().tags.as_ref()
    }

    pub fn tag(&self, key: TagKey) -> Option<&str> {
        self.tags().and_then(|t| t.get(&key)).map(String::as_str)
    }

    pub fn duration(&self) -> f64 {
        self.media().duration.unwrap_or(UNKNOWN_DURATION)
    }

    fn path_str(&self) -> String {
        self.path.to_string_lossy().to_string()
    }
}

pub struct Filter {
    extensions: BTreeSet<String>,
    exclude_dirs: Vec<String>,
    pattern: Option<Regex>,
    exclude_pattern: Option<Regex>,
    tag_filters: Vec<FilterSpec>,
    unique: bool,
    min_size: Option<u64>,
    max_size: Option<u64>,
    min_length: Option<f64>,
    max_length: Option<f64>,
    interactive: bool,
}

fn compile(pattern: &Option<String>, what: &str) -> Result<Option<Regex>> {
    let Some(p) = pattern.as_deref() else {
        return Ok(None);
    };
    let re = Regex::new(p).with_context(|| format!("Invalid {what} '{p}'"))?;
    Ok(Some(re))
}

impl Filter {
    pub fn new(opts: &FilterOptions) -> Result<Self> {
        check_bounds(opts)?;

        Ok(Self {
            extensions: opts.extensions.iter().map(|e| e.to_lowercase()).collect(),
            exclude_dirs: opts.exclude_dirs.clone(),
            pattern: compile(&opts.pattern, "pattern")?,
            exclude_pattern: compile(&opts.exclude_pattern, "exclude pattern")?,
            tag_filters: parse_filters(&opts.tag_filters),
            unique: opts.unique,
            min_size: opts.min_size,
            max_size: opts.max_size,
            min_length: opts.min_length,
            max_length: opts.max_length,
            interactive: opts.interactive,
        })
    }

    /// Runs the whole chain, stopping at the first rejection.
    ///
    /// `accepted` holds the original paths of everything already taken, used
    /// by the uniqueness check.
    pub fn accept(
        &self,
        candidate: &Candidate<'_>,
        accepted: &[PathBuf],
        confirm: &mut dyn Confirm,
    ) -> bool {
        let path_str = candidate.path_str();

        let ext = candidate
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        if !ext.is_some_and(|e| self.extensions.contains(&e)) {
            log::trace!("Rejected (extension): {}", path_str);
            return false;
        }

        if let Some(dir) = self.exclude_dirs.iter().find(|d| path_str.contains(d.as_str())) {
            log::debug!("Rejected (excluded dir '{}'): {}", dir, path_str);
            return false;
        }

        if let Some(re) = &self.pattern {
            if !self.matches_path_or_title(re, candidate, &path_str) {
                log::debug!("Rejected (pattern): {}", path_str);
                return false;
            }
        }

        if let Some(re) = &self.exclude_pattern {
            if self.matches_path_or_title(re, candidate, &path_str) {
                log::debug!("Rejected (exclude pattern): {}", path_str);
                return false;
            }
        }

        if !self.tag_filters.is_empty() {
            let hit = candidate
                .tags()
                .is_some_and(|tags| self.tag_filters.iter().any(|f| f.matches(tags)));
            if !hit {
                log::debug!("Rejected (tag filters): {}", path_str);
                return false;
            }
        }

        if self.unique {
            if let Some(dup) = accepted.iter().find(|p| same_content(p, &candidate.path)) {
                log::debug!("Rejected (duplicate of {:?}): {}", dup, path_str);
                return false;
            }
        }

        if self.min_size.is_some_and(|min| candidate.size <= min)
            || self.max_size.is_some_and(|max| candidate.size >= max)
        {
            log::debug!("Rejected (size {} bytes): {}", candidate.size, path_str);
            return false;
        }

        if self.min_length.is_some() || self.max_length.is_some() {
            let length = candidate.duration();
            if self.min_length.is_some_and(|min| length <= min)
                || self.max_length.is_some_and(|max| length >= max)
            {
                log::debug!("Rejected (length {:.2}s): {}", length, path_str);
                return false;
            }
        }

        if self.interactive && !confirm.confirm(&candidate.path) {
            log::debug!("Rejected (user): {}", path_str);
            return false;
        }

        true
    }

    fn matches_path_or_title(&self, re: &Regex, candidate: &Candidate<'_>, path_str: &str) -> bool {
        re.is_match(path_str) || candidate.tag(TagKey::Title).is_some_and(|t| re.is_match(t))
    }
}

/// True when both files exist and hold exactly the same bytes.
pub fn same_content(a: &Path, b: &Path) -> bool {
    let (Ok(meta_a), Ok(meta_b)) = (a.metadata(), b.metadata()) else {
        return false;
    };
    if meta_a.len() != meta_b.len() {
        return false;
    }

    let (Ok(file_a), Ok(file_b)) = (File::open(a), File::open(b)) else {
        return false;
    };
    let mut reader_a = BufReader::new(file_a);
    let mut reader_b = BufReader::new(file_b);
    let mut buf_a = [0u8; 8192];
    let mut buf_b = [0u8; 8192];

    loop {
        let n = match reader_a.read(&mut buf_a) {
            Ok(n) => n,
            Err(_) => return false,
        };
        if n == 0 {
            return true;
        }
        if reader_b.read_exact(&mut buf_b[..n]).is_err() || buf_a[..n] != buf_b[..n] {
            return false;
        }
    }
}
