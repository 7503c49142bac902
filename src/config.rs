use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub audio_exts: Vec<String>,
    pub video_exts: Vec<String>,

    /// seconds a cached scan stays valid when `--cache` has no value
    pub cache_ttl: u64,
    pub enable_file_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audio_exts: vec![
                "mp1", "mp2", "mp3", "mp4", "aac", "ogg", "wav", "wma", "m4a", "aiff", "flac",
                "alac", "opus",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            video_exts: vec![
                "avi", "xvid", "divx", "mpeg", "mpg", "mov", "wmv", "3gp", "mkv", "m4v", "webm",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            cache_ttl: 3600,
            enable_file_logging: false,
        }
    }
}

// ".MP3" / "*.mp3" -> "mp3"
pub fn clean_ext(ext: &str) -> String {
    ext.trim()
        .trim_start_matches('*')
        .trim_start_matches('.')
        .to_lowercase()
}

impl Config {
    /// The formats to scan for, built once from the defaults plus any overrides.
    ///
    /// `only` wins over everything; otherwise `include` extends the defaults.
    pub fn extensions(&self, include: &[String], only: Option<&str>) -> BTreeSet<String> {
        if let Some(only) = only {
            return [clean_ext(only)].into_iter().filter(|e| !e.is_empty()).collect();
        }

        self.audio_exts
            .iter()
            .chain(&self.video_exts)
            .chain(include)
            .map(|e| clean_ext(e))
            .filter(|e| !e.is_empty())
            .collect()
    }
}

pub fn default_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("com", "mkpl", "mkpl")
        .context("Could not determine config paths")?;
    Ok(dirs.config_dir().join("config.toml"))
}

fn write_default(path: &Path) -> Result<Config> {
    let cfg = Config::default();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Could not create config directory {:?}", dir))?;
    }
    std::fs::write(path, toml::to_string_pretty(&cfg)?)
        .with_context(|| format!("Could not write default config {:?}", path))?;
    Ok(cfg)
}

/// Reads `config.toml`, writing a default one first when there is none.
pub fn load(override_path: Option<PathBuf>) -> Result<Config> {
    let path = override_path.map_or_else(default_path, Ok)?;

    if !path.exists() {
        log::info!("No config at {:?}, writing defaults", path);
        return write_default(&path);
    }

    log::debug!("Reading config {:?}", path);
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Could not read config {:?}", path))?;
    let cfg: Config =
        toml::from_str(&text).with_context(|| format!("Invalid config file {:?}", path))?;

    log::trace!("Effective config: {:?}", cfg);
    Ok(cfg)
}
