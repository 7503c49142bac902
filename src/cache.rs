use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::collector::{CollectOptions, Collected};

#[derive(Serialize, Deserialize, Debug, Clone)]
struct Record {
    key: String,
    stored_at: u64,
    entries: Vec<Collected>,
}

/// Collector results memoized on disk for a limited time.
///
/// One JSON record per line. No locking: two runs sharing the file may
/// overwrite each other's records.
pub struct ResultCache {
    path: PathBuf,
    ttl: Duration,
    records: Vec<Record>,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// The full collector parameter set, serialized, with roots resolved
/// against the working directory.
pub fn cache_key(roots: &[PathBuf], opts: &CollectOptions) -> Result<String> {
    let cwd = std::env::current_dir().context("No working directory")?;
    cache_key_in(&cwd, roots, opts)
}

fn cache_key_in(base: &Path, roots: &[PathBuf], opts: &CollectOptions) -> Result<String> {
    let resolved: Vec<PathBuf> = roots
        .iter()
        .map(|root| {
            let joined = base.join(root);
            dunce::canonicalize(&joined).unwrap_or(joined)
        })
        .collect();
    serde_json::to_string(&(resolved, opts))
        .context("Could not build cache key")
}

impl ResultCache {
    pub fn default_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("com", "mkpl", "mkpl")
            .context("Could not determine cache directory")?;
        Ok(dirs.cache_dir().join("collect_cache.jsonl"))
    }

    /// Loads whatever is readable; corrupt lines are dropped on the next save.
    pub fn open(path: &Path, ttl: Duration) -> Result<Self> {
        let mut cache = Self {
            path: path.to_path_buf(),
            ttl,
            records: Vec::new(),
        };

        if !path.exists() {
            log::debug!("No cache file at {:?}", path);
            return Ok(cache);
        }

        log::debug!("Loading cache from {:?}", path);
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                log::warn!("Could not read cache {:?}, starting empty: {}", path, e);
                return Ok(cache);
            }
        };
        for (n, line) in bytes.split(|b| *b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            // from_slice also rejects invalid UTF-8
            match serde_json::from_slice::<Record>(line) {
                Ok(r) => cache.records.push(r),
                Err(e) => log::warn!("Corrupt cache record on line {}: {}", n + 1, e),
            }
        }

        log::debug!("Cache holds {} records", cache.records.len());
        Ok(cache)
    }

    fn is_fresh(&self, record: &Record, now: u64) -> bool {
        now.saturating_sub(record.stored_at) < self.ttl.as_secs()
    }

    /// Purges expired records and rewrites the file. Returns how many went.
    pub fn clear_stale(&mut self) -> Result<usize> {
        self.clear_stale_at(now_secs())
    }

    fn clear_stale_at(&mut self, now: u64) -> Result<usize> {
        let before = self.records.len();
        let ttl = self.ttl.as_secs();
        self.records.retain(|r| now.saturating_sub(r.stored_at) < ttl);

        let removed = before - self.records.len();
        if removed > 0 || self.path.exists() {
            self.save()?;
        }
        log::debug!("Cleared {} stale cache records", removed);
        Ok(removed)
    }

    pub fn get(&self, key: &str) -> Option<Vec<Collected>> {
        self.get_at(key, now_secs())
    }

    fn get_at(&self, key: &str, now: u64) -> Option<Vec<Collected>> {
        self.records
            .iter()
            .find(|r| r.key == key && self.is_fresh(r, now))
            .map(|r| r.entries.clone())
    }

    pub fn put(&mut self, key: String, entries: Vec<Collected>) -> Result<()> {
        self.put_at(key, entries, now_secs())
    }

    fn put_at(&mut self, key: String, entries: Vec<Collected>, now: u64) -> Result<()> {
        self.records.retain(|r| r.key != key);
        self.records.push(Record {
            key,
            stored_at: now,
            entries,
        });
        self.save()
    }

    /// Returns the memoized result for `key`, computing and storing it on a miss.
    pub fn get_or_compute<F>(&mut self, key: String, compute: F) -> Result<Vec<Collected>>
    where
        F: FnOnce() -> Result<Vec<Collected>>,
    {
        if let Some(hit) = self.get(&key) {
            log::info!("Using cached scan result ({} entries)", hit.len());
            return Ok(hit);
        }

        log::debug!("Cache miss, scanning");
        let entries = compute()?;
        self.put(key, entries.clone())?;
        Ok(entries)
    }

    fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let file = File::create(&self.path)
            .with_context(|| format!("Could not write cache {:?}", self.path))?;
        let mut writer = BufWriter::new(file);
        for record in &self.records {
            serde_json::to_writer(&mut writer, record)?;
            writeln!(writer)?;
        }
        writer.flush()?;
        Ok(())
    }
}
