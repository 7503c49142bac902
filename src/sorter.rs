use rand::seq::SliceRandom;
use std::cmp::Ordering;
use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::collector::Collected;
use crate::filter::UNKNOWN_DURATION;
use crate::metadata::{TagKey, TagSource, leading_number};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMode {
    Name,
    Date,
    Track,
    Year,
    Size,
    Length,
    Shuffle,
}

// files that vanished since the walk sort as zero
fn created_at(path: &Path) -> Duration {
    path.metadata()
        .and_then(|m| m.created().or_else(|_| m.modified()))
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .unwrap_or_default()
}

fn size_bytes(path: &Path) -> u64 {
    path.metadata().map(|m| m.len()).unwrap_or(0)
}

fn numeric_tag(source: &dyn TagSource, path: &Path, key: TagKey) -> u64 {
    source
        .read_tags(path)
        .and_then(|tags| tags.get(&key).and_then(|v| leading_number(v)))
        .unwrap_or(0)
}

fn keyed_sort<K>(
    entries: &mut Vec<Collected>,
    descending: bool,
    key: impl Fn(&Collected) -> K,
    cmp: impl Fn(&K, &K) -> Ordering,
) {
    let mut keyed: Vec<(K, Collected)> = entries.drain(..).map(|e| (key(&e), e)).collect();
    keyed.sort_by(|a, b| {
        let ord = cmp(&a.0, &b.0);
        if descending { ord.reverse() } else { ord }
    });
    entries.extend(keyed.into_iter().map(|(_, e)| e));
}

/// Reorders `entries` in place. Every mode except shuffle is stable.
pub fn sort(
    entries: &mut Vec<Collected>,
    mode: SortMode,
    descending: bool,
    source: &dyn TagSource,
) {
    log::debug!(
        "Sorting {} entries by {:?}{}",
        entries.len(),
        mode,
        if descending { " (descending)" } else { "" }
    );

    match mode {
        SortMode::Name => keyed_sort(
            entries,
            descending,
            |c| c.entry.location.clone(),
            String::cmp,
        ),
        SortMode::Date => keyed_sort(
            entries,
            descending,
            |c| created_at(&c.source),
            Duration::cmp,
        ),
        SortMode::Size => keyed_sort(entries, descending, |c| size_bytes(&c.source), u64::cmp),
        SortMode::Track => keyed_sort(
            entries,
            descending,
            |c| numeric_tag(source, &c.source, TagKey::Track),
            u64::cmp,
        ),
        SortMode::Year => keyed_sort(
            entries,
            descending,
            |c| numeric_tag(source, &c.source, TagKey::Year),
            u64::cmp,
        ),
        SortMode::Length => keyed_sort(
            entries,
            descending,
            |c| source.read_duration(&c.source).unwrap_or(UNKNOWN_DURATION),
            f64::total_cmp,
        ),
        SortMode::Shuffle => {
            if descending {
                log::warn!("Descending order has no meaning with shuffle, ignored");
            }
            entries.shuffle(&mut rand::rng());
        }
    }
}
