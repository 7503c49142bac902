use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

use crate::filter::{Candidate, Filter, FilterOptions};
use crate::metadata::{TagKey, TagSource};
use crate::playlist::PlaylistEntry;
use crate::prompt::Confirm;

// what --url-chars leaves alone
const PATH_CHARS: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'\\')
    .remove(b':')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// How accepted paths are rewritten before landing in the playlist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathOptions {
    pub absolute: bool,
    pub windows: bool,
    pub url_chars: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectOptions {
    pub recursive: bool,
    pub filter: FilterOptions,
    pub paths: PathOptions,
    pub image: Option<String>,
    pub info: bool,
}

/// An accepted file: where it really is, and what the playlist will say.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Collected {
    pub source: PathBuf,
    pub entry: PlaylistEntry,
}

pub fn transform_location(path: &Path, opts: &PathOptions) -> String {
    let resolved = if opts.absolute {
        dunce::canonicalize(path).unwrap_or_else(|e| {
            log::debug!("Could not resolve {:?} ({}), keeping it as is", path, e);
            path.to_path_buf()
        })
    } else {
        path.to_path_buf()
    };

    let mut location = resolved.to_string_lossy().to_string();
    if opts.windows {
        location = location.replace('/', "\\");
    }
    if opts.url_chars {
        location = utf8_percent_encode(&location, PATH_CHARS).to_string();
    }
    location.replace('\n', "\\n").replace('\r', "\\r")
}

/// `<seconds>,<artist> - <title>` for tagged files.
fn describe(candidate: &Candidate<'_>) -> Option<String> {
    candidate.tags()?;

    let seconds = candidate
        .media()
        .duration
        .map(|d| d.round() as i64)
        .unwrap_or(-1);
    let artist = candidate.tag(TagKey::Artist).unwrap_or_default();
    let title = candidate
        .tag(TagKey::Title)
        .map(String::from)
        .or_else(|| {
            candidate
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
        })
        .unwrap_or_default();

    Some(format!("{},{} - {}", seconds, artist, title))
}

fn spinner(hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} files ({per_sec})")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

type Groups = BTreeMap<String, Vec<(PathBuf, u64)>>;

/// Files under `root` grouped by requested extension, each group in walk order.
fn enumerate(root: &Path, opts: &CollectOptions, pb: &ProgressBar) -> Groups {
    let mut groups: Groups = opts
        .filter
        .extensions
        .iter()
        .map(|e| (e.to_lowercase(), Vec::new()))
        .collect();

    let mut walker = WalkDir::new(root).min_depth(1);
    if !opts.recursive {
        walker = walker.max_depth(1);
    }

    for entry in walker.into_iter().filter_map(|e| match e {
        Ok(entry) => Some(entry),
        Err(err) => {
            log::debug!("Skipping unreadable entry: {}", err);
            None
        }
    }) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(ext) = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
        else {
            continue;
        };
        let Some(group) = groups.get_mut(&ext) else {
            continue;
        };

        pb.inc(1);
        let size = match path.metadata() {
            Ok(m) => m.len(),
            Err(e) => {
                log::warn!("Cannot stat {:?}: {}", path, e);
                continue;
            }
        };
        log::trace!("Found: {:?} ({} bytes)", path, size);
        group.push((path.to_path_buf(), size));
    }

    groups
}

/// Walks every root and returns the accepted files, in the order found.
///
/// Missing roots or roots that are not directories are warned about and skipped.
pub fn collect(
    roots: &[PathBuf],
    opts: &CollectOptions,
    source: &dyn TagSource,
    confirm: &mut dyn Confirm,
) -> Result<Vec<Collected>> {
    let filter = Filter::new(&opts.filter)?;
    let pb = spinner(opts.filter.interactive);

    let mut accepted: Vec<PathBuf> = Vec::new();
    let mut collected = Vec::new();

    for root in roots {
        if !root.exists() {
            log::warn!("Directory {:?} does not exist, skipped", root);
            continue;
        }
        if !root.is_dir() {
            log::warn!("{:?} is not a directory, skipped", root);
            continue;
        }

        log::info!("Walking directory: {:?}", root);
        for (ext, files) in enumerate(root, opts, &pb) {
            log::debug!("{} candidate .{} files in {:?}", files.len(), ext, root);

            for (path, size) in files {
                let candidate = Candidate::new(path, size, source);
                if !filter.accept(&candidate, &accepted, confirm) {
                    continue;
                }

                let entry = PlaylistEntry {
                    location: transform_location(&candidate.path, &opts.paths),
                    image: opts.image.clone(),
                    info: if opts.info {
                        describe(&candidate)
                    } else {
                        None
                    },
                };
                log::debug!("Accepted: {}", entry.location);

                accepted.push(candidate.path.clone());
                collected.push(Collected {
                    source: candidate.path,
                    entry,
                });
            }
        }
    }

    pb.finish_and_clear();
    log::info!(
        "Collected {} files from {} directories",
        collected.len(),
        roots.len()
    );
    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{MediaInfo, TagMap};
    use std::collections::{BTreeSet, HashMap};
    use std::fs;
    use tempfile::tempdir;

    #[derive(Default)]
    struct FakeTags(HashMap<PathBuf, MediaInfo>);

    impl TagSource for FakeTags {
        fn read(&self, path: &Path) -> MediaInfo {
            self.0.get(path).cloned().unwrap_or_default()
        }
    }

    fn options(exts: &[&str]) -> CollectOptions {
        CollectOptions {
            filter: FilterOptions {
                extensions: exts.iter().map(|e| e.to_string()).collect::<BTreeSet<_>>(),
                min_size: Some(0),
                ..FilterOptions::default()
            },
            ..CollectOptions::default()
        }
    }

    fn run(roots: &[PathBuf], opts: &CollectOptions) -> Vec<Collected> {
        collect(roots, opts, &FakeTags::default(), &mut |_: &Path| true).unwrap()
    }

    fn locations(collected: &[Collected]) -> BTreeSet<String> {
        collected.iter().map(|c| c.entry.location.clone()).collect()
    }

    #[test]
    fn only_requested_extensions_are_collected() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.mp3"), vec![0u8; 500]).unwrap();
        fs::write(dir.path().join("b.txt"), vec![0u8; 500]).unwrap();

        let collected = run(&[dir.path().to_path_buf()], &options(&["mp3"]));

        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].source, dir.path().join("a.mp3"));
        assert_eq!(
            collected[0].entry.location,
            dir.path().join("a.mp3").to_string_lossy()
        );
    }

    #[test]
    fn absolute_resolves_relative_roots() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.mp3"), vec![0u8; 10]).unwrap();
        let mut opts = options(&["mp3"]);
        opts.paths.absolute = true;

        let collected = run(&[dir.path().join(".")], &opts);
        let expected = dunce::canonicalize(dir.path().join("a.mp3")).unwrap();
        assert_eq!(collected[0].entry.location, expected.to_string_lossy());
    }

    #[test]
    fn groups_follow_extension_order_and_cardinality_holds() {
        let dir = tempdir().unwrap();
        for name in ["1.ogg", "2.mp3", "3.ogg", "4.MP3", "5.wav"] {
            fs::write(dir.path().join(name), b"data").unwrap();
        }

        let collected = run(&[dir.path().to_path_buf()], &options(&["ogg", "mp3"]));
        assert_eq!(collected.len(), 4);

        let exts: Vec<String> = collected
            .iter()
            .map(|c| {
                c.source
                    .extension()
                    .unwrap()
                    .to_string_lossy()
                    .to_lowercase()
            })
            .collect();
        assert_eq!(exts, vec!["mp3", "mp3", "ogg", "ogg"]);
    }

    #[test]
    fn recursion_is_opt_in() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir_all(&sub).unwrap();
        fs::write(dir.path().join("top.mp3"), b"data").unwrap();
        fs::write(sub.join("deep.mp3"), b"data").unwrap();

        let mut opts = options(&["mp3"]);
        assert_eq!(run(&[dir.path().to_path_buf()], &opts).len(), 1);

        opts.recursive = true;
        let collected = run(&[dir.path().to_path_buf()], &opts);
        assert_eq!(collected.len(), 2);
    }

    #[test]
    fn bad_roots_are_skipped() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.mp3");
        fs::write(&file, b"data").unwrap();

        let roots = vec![
            dir.path().join("missing"),
            file.clone(),
            dir.path().to_path_buf(),
        ];
        let collected = run(&roots, &options(&["mp3"]));
        assert_eq!(collected.len(), 1);
    }

    #[test]
    fn repeated_runs_give_the_same_set() {
        let dir = tempdir().unwrap();
        for name in ["a.mp3", "b.mp3", "c.mp3"] {
            fs::write(dir.path().join(name), name.as_bytes()).unwrap();
        }
        let roots = vec![dir.path().to_path_buf()];
        let opts = options(&["mp3"]);

        assert_eq!(
            locations(&run(&roots, &opts)),
            locations(&run(&roots, &opts))
        );
    }

    #[test]
    fn unique_survives_path_rewriting() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.mp3"), b"same").unwrap();
        fs::write(dir.path().join("b.mp3"), b"same").unwrap();
        fs::write(dir.path().join("c.mp3"), b"diff").unwrap();

        let mut opts = options(&["mp3"]);
        opts.filter.unique = true;
        opts.paths.windows = true;
        opts.paths.url_chars = true;

        let collected = run(&[dir.path().to_path_buf()], &opts);
        assert_eq!(collected.len(), 2);
    }

    #[test]
    fn location_transforms_apply_in_order() {
        let opts = PathOptions {
            absolute: false,
            windows: true,
            url_chars: true,
        };
        assert_eq!(
            transform_location(Path::new("music/My Song.mp3"), &opts),
            "music\\My%20Song.mp3"
        );

        let plain = PathOptions::default();
        assert_eq!(
            transform_location(Path::new("odd\nname.mp3"), &plain),
            "odd\\nname.mp3"
        );
        assert_eq!(
            transform_location(Path::new("C:/x/a-b_c~d.mp3"), &PathOptions {
                url_chars: true,
                ..plain
            }),
            "C:/x/a-b_c~d.mp3"
        );
    }

    #[test]
    fn info_and_image_are_attached() {
        let dir = tempdir().unwrap();
        let tagged = dir.path().join("tagged.mp3");
        let plain = dir.path().join("plain.mp3");
        fs::write(&tagged, b"data").unwrap();
        fs::write(&plain, b"data!").unwrap();

        let tags: TagMap = [
            (TagKey::Artist, "Queen".to_string()),
            (TagKey::Title, "Innuendo".to_string()),
        ]
        .into_iter()
        .collect();
        let mut fake = FakeTags::default();
        fake.0.insert(
            tagged.clone(),
            MediaInfo {
                tags: Some(tags),
                duration: Some(391.6),
            },
        );

        let mut opts = options(&["mp3"]);
        opts.info = true;
        opts.image = Some("cover.png".to_string());

        let roots = vec![dir.path().to_path_buf()];
        let collected = collect(&roots, &opts, &fake, &mut |_: &Path| true).unwrap();
        let by_source: HashMap<PathBuf, PlaylistEntry> = collected
            .into_iter()
            .map(|c| (c.source, c.entry))
            .collect();

        assert_eq!(
            by_source[&tagged].info.as_deref(),
            Some("392,Queen - Innuendo")
        );
        assert_eq!(by_source[&plain].info, None);
        assert!(
            by_source
                .values()
                .all(|e| e.image.as_deref() == Some("cover.png"))
        );
    }
}
