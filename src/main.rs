mod cache;
mod collector;
mod config;
mod filter;
mod metadata;
mod playlist;
mod prompt;
mod sorter;
mod writer;

use anyhow::{Context, Result, bail};
use bytesize::ByteSize;
use clap::{ArgGroup, Parser};
use directories::ProjectDirs;
use flexi_logger::{Duplicate, FileSpec, Logger, LoggerHandle, WriteMode, style};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{ResultCache, cache_key};
use crate::collector::{CollectOptions, Collected, PathOptions};
use crate::config::Config;
use crate::filter::FilterOptions;
use crate::metadata::LoftyTags;
use crate::playlist::{Encoding, ExistingMarkers, Extras, HeaderOptions, Playlist};
use crate::prompt::{Confirm, TerminalPrompt};
use crate::sorter::SortMode;
use crate::writer::WriteMode as PlaylistMode;

fn parse_size(s: &str) -> Result<u64, String> {
    s.trim()
        .parse::<ByteSize>()
        .map(|b| b.as_u64())
        .map_err(|e| format!("invalid size '{}': {}", s, e))
}

#[derive(Parser, Clone, Debug)]
#[command(
    name = "mkpl",
    author,
    version,
    about = "mkpl - Make music playlist",
    after_help = "Playlist format is m3u",
    rename_all = "kebab-case",
    group(ArgGroup::new("order").multiple(false))
)]
struct Cli {
    #[arg(help = "Playlist file")]
    playlist: String,

    // sources
    #[arg(
        short = 'd',
        long,
        num_args = 1..,
        default_value = ".",
        help = "Directories that contains multimedia file"
    )]
    directories: Vec<PathBuf>,

    #[arg(short = 'e', long, num_args = 1.., help = "Exclude directory paths")]
    exclude_dirs: Vec<String>,

    #[arg(
        short = 'i',
        long,
        num_args = 1..,
        value_name = "FORMAT",
        help = "Include other file format"
    )]
    include: Vec<String>,

    #[arg(
        short = 'f',
        long,
        value_name = "FORMAT",
        help = "Select only a file format"
    )]
    format: Option<String>,

    #[arg(short = 'r', long, help = "Recursive search")]
    recursive: bool,

    #[arg(long, num_args = 1.., value_name = "URL", help = "Add remote links")]
    link: Vec<String>,

    #[arg(short = 'F', long, num_args = 1.., value_name = "FILE", help = "Add files")]
    file: Vec<PathBuf>,

    #[arg(
        short = 'j',
        long,
        num_args = 1..,
        value_name = "PLAYLIST",
        help = "Join other playlist files"
    )]
    join: Vec<PathBuf>,

    // filters
    #[arg(short = 'p', long, help = "Regular expression inclusion pattern")]
    pattern: Option<String>,

    #[arg(short = 'P', long, help = "Regular expression exclusion pattern")]
    exclude_pattern: Option<String>,

    #[arg(
        short = 's',
        long,
        value_parser = parse_size,
        default_value = "1",
        value_name = "SIZE",
        help = "Minimum size (e.g. 1024, 10KB, 3MiB)"
    )]
    size: u64,

    #[arg(
        short = 'S',
        long,
        value_parser = parse_size,
        value_name = "SIZE",
        help = "Maximum size"
    )]
    max_size: Option<u64>,

    #[arg(short = 'l', long, value_name = "SECONDS", help = "Minimum length")]
    length: Option<f64>,

    #[arg(short = 'L', long, value_name = "SECONDS", help = "Maximum length")]
    max_length: Option<f64>,

    #[arg(
        long = "filter",
        num_args = 1..,
        value_name = "KEY=VALUE",
        help = "Filter by tag (album, artist, genre, title, year), e.g. genre=rock"
    )]
    filters: Vec<String>,

    #[arg(
        short = 'u',
        long,
        help = "The same files are not placed in the playlist"
    )]
    unique: bool,

    #[arg(short = 'x', long, help = "Ask before adding each file")]
    interactive: bool,

    // output
    #[arg(short = 'a', long, help = "Absolute file name")]
    absolute: bool,

    #[arg(short = 'w', long, help = "Windows style folder separator")]
    windows: bool,

    #[arg(short = 'U', long, help = "Percent-encode paths")]
    url_chars: bool,

    #[arg(short = 't', long, help = "Playlist title")]
    title: Option<String>,

    #[arg(short = 'g', long, value_enum, help = "Text encoding")]
    encoding: Option<Encoding>,

    #[arg(short = 'I', long, value_name = "IMAGE", help = "Playlist cover image")]
    image: Option<PathBuf>,

    #[arg(
        short = 'o',
        long,
        help = "Add duration, artist and title of each track"
    )]
    info: bool,

    #[arg(
        short = 'm',
        long,
        value_name = "NUMBER",
        help = "Maximum number of tracks"
    )]
    max_tracks: Option<usize>,

    #[arg(short = 'c', long, help = "Continue playlist instead of override it")]
    append: bool,

    #[arg(long, help = "Create one playlist per directory")]
    split: bool,

    // ordering
    #[arg(long, group = "order", help = "Casual order")]
    shuffle: bool,
    #[arg(long, group = "order", help = "Sort by file name")]
    orderby_name: bool,
    #[arg(long, group = "order", help = "Sort by creation date")]
    orderby_date: bool,
    #[arg(long, group = "order", help = "Sort by track number")]
    orderby_track: bool,
    #[arg(long, group = "order", help = "Sort by year")]
    orderby_year: bool,
    #[arg(long, group = "order", help = "Sort by file size")]
    orderby_size: bool,
    #[arg(long, group = "order", help = "Sort by length")]
    orderby_length: bool,
    #[arg(short = 'D', long, help = "Reverse the sort order")]
    descending: bool,

    // sys
    #[arg(
        long,
        value_name = "SECONDS",
        num_args = 0..=1,
        help = "Reuse scan results younger than SECONDS (config cache_ttl if omitted)"
    )]
    cache: Option<Option<u64>>,

    #[arg(long, value_name = "PATH", help = "Use another config file")]
    config: Option<PathBuf>,

    #[arg(short = 'v', long, action = clap::ArgAction::Count, help = "Display Verbose Information")]
    verbose: u8,
    #[arg(long, help = "Debug mode")]
    debug: bool,
}

impl Cli {
    fn sort_mode(&self) -> Option<SortMode> {
        [
            (self.shuffle, SortMode::Shuffle),
            (self.orderby_name, SortMode::Name),
            (self.orderby_date, SortMode::Date),
            (self.orderby_track, SortMode::Track),
            (self.orderby_year, SortMode::Year),
            (self.orderby_size, SortMode::Size),
            (self.orderby_length, SortMode::Length),
        ]
        .into_iter()
        .find_map(|(on, mode)| on.then_some(mode))
    }

    fn filter_options(&self, cfg: &Config) -> FilterOptions {
        FilterOptions {
            extensions: cfg.extensions(&self.include, self.format.as_deref()),
            exclude_dirs: self.exclude_dirs.clone(),
            pattern: self.pattern.clone(),
            exclude_pattern: self.exclude_pattern.clone(),
            tag_filters: filter::valid_filters(&self.filters),
            unique: self.unique,
            min_size: Some(self.size),
            max_size: self.max_size,
            min_length: self.length,
            max_length: self.max_length,
            interactive: self.interactive,
        }
    }

    fn path_options(&self) -> PathOptions {
        PathOptions {
            absolute: self.absolute,
            windows: self.windows,
            url_chars: self.url_chars,
        }
    }

    fn image_str(&self) -> Option<String> {
        self.image.as_ref().map(|p| p.to_string_lossy().to_string())
    }

    fn header_options(&self) -> HeaderOptions {
        HeaderOptions {
            title: self.title.clone(),
            encoding: self.encoding,
            image: self.image_str(),
            info: self.info,
        }
    }
}

fn init_logger(args: &Cli, cfg: &Config) -> Result<LoggerHandle> {
    let log_filter = if args.debug {
        "mkpl=debug, warn"
    } else if args.verbose > 0 || cfg.enable_file_logging {
        "mkpl=info, warn"
    } else {
        "mkpl=warn"
    };

    let mut logger = Logger::try_with_str(log_filter)?.format_for_stderr(|w, _now, record| {
        let level = record.level();
        write!(
            w,
            "[{}] {}",
            style(level).paint(level.as_str()),
            record.args()
        )
    });

    if cfg.enable_file_logging {
        let dirs = ProjectDirs::from("com", "mkpl", "mkpl")
            .context("Could not determine data directory")?;
        let log_dir = dirs.data_dir();
        std::fs::create_dir_all(log_dir)?;

        logger = logger
            .log_to_file(
                FileSpec::default()
                    .directory(log_dir)
                    .basename("mkpl")
                    .suffix("log")
                    .use_timestamp(false),
            )
            .format_for_files(flexi_logger::opt_format)
            .write_mode(WriteMode::Direct)
            .duplicate_to_stderr(if args.debug {
                Duplicate::All
            } else if args.verbose > 0 {
                Duplicate::Info
            } else {
                Duplicate::Warn
            });
    }

    Ok(logger.start()?)
}

/// Contradictions that make the run pointless, caught before any scanning.
fn validate(args: &Cli, playlist_path: &Path, filter: &FilterOptions) -> Result<()> {
    if playlist_path.is_dir() {
        bail!("Playlist file {:?} is a directory", playlist_path);
    }
    if let Some(image) = &args.image {
        if !image.exists() {
            bail!("Image file {:?} does not exist", image);
        }
    }
    filter::check_bounds(filter)
}

/// `<parent of playlist>/<directory name>.<playlist extension>`
fn split_path(playlist_path: &Path, root: &Path) -> PathBuf {
    let name = dunce::canonicalize(root)
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        .or_else(|| root.file_name().map(|n| n.to_string_lossy().to_string()))
        .unwrap_or_else(|| "playlist".to_string());
    let ext = playlist_path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| "m3u".to_string());

    playlist_path
        .parent()
        .unwrap_or(Path::new(""))
        .join(format!("{}.{}", name, ext))
}

/// One output path per root. Roots sharing a directory name get `-2`, `-3`...
fn split_targets(playlist_path: &Path, roots: &[PathBuf]) -> Vec<(PathBuf, PathBuf)> {
    let mut taken = HashSet::new();
    roots
        .iter()
        .map(|root| {
            let base = split_path(playlist_path, root);
            let mut path = base.clone();
            let mut n = 2;
            while !taken.insert(path.clone()) {
                let stem = base.file_stem().unwrap_or_default().to_string_lossy();
                let ext = base.extension().unwrap_or_default().to_string_lossy();
                path = base.with_file_name(format!("{}-{}.{}", stem, n, ext));
                n += 1;
            }
            if path != base {
                log::warn!(
                    "{:?} is already used by another directory, writing {:?} to {:?}",
                    base,
                    root,
                    path
                );
            }
            (root.clone(), path)
        })
        .collect()
}

struct Session<'a> {
    args: &'a Cli,
    collect_opts: CollectOptions,
    extras: Extras,
    tags: LoftyTags,
    confirm: Box<dyn Confirm>,
    cache: Option<ResultCache>,
}

impl Session<'_> {
    fn collect(&mut self, roots: &[PathBuf]) -> Result<Vec<Collected>> {
        let opts = &self.collect_opts;
        let tags = &self.tags;
        let confirm = &mut self.confirm;
        let mut scan = || collector::collect(roots, opts, tags, &mut **confirm);

        match &mut self.cache {
            Some(cache) => {
                let key = cache_key(roots, opts)?;
                cache.get_or_compute(key, scan)
            }
            None => scan(),
        }
    }

    fn build(&mut self, roots: &[PathBuf], path: &Path) -> Result<Playlist> {
        let mut collected = self.collect(roots)?;

        if let Some(mode) = self.args.sort_mode() {
            sorter::sort(&mut collected, mode, self.args.descending, &self.tags);
        } else if self.args.descending {
            log::warn!("Descending order requested without a sort option, ignored");
        }

        let existing = if self.args.append {
            ExistingMarkers::detect(path)
        } else {
            None
        };

        Ok(playlist::assemble(
            collected.into_iter().map(|c| c.entry).collect(),
            &self.extras,
            &self.args.header_options(),
            &self.collect_opts.paths,
            existing,
        ))
    }

    fn write(&mut self, roots: &[PathBuf], path: &Path) -> Result<()> {
        let playlist = self.build(roots, path)?;
        let mode = if self.args.append {
            PlaylistMode::Append
        } else {
            PlaylistMode::Truncate
        };
        writer::write(path, mode, &playlist, self.args.max_tracks)?;
        log::info!("Playlist {:?} written", path);
        Ok(())
    }
}

fn run(args: &Cli, cfg: &Config) -> Result<()> {
    let playlist_path = writer::playlist_path(&args.playlist, args.encoding);
    let filter_opts = args.filter_options(cfg);
    validate(args, &playlist_path, &filter_opts)?;

    log::debug!("Scanning for: {:?}", filter_opts.extensions);

    let interactive = filter_opts.interactive;
    let collect_opts = CollectOptions {
        recursive: args.recursive,
        filter: filter_opts,
        paths: args.path_options(),
        image: args.image_str(),
        info: args.info,
    };

    let cache = match args.cache {
        Some(_) if interactive => {
            log::warn!("Cache is not used in interactive mode");
            None
        }
        Some(ttl) => {
            let ttl = Duration::from_secs(ttl.unwrap_or(cfg.cache_ttl));
            let mut cache = ResultCache::open(&ResultCache::default_path()?, ttl)?;
            cache.clear_stale()?;
            Some(cache)
        }
        None => None,
    };

    let confirm: Box<dyn Confirm> = if interactive {
        Box::new(TerminalPrompt::stdio())
    } else {
        Box::new(|_: &Path| true)
    };

    let mut session = Session {
        args,
        collect_opts,
        extras: Extras {
            join: args.join.clone(),
            links: playlist::valid_links(&args.link),
            files: playlist::existing_files(&args.file),
        },
        tags: LoftyTags::new(&cfg.audio_exts),
        confirm,
        cache,
    };

    if args.split {
        for (root, path) in split_targets(&playlist_path, &args.directories) {
            if path.is_dir() {
                log::warn!(
                    "{:?} is a directory, skipping split playlist for {:?}",
                    path,
                    root
                );
                continue;
            }
            session.write(std::slice::from_ref(&root), &path)?;
        }
    } else {
        session.write(&args.directories, &playlist_path)?;
    }

    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let cfg = config::load(args.config.clone())?;
    let _logger_handle = init_logger(&args, &cfg)?;

    log::info!("Starting mkpl...");
    log::debug!("CLI Args: {:?}", args);

    if let Err(e) = run(&args, &cfg) {
        if args.debug {
            log::debug!("{:?}", e);
        }
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn parse(extra: &[&str]) -> Result<Cli, clap::Error> {
        let mut argv = vec!["mkpl", "out"];
        argv.extend_from_slice(extra);
        Cli::try_parse_from(argv)
    }

    fn cfg() -> Config {
        Config::default()
    }

    #[test]
    fn sort_options_are_mutually_exclusive() {
        assert!(parse(&["--shuffle", "--orderby-name"]).is_err());
        assert!(parse(&["--orderby-size", "--orderby-year"]).is_err());

        let args = parse(&["--orderby-track", "-D"]).unwrap();
        assert_eq!(args.sort_mode(), Some(SortMode::Track));
        assert!(args.descending);
        assert_eq!(parse(&[]).unwrap().sort_mode(), None);
    }

    #[test]
    fn sizes_accept_human_units() {
        assert_eq!(parse_size("1024"), Ok(1024));
        assert_eq!(parse_size("1 KiB"), Ok(1024));
        assert!(parse_size("lots").is_err());

        let args = parse(&["-S", "2KiB"]).unwrap();
        assert_eq!(args.max_size, Some(2048));
        assert_eq!(args.size, 1);
    }

    #[test]
    fn encoding_values_match_the_marker_names() {
        let unicode = parse(&["-g", "UNICODE"]).unwrap();
        assert_eq!(unicode.encoding, Some(Encoding::Unicode));
        let utf8 = parse(&["-g", "UTF-8"]).unwrap();
        assert_eq!(utf8.encoding, Some(Encoding::Utf8));
        assert!(parse(&["-g", "latin1"]).is_err());
    }

    #[test]
    fn fatal_configuration_is_caught_before_scanning() {
        let dir = tempdir().unwrap();
        let args = parse(&[]).unwrap();

        let as_dir = validate(&args, dir.path(), &args.filter_options(&cfg()));
        assert!(as_dir.is_err());

        let missing_image = parse(&["-I", "/definitely/not/here.png"]).unwrap();
        assert!(
            validate(
                &missing_image,
                &dir.path().join("x.m3u"),
                &missing_image.filter_options(&cfg())
            )
            .is_err()
        );

        let inverted = parse(&["-s", "100", "-S", "100"]).unwrap();
        assert!(
            validate(
                &inverted,
                &dir.path().join("x.m3u"),
                &inverted.filter_options(&cfg())
            )
            .is_err()
        );
    }

    #[test]
    fn split_playlists_are_named_after_directories() {
        let dir = tempdir().unwrap();
        let rock = dir.path().join("Rock");
        fs::create_dir_all(&rock).unwrap();

        let path = split_path(&dir.path().join("all.m3u8"), &rock);
        assert_eq!(path, dir.path().join("Rock.m3u8"));
    }

    #[test]
    fn split_names_sharing_a_directory_name_are_disambiguated() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("x").join("music");
        let second = dir.path().join("y").join("music");
        fs::create_dir_all(&first).unwrap();
        fs::create_dir_all(&second).unwrap();

        let out = dir.path().join("all.m3u");
        let targets = split_targets(&out, &[first.clone(), second.clone()]);
        assert_eq!(
            targets,
            vec![
                (first, dir.path().join("music.m3u")),
                (second, dir.path().join("music-2.m3u")),
            ]
        );
    }

    #[test]
    fn end_to_end_single_directory() {
        let dir = tempdir().unwrap();
        let music = dir.path().join("music");
        fs::create_dir_all(&music).unwrap();
        fs::write(music.join("a.mp3"), vec![0u8; 500]).unwrap();
        fs::write(music.join("b.txt"), vec![0u8; 500]).unwrap();

        let out = dir.path().join("list");
        let args = Cli::try_parse_from([
            "mkpl",
            out.to_str().unwrap(),
            "-d",
            music.to_str().unwrap(),
            "-f",
            "mp3",
            "-s",
            "0",
        ])
        .unwrap();
        run(&args, &cfg()).unwrap();

        let written = fs::read_to_string(dir.path().join("list.m3u")).unwrap();
        assert_eq!(written, format!("{}\n", music.join("a.mp3").display()));
    }

    #[test]
    fn end_to_end_split_with_title() {
        let dir = tempdir().unwrap();
        let jazz = dir.path().join("jazz");
        let rock = dir.path().join("rock");
        fs::create_dir_all(&jazz).unwrap();
        fs::create_dir_all(&rock).unwrap();
        fs::write(jazz.join("j.mp3"), b"jazz").unwrap();
        fs::write(rock.join("r.mp3"), b"rock").unwrap();

        let out = dir.path().join("all.m3u");
        let args = Cli::try_parse_from([
            "mkpl",
            out.to_str().unwrap(),
            "-d",
            jazz.to_str().unwrap(),
            rock.to_str().unwrap(),
            "--split",
            "-t",
            "my mix",
        ])
        .unwrap();
        run(&args, &cfg()).unwrap();

        let jazz_list = fs::read_to_string(dir.path().join("jazz.m3u")).unwrap();
        let track = jazz.join("j.mp3");
        assert_eq!(
            jazz_list,
            format!("#EXTM3U\n#PLAYLIST:My Mix\n{}\n", track.display())
        );
        assert!(dir.path().join("rock.m3u").exists());
        assert!(!out.exists());
    }
}
