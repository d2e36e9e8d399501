use std::fs;
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::{
    channel_stream, compare_names, empty_stream, EntryStream, EnumerateOptions, NameMatcher,
    ResumePoint, ResumePosition,
};
use crate::entry::{EntrySource, ItemEntry, TransferEntry};
use crate::errors::{ConfigError, ListingError};
use crate::token::ContinuationToken;

/// Longest file name the local filesystem accepts.
pub const MAX_NAME_LEN: usize = 255;

/// Entries buffered between the blocking walk and the consumer.
const CHANNEL_DEPTH: usize = 256;

/// Local paths compare the way the platform resolves them.
const CASE_INSENSITIVE: bool = cfg!(windows);

/// Walks a local directory tree in sorted depth-first order.
///
/// Symlinks are neither followed nor reported. Folders the process cannot
/// read are skipped; only a failure on the root itself is reported.
#[derive(Debug, Clone)]
pub struct LocalEnumerator {
    root: PathBuf,
}

impl LocalEnumerator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start the walk on the blocking pool. Must be called from within a
    /// tokio runtime.
    pub fn enumerate(
        &self,
        options: &EnumerateOptions,
        resume: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<EntryStream, ConfigError> {
        options.validate()?;
        if options.pattern_exceeds(MAX_NAME_LEN) {
            return Ok(empty_stream());
        }
        let walk = LocalWalk {
            root: self.root.clone(),
            recursive: options.recursive,
            include_directories: options.include_directories,
            matcher: NameMatcher::new(options.pattern(), CASE_INSENSITIVE)?,
            resume: resume.and_then(|path| ResumePoint::new(path, CASE_INSENSITIVE)),
        };

        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let producer_cancel = cancel.clone();
        tokio::task::spawn_blocking(move || walk.run(&tx, &producer_cancel));
        Ok(channel_stream(rx, cancel))
    }
}

struct LocalWalk {
    root: PathBuf,
    recursive: bool,
    include_directories: bool,
    matcher: NameMatcher,
    resume: Option<ResumePoint>,
}

impl LocalWalk {
    fn run(mut self, tx: &mpsc::Sender<TransferEntry>, cancel: &CancellationToken) {
        let root_display = self.root.display().to_string();
        match fs::metadata(&self.root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                let err = ListingError::fatal("not a directory", Some(root_display));
                let _ = tx.blocking_send(TransferEntry::Error(err));
                return;
            }
            Err(err) => {
                let err = ListingError::from_io(&err, Some(root_display));
                let _ = tx.blocking_send(TransferEntry::Error(err));
                return;
            }
        }

        let mut walker = WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(if self.recursive { usize::MAX } else { 1 })
            .follow_links(false)
            .sort_by(|a, b| {
                compare_names(
                    &a.file_name().to_string_lossy(),
                    &b.file_name().to_string_lossy(),
                    CASE_INSENSITIVE,
                )
            })
            .into_iter();

        while let Some(next) = walker.next() {
            if cancel.is_cancelled() {
                return;
            }
            let entry = match next {
                Ok(entry) => entry,
                Err(err) => {
                    if err.depth() == 0 {
                        let io = err
                            .io_error()
                            .map(|io| ListingError::from_io(io, Some(root_display.clone())))
                            .unwrap_or_else(|| {
                                ListingError::fatal(err.to_string(), Some(root_display.clone()))
                            });
                        let _ = tx.blocking_send(TransferEntry::Error(io));
                        return;
                    }
                    log::debug!("skipping inaccessible path: {err}");
                    continue;
                }
            };

            let file_type = entry.file_type();
            if file_type.is_symlink() {
                continue;
            }
            let is_dir = file_type.is_dir();

            let segments: Vec<String> = match entry.path().strip_prefix(&self.root) {
                Ok(rel) => rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect(),
                Err(_) => continue,
            };

            if let Some(resume) = &self.resume {
                match resume.position(&segments) {
                    ResumePosition::Before => {
                        if is_dir {
                            walker.skip_current_dir();
                        }
                        continue;
                    }
                    ResumePosition::Ancestor | ResumePosition::Equal => continue,
                    // The walk is sorted, so nothing later can precede the resume point.
                    ResumePosition::After => self.resume = None,
                }
            }

            if is_dir {
                if !self.include_directories {
                    continue;
                }
            } else if !self.matcher.matches(&entry.file_name().to_string_lossy()) {
                continue;
            }

            let size = if is_dir {
                0
            } else {
                match entry.metadata() {
                    Ok(metadata) => metadata.len(),
                    Err(err) => {
                        log::debug!(
                            "reading size of {}: {err}; reporting 0",
                            entry.path().display()
                        );
                        0
                    }
                }
            };
            let relative_path = segments.join("/");
            let item = ItemEntry {
                continuation_token: ContinuationToken::Local {
                    relative_path: relative_path.clone(),
                },
                relative_path,
                is_directory: is_dir,
                source: EntrySource::Local {
                    absolute_path: entry.path().to_path_buf(),
                    size,
                },
            };
            if tx.blocking_send(TransferEntry::Item(item)).is_err() {
                // Consumer went away.
                return;
            }
        }
    }
}
