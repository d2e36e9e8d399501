//! Enumeration of a hierarchical network share.
//!
//! Recursive listing keeps an explicit stack of open directories instead of
//! recursing, so depth is bounded only by memory. Each directory is listed
//! once, sorted by name, and walked depth-first, which gives the same total
//! order as the local walk. Directory listings return names only; sizes come
//! from attribute lookups issued through a [`BoundedTaskQueue`] so several
//! are in flight while entries still come out in listing order.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use super::{
    compare_names, empty_stream, join_relative, split_segments, EntryStream, EnumerateOptions,
    NameMatcher, ResumePoint, ResumePosition,
};
use crate::config::TransferLimits;
use crate::entry::{EntrySource, ItemEntry, TransferEntry};
use crate::errors::{ConfigError, ListingError};
use crate::task_queue::BoundedTaskQueue;
use crate::token::ContinuationToken;

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_PATH_LEN: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareItem {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

impl ShareItem {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            is_directory: false,
            size,
            last_modified: None,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_directory: true,
            size: 0,
            last_modified: None,
        }
    }
}

/// Calls the enumerator needs from a share. Paths are `/`-separated and
/// relative to the share root; `""` is the root itself.
#[async_trait]
pub trait ShareClient: Send + Sync {
    /// Immediate children of `path`. Sizes need not be filled in.
    async fn list_directory(&self, path: &str) -> eyre::Result<Vec<ShareItem>>;

    /// Attributes of the item at `path`, or `None` if it does not exist.
    async fn get_attributes(&self, path: &str) -> eyre::Result<Option<ShareItem>>;
}

#[derive(Clone)]
pub struct ShareEnumerator {
    client: Arc<dyn ShareClient>,
    directory: String,
    attribute_parallelism: usize,
}

impl ShareEnumerator {
    pub fn new(client: Arc<dyn ShareClient>, directory: &str) -> Self {
        Self {
            client,
            directory: split_segments(directory).collect::<Vec<_>>().join("/"),
            attribute_parallelism: num_cpus::get().max(1),
        }
    }

    pub fn with_limits(mut self, limits: &TransferLimits) -> Self {
        self.attribute_parallelism = limits.attribute_parallelism.max(1);
        self
    }

    pub fn directory(&self) -> &str {
        &self.directory
    }

    fn check_limits(&self) -> Result<(), ConfigError> {
        if self.directory.chars().count() > MAX_PATH_LEN {
            return Err(ConfigError::PathTooLong {
                path: self.directory.clone(),
                max: MAX_PATH_LEN,
            });
        }
        if let Some(segment) = split_segments(&self.directory).find(|s| s.chars().count() > MAX_NAME_LEN) {
            return Err(ConfigError::NameTooLong {
                name: segment.to_string(),
                max: MAX_NAME_LEN,
            });
        }
        Ok(())
    }

    pub fn enumerate(
        &self,
        options: &EnumerateOptions,
        resume: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<EntryStream, ConfigError> {
        options.validate()?;
        self.check_limits()?;
        if options.pattern_exceeds(MAX_NAME_LEN) {
            return Ok(empty_stream());
        }

        if let Some(name) = options.pattern().filter(|p| !options.recursive && !has_wildcards(p)) {
            if join_relative(&self.directory, name).chars().count() > MAX_PATH_LEN {
                return Ok(empty_stream());
            }
            return Ok(self.lookup_single(name.to_string(), options.include_directories, resume, cancel));
        }

        let walk = ShareWalk {
            client: Arc::clone(&self.client),
            directory: self.directory.clone(),
            recursive: options.recursive,
            include_directories: options.include_directories,
            matcher: NameMatcher::new(options.pattern(), false)?,
            resume: resume.and_then(|path| ResumePoint::new(path, false)),
            parallelism: self.attribute_parallelism,
            stack: Vec::new(),
            descend: Some(String::new()),
            terminated: false,
            cancel,
        };
        Ok(stream::unfold(walk, ShareWalk::next_entry).boxed())
    }

    /// Non-recursive mode with an exact name resolves that one item.
    fn lookup_single(
        &self,
        name: String,
        include_directories: bool,
        resume: Option<&str>,
        cancel: CancellationToken,
    ) -> EntryStream {
        if resume.is_some_and(|r| compare_names(r, &name, false).is_ge()) {
            return empty_stream();
        }
        let client = Arc::clone(&self.client);
        let full_path = join_relative(&self.directory, &name);
        stream::once(async move {
            let found = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                found = client.get_attributes(&full_path) => found,
            };
            match found {
                Ok(Some(item)) if !item.is_directory || include_directories => {
                    Some(TransferEntry::Item(ItemEntry {
                        continuation_token: ContinuationToken::Share {
                            relative_path: name.clone(),
                        },
                        relative_path: name,
                        is_directory: item.is_directory,
                        source: EntrySource::Share(item),
                    }))
                }
                Ok(_) => None,
                Err(err) => Some(TransferEntry::Error(ListingError::from_report(&err, Some(full_path)))),
            }
        })
        .filter_map(|entry| async move { entry })
        .boxed()
    }
}

fn has_wildcards(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

enum Pending {
    Directory { name: String, emit: bool, descend: bool },
    File { name: String },
}

type AttributeResult = eyre::Result<Option<ShareItem>>;

/// One open directory on the walk stack.
struct Frame {
    relative: String,
    pending: VecDeque<Pending>,
    /// Files whose attribute lookup has not been queued yet, in listing order.
    unqueued: VecDeque<String>,
    attributes: BoundedTaskQueue<AttributeResult>,
}

struct ShareWalk {
    client: Arc<dyn ShareClient>,
    directory: String,
    recursive: bool,
    include_directories: bool,
    matcher: NameMatcher,
    resume: Option<ResumePoint>,
    parallelism: usize,
    stack: Vec<Frame>,
    /// Directory to open before anything else is yielded.
    descend: Option<String>,
    terminated: bool,
    cancel: CancellationToken,
}

enum Step {
    Yield(TransferEntry),
    Continue,
    Stop,
}

impl ShareWalk {
    async fn next_entry(mut self) -> Option<(TransferEntry, Self)> {
        loop {
            if self.terminated || self.cancel.is_cancelled() {
                return None;
            }
            match self.step().await {
                Step::Yield(entry) => {
                    if entry.is_error() {
                        self.terminated = true;
                    }
                    return Some((entry, self));
                }
                Step::Continue => {}
                Step::Stop => return None,
            }
        }
    }

    async fn step(&mut self) -> Step {
        if let Some(relative) = self.descend.take() {
            return match self.open_frame(relative).await {
                Ok(Some(frame)) => {
                    self.stack.push(frame);
                    Step::Continue
                }
                Ok(None) => Step::Stop,
                Err(err) => Step::Yield(TransferEntry::Error(err)),
            };
        }

        let Some(frame) = self.stack.last_mut() else {
            return Step::Stop;
        };
        let Some(next) = frame.pending.pop_front() else {
            self.stack.pop();
            return Step::Continue;
        };

        match next {
            Pending::Directory { name, emit, descend } => {
                let relative = join_relative(&frame.relative, &name);
                if descend {
                    self.descend = Some(relative.clone());
                }
                if !emit {
                    return Step::Continue;
                }
                let full_path = join_relative(&self.directory, &relative);
                Step::Yield(TransferEntry::Item(ItemEntry {
                    continuation_token: ContinuationToken::Share {
                        relative_path: relative.clone(),
                    },
                    relative_path: relative,
                    is_directory: true,
                    source: EntrySource::Share(ShareItem::directory(full_path)),
                }))
            }
            Pending::File { name } => {
                let relative = join_relative(&frame.relative, &name);
                let full_path = join_relative(&self.directory, &relative);
                if let Err(err) = self.top_up_lookups().await {
                    return Step::Yield(TransferEntry::Error(err));
                }
                let Some(frame) = self.stack.last_mut() else {
                    return Step::Stop;
                };
                let result = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Step::Stop,
                    result = frame.attributes.dequeue_result() => result,
                };
                match result {
                    Ok(Some(Ok(Some(item)))) => Step::Yield(TransferEntry::Item(ItemEntry {
                        continuation_token: ContinuationToken::Share {
                            relative_path: relative.clone(),
                        },
                        relative_path: relative,
                        is_directory: false,
                        source: EntrySource::Share(item),
                    })),
                    // Removed between listing and lookup.
                    Ok(Some(Ok(None))) | Ok(None) => Step::Continue,
                    Ok(Some(Err(err))) | Err(err) => Step::Yield(TransferEntry::Error(
                        ListingError::from_report(&err, Some(full_path)),
                    )),
                }
            }
        }
    }

    /// Keep the top frame's lookup queue full.
    async fn top_up_lookups(&mut self) -> Result<(), ListingError> {
        let Some(frame) = self.stack.last_mut() else {
            return Ok(());
        };
        while !frame.attributes.is_full() {
            let Some(name) = frame.unqueued.pop_front() else {
                break;
            };
            let client = Arc::clone(&self.client);
            let path = join_relative(&self.directory, &join_relative(&frame.relative, &name));
            frame
                .attributes
                .enqueue(async move { client.get_attributes(&path).await })
                .await
                .map_err(|err| ListingError::from_report(&err, None))?;
        }
        Ok(())
    }

    /// List `relative` and decide what from it still needs to be visited.
    /// `Ok(None)` means the walk was cancelled.
    async fn open_frame(&self, relative: String) -> Result<Option<Frame>, ListingError> {
        let full_path = join_relative(&self.directory, &relative);
        let listed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(None),
            listed = self.client.list_directory(&full_path) => listed,
        };
        let mut items =
            listed.map_err(|err| ListingError::from_report(&err, Some(full_path.clone())))?;
        items.sort_by(|a, b| compare_names(&a.name, &b.name, false));
        log::trace!("listed {} items under '{}'", items.len(), full_path);

        let parent: Vec<&str> = split_segments(&relative).collect();
        let mut pending = VecDeque::with_capacity(items.len());
        let mut unqueued = VecDeque::new();
        for item in items {
            let mut segments = parent.clone();
            segments.push(&item.name);
            let position = self
                .resume
                .as_ref()
                .map(|r| r.position(&segments))
                .unwrap_or(ResumePosition::After);

            if item.is_directory {
                let (emit, descend) = match position {
                    ResumePosition::Before => continue,
                    ResumePosition::Ancestor | ResumePosition::Equal => (false, self.recursive),
                    ResumePosition::After => (self.include_directories, self.recursive),
                };
                if emit || descend {
                    pending.push_back(Pending::Directory {
                        name: item.name,
                        emit,
                        descend,
                    });
                }
            } else if position == ResumePosition::After && self.matcher.matches(&item.name) {
                unqueued.push_back(item.name.clone());
                pending.push_back(Pending::File { name: item.name });
            }
        }

        let attributes = BoundedTaskQueue::new(self.parallelism)
            .map_err(|err| ListingError::fatal(err.to_string(), None))?;
        Ok(Some(Frame {
            relative,
            pending,
            unqueued,
            attributes,
        }))
    }
}
