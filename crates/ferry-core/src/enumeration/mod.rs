//! Resumable enumeration of storage locations.
//!
//! Every backend yields a lazy [`EntryStream`] in a total order that does not
//! depend on how the backend paginates, and every emitted item carries the
//! token that resumes listing right after it. The set of backends is closed:
//! [`Location`] selects the implementation by backend kind and the only
//! thing they share is [`EnumerateOptions`].

pub mod list;
pub mod local;
pub mod object_store;
pub mod share;

use std::cmp::Ordering;
use std::pin::Pin;

use futures::stream::{self, Stream, StreamExt};
use globset::{Glob, GlobMatcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::entry::TransferEntry;
use crate::errors::ConfigError;
use crate::token::{BackendKind, ContinuationToken};

pub use list::{ListEnumerator, ListedItem};
pub use local::LocalEnumerator;
pub use object_store::{ListPageRequest, ObjectItem, ObjectPage, ObjectStoreClient, ObjectStoreEnumerator};
pub use share::{ShareClient, ShareEnumerator, ShareItem};

/// Lazy sequence of entries produced by one enumeration call.
pub type EntryStream = Pin<Box<dyn Stream<Item = TransferEntry> + Send>>;

/// Options every backend honours.
#[derive(Debug, Clone, Default)]
pub struct EnumerateOptions {
    /// Wildcard (`*`, `?`) pattern for local and share names, a name prefix
    /// for object stores, or the exact item name in non-recursive share mode.
    pub search_pattern: Option<String>,
    pub recursive: bool,
    /// Emit directory entries in addition to files.
    pub include_directories: bool,
    /// Object stores only: include point-in-time snapshots.
    pub include_snapshots: bool,
}

impl EnumerateOptions {
    pub fn recursive() -> Self {
        Self {
            recursive: true,
            ..Self::default()
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.search_pattern = Some(pattern.into());
        self
    }

    pub fn with_directories(mut self, include: bool) -> Self {
        self.include_directories = include;
        self
    }

    pub fn with_snapshots(mut self, include: bool) -> Self {
        self.include_snapshots = include;
        self
    }

    pub(crate) fn pattern(&self) -> Option<&str> {
        self.search_pattern.as_deref().filter(|p| !p.is_empty())
    }

    /// Reject patterns that would escape the enumerated root.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let Some(pattern) = self.pattern() else {
            return Ok(());
        };
        if references_parent(pattern) {
            return Err(ConfigError::InvalidSearchPattern {
                pattern: pattern.to_string(),
                reason: "parent directory references are not allowed".into(),
            });
        }
        Ok(())
    }

    /// A pattern longer than any legal name can never match.
    pub(crate) fn pattern_exceeds(&self, max_name_len: usize) -> bool {
        self.pattern()
            .map(|p| p.chars().count() > max_name_len)
            .unwrap_or(false)
    }
}

/// `..` immediately followed by a separator or the end of the pattern.
fn references_parent(pattern: &str) -> bool {
    let bytes = pattern.as_bytes();
    let mut idx = 0;
    while let Some(found) = pattern[idx..].find("..") {
        let end = idx + found + 2;
        match bytes.get(end) {
            None | Some(b'/') | Some(b'\\') => return true,
            _ => idx = idx + found + 1,
        }
    }
    false
}

/// Compiled wildcard matcher for file names. No pattern matches everything.
#[derive(Debug, Clone)]
pub(crate) struct NameMatcher {
    glob: Option<GlobMatcher>,
    case_insensitive: bool,
}

impl NameMatcher {
    pub(crate) fn new(pattern: Option<&str>, case_insensitive: bool) -> Result<Self, ConfigError> {
        let glob = match pattern {
            None | Some("*") | Some("*.*") => None,
            Some(p) => {
                let glob = Glob::new(&fold_case(p, case_insensitive)).map_err(|err| {
                    ConfigError::InvalidSearchPattern {
                        pattern: p.to_string(),
                        reason: err.to_string(),
                    }
                })?;
                Some(glob.compile_matcher())
            }
        };
        Ok(Self {
            glob,
            case_insensitive,
        })
    }

    pub(crate) fn matches(&self, name: &str) -> bool {
        match &self.glob {
            None => true,
            Some(glob) => glob.is_match(fold_case(name, self.case_insensitive).as_ref()),
        }
    }
}

fn fold_case(value: &str, case_insensitive: bool) -> std::borrow::Cow<'_, str> {
    if case_insensitive {
        std::borrow::Cow::Owned(value.to_lowercase())
    } else {
        std::borrow::Cow::Borrowed(value)
    }
}

/// Compare two names in enumeration order.
pub(crate) fn compare_names(a: &str, b: &str, case_insensitive: bool) -> Ordering {
    if case_insensitive {
        let ord = a.to_lowercase().cmp(&b.to_lowercase());
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.cmp(b)
}

/// Where a candidate path sits relative to a remembered resume path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResumePosition {
    /// Ordered before the resume path and not one of its ancestors: skip it
    /// and everything beneath it.
    Before,
    /// A strict ancestor of the resume path: already emitted, but part of its
    /// subtree is still pending.
    Ancestor,
    /// The resume path itself.
    Equal,
    After,
}

/// Remembered position inside a hierarchical walk, compared segment by
/// segment so `a/b` orders before `a-b` the same way a depth-first walk does.
#[derive(Debug, Clone)]
pub(crate) struct ResumePoint {
    segments: Vec<String>,
    case_insensitive: bool,
}

impl ResumePoint {
    pub(crate) fn new(relative_path: &str, case_insensitive: bool) -> Option<Self> {
        let segments: Vec<String> = split_segments(relative_path)
            .map(str::to_string)
            .collect();
        if segments.is_empty() {
            return None;
        }
        Some(Self {
            segments,
            case_insensitive,
        })
    }

    pub(crate) fn position<S: AsRef<str>>(&self, candidate: &[S]) -> ResumePosition {
        for (seg, remembered) in candidate.iter().zip(self.segments.iter()) {
            match compare_names(seg.as_ref(), remembered, self.case_insensitive) {
                Ordering::Less => return ResumePosition::Before,
                Ordering::Greater => return ResumePosition::After,
                Ordering::Equal => {}
            }
        }
        match candidate.len().cmp(&self.segments.len()) {
            Ordering::Less => ResumePosition::Ancestor,
            Ordering::Equal => ResumePosition::Equal,
            Ordering::Greater => ResumePosition::After,
        }
    }
}

pub(crate) fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(['/', '\\']).filter(|s| !s.is_empty())
}

pub(crate) fn join_relative(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

pub(crate) fn empty_stream() -> EntryStream {
    stream::empty().boxed()
}

/// Adapt a producer channel into an entry stream that stops yielding as soon
/// as `cancel` fires.
pub(crate) fn channel_stream(
    rx: mpsc::Receiver<TransferEntry>,
    cancel: CancellationToken,
) -> EntryStream {
    stream::unfold((rx, cancel), |(mut rx, cancel)| async move {
        if cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            next = rx.recv() => next.map(|entry| (entry, (rx, cancel))),
        }
    })
    .boxed()
}

/// A storage location, selected by backend kind.
pub enum Location {
    Local(LocalEnumerator),
    ObjectStore(ObjectStoreEnumerator),
    Share(ShareEnumerator),
    List(ListEnumerator),
}

impl Location {
    pub fn kind(&self) -> BackendKind {
        match self {
            Location::Local(_) => BackendKind::Local,
            Location::ObjectStore(_) => BackendKind::ObjectStore,
            Location::Share(_) => BackendKind::Share,
            Location::List(_) => BackendKind::List,
        }
    }

    /// Start (or resume, when `token` is given) enumerating this location.
    ///
    /// Configuration problems are reported here, before any listing call is
    /// made. Listing failures show up later as a terminal error entry.
    pub fn enumerate(
        &self,
        options: &EnumerateOptions,
        token: Option<&ContinuationToken>,
        cancel: CancellationToken,
    ) -> Result<EntryStream, ConfigError> {
        options.validate()?;
        let mismatch = |token: &ContinuationToken| ConfigError::TokenKindMismatch {
            expected: self.kind().as_str(),
            found: token.kind().as_str(),
        };

        match (self, token) {
            (Location::Local(local), None) => local.enumerate(options, None, cancel),
            (Location::Local(local), Some(ContinuationToken::Local { relative_path })) => {
                local.enumerate(options, Some(relative_path.as_str()), cancel)
            }
            (Location::ObjectStore(store), None) => store.enumerate(options, None, cancel),
            (
                Location::ObjectStore(store),
                Some(ContinuationToken::ObjectStore {
                    page_marker,
                    last_name,
                    snapshot,
                }),
            ) => store.enumerate(
                options,
                Some(object_store::ResumeMarker {
                    page_marker: page_marker.clone(),
                    last_name: last_name.clone(),
                    snapshot: *snapshot,
                }),
                cancel,
            ),
            (Location::Share(share), None) => share.enumerate(options, None, cancel),
            (Location::Share(share), Some(ContinuationToken::Share { relative_path })) => {
                share.enumerate(options, Some(relative_path.as_str()), cancel)
            }
            (Location::List(list), None) => Ok(list.enumerate(0, cancel)),
            (Location::List(list), Some(ContinuationToken::List { index })) => {
                Ok(list.enumerate(*index, cancel))
            }
            (_, Some(other)) => Err(mismatch(other)),
        }
    }
}
