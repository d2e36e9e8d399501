//! Enumeration of a flat-namespace object store "directory" (a name prefix).
//!
//! Listing is paginated by the backend. Each emitted token remembers the
//! cursor that fetched its page together with the exact object (name and
//! snapshot time), so a resumed listing re-requests that page and skips
//! everything at or before the remembered object. Page sizes may differ
//! between runs without changing the resulting sequence.

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use super::{empty_stream, EntryStream, EnumerateOptions};
use crate::config::{
    TransferLimits, DEFAULT_LIST_PAGE_SIZE, DEFAULT_LIST_RETRY_ATTEMPTS,
    DEFAULT_LIST_RETRY_DELAY_MS, MAX_LIST_PAGE_SIZE,
};
use crate::entry::{EntrySource, ItemEntry, TransferEntry};
use crate::errors::{ConfigError, ListingError};
use crate::token::ContinuationToken;

/// Longest object name the store accepts.
pub const MAX_NAME_LEN: usize = 1024;

/// Metadata key marking a zero-byte object as a folder placeholder.
pub const DIRECTORY_MARKER_KEY: &str = "hdi_isfolder";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectItem {
    /// Full object name, including the directory prefix.
    pub name: String,
    pub size: u64,
    /// Point-in-time snapshot; `None` for the live object.
    pub snapshot: Option<DateTime<Utc>>,
    pub last_modified: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
}

impl ObjectItem {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            snapshot: None,
            last_modified: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_snapshot(mut self, snapshot: DateTime<Utc>) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// A folder placeholder as written by hierarchical tooling.
    pub fn directory_marker(name: impl Into<String>) -> Self {
        let mut item = Self::new(name, 0);
        item.metadata
            .insert(DIRECTORY_MARKER_KEY.to_string(), "true".to_string());
        item
    }

    pub fn is_directory_marker(&self) -> bool {
        self.metadata
            .iter()
            .any(|(k, v)| k.eq_ignore_ascii_case(DIRECTORY_MARKER_KEY) && v.eq_ignore_ascii_case("true"))
    }
}

/// Canonical object order: by name, then snapshots oldest first, then the
/// live object.
pub fn compare_objects(
    a_name: &str,
    a_snapshot: Option<&DateTime<Utc>>,
    b_name: &str,
    b_snapshot: Option<&DateTime<Utc>>,
) -> Ordering {
    a_name.cmp(b_name).then_with(|| match (a_snapshot, b_snapshot) {
        (None, None) => Ordering::Equal,
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (Some(a), Some(b)) => a.cmp(b),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListPageRequest {
    pub prefix: String,
    /// Backend cursor; `None` starts from the beginning of the prefix.
    pub page_token: Option<String>,
    pub page_size: usize,
    pub include_snapshots: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub items: Vec<ObjectItem>,
    pub next_page_token: Option<String>,
}

/// Calls the enumerator needs from an object store.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    async fn list_page(&self, request: &ListPageRequest) -> eyre::Result<ObjectPage>;

    /// Attributes of the live object called `name`, or `None` if absent.
    async fn get_attributes(&self, name: &str) -> eyre::Result<Option<ObjectItem>>;
}

/// Decoded object-store resume position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeMarker {
    pub page_marker: Option<String>,
    pub last_name: String,
    pub snapshot: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct ObjectStoreEnumerator {
    client: Arc<dyn ObjectStoreClient>,
    directory: String,
    page_size: usize,
    retry_attempts: u8,
    retry_delay: Duration,
}

impl ObjectStoreEnumerator {
    /// `directory` is a name prefix; a trailing `/` is added when missing.
    pub fn new(client: Arc<dyn ObjectStoreClient>, directory: &str) -> Self {
        let trimmed = directory.trim_matches('/');
        let directory = if trimmed.is_empty() {
            String::new()
        } else {
            format!("{trimmed}/")
        };
        Self {
            client,
            directory,
            page_size: DEFAULT_LIST_PAGE_SIZE,
            retry_attempts: DEFAULT_LIST_RETRY_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_LIST_RETRY_DELAY_MS),
        }
    }

    pub fn with_limits(mut self, limits: &TransferLimits) -> Self {
        self.page_size = limits.effective_page_size();
        self.retry_attempts = limits.list_retry_attempts;
        self.retry_delay = limits.list_retry_delay();
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, MAX_LIST_PAGE_SIZE);
        self
    }

    pub fn with_retry(mut self, attempts: u8, delay: Duration) -> Self {
        self.retry_attempts = attempts.max(1);
        self.retry_delay = delay;
        self
    }

    pub fn directory(&self) -> &str {
        &self.directory
    }

    pub fn enumerate(
        &self,
        options: &EnumerateOptions,
        resume: Option<ResumeMarker>,
        cancel: CancellationToken,
    ) -> Result<EntryStream, ConfigError> {
        options.validate()?;
        let pattern = options.pattern().unwrap_or_default();
        if self.directory.len() + pattern.len() > MAX_NAME_LEN {
            return Ok(empty_stream());
        }

        let retry = RetryPolicy {
            attempts: self.retry_attempts.max(1),
            delay: self.retry_delay,
        };

        if !options.recursive && !pattern.is_empty() {
            return Ok(self.lookup_single(format!("{}{}", self.directory, pattern), resume, retry, cancel));
        }

        let state = ListState {
            client: Arc::clone(&self.client),
            directory: self.directory.clone(),
            recursive: options.recursive,
            include_snapshots: options.include_snapshots,
            request: ListPageRequest {
                prefix: format!("{}{}", self.directory, pattern),
                page_token: resume.as_ref().and_then(|r| r.page_marker.clone()),
                page_size: self.page_size,
                include_snapshots: options.include_snapshots,
            },
            retry,
            pending: VecDeque::new(),
            page_marker: None,
            resume: resume.map(|r| (r.last_name, r.snapshot)),
            exhausted: false,
            terminated: false,
            cancel,
        };
        Ok(stream::unfold(state, ListState::next_entry).boxed())
    }

    /// Non-recursive query for one exact name. Folder placeholders read as
    /// absent.
    fn lookup_single(
        &self,
        name: String,
        resume: Option<ResumeMarker>,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> EntryStream {
        let client = Arc::clone(&self.client);
        let directory = self.directory.clone();
        stream::once(async move {
            if resume.is_some_and(|r| r.last_name == name && r.snapshot.is_none()) {
                return None;
            }
            let outcome =
                with_retry(&retry, &cancel, &name, || client.get_attributes(&name)).await;
            match outcome {
                Attempt::Done(Some(item)) if !item.is_directory_marker() => {
                    let relative_path = item
                        .name
                        .strip_prefix(&directory)
                        .unwrap_or(&item.name)
                        .to_string();
                    Some(TransferEntry::Item(ItemEntry {
                        relative_path,
                        continuation_token: ContinuationToken::ObjectStore {
                            page_marker: None,
                            last_name: item.name.clone(),
                            snapshot: None,
                        },
                        is_directory: false,
                        source: EntrySource::Object(item),
                    }))
                }
                Attempt::Done(_) | Attempt::Cancelled => None,
                Attempt::Failed(err) => Some(TransferEntry::Error(err)),
            }
        })
        .filter_map(|entry| async move { entry })
        .boxed()
    }
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    attempts: u8,
    delay: Duration,
}

enum Attempt<T> {
    Done(T),
    Failed(ListingError),
    Cancelled,
}

/// Run `op` until it succeeds, fails permanently, or the attempt budget is
/// spent. Waits between attempts end early on cancellation.
async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    path: &str,
    mut op: F,
) -> Attempt<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = eyre::Result<T>>,
{
    let mut attempt = 0u8;
    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Attempt::Cancelled,
            result = op() => result,
        };
        let err = match result {
            Ok(value) => return Attempt::Done(value),
            Err(err) => err,
        };

        attempt = attempt.saturating_add(1);
        let failure =
            ListingError::from_report(&err, Some(path.to_string())).after_attempts(attempt);
        if !failure.should_retry(policy.attempts) {
            return Attempt::Failed(failure.exhausted());
        }
        log::warn!(
            "listing {} failed (attempt {}/{}): {:#}; retrying in {:?}",
            path,
            attempt,
            policy.attempts,
            err,
            policy.delay
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Attempt::Cancelled,
            _ = tokio::time::sleep(policy.delay) => {}
        }
    }
}

struct ListState {
    client: Arc<dyn ObjectStoreClient>,
    directory: String,
    recursive: bool,
    include_snapshots: bool,
    /// Request for the next page; its token is the cursor of that page.
    request: ListPageRequest,
    retry: RetryPolicy,
    pending: VecDeque<ObjectItem>,
    /// Cursor that fetched the items in `pending`.
    page_marker: Option<String>,
    resume: Option<(String, Option<DateTime<Utc>>)>,
    exhausted: bool,
    terminated: bool,
    cancel: CancellationToken,
}

impl ListState {
    async fn next_entry(mut self) -> Option<(TransferEntry, Self)> {
        loop {
            if self.terminated || self.cancel.is_cancelled() {
                return None;
            }
            if let Some(item) = self.pending.pop_front() {
                if let Some(entry) = self.accept(item) {
                    return Some((entry, self));
                }
                continue;
            }
            if self.exhausted {
                return None;
            }

            let prefix = self.request.prefix.clone();
            let outcome = {
                let client = &self.client;
                let request = &self.request;
                with_retry(&self.retry, &self.cancel, &prefix, || client.list_page(request)).await
            };
            match outcome {
                Attempt::Done(page) => {
                    log::trace!(
                        "listed {} objects under '{}' (cursor {:?})",
                        page.items.len(),
                        prefix,
                        self.request.page_token
                    );
                    let mut items = page.items;
                    items.sort_by(|a, b| {
                        compare_objects(&a.name, a.snapshot.as_ref(), &b.name, b.snapshot.as_ref())
                    });
                    self.pending = items.into();
                    self.page_marker = self.request.page_token.take();
                    self.exhausted = page.next_page_token.is_none();
                    self.request.page_token = page.next_page_token;
                }
                Attempt::Failed(err) => {
                    self.terminated = true;
                    return Some((TransferEntry::Error(err), self));
                }
                Attempt::Cancelled => return None,
            }
        }
    }

    fn accept(&mut self, item: ObjectItem) -> Option<TransferEntry> {
        if item.is_directory_marker() {
            return None;
        }
        if item.snapshot.is_some() && !self.include_snapshots {
            return None;
        }
        if let Some((name, snapshot)) = &self.resume {
            let order = compare_objects(&item.name, item.snapshot.as_ref(), name, snapshot.as_ref());
            if order != Ordering::Greater {
                return None;
            }
            self.resume = None;
        }

        let relative_path = item.name.strip_prefix(&self.directory)?.to_string();
        if relative_path.is_empty() || (!self.recursive && relative_path.contains('/')) {
            return None;
        }

        Some(TransferEntry::Item(ItemEntry {
            relative_path,
            continuation_token: ContinuationToken::ObjectStore {
                page_marker: self.page_marker.clone(),
                last_name: item.name.clone(),
                snapshot: item.snapshot,
            },
            is_directory: false,
            source: EntrySource::Object(item),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn snapshots_order_before_live_object() {
        let live = ObjectItem::new("a", 1);
        let old = ObjectItem::new("a", 1).with_snapshot(at(10));
        let newer = ObjectItem::new("a", 1).with_snapshot(at(20));
        let next = ObjectItem::new("b", 1).with_snapshot(at(5));

        let mut items = vec![live.clone(), newer.clone(), next.clone(), old.clone()];
        items.sort_by(|a, b| compare_objects(&a.name, a.snapshot.as_ref(), &b.name, b.snapshot.as_ref()));
        assert_eq!(items, vec![old, newer, live, next]);
    }

    #[test]
    fn directory_marker_detection_ignores_case() {
        let mut item = ObjectItem::new("dir", 0);
        item.metadata.insert("HDI_ISFOLDER".into(), "True".into());
        assert!(item.is_directory_marker());
        assert!(!ObjectItem::new("file", 3).is_directory_marker());
    }

    #[test]
    fn directory_prefix_is_normalized() {
        struct Nothing;
        #[async_trait]
        impl ObjectStoreClient for Nothing {
            async fn list_page(&self, _: &ListPageRequest) -> eyre::Result<ObjectPage> {
                Ok(ObjectPage::default())
            }
            async fn get_attributes(&self, _: &str) -> eyre::Result<Option<ObjectItem>> {
                Ok(None)
            }
        }
        let client: Arc<dyn ObjectStoreClient> = Arc::new(Nothing);
        assert_eq!(ObjectStoreEnumerator::new(Arc::clone(&client), "/photos").directory(), "photos/");
        assert_eq!(ObjectStoreEnumerator::new(client, "").directory(), "");
    }
}
