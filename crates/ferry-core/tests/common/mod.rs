//! In-memory backends shared by the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use eyre::{eyre, Result};
use futures::StreamExt;
use parking_lot::Mutex;

use ferry_core::enumeration::{
    ListPageRequest, ObjectItem, ObjectPage, ObjectStoreClient, ShareClient, ShareItem,
};
use ferry_core::{ContinuationToken, EntryStream, TransferEntry};

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

pub async fn collect(stream: EntryStream) -> Vec<TransferEntry> {
    stream.collect().await
}

pub fn paths(entries: &[TransferEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|e| e.relative_path().unwrap_or("<error>").to_string())
        .collect()
}

pub fn tokens(entries: &[TransferEntry]) -> Vec<ContinuationToken> {
    entries
        .iter()
        .filter_map(|e| e.continuation_token().cloned())
        .collect()
}

/// Object store whose cursor is the canonical index of the first object on
/// the next page, so cursors stay valid whatever page size a run uses.
pub struct MockObjectStore {
    objects: Vec<ObjectItem>,
    /// Page size the store actually uses, ignoring the requested one.
    forced_page_size: Mutex<Option<usize>>,
    /// Calls numbered from this one on fail.
    fail_from_call: Mutex<Option<usize>>,
    /// Number of upcoming calls that fail before the store recovers.
    transient_failures: AtomicUsize,
    calls: AtomicUsize,
}

impl MockObjectStore {
    pub fn new(mut objects: Vec<ObjectItem>) -> Self {
        objects.sort_by(|a, b| {
            ferry_core::enumeration::object_store::compare_objects(
                &a.name,
                a.snapshot.as_ref(),
                &b.name,
                b.snapshot.as_ref(),
            )
        });
        Self {
            objects,
            forced_page_size: Mutex::new(None),
            fail_from_call: Mutex::new(None),
            transient_failures: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn force_page_size(&self, size: usize) {
        *self.forced_page_size.lock() = Some(size);
    }

    pub fn fail_from_call(&self, call: usize) {
        *self.fail_from_call.lock() = Some(call);
    }

    pub fn fail_next(&self, count: usize) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStoreClient for MockObjectStore {
    async fn list_page(&self, request: &ListPageRequest) -> Result<ObjectPage> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_from_call.lock().is_some_and(|from| call >= from) {
            return Err(eyre!("service unavailable"));
        }
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(eyre!("connection reset by peer"));
        }

        let visible: Vec<&ObjectItem> = self
            .objects
            .iter()
            .filter(|o| o.name.starts_with(&request.prefix))
            .filter(|o| request.include_snapshots || o.snapshot.is_none())
            .collect();
        let start = match &request.page_token {
            Some(cursor) => cursor.parse::<usize>()?,
            None => 0,
        };
        let page_size = self.forced_page_size.lock().unwrap_or(request.page_size);
        let end = (start + page_size).min(visible.len());

        // Hand the page back unsorted; ordering is the enumerator's job.
        let mut items: Vec<ObjectItem> = visible[start.min(end)..end]
            .iter()
            .map(|o| (*o).clone())
            .collect();
        items.reverse();
        Ok(ObjectPage {
            items,
            next_page_token: (end < visible.len()).then(|| end.to_string()),
        })
    }

    async fn get_attributes(&self, name: &str) -> Result<Option<ObjectItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .objects
            .iter()
            .find(|o| o.name == name && o.snapshot.is_none())
            .cloned())
    }
}

/// Share backed by a flat list of `(path, is_directory, size)` entries.
pub struct MockShare {
    entries: Vec<(String, bool, u64)>,
    failing_directory: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl MockShare {
    pub fn new(entries: &[(&str, bool, u64)]) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|(p, d, s)| (p.to_string(), *d, *s))
                .collect(),
            failing_directory: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_listing(&self, path: &str) {
        *self.failing_directory.lock() = Some(path.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn item(&self, path: &str, is_directory: bool, size: u64) -> ShareItem {
        let name = path.rsplit('/').next().unwrap_or(path);
        if is_directory {
            ShareItem::directory(name)
        } else {
            ShareItem::file(name, size)
        }
    }
}

#[async_trait]
impl ShareClient for MockShare {
    async fn list_directory(&self, path: &str) -> Result<Vec<ShareItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_directory.lock().as_deref() == Some(path) {
            return Err(eyre!("access denied listing '{path}'"));
        }
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };
        // Listings report names only, newest entries first.
        let mut children: Vec<ShareItem> = self
            .entries
            .iter()
            .filter_map(|(p, is_dir, _)| {
                let rest = p.strip_prefix(&prefix)?;
                (!rest.is_empty() && !rest.contains('/')).then(|| self.item(p, *is_dir, 0))
            })
            .collect();
        children.reverse();
        Ok(children)
    }

    async fn get_attributes(&self, path: &str) -> Result<Option<ShareItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .entries
            .iter()
            .find(|(p, _, _)| p == path)
            .map(|(p, is_dir, size)| self.item(p, *is_dir, *size)))
    }
}

pub fn share(entries: &[(&str, bool, u64)]) -> Arc<MockShare> {
    Arc::new(MockShare::new(entries))
}
