use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use super::EntryStream;
use crate::entry::{EntrySource, ItemEntry, TransferEntry};
use crate::token::ContinuationToken;

/// An item supplied up front instead of being discovered.
#[derive(Debug, Clone)]
pub struct ListedItem {
    pub relative_path: String,
    pub is_directory: bool,
    pub source: EntrySource,
}

impl ListedItem {
    pub fn file(relative_path: impl Into<String>, source: EntrySource) -> Self {
        Self {
            relative_path: relative_path.into(),
            is_directory: false,
            source,
        }
    }
}

/// Enumerates a pre-built, ordered item list. Resumes by skipping the number
/// of items a previous run already consumed; search pattern and recursion
/// do not apply since the caller chose the items.
#[derive(Debug, Clone)]
pub struct ListEnumerator {
    items: Arc<Vec<ListedItem>>,
}

impl ListEnumerator {
    pub fn new(items: Vec<ListedItem>) -> Self {
        Self {
            items: Arc::new(items),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn enumerate(&self, skip: u64, cancel: CancellationToken) -> EntryStream {
        let items = Arc::clone(&self.items);
        let start = usize::try_from(skip).unwrap_or(usize::MAX);
        stream::unfold(start, move |idx| {
            let items = Arc::clone(&items);
            let cancel = cancel.clone();
            async move {
                if cancel.is_cancelled() {
                    return None;
                }
                let item = items.get(idx)?;
                let next = idx + 1;
                let entry = TransferEntry::Item(ItemEntry {
                    relative_path: item.relative_path.clone(),
                    continuation_token: ContinuationToken::List { index: next as u64 },
                    is_directory: item.is_directory,
                    source: item.source.clone(),
                });
                Some((entry, next))
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(count: usize) -> ListEnumerator {
        ListEnumerator::new(
            (0..count)
                .map(|i| ListedItem::file(format!("item-{i}"), EntrySource::Memory { len: i as u64 }))
                .collect(),
        )
    }

    #[tokio::test]
    async fn resumes_after_consumed_count() {
        let list = sample(5);
        let all: Vec<_> = list.enumerate(0, CancellationToken::new()).collect().await;
        assert_eq!(all.len(), 5);

        let token = all[1].continuation_token().cloned().unwrap();
        let ContinuationToken::List { index } = token else {
            panic!("unexpected token kind");
        };
        let rest: Vec<_> = list
            .enumerate(index, CancellationToken::new())
            .filter_map(|e| async move { e.relative_path().map(str::to_string) })
            .collect()
            .await;
        assert_eq!(rest, vec!["item-2", "item-3", "item-4"]);
    }

    #[tokio::test]
    async fn skip_past_end_is_empty() {
        let list = sample(2);
        let rest: Vec<_> = list.enumerate(10, CancellationToken::new()).collect().await;
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn cancelled_list_yields_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let rest: Vec<_> = sample(3).enumerate(0, cancel).collect().await;
        assert!(rest.is_empty());
    }
}
