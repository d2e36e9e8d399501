use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::enumeration::object_store::ObjectItem;
use crate::enumeration::share::ShareItem;
use crate::errors::ListingError;
use crate::token::ContinuationToken;

/// Backend-specific handle to a discovered object.
#[derive(Debug, Clone)]
pub enum EntrySource {
    Local { absolute_path: PathBuf, size: u64 },
    Object(ObjectItem),
    Share(ShareItem),
    /// In-memory payload handed over by the caller.
    Memory { len: u64 },
}

impl EntrySource {
    pub fn size(&self) -> u64 {
        match self {
            EntrySource::Local { size, .. } => *size,
            EntrySource::Object(item) => item.size,
            EntrySource::Share(item) => item.size,
            EntrySource::Memory { len } => *len,
        }
    }

    /// Snapshot time when the source is a point-in-time object snapshot.
    pub fn snapshot(&self) -> Option<DateTime<Utc>> {
        match self {
            EntrySource::Object(item) => item.snapshot,
            _ => None,
        }
    }
}

/// One discovered object or directory.
#[derive(Debug, Clone)]
pub struct ItemEntry {
    /// Path relative to the enumerated root, `/`-separated.
    pub relative_path: String,
    /// Resumes listing immediately after this entry.
    pub continuation_token: ContinuationToken,
    pub is_directory: bool,
    pub source: EntrySource,
}

/// Element of an enumeration sequence.
///
/// An `Error` terminates the sequence it appears in; nothing yielded before
/// it is retracted.
#[derive(Debug, Clone)]
pub enum TransferEntry {
    Item(ItemEntry),
    Error(ListingError),
}

impl TransferEntry {
    pub fn relative_path(&self) -> Option<&str> {
        match self {
            TransferEntry::Item(item) => Some(&item.relative_path),
            TransferEntry::Error(_) => None,
        }
    }

    pub fn continuation_token(&self) -> Option<&ContinuationToken> {
        match self {
            TransferEntry::Item(item) => Some(&item.continuation_token),
            TransferEntry::Error(_) => None,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, TransferEntry::Item(item) if item.is_directory)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, TransferEntry::Error(_))
    }

    pub fn into_item(self) -> Option<ItemEntry> {
        match self {
            TransferEntry::Item(item) => Some(item),
            TransferEntry::Error(_) => None,
        }
    }
}
