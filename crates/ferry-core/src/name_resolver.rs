//! Destination naming for entries moving between backends.
//!
//! Relative paths coming out of an enumerator are always `/`-separated. The
//! resolver splits them into segments, escapes whatever the destination
//! cannot store as `%XX` (one escape per UTF-8 byte), and joins the segments
//! with the destination's delimiter. Object-store snapshots get their
//! timestamp appended before the extension so they never collide with the
//! live object: `app.log` at 2024-01-02T03:04:05Z becomes
//! `app (2024-01-02 030405).log`.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use crate::entry::ItemEntry;
use crate::enumeration::{local, object_store, share};
use crate::errors::ConfigError;
use crate::token::BackendKind;

const SNAPSHOT_FORMAT: &str = "%Y-%m-%d %H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameResolver {
    /// Same kind on both ends: only snapshot suffixes are applied.
    Identity,
    LocalToObjectStore,
    ObjectStoreToLocal,
    LocalToShare,
    ShareToLocal,
    ObjectStoreToShare,
    ShareToObjectStore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Destination {
    Local,
    ObjectStore,
    Share,
}

impl NameResolver {
    /// Pick the resolver for a transfer from `source` to `destination`.
    /// Direct lists carry caller-supplied names and resolve as identity.
    pub fn for_pair(source: BackendKind, destination: BackendKind) -> Self {
        use BackendKind::*;
        match (source, destination) {
            (Local, ObjectStore) => NameResolver::LocalToObjectStore,
            (ObjectStore, Local) => NameResolver::ObjectStoreToLocal,
            (Local, Share) => NameResolver::LocalToShare,
            (Share, Local) => NameResolver::ShareToLocal,
            (ObjectStore, Share) => NameResolver::ObjectStoreToShare,
            (Share, ObjectStore) => NameResolver::ShareToObjectStore,
            _ => NameResolver::Identity,
        }
    }

    fn destination(self) -> Option<Destination> {
        match self {
            NameResolver::Identity => None,
            NameResolver::ObjectStoreToLocal | NameResolver::ShareToLocal => {
                Some(Destination::Local)
            }
            NameResolver::LocalToObjectStore | NameResolver::ShareToObjectStore => {
                Some(Destination::ObjectStore)
            }
            NameResolver::LocalToShare | NameResolver::ObjectStoreToShare => {
                Some(Destination::Share)
            }
        }
    }

    pub fn resolve(&self, entry: &ItemEntry) -> Result<String, ConfigError> {
        self.resolve_path(&entry.relative_path, entry.source.snapshot())
    }

    pub fn resolve_path(
        &self,
        relative_path: &str,
        snapshot: Option<DateTime<Utc>>,
    ) -> Result<String, ConfigError> {
        let mut segments: Vec<String> = relative_path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        if let (Some(at), Some(last)) = (snapshot, segments.last_mut()) {
            *last = with_snapshot_suffix(last, at);
        }

        let Some(destination) = self.destination() else {
            return Ok(segments.join("/"));
        };

        let segments = segments
            .iter()
            .map(|s| escape_segment(s, destination))
            .collect::<Vec<_>>();
        check_lengths(&segments, destination)?;
        Ok(segments.join(&destination.delimiter().to_string()))
    }
}

impl Destination {
    fn delimiter(self) -> char {
        match self {
            Destination::Local => std::path::MAIN_SEPARATOR,
            Destination::ObjectStore | Destination::Share => '/',
        }
    }

    fn is_illegal(self, c: char) -> bool {
        if c.is_control() {
            return true;
        }
        match self {
            Destination::Local if cfg!(windows) => WINDOWS_RESERVED.contains(c),
            Destination::Local => false,
            // The service rewrites backslashes into delimiters.
            Destination::ObjectStore => c == '\\',
            Destination::Share => WINDOWS_RESERVED.contains(c),
        }
    }

    /// Destinations that silently strip trailing dots and spaces.
    fn trims_trailing(self) -> bool {
        match self {
            Destination::Local => cfg!(windows),
            Destination::ObjectStore => false,
            Destination::Share => true,
        }
    }
}

const WINDOWS_RESERVED: &str = "<>:\"|?*\\";

fn push_escaped(out: &mut String, c: char) {
    let mut utf8 = [0u8; 4];
    for byte in c.encode_utf8(&mut utf8).bytes() {
        let _ = write!(out, "%{byte:02X}");
    }
}

fn escape_segment(segment: &str, destination: Destination) -> String {
    // Never let a segment walk out of the destination root.
    if segment == "." || segment == ".." {
        return "%2E".repeat(segment.len());
    }

    let mut out = String::with_capacity(segment.len());
    for c in segment.chars() {
        if destination.is_illegal(c) {
            push_escaped(&mut out, c);
        } else {
            out.push(c);
        }
    }

    if destination.trims_trailing() {
        if let Some(last) = out.chars().last().filter(|c| *c == '.' || *c == ' ') {
            out.pop();
            push_escaped(&mut out, last);
        }
    }
    out
}

fn check_lengths(segments: &[String], destination: Destination) -> Result<(), ConfigError> {
    let (max_name, max_path) = match destination {
        Destination::Local => (local::MAX_NAME_LEN, None),
        Destination::Share => (share::MAX_NAME_LEN, Some(share::MAX_PATH_LEN)),
        // Object names are flat: the whole path is the name.
        Destination::ObjectStore => (object_store::MAX_NAME_LEN, Some(object_store::MAX_NAME_LEN)),
    };
    if let Some(long) = segments.iter().find(|s| s.chars().count() > max_name) {
        return Err(ConfigError::NameTooLong {
            name: long.clone(),
            max: max_name,
        });
    }
    if let Some(max_path) = max_path {
        let path = segments.join("/");
        if path.chars().count() > max_path {
            return Err(ConfigError::PathTooLong {
                path,
                max: max_path,
            });
        }
    }
    Ok(())
}

/// `name.ext` -> `name (timestamp).ext`. A leading dot is part of the stem.
fn with_snapshot_suffix(name: &str, at: DateTime<Utc>) -> String {
    let stamp = at.format(SNAPSHOT_FORMAT);
    match name.rfind('.').filter(|&idx| idx > 0) {
        Some(idx) => format!("{} ({stamp}){}", &name[..idx], &name[idx..]),
        None => format!("{name} ({stamp})"),
    }
}
