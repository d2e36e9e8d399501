//! Continuation tokens: opaque, serializable resume markers.
//!
//! A token identifies "everything at or before this point has been emitted"
//! in the canonical enumeration order of one backend. Re-enumerating from a
//! token yields exactly the suffix an uninterrupted enumeration would have
//! produced after it.

use std::collections::BTreeMap;
use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// Storage backend families the enumerators understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Local,
    ObjectStore,
    Share,
    List,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::ObjectStore => "object-store",
            BackendKind::Share => "share",
            BackendKind::List => "list",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContinuationToken {
    /// Relative path (always `/`-separated) of the last emitted local entry.
    Local { relative_path: String },
    ObjectStore {
        /// Backend cursor that was used to request the page holding the entry.
        page_marker: Option<String>,
        /// Full object name of the last emitted entry.
        last_name: String,
        /// Snapshot time of the last emitted entry; `None` for the live object.
        snapshot: Option<DateTime<Utc>>,
    },
    Share { relative_path: String },
    /// Number of items of a pre-enumerated list already consumed.
    List { index: u64 },
}

impl ContinuationToken {
    pub fn kind(&self) -> BackendKind {
        match self {
            ContinuationToken::Local { .. } => BackendKind::Local,
            ContinuationToken::ObjectStore { .. } => BackendKind::ObjectStore,
            ContinuationToken::Share { .. } => BackendKind::Share,
            ContinuationToken::List { .. } => BackendKind::List,
        }
    }

    /// Opaque, URL-safe string form suitable for checkpoints and command lines.
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self).context("serializing continuation token")?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    pub fn decode(encoded: &str) -> Result<Self> {
        let json = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .context("continuation token is not valid base64")?;
        serde_json::from_slice(&json).context("continuation token payload is malformed")
    }
}

/// Resume markers for every location of a job that is still in progress.
///
/// The surrounding engine decides where this is stored; only the JSON form
/// is provided here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCheckpoint {
    tokens: BTreeMap<String, ContinuationToken>,
}

impl JobCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self, location_id: &str) -> Option<&ContinuationToken> {
        self.tokens.get(location_id)
    }

    pub fn record(&mut self, location_id: &str, token: ContinuationToken) {
        self.tokens.insert(location_id.to_string(), token);
    }

    /// Forget a location once it has been fully enumerated.
    pub fn complete(&mut self, location_id: &str) -> Option<ContinuationToken> {
        self.tokens.remove(location_id)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("serializing job checkpoint")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("parsing job checkpoint")
    }
}
