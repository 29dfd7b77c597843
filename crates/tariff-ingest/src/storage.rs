//! Document storage collaborator
//!
//! The pipeline only needs keyed upserts. Callers treat a failed write as
//! non-fatal unless they explicitly require durability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tariff_common::checksum::compute_checksum;
use tariff_common::{Result, TariffError};
use tracing::debug;

pub const TARIFF_COLLECTION: &str = "tariffs";
pub const REPORT_COLLECTION: &str = "validation_reports";

/// Hex digits of the key digest kept in file names
const KEY_DIGEST_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertOutcome {
    pub inserted: bool,
    pub modified_count: u64,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert `document` or replace the one matching `key_filter`
    async fn upsert(
        &self,
        collection: &str,
        key_filter: &Value,
        document: Value,
    ) -> Result<UpsertOutcome>;
}

/// Canonical string form of a key filter (object keys are sorted)
fn key_string(key_filter: &Value) -> Result<String> {
    Ok(serde_json::to_string(key_filter)?)
}

/// Process-local store, mainly for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<(String, String), Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, collection: &str, key_filter: &Value) -> Option<Value> {
        let key = key_string(key_filter).ok()?;
        self.documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(collection.to_string(), key))
            .cloned()
    }

    pub fn count(&self, collection: &str) -> usize {
        self.documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .filter(|(c, _)| c == collection)
            .count()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn upsert(
        &self,
        collection: &str,
        key_filter: &Value,
        document: Value,
    ) -> Result<UpsertOutcome> {
        let key = key_string(key_filter)?;
        let mut documents = self
            .documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let previous = documents.insert((collection.to_string(), key), document.clone());
        Ok(match previous {
            None => UpsertOutcome {
                inserted: true,
                modified_count: 0,
            },
            Some(old) => UpsertOutcome {
                inserted: false,
                modified_count: u64::from(old != document),
            },
        })
    }
}

/// One pretty-printed JSON file per document under `<root>/<collection>/`
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path for a key.
    ///
    /// The stem is a readable slug of the key's values followed by a digest of
    /// the whole key, so keys whose slugs coincide still get distinct files.
    pub fn document_path(&self, collection: &str, key_filter: &Value) -> Result<PathBuf> {
        let parts: Vec<String> = match key_filter {
            Value::Object(map) => map.values().map(scalar_text).collect(),
            other => vec![scalar_text(other)],
        };
        let slug: String = parts
            .join("_")
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        let canonical = serde_json::to_vec(key_filter)?;
        let digest = compute_checksum(&mut canonical.as_slice())?;
        let stem = format!("{}.{}", slug, digest.get(..KEY_DIGEST_LEN).unwrap_or(digest.as_str()));
        Ok(self.root.join(collection).join(format!("{}.json", stem)))
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn upsert(
        &self,
        collection: &str,
        key_filter: &Value,
        document: Value,
    ) -> Result<UpsertOutcome> {
        let path = self.document_path(collection, key_filter)?;
        let persistence = |e: std::io::Error| {
            TariffError::Persistence(format!("{}: {}", path.display(), e))
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(persistence)?;
        }

        let previous = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Value>(&bytes).ok(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(persistence(e)),
        };
        let existed = previous.is_some() || tokio::fs::try_exists(&path).await.unwrap_or(false);

        let body = serde_json::to_vec_pretty(&document)?;
        tokio::fs::write(&path, body).await.map_err(persistence)?;
        debug!(path = %path.display(), "Document written");

        Ok(UpsertOutcome {
            inserted: !existed,
            modified_count: u64::from(existed && previous.as_ref() != Some(&document)),
        })
    }
}
