//! JSON-file key-value store
//!
//! All keys live in one JSON object on disk. The file is read once on first
//! access and rewritten in full on every mutation (temp file + rename, so a
//! crash never leaves a half-written document). The in-memory copy only
//! changes once the write has reached disk.

use super::KeyValueStore;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Key-value store persisted as a single JSON document
pub struct JsonFileStore {
    path: PathBuf,
    /// Loaded document; `None` until first access
    items: Mutex<Option<Map<String, Value>>>,
}

impl JsonFileStore {
    /// Create a store backed by `path` (created on first write)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            items: Mutex::new(None),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Map<String, Value>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Map::new()),
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes)? {
                Value::Object(map) => Ok(map),
                other => Err(SyncError::Store(format!(
                    "{} does not hold a JSON object (found {})",
                    self.path.display(),
                    type_name(&other)
                ))),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, items: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let body = serde_json::to_vec_pretty(items)?;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
        let mut guard = self.items.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        let items = guard.as_ref().map(|m| {
            keys.iter()
                .filter_map(|k| m.get(*k).map(|v| (k.to_string(), v.clone())))
                .collect()
        });
        Ok(items.unwrap_or_default())
    }

    async fn set(&self, new_items: HashMap<String, Value>) -> Result<()> {
        let mut guard = self.items.lock().await;
        let mut items = match guard.as_ref() {
            Some(items) => items.clone(),
            None => self.load().await?,
        };
        items.extend(new_items);
        self.persist(&items).await?;
        *guard = Some(items);
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        let mut guard = self.items.lock().await;
        let mut items = match guard.as_ref() {
            Some(items) => items.clone(),
            None => self.load().await?,
        };
        let before = items.len();
        for key in keys {
            items.remove(*key);
        }
        if items.len() != before {
            self.persist(&items).await?;
        }
        *guard = Some(items);
        Ok(())
    }
}
