//! Durable key-value storage
//!
//! The sync client keeps its configuration and the backend session in a
//! string-keyed store of JSON values. Hosts provide their own store (for
//! example one backed by the extension's storage area); two
//! implementations ship with the crate:
//! - [`MemoryStore`]: in-process, for tests and ephemeral hosts
//! - [`JsonFileStore`]: a single JSON document on disk

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// Asynchronous string-keyed store of JSON values
///
/// `get` returns only the keys that exist; a missing key is simply absent
/// from the returned map, never an error.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the given keys
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>>;

    /// Write all items, replacing existing values
    async fn set(&self, items: HashMap<String, Value>) -> Result<()>;

    /// Remove the given keys (missing keys are ignored)
    async fn remove(&self, keys: &[&str]) -> Result<()>;
}
