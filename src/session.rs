//! Session types and the session storage adapter
//!
//! The backend connection persists its session through [`SessionStorage`].
//! [`StoreSessionStorage`] bridges that contract onto any
//! [`KeyValueStore`]; it treats values as opaque strings and knows nothing
//! about the session layout.

use crate::error::Result;
use crate::store::KeyValueStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Authenticated user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Backend session (bearer credentials plus the user they belong to)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Expiry as unix seconds, when the server reports one
    #[serde(default)]
    pub expires_at: Option<i64>,
    /// Lifetime in seconds as reported at issue time
    #[serde(default)]
    pub expires_in: Option<i64>,
    pub user: User,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {
    /// Expiry in unix seconds, derived from `expires_in` when the server
    /// omitted `expires_at`
    pub fn expiry(&self, issued_at: i64) -> Option<i64> {
        self.expires_at
            .or_else(|| self.expires_in.map(|secs| issued_at + secs))
    }

    /// Check whether the session expires within `margin_secs` of `now`
    pub fn expires_within(&self, now: i64, margin_secs: i64) -> bool {
        self.expires_at
            .map(|at| at - now <= margin_secs)
            .unwrap_or(false)
    }
}

/// Persistence hook used by a backend connection for its session
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Read an item; `Ok(None)` when absent
    async fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Write an item
    async fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Remove an item (absent keys are ignored)
    async fn remove_item(&self, key: &str) -> Result<()>;
}

/// [`SessionStorage`] backed by the durable key-value store
#[derive(Clone)]
pub struct StoreSessionStorage {
    store: Arc<dyn KeyValueStore>,
}

impl StoreSessionStorage {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SessionStorage for StoreSessionStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let mut items = self.store.get(&[key]).await?;
        Ok(match items.remove(key) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s),
            // Values written by other writers may not be strings
            Some(other) => Some(other.to_string()),
        })
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.store
            .set(HashMap::from([(key.to_string(), Value::String(value.to_string()))]))
            .await
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        self.store.remove(&[key]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let storage = StoreSessionStorage::new(Arc::new(MemoryStore::new()));
        assert_eq!(storage.get_item("sb-auth-token").await.unwrap(), None);
        storage.remove_item("sb-auth-token").await.unwrap();
    }

    #[tokio::test]
    async fn test_round_trip_through_store() {
        let store = MemoryStore::new();
        let storage = StoreSessionStorage::new(Arc::new(store.clone()));

        storage.set_item("k", r#"{"a":1}"#).await.unwrap();
        assert_eq!(storage.get_item("k").await.unwrap().as_deref(), Some(r#"{"a":1}"#));
        assert_eq!(store.get(&["k"]).await.unwrap()["k"], json!(r#"{"a":1}"#));

        storage.remove_item("k").await.unwrap();
        assert_eq!(storage.get_item("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_non_string_values_are_serialized() {
        let store = MemoryStore::new();
        store
            .set(HashMap::from([
                ("obj".to_string(), json!({"x": true})),
                ("nil".to_string(), Value::Null),
            ]))
            .await
            .unwrap();

        let storage = StoreSessionStorage::new(Arc::new(store));
        assert_eq!(storage.get_item("obj").await.unwrap().as_deref(), Some(r#"{"x":true}"#));
        assert_eq!(storage.get_item("nil").await.unwrap(), None);
    }

    #[test]
    fn test_session_expiry() {
        let session: Session = serde_json::from_value(json!({
            "access_token": "at",
            "refresh_token": "rt",
            "expires_at": 1_000,
            "user": {"id": "u1", "email": "a@example.com"}
        }))
        .unwrap();

        assert_eq!(session.token_type, "bearer");
        assert!(session.expires_within(950, 60));
        assert!(!session.expires_within(900, 60));
        assert_eq!(session.expiry(0), Some(1_000));
    }
}
