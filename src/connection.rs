//! Connection cache
//!
//! Holds at most one live [`Backend`], built lazily from the configuration
//! in the durable store. Writing configuration through
//! [`ConnectionCache::set_config`] drops the cached connection so the next
//! use binds the new credentials.
//!
//! A generation counter guards the build path: a connection whose build
//! started before a configuration write is handed to its caller but never
//! cached.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::backend::{AuthOptions, Backend, ConnectionFactory, ConnectionOptions};
use crate::config::{BackendConfig, CONFIG_KEYS, KEY_ANON_KEY, KEY_PRIVACY, KEY_URL};
use crate::error::{Result, SyncError};
use crate::session::StoreSessionStorage;
use crate::store::KeyValueStore;

/// Lazily built, invalidatable backend connection
pub struct ConnectionCache {
    store: Arc<dyn KeyValueStore>,
    factory: Arc<dyn ConnectionFactory>,
    cached: RwLock<Option<Arc<dyn Backend>>>,
    generation: AtomicU64,
}

impl ConnectionCache {
    pub fn new(store: Arc<dyn KeyValueStore>, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            store,
            factory,
            cached: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Read the backend configuration from the store
    pub async fn get_config(&self) -> Result<BackendConfig> {
        let items = self.store.get(&CONFIG_KEYS).await?;
        Ok(BackendConfig::from_items(&items))
    }

    /// Write the backend configuration and drop the cached connection
    ///
    /// The connection is dropped even when the write fails, so a partial
    /// write can never leave old credentials bound.
    pub async fn set_config(&self, config: &BackendConfig) -> Result<()> {
        let mut items = HashMap::new();
        let mut absent = Vec::new();

        for (key, value) in [(KEY_URL, &config.url), (KEY_ANON_KEY, &config.anon_key)] {
            match value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                Some(v) => {
                    items.insert(key.to_string(), Value::String(v.to_string()));
                }
                None => absent.push(key),
            }
        }
        items.insert(KEY_PRIVACY.to_string(), Value::Bool(config.privacy));

        let result = async {
            self.store.set(items).await?;
            if !absent.is_empty() {
                self.store.remove(&absent).await?;
            }
            Ok::<_, SyncError>(())
        }
        .await;

        self.invalidate().await;
        tracing::debug!("Backend configuration updated, connection invalidated");
        result
    }

    /// Drop the cached connection
    pub async fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.cached.write().await = None;
    }

    /// Whether a connection is currently cached
    pub async fn is_cached(&self) -> bool {
        self.cached.read().await.is_some()
    }

    /// The cached connection, building one when needed
    ///
    /// `None` means "not configured" (no URL or key) or "could not be
    /// built"; the latter is logged as a warning.
    pub async fn client(&self) -> Option<Arc<dyn Backend>> {
        if let Some(client) = self.cached.read().await.as_ref() {
            return Some(client.clone());
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let config = match self.get_config().await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to read backend configuration: {}", e);
                return None;
            }
        };
        let Some((url, anon_key)) = config.credentials() else {
            tracing::debug!("Backend not configured");
            return None;
        };

        let options = ConnectionOptions {
            url: url.to_string(),
            anon_key: anon_key.to_string(),
            auth: AuthOptions {
                auto_refresh_token: true,
                persist_session: true,
                detect_session_in_url: false,
            },
            storage: Arc::new(StoreSessionStorage::new(self.store.clone())),
        };

        let client = match self.factory.connect(options).await {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("Backend client unavailable: {}", e);
                return None;
            }
        };

        let mut slot = self.cached.write().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!("Configuration changed during connection build, not caching");
            return Some(client);
        }
        match slot.as_ref() {
            // A concurrent build for the same configuration won
            Some(existing) => Some(existing.clone()),
            None => {
                tracing::debug!("Built backend connection for {}", url);
                *slot = Some(client.clone());
                Some(client)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockConnectionFactory, MockServer};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use std::sync::{OnceLock, Weak};

    /// Factory that rewrites the configuration in the middle of its first
    /// build
    struct ReconfiguringFactory {
        inner: MockConnectionFactory,
        cache: OnceLock<Weak<ConnectionCache>>,
        fired: AtomicBool,
    }

    #[async_trait]
    impl ConnectionFactory for ReconfiguringFactory {
        async fn connect(&self, options: ConnectionOptions) -> Result<Arc<dyn Backend>> {
            if !self.fired.swap(true, Ordering::SeqCst) {
                if let Some(cache) = self.cache.get().and_then(Weak::upgrade) {
                    cache
                        .set_config(&BackendConfig::new("https://two.example.com", "k2"))
                        .await?;
                }
            }
            self.inner.connect(options).await
        }
    }

    fn cache() -> (ConnectionCache, Arc<MockConnectionFactory>, MemoryStore) {
        let store = MemoryStore::new();
        let factory = Arc::new(MockConnectionFactory::new(Arc::new(MockServer::new())));
        let cache = ConnectionCache::new(Arc::new(store.clone()), factory.clone());
        (cache, factory, store)
    }

    #[tokio::test]
    async fn test_unconfigured_yields_no_client() {
        let (cache, factory, _) = cache();
        assert!(cache.client().await.is_none());

        cache
            .set_config(&BackendConfig {
                url: Some("https://db.example.com".into()),
                anon_key: None,
                privacy: false,
            })
            .await
            .unwrap();
        assert!(cache.client().await.is_none());
        assert_eq!(factory.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_client_is_memoized() {
        let (cache, factory, _) = cache();
        cache
            .set_config(&BackendConfig::new("https://db.example.com", "anon"))
            .await
            .unwrap();

        let a = cache.client().await.unwrap();
        let b = cache.client().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.connect_count(), 1);
        assert!(cache.is_cached().await);
    }

    #[tokio::test]
    async fn test_set_config_invalidates() {
        let (cache, factory, _) = cache();
        cache
            .set_config(&BackendConfig::new("https://one.example.com", "k1"))
            .await
            .unwrap();
        cache.client().await.unwrap();

        cache
            .set_config(&BackendConfig::new("https://two.example.com", "k2"))
            .await
            .unwrap();
        assert!(!cache.is_cached().await);

        cache.client().await.unwrap();
        assert_eq!(factory.connect_count(), 2);

        let options = factory.last_options().unwrap();
        assert_eq!(options.url, "https://two.example.com");
        assert_eq!(options.anon_key, "k2");
    }

    #[tokio::test]
    async fn test_build_outdated_by_config_write_is_not_cached() {
        let factory = Arc::new(ReconfiguringFactory {
            inner: MockConnectionFactory::new(Arc::new(MockServer::new())),
            cache: OnceLock::new(),
            fired: AtomicBool::new(false),
        });
        let cache = Arc::new(ConnectionCache::new(
            Arc::new(MemoryStore::new()),
            factory.clone(),
        ));
        factory.cache.set(Arc::downgrade(&cache)).unwrap();
        cache
            .set_config(&BackendConfig::new("https://one.example.com", "k1"))
            .await
            .unwrap();

        // Built for the old credentials: handed out but not kept
        assert!(cache.client().await.is_some());
        assert!(!cache.is_cached().await);
        assert_eq!(
            factory.inner.last_options().unwrap().url,
            "https://one.example.com"
        );

        let fresh = cache.client().await.unwrap();
        assert!(cache.is_cached().await);
        assert_eq!(
            factory.inner.last_options().unwrap().url,
            "https://two.example.com"
        );
        assert!(Arc::ptr_eq(&fresh, &cache.client().await.unwrap()));
        assert_eq!(factory.inner.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_connection_options() {
        let (cache, factory, _) = cache();
        cache
            .set_config(&BackendConfig::new("https://db.example.com", "anon"))
            .await
            .unwrap();
        cache.client().await.unwrap();

        let auth = factory.last_options().unwrap().auth;
        assert!(auth.auto_refresh_token);
        assert!(auth.persist_session);
        assert!(!auth.detect_session_in_url);
    }

    #[tokio::test]
    async fn test_factory_failure_is_no_client() {
        let (cache, factory, _) = cache();
        factory.set_available(false);
        cache
            .set_config(&BackendConfig::new("https://db.example.com", "anon"))
            .await
            .unwrap();

        assert!(cache.client().await.is_none());
        assert!(!cache.is_cached().await);

        factory.set_available(true);
        assert!(cache.client().await.is_some());
    }

    #[tokio::test]
    async fn test_config_round_trip_removes_cleared_keys() {
        let (cache, _, store) = cache();
        cache
            .set_config(&BackendConfig::new("https://db.example.com", "anon").with_privacy(true))
            .await
            .unwrap();
        assert_eq!(
            cache.get_config().await.unwrap(),
            BackendConfig::new("https://db.example.com", "anon").with_privacy(true)
        );

        cache.set_config(&BackendConfig::default()).await.unwrap();
        assert_eq!(cache.get_config().await.unwrap(), BackendConfig::default());
        assert!(store.get(&[KEY_URL, KEY_ANON_KEY]).await.unwrap().is_empty());
    }
}
