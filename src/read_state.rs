//! Read-state operations
//!
//! The public face of the sync client. Every operation obtains the
//! connection from the [`ConnectionCache`], canonicalizes URLs where
//! relevant, and reports expected failures (not configured, auth failure,
//! remote failure) as values. Only malformed input is an `Err`.
//!
//! # Example
//!
//! ```rust,no_run
//! use readmark_sync::{BackendConfig, JsonFileStore, ReadStateClient, RestConnectionFactory};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ReadStateClient::with_store(
//!     Arc::new(JsonFileStore::new("readmark.json")),
//!     Arc::new(RestConnectionFactory::default()),
//! );
//! client
//!     .configure(&BackendConfig::new("https://abc.supabase.co", "anon-key"))
//!     .await?;
//!
//! let outcome = client
//!     .toggle_read_for_url("https://example.com/post/", Some("A post"))
//!     .await?;
//! let page = client.list_recent("", 1, 20).await;
//! # Ok(())
//! # }
//! ```

use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth_error::is_auth_error;
use crate::backend::{
    escape_like, ApiError, Backend, ConnectionFactory, ReadRecord, TableQuery, RECORD_COLUMNS,
};
use crate::canonical::{domain_of, normalize_url};
use crate::config::{BackendConfig, ClientSettings};
use crate::connection::ConnectionCache;
use crate::error::Result;
use crate::session::User;
use crate::store::KeyValueStore;

/// Why a sign-in did not produce a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInError {
    /// Backend not configured or not constructible
    NoClient,
    /// Backend rejected the attempt
    Backend(ApiError),
}

/// Outcome of [`ReadStateClient::sign_in_with_password`]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignInOutcome {
    pub error: Option<SignInError>,
}

impl SignInOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of [`ReadStateClient::get_status_for_url`]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusLookup {
    /// Status of the record, `None` when absent or on failure
    pub status: Option<String>,
    pub auth_error: bool,
}

/// Outcome of [`ReadStateClient::toggle_read_for_url`]
#[derive(Debug, Clone, PartialEq)]
pub enum ToggleOutcome {
    /// Procedure succeeded; carries whatever it returned
    Toggled(Value),
    /// Credentials were rejected
    AuthError,
    /// Not configured or any other failure
    Failed,
}

impl ToggleOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ToggleOutcome::Toggled(_))
    }

    pub fn is_auth_error(&self) -> bool {
        matches!(self, ToggleOutcome::AuthError)
    }

    /// New status, when the procedure returned a record or a bare status
    pub fn status(&self) -> Option<&str> {
        match self {
            ToggleOutcome::Toggled(Value::String(s)) => Some(s),
            ToggleOutcome::Toggled(v) => v.get("status").and_then(Value::as_str),
            _ => None,
        }
    }
}

/// One page of [`ReadStateClient::list_recent`]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecentPage {
    pub items: Vec<ReadRecord>,
    pub has_more: bool,
    pub auth_error: bool,
}

impl RecentPage {
    fn auth_failure() -> Self {
        Self {
            auth_error: true,
            ..Default::default()
        }
    }
}

/// Read-tracking client
pub struct ReadStateClient {
    cache: Arc<ConnectionCache>,
    settings: ClientSettings,
}

impl ReadStateClient {
    pub fn new(cache: Arc<ConnectionCache>, settings: ClientSettings) -> Self {
        Self { cache, settings }
    }

    /// Client over `store` with default settings
    pub fn with_store(store: Arc<dyn KeyValueStore>, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self::new(
            Arc::new(ConnectionCache::new(store, factory)),
            ClientSettings::default(),
        )
    }

    pub fn cache(&self) -> &Arc<ConnectionCache> {
        &self.cache
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Current backend configuration
    pub async fn config(&self) -> Result<BackendConfig> {
        self.cache.get_config().await
    }

    /// Store new backend configuration; the next operation reconnects
    pub async fn configure(&self, config: &BackendConfig) -> Result<()> {
        self.cache.set_config(config).await
    }

    /// Whether a connection can be obtained
    pub async fn test_connection(&self) -> bool {
        self.cache.client().await.is_some()
    }

    // ==================== Auth ====================

    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> SignInOutcome {
        let Some(client) = self.cache.client().await else {
            return SignInOutcome {
                error: Some(SignInError::NoClient),
            };
        };

        match client.sign_in_with_password(email, password).await {
            Ok(session) => {
                tracing::info!("Signed in as {}", session.user.id);
                SignInOutcome::default()
            }
            Err(e) => {
                tracing::debug!("Sign-in rejected: {}", e);
                SignInOutcome {
                    error: Some(SignInError::Backend(e)),
                }
            }
        }
    }

    pub async fn sign_out(&self) {
        let Some(client) = self.cache.client().await else {
            return;
        };
        if let Err(e) = client.sign_out().await {
            tracing::warn!("Sign-out failed: {}", e);
        }
    }

    pub async fn get_user(&self) -> Option<User> {
        let client = self.cache.client().await?;
        match client.get_user().await {
            Ok(user) => user,
            Err(e) => {
                tracing::debug!("No current user: {}", e);
                None
            }
        }
    }

    // ==================== Read State ====================

    /// Status of the record for `raw_url`
    pub async fn get_status_for_url(&self, raw_url: &str) -> Result<StatusLookup> {
        let url = normalize_url(raw_url)?;
        let Some(client) = self.cache.client().await else {
            return Ok(StatusLookup::default());
        };

        let query = TableQuery::from(&self.settings.table)
            .select("status")
            .eq("url", &url)
            .limit(1);

        match client.select(query).await {
            Ok(rows) => Ok(StatusLookup {
                status: rows
                    .first()
                    .and_then(|row| row.get("status"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                auth_error: false,
            }),
            Err(e) if is_auth_error(&e) => Ok(StatusLookup {
                status: None,
                auth_error: true,
            }),
            Err(e) => {
                tracing::warn!("Status lookup failed for {}: {}", url, e);
                Ok(StatusLookup::default())
            }
        }
    }

    /// Flip the read status of `raw_url`, creating the record if needed
    ///
    /// The flip happens in one server-side procedure call; the client never
    /// reads the current status first. In privacy mode the title is not
    /// sent.
    pub async fn toggle_read_for_url(
        &self,
        raw_url: &str,
        title: Option<&str>,
    ) -> Result<ToggleOutcome> {
        let url = normalize_url(raw_url)?;
        let domain = domain_of(&url)?;
        let Some(client) = self.cache.client().await else {
            return Ok(ToggleOutcome::Failed);
        };

        let privacy = match self.cache.get_config().await {
            Ok(config) => config.privacy,
            // Unknown privacy setting: keep the title local
            Err(_) => true,
        };
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty() && !privacy);

        let params = json!({
            "p_url": url,
            "p_title": title,
            "p_domain": domain,
        });

        match client.rpc(&self.settings.toggle_rpc, params).await {
            Ok(data) => Ok(ToggleOutcome::Toggled(data)),
            Err(e) if is_auth_error(&e) => Ok(ToggleOutcome::AuthError),
            Err(e) => {
                tracing::warn!("Toggle failed for {}: {}", url, e);
                Ok(ToggleOutcome::Failed)
            }
        }
    }

    /// Most recently read records, newest first, optionally filtered by a
    /// case-insensitive match on title or domain
    ///
    /// `page` is 1-based. The server-side listing procedure is tried first;
    /// if it is missing or answers without an `items` array, the records
    /// table is queried directly. An auth failure at either step ends the
    /// call.
    pub async fn list_recent(&self, query: &str, page: u32, page_size: u32) -> RecentPage {
        let Some(client) = self.cache.client().await else {
            return RecentPage::default();
        };

        let page = page.max(1);
        let size = page_size.clamp(1, self.settings.max_page_size.max(1));
        let query = query.trim();

        let params = json!({
            "p_query": query,
            "p_page": page,
            "p_page_size": size,
        });

        match client.rpc(&self.settings.list_rpc, params).await {
            Ok(data) => match parse_rpc_page(data) {
                Some(result) => return result,
                None => tracing::warn!(
                    "{} returned an unexpected payload, falling back to table query",
                    self.settings.list_rpc
                ),
            },
            Err(e) if is_auth_error(&e) => return RecentPage::auth_failure(),
            Err(e) => tracing::warn!(
                "{} unavailable, falling back to table query: {}",
                self.settings.list_rpc,
                e
            ),
        }

        self.list_by_range(client.as_ref(), query, page, size).await
    }

    async fn list_by_range(
        &self,
        client: &dyn Backend,
        query: &str,
        page: u32,
        size: u32,
    ) -> RecentPage {
        let from = u64::from(page - 1) * u64::from(size);
        let to = from + u64::from(size);

        let mut table_query = TableQuery::from(&self.settings.table)
            .select(RECORD_COLUMNS)
            .order("last_read_at", false)
            .range(from, to);
        if !query.is_empty() {
            table_query =
                table_query.or_ilike(&["title", "domain"], format!("%{}%", escape_like(query)));
        }

        let rows = match client.select(table_query).await {
            Ok(rows) => rows,
            Err(e) if is_auth_error(&e) => return RecentPage::auth_failure(),
            Err(e) => {
                tracing::warn!("Recent records query failed: {}", e);
                return RecentPage::default();
            }
        };

        let size = size as usize;
        let has_more = rows.len() > size;
        let items = rows
            .into_iter()
            .take(size)
            .filter_map(|row| match serde_json::from_value::<ReadRecord>(row) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!("Skipping malformed read record: {}", e);
                    None
                }
            })
            .collect();

        RecentPage {
            items,
            has_more,
            auth_error: false,
        }
    }
}

/// `{items: [...], has_more}` from the listing procedure, `None` when the
/// payload has no usable `items` array
fn parse_rpc_page(data: Value) -> Option<RecentPage> {
    let Value::Object(mut body) = data else {
        return None;
    };
    let items = match body.remove("items") {
        Some(items @ Value::Array(_)) => serde_json::from_value::<Vec<ReadRecord>>(items).ok()?,
        _ => return None,
    };
    let has_more = body
        .get("has_more")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Some(RecentPage {
        items,
        has_more,
        auth_error: false,
    })
}
