//! Core traits for backend connections.
//!
//! [`Backend`] is the live connection object the read-state operations
//! talk to; [`ConnectionFactory`] builds one from configuration. Hosts
//! inject the factory at startup, so a backend implementation that cannot
//! be constructed is an ordinary `Err` from [`ConnectionFactory::connect`].

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::query::TableQuery;
use super::types::ApiResult;
use crate::error::Result;
use crate::session::{Session, SessionStorage, User};

/// Session handling switches passed to a new connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthOptions {
    /// Refresh the access token before it expires
    pub auto_refresh_token: bool,
    /// Persist the session through [`SessionStorage`]
    pub persist_session: bool,
    /// Pick a session up from a redirect URL (never used by this client:
    /// it does not receive auth callbacks through page URLs)
    pub detect_session_in_url: bool,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            auto_refresh_token: true,
            persist_session: true,
            detect_session_in_url: false,
        }
    }
}

/// Everything a factory needs to build a connection
#[derive(Clone)]
pub struct ConnectionOptions {
    /// Backend base URL
    pub url: String,
    /// Backend anonymous key
    pub anon_key: String,
    pub auth: AuthOptions,
    /// Session persistence hook
    pub storage: Arc<dyn SessionStorage>,
}

impl std::fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("url", &self.url)
            .field("anon_key", &"<redacted>")
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

/// Live backend connection.
///
/// Every call reports failure as an [`ApiError`](super::ApiError) value
/// rather than panicking.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Password sign-in; the connection persists the resulting session.
    async fn sign_in_with_password(&self, email: &str, password: &str) -> ApiResult<Session>;

    /// End the session, clearing any persisted copy.
    async fn sign_out(&self) -> ApiResult<()>;

    /// User of the current session, `None` when signed out.
    async fn get_user(&self) -> ApiResult<Option<User>>;

    /// Invoke a named server-side procedure.
    async fn rpc(&self, name: &str, params: Value) -> ApiResult<Value>;

    /// Run a table query, returning the matching rows.
    async fn select(&self, query: TableQuery) -> ApiResult<Vec<Value>>;
}

/// Builds [`Backend`] connections.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self, options: ConnectionOptions) -> Result<Arc<dyn Backend>>;
}
