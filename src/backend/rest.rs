//! Supabase-style REST backend
//!
//! Talks to an auth server under `/auth/v1` and a PostgREST API under
//! `/rest/v1`. Every request carries the anonymous key as `apikey` and a
//! bearer token: the session's access token when signed in, the anonymous
//! key otherwise.
//!
//! The session is restored lazily from [`SessionStorage`] on first use,
//! refreshed shortly before expiry when `auto_refresh_token` is set, and
//! written back after every change when `persist_session` is set.

use async_trait::async_trait;
use reqwest::{header, Client, Method, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;

use super::query::TableQuery;
use super::traits::{AuthOptions, Backend, ConnectionFactory, ConnectionOptions};
use super::types::{ApiError, ApiResult};
use crate::auth_error::is_auth_error;
use crate::error::{Result, SyncError};
use crate::session::{Session, SessionStorage, User};

/// Refresh when the access token expires within this many seconds
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Default)]
struct SessionState {
    /// Whether the persisted session has been read yet
    restored: bool,
    session: Option<Session>,
}

/// HTTP connection to a Supabase-style backend
pub struct RestBackend {
    base_url: String,
    anon_key: String,
    auth: AuthOptions,
    storage: Arc<dyn SessionStorage>,
    storage_key: String,
    http: Client,
    state: Mutex<SessionState>,
}

impl RestBackend {
    /// Create a connection; fails when the URL is unusable or the HTTP
    /// client cannot be built
    pub fn new(options: ConnectionOptions, timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(options.url.trim())
            .map_err(|e| SyncError::Config(format!("invalid backend URL {}: {e}", options.url)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SyncError::Config(format!(
                "backend URL must be http(s), got {}",
                parsed.scheme()
            )));
        }
        let storage_key = session_storage_key(&parsed);

        let mut headers = header::HeaderMap::new();
        let apikey = header::HeaderValue::from_str(&options.anon_key)
            .map_err(|e| SyncError::Config(format!("invalid anon key: {e}")))?;
        headers.insert("apikey", apikey);

        let http = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Connection(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: options.url.trim().trim_end_matches('/').to_string(),
            anon_key: options.anon_key,
            auth: options.auth,
            storage: options.storage,
            storage_key,
            http,
            state: Mutex::new(SessionState::default()),
        })
    }

    /// Key the session is persisted under
    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, path)
    }

    // ==================== Session Lifecycle ====================

    async fn restore(&self) -> Option<Session> {
        if !self.auth.persist_session {
            return None;
        }
        match self.storage.get_item(&self.storage_key).await {
            Ok(Some(raw)) => match serde_json::from_str::<Session>(&raw) {
                Ok(session) => Some(session),
                Err(e) => {
                    tracing::warn!("Discarding unreadable persisted session: {}", e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Failed to read persisted session: {}", e);
                None
            }
        }
    }

    async fn persist(&self, session: Option<&Session>) {
        if !self.auth.persist_session {
            return;
        }
        let result = match session {
            Some(session) => match serde_json::to_string(session) {
                Ok(raw) => self.storage.set_item(&self.storage_key, &raw).await,
                Err(e) => Err(e.into()),
            },
            None => self.storage.remove_item(&self.storage_key).await,
        };
        if let Err(e) = result {
            tracing::warn!("Failed to persist session: {}", e);
        }
    }

    /// Current session, restored and refreshed as needed
    ///
    /// The session lock stays held through a refresh, so concurrent callers
    /// share one refresh request.
    async fn current_session(&self) -> Option<Session> {
        let mut state = self.state.lock().await;
        if !state.restored {
            state.session = self.restore().await;
            state.restored = true;
        }

        let refresh_token = match state.session.as_ref() {
            Some(s) if self.auth.auto_refresh_token
                && s.expires_within(now_secs(), REFRESH_MARGIN_SECS) =>
            {
                s.refresh_token.clone()
            }
            _ => return state.session.clone(),
        };

        match self.refresh(&refresh_token).await {
            Ok(session) => {
                tracing::debug!("Refreshed session for user {}", session.user.id);
                self.persist(Some(&session)).await;
                state.session = Some(session);
            }
            Err(e) if is_auth_error(&e) || e.status == Some(400) => {
                tracing::warn!("Session refresh rejected, signing out locally: {}", e);
                self.persist(None).await;
                state.session = None;
            }
            Err(e) => {
                // Keep the old token; the next call will try again
                tracing::warn!("Session refresh failed: {}", e);
            }
        }
        state.session.clone()
    }

    async fn bearer(&self) -> String {
        self.current_session()
            .await
            .map(|s| s.access_token)
            .unwrap_or_else(|| self.anon_key.clone())
    }

    async fn token_request(&self, grant_type: &str, body: Value) -> ApiResult<Session> {
        let url = self.auth_url("token");
        let response = self
            .http
            .post(&url)
            .query(&[("grant_type", grant_type)])
            .bearer_auth(&self.anon_key)
            .json(&body)
            .send()
            .await?;

        let value = handle_response(response).await?;
        let mut session: Session = serde_json::from_value(value)
            .map_err(|e| ApiError::transport(format!("malformed session response: {e}")))?;
        if session.expires_at.is_none() {
            session.expires_at = session.expiry(now_secs());
        }
        Ok(session)
    }

    async fn refresh(&self, refresh_token: &str) -> ApiResult<Session> {
        self.token_request("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
    }

    async fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let bearer = self.bearer().await;
        self.http
            .request(method, url)
            .header(header::ACCEPT, "application/json")
            .bearer_auth(bearer)
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> ApiResult<Session> {
        let session = self
            .token_request("password", json!({ "email": email, "password": password }))
            .await?;

        let mut state = self.state.lock().await;
        self.persist(Some(&session)).await;
        state.session = Some(session.clone());
        state.restored = true;
        Ok(session)
    }

    async fn sign_out(&self) -> ApiResult<()> {
        let Some(session) = self.current_session().await else {
            return Ok(());
        };

        let result = self
            .http
            .post(self.auth_url("logout"))
            .bearer_auth(&session.access_token)
            .send()
            .await;

        // The local session goes away whatever the server says
        {
            let mut state = self.state.lock().await;
            self.persist(None).await;
            state.session = None;
            state.restored = true;
        }

        let response = result?;
        match response.status() {
            // Token already revoked or expired
            StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND => Ok(()),
            _ => handle_response(response).await.map(|_| ()),
        }
    }

    async fn get_user(&self) -> ApiResult<Option<User>> {
        let Some(session) = self.current_session().await else {
            return Ok(None);
        };

        let response = self
            .http
            .get(self.auth_url("user"))
            .bearer_auth(&session.access_token)
            .send()
            .await?;

        let value = handle_response(response).await?;
        let user: User = serde_json::from_value(value)
            .map_err(|e| ApiError::transport(format!("malformed user response: {e}")))?;
        Ok(Some(user))
    }

    async fn rpc(&self, name: &str, params: Value) -> ApiResult<Value> {
        let url = self.rest_url(&format!("rpc/{}", urlencoding::encode(name)));
        let response = self
            .request(Method::POST, &url)
            .await
            .json(&params)
            .send()
            .await?;
        handle_response(response).await
    }

    async fn select(&self, query: TableQuery) -> ApiResult<Vec<Value>> {
        let url = self.rest_url(&urlencoding::encode(&query.table));
        let response = self
            .request(Method::GET, &url)
            .await
            .query(&query.to_query_pairs())
            .send()
            .await?;

        match handle_response(response).await? {
            Value::Array(rows) => Ok(rows),
            other => Err(ApiError::transport(format!(
                "expected an array of rows, got {other}"
            ))),
        }
    }
}

/// Factory building [`RestBackend`] connections
#[derive(Debug, Clone)]
pub struct RestConnectionFactory {
    timeout: Duration,
}

impl RestConnectionFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for RestConnectionFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl ConnectionFactory for RestConnectionFactory {
    async fn connect(&self, options: ConnectionOptions) -> Result<Arc<dyn Backend>> {
        let backend = RestBackend::new(options, self.timeout)?;
        Ok(Arc::new(backend))
    }
}

// ==================== Helper Functions ====================

/// Turn a response into its JSON body or an [`ApiError`]; an empty
/// success body (void procedures, 204) becomes `null`.
async fn handle_response(response: reqwest::Response) -> ApiResult<Value> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(ApiError::from_body(status.as_u16(), &body));
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body)
        .map_err(|e| ApiError::new(Some(status.as_u16()), format!("invalid JSON response: {e}")))
}

/// `sb-<first host label>-auth-token`, the key the session is stored under
fn session_storage_key(url: &Url) -> String {
    let project = url
        .host_str()
        .and_then(|h| h.split('.').next())
        .filter(|label| !label.is_empty())
        .unwrap_or("local");
    format!("sb-{project}-auth-token")
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StoreSessionStorage;
    use crate::store::MemoryStore;

    fn options(url: &str) -> ConnectionOptions {
        ConnectionOptions {
            url: url.to_string(),
            anon_key: "anon".to_string(),
            auth: AuthOptions::default(),
            storage: Arc::new(StoreSessionStorage::new(Arc::new(MemoryStore::new()))),
        }
    }

    #[test]
    fn test_storage_key_from_host() {
        let backend =
            RestBackend::new(options("https://abcd.supabase.co/"), Duration::from_secs(5))
                .unwrap();
        assert_eq!(backend.storage_key(), "sb-abcd-auth-token");
        assert_eq!(backend.base_url, "https://abcd.supabase.co");

        let local =
            RestBackend::new(options("http://127.0.0.1:54321"), Duration::from_secs(5)).unwrap();
        assert_eq!(local.storage_key(), "sb-127-auth-token");
    }

    #[test]
    fn test_rejects_unusable_urls() {
        assert!(matches!(
            RestBackend::new(options("not a url"), Duration::from_secs(5)),
            Err(SyncError::Config(_))
        ));
        assert!(matches!(
            RestBackend::new(options("ftp://files.example.com"), Duration::from_secs(5)),
            Err(SyncError::Config(_))
        ));
    }
}
