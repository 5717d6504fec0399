//! Mock backend for testing.
//!
//! [`MockServer`] is an in-memory stand-in for the remote backend: a read
//! record table, the toggle and listing procedures, and password users.
//! [`MockConnectionFactory`] hands out [`MockBackend`] connections bound to
//! one shared server and counts how many it built.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::query::{ilike_matches, Filter, TableQuery};
use super::traits::{Backend, ConnectionFactory, ConnectionOptions};
use super::types::{ApiError, ApiResult, ReadRecord};
use crate::config::ClientSettings;
use crate::error::{Result, SyncError};
use crate::session::{Session, User};

/// Key mock connections persist their session under
pub const MOCK_SESSION_KEY: &str = "mock-auth-token";

/// Base of the mock server's logical clock (unix seconds)
const CLOCK_BASE: i64 = 1_700_000_000;

/// How the mock listing procedure responds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListRpcMode {
    /// `{items, has_more}`
    #[default]
    Normal,
    /// Procedure does not exist (404)
    Missing,
    /// `items` is not an array
    Malformed,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory backend state shared by all mock connections
pub struct MockServer {
    settings: ClientSettings,
    records: Mutex<BTreeMap<String, ReadRecord>>,
    users: Mutex<HashMap<String, (String, User)>>,
    failure: Mutex<Option<ApiError>>,
    list_rpc: Mutex<ListRpcMode>,
    clock: AtomicU64,
    rpc_calls: AtomicU32,
    select_calls: AtomicU32,
}

impl MockServer {
    pub fn new() -> Self {
        Self::with_settings(ClientSettings::default())
    }

    /// Server answering to the procedure and table names in `settings`
    pub fn with_settings(settings: ClientSettings) -> Self {
        Self {
            settings,
            records: Mutex::new(BTreeMap::new()),
            users: Mutex::new(HashMap::new()),
            failure: Mutex::new(None),
            list_rpc: Mutex::new(ListRpcMode::Normal),
            clock: AtomicU64::new(0),
            rpc_calls: AtomicU32::new(0),
            select_calls: AtomicU32::new(0),
        }
    }

    /// Register a password user
    pub fn add_user(&self, email: &str, password: &str) -> User {
        let user = User {
            id: format!("user-{}", lock(&self.users).len() + 1),
            email: Some(email.to_string()),
        };
        lock(&self.users).insert(email.to_string(), (password.to_string(), user.clone()));
        user
    }

    /// Insert a record directly, stamping it with the next clock tick
    pub fn insert_record(&self, url: &str, title: Option<&str>, domain: &str, status: &str) {
        let record = ReadRecord {
            url: url.to_string(),
            title: title.map(str::to_string),
            domain: domain.to_string(),
            status: status.to_string(),
            last_read_at: Some(self.tick()),
        };
        lock(&self.records).insert(record.url.clone(), record);
    }

    /// Make every call fail with `error` (`None` restores normal service)
    pub fn fail_with(&self, error: Option<ApiError>) {
        *lock(&self.failure) = error;
    }

    /// Make every call fail as if the JWT were rejected
    pub fn reject_credentials(&self) {
        self.fail_with(Some(ApiError::new(Some(401), "Invalid JWT")));
    }

    pub fn set_list_rpc(&self, mode: ListRpcMode) {
        *lock(&self.list_rpc) = mode;
    }

    /// Snapshot of all records
    pub fn records(&self) -> Vec<ReadRecord> {
        lock(&self.records).values().cloned().collect()
    }

    pub fn rpc_calls(&self) -> u32 {
        self.rpc_calls.load(Ordering::SeqCst)
    }

    pub fn select_calls(&self) -> u32 {
        self.select_calls.load(Ordering::SeqCst)
    }

    fn tick(&self) -> DateTime<Utc> {
        let seq = self.clock.fetch_add(1, Ordering::SeqCst) as i64;
        Utc.timestamp_opt(CLOCK_BASE + seq, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    fn check_failure(&self) -> ApiResult<()> {
        match lock(&self.failure).clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn toggle(&self, params: &Value) -> ApiResult<Value> {
        let url = params
            .get("p_url")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::new(Some(400), "p_url is required"))?;
        let title = params.get("p_title").and_then(Value::as_str);
        let domain = params.get("p_domain").and_then(Value::as_str).unwrap_or_default();
        let now = self.tick();

        let mut records = lock(&self.records);
        let record = records
            .entry(url.to_string())
            .and_modify(|r| {
                r.status = if r.status == "read" { "unread" } else { "read" }.to_string();
                if title.is_some() {
                    r.title = title.map(str::to_string);
                }
                r.last_read_at = Some(now);
            })
            .or_insert_with(|| ReadRecord {
                url: url.to_string(),
                title: title.map(str::to_string),
                domain: domain.to_string(),
                status: "read".to_string(),
                last_read_at: Some(now),
            });
        serde_json::to_value(&*record).map_err(|e| ApiError::transport(e.to_string()))
    }

    fn list(&self, params: &Value) -> ApiResult<Value> {
        match *lock(&self.list_rpc) {
            ListRpcMode::Missing => return Err(missing_function(&self.settings.list_rpc)),
            ListRpcMode::Malformed => {
                return Ok(json!({ "items": "unexpected", "has_more": false }))
            }
            ListRpcMode::Normal => {}
        }

        let query = params
            .get("p_query")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        let page = params.get("p_page").and_then(Value::as_u64).unwrap_or(1).max(1);
        let size = params.get("p_page_size").and_then(Value::as_u64).unwrap_or(20).max(1);

        let mut matching: Vec<ReadRecord> = lock(&self.records)
            .values()
            .filter(|r| {
                query.is_empty()
                    || r.domain.to_lowercase().contains(&query)
                    || r.title
                        .as_deref()
                        .is_some_and(|t| t.to_lowercase().contains(&query))
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.last_read_at.cmp(&a.last_read_at));

        let start = ((page - 1) * size) as usize;
        let items: Vec<&ReadRecord> = matching.iter().skip(start).take(size as usize).collect();
        let has_more = matching.len() > start + items.len();
        Ok(json!({ "items": items, "has_more": has_more }))
    }
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}

fn missing_function(name: &str) -> ApiError {
    ApiError::new(
        Some(404),
        format!("Could not find the function public.{name} in the schema cache"),
    )
    .with_code("PGRST202")
}

fn compare_json(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    match (a, b) {
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(CmpOrdering::Equal),
        (Some(Value::Null) | None, Some(Value::Null) | None) => CmpOrdering::Equal,
        // Nulls sort last
        (Some(Value::Null) | None, _) => CmpOrdering::Greater,
        (_, Some(Value::Null) | None) => CmpOrdering::Less,
        _ => CmpOrdering::Equal,
    }
}

fn matches_filter(row: &Value, filter: &Filter) -> bool {
    match filter {
        Filter::Eq { column, value } => match row.get(column) {
            Some(Value::String(s)) => s == value,
            Some(Value::Null) | None => false,
            Some(other) => other.to_string() == *value,
        },
        Filter::OrIlike { columns, pattern } => columns.iter().any(|c| {
            row.get(c)
                .and_then(Value::as_str)
                .is_some_and(|text| ilike_matches(pattern, text))
        }),
    }
}

fn project(row: Value, columns: Option<&str>) -> Value {
    let Some(columns) = columns.filter(|c| c.trim() != "*") else {
        return row;
    };
    let projected: serde_json::Map<String, Value> = columns
        .split(',')
        .map(str::trim)
        .filter_map(|c| row.get(c).map(|v| (c.to_string(), v.clone())))
        .collect();
    Value::Object(projected)
}

/// Mock connection bound to a [`MockServer`]
pub struct MockBackend {
    server: Arc<MockServer>,
    options: ConnectionOptions,
    session: tokio::sync::Mutex<Option<Session>>,
}

impl MockBackend {
    pub fn new(server: Arc<MockServer>, options: ConnectionOptions) -> Self {
        Self {
            server,
            options,
            session: tokio::sync::Mutex::new(None),
        }
    }

    /// Options this connection was built with
    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    async fn load_session(&self) -> Option<Session> {
        let mut slot = self.session.lock().await;
        if slot.is_none() && self.options.auth.persist_session {
            if let Ok(Some(raw)) = self.options.storage.get_item(MOCK_SESSION_KEY).await {
                *slot = serde_json::from_str(&raw).ok();
            }
        }
        slot.clone()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> ApiResult<Session> {
        self.server.check_failure()?;

        let user = match lock(&self.server.users).get(email) {
            Some((expected, user)) if expected == password => user.clone(),
            _ => {
                return Err(ApiError::new(Some(400), "Invalid login credentials")
                    .with_code("invalid_credentials"))
            }
        };

        let session = Session {
            access_token: format!("access-{}", user.id),
            refresh_token: format!("refresh-{}", user.id),
            token_type: "bearer".to_string(),
            expires_at: None,
            expires_in: Some(3600),
            user,
        };

        if self.options.auth.persist_session {
            let raw = serde_json::to_string(&session)
                .map_err(|e| ApiError::transport(e.to_string()))?;
            self.options
                .storage
                .set_item(MOCK_SESSION_KEY, &raw)
                .await
                .map_err(|e| ApiError::transport(e.to_string()))?;
        }
        *self.session.lock().await = Some(session.clone());
        Ok(session)
    }

    async fn sign_out(&self) -> ApiResult<()> {
        *self.session.lock().await = None;
        if self.options.auth.persist_session {
            self.options
                .storage
                .remove_item(MOCK_SESSION_KEY)
                .await
                .map_err(|e| ApiError::transport(e.to_string()))?;
        }
        self.server.check_failure()
    }

    async fn get_user(&self) -> ApiResult<Option<User>> {
        self.server.check_failure()?;
        Ok(self.load_session().await.map(|s| s.user))
    }

    async fn rpc(&self, name: &str, params: Value) -> ApiResult<Value> {
        self.server.rpc_calls.fetch_add(1, Ordering::SeqCst);
        self.server.check_failure()?;

        if name == self.server.settings.toggle_rpc {
            self.server.toggle(&params)
        } else if name == self.server.settings.list_rpc {
            self.server.list(&params)
        } else {
            Err(missing_function(name))
        }
    }

    async fn select(&self, query: TableQuery) -> ApiResult<Vec<Value>> {
        self.server.select_calls.fetch_add(1, Ordering::SeqCst);
        self.server.check_failure()?;

        if query.table != self.server.settings.table {
            return Err(ApiError::new(
                Some(404),
                format!("relation \"public.{}\" does not exist", query.table),
            )
            .with_code("42P01"));
        }

        let mut rows: Vec<Value> = self
            .server
            .records()
            .into_iter()
            .filter_map(|r| serde_json::to_value(r).ok())
            .filter(|row| query.filters.iter().all(|f| matches_filter(row, f)))
            .collect();

        for order in query.order.iter().rev() {
            rows.sort_by(|a, b| {
                let ord = compare_json(a.get(&order.column), b.get(&order.column));
                if order.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }

        let (offset, limit) = query.window();
        let rows = rows
            .into_iter()
            .skip(offset as usize)
            .take(limit.map_or(usize::MAX, |l| l as usize))
            .map(|row| project(row, query.columns.as_deref()))
            .collect();
        Ok(rows)
    }
}

/// Factory producing [`MockBackend`] connections to one shared server
pub struct MockConnectionFactory {
    server: Arc<MockServer>,
    connects: AtomicU32,
    unavailable: AtomicBool,
    last_options: Mutex<Option<ConnectionOptions>>,
}

impl MockConnectionFactory {
    pub fn new(server: Arc<MockServer>) -> Self {
        Self {
            server,
            connects: AtomicU32::new(0),
            unavailable: AtomicBool::new(false),
            last_options: Mutex::new(None),
        }
    }

    /// Make `connect` fail, as if the backend implementation were missing
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of successful connection builds
    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Options passed to the most recent build attempt
    pub fn last_options(&self) -> Option<ConnectionOptions> {
        lock(&self.last_options).clone()
    }

    pub fn server(&self) -> &Arc<MockServer> {
        &self.server
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn connect(&self, options: ConnectionOptions) -> Result<Arc<dyn Backend>> {
        *lock(&self.last_options) = Some(options.clone());

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SyncError::Connection("mock backend unavailable".to_string()));
        }

        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockBackend::new(self.server.clone(), options)))
    }
}
