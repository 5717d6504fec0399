//! Readmark Sync - read-tracking client for a remote backend
//!
//! Keeps per-URL read state (read/unread, title, domain, last read time)
//! in a remote backend and exposes it through a small set of operations
//! that never fail for expected reasons: an unconfigured backend, rejected
//! credentials, or a remote error all come back as plain values.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            ReadStateClient               │
//! │  toggle / status / list_recent / auth    │
//! └──────┬──────────────┬───────────────┬────┘
//!        │              │               │
//!        ▼              ▼               ▼
//! ┌────────────┐ ┌─────────────┐ ┌────────────┐
//! │ canonical  │ │ Connection  │ │ auth_error │
//! │ (URL keys) │ │ Cache       │ │ classifier │
//! └────────────┘ └──────┬──────┘ └────────────┘
//!                       │ ConnectionFactory
//!                       ▼
//!              ┌─────────────────┐     ┌──────────────────┐
//!              │ Backend         │────▶│ SessionStorage   │
//!              │ (REST / mock)   │     │ → KeyValueStore  │
//!              └─────────────────┘     └──────────────────┘
//! ```

pub mod auth_error;
pub mod backend;
pub mod canonical;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod read_state;
pub mod session;
pub mod store;

// Re-export main types
pub use auth_error::is_auth_error;
pub use backend::{
    ApiError, ApiResult, AuthOptions, Backend, ConnectionFactory, ConnectionOptions, ReadRecord,
    RestConnectionFactory, TableQuery,
};
pub use canonical::{domain_of, normalize_url};
pub use config::{BackendConfig, ClientSettings};
pub use connection::ConnectionCache;
pub use error::{Result, SyncError};
pub use read_state::{
    ReadStateClient, RecentPage, SignInError, SignInOutcome, StatusLookup, ToggleOutcome,
};
pub use session::{Session, SessionStorage, StoreSessionStorage, User};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore};
