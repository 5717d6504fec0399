//! Backend abstraction layer.
//!
//! Provides the trait-based contract the read-state operations consume:
//! - [`Backend`]: a live connection (auth, RPC, table queries)
//! - [`ConnectionFactory`]: builds connections from configuration
//! - [`RestBackend`]: Supabase-style HTTP implementation
//! - [`MockBackend`]: in-memory implementation for testing

pub mod mock;
pub mod query;
pub mod rest;
pub mod traits;
pub mod types;

pub use mock::{ListRpcMode, MockBackend, MockConnectionFactory, MockServer};
pub use query::{escape_like, Filter, Order, TableQuery};
pub use rest::{RestBackend, RestConnectionFactory};
pub use traits::{AuthOptions, Backend, ConnectionFactory, ConnectionOptions};
pub use types::{ApiError, ApiResult, ReadRecord, RECORD_COLUMNS};
