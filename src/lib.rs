//! `docstore-link` manages the connection between a request-serving process
//! and a remote document store.
//!
//! The process holds at most one logical connection. [`AcquisitionCoordinator::acquire`]
//! serves it from cache while it is healthy, and otherwise establishes it
//! with a single factory call shared by every concurrent caller, retrying
//! within a configured budget:
//! - [`AcquisitionCoordinator`]: cache, single-flight, retries, deadlines
//! - [`RetryPolicy`]: pure retry/give-up decisions
//! - [`ConnectionFactory`]: opens physical connections ([`HttpConnectionFactory`])
//! - [`acquire`]: the process-scoped entry point configured from `DOCSTORE_*`

mod cache;
mod config;
mod coordinator;
mod error;
mod factory;
mod http;
mod options;
mod process;
mod store;
mod types;
mod wire;

pub mod retry;

pub use cache::{ConnectionCache, ConnectionRecord, ConnectionState};
pub use config::StoreConfig;
pub use coordinator::{AcquisitionCoordinator, CoordinatorState};
pub use error::{ConnectError, ConnectFailure, StoreError};
pub use factory::{Connection, ConnectionFactory, FaultNotifier, StoreHandle};
pub use http::HttpConnectionFactory;
pub use options::{ConnectOptions, TimeoutBudget};
pub use process::{acquire, process_coordinator};
pub use retry::{Backoff, Decision, RetryPolicy};
pub use store::StoreConnection;
pub use types::{InsertResult, UpdateResult};

pub type Result<T> = std::result::Result<T, ConnectError>;
