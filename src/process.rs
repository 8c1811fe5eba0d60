//! Process-wide coordinator, created from the environment on first use.

use std::sync::OnceLock;

use crate::{
    AcquisitionCoordinator, ConnectError, Connection, HttpConnectionFactory, Result,
    StoreConfig, StoreConnection,
};

type ProcessCoordinator = AcquisitionCoordinator<HttpConnectionFactory>;
type Slot = OnceLock<Result<ProcessCoordinator>>;

static PROCESS: Slot = OnceLock::new();

/// The coordinator shared by the whole process.
///
/// The environment is read once, on the first call. An invalid configuration
/// is remembered and returned to every caller.
pub fn process_coordinator() -> Result<&'static ProcessCoordinator> {
    coordinator_in(&PROCESS, StoreConfig::from_env)
}

/// Fills `slot` from `load` on first use; later calls never load again.
fn coordinator_in<L>(slot: &Slot, load: L) -> Result<&ProcessCoordinator>
where
    L: FnOnce() -> Result<StoreConfig>,
{
    slot.get_or_init(|| load().map(AcquisitionCoordinator::http))
        .as_ref()
        .map_err(ConnectError::clone)
}

/// Acquires the process's store connection.
///
/// Request handlers call this before any storage operation and treat the
/// result as borrowed.
///
/// # Example
///
/// ```no_run
/// # async fn handler() -> docstore_link::Result<()> {
/// let conn = docstore_link::acquire().await?;
/// let patient = conn.find_by_id("patients", "42").await;
/// # let _ = patient;
/// # Ok(())
/// # }
/// ```
pub async fn acquire() -> Result<Connection<StoreConnection>> {
    process_coordinator()?.acquire().await
}
