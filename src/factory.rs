use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

use crate::{ConnectFailure, TimeoutBudget};

/// A live handle to an established store connection.
///
/// Handles are cheap to clone; every clone refers to the same underlying
/// connection, which stays owned by the coordinator's cache.
pub trait StoreHandle: Clone + Send + Sync + 'static {
    /// Local readiness as reported by the client. Must not touch the network.
    fn is_ready(&self) -> bool;

    /// Registers the callback to fire when the client detects connection
    /// loss. Called once per established handle.
    fn on_fault(&self, _notifier: FaultNotifier) {}
}

/// Opens physical connections.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Handle: StoreHandle;

    /// Opens a new connection to `uri`, honoring each dimension of `budget`.
    fn open(
        &self,
        uri: &str,
        budget: TimeoutBudget,
    ) -> impl Future<Output = Result<Self::Handle, ConnectFailure>> + Send;
}

/// One-shot "connection lost" callback handed to a handle.
///
/// Notifying invalidates the cached connection only if it is still the
/// generation this notifier was created for.
#[derive(Clone)]
pub struct FaultNotifier {
    generation: u64,
    invalidate: Arc<dyn Fn(u64) + Send + Sync>,
}

impl FaultNotifier {
    pub(crate) fn new(generation: u64, invalidate: Arc<dyn Fn(u64) + Send + Sync>) -> Self {
        Self {
            generation,
            invalidate,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn notify_lost(&self) {
        (self.invalidate)(self.generation);
    }
}

impl fmt::Debug for FaultNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultNotifier")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// A borrowed connection returned by `acquire`.
///
/// Derefs to the handle. The generation identifies which established
/// connection this is, so faults can be reported against it precisely.
#[derive(Clone, Debug)]
pub struct Connection<H> {
    handle: H,
    generation: u64,
}

impl<H> Connection<H> {
    pub(crate) fn new(handle: H, generation: u64) -> Self {
        Self { handle, generation }
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<H> Deref for Connection<H> {
    type Target = H;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}
