use std::time::{Duration, Instant};

use crate::{Connection, StoreHandle};

/// Lifecycle state of the process's single logical connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The handle is being released. Caches that release synchronously,
    /// like [`ConnectionCache`], pass straight to `Disconnected`.
    Closing,
    /// The last acquisition gave up.
    Failed,
}

/// The cached connection and its bookkeeping.
///
/// A `Connected` record always has a handle; every other state has none.
#[derive(Debug)]
pub struct ConnectionRecord<H> {
    handle: Option<H>,
    state: ConnectionState,
    generation: u64,
    established_at: Option<Instant>,
    last_healthy_at: Option<Instant>,
}

impl<H> ConnectionRecord<H> {
    fn empty(state: ConnectionState, generation: u64) -> Self {
        Self {
            handle: None,
            state,
            generation,
            established_at: None,
            last_healthy_at: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn established_at(&self) -> Option<Instant> {
        self.established_at
    }

    pub fn last_healthy_at(&self) -> Option<Instant> {
        self.last_healthy_at
    }
}

/// Holder of at most one live connection record.
///
/// Not synchronized itself; the coordinator owns it behind its state lock.
#[derive(Debug)]
pub struct ConnectionCache<H> {
    record: ConnectionRecord<H>,
    idle_limit: Option<Duration>,
}

impl<H: StoreHandle> ConnectionCache<H> {
    /// `idle_limit` evicts a ready record that has gone unused for longer;
    /// `None` keeps it while the handle reports ready.
    pub fn new(idle_limit: Option<Duration>) -> Self {
        Self {
            record: ConnectionRecord::empty(ConnectionState::Disconnected, 0),
            idle_limit,
        }
    }

    pub fn record(&self) -> &ConnectionRecord<H> {
        &self.record
    }

    pub fn state(&self) -> ConnectionState {
        self.record.state
    }

    /// Returns the cached connection if it is connected, reports ready and
    /// has not sat idle past the idle limit, when one is set. A cached record
    /// that fails the check is invalidated.
    pub fn get(&mut self) -> Option<Connection<H>> {
        if self.record.state != ConnectionState::Connected {
            return None;
        }
        let now = Instant::now();
        let live = match (&self.record.handle, self.record.last_healthy_at) {
            (Some(handle), Some(last)) => {
                handle.is_ready()
                    && self
                        .idle_limit
                        .map_or(true, |limit| now.saturating_duration_since(last) <= limit)
            }
            _ => false,
        };
        if !live {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                generation = self.record.generation,
                "cached connection failed liveness check"
            );
            self.invalidate();
            return None;
        }
        self.record.last_healthy_at = Some(now);
        let handle = self.record.handle.clone()?;
        Some(Connection::new(handle, self.record.generation))
    }

    /// Installs a freshly established handle under a new generation.
    pub fn set(&mut self, handle: H) -> Connection<H> {
        let now = Instant::now();
        let generation = self.record.generation + 1;
        self.record = ConnectionRecord {
            handle: Some(handle.clone()),
            state: ConnectionState::Connected,
            generation,
            established_at: Some(now),
            last_healthy_at: Some(now),
        };
        Connection::new(handle, generation)
    }

    /// Drops the cached handle and returns to `Disconnected`.
    ///
    /// Only releases this cache's reference; the connection closes once the
    /// last borrowed clone is gone. No-op unless a connection is cached.
    pub fn invalidate(&mut self) -> bool {
        if self.record.state != ConnectionState::Connected {
            return false;
        }
        self.record = ConnectionRecord::empty(ConnectionState::Disconnected, self.record.generation);
        true
    }

    /// Invalidates only if `generation` is the one currently cached.
    pub fn invalidate_generation(&mut self, generation: u64) -> bool {
        self.record.generation == generation && self.invalidate()
    }

    pub fn mark_connecting(&mut self) {
        self.record = ConnectionRecord::empty(ConnectionState::Connecting, self.record.generation);
    }

    pub fn mark_failed(&mut self) {
        self.record = ConnectionRecord::empty(ConnectionState::Failed, self.record.generation);
    }

    pub fn mark_disconnected(&mut self) {
        self.record =
            ConnectionRecord::empty(ConnectionState::Disconnected, self.record.generation);
    }
}
