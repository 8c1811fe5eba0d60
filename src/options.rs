use std::time::Duration;

/// Connection tuning: timeouts, pool bounds and retry budget.
///
/// The defaults are the serverless profile: one fail-fast attempt with
/// sub-second-scale timeouts and a single pooled connection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectOptions {
    /// Time allowed to select a reachable endpoint (discovery handshake).
    pub discovery_timeout_ms: u64,
    /// Time allowed for the transport-level connect.
    pub connect_timeout_ms: u64,
    /// Time an operation may block before the connection is declared dead.
    pub idle_operation_timeout_ms: u64,
    /// Upper bound on pooled sockets behind one logical connection.
    pub max_pool_size: usize,
    /// Sockets warmed right after the handshake.
    pub min_pool_size: usize,
    /// Idle time after which pooled sockets are closed.
    pub max_idle_time_ms: u64,
    /// Idle time after which the cached connection itself is dropped and
    /// re-established. `None` keeps it for as long as it reports ready.
    pub record_idle_timeout_ms: Option<u64>,
    /// Attempts per acquisition before giving up.
    pub max_attempts: u32,
    /// Fixed delay between attempts; `0` retries immediately.
    pub retry_delay_ms: u64,
    /// Bind outgoing sockets to IPv4 only.
    pub ipv4_only: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self::serverless()
    }
}

impl ConnectOptions {
    /// Tight budgets for processes that may be cold-started per request.
    pub fn serverless() -> Self {
        Self {
            discovery_timeout_ms: 1_500,
            connect_timeout_ms: 1_500,
            idle_operation_timeout_ms: 5_000,
            max_pool_size: 1,
            min_pool_size: 0,
            max_idle_time_ms: 2_000,
            record_idle_timeout_ms: None,
            max_attempts: 1,
            retry_delay_ms: 0,
            ipv4_only: true,
        }
    }

    /// Relaxed budgets for a long-running server process.
    pub fn long_lived() -> Self {
        Self {
            discovery_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            idle_operation_timeout_ms: 45_000,
            max_pool_size: 10,
            min_pool_size: 0,
            max_idle_time_ms: 60_000,
            record_idle_timeout_ms: None,
            max_attempts: 3,
            retry_delay_ms: 1_000,
            ipv4_only: false,
        }
    }

    /// Timeout dimensions handed to the factory for one attempt.
    pub fn budget(&self) -> TimeoutBudget {
        TimeoutBudget {
            discovery: Duration::from_millis(self.discovery_timeout_ms),
            connect: Duration::from_millis(self.connect_timeout_ms),
            operation: Duration::from_millis(self.idle_operation_timeout_ms),
        }
    }

    pub fn max_idle_time(&self) -> Duration {
        Duration::from_millis(self.max_idle_time_ms)
    }

    pub fn record_idle_timeout(&self) -> Option<Duration> {
        self.record_idle_timeout_ms.map(Duration::from_millis)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Checks the combinations a store client cannot honor.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_pool_size == 0 {
            return Err("max pool size must be at least 1".to_owned());
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(format!(
                "min pool size {} exceeds max pool size {}",
                self.min_pool_size, self.max_pool_size
            ));
        }
        if self.max_attempts == 0 {
            return Err("max attempts must be at least 1".to_owned());
        }
        Ok(())
    }
}

/// Per-attempt timeout budget, one value per independent timeout dimension.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TimeoutBudget {
    pub discovery: Duration,
    pub connect: Duration,
    pub operation: Duration,
}

impl TimeoutBudget {
    /// Outer bound on a whole factory call, for factories that ignore the
    /// finer-grained budgets.
    pub fn attempt_deadline(&self) -> Duration {
        self.discovery.saturating_add(self.connect)
    }
}
