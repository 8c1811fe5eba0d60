//! Acquisition coordinator: the only way to obtain a store connection.
//!
//! At most one factory call is in flight per coordinator. Callers that arrive
//! while it runs wait on a watch channel and receive the same outcome. The
//! attempt itself runs on its own task, so a caller giving up on its own
//! deadline never cancels it for the others.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
#[cfg(feature = "tracing")]
use std::time::Instant;

use tokio::sync::watch;
use tokio::time::{sleep, timeout};

use crate::{
    retry::{Decision, GiveUp, RetryBudget},
    ConnectError, ConnectFailure, Connection, ConnectionCache, ConnectionFactory,
    ConnectionState, FaultNotifier, HttpConnectionFactory, Result, RetryPolicy, StoreConfig,
    StoreHandle, TimeoutBudget,
};

/// Externally visible state of the acquisition state machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CoordinatorState {
    /// Nothing cached; the next acquisition connects.
    Idle,
    /// Checking a cached record's liveness.
    Probing,
    /// A factory call is in flight.
    Connecting,
    /// A connection is cached and served from the fast path.
    Ready,
    /// The last attempt gave up. Behaves like `Idle`.
    Degraded,
}

type Outcome<H> = Option<Result<Connection<H>>>;

struct Inner<H> {
    state: CoordinatorState,
    in_flight: Option<watch::Receiver<Outcome<H>>>,
    cache: ConnectionCache<H>,
    budget: RetryBudget,
}

struct Shared<F: ConnectionFactory> {
    config: StoreConfig,
    factory: F,
    policy: RetryPolicy,
    inner: Mutex<Inner<F::Handle>>,
}

enum Entry<H> {
    Ready(Connection<H>),
    Wait(watch::Receiver<Outcome<H>>),
}

/// Hands out the process's store connection.
///
/// Cloning is cheap and every clone shares the same cache.
pub struct AcquisitionCoordinator<F: ConnectionFactory> {
    shared: Arc<Shared<F>>,
}

impl<F: ConnectionFactory> Clone for AcquisitionCoordinator<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F: ConnectionFactory> fmt::Debug for AcquisitionCoordinator<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("AcquisitionCoordinator")
            .field("config", &self.shared.config)
            .field("state", &inner.state)
            .field("connection", &inner.cache.state())
            .field("attempt", &inner.budget.attempt())
            .finish()
    }
}

impl AcquisitionCoordinator<HttpConnectionFactory> {
    /// Coordinator backed by the HTTP store client.
    pub fn http(config: StoreConfig) -> Self {
        let factory = HttpConnectionFactory::from_config(&config);
        Self::new(config, factory)
    }
}

impl<F: ConnectionFactory> AcquisitionCoordinator<F> {
    /// Creates a coordinator with the retry policy derived from the
    /// configured options.
    pub fn new(config: StoreConfig, factory: F) -> Self {
        let policy = RetryPolicy::from_options(&config.options);
        Self::with_retry_policy(config, factory, policy)
    }

    /// Creates a coordinator with an explicit retry policy instead of the one
    /// derived from `config.options`.
    pub fn with_retry_policy(config: StoreConfig, factory: F, policy: RetryPolicy) -> Self {
        let inner = Inner {
            state: CoordinatorState::Idle,
            in_flight: None,
            cache: ConnectionCache::new(config.options.record_idle_timeout()),
            budget: RetryBudget::new(policy.max_attempts()),
        };
        Self {
            shared: Arc::new(Shared {
                config,
                factory,
                policy,
                inner: Mutex::new(inner),
            }),
        }
    }

    /// Returns the cached connection, or establishes one.
    ///
    /// Concurrent callers during establishment share a single factory call
    /// and all observe its outcome.
    pub async fn acquire(&self) -> Result<Connection<F::Handle>> {
        if self.shared.config.uri().is_none() {
            return Err(ConnectError::missing_uri());
        }
        match Shared::enter(&self.shared) {
            Entry::Ready(connection) => Ok(connection),
            Entry::Wait(rx) => wait_outcome(rx).await,
        }
    }

    /// Like [`acquire`](Self::acquire), bounded by the caller's own deadline.
    ///
    /// When the deadline passes the caller stops waiting; an in-flight
    /// attempt keeps running for everyone else.
    pub async fn acquire_within(&self, deadline: Duration) -> Result<Connection<F::Handle>> {
        match timeout(deadline, self.acquire()).await {
            Ok(result) => result,
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(?deadline, "caller deadline elapsed while acquiring");
                Err(ConnectError::DeadlineExceeded { waited: deadline })
            }
        }
    }

    /// Drops the cached connection; the next acquire connects again.
    pub fn invalidate(&self) {
        let mut inner = self.shared.lock();
        if inner.cache.invalidate() {
            inner.state = CoordinatorState::Idle;
            #[cfg(feature = "tracing")]
            tracing::info!("cached connection invalidated");
        }
    }

    /// Reports that an operation on `connection` found it unusable.
    ///
    /// Invalidates the cache if it still holds that connection and returns
    /// the error to hand back to the caller. Does not reconnect.
    pub fn report_stale(
        &self,
        connection: &Connection<F::Handle>,
        reason: impl fmt::Display,
    ) -> ConnectError {
        self.shared.invalidate_generation(connection.generation());
        ConnectError::StaleHandle {
            generation: connection.generation(),
            reason: reason.to_string(),
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.shared.lock().state
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.lock().cache.state()
    }

    /// Attempts made in the current acquisition cycle; zero when idle or
    /// connected.
    pub fn attempt_count(&self) -> u32 {
        self.shared.lock().budget.attempt()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }
}

impl<F: ConnectionFactory> Shared<F> {
    fn lock(&self) -> MutexGuard<'_, Inner<F::Handle>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fast path or join/start an attempt, as one critical section.
    fn enter(this: &Arc<Self>) -> Entry<F::Handle> {
        let mut inner = this.lock();
        if let Some(rx) = &inner.in_flight {
            #[cfg(feature = "tracing")]
            tracing::trace!("joining in-flight connection attempt");
            return Entry::Wait(rx.clone());
        }

        inner.state = CoordinatorState::Probing;
        if let Some(connection) = inner.cache.get() {
            inner.state = CoordinatorState::Ready;
            return Entry::Ready(connection);
        }

        let (tx, rx) = watch::channel(None);
        inner.in_flight = Some(rx.clone());
        inner.state = CoordinatorState::Connecting;
        inner.cache.mark_connecting();
        drop(inner);

        #[cfg(feature = "tracing")]
        tracing::debug!("starting connection attempt");
        let attempt = InFlight {
            shared: Arc::clone(this),
            tx: Some(tx),
        };
        tokio::spawn(attempt.run());
        Entry::Wait(rx)
    }

    fn begin_attempt(&self) -> u32 {
        self.lock().budget.begin()
    }

    fn invalidate_generation(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.cache.invalidate_generation(generation) {
            inner.state = CoordinatorState::Idle;
            #[cfg(feature = "tracing")]
            tracing::info!(generation, "connection reported lost, cache invalidated");
        }
    }

    fn fault_notifier(this: &Arc<Self>, generation: u64) -> FaultNotifier {
        let weak: Weak<Self> = Arc::downgrade(this);
        FaultNotifier::new(
            generation,
            Arc::new(move |generation| {
                if let Some(shared) = weak.upgrade() {
                    shared.invalidate_generation(generation);
                }
            }),
        )
    }
}

/// The single in-flight attempt. Dropping it without an outcome (panic,
/// runtime shutdown) resets the coordinator and wakes waiters with
/// [`ConnectError::Aborted`].
struct InFlight<F: ConnectionFactory> {
    shared: Arc<Shared<F>>,
    tx: Option<watch::Sender<Outcome<F::Handle>>>,
}

impl<F: ConnectionFactory> InFlight<F> {
    async fn run(mut self) {
        let Some(uri) = self.shared.config.uri().map(str::to_owned) else {
            self.fail(ConnectError::missing_uri());
            return;
        };
        let mut budget = self.shared.policy.initial_budget();

        loop {
            let attempt = self.shared.begin_attempt();
            #[cfg(feature = "tracing")]
            let started = Instant::now();
            let deadline = budget.attempt_deadline();
            let result = match timeout(deadline, self.shared.factory.open(&uri, budget)).await {
                Ok(result) => result,
                Err(_) => Err(ConnectFailure::TimedOut(deadline)),
            };

            let failure = match result {
                Ok(handle) => {
                    #[cfg(feature = "tracing")]
                    tracing::info!(attempt, elapsed = ?started.elapsed(), "connection established");
                    self.succeed(handle);
                    return;
                }
                Err(failure) => failure,
            };

            #[cfg(feature = "tracing")]
            tracing::warn!(attempt, elapsed = ?started.elapsed(), error = %failure, "connection attempt failed");

            match self.shared.policy.decide(attempt, &failure) {
                Decision::Retry {
                    delay,
                    next_timeout,
                } => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(attempt, ?delay, "retrying connection attempt");
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                    budget = next_timeout;
                }
                Decision::GiveUp(reason) => {
                    self.fail(give_up_error(reason, budget));
                    return;
                }
            }
        }
    }

    fn succeed(&mut self, handle: F::Handle) {
        // Only this task installs records, so the next generation is stable
        // while the notifier is registered outside the lock.
        let generation = self.shared.lock().cache.record().generation() + 1;
        handle.on_fault(Shared::fault_notifier(&self.shared, generation));

        let mut inner = self.shared.lock();
        let connection = inner.cache.set(handle);
        debug_assert_eq!(connection.generation(), generation);
        inner.budget.reset();
        inner.state = CoordinatorState::Ready;
        inner.in_flight = None;
        if let Some(tx) = self.tx.take() {
            tx.send_replace(Some(Ok(connection)));
        }
    }

    fn fail(&mut self, err: ConnectError) {
        #[cfg(feature = "tracing")]
        tracing::warn!(error = %err, "giving up on connection");
        let mut inner = self.shared.lock();
        inner.cache.mark_failed();
        inner.budget.reset();
        inner.state = CoordinatorState::Degraded;
        inner.in_flight = None;
        if let Some(tx) = self.tx.take() {
            tx.send_replace(Some(Err(err)));
        }
    }
}

impl<F: ConnectionFactory> Drop for InFlight<F> {
    fn drop(&mut self) {
        if self.tx.is_none() {
            return;
        }
        let mut inner = self.shared.lock();
        inner.cache.mark_disconnected();
        inner.budget.reset();
        inner.state = CoordinatorState::Idle;
        inner.in_flight = None;
        if let Some(tx) = self.tx.take() {
            tx.send_replace(Some(Err(ConnectError::Aborted)));
        }
    }
}

fn give_up_error(reason: GiveUp, budget: TimeoutBudget) -> ConnectError {
    if reason.exhausted {
        ConnectError::ExhaustedRetries {
            attempts: reason.attempts,
            last: reason.last_error,
            budget,
        }
    } else {
        ConnectError::Rejected {
            attempts: reason.attempts,
            cause: reason.last_error,
        }
    }
}

async fn wait_outcome<H: StoreHandle>(mut rx: watch::Receiver<Outcome<H>>) -> Result<Connection<H>> {
    let outcome = match rx.wait_for(Option::is_some).await {
        Ok(value) => Option::clone(&value),
        Err(_) => None,
    };
    outcome.unwrap_or(Err(ConnectError::Aborted))
}
