use std::{
    collections::VecDeque,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use docstore_link::{
    AcquisitionCoordinator, ConnectError, ConnectFailure, ConnectOptions, ConnectionFactory,
    ConnectionState, CoordinatorState, FaultNotifier, RetryPolicy, StoreConfig, StoreHandle,
    TimeoutBudget,
};

#[derive(Clone, Debug)]
struct FakeHandle {
    id: usize,
    ready: Arc<AtomicBool>,
    notifier: Arc<Mutex<Option<FaultNotifier>>>,
}

impl FakeHandle {
    fn lose_connection(&self) {
        self.ready.store(false, Ordering::SeqCst);
        let notifier = self
            .notifier
            .lock()
            .expect("notifier mutex must not be poisoned")
            .clone();
        if let Some(notifier) = notifier {
            notifier.notify_lost();
        }
    }
}

impl StoreHandle for FakeHandle {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn on_fault(&self, notifier: FaultNotifier) {
        *self
            .notifier
            .lock()
            .expect("notifier mutex must not be poisoned") = Some(notifier);
    }
}

#[derive(Clone, Copy)]
enum Step {
    Succeed,
    Fail,
    Reject,
    Hang,
    Panic,
}

#[derive(Clone)]
struct ScriptedFactory {
    calls: Arc<AtomicUsize>,
    script: Arc<Mutex<VecDeque<Step>>>,
    fallback: Step,
    delay: Duration,
}

impl ScriptedFactory {
    fn new(script: impl IntoIterator<Item = Step>, fallback: Step) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            script: Arc::new(Mutex::new(script.into_iter().collect())),
            fallback,
            delay: Duration::ZERO,
        }
    }

    fn always(step: Step) -> Self {
        Self::new([], step)
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ConnectionFactory for ScriptedFactory {
    type Handle = FakeHandle;

    fn open(
        &self,
        _uri: &str,
        _budget: TimeoutBudget,
    ) -> impl Future<Output = Result<FakeHandle, ConnectFailure>> + Send {
        let id = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let step = self
            .script
            .lock()
            .expect("script mutex must not be poisoned")
            .pop_front()
            .unwrap_or(self.fallback);
        let delay = self.delay;
        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match step {
                Step::Succeed => Ok(FakeHandle {
                    id,
                    ready: Arc::new(AtomicBool::new(true)),
                    notifier: Arc::new(Mutex::new(None)),
                }),
                Step::Fail => Err(ConnectFailure::Other(format!("attempt {id} refused"))),
                Step::Reject => Err(ConnectFailure::Handshake {
                    status: 401,
                    body: "bad credentials".to_owned(),
                }),
                Step::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(ConnectFailure::Other("unreachable".to_owned()))
                }
                Step::Panic => panic!("factory blew up"),
            }
        }
    }
}

fn options(max_attempts: u32) -> ConnectOptions {
    ConnectOptions {
        discovery_timeout_ms: 200,
        connect_timeout_ms: 200,
        idle_operation_timeout_ms: 1_000,
        max_idle_time_ms: 60_000,
        max_attempts,
        retry_delay_ms: 1,
        ..ConnectOptions::default()
    }
}

fn coordinator(
    factory: &ScriptedFactory,
    max_attempts: u32,
) -> AcquisitionCoordinator<ScriptedFactory> {
    let config = StoreConfig::new("http://store.test").with_options(options(max_attempts));
    AcquisitionCoordinator::new(config, factory.clone())
}

#[tokio::test]
async fn cache_hit_returns_same_handle_without_factory_call() {
    let factory = ScriptedFactory::always(Step::Succeed);
    let coordinator = coordinator(&factory, 1);

    let first = coordinator.acquire().await.expect("first acquire must connect");
    let second = coordinator.acquire().await.expect("second acquire must hit cache");

    assert_eq!(factory.calls(), 1);
    assert_eq!(first.id, second.id);
    assert_eq!(first.generation(), second.generation());
    assert_eq!(coordinator.state(), CoordinatorState::Ready);
    assert_eq!(coordinator.connection_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn ready_handle_is_reused_after_pool_idle_time_with_default_options() {
    let factory = ScriptedFactory::always(Step::Succeed);
    let coordinator =
        AcquisitionCoordinator::new(StoreConfig::new("http://store.test"), factory.clone());

    let first = coordinator.acquire().await.expect("first acquire must connect");
    tokio::time::sleep(ConnectOptions::default().max_idle_time() + Duration::from_millis(100))
        .await;
    let second = coordinator.acquire().await.expect("ready handle must be served");

    assert_eq!(factory.calls(), 1);
    assert_eq!(first.id, second.id);
    assert_eq!(first.generation(), second.generation());
}

#[tokio::test]
async fn record_idle_timeout_evicts_unused_connection() {
    let factory = ScriptedFactory::always(Step::Succeed);
    let options = ConnectOptions {
        record_idle_timeout_ms: Some(20),
        ..options(1)
    };
    let config = StoreConfig::new("http://store.test").with_options(options);
    let coordinator = AcquisitionCoordinator::new(config, factory.clone());

    let first = coordinator.acquire().await.expect("first acquire must connect");
    tokio::time::sleep(Duration::from_millis(60)).await;
    let second = coordinator.acquire().await.expect("evicted record must reconnect");

    assert_eq!(factory.calls(), 2);
    assert_ne!(first.generation(), second.generation());
}

#[tokio::test]
async fn concurrent_cold_start_makes_one_factory_call() {
    let factory = ScriptedFactory::always(Step::Succeed).with_delay(Duration::from_millis(50));
    let coordinator = coordinator(&factory, 1);

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.acquire().await })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        let conn = task
            .await
            .expect("task must not panic")
            .expect("every waiter must receive the connection");
        ids.push((conn.id, conn.generation()));
    }

    assert_eq!(factory.calls(), 1);
    assert!(ids.iter().all(|entry| *entry == ids[0]));
}

#[tokio::test]
async fn concurrent_waiters_share_terminal_failure() {
    let factory = ScriptedFactory::always(Step::Fail).with_delay(Duration::from_millis(30));
    let coordinator = coordinator(&factory, 2);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.acquire().await })
        })
        .collect();

    for task in tasks {
        let err = task
            .await
            .expect("task must not panic")
            .expect_err("every waiter must see the failure");
        assert!(matches!(err, ConnectError::ExhaustedRetries { attempts: 2, .. }));
    }
    assert_eq!(factory.calls(), 2);
    assert_eq!(coordinator.state(), CoordinatorState::Degraded);
    assert_eq!(coordinator.connection_state(), ConnectionState::Failed);
}

#[tokio::test]
async fn retries_are_bounded_by_max_attempts() {
    for max_attempts in 1..=3u32 {
        let factory = ScriptedFactory::always(Step::Fail);
        let coordinator = coordinator(&factory, max_attempts);

        let err = coordinator
            .acquire()
            .await
            .expect_err("an always-failing factory must exhaust retries");

        assert_eq!(factory.calls(), max_attempts as usize);
        match err {
            ConnectError::ExhaustedRetries { attempts, last, .. } => {
                assert_eq!(attempts, max_attempts);
                assert!(last.to_string().contains("refused"));
            }
            other => panic!("expected exhausted retries, got {other:?}"),
        }
        assert_eq!(coordinator.attempt_count(), 0);
    }
}

#[tokio::test]
async fn succeeds_on_third_attempt_and_resets_counter() {
    let factory = ScriptedFactory::new([Step::Fail, Step::Fail, Step::Succeed], Step::Fail);
    let coordinator = coordinator(&factory, 3);

    let conn = coordinator.acquire().await.expect("third attempt must succeed");

    assert_eq!(conn.id, 3);
    assert_eq!(factory.calls(), 3);
    assert_eq!(coordinator.attempt_count(), 0);
}

#[tokio::test]
async fn counter_reset_gives_full_budget_after_recovery() {
    let factory = ScriptedFactory::new(
        [Step::Fail, Step::Succeed, Step::Fail, Step::Succeed],
        Step::Fail,
    );
    let coordinator = coordinator(&factory, 2);

    let first = coordinator.acquire().await.expect("second attempt must succeed");
    coordinator.invalidate();

    // One failure must not exhaust the budget that the first cycle used up.
    let second = coordinator
        .acquire()
        .await
        .expect("a single failure after recovery must be retried");

    assert_eq!(factory.calls(), 4);
    assert_ne!(first.generation(), second.generation());
}

#[tokio::test]
async fn missing_uri_fails_without_calling_factory() {
    let factory = ScriptedFactory::always(Step::Succeed);
    let coordinator = AcquisitionCoordinator::new(StoreConfig::unconfigured(), factory.clone());

    for _ in 0..3 {
        let err = coordinator
            .acquire()
            .await
            .expect_err("unconfigured coordinator must fail");
        assert!(matches!(err, ConnectError::Configuration(_)));
        assert!(!err.is_unavailable());
    }
    assert_eq!(factory.calls(), 0);
    assert_eq!(coordinator.state(), CoordinatorState::Idle);
}

#[tokio::test]
async fn invalidate_forces_reconnect() {
    let factory = ScriptedFactory::always(Step::Succeed);
    let coordinator = coordinator(&factory, 1);

    let first = coordinator.acquire().await.expect("must connect");
    coordinator.invalidate();
    assert_eq!(coordinator.connection_state(), ConnectionState::Disconnected);

    let second = coordinator.acquire().await.expect("must reconnect");

    assert_eq!(factory.calls(), 2);
    assert_ne!(first.id, second.id);
}

#[tokio::test]
async fn not_ready_handle_is_replaced_on_next_acquire() {
    let factory = ScriptedFactory::always(Step::Succeed);
    let coordinator = coordinator(&factory, 1);

    let first = coordinator.acquire().await.expect("must connect");
    first.ready.store(false, Ordering::SeqCst);

    let second = coordinator.acquire().await.expect("must reconnect");
    assert_eq!(factory.calls(), 2);
    assert_eq!(second.id, 2);
}

#[tokio::test]
async fn fault_notification_invalidates_cache() {
    let factory = ScriptedFactory::always(Step::Succeed);
    let coordinator = coordinator(&factory, 1);

    let conn = coordinator.acquire().await.expect("must connect");
    conn.lose_connection();

    assert_eq!(coordinator.connection_state(), ConnectionState::Disconnected);
    assert_eq!(coordinator.state(), CoordinatorState::Idle);
    let replacement = coordinator.acquire().await.expect("must reconnect");
    assert_eq!(replacement.id, 2);
}

#[tokio::test]
async fn stale_report_for_old_generation_keeps_current_connection() {
    let factory = ScriptedFactory::always(Step::Succeed);
    let coordinator = coordinator(&factory, 1);

    let old = coordinator.acquire().await.expect("must connect");
    let err = coordinator.report_stale(&old, "socket closed");
    assert!(matches!(err, ConnectError::StaleHandle { .. }));
    assert!(err.is_unavailable());

    let current = coordinator.acquire().await.expect("must reconnect");
    let _ = coordinator.report_stale(&old, "late report");

    let again = coordinator.acquire().await.expect("must hit cache");
    assert_eq!(again.generation(), current.generation());
    assert_eq!(factory.calls(), 2);
}

#[tokio::test]
async fn non_retryable_failure_is_rejected_immediately() {
    let factory = ScriptedFactory::always(Step::Reject);
    let coordinator = coordinator(&factory, 3);

    let err = coordinator.acquire().await.expect_err("must be rejected");

    assert!(matches!(err, ConnectError::Rejected { attempts: 1, .. }));
    assert!(!err.is_unavailable());
    assert_eq!(factory.calls(), 1);
}

#[tokio::test]
async fn caller_deadline_does_not_cancel_shared_attempt() {
    let factory = ScriptedFactory::always(Step::Succeed).with_delay(Duration::from_millis(100));
    let coordinator = coordinator(&factory, 1);

    let patient = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.acquire().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let err = coordinator
        .acquire_within(Duration::from_millis(20))
        .await
        .expect_err("impatient caller must time out");
    assert!(matches!(err, ConnectError::DeadlineExceeded { .. }));

    let conn = patient
        .await
        .expect("task must not panic")
        .expect("patient caller must still be served");
    assert_eq!(conn.id, 1);
    assert_eq!(factory.calls(), 1);
}

#[tokio::test]
async fn hanging_factory_is_bounded_by_attempt_deadline() {
    let factory = ScriptedFactory::always(Step::Hang);
    let coordinator = coordinator(&factory, 2);

    let err = tokio::time::timeout(Duration::from_secs(5), coordinator.acquire())
        .await
        .expect("attempt deadline must bound the wait")
        .expect_err("hanging factory must fail");

    match err {
        ConnectError::ExhaustedRetries { attempts, last, budget } => {
            assert_eq!(attempts, 2);
            assert!(matches!(last, ConnectFailure::TimedOut(_)));
            assert_eq!(budget.attempt_deadline(), Duration::from_millis(400));
        }
        other => panic!("expected exhausted retries, got {other:?}"),
    }
}

#[tokio::test]
async fn panicking_factory_aborts_waiters_and_recovers() {
    let factory = ScriptedFactory::new([Step::Panic], Step::Succeed);
    let coordinator = coordinator(&factory, 1);

    let err = coordinator.acquire().await.expect_err("panic must surface");
    assert!(matches!(err, ConnectError::Aborted));
    assert_eq!(coordinator.state(), CoordinatorState::Idle);

    let conn = coordinator.acquire().await.expect("next acquire must connect");
    assert_eq!(conn.id, 2);
}

#[tokio::test]
async fn custom_policy_overrides_configured_attempts() {
    let factory = ScriptedFactory::always(Step::Fail);
    let budget = options(1).budget();
    let config = StoreConfig::new("http://store.test").with_options(options(1));
    let coordinator = AcquisitionCoordinator::with_retry_policy(
        config,
        factory.clone(),
        RetryPolicy::fixed(3, Duration::ZERO, budget),
    );

    let err = coordinator.acquire().await.expect_err("must exhaust");
    assert_eq!(err.attempts(), Some(3));
    assert_eq!(factory.calls(), 3);
}
