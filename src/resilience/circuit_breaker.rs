//! Circuit Breaker Pattern Implementation
//!
//! Wraps an asynchronous operation with failure counting, a per-call
//! deadline and a three-state breaker. Every call runs under
//! `call_timeout`; a call that misses its deadline counts as a failure and the
//! in-flight future is dropped.
//!
//! # State Machine
//!
//! ```text
//! ┌─────────┐
//! │ Closed  │ ◄──────────────────┐
//! │ (Normal)│                    │
//! └────┬────┘                    │
//!      │ failure_threshold       │ success_threshold
//!      │ consecutive failures    │ consecutive successes
//!      ▼                         │
//! ┌─────────┐ recovery_timeout ┌──┴────────┐
//! │  Open   │─────────────────►│ HalfOpen  │
//! │(Failing)│                  │ (Testing) │
//! └─────────┘◄─────────────────└───────────┘
//!                any failure
//! ```
//!
//! # Example
//!
//! ```rust
//! use lighter_gateway::resilience::CircuitBreaker;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cb = CircuitBreaker::new("speech-api".to_string());
//!
//! let result = cb.call(async {
//!     Ok::<String, std::io::Error>("transcript".to_string())
//! }).await;
//!
//! match result {
//!     Ok(response) => println!("Success: {:?}", response),
//!     Err(e) => println!("Failed: {}", e),
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use utoipa::ToSchema;

const EVENT_CAPACITY: usize = 256;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, allowing all requests through
    Closed,
    /// Failing state, rejecting all requests until the recovery timeout expires
    Open,
    /// Testing state, trial requests decide whether the dependency recovered
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Number of consecutive successes before closing from half-open
    pub success_threshold: u32,
    /// How long the circuit stays open before a trial call is let through
    pub recovery_timeout: Duration,
    /// Deadline applied to every protected call
    pub call_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Why a protected call was counted as a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The operation returned an error
    Error,
    /// The operation did not finish before its deadline
    Timeout,
}

/// Notification emitted by a breaker.
///
/// Delivered over a broadcast channel, so slow subscribers lose events
/// instead of slowing the protected call down.
#[derive(Debug, Clone, PartialEq)]
pub enum CircuitBreakerEvent {
    StateChanged {
        name: String,
        from: CircuitState,
        to: CircuitState,
    },
    Success {
        name: String,
        elapsed: Duration,
    },
    Failure {
        name: String,
        kind: FailureKind,
    },
    Rejected {
        name: String,
    },
}

impl CircuitBreakerEvent {
    pub fn name(&self) -> &str {
        match self {
            CircuitBreakerEvent::StateChanged { name, .. }
            | CircuitBreakerEvent::Success { name, .. }
            | CircuitBreakerEvent::Failure { name, .. }
            | CircuitBreakerEvent::Rejected { name } => name,
        }
    }
}

/// Circuit breaker error
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, the operation was never invoked
    #[error("Circuit breaker is open for {name}")]
    Open { name: String, retry_after: Duration },
    /// The operation missed its deadline
    #[error("Operation protected by {name} timed out after {after:?}")]
    Timeout { name: String, after: Duration },
    /// The underlying operation failed
    #[error("Operation failed: {0}")]
    Inner(#[source] E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CircuitBreakerError::Timeout { .. })
    }
}

/// Lifetime counters, never reset
#[derive(Debug, Default)]
struct Counters {
    total_requests: AtomicU64,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    total_rejections: AtomicU64,
}

/// Mutable breaker state, always updated under one lock
#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    next_attempt_at: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    config: CircuitBreakerConfig,
}

impl BreakerState {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            next_attempt_at: None,
            last_failure_at: None,
            last_success_at: None,
            config,
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.success_count = 0;
        self.next_attempt_at = Some(now + self.config.recovery_timeout);
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.success_count = 0;
        self.next_attempt_at = None;
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    /// Percentage of invoked calls that succeeded
    pub success_rate: f64,
    /// Percentage of invoked calls that failed
    pub failure_rate: f64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    /// Milliseconds until the next trial call is allowed, when open
    pub next_attempt_in_ms: Option<u64>,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub recovery_timeout_ms: u64,
    pub call_timeout_ms: u64,
    pub uptime_seconds: u64,
}

/// Circuit breaker protecting one dependency key
///
/// Cheap to clone; clones share state, counters and the event channel.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    state: Arc<Mutex<BreakerState>>,
    counters: Arc<Counters>,
    events: broadcast::Sender<CircuitBreakerEvent>,
    created_at: Instant,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default configuration
    pub fn new(name: String) -> Self {
        Self::with_config(name, CircuitBreakerConfig::default())
    }

    /// Create a new circuit breaker with custom configuration
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use lighter_gateway::resilience::{CircuitBreaker, CircuitBreakerConfig};
    ///
    /// let config = CircuitBreakerConfig {
    ///     failure_threshold: 10,
    ///     success_threshold: 3,
    ///     recovery_timeout: Duration::from_secs(120),
    ///     call_timeout: Duration::from_secs(5),
    /// };
    /// let cb = CircuitBreaker::with_config("api".to_string(), config);
    /// ```
    pub fn with_config(name: String, config: CircuitBreakerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self::with_events(name, config, events)
    }

    /// Create a breaker publishing into an existing event channel
    pub fn with_events(
        name: String,
        config: CircuitBreakerConfig,
        events: broadcast::Sender<CircuitBreakerEvent>,
    ) -> Self {
        Self {
            name,
            state: Arc::new(Mutex::new(BreakerState::new(config))),
            counters: Arc::new(Counters::default()),
            events,
            created_at: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: CircuitBreakerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn emit_transition(&self, from: CircuitState, to: CircuitState) {
        self.emit(CircuitBreakerEvent::StateChanged {
            name: self.name.clone(),
            from,
            to,
        });
    }

    /// Subscribe to this breaker's notifications
    pub fn subscribe(&self) -> broadcast::Receiver<CircuitBreakerEvent> {
        self.events.subscribe()
    }

    /// Get the current state of the circuit breaker
    ///
    /// ```rust
    /// use lighter_gateway::resilience::{CircuitBreaker, CircuitState};
    ///
    /// let cb = CircuitBreaker::new("service".to_string());
    /// assert_eq!(cb.state(), CircuitState::Closed);
    /// ```
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.lock().config.clone()
    }

    /// Instant from which an open circuit lets the next call through
    pub fn next_attempt_at(&self) -> Option<Instant> {
        self.lock().next_attempt_at
    }

    pub fn total_requests(&self) -> u64 {
        self.counters.total_requests.load(Ordering::Relaxed)
    }

    pub fn total_failures(&self) -> u64 {
        self.counters.total_failures.load(Ordering::Relaxed)
    }

    pub fn total_successes(&self) -> u64 {
        self.counters.total_successes.load(Ordering::Relaxed)
    }

    pub fn total_rejections(&self) -> u64 {
        self.counters.total_rejections.load(Ordering::Relaxed)
    }

    /// Failure rate over invoked calls (0.0 to 1.0)
    pub fn failure_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            return 0.0;
        }
        self.total_failures() as f64 / total as f64
    }

    /// Execute an operation under the configured `call_timeout`
    ///
    /// # State Transitions
    ///
    /// - **Closed → Open**: when failure_count >= failure_threshold
    /// - **Open → HalfOpen**: on the first call at or after `next_attempt_at`,
    ///   before the operation is invoked
    /// - **HalfOpen → Closed**: when success_count >= success_threshold
    /// - **HalfOpen → Open**: on any failure
    pub async fn call<F, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let deadline = self.lock().config.call_timeout;
        self.call_with_timeout(deadline, f).await
    }

    /// Execute an operation under an explicit deadline
    ///
    /// The operation and the deadline race; whichever finishes first decides
    /// the outcome and the loser is dropped.
    pub async fn call_with_timeout<F, T, E>(
        &self,
        deadline: Duration,
        f: F,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        self.acquire()?;
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);

        let started = Instant::now();
        match tokio::time::timeout(deadline, f).await {
            Ok(Ok(value)) => {
                self.on_success(started.elapsed());
                Ok(value)
            }
            Ok(Err(err)) => {
                self.on_failure(FailureKind::Error);
                Err(CircuitBreakerError::Inner(err))
            }
            Err(_) => {
                self.on_failure(FailureKind::Timeout);
                Err(CircuitBreakerError::Timeout {
                    name: self.name.clone(),
                    after: deadline,
                })
            }
        }
    }

    /// Gate a call: fail fast while open, move to half-open once the
    /// recovery timeout has elapsed.
    fn acquire<E>(&self) -> Result<(), CircuitBreakerError<E>> {
        let now = Instant::now();
        let mut state = self.lock();

        if state.state != CircuitState::Open {
            return Ok(());
        }

        match state.next_attempt_at {
            Some(at) if now < at => {
                drop(state);
                self.counters.total_rejections.fetch_add(1, Ordering::Relaxed);
                self.emit(CircuitBreakerEvent::Rejected {
                    name: self.name.clone(),
                });
                Err(CircuitBreakerError::Open {
                    name: self.name.clone(),
                    retry_after: at - now,
                })
            }
            _ => {
                state.state = CircuitState::HalfOpen;
                state.success_count = 0;
                drop(state);

                tracing::info!(
                    circuit_breaker = %self.name,
                    state = "open -> half_open",
                    "Circuit breaker transitioning to half-open"
                );
                self.emit_transition(CircuitState::Open, CircuitState::HalfOpen);
                Ok(())
            }
        }
    }

    fn on_success(&self, elapsed: Duration) {
        self.counters.total_successes.fetch_add(1, Ordering::Relaxed);

        let transition = {
            let mut state = self.lock();
            state.last_success_at = Some(Utc::now());

            match state.state {
                CircuitState::Closed => {
                    state.failure_count = 0;
                    None
                }
                CircuitState::HalfOpen => {
                    state.success_count += 1;
                    if state.success_count >= state.config.success_threshold {
                        let successes = state.success_count;
                        state.close();
                        Some(successes)
                    } else {
                        None
                    }
                }
                // A call admitted before the circuit opened finished late.
                CircuitState::Open => None,
            }
        };

        self.emit(CircuitBreakerEvent::Success {
            name: self.name.clone(),
            elapsed,
        });

        if let Some(successes) = transition {
            tracing::info!(
                circuit_breaker = %self.name,
                state = "half_open -> closed",
                consecutive_successes = successes,
                "Circuit breaker closed after successful recovery"
            );
            self.emit_transition(CircuitState::HalfOpen, CircuitState::Closed);
        }
    }

    fn on_failure(&self, kind: FailureKind) {
        self.counters.total_failures.fetch_add(1, Ordering::Relaxed);

        let transition = {
            let mut state = self.lock();
            state.last_failure_at = Some(Utc::now());

            match state.state {
                CircuitState::Closed => {
                    state.failure_count += 1;
                    if state.failure_count >= state.config.failure_threshold {
                        state.open(Instant::now());
                        Some((CircuitState::Closed, state.failure_count))
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    state.failure_count += 1;
                    state.open(Instant::now());
                    Some((CircuitState::HalfOpen, state.failure_count))
                }
                CircuitState::Open => {
                    state.failure_count += 1;
                    None
                }
            }
        };

        self.emit(CircuitBreakerEvent::Failure {
            name: self.name.clone(),
            kind,
        });

        if let Some((from, failures)) = transition {
            tracing::warn!(
                circuit_breaker = %self.name,
                state = %format!("{} -> open", from),
                failure_count = failures,
                failure = ?kind,
                "Circuit breaker opened"
            );
            self.emit_transition(from, CircuitState::Open);
        }
    }

    /// Force the breaker back to closed with zeroed failure/success counts.
    ///
    /// Lifetime counters are kept.
    pub fn reset(&self) {
        let previous = {
            let mut state = self.lock();
            let previous = state.state;
            state.close();
            previous
        };

        tracing::info!(
            circuit_breaker = %self.name,
            "Circuit breaker manually reset to closed"
        );

        if previous != CircuitState::Closed {
            self.emit_transition(previous, CircuitState::Closed);
        }
    }

    /// Replace the configuration in place, keeping state and counters
    pub fn update_config(&self, config: CircuitBreakerConfig) {
        let mut state = self.lock();
        if state.state == CircuitState::Open {
            // Re-anchor the pending trial on the new recovery timeout.
            if let Some(at) = state.next_attempt_at {
                let opened_at = at.checked_sub(state.config.recovery_timeout);
                state.next_attempt_at = opened_at.map(|opened| opened + config.recovery_timeout);
            }
        }
        state.config = config;
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let state = self.lock();
        let total_requests = self.total_requests();
        let total_successes = self.total_successes();
        let total_failures = self.total_failures();
        let percentage = |part: u64| {
            if total_requests == 0 {
                0.0
            } else {
                part as f64 / total_requests as f64 * 100.0
            }
        };

        CircuitBreakerStats {
            name: self.name.clone(),
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            total_requests,
            total_successes,
            total_failures,
            total_rejections: self.total_rejections(),
            success_rate: percentage(total_successes),
            failure_rate: percentage(total_failures),
            last_failure_at: state.last_failure_at,
            last_success_at: state.last_success_at,
            next_attempt_in_ms: match state.state {
                CircuitState::Open => state
                    .next_attempt_at
                    .map(|at| at.saturating_duration_since(Instant::now()).as_millis() as u64),
                _ => None,
            },
            failure_threshold: state.config.failure_threshold,
            success_threshold: state.config.success_threshold,
            recovery_timeout_ms: state.config.recovery_timeout.as_millis() as u64,
            call_timeout_ms: state.config.call_timeout.as_millis() as u64,
            uptime_seconds: self.created_at.elapsed().as_secs(),
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &state.state)
            .field("failure_count", &state.failure_count)
            .field("success_count", &state.success_count)
            .field("total_requests", &self.total_requests())
            .field("total_failures", &self.total_failures())
            .field("config", &state.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
    use tokio::time::sleep;

    #[derive(Debug)]
    struct TestError;

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test error")
        }
    }

    impl std::error::Error for TestError {}

    fn config(failure_threshold: u32, success_threshold: u32, recovery_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            success_threshold,
            recovery_timeout: Duration::from_millis(recovery_ms),
            call_timeout: Duration::from_secs(5),
        }
    }

    async fn fail(cb: &CircuitBreaker, times: usize) {
        for _ in 0..times {
            let _ = cb.call(async { Err::<i32, _>(TestError) }).await;
        }
    }

    #[tokio::test]
    async fn test_initial_state_is_closed() {
        let cb = CircuitBreaker::new("test".to_string());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.config(), CircuitBreakerConfig::default());
    }

    #[tokio::test]
    async fn test_successful_call() {
        let cb = CircuitBreaker::new("test".to_string());

        let result = cb.call(async { Ok::<i32, TestError>(42) }).await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.total_requests(), 1);
        assert_eq!(cb.total_failures(), 0);
    }

    #[tokio::test]
    async fn test_opens_after_exactly_threshold_failures() {
        let cb = CircuitBreaker::with_config("test".to_string(), config(5, 3, 60_000));

        fail(&cb, 4).await;
        assert_eq!(cb.state(), CircuitState::Closed);

        fail(&cb, 1).await;
        assert_eq!(cb.state(), CircuitState::Open);

        let invoked = Arc::new(AtomicU32::new(0));
        let counter = invoked.clone();
        let result = cb
            .call(async move {
                counter.fetch_add(1, AtomicOrdering::Relaxed);
                Ok::<i32, TestError>(1)
            })
            .await;

        assert!(matches!(result, Err(CircuitBreakerError::Open { .. })));
        assert_eq!(invoked.load(AtomicOrdering::Relaxed), 0, "operation must not run");
        assert_eq!(cb.total_requests(), 5);
        assert_eq!(cb.total_rejections(), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let cb = CircuitBreaker::with_config(
            "slow".to_string(),
            CircuitBreakerConfig {
                failure_threshold: 2,
                call_timeout: Duration::from_millis(20),
                ..CircuitBreakerConfig::default()
            },
        );

        for _ in 0..2 {
            let result = cb
                .call(async {
                    sleep(Duration::from_millis(500)).await;
                    Ok::<i32, TestError>(1)
                })
                .await;
            assert!(result.unwrap_err().is_timeout());
        }

        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.total_failures(), 2);
    }

    #[tokio::test]
    async fn test_explicit_deadline_overrides_call_timeout() {
        let cb = CircuitBreaker::new("deadline".to_string());

        let started = Instant::now();
        let result = cb
            .call_with_timeout(Duration::from_millis(30), async {
                sleep(Duration::from_secs(10)).await;
                Ok::<i32, TestError>(1)
            })
            .await;

        assert!(result.unwrap_err().is_timeout());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_open_rejects_until_next_attempt() {
        let cb = CircuitBreaker::with_config("test".to_string(), config(1, 1, 300));

        fail(&cb, 1).await;
        let next_attempt = cb.next_attempt_at().expect("open circuit has a next attempt");

        // Shortly before the next attempt the circuit still fails fast.
        sleep(next_attempt.saturating_duration_since(Instant::now()) - Duration::from_millis(100)).await;
        let result = cb.call(async { Ok::<i32, TestError>(1) }).await;
        assert!(result.unwrap_err().is_open());

        sleep(next_attempt.saturating_duration_since(Instant::now())).await;
        let result = cb.call(async { Ok::<i32, TestError>(1) }).await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_halfopen_requires_success_threshold() {
        let cb = CircuitBreaker::with_config("test".to_string(), config(2, 3, 50));

        fail(&cb, 2).await;
        sleep(Duration::from_millis(80)).await;

        let _ = cb.call(async { Ok::<i32, TestError>(1) }).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        let _ = cb.call(async { Ok::<i32, TestError>(2) }).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        let _ = cb.call(async { Ok::<i32, TestError>(3) }).await;
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_halfopen_failure_reopens_and_resets_next_attempt() {
        let cb = CircuitBreaker::with_config("test".to_string(), config(2, 3, 50));

        fail(&cb, 2).await;
        let first_attempt = cb.next_attempt_at().unwrap();
        sleep(Duration::from_millis(80)).await;

        let _ = cb.call(async { Ok::<i32, TestError>(1) }).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        fail(&cb, 1).await;
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.next_attempt_at().unwrap() > first_attempt);
        assert_eq!(cb.stats().success_count, 0);
    }

    #[tokio::test]
    async fn test_consecutive_failures_reset_on_success() {
        let cb = CircuitBreaker::with_config("test".to_string(), config(3, 2, 60_000));

        fail(&cb, 2).await;
        let _ = cb.call(async { Ok::<i32, TestError>(1) }).await;
        fail(&cb, 2).await;

        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_events_are_published() {
        let cb = CircuitBreaker::with_config("events".to_string(), config(1, 1, 60_000));
        let mut events = cb.subscribe();

        fail(&cb, 1).await;
        let _ = cb.call(async { Ok::<i32, TestError>(1) }).await;

        assert_eq!(
            events.recv().await.unwrap(),
            CircuitBreakerEvent::Failure { name: "events".to_string(), kind: FailureKind::Error }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            CircuitBreakerEvent::StateChanged {
                name: "events".to_string(),
                from: CircuitState::Closed,
                to: CircuitState::Open,
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            CircuitBreakerEvent::Rejected { name: "events".to_string() }
        );
    }

    #[tokio::test]
    async fn test_stats_tracking() {
        let cb = CircuitBreaker::new("test".to_string());

        for _ in 0..3 {
            let _ = cb.call(async { Ok::<i32, TestError>(1) }).await;
        }
        fail(&cb, 2).await;

        let stats = cb.stats();
        assert_eq!(stats.total_requests, 5);
        assert_eq!(stats.total_failures, 2);
        assert_eq!(stats.total_successes, 3);
        assert_eq!(stats.failure_rate, 40.0);
        assert_eq!(cb.failure_rate(), 0.4);
        assert!(stats.last_failure_at.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_calls() {
        let cb = CircuitBreaker::new("test".to_string());
        let counter = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..2 {
            let cb = cb.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    let c = counter.clone();
                    let _ = cb
                        .call(async move {
                            c.fetch_add(1, AtomicOrdering::Relaxed);
                            Ok::<_, TestError>(())
                        })
                        .await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(cb.total_requests(), 200);
        assert_eq!(counter.load(AtomicOrdering::Relaxed), 200);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_manual_reset_keeps_lifetime_counters() {
        let cb = CircuitBreaker::with_config("test".to_string(), config(2, 2, 60_000));

        fail(&cb, 2).await;
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().failure_count, 0);
        assert_eq!(cb.total_failures(), 2);
        assert!(cb.call(async { Ok::<i32, TestError>(42) }).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_config_keeps_counters() {
        let cb = CircuitBreaker::with_config("test".to_string(), config(5, 2, 60_000));

        fail(&cb, 3).await;
        cb.update_config(config(3, 2, 60_000));

        assert_eq!(cb.total_failures(), 3);
        assert_eq!(cb.config().failure_threshold, 3);

        // Next failure reaches the lowered threshold.
        fail(&cb, 1).await;
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
