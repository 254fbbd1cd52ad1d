use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{info, warn};

use colloquy_core::{RemoteContextId, RemoteError, Turn};

use crate::store::{ContextInfo, ContextStore};

#[derive(Clone, Debug)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

/// Short-circuits calls to a store that keeps failing at the transport level.
///
/// N consecutive unavailability errors open the circuit; calls then fail fast
/// with `RemoteError::Unavailable` until the cooldown passes and one trial call
/// is let through. Protocol errors prove the remote is reachable and reset the
/// count. A call dropped before it completes (a caller deadline fired) counts
/// as a failure.
pub struct CircuitBreakerStore<S> {
    inner: S,
    config: BreakerConfig,
    state: RwLock<CircuitState>,
    consecutive_failures: AtomicU32,
}

impl<S: ContextStore> CircuitBreakerStore<S> {
    pub fn new(inner: S, config: BreakerConfig) -> Self {
        Self {
            inner,
            config,
            state: RwLock::new(CircuitState::Closed),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn state_name(&self) -> &'static str {
        match &*self.state.read() {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    fn check_circuit(&self) -> Result<(), RemoteError> {
        let state = self.state.read();
        match &*state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open { since } => {
                if since.elapsed() >= self.config.cooldown {
                    drop(state);
                    *self.state.write() = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    Err(RemoteError::Unavailable("circuit open".into()))
                }
            }
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let mut state = self.state.write();
        if *state != CircuitState::Closed {
            info!("remote circuit closed");
            *state = CircuitState::Closed;
        }
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        let mut state = self.state.write();
        let trip = match *state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => failures >= self.config.failure_threshold,
            CircuitState::Open { .. } => false,
        };
        if trip {
            warn!(
                failures,
                cooldown_ms = self.config.cooldown.as_millis() as u64,
                "remote circuit opened"
            );
            *state = CircuitState::Open {
                since: Instant::now(),
            };
        }
    }

    async fn guard<T, F>(&self, call: F) -> Result<T, RemoteError>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        self.check_circuit()?;
        let mut in_flight = InFlight {
            breaker: self,
            pending: true,
        };
        let result = call.await;
        in_flight.pending = false;
        match &result {
            Err(e) if e.is_unavailable() => self.record_failure(),
            _ => self.record_success(),
        }
        result
    }
}

/// Counts a call as failed if its future is dropped mid-flight.
struct InFlight<'a, S: ContextStore> {
    breaker: &'a CircuitBreakerStore<S>,
    pending: bool,
}

impl<S: ContextStore> Drop for InFlight<'_, S> {
    fn drop(&mut self) {
        if self.pending {
            warn!("remote call abandoned before completion");
            self.breaker.record_failure();
        }
    }
}

#[async_trait]
impl<S: ContextStore> ContextStore for CircuitBreakerStore<S> {
    async fn health_check(&self) -> Result<(), RemoteError> {
        self.guard(self.inner.health_check()).await
    }

    async fn list_contexts(&self) -> Result<Vec<ContextInfo>, RemoteError> {
        self.guard(self.inner.list_contexts()).await
    }

    async fn create_context(&self, label: &str) -> Result<RemoteContextId, RemoteError> {
        self.guard(self.inner.create_context(label)).await
    }

    async fn append_turn(&self, id: &RemoteContextId, turn: &Turn) -> Result<(), RemoteError> {
        self.guard(self.inner.append_turn(id, turn)).await
    }

    async fn get_turns(&self, id: &RemoteContextId, limit: usize) -> Result<Vec<Turn>, RemoteError> {
        self.guard(self.inner.get_turns(id, limit)).await
    }

    async fn delete_context(&self, id: &RemoteContextId) -> Result<bool, RemoteError> {
        self.guard(self.inner.delete_context(id)).await
    }
}
