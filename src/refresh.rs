// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Repeated Timer
//!
//! Background task that runs an async callback every `interval`. Shared by
//! the relay config, attestation document and PCR caches.
//!
//! ## Contract
//!
//! - The first run happens on the first tick, one interval after `start`.
//!   Callers that need an immediate value fetch once before starting.
//! - `update_interval` is a no-op for an unchanged value; otherwise the timer
//!   restarts with the new period and stays running if it was.
//! - `stop` is idempotent.
//! - Callback errors are logged per tick and never stop the timer.
//!
//! The task is spawned on the ambient tokio runtime and is dropped with it,
//! so it never holds the process open on shutdown.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Error returned by a timer callback.
pub type TickError = Box<dyn std::error::Error + Send + Sync>;

type Callback = Arc<dyn Fn() -> BoxFuture<'static, Result<(), TickError>> + Send + Sync>;

/// `tokio::time::interval` panics on a zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

struct TimerState {
    interval: Duration,
    running: Option<CancellationToken>,
}

struct TimerInner {
    name: String,
    callback: Callback,
    state: Mutex<TimerState>,
}

/// Cloneable handle to a periodic background task.
#[derive(Clone)]
pub struct RepeatedTimer {
    inner: Arc<TimerInner>,
}

impl RepeatedTimer {
    /// Timer calling `callback` every `interval` once started.
    pub fn new<F, Fut>(name: impl Into<String>, interval: Duration, callback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TickError>> + Send + 'static,
    {
        let callback: Callback = Arc::new(move || Box::pin(callback()));
        Self {
            inner: Arc::new(TimerInner {
                name: name.into(),
                callback,
                state: Mutex::new(TimerState {
                    interval: interval.max(MIN_INTERVAL),
                    running: None,
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current period.
    pub fn interval(&self) -> Duration {
        self.lock_state().interval
    }

    pub fn is_running(&self) -> bool {
        self.lock_state().running.is_some()
    }

    /// Start ticking. Does nothing if already running or outside a runtime.
    pub fn start(&self) {
        let mut state = self.lock_state();
        if state.running.is_none() {
            self.spawn(&mut state);
        }
    }

    /// Change the period, restarting the task if it is running.
    pub fn update_interval(&self, interval: Duration) {
        let interval = interval.max(MIN_INTERVAL);
        let mut state = self.lock_state();
        if state.interval == interval {
            return;
        }

        debug!(
            timer = %self.inner.name,
            old_ms = state.interval.as_millis() as u64,
            new_ms = interval.as_millis() as u64,
            "Updating timer interval"
        );
        state.interval = interval;

        if let Some(token) = state.running.take() {
            token.cancel();
            self.spawn(&mut state);
        }
    }

    /// Cancel the task.
    pub fn stop(&self) {
        if let Some(token) = self.lock_state().running.take() {
            token.cancel();
            debug!(timer = %self.inner.name, "Timer stopped");
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TimerState> {
        // State stays consistent even if a holder panicked.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn spawn(&self, state: &mut TimerState) {
        let Ok(handle) = Handle::try_current() else {
            warn!(timer = %self.inner.name, "No tokio runtime; timer not started");
            return;
        };

        let token = CancellationToken::new();
        let period = state.interval;
        let name = self.inner.name.clone();
        let callback = self.inner.callback.clone();
        let shutdown = token.clone();

        handle.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => {
                        if let Err(e) = callback().await {
                            warn!(timer = %name, error = %e, "Timer callback failed");
                        }
                    }
                }
            }
        });

        state.running = Some(token);
    }
}

impl std::fmt::Debug for RepeatedTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepeatedTimer")
            .field("name", &self.inner.name)
            .field("interval", &self.interval())
            .field("running", &self.is_running())
            .finish()
    }
}
