//! Adaptive RPC concurrency controller.
//!
//! Bounds in-flight RPC calls to a dynamically chosen limit in
//! `[min, max]`, where `min = max(2, max/10)`. Every five seconds the
//! controller re-evaluates a sixty-second sliding window of per-request
//! samples and steers the limit:
//!
//! - more than [`ERROR_THRESHOLD`] failures in the window → halve
//! - P95 latency above the configured maximum → subtract 2
//! - P95 latency below half the maximum → grow by
//!   `clamp(⌊1 / (p95/target + 0.1)⌋, 1, 20)`
//!
//! Additive decrease and multiplicative-on-error backoff keep the loop from
//! oscillating.
//!
//! # Shrinking without revocation
//!
//! Growing adds permits. Shrinking never revokes a permit that a request is
//! holding: the pool tracks how many permits are in circulation, and while
//! that count exceeds the target, released permits are discarded instead of
//! returned. The pool drains to the new size as requests finish.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::metrics::{RPC_PARALLELISM, RPC_REQUESTS};

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// How often the parallelism target is re-evaluated.
const ADJUST_INTERVAL: Duration = Duration::from_secs(5);

/// Sliding window over which request samples are considered.
const SAMPLE_WINDOW: Duration = Duration::from_secs(60);

/// Minimum samples in the window before any adjustment is made.
const MIN_SAMPLES: usize = 10;

/// Window error count above which parallelism is halved.
const ERROR_THRESHOLD: usize = 10;

/// Step for latency-driven reduction.
const LATENCY_SHRINK_STEP: usize = 2;

/// Cap on additive growth per adjustment.
const MAX_GROWTH: usize = 20;

// ═══════════════════════════════════════════════════════════════════════════════
// ADAPTIVE CONTROLLER
// ═══════════════════════════════════════════════════════════════════════════════

/// One request observation.
#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    duration: Duration,
    success: bool,
}

/// Permit-pool bookkeeping.
#[derive(Debug)]
struct PoolState {
    /// Parallelism the controller is steering toward.
    target: usize,
    /// Permits in circulation (available + held). Trails `target` downward
    /// because shrink discards releases instead of revoking.
    in_circulation: usize,
}

/// Feedback-controlled concurrency limiter for RPC calls.
///
/// The controller itself never fails; [`execute`](Self::execute) propagates
/// the wrapped call's result unchanged.
pub struct AdaptiveController {
    semaphore: Semaphore,
    pool: Mutex<PoolState>,
    samples: Mutex<VecDeque<Sample>>,
    min: usize,
    max: usize,
    max_latency: Duration,
    p95_micros: AtomicU64,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for AdaptiveController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveController")
            .field("min", &self.min)
            .field("max", &self.max)
            .field("target", &self.pool.lock().target)
            .finish_non_exhaustive()
    }
}

/// Returns the in-circulation permit to the pool when an execution finishes
/// or is cancelled mid-flight.
struct PermitGuard<'a> {
    controller: &'a AdaptiveController,
}

impl Drop for PermitGuard<'_> {
    fn drop(&mut self) {
        self.controller.release();
    }
}

impl AdaptiveController {
    /// Create a controller and start its adjustment loop.
    ///
    /// Parallelism starts at `max_parallelism`; the error backoff pulls an
    /// over-optimistic start down within one adjustment period.
    #[must_use]
    pub fn new(max_parallelism: usize, max_latency: Duration) -> Arc<Self> {
        let max = max_parallelism.max(2);
        let min = (max / 10).max(2);

        let controller = Arc::new(Self {
            semaphore: Semaphore::new(max),
            pool: Mutex::new(PoolState {
                target: max,
                in_circulation: max,
            }),
            samples: Mutex::new(VecDeque::new()),
            min,
            max,
            max_latency,
            p95_micros: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        });

        let adjust_controller = Arc::clone(&controller);
        let cancel = controller.cancel.child_token();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = sleep(ADJUST_INTERVAL) => adjust_controller.adjust(),
                }
            }
        });
        *controller.handle.lock() = Some(handle);

        info!(min, max, max_latency_ms = max_latency.as_millis() as u64, "Adaptive controller started");
        controller
    }

    /// Acquire a permit, run `f`, record the outcome, release the permit.
    ///
    /// The outer `Result` reports cancellation while waiting for a permit;
    /// the inner one is `f`'s own result, passed through untouched.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ShutdownRequested`] if `cancel` fires before a
    /// permit is acquired.
    pub async fn execute<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<std::result::Result<T, E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AppError::ShutdownRequested),
            permit = self.semaphore.acquire() => {
                permit.map_err(|_| AppError::ShutdownRequested)?
            }
        };
        // Ownership moves to the guard so a dropped future still returns
        // its slot to the pool.
        permit.forget();
        let _guard = PermitGuard { controller: self };

        let started = Instant::now();
        let outcome = f().await;
        self.record(started.elapsed(), outcome.is_ok());
        Ok(outcome)
    }

    /// Parallelism limit currently in force.
    #[must_use]
    pub fn current_parallelism(&self) -> usize {
        self.pool.lock().target
    }

    /// P95 latency computed at the last adjustment.
    #[must_use]
    pub fn p95_latency(&self) -> Duration {
        Duration::from_micros(self.p95_micros.load(Ordering::Relaxed))
    }

    /// Stop the adjustment loop and wait for it to exit.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Record one request observation.
    fn record(&self, duration: Duration, success: bool) {
        let status = if success { "ok" } else { "error" };
        counter!(RPC_REQUESTS, "status" => status).increment(1);

        let mut samples = self.samples.lock();
        let now = Instant::now();
        while samples
            .front()
            .is_some_and(|s| now.duration_since(s.at) > SAMPLE_WINDOW)
        {
            samples.pop_front();
        }
        samples.push_back(Sample {
            at: now,
            duration,
            success,
        });
    }

    /// One adjustment pass over the sample window.
    fn adjust(&self) {
        let now = Instant::now();
        let (errors, p95) = {
            let mut samples = self.samples.lock();
            while samples
                .front()
                .is_some_and(|s| now.duration_since(s.at) > SAMPLE_WINDOW)
            {
                samples.pop_front();
            }
            if samples.len() < MIN_SAMPLES {
                debug!(samples = samples.len(), "Too few samples, skipping adjustment");
                return;
            }

            let errors = samples.iter().filter(|s| !s.success).count();
            let mut durations: Vec<Duration> = samples.iter().map(|s| s.duration).collect();
            durations.sort_unstable();
            let index = (durations.len() * 95).div_ceil(100).saturating_sub(1);
            (errors, durations[index])
        };

        self.p95_micros
            .store(u64::try_from(p95.as_micros()).unwrap_or(u64::MAX), Ordering::Relaxed);

        let target_latency = self.max_latency / 2;
        let current = self.current_parallelism();
        let mut next = current;

        if errors > ERROR_THRESHOLD {
            next = current / 2;
        } else if p95 > self.max_latency {
            next = current.saturating_sub(LATENCY_SHRINK_STEP);
        } else if p95 < target_latency {
            // The further below target, the harder we push, capped so one
            // pass never more than doubles a small pool.
            let ratio = p95.as_secs_f64() / target_latency.as_secs_f64();
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let growth = (1.0 / (ratio + 0.1)).floor() as usize;
            next = current + growth.clamp(1, MAX_GROWTH);
        }

        let next = next.clamp(self.min, self.max);
        if next != current {
            info!(
                from = current,
                to = next,
                errors,
                p95_ms = p95.as_millis() as u64,
                "Adjusted RPC parallelism"
            );
        }
        self.apply_target(next);
        gauge!(RPC_PARALLELISM).set(next as f64);
    }

    /// Move the pool toward `next`: growth adds permits immediately, shrink
    /// lets releases drain the difference.
    fn apply_target(&self, next: usize) {
        let mut pool = self.pool.lock();
        pool.target = next;
        if pool.in_circulation < next {
            let add = next - pool.in_circulation;
            pool.in_circulation = next;
            self.semaphore.add_permits(add);
        }
    }

    /// Return one permit, or discard it while the pool is over target.
    fn release(&self) {
        let mut pool = self.pool.lock();
        if pool.in_circulation > pool.target {
            pool.in_circulation -= 1;
        } else {
            self.semaphore.add_permits(1);
        }
    }

    #[cfg(test)]
    fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    #[cfg(test)]
    fn clear_samples(&self) {
        self.samples.lock().clear();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
