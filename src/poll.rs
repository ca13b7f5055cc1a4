//! Readiness polling.
//!
//! One reusable "bounded asynchronous attempt" primitive replaces the ad hoc
//! interval/timeout timer pairs the problem otherwise invites: probe
//! immediately, then on a fixed interval, until the probe succeeds or the
//! deadline elapses. The recurring timer lives inside the attempt future, so
//! settlement (either way) destroys it; a poller can never fire after it has
//! settled.

use crate::loader::ModuleLoader;
use crate::types::ModuleId;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::{debug, trace};

/// Settled outcome of one readiness poll. Exactly one is produced per
/// identifier per poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Resolved(ModuleId),
    TimedOut(ModuleId),
}

impl PollOutcome {
    pub fn module_id(&self) -> &ModuleId {
        match self {
            PollOutcome::Resolved(id) | PollOutcome::TimedOut(id) => id,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, PollOutcome::Resolved(_))
    }
}

/// Gauge of pollers currently in flight.
///
/// Increments for the lifetime of each poll and decrements on settlement,
/// including cancellation. Test harnesses assert it returns to zero once a
/// gate has settled.
#[derive(Debug, Clone, Default)]
pub struct PollerGauge(Arc<AtomicUsize>);

impl PollerGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn enter(&self) -> GaugeGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        GaugeGuard(Arc::clone(&self.0))
    }
}

struct GaugeGuard(Arc<AtomicUsize>);

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Probe immediately, then every `interval`, until the probe succeeds or
/// `deadline` elapses. Returns whether the probe ever succeeded.
pub async fn bounded_attempt<F>(mut probe: F, interval: Duration, deadline: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let attempt = async {
        // First tick fires immediately.
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if probe() {
                return;
            }
        }
    };

    timeout(deadline, attempt).await.is_ok()
}

/// Bound an arbitrary future by a deadline. Shared by the execution timeout
/// and the channel round-trip timeout.
pub async fn bounded_future<T, Fut>(fut: Fut, deadline: Duration) -> Option<T>
where
    Fut: Future<Output = T>,
{
    timeout(deadline, fut).await.ok()
}

/// Wait for one module to become resolvable.
///
/// Kicks off a best-effort fetch, then polls the loader namespace. Produces
/// exactly one [`PollOutcome`]; never both.
pub async fn await_module(
    loader: &dyn ModuleLoader,
    id: &ModuleId,
    interval: Duration,
    deadline: Duration,
    gauge: &PollerGauge,
) -> PollOutcome {
    let _guard = gauge.enter();

    trace!(module = %id, "polling for module readiness");
    loader.request(std::slice::from_ref(id)).await;

    if bounded_attempt(|| loader.is_defined(id), interval, deadline).await {
        debug!(module = %id, "module resolved");
        PollOutcome::Resolved(id.clone())
    } else {
        debug!(module = %id, timeout_ms = deadline.as_millis() as u64, "module timed out");
        PollOutcome::TimedOut(id.clone())
    }
}
