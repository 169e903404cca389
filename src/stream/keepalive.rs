use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, warn};

use crate::sources::niconico::NegotiatedGrant;

/// Refreshes a negotiated grant. Implementations report success, never error.
#[async_trait]
pub trait KeepAlive: Send + Sync {
    async fn send_keep_alive(&self, grant: &NegotiatedGrant) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct KeepAlivePolicy {
    pub interval: Duration,
    /// Consecutive failures before the grant is considered lost. Never below 1.
    pub max_failures: u32,
}

/// Floor for the keep-alive period; `tokio::time::interval` rejects zero.
pub const MIN_KEEP_ALIVE_INTERVAL: Duration = Duration::from_millis(1);

/// Flags shared between the keep-alive task and its session.
#[derive(Debug, Default)]
pub struct KeepAliveStatus {
    pub lost: AtomicBool,
    pub sent: AtomicU64,
}

impl KeepAliveStatus {
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

/// Marks the grant lost unless the loop exits through cancellation.
struct LossGuard {
    status: Arc<KeepAliveStatus>,
    cancel: CancellationToken,
    armed: bool,
}

impl LossGuard {
    fn lose(&mut self) {
        self.status.lost.store(true, Ordering::Release);
        self.cancel.cancel();
        self.armed = false;
    }
}

impl Drop for LossGuard {
    fn drop(&mut self) {
        if self.armed {
            warn!("keep-alive loop ended abnormally");
            self.lose();
        }
    }
}

/// Signals every `policy.interval`, first tick immediately, until `cancel` fires.
///
/// Losing the grant, or the loop dying for any other reason, marks
/// `status.lost` and cancels `cancel`; teardown is left to the session.
pub fn spawn_keep_alive(
    keeper: Arc<dyn KeepAlive>,
    grant: NegotiatedGrant,
    policy: KeepAlivePolicy,
    status: Arc<KeepAliveStatus>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let span = tracing::Span::current();
    tokio::spawn(
        async move {
            let mut guard = LossGuard {
                status: status.clone(),
                cancel: cancel.clone(),
                armed: true,
            };
            let mut interval = tokio::time::interval(policy.interval.max(MIN_KEEP_ALIVE_INTERVAL));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let max_failures = policy.max_failures.max(1);
            let mut failures = 0u32;

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        guard.armed = false;
                        break;
                    }
                    _ = interval.tick() => {}
                }

                let ok = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        guard.armed = false;
                        break;
                    }
                    ok = keeper.send_keep_alive(&grant) => ok,
                };
                status.sent.fetch_add(1, Ordering::Relaxed);

                if ok {
                    failures = 0;
                    debug!("keep-alive acknowledged");
                    continue;
                }

                failures += 1;
                warn!("keep-alive rejected ({}/{})", failures, max_failures);
                if failures >= max_failures {
                    guard.lose();
                    break;
                }
            }
            debug!("keep-alive loop stopped");
        }
        .instrument(span),
    )
}
