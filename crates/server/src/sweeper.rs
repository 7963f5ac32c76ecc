//! Background task that moves lapsed open quotes to `expired`.
//!
//! Reads already present the effective status, so the sweep only makes the
//! stored state and history catch up.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::service::{QuoteService, RequestContext, EXPIRY_SWEEP_ACTOR};

pub struct ExpirySweeper {
    service: Arc<QuoteService>,
    period: Duration,
}

impl ExpirySweeper {
    pub fn new(service: Arc<QuoteService>, period: Duration) -> Self {
        Self { service, period }
    }

    /// Spawns the sweep loop. A zero period disables it and returns `None`.
    /// The loop exits once `shutdown` flips to `true` or its sender drops.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        if self.period.is_zero() {
            info!(event_name = "system.expiry_sweep.disabled", "expiry sweep disabled");
            return None;
        }

        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                event_name = "system.expiry_sweep.start",
                period_secs = self.period.as_secs_f64(),
                "expiry sweep started"
            );

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.run_once().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!(event_name = "system.expiry_sweep.stop", "expiry sweep stopped");
        }))
    }

    /// Runs a single sweep and returns how many quotes expired.
    pub async fn run_once(&self) -> usize {
        let ctx = RequestContext::system(EXPIRY_SWEEP_ACTOR);
        match self.service.expire_overdue(&ctx).await {
            Ok(transitions) => {
                debug!(
                    event_name = "system.expiry_sweep.tick",
                    correlation_id = %ctx.correlation_id,
                    expired = transitions.len(),
                    "expiry sweep tick"
                );
                transitions.len()
            }
            Err(error) => {
                warn!(
                    event_name = "system.expiry_sweep.failed",
                    correlation_id = %ctx.correlation_id,
                    error = %error,
                    "expiry sweep failed"
                );
                0
            }
        }
    }
}
