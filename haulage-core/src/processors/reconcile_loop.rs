//! ReconcileLoop processor.
//!
//! Runs [`Engine::reconcile`] on the configured interval. The first pass
//! runs immediately at startup.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::clock::{Cancellation, Clock, OpContext};
use crate::engine::Engine;
use crate::error::DispatchError;

pub struct ReconcileLoop {
    engine: Arc<Engine>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl ReconcileLoop {
    pub fn new(engine: Arc<Engine>, clock: Arc<dyn Clock>) -> Self {
        let interval = engine.settings().reconciler.interval;
        Self {
            engine,
            clock,
            interval,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(interval = ?self.interval, "ReconcileLoop started");
        let cancel = Cancellation::from_watch(shutdown_rx.clone());
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("ReconcileLoop received shutdown signal");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    let ctx = OpContext::system(Arc::clone(&self.clock)).with_cancel(cancel.clone());
                    match self.engine.reconcile(&ctx).await {
                        Ok(summary) if summary.errors > 0 => {
                            warn!(errors = summary.errors, "Reconciliation finished with errors");
                        }
                        Ok(_) => {}
                        Err(DispatchError::Cancelled) => info!("Reconciliation interrupted"),
                        Err(e) => error!(error = %e, "Reconciliation failed"),
                    }
                }
            }
        }

        info!("ReconcileLoop shutdown complete");
    }
}
