//! OfferExpirySweeper processor.
//!
//! Runs [`Engine::sweep_expired_offers`] on a fixed interval: overdue
//! offers are expired, their jobs refilled or escalated, and overloaded
//! providers shed. A sweep interrupted by shutdown is simply picked up on the
//! next start.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::clock::{Cancellation, Clock, OpContext};
use crate::engine::Engine;
use crate::error::DispatchError;

pub struct OfferExpirySweeper {
    engine: Arc<Engine>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl OfferExpirySweeper {
    pub fn new(engine: Arc<Engine>, clock: Arc<dyn Clock>) -> Self {
        let interval = engine.settings().dispatch.expiry_sweep_interval;
        Self {
            engine,
            clock,
            interval,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(interval = ?self.interval, "OfferExpirySweeper started");
        let cancel = Cancellation::from_watch(shutdown_rx.clone());
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("OfferExpirySweeper received shutdown signal");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    let ctx = OpContext::system(Arc::clone(&self.clock)).with_cancel(cancel.clone());
                    match self.engine.sweep_expired_offers(&ctx).await {
                        Ok(summary) => debug!(?summary, "Offer sweep tick"),
                        Err(DispatchError::Cancelled) => debug!("Offer sweep interrupted"),
                        Err(e) => error!(error = %e, "Offer sweep failed"),
                    }
                }
            }
        }

        info!("OfferExpirySweeper shutdown complete");
    }
}
