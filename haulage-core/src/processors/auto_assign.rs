//! AutoAssignScheduler processor.
//!
//! Receives `AutoAssignRequest`s for escalated urgent jobs and, after each
//! request's delay, calls [`Engine::auto_assign`]. Pending timers are dropped
//! on shutdown.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::clock::{Cancellation, Clock, OpContext};
use crate::engine::Engine;
use crate::error::DispatchError;
use crate::events::{AutoAssignReceiver, AutoAssignRequest};

pub struct AutoAssignScheduler {
    engine: Arc<Engine>,
    clock: Arc<dyn Clock>,
}

impl AutoAssignScheduler {
    pub fn new(engine: Arc<Engine>, clock: Arc<dyn Clock>) -> Self {
        Self { engine, clock }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>, mut rx: AutoAssignReceiver) {
        info!("AutoAssignScheduler started");
        let cancel = Cancellation::from_watch(shutdown_rx.clone());
        let mut timers = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("AutoAssignScheduler received shutdown signal");
                        break;
                    }
                }

                Some(request) = rx.recv() => {
                    debug!(job_id = %request.job_id, delay = ?request.delay, "Auto-assign scheduled");
                    let ctx = OpContext::system(Arc::clone(&self.clock)).with_cancel(cancel.clone());
                    timers.spawn(attempt(Arc::clone(&self.engine), ctx, request));
                }

                Some(joined) = timers.join_next(), if !timers.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Auto-assign task failed");
                    }
                }

                else => {
                    info!("AutoAssignRequest channel closed");
                    break;
                }
            }
        }

        timers.shutdown().await;
        info!("AutoAssignScheduler shutdown complete");
    }
}

async fn attempt(engine: Arc<Engine>, ctx: OpContext, request: AutoAssignRequest) {
    if ctx.cancel.sleep(request.delay).await.is_err() {
        return;
    }
    match engine.auto_assign(&ctx, request.job_id).await {
        Ok(Some(job)) => info!(
            job_id = %job.id,
            provider_id = ?job.assigned_provider,
            "Urgent job auto-assigned"
        ),
        Ok(None) => info!(job_id = %request.job_id, "Auto-assign made no assignment"),
        Err(DispatchError::Cancelled) => {}
        Err(e) => warn!(job_id = %request.job_id, error = %e, "Auto-assign failed"),
    }
}
