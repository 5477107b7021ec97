// src/core/tasks/purge.rs

//! The job purge agent: frees completed jobs past their retention age
//! and sweeps partitions flagged for removal.

use crate::core::metrics;
use crate::core::state::{ControllerState, job_mgr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

pub struct PurgeAgent {
    state: Arc<ControllerState>,
}

impl PurgeAgent {
    pub fn new(state: Arc<ControllerState>) -> Self {
        Self { state }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("purge agent started");
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    metrics::AGENT_ITERATIONS_TOTAL
                        .with_label_values(&["purge"])
                        .inc();
                    let purged = job_mgr::purge_old_jobs(&self.state);
                    if purged > 0 {
                        debug!(purged, "purge pass complete");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("purge agent shutting down");
                    return;
                }
            }
        }
    }
}
