// src/core/tasks/cred_sweeper.rs

//! The credential-expiry sweeper: evicts replay-cache entries whose
//! window has closed.

use crate::core::metrics;
use crate::core::state::{ControllerState, now};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

const SWEEP_INTERVAL: Duration = Duration::from_secs(120);

pub struct CredSweeper {
    state: Arc<ControllerState>,
}

impl CredSweeper {
    pub fn new(state: Arc<ControllerState>) -> Self {
        Self { state }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("credential sweeper started");
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    metrics::AGENT_ITERATIONS_TOTAL
                        .with_label_values(&["cred_sweeper"])
                        .inc();
                    let swept = self.state.cred.sweep_expired(now());
                    if swept > 0 {
                        debug!(swept, "expired credential entries evicted");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("credential sweeper shutting down");
                    return;
                }
            }
        }
    }
}
