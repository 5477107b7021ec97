// src/core/tasks/state_save.rs

//! Periodic controller-state checkpointing, plus a final save on
//! shutdown.

use crate::core::metrics;
use crate::core::persistence::save_controller_state;
use crate::core::state::ControllerState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};

const SAVE_INTERVAL: Duration = Duration::from_secs(60);

pub struct StateSaveAgent {
    state: Arc<ControllerState>,
}

impl StateSaveAgent {
    pub fn new(state: Arc<ControllerState>) -> Self {
        Self { state }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("state-save agent started");
        let mut interval = tokio::time::interval(SAVE_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    metrics::AGENT_ITERATIONS_TOTAL
                        .with_label_values(&["state_save"])
                        .inc();
                    if let Err(e) = save_controller_state(&self.state) {
                        error!(error = %e, "state save failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    if let Err(e) = save_controller_state(&self.state) {
                        error!(error = %e, "final state save failed");
                    }
                    info!("state-save agent shutting down");
                    return;
                }
            }
        }
    }
}
