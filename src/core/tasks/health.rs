// src/core/tasks/health.rs

//! The node health probe: flags nodes that missed their response window.

use crate::core::locks::{LockLevel, LockRequest};
use crate::core::metrics;
use crate::core::state::{ControllerState, node_mgr, now};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

pub struct HealthAgent {
    state: Arc<ControllerState>,
}

impl HealthAgent {
    pub fn new(state: Arc<ControllerState>) -> Self {
        Self { state }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let conf = self.state.config();
        let interval_secs = conf.heartbeat_interval.max(1);
        let timeout = conf.node_timeout as i64;
        info!(interval_secs, timeout, "health agent started");
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    metrics::AGENT_ITERATIONS_TOTAL
                        .with_label_values(&["health"])
                        .inc();
                    let flagged = {
                        let mut ls = self.state.lock(LockRequest {
                            nodes: LockLevel::Write,
                            ..Default::default()
                        });
                        node_mgr::flag_unresponsive(ls.nodes_mut(), timeout, now())
                    };
                    if flagged > 0 {
                        warn!(flagged, "nodes flagged not responding");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("health agent shutting down");
                    return;
                }
            }
        }
    }
}
