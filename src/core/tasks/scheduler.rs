// src/core/tasks/scheduler.rs

//! The periodic scheduler tick: enforce time limits, then walk the
//! pending queue in priority order.

use crate::core::metrics;
use crate::core::rpc::dispatcher::refresh_state_gauges;
use crate::core::state::{ControllerState, job_mgr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

pub struct SchedulerAgent {
    state: Arc<ControllerState>,
}

impl SchedulerAgent {
    pub fn new(state: Arc<ControllerState>) -> Self {
        Self { state }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let interval_secs = self.state.config().sched_interval.max(1);
        info!(interval_secs, "scheduler agent started");
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    metrics::AGENT_ITERATIONS_TOTAL
                        .with_label_values(&["scheduler"])
                        .inc();
                    let expired = job_mgr::enforce_time_limits(&self.state);
                    if !expired.is_empty() {
                        debug!(?expired, "jobs timed out");
                    }
                    let started = job_mgr::schedule_tick(&self.state).await;
                    if !started.is_empty() {
                        debug!(?started, "jobs scheduled");
                    }
                    refresh_state_gauges(&self.state);
                }
                _ = shutdown_rx.recv() => {
                    info!("scheduler agent shutting down");
                    return;
                }
            }
        }
    }
}
