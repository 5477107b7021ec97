// src/core/tasks/rollup_driver.rs

//! Drives the usage-rollup engine: hourly windows as they close, daily
//! and monthly aggregations at local calendar boundaries, and the
//! optional archive pass after a monthly roll.

use crate::core::accounting::rollup::{
    self, HOUR_SECS, day_start, month_start, next_day_start, next_month_start,
};
use crate::core::accounting::archive;
use crate::core::locks::{LockLevel, LockRequest};
use crate::core::metrics;
use crate::core::state::{ControllerState, now};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};

const DRIVER_INTERVAL: Duration = Duration::from_secs(60);

/// Months of finished event/job rows kept before archival.
const ARCHIVE_RETAIN_MONTHS: i64 = 1;

pub struct RollupAgent {
    state: Arc<ControllerState>,
}

impl RollupAgent {
    pub fn new(state: Arc<ControllerState>) -> Self {
        Self { state }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        // First run starts at the top of the current hour; nothing older
        // is reconstructed.
        {
            let tnow = now();
            let mut ls = self.state.lock(LockRequest {
                usage: LockLevel::Write,
                ..Default::default()
            });
            let usage = ls.usage_mut();
            if usage.last_hour_rollup == 0 {
                usage.last_hour_rollup = tnow - tnow % HOUR_SECS;
            }
            if usage.last_day_rollup == 0 {
                usage.last_day_rollup = day_start(tnow);
            }
            if usage.last_month_rollup == 0 {
                usage.last_month_rollup = month_start(tnow);
            }
        }

        info!("rollup agent started");
        let mut interval = tokio::time::interval(DRIVER_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    metrics::AGENT_ITERATIONS_TOTAL
                        .with_label_values(&["rollup"])
                        .inc();
                    if let Err(e) = self.advance().await {
                        error!(error = %e, "rollup pass failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("rollup agent shutting down");
                    return;
                }
            }
        }
    }

    /// Rolls every window that has fully closed since the last pass.
    async fn advance(&self) -> Result<(), crate::core::LatticeError> {
        let conf = self.state.config();
        let tnow = now();

        // Hourly windows. The watermark is read under the usage lock and
        // written back only after the store emit succeeds.
        loop {
            let start = {
                let ls = self.state.lock(LockRequest {
                    usage: LockLevel::Read,
                    ..Default::default()
                });
                ls.usage().last_hour_rollup
            };
            if start + HOUR_SECS > tnow {
                break;
            }
            rollup::hourly_rollup(
                self.state.store.as_ref(),
                &conf.cluster_name,
                start,
                conf.track_wckey,
            )
            .await?;
            let mut ls = self.state.lock(LockRequest {
                usage: LockLevel::Write,
                ..Default::default()
            });
            ls.usage_mut().last_hour_rollup = start + HOUR_SECS;
        }

        // Daily windows, honoring local calendar boundaries.
        loop {
            let start = {
                let ls = self.state.lock(LockRequest {
                    usage: LockLevel::Read,
                    ..Default::default()
                });
                ls.usage().last_day_rollup
            };
            let end = next_day_start(start);
            if end > tnow {
                break;
            }
            rollup::daily_rollup(self.state.store.as_ref(), tnow, start, end).await?;
            info!(start, end, "daily rollup complete");
            let mut ls = self.state.lock(LockRequest {
                usage: LockLevel::Write,
                ..Default::default()
            });
            ls.usage_mut().last_day_rollup = end;
        }

        // Monthly windows, with archival of rows past the retention
        // horizon after each roll.
        loop {
            let start = {
                let ls = self.state.lock(LockRequest {
                    usage: LockLevel::Read,
                    ..Default::default()
                });
                ls.usage().last_month_rollup
            };
            let end = next_month_start(start);
            if end > tnow {
                break;
            }
            rollup::monthly_rollup(self.state.store.as_ref(), tnow, start, end).await?;
            info!(start, end, "monthly rollup complete");

            let mut cutoff = start;
            for _ in 0..ARCHIVE_RETAIN_MONTHS {
                cutoff = month_start(cutoff - 1);
            }
            let state_dir = PathBuf::from(&conf.state_save_location);
            if let Some(path) =
                archive::archive_old_records(self.state.store.as_ref(), &state_dir, cutoff).await?
            {
                info!(path = %path.display(), "archive written");
            }

            let mut ls = self.state.lock(LockRequest {
                usage: LockLevel::Write,
                ..Default::default()
            });
            ls.usage_mut().last_month_rollup = end;
        }

        Ok(())
    }
}
