// src/server/spawner.rs

//! Spawns the controller's background agents, each with its own shutdown
//! receiver.

use crate::core::state::ControllerState;
use crate::core::tasks::cred_sweeper::CredSweeper;
use crate::core::tasks::health::HealthAgent;
use crate::core::tasks::purge::PurgeAgent;
use crate::core::tasks::rollup_driver::RollupAgent;
use crate::core::tasks::scheduler::SchedulerAgent;
use crate::core::tasks::state_save::StateSaveAgent;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

pub fn spawn_background_tasks(state: &Arc<ControllerState>) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    handles.push(tokio::spawn(
        SchedulerAgent::new(state.clone()).run(state.shutdown_tx.subscribe()),
    ));
    handles.push(tokio::spawn(
        HealthAgent::new(state.clone()).run(state.shutdown_tx.subscribe()),
    ));
    handles.push(tokio::spawn(
        RollupAgent::new(state.clone()).run(state.shutdown_tx.subscribe()),
    ));
    handles.push(tokio::spawn(
        PurgeAgent::new(state.clone()).run(state.shutdown_tx.subscribe()),
    ));
    handles.push(tokio::spawn(
        CredSweeper::new(state.clone()).run(state.shutdown_tx.subscribe()),
    ));
    handles.push(tokio::spawn(
        StateSaveAgent::new(state.clone()).run(state.shutdown_tx.subscribe()),
    ));

    info!(agents = handles.len(), "background agents spawned");
    handles
}
