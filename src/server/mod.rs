// src/server/mod.rs

//! Server composition: initialization, the accept loop, the background
//! task spawner, and the metrics exporter.

pub mod connection_loop;
pub mod initialization;
pub mod metrics_server;
pub mod spawner;

use crate::config::Config;
use anyhow::Result;
use tracing::info;

/// Brings the controller up and runs until a shutdown signal.
pub async fn run(config: Config) -> Result<()> {
    let state = initialization::build_controller(config)?;

    let conf = state.config();
    if conf.metrics_enabled {
        tokio::spawn(metrics_server::run(conf.metrics_port));
    }

    let handles = spawner::spawn_background_tasks(&state);
    let listener = connection_loop::bind(&state).await?;
    info!(port = conf.controller_port, "controller ready");

    tokio::select! {
        result = connection_loop::serve(state.clone(), listener) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    // Signal every agent, then wait for them to drain (the state-save
    // agent writes its final checkpoint here).
    let _ = state.shutdown_tx.send(());
    for handle in handles {
        let _ = handle.await;
    }
    info!("controller stopped");
    Ok(())
}
