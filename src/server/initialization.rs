// src/server/initialization.rs

//! Builds the controller from a loaded configuration: credential
//! backend, accounting store, topology plugin, tables, and persisted
//! state.

use crate::config::Config;
use crate::core::LatticeError;
use crate::core::accounting::store::MemoryStore;
use crate::core::accounting::writer;
use crate::core::cred::{CredManager, Keyring, signer_for};
use crate::core::persistence::restore_controller_state;
use crate::core::rpc::PROTOCOL_VERSION;
use crate::core::sched::topology;
use crate::core::state::ControllerState;
use std::sync::Arc;
use tracing::{info, warn};

/// Default credential lifetime in seconds.
const CRED_LIFETIME: i64 = 120;

pub fn build_controller(config: Config) -> Result<Arc<ControllerState>, LatticeError> {
    // An unreadable credential key is fatal at startup; runtime failures
    // never are.
    let keyring = Keyring::load(config.cred_key_file.as_deref())?;
    let signer = signer_for(&config.cred_type)?;
    if signer.name() == "none" {
        warn!("running with the 'none' credential backend; test use only");
    }
    let cred = Arc::new(CredManager::new(signer, keyring, CRED_LIFETIME));

    let store = Arc::new(MemoryStore::new());
    let node_count: usize = config
        .nodes
        .iter()
        .filter_map(|line| crate::core::hostlist::expand(&line.names).ok())
        .map(|names| names.len())
        .sum();
    let topo = topology::plugin_for(&config.topology_type, node_count)?;

    let state = ControllerState::initialize(config, cred, store, topo)?;

    if let Err(e) = restore_controller_state(&state) {
        warn!(error = %e, "state restore failed; starting from configuration");
    }

    // Register this controller with accounting. A failure here is
    // logged, not fatal; the registration retries on the next restart.
    let conf = state.config();
    let registration = {
        let state = state.clone();
        async move {
            let result = writer::register_ctld(
                state.store.as_ref(),
                &conf.control_user,
                &conf.cluster_name,
                &conf.control_machine,
                conf.controller_port,
                PROTOCOL_VERSION,
            )
            .await;
            if let Err(e) = result {
                warn!(error = %e, "cluster registration failed");
            }
        }
    };
    tokio::spawn(registration);

    info!(run_id = %state.run_id, "controller initialized");
    Ok(state)
}
