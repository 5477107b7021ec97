// src/core/state/node_mgr.rs

//! Node lifecycle: registration, admin drain/down, release, and the
//! no-respond flag maintained by the health agent.

use crate::config::Config;
use crate::core::LatticeError;
use crate::core::model::{NodeState, node::NodeReason};
use crate::core::state::{ConfigTable, NodeTable};
use tracing::{error, info, warn};

/// A node registration report from a compute daemon.
#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub node: String,
    pub cpus: u32,
    pub real_memory: u32,
    pub tmp_disk: u32,
}

/// Handles a node registration: records the measured resources, checks
/// them against the configuration record, and transitions the node into
/// service (or DOWN on an inadequate report). Returns the state before
/// and after, so the caller can emit the matching accounting events.
pub fn register_node(
    nodes: &mut NodeTable,
    configs: &ConfigTable,
    conf: &Config,
    reg: &Registration,
    now: i64,
) -> Result<(NodeState, NodeState), LatticeError> {
    let idx = nodes
        .find_index(&reg.node)
        .ok_or_else(|| LatticeError::InvalidNodeName(reg.node.clone()))?;

    let prev_state = nodes.nodes[idx].state;
    let config = &configs.configs[nodes.nodes[idx].config_idx];
    let inadequate = reg.cpus < config.cpus
        || reg.real_memory < config.real_memory
        || reg.tmp_disk < config.tmp_disk;

    let node = &mut nodes.nodes[idx];
    node.cpus = reg.cpus;
    node.real_memory = reg.real_memory;
    node.tmp_disk = reg.tmp_disk;
    node.last_response = now;
    node.no_respond = false;

    if inadequate {
        let reason = format!(
            "registration below configuration ({}c/{}m/{}d < {}c/{}m/{}d)",
            reg.cpus, reg.real_memory, reg.tmp_disk, config.cpus, config.real_memory,
            config.tmp_disk
        );
        if conf.fast_schedule {
            // Configured values are authoritative; an under-provisioned
            // node cannot be trusted to run at configured size.
            error!(node = %node.name, %reason, "marking node DOWN");
            node.state = NodeState::Down;
            node.reason = Some(NodeReason {
                text: reason,
                uid: 0,
                time: now,
            });
            nodes.refresh_state_bitmaps();
            return Ok((prev_state, NodeState::Down));
        }
        warn!(node = %node.name, %reason, "scheduling from measured values");
    }

    let new_state = match node.state {
        NodeState::Unknown | NodeState::Down => NodeState::Idle,
        other => other,
    };
    if new_state != node.state {
        info!(node = %node.name, from = %node.state, to = %new_state, "node registered");
        node.state = new_state;
        node.reason = None;
    }
    nodes.refresh_state_bitmaps();
    Ok((prev_state, new_state))
}

/// Admin drain: an idle node drains immediately, a busy node finishes its
/// work first.
pub fn drain_node(
    nodes: &mut NodeTable,
    name: &str,
    reason: String,
    reason_uid: u32,
    now: i64,
) -> Result<NodeState, LatticeError> {
    let idx = nodes
        .find_index(name)
        .ok_or_else(|| LatticeError::InvalidNodeName(name.to_string()))?;
    let node = &mut nodes.nodes[idx];
    let new_state = match node.state {
        NodeState::Idle => NodeState::Drained,
        NodeState::Busy => NodeState::Draining,
        NodeState::Draining | NodeState::Drained => return Err(LatticeError::AlreadyDone),
        from => {
            return Err(LatticeError::InvalidNodeState {
                from: from.to_string(),
                to: NodeState::Draining.to_string(),
            });
        }
    };
    info!(node = %node.name, from = %node.state, to = %new_state, %reason, "draining node");
    node.state = new_state;
    node.reason = Some(NodeReason {
        text: reason,
        uid: reason_uid,
        time: now,
    });
    nodes.refresh_state_bitmaps();
    Ok(new_state)
}

/// Admin down or failure: legal from any state.
pub fn down_node(
    nodes: &mut NodeTable,
    name: &str,
    reason: String,
    reason_uid: u32,
    now: i64,
) -> Result<(), LatticeError> {
    let idx = nodes
        .find_index(name)
        .ok_or_else(|| LatticeError::InvalidNodeName(name.to_string()))?;
    let node = &mut nodes.nodes[idx];
    warn!(node = %node.name, from = %node.state, %reason, "marking node DOWN");
    node.state = NodeState::Down;
    node.reason = Some(NodeReason {
        text: reason,
        uid: reason_uid,
        time: now,
    });
    nodes.refresh_state_bitmaps();
    Ok(())
}

/// Releases one node at job end: busy nodes go back to idle, draining
/// nodes complete their drain.
pub fn release_node(nodes: &mut NodeTable, idx: usize) {
    if let Some(node) = nodes.nodes.get_mut(idx) {
        node.state = match node.state {
            NodeState::Busy => NodeState::Idle,
            NodeState::Draining => NodeState::Drained,
            other => other,
        };
    }
}

/// Marks nodes allocated to a job as busy.
pub fn allocate_nodes(nodes: &mut NodeTable, bitmap: &crate::core::Bitmap) {
    for idx in bitmap.iter_set() {
        if let Some(node) = nodes.nodes.get_mut(idx) {
            if node.state == NodeState::Idle {
                node.state = NodeState::Busy;
            }
        }
    }
    nodes.refresh_state_bitmaps();
}

/// Records a heartbeat from a node.
pub fn heartbeat(nodes: &mut NodeTable, name: &str, now: i64) -> Result<(), LatticeError> {
    let idx = nodes
        .find_index(name)
        .ok_or_else(|| LatticeError::InvalidNodeName(name.to_string()))?;
    let node = &mut nodes.nodes[idx];
    node.last_response = now;
    if node.no_respond {
        info!(node = %node.name, "node responding again");
        node.no_respond = false;
        nodes.refresh_state_bitmaps();
    }
    Ok(())
}

/// Health-agent sweep: flags nodes that have missed their response
/// window. The flag is orthogonal to the base state and clears on the
/// next registration or heartbeat. Returns how many nodes were flagged.
pub fn flag_unresponsive(nodes: &mut NodeTable, timeout_secs: i64, now: i64) -> usize {
    let mut flagged = 0;
    for node in nodes.nodes.iter_mut() {
        // Nodes that never registered stay UNKNOWN rather than
        // accumulating a no-respond flag.
        if node.last_response == 0 || node.no_respond {
            continue;
        }
        if now - node.last_response > timeout_secs {
            warn!(
                node = %node.name,
                last_response = node.last_response,
                "node not responding"
            );
            node.no_respond = true;
            flagged += 1;
        }
    }
    if flagged > 0 {
        nodes.refresh_state_bitmaps();
    }
    flagged
}
