// src/core/model/node.rs

//! Node records and their state machine.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Base state of a node. The no-respond condition is tracked separately in
/// [`NodeRecord::no_respond`] because it is orthogonal to the base state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum NodeState {
    #[default]
    Unknown,
    Idle,
    Busy,
    Down,
    Draining,
    Drained,
}

impl NodeState {
    /// True when the node can accept new work.
    pub fn is_schedulable(self) -> bool {
        matches!(self, NodeState::Idle)
    }

    /// True when the node counts toward the up-nodes bitmap.
    pub fn is_up(self) -> bool {
        matches!(self, NodeState::Idle | NodeState::Busy | NodeState::Draining)
    }
}

/// Why a node was drained or downed, and who did it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReason {
    pub text: String,
    pub uid: u32,
    pub time: i64,
}

/// One logical compute element. Created at configuration load, mutated by
/// registration RPCs and the health agent, destroyed only on reconfigure.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    /// Unique node name; also the key in the name index.
    pub name: String,
    /// Communication address advertised in net-alias tables; equals the
    /// name unless the node line set NodeAddr.
    pub addr: String,
    /// Compute-daemon port advertised alongside the address.
    pub port: u16,
    /// Dense index into the node table, stable until reconfigure.
    pub index: usize,
    pub state: NodeState,
    /// Set by the health agent when the node misses its heartbeat window.
    pub no_respond: bool,
    /// Unix time of the last registration or heartbeat, 0 before first contact.
    pub last_response: i64,
    /// Measured resources, reported at registration. Zero until the node
    /// first registers; scheduling against them honors FastSchedule.
    pub cpus: u32,
    pub real_memory: u32,
    pub tmp_disk: u32,
    /// Index of this node's shared configuration record.
    pub config_idx: usize,
    /// Index of the owning partition, if any.
    pub part_idx: Option<usize>,
    pub reason: Option<NodeReason>,
}

impl NodeRecord {
    pub fn new(name: String, addr: String, port: u16, index: usize, config_idx: usize) -> Self {
        Self {
            name,
            addr,
            port,
            index,
            state: NodeState::Unknown,
            no_respond: false,
            last_response: 0,
            cpus: 0,
            real_memory: 0,
            tmp_disk: 0,
            config_idx,
            part_idx: None,
            reason: None,
        }
    }
}
