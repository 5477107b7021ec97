// src/core/model/partition.rs

//! Partition records and the diff message that updates them.

use crate::core::Bitmap;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Node-sharing policy for jobs in a partition.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum SharedPolicy {
    #[default]
    No,
    Yes,
    Force,
    Exclusive,
}

/// A named scheduling domain. Exactly one partition carries the default
/// flag at any time; `node_bitmap` is the ground truth for membership and
/// is rebuilt whenever `nodes` changes.
#[derive(Debug, Clone)]
pub struct PartRecord {
    pub name: String,
    /// Maximum job wall time in minutes, `NO_VAL` for infinite.
    pub max_time: u32,
    /// Maximum nodes per job, `NO_VAL` for infinite.
    pub max_nodes: u32,
    /// Maximum CPUs per job, `NO_VAL` for infinite.
    pub max_cpus_per_job: u32,
    pub root_only: bool,
    pub shared: SharedPolicy,
    pub state_up: bool,
    /// Groups permitted to submit; empty means all groups.
    pub allow_groups: Vec<String>,
    /// Configured node list expression.
    pub nodes: String,
    pub node_bitmap: Bitmap,
    pub is_default: bool,
    pub total_nodes: u32,
    pub total_cpus: u32,
    /// Two-phase removal: flagged here, swept once no job references remain.
    pub to_be_removed: bool,
}

impl PartRecord {
    pub fn new(name: String, node_count: usize) -> Self {
        Self {
            name,
            max_time: crate::core::rpc::pack::NO_VAL,
            max_nodes: crate::core::rpc::pack::NO_VAL,
            max_cpus_per_job: crate::core::rpc::pack::NO_VAL,
            root_only: false,
            shared: SharedPolicy::No,
            state_up: true,
            allow_groups: Vec::new(),
            nodes: String::new(),
            node_bitmap: Bitmap::new(node_count),
            is_default: false,
            total_nodes: 0,
            total_cpus: 0,
            to_be_removed: false,
        }
    }

    /// True when `group` may use this partition.
    pub fn group_allowed(&self, group: &str) -> bool {
        self.allow_groups.is_empty() || self.allow_groups.iter().any(|g| g == group)
    }
}

/// Partition update diff. `None` fields are untouched; string fields use
/// `Some(empty)` to mean "clear". The wire form renders `None` as the
/// max-unsigned sentinel (numeric) or the null string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartitionUpdate {
    pub name: String,
    pub max_time: Option<u32>,
    pub max_nodes: Option<u32>,
    pub max_cpus_per_job: Option<u32>,
    pub root_only: Option<bool>,
    pub shared: Option<SharedPolicy>,
    pub state_up: Option<bool>,
    /// `Some("")` clears the group list (all groups allowed).
    pub allow_groups: Option<String>,
    /// Changing this triggers a full bitmap rebuild and node reattachment.
    pub nodes: Option<String>,
    pub set_default: Option<bool>,
}
