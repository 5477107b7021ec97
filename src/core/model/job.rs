// src/core/model/job.rs

//! Job records, submission requests, and update diffs.

use crate::core::Bitmap;
use crate::core::model::step::StepRecord;
use crate::core::rpc::pack::NO_VAL;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Job lifecycle states. `Completing` is entered while steps or epilogs
/// are still winding down; every transition out of it is irreversible.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum JobState {
    #[default]
    Pending,
    Running,
    Suspended,
    Completing,
    Completed,
    Cancelled,
    Failed,
    Timeout,
    NodeFail,
}

impl JobState {
    /// True once the job has reached a terminal state.
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Cancelled | JobState::Failed | JobState::Timeout | JobState::NodeFail
        )
    }

    /// True while the job holds an allocation.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            JobState::Running | JobState::Suspended | JobState::Completing
        )
    }
}

/// How tasks are laid out across the allocated nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[strum(serialize_all = "lowercase")]
pub enum TaskDist {
    Cyclic,
    #[default]
    Block,
    Plane,
}

/// Constraints attached to a job at submission, dropped once the job
/// terminates and its detail record is purged.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDetails {
    /// Minimum total processors.
    pub num_procs: u32,
    /// Minimum node count.
    pub min_nodes: u32,
    /// Maximum node count, `NO_VAL` for unlimited.
    pub max_nodes: u32,
    /// Nodes that must be part of the allocation.
    pub req_nodes: String,
    pub req_node_bitmap: Option<Bitmap>,
    pub features: Vec<String>,
    pub shared: bool,
    pub contiguous: bool,
    /// Per-node minimums.
    pub min_procs_per_node: u32,
    pub min_memory: u32,
    pub min_tmp_disk: u32,
    pub exclusive: bool,
    pub num_tasks: u32,
    pub dist: TaskDist,
    pub plane_size: u16,
    /// Socket-level placement constraints, `NO_VAL` when unconstrained.
    pub min_sockets: u32,
    pub max_sockets: u32,
    pub min_cores_per_socket: u32,
    pub min_threads_per_core: u32,
}

impl Default for JobDetails {
    fn default() -> Self {
        Self {
            num_procs: 1,
            min_nodes: 1,
            max_nodes: NO_VAL,
            req_nodes: String::new(),
            req_node_bitmap: None,
            features: Vec::new(),
            shared: false,
            contiguous: false,
            min_procs_per_node: 1,
            min_memory: 0,
            min_tmp_disk: 0,
            exclusive: false,
            num_tasks: 0,
            dist: TaskDist::Cyclic,
            plane_size: 1,
            min_sockets: NO_VAL,
            max_sockets: NO_VAL,
            min_cores_per_socket: NO_VAL,
            min_threads_per_core: NO_VAL,
        }
    }
}

/// One submitted work unit.
#[derive(Debug, Clone)]
pub struct JobRecord {
    /// Globally unique, stable across controller restarts.
    pub job_id: u32,
    pub name: String,
    pub user_id: u32,
    pub group_id: u32,
    /// Partition name and its table index at allocation time.
    pub partition: String,
    pub part_idx: usize,
    pub state: JobState,
    pub details: Option<JobDetails>,
    /// Rendered form of the allocated node set.
    pub nodes: String,
    pub node_bitmap: Option<Bitmap>,
    /// Allocated CPUs as `(count, repetitions)` runs over the node list.
    pub cpus_per_node: Vec<u32>,
    pub cpu_count_reps: Vec<u32>,
    /// Wall limit in minutes, `NO_VAL` for infinite.
    pub time_limit: u32,
    pub submit_time: i64,
    /// When the job became eligible to run; pending time before this is
    /// not billed as reserved.
    pub eligible_time: i64,
    pub start_time: i64,
    pub end_time: i64,
    /// In-window suspensions as `[from, to)` pairs, consulted by the rollup.
    pub suspend_intervals: Vec<(i64, i64)>,
    pub priority: u32,
    pub next_step_id: u32,
    pub steps: Vec<StepRecord>,
    pub array_task_id: Option<u32>,
    pub het_component: Option<u32>,
    /// Opaque interconnect parameters, interpreted only by the topology
    /// plugin.
    pub topo_params: Option<String>,
    /// Consumable-resource row charged per allocated node, recorded so
    /// the release at job end hits the same rows.
    pub alloc_rows: Vec<(usize, usize)>,
    pub dependency: Option<String>,
    pub reservation_id: Option<u32>,
    pub assoc_id: Option<u32>,
    pub wckey: Option<String>,
    pub batch: bool,
    pub kill_on_node_fail: bool,
    pub exit_code: Option<i32>,
    /// Terminal state to settle into once the last step drains out of
    /// `Completing`.
    pub pending_terminal: Option<JobState>,
}

impl JobRecord {
    /// Total CPUs allocated, computed from the run-length vectors.
    pub fn total_alloc_cpus(&self) -> u32 {
        self.cpus_per_node
            .iter()
            .zip(&self.cpu_count_reps)
            .map(|(c, r)| c * r)
            .sum()
    }

    /// Folds a per-node CPU vector into `(count, repetitions)` runs.
    pub fn set_cpu_runs(&mut self, per_node: &[u32]) {
        self.cpus_per_node.clear();
        self.cpu_count_reps.clear();
        for &cpus in per_node {
            match self.cpus_per_node.last() {
                Some(&last) if last == cpus => {
                    *self.cpu_count_reps.last_mut().unwrap() += 1;
                }
                _ => {
                    self.cpus_per_node.push(cpus);
                    self.cpu_count_reps.push(1);
                }
            }
        }
    }

    /// Seconds spent suspended inside `[start, end)`.
    pub fn suspended_secs_in(&self, start: i64, end: i64) -> i64 {
        self.suspend_intervals
            .iter()
            .map(|&(s, e)| (e.min(end) - s.max(start)).max(0))
            .sum()
    }
}

/// A job submission request, already authenticated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobSubmit {
    pub name: String,
    pub user_id: u32,
    pub group_id: u32,
    /// User and group names resolved by the caller; the group name is
    /// matched against AllowGroups, the user name against associations.
    pub user_name: String,
    pub group_name: String,
    /// Empty selects the default partition.
    pub partition: String,
    pub details: JobDetails,
    pub time_limit: u32,
    /// Fail now with NodesBusy unless resources are free immediately.
    pub immediate: bool,
    /// Simulate selection only; nothing is enqueued.
    pub will_run: bool,
    pub reservation: Option<String>,
    pub wckey: Option<String>,
    pub account: Option<String>,
    pub dependency: Option<String>,
    pub batch: bool,
}

/// Job update diff; same sentinel conventions as partition updates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub job_id: u32,
    pub time_limit: Option<u32>,
    pub priority: Option<u32>,
    /// Request that a priority change survive restarts. Not supported;
    /// refused with `PrioResetFail`.
    pub persist_priority: bool,
    pub name: Option<String>,
    pub dependency: Option<String>,
}
