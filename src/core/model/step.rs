// src/core/model/step.rs

//! Job steps: sub-allocations inside a running job.

use crate::core::Bitmap;
use crate::core::model::job::TaskDist;

/// Reserved step id for the batch script.
pub const STEP_BATCH: u32 = 0xffff_fffe;
/// Reserved step id for an interactive allocation shell.
pub const STEP_INTERACTIVE: u32 = 0xffff_fffd;

/// A sub-allocation within a job. Regular ids count up from zero; the
/// batch and interactive ids are reserved above the monotonic range.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub step_id: u32,
    /// Subset of the owning job's allocation.
    pub node_bitmap: Bitmap,
    pub nodes: String,
    /// Opaque interconnect context handle from the topology allocator.
    pub switch_ctx: Option<u64>,
    pub num_tasks: u32,
    pub start_time: i64,
    pub end_time: Option<i64>,
}

/// Request to carve a step out of a running job.
#[derive(Debug, Clone, Default)]
pub struct StepRequest {
    pub job_id: u32,
    pub user_id: u32,
    /// Node count wanted; 0 takes the whole job allocation.
    pub node_count: u32,
    /// Explicit node list, must be a subset of the job's.
    pub node_list: Option<String>,
    pub num_tasks: u32,
    pub dist: TaskDist,
    /// Reserved id request (batch/interactive) or `None` for the next
    /// monotonic id.
    pub reserved_id: Option<u32>,
}
