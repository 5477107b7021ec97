// src/core/state/step_mgr.rs

//! Step lifecycle: carving sub-allocations out of running jobs, issuing
//! their launch credentials and interconnect contexts, and settling the
//! owning job when the last step drains.

use crate::core::LatticeError;
use crate::core::cred::{CredPayload, Identity, LaunchPayload, NetPayload, NodeAlias};
use crate::core::locks::{LockLevel, LockRequest};
use crate::core::model::{JobState, STEP_BATCH, STEP_INTERACTIVE, StepRecord, StepRequest};
use crate::core::state::{ControllerState, job_mgr, now};
use tracing::{debug, info};

/// Regular step ids stay below this; the reserved batch/interactive ids
/// sit at the top of the u32 range.
const MAX_STEP_ID: u32 = 64_000;

/// What the step creator hands back: the assignment, the interconnect
/// context, and the launch credential for the compute side.
#[derive(Debug, Clone)]
pub struct StepCreateResponse {
    pub job_id: u32,
    pub step_id: u32,
    pub node_list: String,
    pub switch_ctx: u64,
    pub credential: Vec<u8>,
    /// Net-alias credential carrying the step's node-address table.
    /// Restarted tasks may legitimately re-present it, so replay is
    /// allowed for this one within its lifetime.
    pub net_credential: Vec<u8>,
}

/// Creates a step inside a running job: picks the node subset, builds the
/// interconnect context, and issues the step's one launch credential.
pub fn step_create(
    state: &ControllerState,
    req: &StepRequest,
) -> Result<StepCreateResponse, LatticeError> {
    let tnow = now();
    let mut ls = state.lock(LockRequest {
        jobs: LockLevel::Write,
        nodes: LockLevel::Read,
        ..Default::default()
    });

    // Resolve the node subset against the nodes table before mutating the
    // job, so failures leave the job untouched.
    let (job_bitmap, user_id, group_id) = {
        let job = ls
            .jobs()
            .get(req.job_id)
            .ok_or(LatticeError::InvalidJobId(req.job_id))?;
        if job.state != JobState::Running {
            return Err(LatticeError::JobNotRunning);
        }
        if req.user_id != job.user_id && req.user_id != 0 {
            return Err(LatticeError::AccessDenied);
        }
        let bitmap = job
            .node_bitmap
            .clone()
            .ok_or(LatticeError::JobNotRunning)?;
        (bitmap, job.user_id, job.group_id)
    };

    let step_bitmap = match &req.node_list {
        Some(expr) => {
            let wanted = ls.nodes().name2bitmap(expr)?;
            if !job_bitmap.is_superset_of(&wanted) {
                return Err(LatticeError::RequiredNodeNotAvailable(expr.clone()));
            }
            wanted
        }
        None if req.node_count == 0 => job_bitmap.clone(),
        None => {
            let mut subset = crate::core::Bitmap::new(job_bitmap.len());
            let mut taken = 0;
            for idx in job_bitmap.iter_set() {
                if taken == req.node_count {
                    break;
                }
                subset.set(idx);
                taken += 1;
            }
            if taken < req.node_count {
                return Err(LatticeError::InvalidNodeCount);
            }
            subset
        }
    };
    let node_list = ls.nodes().bitmap2names(&step_bitmap);

    let step_id = {
        let job = ls.jobs_mut().get_mut(req.job_id).expect("checked above");
        match req.reserved_id {
            Some(id @ (STEP_BATCH | STEP_INTERACTIVE)) => {
                if job.steps.iter().any(|s| s.step_id == id) {
                    return Err(LatticeError::AlreadyDone);
                }
                id
            }
            Some(_) => return Err(LatticeError::BadDistribution),
            None => {
                if job.next_step_id >= MAX_STEP_ID {
                    return Err(LatticeError::StepLimit);
                }
                let id = job.next_step_id;
                job.next_step_id += 1;
                id
            }
        }
    };

    // Interconnect context construction is opaque to the controller;
    // failures surface as INTERCONNECT_FAILURE.
    let switch_ctx = state
        .topology
        .make_context(req.job_id, step_id, &step_bitmap)
        .map_err(|e| LatticeError::InterconnectFailure(e.to_string()))?;

    let credential = state.cred.issue(
        CredPayload::Launch(LaunchPayload {
            job_id: req.job_id,
            step_id,
            node_list: node_list.clone(),
            identity: Identity {
                uid: user_id,
                gid: group_id,
                user_name: String::new(),
                gids: vec![group_id],
            },
        }),
        user_id,
        group_id,
        tnow,
    )?;

    let aliases: Vec<NodeAlias> = step_bitmap
        .iter_set()
        .filter_map(|idx| ls.nodes().nodes.get(idx))
        .map(|n| NodeAlias {
            node: n.name.clone(),
            addr: n.addr.clone(),
            port: n.port,
        })
        .collect();
    let net_credential = state.cred.issue(
        CredPayload::Net(NetPayload {
            job_id: req.job_id,
            aliases,
        }),
        user_id,
        group_id,
        tnow,
    )?;

    let job = ls.jobs_mut().get_mut(req.job_id).expect("checked above");
    job.steps.push(StepRecord {
        step_id,
        node_bitmap: step_bitmap,
        nodes: node_list.clone(),
        switch_ctx: Some(switch_ctx),
        num_tasks: req.num_tasks,
        start_time: tnow,
        end_time: None,
    });
    info!(job_id = req.job_id, step_id, nodes = %node_list, "step created");

    Ok(StepCreateResponse {
        job_id: req.job_id,
        step_id,
        node_list,
        switch_ctx,
        credential,
        net_credential,
    })
}

/// Marks a step complete. When the owning job is draining in COMPLETING
/// and this was the last live step, the job settles into its pending
/// terminal state.
pub fn step_complete(
    state: &ControllerState,
    job_id: u32,
    step_id: u32,
) -> Result<(), LatticeError> {
    let tnow = now();
    let mut ls = state.lock(LockRequest {
        jobs: LockLevel::Write,
        nodes: LockLevel::Write,
        ..Default::default()
    });
    let (jobs, nodes) = ls.jobs_nodes_mut();

    let job = jobs.get_mut(job_id).ok_or(LatticeError::InvalidJobId(job_id))?;
    let step = job
        .steps
        .iter_mut()
        .find(|s| s.step_id == step_id)
        .ok_or(LatticeError::InvalidJobId(job_id))?;
    if step.end_time.is_some() {
        return Err(LatticeError::AlreadyDone);
    }
    step.end_time = Some(tnow);
    if let Some(ctx) = step.switch_ctx.take() {
        debug!(job_id, step_id, ctx, "interconnect context released");
    }

    let all_done = job.steps.iter().all(|s| s.end_time.is_some());
    if job.state == JobState::Completing && all_done {
        let terminal = job.pending_terminal.unwrap_or(JobState::Completed);
        job_mgr::finalize_job(jobs, nodes, job_id, terminal, tnow);
    }
    Ok(())
}

/// Cancels one step: its record ends and its nodes fall back to the job
/// (the job's allocation is untouched).
pub fn cancel_step(
    state: &ControllerState,
    job_id: u32,
    step_id: u32,
) -> Result<(), LatticeError> {
    step_complete(state, job_id, step_id)
}
