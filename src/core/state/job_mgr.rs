// src/core/state/job_mgr.rs

//! Job lifecycle: submission, allocation, cancellation, modification,
//! completion, and purge.

use crate::core::LatticeError;
use crate::core::accounting::store::{JobRow, StoreOp, TxnAction, TxnInput};
use crate::core::accounting::writer::PreparedWrite;
use crate::core::locks::{LockLevel, LockRequest};
use crate::core::model::{JobRecord, JobState, JobSubmit, JobUpdate};
use crate::core::rpc::pack::NO_VAL;
use crate::core::sched::selector::{SelectContext, select_nodes};
use crate::core::sched::{SelectorKind, cons_res};
use crate::core::state::{ControllerState, JobTable, NodeTable, SchedView, node_mgr, now, part_mgr};
use std::str::FromStr;
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

/// Response to a submission or will-run request.
#[derive(Debug, Clone, Default)]
pub struct JobAllocateResponse {
    /// 0 for a pure will-run simulation.
    pub job_id: u32,
    pub state: JobState,
    pub node_list: String,
    pub cpus_per_node: Vec<u32>,
    pub cpu_count_reps: Vec<u32>,
}

/// Mints a unique job id: the next monotonic candidate at or above the
/// configured floor, wrapping below the ceiling, skipping live ids.
/// Callers hold the jobs write lock, which serializes minting.
pub fn set_job_id(state: &ControllerState, jobs: &JobTable) -> u32 {
    let conf = state.config();
    let mut candidate = state.next_job_id.load(Ordering::Relaxed);
    loop {
        if candidate > conf.max_job_id || candidate < conf.first_job_id {
            candidate = conf.first_job_id;
        }
        if !jobs.jobs.contains_key(&candidate) {
            state.next_job_id.store(candidate + 1, Ordering::Relaxed);
            return candidate;
        }
        candidate += 1;
    }
}

/// Assigns the submission priority through the active prioritizer.
pub fn set_job_prio(state: &ControllerState, submit: &JobSubmit) -> u32 {
    let seq = state.prio_counter.fetch_add(1, Ordering::Relaxed);
    state.prioritizer.assign(seq, submit)
}

fn submit_lock_request() -> LockRequest {
    LockRequest {
        jobs: LockLevel::Write,
        nodes: LockLevel::Write,
        partitions: LockLevel::Read,
        configs: LockLevel::Read,
        associations: LockLevel::Read,
        ..Default::default()
    }
}

/// Validates a submission against partition policy. Runs before any
/// record is materialized so a refusal leaves no trace.
fn validate_submit(
    view: &SchedView,
    submit: &JobSubmit,
    tnow: i64,
) -> Result<(String, usize, Option<u32>, Option<u32>), LatticeError> {
    let part_name = if submit.partition.is_empty() {
        view.partitions
            .default_part()
            .ok_or(LatticeError::DefaultPartitionNotSet)?
            .name
            .clone()
    } else {
        submit.partition.clone()
    };
    let part_idx = view
        .partitions
        .index_of(&part_name)
        .ok_or_else(|| LatticeError::InvalidPartition(part_name.clone()))?;
    let part = view.partitions.by_index(part_idx).expect("index just resolved");

    if !part.state_up || part.to_be_removed {
        return Err(LatticeError::InvalidPartition(part_name));
    }
    if part.root_only && submit.user_id != 0 {
        return Err(LatticeError::AccessDenied);
    }
    if !part.group_allowed(&submit.group_name) {
        return Err(LatticeError::MissingPartitionGroup);
    }
    if part.max_time != NO_VAL && submit.time_limit != NO_VAL && submit.time_limit > part.max_time {
        return Err(LatticeError::InvalidTimeLimit);
    }
    let details = &submit.details;
    if details.min_nodes == 0
        || (details.max_nodes != NO_VAL && details.min_nodes > details.max_nodes)
    {
        return Err(LatticeError::InvalidNodeCount);
    }
    if part.max_nodes != NO_VAL && details.min_nodes > part.max_nodes {
        return Err(LatticeError::InvalidNodeCount);
    }
    if details.min_nodes > part.total_nodes {
        return Err(LatticeError::InvalidNodeCount);
    }
    if part.max_cpus_per_job != NO_VAL && details.num_procs > part.max_cpus_per_job {
        return Err(LatticeError::TooManyCpus);
    }

    // Every requested feature must be configured somewhere in the
    // partition.
    for feature in &details.features {
        let found = part.node_bitmap.iter_set().any(|i| {
            view.configs.configs[view.nodes.nodes[i].config_idx].has_feature(feature)
        });
        if !found {
            return Err(LatticeError::InvalidFeature(feature.clone()));
        }
    }

    // Required nodes must belong to the partition.
    if !details.req_nodes.is_empty() {
        let required = view.nodes.name2bitmap(&details.req_nodes)?;
        if !part.node_bitmap.is_superset_of(&required) {
            return Err(LatticeError::NodesNotInPartition(details.req_nodes.clone()));
        }
    }

    // Reservation must exist, be accessible, and not be over.
    let resv_id = match &submit.reservation {
        Some(name) => {
            let resv = view
                .partitions
                .find_resv(name)
                .ok_or_else(|| LatticeError::InvalidReservation(name.clone()))?;
            if resv.end <= tnow {
                return Err(LatticeError::InvalidReservation(name.clone()));
            }
            if !resv.user_allowed(submit.user_id) {
                return Err(LatticeError::ReservationAccess(name.clone()));
            }
            Some(resv.id)
        }
        None => None,
    };

    // Account resolution: an explicit account must map to an association
    // for this user (or the account itself).
    let assoc_id = match &submit.account {
        Some(acct) => {
            let assoc = view
                .associations
                .find(acct, &submit.user_name, &part_name)
                .or_else(|| view.associations.find(acct, &submit.user_name, ""))
                .or_else(|| view.associations.find(acct, "", ""))
                .ok_or(LatticeError::AccountingPolicy)?;
            Some(assoc.id)
        }
        None => None,
    };

    Ok((part_name, part_idx, resv_id, assoc_id))
}

/// Builds the pending record for a validated submission.
fn materialize_job(
    state: &ControllerState,
    view: &mut SchedView,
    submit: &JobSubmit,
    part_name: String,
    part_idx: usize,
    resv_id: Option<u32>,
    assoc_id: Option<u32>,
    tnow: i64,
) -> u32 {
    let job_id = set_job_id(state, view.jobs);
    let priority = set_job_prio(state, submit);
    let mut req_node_bitmap = None;
    if !submit.details.req_nodes.is_empty() {
        req_node_bitmap = view.nodes.name2bitmap(&submit.details.req_nodes).ok();
    }
    let mut details = submit.details.clone();
    details.req_node_bitmap = req_node_bitmap;

    let job = JobRecord {
        job_id,
        name: submit.name.clone(),
        user_id: submit.user_id,
        group_id: submit.group_id,
        partition: part_name,
        part_idx,
        state: JobState::Pending,
        details: Some(details),
        nodes: String::new(),
        node_bitmap: None,
        cpus_per_node: Vec::new(),
        cpu_count_reps: Vec::new(),
        time_limit: submit.time_limit,
        submit_time: tnow,
        eligible_time: tnow,
        start_time: 0,
        end_time: 0,
        suspend_intervals: Vec::new(),
        priority,
        next_step_id: 0,
        steps: Vec::new(),
        array_task_id: None,
        het_component: None,
        topo_params: None,
        alloc_rows: Vec::new(),
        dependency: submit.dependency.clone(),
        reservation_id: resv_id,
        assoc_id,
        wckey: submit.wckey.clone(),
        batch: submit.batch,
        kill_on_node_fail: true,
        exit_code: None,
        pending_terminal: None,
    };
    view.jobs.jobs.insert(job_id, job);
    job_id
}

/// Runs the selector for one pending job and applies the allocation on
/// success. Returns whether the job started.
fn try_start_job(
    state: &ControllerState,
    view: &mut SchedView,
    job_id: u32,
    tnow: i64,
) -> Result<bool, LatticeError> {
    let conf = state.config();
    let kind = SelectorKind::from_str(&conf.select_type).unwrap_or_default();
    let job = view.jobs.get(job_id).ok_or(LatticeError::InvalidJobId(job_id))?;
    let Some(details) = job.details.clone() else {
        return Err(LatticeError::JobNotPending);
    };
    let part = view
        .partitions
        .by_index(job.part_idx)
        .ok_or_else(|| LatticeError::InvalidPartition(job.partition.clone()))?;
    let resv = job
        .reservation_id
        .and_then(|id| view.partitions.find_resv_by_id(id));
    let topo_params = job.topo_params.clone();

    let ctx = SelectContext {
        details: &details,
        part,
        part_idx: job.part_idx,
        resv,
        topo_params: topo_params.as_deref(),
        kind,
        test_only: false,
    };
    let (alloc, rows) = match select_nodes(&ctx, view.nodes, view.configs, state.topology.as_ref())
    {
        Ok(ok) => ok,
        Err(
            e @ (LatticeError::NodesBusy
            | LatticeError::Fragmentation
            | LatticeError::RequiredNodeNotAvailable(_)),
        ) => {
            debug!(job_id, error = %e, "job stays pending");
            return Ok(false);
        }
        Err(other) => return Err(other),
    };

    let node_list = view.nodes.bitmap2names(&alloc.node_bitmap);
    node_mgr::allocate_nodes(view.nodes, &alloc.node_bitmap);

    let job = view.jobs.get_mut(job_id).expect("job present above");
    job.state = JobState::Running;
    job.start_time = tnow;
    job.end_time = if job.time_limit == NO_VAL {
        0
    } else {
        tnow + i64::from(job.time_limit) * 60
    };
    job.nodes = node_list;
    job.set_cpu_runs(&alloc.per_node_cpus);
    job.node_bitmap = Some(alloc.node_bitmap);
    job.alloc_rows = rows;
    info!(job_id, nodes = %job.nodes, cpus = job.total_alloc_cpus(), "job started");
    Ok(true)
}

fn job_row(job: &JobRecord, cluster: &str) -> JobRow {
    JobRow {
        job_id: job.job_id,
        cluster: cluster.to_string(),
        assoc_id: job.assoc_id.unwrap_or(0),
        wckey: job.wckey.clone().unwrap_or_default(),
        resv_id: job.reservation_id.unwrap_or(0),
        alloc_cpus: if job.cpus_per_node.is_empty() {
            job.details.as_ref().map(|d| d.num_procs).unwrap_or(0)
        } else {
            job.total_alloc_cpus()
        },
        eligible: job.eligible_time,
        start: job.start_time,
        end: if job.state.is_finished() { job.end_time } else { 0 },
        state: job.state.to_string(),
    }
}

fn job_txn(action: TxnAction, job: &JobRecord, actor: &str) -> TxnInput {
    TxnInput {
        timestamp: now(),
        action,
        object: job.job_id.to_string(),
        actor: actor.to_string(),
        info: format!("user={} partition={}", job.user_id, job.partition),
    }
}

/// Submission entry point (`job_allocate`). Validates, materializes,
/// and either starts the job now, simulates (will-run), or leaves it
/// queued for the scheduler agent.
pub async fn job_allocate(
    state: &ControllerState,
    submit: JobSubmit,
) -> Result<JobAllocateResponse, LatticeError> {
    let tnow = now();
    let mut writes: Vec<PreparedWrite> = Vec::new();

    let resp = {
        let mut ls = state.lock(submit_lock_request());
        let mut view = ls.sched_view();
        let (part_name, part_idx, resv_id, assoc_id) = validate_submit(&view, &submit, tnow)?;

        if submit.will_run {
            // Simulation only: run the selector without charging anything
            // and report what would happen.
            let conf = state.config();
            let kind = SelectorKind::from_str(&conf.select_type).unwrap_or_default();
            let part = view.partitions.by_index(part_idx).expect("validated");
            let resv = resv_id.and_then(|id| view.partitions.find_resv_by_id(id));
            let ctx = SelectContext {
                details: &submit.details,
                part,
                part_idx,
                resv,
                topo_params: None,
                kind,
                test_only: true,
            };
            let (alloc, _) =
                select_nodes(&ctx, view.nodes, view.configs, state.topology.as_ref())?;
            let node_list = view.nodes.bitmap2names(&alloc.node_bitmap);
            JobAllocateResponse {
                job_id: 0,
                state: JobState::Pending,
                node_list,
                cpus_per_node: alloc.per_node_cpus,
                cpu_count_reps: Vec::new(),
            }
        } else {
            let job_id = materialize_job(
                state, &mut view, &submit, part_name, part_idx, resv_id, assoc_id, tnow,
            );
            let started = try_start_job(state, &mut view, job_id, tnow)?;
            if submit.immediate && !started {
                // Immediate-or-nothing: withdraw the record entirely.
                view.jobs.jobs.shift_remove(&job_id);
                return Err(LatticeError::NodesBusy);
            }
            let job = view.jobs.get(job_id).expect("just inserted");
            let conf = state.config();
            writes.push(PreparedWrite {
                ops: vec![StoreOp::UpsertJob(job_row(job, &conf.cluster_name))],
                txn: job_txn(TxnAction::AddJob, job, &submit.user_name),
            });
            JobAllocateResponse {
                job_id,
                state: job.state,
                node_list: job.nodes.clone(),
                cpus_per_node: job.cpus_per_node.clone(),
                cpu_count_reps: job.cpu_count_reps.clone(),
            }
        }
    };

    for write in writes {
        if let Err(e) = state.store.commit(write.ops, write.txn).await {
            warn!(error = %e, "accounting write failed; controller state retained");
        }
    }
    Ok(resp)
}

/// One scheduler pass over the pending queue in priority order. Stops at
/// the first job that does not fit, preserving queue order. Returns the
/// started job ids.
pub async fn schedule_tick(state: &ControllerState) -> Vec<u32> {
    let tnow = now();
    let mut started = Vec::new();
    let mut writes: Vec<PreparedWrite> = Vec::new();
    {
        let mut ls = state.lock(submit_lock_request());
        let mut view = ls.sched_view();
        let queue = view.jobs.pending_queue();
        let conf = state.config();
        for job_id in queue {
            match try_start_job(state, &mut view, job_id, tnow) {
                Ok(true) => {
                    let job = view.jobs.get(job_id).expect("started job present");
                    writes.push(PreparedWrite {
                        ops: vec![StoreOp::UpsertJob(job_row(job, &conf.cluster_name))],
                        txn: job_txn(TxnAction::ModifyJob, job, "controller"),
                    });
                    started.push(job_id);
                }
                Ok(false) => break,
                Err(e) => {
                    warn!(job_id, error = %e, "scheduling failure");
                    break;
                }
            }
        }
    }
    for write in writes {
        if let Err(e) = state.store.commit(write.ops, write.txn).await {
            warn!(error = %e, "accounting write failed during scheduler tick");
        }
    }
    started
}

/// Releases a finished job's nodes and consumable-resource charges.
pub(crate) fn release_job_resources(job: &JobRecord, nodes: &mut NodeTable) {
    if let Some(bitmap) = &job.node_bitmap {
        let indices: Vec<usize> = bitmap.iter_set().collect();
        for (slot, &node_idx) in indices.iter().enumerate() {
            let cpus = per_node_cpus_at(job, slot);
            if let Some(&(_, row_idx)) = job.alloc_rows.iter().find(|(n, _)| *n == node_idx) {
                let rows = nodes.cr_rows_mut(node_idx, job.part_idx);
                cons_res::release(rows, row_idx, cpus, None);
            }
            node_mgr::release_node(nodes, node_idx);
        }
        nodes.refresh_state_bitmaps();
    }
}

/// CPUs allocated on the `slot`-th node of the allocation, expanded from
/// the run-length vectors.
fn per_node_cpus_at(job: &JobRecord, slot: usize) -> u32 {
    let mut remaining = slot as u32;
    for (cpus, reps) in job.cpus_per_node.iter().zip(&job.cpu_count_reps) {
        if remaining < *reps {
            return *cpus;
        }
        remaining -= reps;
    }
    0
}

/// Finalizes a job into a terminal state, releasing its resources and
/// dropping the detail record.
pub(crate) fn finalize_job(
    jobs: &mut JobTable,
    nodes: &mut NodeTable,
    job_id: u32,
    terminal: JobState,
    tnow: i64,
) {
    if let Some(job) = jobs.get_mut(job_id) {
        job.state = terminal;
        job.end_time = tnow;
        job.pending_terminal = None;
        job.details = None;
        let job_snapshot = job.clone();
        release_job_resources(&job_snapshot, nodes);
        info!(job_id, state = %terminal, "job finalized");
    }
}

/// Cancels a job (step cancellation lives in the step manager). A cancel
/// on a job that is already completing or finished reports `AlreadyDone`
/// without mutating anything or appending a txn row.
pub async fn cancel_job(state: &ControllerState, job_id: u32, actor: &str) -> Result<JobState, LatticeError> {
    let tnow = now();
    let write;
    let final_state;
    {
        let mut ls = state.lock(submit_lock_request());
        let (jobs, nodes) = ls.jobs_nodes_mut();
        let job = jobs.get(job_id).ok_or(LatticeError::InvalidJobId(job_id))?;
        if job.state.is_finished() || job.state == JobState::Completing {
            return Err(LatticeError::AlreadyDone);
        }

        let has_active_steps = job.steps.iter().any(|s| s.end_time.is_none());
        if job.state == JobState::Pending {
            let job = jobs.get_mut(job_id).expect("checked above");
            job.state = JobState::Cancelled;
            job.end_time = tnow;
            job.details = None;
            final_state = JobState::Cancelled;
        } else if has_active_steps {
            // Steps still running: signal them and wait in COMPLETING;
            // the last step completion settles the terminal state.
            let job = jobs.get_mut(job_id).expect("checked above");
            job.state = JobState::Completing;
            job.pending_terminal = Some(JobState::Cancelled);
            final_state = JobState::Completing;
        } else {
            finalize_job(jobs, nodes, job_id, JobState::Cancelled, tnow);
            final_state = JobState::Cancelled;
        }

        let job = jobs.get(job_id).expect("still present");
        let conf = state.config();
        write = PreparedWrite {
            ops: vec![StoreOp::UpsertJob(job_row(job, &conf.cluster_name))],
            txn: job_txn(TxnAction::CancelJob, job, actor),
        };
    }
    if let Err(e) = state.store.commit(write.ops, write.txn).await {
        warn!(error = %e, "accounting write failed for cancel");
    }
    Ok(final_state)
}

/// Applies a job update diff. Only fields present in the request are
/// touched, and only when the transition is legal.
pub fn modify_job(state: &ControllerState, update: &JobUpdate) -> Result<(), LatticeError> {
    let mut ls = state.lock(LockRequest {
        jobs: LockLevel::Write,
        partitions: LockLevel::Read,
        ..Default::default()
    });
    if update.persist_priority {
        // Priorities are reassigned from scratch on restart; persisting a
        // manual value is not supported.
        return Err(LatticeError::PrioResetFail);
    }
    let max_time = {
        let job = ls
            .jobs()
            .get(update.job_id)
            .ok_or(LatticeError::InvalidJobId(update.job_id))?;
        if job.state.is_finished() {
            return Err(LatticeError::AlreadyDone);
        }
        ls.partitions()
            .by_index(job.part_idx)
            .map(|p| p.max_time)
            .unwrap_or(NO_VAL)
    };

    let job = ls
        .jobs_mut()
        .get_mut(update.job_id)
        .expect("presence checked above");
    if let Some(limit) = update.time_limit {
        let increasing = job.time_limit == NO_VAL || limit > job.time_limit;
        if increasing && max_time != NO_VAL && limit > max_time {
            return Err(LatticeError::InvalidTimeLimit);
        }
        job.time_limit = limit;
        if job.state == JobState::Running {
            job.end_time = if limit == NO_VAL {
                0
            } else {
                job.start_time + i64::from(limit) * 60
            };
        }
    }
    if let Some(priority) = update.priority {
        job.priority = priority;
    }
    if let Some(name) = &update.name {
        job.name = name.clone();
    }
    if let Some(dep) = &update.dependency {
        job.dependency = if dep.is_empty() { None } else { Some(dep.clone()) };
    }
    Ok(())
}

/// Completion report from the compute side.
pub async fn complete_job(
    state: &ControllerState,
    job_id: u32,
    exit_code: i32,
) -> Result<(), LatticeError> {
    let tnow = now();
    let write;
    {
        let mut ls = state.lock(submit_lock_request());
        let (jobs, nodes) = ls.jobs_nodes_mut();
        let job = jobs.get(job_id).ok_or(LatticeError::InvalidJobId(job_id))?;
        if job.state.is_finished() {
            return Err(LatticeError::AlreadyDone);
        }
        if !job.state.is_active() {
            return Err(LatticeError::JobNotRunning);
        }
        let terminal = if exit_code == 0 {
            JobState::Completed
        } else {
            JobState::Failed
        };
        let has_active_steps = job.steps.iter().any(|s| s.end_time.is_none());
        if has_active_steps {
            let job = jobs.get_mut(job_id).expect("checked above");
            job.state = JobState::Completing;
            job.pending_terminal = Some(terminal);
            job.exit_code = Some(exit_code);
        } else {
            let job = jobs.get_mut(job_id).expect("checked above");
            job.exit_code = Some(exit_code);
            finalize_job(jobs, nodes, job_id, terminal, tnow);
        }
        let job = jobs.get(job_id).expect("still present");
        let conf = state.config();
        write = PreparedWrite {
            ops: vec![StoreOp::UpsertJob(job_row(job, &conf.cluster_name))],
            txn: job_txn(TxnAction::CompleteJob, job, "controller"),
        };
    }
    if let Err(e) = state.store.commit(write.ops, write.txn).await {
        warn!(error = %e, "accounting write failed for completion");
    }
    Ok(())
}

/// Suspends a running job, opening a suspend interval.
pub fn suspend_job(state: &ControllerState, job_id: u32) -> Result<(), LatticeError> {
    let tnow = now();
    let mut ls = state.lock(LockRequest {
        jobs: LockLevel::Write,
        ..Default::default()
    });
    let job = ls
        .jobs_mut()
        .get_mut(job_id)
        .ok_or(LatticeError::InvalidJobId(job_id))?;
    if job.state != JobState::Running {
        return Err(LatticeError::JobNotRunning);
    }
    job.state = JobState::Suspended;
    job.suspend_intervals.push((tnow, 0));
    Ok(())
}

/// Resumes a suspended job and records the closed interval in the store.
pub async fn resume_job(state: &ControllerState, job_id: u32) -> Result<(), LatticeError> {
    let tnow = now();
    let suspend_row;
    {
        let mut ls = state.lock(LockRequest {
            jobs: LockLevel::Write,
            ..Default::default()
        });
        let job = ls
            .jobs_mut()
            .get_mut(job_id)
            .ok_or(LatticeError::InvalidJobId(job_id))?;
        if job.state != JobState::Suspended {
            return Err(LatticeError::JobSuspended);
        }
        job.state = JobState::Running;
        let (start, _) = job
            .suspend_intervals
            .pop()
            .ok_or(LatticeError::Internal("suspended job without interval".into()))?;
        job.suspend_intervals.push((start, tnow));
        suspend_row = StoreOp::InsertSuspend(crate::core::accounting::store::SuspendRow {
            job_id,
            start,
            end: tnow,
        });
    }
    if let Err(e) = state
        .store
        .commit(
            vec![suspend_row],
            TxnInput {
                timestamp: tnow,
                action: TxnAction::ModifyJob,
                object: job_id.to_string(),
                actor: "controller".to_string(),
                info: "resume".to_string(),
            },
        )
        .await
    {
        warn!(error = %e, "accounting write failed for resume");
    }
    Ok(())
}

/// Enforces run-time limits: running jobs past their end time move to
/// TIMEOUT. Called from the scheduler agent. Returns timed-out job ids.
pub fn enforce_time_limits(state: &ControllerState) -> Vec<u32> {
    let tnow = now();
    let mut expired = Vec::new();
    let mut ls = state.lock(submit_lock_request());
    let (jobs, nodes) = ls.jobs_nodes_mut();
    let candidates: Vec<u32> = jobs
        .jobs
        .values()
        .filter(|j| j.state == JobState::Running && j.end_time != 0 && j.end_time <= tnow)
        .map(|j| j.job_id)
        .collect();
    for job_id in candidates {
        warn!(job_id, "job exceeded its time limit");
        finalize_job(jobs, nodes, job_id, JobState::Timeout, tnow);
        expired.push(job_id);
    }
    expired
}

/// Background purge: drops finished jobs older than `MinJobAge`, then
/// sweeps partitions flagged for removal. Detail records die with the
/// record; the accounting summary remains in the store.
pub fn purge_old_jobs(state: &ControllerState) -> usize {
    let tnow = now();
    let conf = state.config();
    let mut ls = state.lock(LockRequest {
        jobs: LockLevel::Write,
        nodes: LockLevel::Write,
        partitions: LockLevel::Write,
        ..Default::default()
    });

    let cutoff = tnow - conf.min_job_age as i64;
    let purgeable: Vec<u32> = ls
        .jobs()
        .jobs
        .values()
        .filter(|j| j.state.is_finished() && j.end_time != 0 && j.end_time < cutoff)
        .map(|j| j.job_id)
        .collect();
    let purged = purgeable.len();
    for job_id in &purgeable {
        ls.jobs_mut().jobs.shift_remove(job_id);
    }
    if purged > 0 {
        debug!(purged, "purged completed jobs");
    }

    // Partition removal can only make progress once jobs are gone.
    let (jobs, nodes, parts) = ls.purge_view();
    let removed = part_mgr::sweep_removed_partitions(parts, jobs, nodes);
    if !removed.is_empty() {
        info!(partitions = ?removed, "partitions swept after removal");
    }
    purged
}
