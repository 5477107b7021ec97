// src/core/persistence/state_save.rs

//! Rolling state files.
//!
//! Each table persists to a triple `<name>.old`, `<name>`, `<name>.new`
//! in the state directory. A save writes `<name>.new`, fsyncs it, rotates
//! the current file to `.old`, and renames `.new` into place, so a crash
//! at any point leaves a loadable file. Files start with
//! `pack32(timestamp)` followed by pack-encoded records and end with a
//! crc32 trailer checked on load.

use crate::core::locks::{LockLevel, LockRequest};
use crate::core::model::{JobDetails, JobRecord, JobState, NodeState, TaskDist};
use crate::core::model::node::NodeReason;
use crate::core::rpc::pack::{PackBuf, UnpackBuf};
use crate::core::state::{ControllerState, now};
use crate::core::{LatticeError, state::node_mgr};
use bytes::Bytes;
use crc::{CRC_32_ISO_HDLC, Crc};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::Ordering;
use tracing::{info, warn};

pub const JOB_STATE_FILE: &str = "job_state";
pub const NODE_STATE_FILE: &str = "node_state";
pub const PART_STATE_FILE: &str = "part_state";

const CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Writes one state file with the atomic new/rotate/rename dance.
fn write_state_file(dir: &Path, name: &str, records: Bytes) -> Result<(), LatticeError> {
    fs::create_dir_all(dir)?;

    let mut body = PackBuf::new();
    body.pack32(now() as u32);
    let mut payload = body.into_bytes().to_vec();
    payload.extend_from_slice(&records);
    let checksum = CRC.checksum(&payload);
    payload.extend_from_slice(&checksum.to_le_bytes());

    let current = dir.join(name);
    let fresh = dir.join(format!("{name}.new"));
    let old = dir.join(format!("{name}.old"));

    let mut file = fs::File::create(&fresh)?;
    file.write_all(&payload)?;
    file.sync_all()?;
    drop(file);

    if current.exists() {
        fs::rename(&current, &old)?;
    }
    fs::rename(&fresh, &current)?;
    Ok(())
}

/// Reads and checksums one state file; `None` when it does not exist.
fn read_state_file(dir: &Path, name: &str) -> Result<Option<(u32, Bytes)>, LatticeError> {
    let path = dir.join(name);
    let payload = match fs::read(&path) {
        Ok(p) => p,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if payload.len() < 8 {
        return Err(LatticeError::ParseFailure(format!(
            "state file '{name}' truncated"
        )));
    }
    let (body, trailer) = payload.split_at(payload.len() - 4);
    let stored = u32::from_le_bytes(trailer.try_into().expect("4-byte trailer"));
    if CRC.checksum(body) != stored {
        return Err(LatticeError::ParseFailure(format!(
            "state file '{name}' failed checksum"
        )));
    }
    let mut buf = UnpackBuf::new(Bytes::copy_from_slice(body));
    let timestamp = buf.unpack32()?;
    Ok(Some((timestamp, buf.take_rest())))
}

fn pack_details(buf: &mut PackBuf, details: &JobDetails) {
    buf.pack32(details.num_procs);
    buf.pack32(details.min_nodes);
    buf.pack32(details.max_nodes);
    buf.packstr(if details.req_nodes.is_empty() {
        None
    } else {
        Some(&details.req_nodes)
    });
    let features_joined = details.features.join(",");
    buf.packstr(if details.features.is_empty() {
        None
    } else {
        Some(&features_joined)
    });
    buf.pack_bool(details.shared);
    buf.pack_bool(details.contiguous);
    buf.pack_bool(details.exclusive);
    buf.pack32(details.min_procs_per_node);
    buf.pack32(details.min_memory);
    buf.pack32(details.min_tmp_disk);
    buf.pack32(details.num_tasks);
    buf.packstr(Some(&details.dist.to_string()));
    buf.pack16(details.plane_size);
}

fn unpack_details(buf: &mut UnpackBuf) -> Result<JobDetails, LatticeError> {
    let mut details = JobDetails {
        num_procs: buf.unpack32()?,
        min_nodes: buf.unpack32()?,
        max_nodes: buf.unpack32()?,
        req_nodes: buf.unpackstr()?.unwrap_or_default(),
        ..Default::default()
    };
    details.features = buf
        .unpackstr()?
        .map(|f| f.split(',').map(|s| s.to_string()).collect())
        .unwrap_or_default();
    details.shared = buf.unpack_bool()?;
    details.contiguous = buf.unpack_bool()?;
    details.exclusive = buf.unpack_bool()?;
    details.min_procs_per_node = buf.unpack32()?;
    details.min_memory = buf.unpack32()?;
    details.min_tmp_disk = buf.unpack32()?;
    details.num_tasks = buf.unpack32()?;
    let dist = buf.unpackstr_required()?;
    details.dist = TaskDist::from_str(&dist).unwrap_or_default();
    details.plane_size = buf.unpack16()?;
    Ok(details)
}

fn encode_jobs(jobs: &crate::core::state::JobTable) -> Bytes {
    let mut buf = PackBuf::new();
    buf.pack32(jobs.jobs.len() as u32);
    for job in jobs.jobs.values() {
        buf.pack32(job.job_id);
        buf.packstr(Some(&job.name));
        buf.pack32(job.user_id);
        buf.pack32(job.group_id);
        buf.packstr(Some(&job.partition));
        buf.packstr(Some(&job.state.to_string()));
        buf.pack32(job.time_limit);
        buf.pack_time(job.submit_time);
        buf.pack_time(job.eligible_time);
        buf.pack_time(job.start_time);
        buf.pack_time(job.end_time);
        buf.pack32(job.priority);
        buf.pack32(job.next_step_id);
        buf.packstr(if job.nodes.is_empty() {
            None
        } else {
            Some(&job.nodes)
        });
        buf.pack32(job.cpus_per_node.len() as u32);
        for (cpus, reps) in job.cpus_per_node.iter().zip(&job.cpu_count_reps) {
            buf.pack32(*cpus);
            buf.pack32(*reps);
        }
        buf.packstr(job.wckey.as_deref());
        buf.pack32(job.assoc_id.unwrap_or(0));
        buf.pack32(job.reservation_id.unwrap_or(0));
        match &job.details {
            Some(details) => {
                buf.pack_bool(true);
                pack_details(&mut buf, details);
            }
            None => buf.pack_bool(false),
        }
    }
    buf.into_bytes()
}

fn encode_nodes(nodes: &crate::core::state::NodeTable) -> Bytes {
    let mut buf = PackBuf::new();
    buf.pack32(nodes.nodes.len() as u32);
    for node in &nodes.nodes {
        buf.packstr(Some(&node.name));
        buf.packstr(Some(&node.state.to_string()));
        buf.pack_bool(node.no_respond);
        buf.pack_time(node.last_response);
        buf.pack32(node.cpus);
        buf.pack32(node.real_memory);
        buf.pack32(node.tmp_disk);
        match &node.reason {
            Some(reason) => {
                buf.pack_bool(true);
                buf.packstr(Some(&reason.text));
                buf.pack32(reason.uid);
                buf.pack_time(reason.time);
            }
            None => buf.pack_bool(false),
        }
    }
    buf.into_bytes()
}

fn encode_parts(parts: &crate::core::state::PartTable) -> Bytes {
    let mut buf = PackBuf::new();
    buf.pack32(parts.parts.len() as u32);
    for part in parts.parts.values() {
        buf.packstr(Some(&part.name));
        buf.pack32(part.max_time);
        buf.pack32(part.max_nodes);
        buf.pack32(part.max_cpus_per_job);
        buf.pack_bool(part.root_only);
        buf.packstr(Some(&part.shared.to_string()));
        buf.pack_bool(part.state_up);
        buf.packstr(Some(&part.allow_groups.join(",")));
        buf.packstr(if part.nodes.is_empty() {
            None
        } else {
            Some(&part.nodes)
        });
        buf.pack_bool(part.is_default);
    }
    buf.into_bytes()
}

/// Saves the three state files. Read locks only; the write itself runs
/// after the guards drop.
pub fn save_controller_state(state: &ControllerState) -> Result<(), LatticeError> {
    let conf = state.config();
    let dir = PathBuf::from(&conf.state_save_location);

    let (jobs_blob, nodes_blob, parts_blob) = {
        let ls = state.lock(LockRequest {
            jobs: LockLevel::Read,
            nodes: LockLevel::Read,
            partitions: LockLevel::Read,
            ..Default::default()
        });
        (
            encode_jobs(ls.jobs()),
            encode_nodes(ls.nodes()),
            encode_parts(ls.partitions()),
        )
    };

    write_state_file(&dir, JOB_STATE_FILE, jobs_blob)?;
    write_state_file(&dir, NODE_STATE_FILE, nodes_blob)?;
    write_state_file(&dir, PART_STATE_FILE, parts_blob)?;
    Ok(())
}

/// Restores persisted state on startup. Unknown nodes or partitions in
/// the files (removed by reconfiguration) are logged and skipped.
pub fn restore_controller_state(state: &ControllerState) -> Result<(), LatticeError> {
    let conf = state.config();
    let dir = PathBuf::from(&conf.state_save_location);

    if let Some((stamp, blob)) = read_state_file(&dir, NODE_STATE_FILE)? {
        let mut buf = UnpackBuf::new(blob);
        let count = buf.unpack32()? as usize;
        let mut ls = state.lock(LockRequest {
            nodes: LockLevel::Write,
            ..Default::default()
        });
        let nodes = ls.nodes_mut();
        for _ in 0..count {
            let name = buf.unpackstr_required()?;
            let state_str = buf.unpackstr_required()?;
            let no_respond = buf.unpack_bool()?;
            let last_response = buf.unpack_time()?;
            let cpus = buf.unpack32()?;
            let real_memory = buf.unpack32()?;
            let tmp_disk = buf.unpack32()?;
            let reason = if buf.unpack_bool()? {
                Some(NodeReason {
                    text: buf.unpackstr()?.unwrap_or_default(),
                    uid: buf.unpack32()?,
                    time: buf.unpack_time()?,
                })
            } else {
                None
            };
            let Some(idx) = nodes.find_index(&name) else {
                warn!(node = %name, "persisted node no longer configured");
                continue;
            };
            let node = &mut nodes.nodes[idx];
            node.state = NodeState::from_str(&state_str).unwrap_or(NodeState::Unknown);
            node.no_respond = no_respond;
            node.last_response = last_response;
            node.cpus = cpus;
            node.real_memory = real_memory;
            node.tmp_disk = tmp_disk;
            node.reason = reason;
        }
        nodes.refresh_state_bitmaps();
        info!(stamp, "node state restored");
    }

    if let Some((stamp, blob)) = read_state_file(&dir, PART_STATE_FILE)? {
        let mut buf = UnpackBuf::new(blob);
        let count = buf.unpack32()? as usize;
        let mut ls = state.lock(LockRequest {
            partitions: LockLevel::Write,
            ..Default::default()
        });
        let parts = ls.partitions_mut();
        for _ in 0..count {
            let name = buf.unpackstr_required()?;
            let max_time = buf.unpack32()?;
            let max_nodes = buf.unpack32()?;
            let max_cpus = buf.unpack32()?;
            let root_only = buf.unpack_bool()?;
            let shared = buf.unpackstr_required()?;
            let state_up = buf.unpack_bool()?;
            let allow_groups = buf.unpackstr()?.unwrap_or_default();
            let _nodes_expr = buf.unpackstr()?;
            let is_default = buf.unpack_bool()?;
            let Some(part) = parts.get_mut(&name) else {
                warn!(partition = %name, "persisted partition no longer configured");
                continue;
            };
            part.max_time = max_time;
            part.max_nodes = max_nodes;
            part.max_cpus_per_job = max_cpus;
            part.root_only = root_only;
            if let Ok(policy) = crate::core::model::SharedPolicy::from_str(&shared) {
                part.shared = policy;
            }
            part.state_up = state_up;
            part.allow_groups = allow_groups
                .split(',')
                .map(|g| g.to_string())
                .filter(|g| !g.is_empty())
                .collect();
            part.is_default = is_default;
        }
        info!(stamp, "partition state restored");
    }

    if let Some((stamp, blob)) = read_state_file(&dir, JOB_STATE_FILE)? {
        let mut buf = UnpackBuf::new(blob);
        let count = buf.unpack32()? as usize;
        let mut max_seen = 0u32;
        let mut ls = state.lock(LockRequest {
            jobs: LockLevel::Write,
            nodes: LockLevel::Write,
            partitions: LockLevel::Read,
            configs: LockLevel::Read,
            associations: LockLevel::Read,
            ..Default::default()
        });
        let view = ls.sched_view();
        for _ in 0..count {
            let job_id = buf.unpack32()?;
            let name = buf.unpackstr()?.unwrap_or_default();
            let user_id = buf.unpack32()?;
            let group_id = buf.unpack32()?;
            let partition = buf.unpackstr_required()?;
            let state_str = buf.unpackstr_required()?;
            let time_limit = buf.unpack32()?;
            let submit_time = buf.unpack_time()?;
            let eligible_time = buf.unpack_time()?;
            let start_time = buf.unpack_time()?;
            let end_time = buf.unpack_time()?;
            let priority = buf.unpack32()?;
            let next_step_id = buf.unpack32()?;
            let nodes_expr = buf.unpackstr()?.unwrap_or_default();
            let runs = buf.unpack32()? as usize;
            let mut cpus_per_node = Vec::with_capacity(runs.min(1024));
            let mut cpu_count_reps = Vec::with_capacity(runs.min(1024));
            for _ in 0..runs {
                cpus_per_node.push(buf.unpack32()?);
                cpu_count_reps.push(buf.unpack32()?);
            }
            let wckey = buf.unpackstr()?;
            let assoc_id = buf.unpack32()?;
            let resv_id = buf.unpack32()?;
            let details = if buf.unpack_bool()? {
                Some(unpack_details(&mut buf)?)
            } else {
                None
            };

            let Some(part_idx) = view.partitions.index_of(&partition) else {
                warn!(job_id, partition = %partition, "persisted job references unknown partition");
                continue;
            };
            let job_state = JobState::from_str(&state_str).unwrap_or(JobState::Failed);
            let node_bitmap = if nodes_expr.is_empty() {
                None
            } else {
                view.nodes.name2bitmap(&nodes_expr).ok()
            };
            if job_state == JobState::Running {
                if let Some(bitmap) = &node_bitmap {
                    node_mgr::allocate_nodes(view.nodes, bitmap);
                }
            }
            max_seen = max_seen.max(job_id);
            view.jobs.jobs.insert(
                job_id,
                JobRecord {
                    job_id,
                    name,
                    user_id,
                    group_id,
                    partition,
                    part_idx,
                    state: job_state,
                    details,
                    nodes: nodes_expr,
                    node_bitmap,
                    cpus_per_node,
                    cpu_count_reps,
                    time_limit,
                    submit_time,
                    eligible_time,
                    start_time,
                    end_time,
                    suspend_intervals: Vec::new(),
                    priority,
                    next_step_id,
                    steps: Vec::new(),
                    array_task_id: None,
                    het_component: None,
                    topo_params: None,
                    alloc_rows: Vec::new(),
                    dependency: None,
                    reservation_id: (resv_id != 0).then_some(resv_id),
                    assoc_id: (assoc_id != 0).then_some(assoc_id),
                    wckey,
                    batch: false,
                    kill_on_node_fail: true,
                    exit_code: None,
                    pending_terminal: None,
                },
            );
        }
        // Job ids stay unique across restarts: resume minting above the
        // highest persisted id.
        if max_seen != 0 {
            let floor = max_seen.saturating_add(1);
            state.next_job_id.fetch_max(floor, Ordering::Relaxed);
        }
        info!(stamp, jobs = count, "job state restored");
    }

    Ok(())
}
