// src/core/rpc/message.rs

//! Typed messages and their pack/unpack forms.
//!
//! Update messages use the sentinel conventions: the max unsigned value
//! means "no change" for numerics, the null string means "no change" and
//! the empty string means "clear" for strings. Booleans in updates travel
//! as a `u16` with `NO_VAL16` for "no change".

use crate::core::LatticeError;
use crate::core::model::{JobDetails, JobState, JobSubmit, JobUpdate, PartitionUpdate, SharedPolicy, TaskDist};
use crate::core::rpc::pack::{NO_VAL, NO_VAL16, PackBuf, UnpackBuf};
use std::str::FromStr;
use strum_macros::{Display, FromRepr};

/// Stable message-type enum. Requests are grouped per subsystem;
/// responses live in the 9000 block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr)]
#[repr(u16)]
pub enum MessageType {
    RequestPing = 1001,
    RequestNodeRegistration = 1002,
    MessageNodeHeartbeat = 1003,
    RequestDrainNode = 1004,
    RequestDownNode = 1005,
    RequestNodeInfo = 1006,

    RequestSubmitJob = 2001,
    RequestCancelJob = 2002,
    RequestUpdateJob = 2003,
    RequestCompleteJob = 2004,
    RequestSuspendJob = 2005,
    RequestResumeJob = 2006,
    RequestJobInfo = 2007,
    RequestSbcastCred = 2008,

    RequestStepCreate = 3001,
    RequestStepComplete = 3002,
    RequestCancelStep = 3003,

    RequestUpdatePartition = 4001,
    RequestPartitionInfo = 4002,

    RequestRegisterCluster = 5001,

    ResponseRc = 9001,
    ResponseSubmitJob = 9002,
    ResponseStepCreate = 9003,
    ResponseNodeInfo = 9004,
    ResponseJobInfo = 9005,
    ResponsePartitionInfo = 9006,
    ResponseSbcastCred = 9007,
}

impl MessageType {
    pub fn from_wire(raw: u16) -> Result<Self, LatticeError> {
        Self::from_repr(raw).ok_or(LatticeError::UnknownMessageType(raw))
    }
}

// --- helpers for sentinel-encoded options ---

fn pack_opt32(buf: &mut PackBuf, v: Option<u32>) {
    buf.pack32(v.unwrap_or(NO_VAL));
}

fn unpack_opt32(buf: &mut UnpackBuf) -> Result<Option<u32>, LatticeError> {
    let v = buf.unpack32()?;
    Ok((v != NO_VAL).then_some(v))
}

fn pack_opt_bool(buf: &mut PackBuf, v: Option<bool>) {
    buf.pack16(match v {
        None => NO_VAL16,
        Some(false) => 0,
        Some(true) => 1,
    });
}

fn unpack_opt_bool(buf: &mut UnpackBuf) -> Result<Option<bool>, LatticeError> {
    Ok(match buf.unpack16()? {
        NO_VAL16 => None,
        0 => Some(false),
        _ => Some(true),
    })
}

// --- node messages ---

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeRegistrationMsg {
    pub node: String,
    pub cpus: u32,
    pub real_memory: u32,
    pub tmp_disk: u32,
}

impl NodeRegistrationMsg {
    pub fn pack(&self, buf: &mut PackBuf) {
        buf.packstr(Some(&self.node));
        buf.pack32(self.cpus);
        buf.pack32(self.real_memory);
        buf.pack32(self.tmp_disk);
    }

    pub fn unpack(buf: &mut UnpackBuf) -> Result<Self, LatticeError> {
        Ok(Self {
            node: buf.unpackstr_required()?,
            cpus: buf.unpack32()?,
            real_memory: buf.unpack32()?,
            tmp_disk: buf.unpack32()?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainNodeMsg {
    pub node: String,
    pub reason: String,
}

impl DrainNodeMsg {
    pub fn pack(&self, buf: &mut PackBuf) {
        buf.packstr(Some(&self.node));
        buf.packstr(Some(&self.reason));
    }

    pub fn unpack(buf: &mut UnpackBuf) -> Result<Self, LatticeError> {
        Ok(Self {
            node: buf.unpackstr_required()?,
            reason: buf.unpackstr()?.unwrap_or_default(),
        })
    }
}

// --- job messages ---

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmitJobMsg {
    pub submit: JobSubmit,
}

impl SubmitJobMsg {
    pub fn pack(&self, buf: &mut PackBuf) {
        let s = &self.submit;
        buf.packstr(Some(&s.name));
        buf.pack32(s.user_id);
        buf.pack32(s.group_id);
        buf.packstr(Some(&s.user_name));
        buf.packstr(Some(&s.group_name));
        buf.packstr(if s.partition.is_empty() {
            None
        } else {
            Some(&s.partition)
        });
        buf.pack32(s.time_limit);
        buf.pack_bool(s.immediate);
        buf.pack_bool(s.will_run);
        buf.pack_bool(s.batch);
        buf.packstr(s.reservation.as_deref());
        buf.packstr(s.wckey.as_deref());
        buf.packstr(s.account.as_deref());
        buf.packstr(s.dependency.as_deref());

        let d = &s.details;
        buf.pack32(d.num_procs);
        buf.pack32(d.min_nodes);
        buf.pack32(d.max_nodes);
        buf.packstr(if d.req_nodes.is_empty() {
            None
        } else {
            Some(&d.req_nodes)
        });
        let features_joined = d.features.join(",");
        buf.packstr(if d.features.is_empty() {
            None
        } else {
            Some(&features_joined)
        });
        buf.pack_bool(d.shared);
        buf.pack_bool(d.contiguous);
        buf.pack_bool(d.exclusive);
        buf.pack32(d.min_procs_per_node);
        buf.pack32(d.min_memory);
        buf.pack32(d.min_tmp_disk);
        buf.pack32(d.num_tasks);
        buf.packstr(Some(&d.dist.to_string()));
        buf.pack16(d.plane_size);
        buf.pack32(d.min_sockets);
        buf.pack32(d.max_sockets);
        buf.pack32(d.min_cores_per_socket);
        buf.pack32(d.min_threads_per_core);
    }

    pub fn unpack(buf: &mut UnpackBuf) -> Result<Self, LatticeError> {
        let mut s = JobSubmit {
            name: buf.unpackstr()?.unwrap_or_default(),
            user_id: buf.unpack32()?,
            group_id: buf.unpack32()?,
            user_name: buf.unpackstr()?.unwrap_or_default(),
            group_name: buf.unpackstr()?.unwrap_or_default(),
            partition: buf.unpackstr()?.unwrap_or_default(),
            time_limit: 0,
            ..Default::default()
        };
        s.time_limit = buf.unpack32()?;
        s.immediate = buf.unpack_bool()?;
        s.will_run = buf.unpack_bool()?;
        s.batch = buf.unpack_bool()?;
        s.reservation = buf.unpackstr()?;
        s.wckey = buf.unpackstr()?;
        s.account = buf.unpackstr()?;
        s.dependency = buf.unpackstr()?;

        let mut d = JobDetails {
            num_procs: buf.unpack32()?,
            min_nodes: buf.unpack32()?,
            max_nodes: buf.unpack32()?,
            req_nodes: buf.unpackstr()?.unwrap_or_default(),
            ..Default::default()
        };
        d.features = buf
            .unpackstr()?
            .map(|f| f.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();
        d.shared = buf.unpack_bool()?;
        d.contiguous = buf.unpack_bool()?;
        d.exclusive = buf.unpack_bool()?;
        d.min_procs_per_node = buf.unpack32()?;
        d.min_memory = buf.unpack32()?;
        d.min_tmp_disk = buf.unpack32()?;
        d.num_tasks = buf.unpack32()?;
        let dist = buf.unpackstr_required()?;
        d.dist = TaskDist::from_str(&dist).map_err(|_| LatticeError::BadDistribution)?;
        d.plane_size = buf.unpack16()?;
        d.min_sockets = buf.unpack32()?;
        d.max_sockets = buf.unpack32()?;
        d.min_cores_per_socket = buf.unpack32()?;
        d.min_threads_per_core = buf.unpack32()?;
        s.details = d;
        Ok(Self { submit: s })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CancelJobMsg {
    pub job_id: u32,
    /// `NO_VAL` cancels the whole job; otherwise a single step.
    pub step_id: u32,
}

impl CancelJobMsg {
    pub fn pack(&self, buf: &mut PackBuf) {
        buf.pack32(self.job_id);
        buf.pack32(self.step_id);
    }

    pub fn unpack(buf: &mut UnpackBuf) -> Result<Self, LatticeError> {
        Ok(Self {
            job_id: buf.unpack32()?,
            step_id: buf.unpack32()?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateJobMsg {
    pub update: JobUpdate,
}

impl UpdateJobMsg {
    pub fn pack(&self, buf: &mut PackBuf) {
        let u = &self.update;
        buf.pack32(u.job_id);
        pack_opt32(buf, u.time_limit);
        pack_opt32(buf, u.priority);
        buf.pack_bool(u.persist_priority);
        buf.packstr(u.name.as_deref());
        buf.packstr(u.dependency.as_deref());
    }

    pub fn unpack(buf: &mut UnpackBuf) -> Result<Self, LatticeError> {
        Ok(Self {
            update: JobUpdate {
                job_id: buf.unpack32()?,
                time_limit: unpack_opt32(buf)?,
                priority: unpack_opt32(buf)?,
                persist_priority: buf.unpack_bool()?,
                name: buf.unpackstr()?,
                dependency: buf.unpackstr()?,
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompleteJobMsg {
    pub job_id: u32,
    pub exit_code: i32,
}

impl CompleteJobMsg {
    pub fn pack(&self, buf: &mut PackBuf) {
        buf.pack32(self.job_id);
        buf.pack32(self.exit_code as u32);
    }

    pub fn unpack(buf: &mut UnpackBuf) -> Result<Self, LatticeError> {
        Ok(Self {
            job_id: buf.unpack32()?,
            exit_code: buf.unpack32()? as i32,
        })
    }
}

// --- step messages ---

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepCreateMsg {
    pub job_id: u32,
    pub user_id: u32,
    pub node_count: u32,
    pub node_list: Option<String>,
    pub num_tasks: u32,
    pub dist: String,
    /// `NO_VAL` requests the next monotonic id.
    pub reserved_id: u32,
}

impl StepCreateMsg {
    pub fn pack(&self, buf: &mut PackBuf) {
        buf.pack32(self.job_id);
        buf.pack32(self.user_id);
        buf.pack32(self.node_count);
        buf.packstr(self.node_list.as_deref());
        buf.pack32(self.num_tasks);
        buf.packstr(Some(&self.dist));
        buf.pack32(self.reserved_id);
    }

    pub fn unpack(buf: &mut UnpackBuf) -> Result<Self, LatticeError> {
        Ok(Self {
            job_id: buf.unpack32()?,
            user_id: buf.unpack32()?,
            node_count: buf.unpack32()?,
            node_list: buf.unpackstr()?,
            num_tasks: buf.unpack32()?,
            dist: buf.unpackstr_required()?,
            reserved_id: buf.unpack32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepCompleteMsg {
    pub job_id: u32,
    pub step_id: u32,
}

impl StepCompleteMsg {
    pub fn pack(&self, buf: &mut PackBuf) {
        buf.pack32(self.job_id);
        buf.pack32(self.step_id);
    }

    pub fn unpack(buf: &mut UnpackBuf) -> Result<Self, LatticeError> {
        Ok(Self {
            job_id: buf.unpack32()?,
            step_id: buf.unpack32()?,
        })
    }
}

// --- partition messages ---

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdatePartitionMsg {
    pub update: PartitionUpdate,
}

impl UpdatePartitionMsg {
    pub fn pack(&self, buf: &mut PackBuf) {
        let u = &self.update;
        buf.packstr(Some(&u.name));
        pack_opt32(buf, u.max_time);
        pack_opt32(buf, u.max_nodes);
        pack_opt32(buf, u.max_cpus_per_job);
        pack_opt_bool(buf, u.root_only);
        buf.pack16(match u.shared {
            None => NO_VAL16,
            Some(SharedPolicy::No) => 0,
            Some(SharedPolicy::Yes) => 1,
            Some(SharedPolicy::Force) => 2,
            Some(SharedPolicy::Exclusive) => 3,
        });
        pack_opt_bool(buf, u.state_up);
        buf.packstr(u.allow_groups.as_deref());
        buf.packstr(u.nodes.as_deref());
        pack_opt_bool(buf, u.set_default);
    }

    pub fn unpack(buf: &mut UnpackBuf) -> Result<Self, LatticeError> {
        Ok(Self {
            update: PartitionUpdate {
                name: buf.unpackstr_required()?,
                max_time: unpack_opt32(buf)?,
                max_nodes: unpack_opt32(buf)?,
                max_cpus_per_job: unpack_opt32(buf)?,
                root_only: unpack_opt_bool(buf)?,
                shared: match buf.unpack16()? {
                    NO_VAL16 => None,
                    0 => Some(SharedPolicy::No),
                    1 => Some(SharedPolicy::Yes),
                    2 => Some(SharedPolicy::Force),
                    3 => Some(SharedPolicy::Exclusive),
                    other => {
                        return Err(LatticeError::ParseFailure(format!(
                            "bad shared policy {other}"
                        )));
                    }
                },
                state_up: unpack_opt_bool(buf)?,
                allow_groups: buf.unpackstr()?,
                nodes: buf.unpackstr()?,
                set_default: unpack_opt_bool(buf)?,
            },
        })
    }
}

// --- cluster registration ---

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegisterClusterMsg {
    pub cluster: String,
    pub control_host: String,
    pub control_port: u16,
    pub rpc_version: u32,
}

impl RegisterClusterMsg {
    pub fn pack(&self, buf: &mut PackBuf) {
        buf.packstr(Some(&self.cluster));
        buf.packstr(Some(&self.control_host));
        buf.pack16(self.control_port);
        buf.pack32(self.rpc_version);
    }

    pub fn unpack(buf: &mut UnpackBuf) -> Result<Self, LatticeError> {
        Ok(Self {
            cluster: buf.unpackstr_required()?,
            control_host: buf.unpackstr_required()?,
            control_port: buf.unpack16()?,
            rpc_version: buf.unpack32()?,
        })
    }
}

// --- responses ---

/// Bare return-code response; 0 is success, anything else is an error
/// code from the taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RcResponse {
    pub rc: u32,
}

impl RcResponse {
    pub fn ok() -> Self {
        Self { rc: 0 }
    }

    pub fn pack(&self, buf: &mut PackBuf) {
        buf.pack32(self.rc);
    }

    pub fn unpack(buf: &mut UnpackBuf) -> Result<Self, LatticeError> {
        Ok(Self {
            rc: buf.unpack32()?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmitJobResponse {
    pub rc: u32,
    pub job_id: u32,
    pub state: String,
    pub node_list: String,
    pub cpus_per_node: Vec<u32>,
    pub cpu_count_reps: Vec<u32>,
}

impl SubmitJobResponse {
    pub fn pack(&self, buf: &mut PackBuf) {
        buf.pack32(self.rc);
        buf.pack32(self.job_id);
        buf.packstr(Some(&self.state));
        buf.packstr(if self.node_list.is_empty() {
            None
        } else {
            Some(&self.node_list)
        });
        buf.pack32(self.cpus_per_node.len() as u32);
        for (cpus, reps) in self.cpus_per_node.iter().zip(&self.cpu_count_reps) {
            buf.pack32(*cpus);
            buf.pack32(*reps);
        }
    }

    pub fn unpack(buf: &mut UnpackBuf) -> Result<Self, LatticeError> {
        let rc = buf.unpack32()?;
        let job_id = buf.unpack32()?;
        let state = buf.unpackstr_required()?;
        let node_list = buf.unpackstr()?.unwrap_or_default();
        let runs = buf.unpack32()? as usize;
        let mut cpus_per_node = Vec::with_capacity(runs.min(1024));
        let mut cpu_count_reps = Vec::with_capacity(runs.min(1024));
        for _ in 0..runs {
            cpus_per_node.push(buf.unpack32()?);
            cpu_count_reps.push(buf.unpack32()?);
        }
        Ok(Self {
            rc,
            job_id,
            state,
            node_list,
            cpus_per_node,
            cpu_count_reps,
        })
    }

    pub fn job_state(&self) -> Option<JobState> {
        JobState::from_str(&self.state).ok()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepCreateResponseMsg {
    pub rc: u32,
    pub job_id: u32,
    pub step_id: u32,
    pub node_list: String,
    pub switch_ctx: u64,
    pub credential: Vec<u8>,
    pub net_credential: Vec<u8>,
}

impl StepCreateResponseMsg {
    pub fn pack(&self, buf: &mut PackBuf) {
        buf.pack32(self.rc);
        buf.pack32(self.job_id);
        buf.pack32(self.step_id);
        buf.packstr(Some(&self.node_list));
        buf.pack64(self.switch_ctx);
        buf.packmem(&self.credential);
        buf.packmem(&self.net_credential);
    }

    pub fn unpack(buf: &mut UnpackBuf) -> Result<Self, LatticeError> {
        Ok(Self {
            rc: buf.unpack32()?,
            job_id: buf.unpack32()?,
            step_id: buf.unpack32()?,
            node_list: buf.unpackstr_required()?,
            switch_ctx: buf.unpack64()?,
            credential: buf.unpackmem()?,
            net_credential: buf.unpackmem()?,
        })
    }
}

/// Requests a file-broadcast credential over a running job's nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct SbcastCredMsg {
    pub job_id: u32,
    pub path: String,
    /// File mode bits for the delivered file.
    pub mode: u32,
}

impl SbcastCredMsg {
    pub fn pack(&self, buf: &mut PackBuf) {
        buf.pack32(self.job_id);
        buf.packstr(Some(&self.path));
        buf.pack32(self.mode);
    }

    pub fn unpack(buf: &mut UnpackBuf) -> Result<Self, LatticeError> {
        Ok(Self {
            job_id: buf.unpack32()?,
            path: buf.unpackstr_required()?,
            mode: buf.unpack32()?,
        })
    }
}

pub struct SbcastCredResponseMsg {
    pub rc: u32,
    pub job_id: u32,
    pub node_list: String,
    pub credential: Vec<u8>,
}

impl SbcastCredResponseMsg {
    pub fn pack(&self, buf: &mut PackBuf) {
        buf.pack32(self.rc);
        buf.pack32(self.job_id);
        buf.packstr(Some(&self.node_list));
        buf.packmem(&self.credential);
    }

    pub fn unpack(buf: &mut UnpackBuf) -> Result<Self, LatticeError> {
        Ok(Self {
            rc: buf.unpack32()?,
            job_id: buf.unpack32()?,
            node_list: buf.unpackstr_required()?,
            credential: buf.unpackmem()?,
        })
    }
}

/// One node summary in an info response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeInfo {
    pub name: String,
    pub state: String,
    pub no_respond: bool,
    pub cpus: u32,
    pub real_memory: u32,
    pub tmp_disk: u32,
    pub partition: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeInfoResponse {
    pub nodes: Vec<NodeInfo>,
}

impl NodeInfoResponse {
    pub fn pack(&self, buf: &mut PackBuf) {
        buf.pack32(self.nodes.len() as u32);
        for n in &self.nodes {
            buf.packstr(Some(&n.name));
            buf.packstr(Some(&n.state));
            buf.pack_bool(n.no_respond);
            buf.pack32(n.cpus);
            buf.pack32(n.real_memory);
            buf.pack32(n.tmp_disk);
            buf.packstr(if n.partition.is_empty() {
                None
            } else {
                Some(&n.partition)
            });
            buf.packstr(if n.reason.is_empty() {
                None
            } else {
                Some(&n.reason)
            });
        }
    }

    pub fn unpack(buf: &mut UnpackBuf) -> Result<Self, LatticeError> {
        let count = buf.unpack32()? as usize;
        let mut nodes = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            nodes.push(NodeInfo {
                name: buf.unpackstr_required()?,
                state: buf.unpackstr_required()?,
                no_respond: buf.unpack_bool()?,
                cpus: buf.unpack32()?,
                real_memory: buf.unpack32()?,
                tmp_disk: buf.unpack32()?,
                partition: buf.unpackstr()?.unwrap_or_default(),
                reason: buf.unpackstr()?.unwrap_or_default(),
            });
        }
        Ok(Self { nodes })
    }
}

/// One job summary in an info response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobInfo {
    pub job_id: u32,
    pub name: String,
    pub user_id: u32,
    pub partition: String,
    pub state: String,
    pub node_list: String,
    pub priority: u32,
    pub submit_time: i64,
    pub start_time: i64,
    pub end_time: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobInfoResponse {
    pub jobs: Vec<JobInfo>,
}

impl JobInfoResponse {
    pub fn pack(&self, buf: &mut PackBuf) {
        buf.pack32(self.jobs.len() as u32);
        for j in &self.jobs {
            buf.pack32(j.job_id);
            buf.packstr(Some(&j.name));
            buf.pack32(j.user_id);
            buf.packstr(Some(&j.partition));
            buf.packstr(Some(&j.state));
            buf.packstr(if j.node_list.is_empty() {
                None
            } else {
                Some(&j.node_list)
            });
            buf.pack32(j.priority);
            buf.pack_time(j.submit_time);
            buf.pack_time(j.start_time);
            buf.pack_time(j.end_time);
        }
    }

    pub fn unpack(buf: &mut UnpackBuf) -> Result<Self, LatticeError> {
        let count = buf.unpack32()? as usize;
        let mut jobs = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            jobs.push(JobInfo {
                job_id: buf.unpack32()?,
                name: buf.unpackstr_required()?,
                user_id: buf.unpack32()?,
                partition: buf.unpackstr_required()?,
                state: buf.unpackstr_required()?,
                node_list: buf.unpackstr()?.unwrap_or_default(),
                priority: buf.unpack32()?,
                submit_time: buf.unpack_time()?,
                start_time: buf.unpack_time()?,
                end_time: buf.unpack_time()?,
            });
        }
        Ok(Self { jobs })
    }
}

/// One partition summary in an info response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartitionInfo {
    pub name: String,
    pub nodes: String,
    pub max_time: u32,
    pub max_nodes: u32,
    pub state_up: bool,
    pub is_default: bool,
    pub shared: String,
    pub total_nodes: u32,
    pub total_cpus: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartitionInfoResponse {
    pub partitions: Vec<PartitionInfo>,
}

impl PartitionInfoResponse {
    pub fn pack(&self, buf: &mut PackBuf) {
        buf.pack32(self.partitions.len() as u32);
        for p in &self.partitions {
            buf.packstr(Some(&p.name));
            buf.packstr(if p.nodes.is_empty() {
                None
            } else {
                Some(&p.nodes)
            });
            buf.pack32(p.max_time);
            buf.pack32(p.max_nodes);
            buf.pack_bool(p.state_up);
            buf.pack_bool(p.is_default);
            buf.packstr(Some(&p.shared));
            buf.pack32(p.total_nodes);
            buf.pack32(p.total_cpus);
        }
    }

    pub fn unpack(buf: &mut UnpackBuf) -> Result<Self, LatticeError> {
        let count = buf.unpack32()? as usize;
        let mut partitions = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            partitions.push(PartitionInfo {
                name: buf.unpackstr_required()?,
                nodes: buf.unpackstr()?.unwrap_or_default(),
                max_time: buf.unpack32()?,
                max_nodes: buf.unpack32()?,
                state_up: buf.unpack_bool()?,
                is_default: buf.unpack_bool()?,
                shared: buf.unpackstr_required()?,
                total_nodes: buf.unpack32()?,
                total_cpus: buf.unpack32()?,
            });
        }
        Ok(Self { partitions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn roundtrip<T, P, U>(value: &T, pack: P, unpack: U) -> T
    where
        P: Fn(&T, &mut PackBuf),
        U: Fn(&mut UnpackBuf) -> Result<T, LatticeError>,
    {
        let mut buf = PackBuf::new();
        pack(value, &mut buf);
        let mut rd = UnpackBuf::new(buf.into_bytes());
        unpack(&mut rd).unwrap()
    }

    #[test]
    fn submit_roundtrip() {
        let msg = SubmitJobMsg {
            submit: JobSubmit {
                name: "wrf".into(),
                user_id: 500,
                group_id: 100,
                user_name: "alice".into(),
                group_name: "staff".into(),
                partition: "batch".into(),
                time_limit: 60,
                immediate: true,
                details: JobDetails {
                    num_procs: 4,
                    min_nodes: 2,
                    contiguous: true,
                    features: vec!["fast".into()],
                    ..Default::default()
                },
                ..Default::default()
            },
        };
        let got = roundtrip(&msg, SubmitJobMsg::pack, SubmitJobMsg::unpack);
        assert_eq!(got.submit.name, "wrf");
        assert_eq!(got.submit.details.num_procs, 4);
        assert!(got.submit.details.contiguous);
        assert_eq!(got.submit.details.features, vec!["fast".to_string()]);
    }

    #[test]
    fn partition_update_sentinels() {
        let msg = UpdatePartitionMsg {
            update: PartitionUpdate {
                name: "batch".into(),
                max_time: Some(120),
                allow_groups: Some(String::new()), // clear
                ..Default::default()
            },
        };
        let got = roundtrip(&msg, UpdatePartitionMsg::pack, UpdatePartitionMsg::unpack);
        assert_eq!(got.update.max_time, Some(120));
        assert_eq!(got.update.max_nodes, None);
        assert_eq!(got.update.allow_groups, Some(String::new()));
        assert_eq!(got.update.nodes, None);
    }

    #[test]
    fn unknown_message_type_rejected() {
        assert!(matches!(
            MessageType::from_wire(0xfff0),
            Err(LatticeError::UnknownMessageType(0xfff0))
        ));
        assert_eq!(
            MessageType::from_wire(2001).unwrap(),
            MessageType::RequestSubmitJob
        );
    }

    #[test]
    fn rc_roundtrip() {
        let mut buf = PackBuf::new();
        RcResponse { rc: 2302 }.pack(&mut buf);
        let mut rd = UnpackBuf::new(Bytes::from(buf.into_bytes()));
        assert_eq!(RcResponse::unpack(&mut rd).unwrap().rc, 2302);
    }
}
