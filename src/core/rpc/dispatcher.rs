// src/core/rpc/dispatcher.rs

//! The RPC dispatcher: message-type table, auth enforcement, rate
//! limiting, handler invocation, and response packing.
//!
//! The dispatcher is the only component that frees (consumes) the
//! inbound frame. Every handler declares its lock set in the dispatch
//! table; the lock manager's thread-local bookkeeping asserts that no
//! handler returns while still holding a table lock.

use crate::core::accounting::store::{EventRow, StoreOp, TxnAction, TxnInput};
use crate::core::accounting::writer;
use crate::core::locks::{self, LockLevel, LockRequest};
use crate::core::metrics;
use crate::core::model::{JobState, NodeState};
use crate::core::rpc::auth::{AuthInfo, verify_auth};
use crate::core::rpc::frame::Frame;
use crate::core::rpc::message::*;
use crate::core::rpc::pack::{NO_VAL, PackBuf, UnpackBuf};
use crate::core::rpc::ratelimit::RateLimiter;
use crate::core::rpc::{MIN_PROTOCOL_VERSION, PROTOCOL_VERSION};
use crate::core::state::{ControllerState, job_mgr, node_mgr, now, part_mgr, step_mgr};
use crate::core::LatticeError;
use bytes::Bytes;
use once_cell::sync::Lazy;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::{debug, warn};

/// Privilege required to invoke a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthLevel {
    /// Any authenticated caller.
    User,
    /// uid 0 only (controller operators and daemons).
    Admin,
}

/// One row of the dispatch table.
pub struct DispatchEntry {
    pub msg_type: MessageType,
    pub name: &'static str,
    pub locks: LockRequest,
    pub auth: AuthLevel,
}

const fn locks(
    jobs: LockLevel,
    nodes: LockLevel,
    partitions: LockLevel,
    configs: LockLevel,
    associations: LockLevel,
    usage: LockLevel,
) -> LockRequest {
    LockRequest {
        jobs,
        nodes,
        partitions,
        configs,
        associations,
        usage,
    }
}

use crate::core::locks::LockLevel::{None as N, Read as R, Write as W};

/// The message-type table. Handlers acquire exactly the set declared
/// here.
pub static DISPATCH_TABLE: Lazy<Vec<DispatchEntry>> = Lazy::new(|| {
    vec![
        DispatchEntry {
            msg_type: MessageType::RequestPing,
            name: "ping",
            locks: locks(N, N, N, N, N, N),
            auth: AuthLevel::User,
        },
        DispatchEntry {
            msg_type: MessageType::RequestNodeRegistration,
            name: "node_registration",
            locks: locks(N, W, N, R, N, N),
            auth: AuthLevel::Admin,
        },
        DispatchEntry {
            msg_type: MessageType::MessageNodeHeartbeat,
            name: "node_heartbeat",
            locks: locks(N, W, N, N, N, N),
            auth: AuthLevel::Admin,
        },
        DispatchEntry {
            msg_type: MessageType::RequestDrainNode,
            name: "drain_node",
            locks: locks(N, W, N, N, N, N),
            auth: AuthLevel::Admin,
        },
        DispatchEntry {
            msg_type: MessageType::RequestDownNode,
            name: "down_node",
            locks: locks(N, W, N, R, N, N),
            auth: AuthLevel::Admin,
        },
        DispatchEntry {
            msg_type: MessageType::RequestNodeInfo,
            name: "node_info",
            locks: locks(N, R, R, N, N, N),
            auth: AuthLevel::User,
        },
        DispatchEntry {
            msg_type: MessageType::RequestSubmitJob,
            name: "submit_job",
            locks: locks(W, W, R, R, R, N),
            auth: AuthLevel::User,
        },
        DispatchEntry {
            msg_type: MessageType::RequestCancelJob,
            name: "cancel_job",
            locks: locks(W, W, R, R, R, N),
            auth: AuthLevel::User,
        },
        DispatchEntry {
            msg_type: MessageType::RequestUpdateJob,
            name: "update_job",
            locks: locks(W, N, R, N, N, N),
            auth: AuthLevel::User,
        },
        DispatchEntry {
            msg_type: MessageType::RequestCompleteJob,
            name: "complete_job",
            locks: locks(W, W, R, R, R, N),
            auth: AuthLevel::Admin,
        },
        DispatchEntry {
            msg_type: MessageType::RequestSuspendJob,
            name: "suspend_job",
            locks: locks(W, N, N, N, N, N),
            auth: AuthLevel::Admin,
        },
        DispatchEntry {
            msg_type: MessageType::RequestResumeJob,
            name: "resume_job",
            locks: locks(W, N, N, N, N, N),
            auth: AuthLevel::Admin,
        },
        DispatchEntry {
            msg_type: MessageType::RequestJobInfo,
            name: "job_info",
            locks: locks(R, N, N, N, N, N),
            auth: AuthLevel::User,
        },
        DispatchEntry {
            msg_type: MessageType::RequestSbcastCred,
            name: "sbcast_cred",
            locks: locks(R, N, N, N, N, N),
            auth: AuthLevel::User,
        },
        DispatchEntry {
            msg_type: MessageType::RequestStepCreate,
            name: "step_create",
            locks: locks(W, R, N, N, N, N),
            auth: AuthLevel::User,
        },
        DispatchEntry {
            msg_type: MessageType::RequestStepComplete,
            name: "step_complete",
            locks: locks(W, W, N, N, N, N),
            auth: AuthLevel::Admin,
        },
        DispatchEntry {
            msg_type: MessageType::RequestCancelStep,
            name: "cancel_step",
            locks: locks(W, W, N, N, N, N),
            auth: AuthLevel::User,
        },
        DispatchEntry {
            msg_type: MessageType::RequestUpdatePartition,
            name: "update_partition",
            locks: locks(N, W, W, R, N, N),
            auth: AuthLevel::Admin,
        },
        DispatchEntry {
            msg_type: MessageType::RequestPartitionInfo,
            name: "partition_info",
            locks: locks(N, N, R, N, N, N),
            auth: AuthLevel::User,
        },
        DispatchEntry {
            msg_type: MessageType::RequestRegisterCluster,
            name: "register_cluster",
            locks: locks(N, N, N, N, N, N),
            auth: AuthLevel::Admin,
        },
    ]
});

pub fn table_entry(msg_type: MessageType) -> Option<&'static DispatchEntry> {
    DISPATCH_TABLE.iter().find(|e| e.msg_type == msg_type)
}

/// The dispatcher. One instance serves every connection.
pub struct Dispatcher {
    state: Arc<ControllerState>,
    limiter: Arc<dyn RateLimiter>,
}

impl Dispatcher {
    pub fn new(state: Arc<ControllerState>, limiter: Arc<dyn RateLimiter>) -> Self {
        Self { state, limiter }
    }

    fn rc_frame(&self, rc: u32) -> Frame {
        let mut buf = PackBuf::new();
        RcResponse { rc }.pack(&mut buf);
        Frame::new(
            PROTOCOL_VERSION,
            MessageType::ResponseRc as u16,
            Vec::new(),
            buf.into_bytes(),
        )
    }

    fn response_frame(&self, msg_type: MessageType, body: Bytes) -> Frame {
        Frame::new(PROTOCOL_VERSION, msg_type as u16, Vec::new(), body)
    }

    /// Handles one inbound frame and produces the response frame. The
    /// inbound frame is consumed here and nowhere else.
    pub async fn dispatch(&self, frame: Frame) -> Frame {
        if frame.version < MIN_PROTOCOL_VERSION {
            return self.rc_frame(
                LatticeError::VersionMismatch {
                    ours: PROTOCOL_VERSION,
                    theirs: frame.version,
                }
                .code(),
            );
        }
        let msg_type = match MessageType::from_wire(frame.msg_type) {
            Ok(t) => t,
            Err(e) => return self.rc_frame(e.code()),
        };
        let Some(entry) = table_entry(msg_type) else {
            return self.rc_frame(LatticeError::UnknownMessageType(frame.msg_type).code());
        };

        // Authentication precedes everything else, including the limiter,
        // so buckets are keyed by a verified uid.
        let keyring = self.state.cred.keyring();
        let auth = match verify_auth(&keyring, &frame.auth, now()) {
            Ok(info) => info,
            Err(e) => return self.rc_frame(e.code()),
        };
        if entry.auth == AuthLevel::Admin && auth.uid != 0 {
            return self.rc_frame(LatticeError::AccessDenied.code());
        }
        if !self.limiter.allow(auth.uid, msg_type) {
            return self.rc_frame(LatticeError::CommunicationsBackoff.code());
        }

        let started = Instant::now();
        let result = self.run_handler(entry, auth, frame.body).await;
        locks::assert_none_held();

        let elapsed = started.elapsed().as_secs_f64();
        metrics::RPCS_PROCESSED_TOTAL.inc();
        metrics::RPC_SECONDS
            .with_label_values(&[entry.name])
            .observe(elapsed);

        match result {
            Ok(response) => {
                debug!(handler = entry.name, elapsed, "rpc complete");
                response
            }
            Err(e) => {
                let code = e.code();
                metrics::RPC_ERRORS_TOTAL
                    .with_label_values(&[&code.to_string()])
                    .inc();
                debug!(handler = entry.name, error = %e, code, "rpc failed");
                self.rc_frame(code)
            }
        }
    }

    async fn run_handler(
        &self,
        entry: &DispatchEntry,
        auth: AuthInfo,
        body: Bytes,
    ) -> Result<Frame, LatticeError> {
        let mut buf = UnpackBuf::new(body);
        match entry.msg_type {
            MessageType::RequestPing => Ok(self.rc_frame(0)),
            MessageType::RequestNodeRegistration => {
                self.handle_node_registration(&mut buf).await
            }
            MessageType::MessageNodeHeartbeat => {
                let node = buf.unpackstr_required()?;
                let mut ls = self.state.lock(entry.locks);
                node_mgr::heartbeat(ls.nodes_mut(), &node, now())?;
                Ok(self.rc_frame(0))
            }
            MessageType::RequestDrainNode => {
                let msg = DrainNodeMsg::unpack(&mut buf)?;
                let mut ls = self.state.lock(entry.locks);
                node_mgr::drain_node(ls.nodes_mut(), &msg.node, msg.reason, auth.uid, now())?;
                Ok(self.rc_frame(0))
            }
            MessageType::RequestDownNode => self.handle_down_node(&mut buf, auth).await,
            MessageType::RequestNodeInfo => {
                let ls = self.state.lock(entry.locks);
                let nodes = ls.nodes();
                let parts = ls.partitions();
                let infos = nodes
                    .nodes
                    .iter()
                    .map(|n| NodeInfo {
                        name: n.name.clone(),
                        state: n.state.to_string(),
                        no_respond: n.no_respond,
                        cpus: n.cpus,
                        real_memory: n.real_memory,
                        tmp_disk: n.tmp_disk,
                        partition: n
                            .part_idx
                            .and_then(|i| parts.by_index(i))
                            .map(|p| p.name.clone())
                            .unwrap_or_default(),
                        reason: n
                            .reason
                            .as_ref()
                            .map(|r| r.text.clone())
                            .unwrap_or_default(),
                    })
                    .collect();
                drop(ls);
                let mut out = PackBuf::new();
                NodeInfoResponse { nodes: infos }.pack(&mut out);
                Ok(self.response_frame(MessageType::ResponseNodeInfo, out.into_bytes()))
            }
            MessageType::RequestSubmitJob => {
                let msg = SubmitJobMsg::unpack(&mut buf)?;
                if msg.submit.user_id != auth.uid && auth.uid != 0 {
                    return Err(LatticeError::AccessDenied);
                }
                let resp = job_mgr::job_allocate(&self.state, msg.submit).await?;
                let mut out = PackBuf::new();
                SubmitJobResponse {
                    rc: 0,
                    job_id: resp.job_id,
                    state: resp.state.to_string(),
                    node_list: resp.node_list,
                    cpus_per_node: resp.cpus_per_node,
                    cpu_count_reps: resp.cpu_count_reps,
                }
                .pack(&mut out);
                Ok(self.response_frame(MessageType::ResponseSubmitJob, out.into_bytes()))
            }
            MessageType::RequestCancelJob => {
                let msg = CancelJobMsg::unpack(&mut buf)?;
                self.check_job_owner(msg.job_id, auth)?;
                if msg.step_id == NO_VAL {
                    job_mgr::cancel_job(&self.state, msg.job_id, &auth.uid.to_string()).await?;
                } else {
                    step_mgr::cancel_step(&self.state, msg.job_id, msg.step_id)?;
                }
                Ok(self.rc_frame(0))
            }
            MessageType::RequestUpdateJob => {
                let msg = UpdateJobMsg::unpack(&mut buf)?;
                self.check_job_owner(msg.update.job_id, auth)?;
                job_mgr::modify_job(&self.state, &msg.update)?;
                Ok(self.rc_frame(0))
            }
            MessageType::RequestCompleteJob => {
                let msg = CompleteJobMsg::unpack(&mut buf)?;
                job_mgr::complete_job(&self.state, msg.job_id, msg.exit_code).await?;
                Ok(self.rc_frame(0))
            }
            MessageType::RequestSuspendJob => {
                let job_id = buf.unpack32()?;
                job_mgr::suspend_job(&self.state, job_id)?;
                Ok(self.rc_frame(0))
            }
            MessageType::RequestResumeJob => {
                let job_id = buf.unpack32()?;
                job_mgr::resume_job(&self.state, job_id).await?;
                Ok(self.rc_frame(0))
            }
            MessageType::RequestJobInfo => {
                let filter = buf.unpack32()?;
                let ls = self.state.lock(entry.locks);
                let jobs = ls
                    .jobs()
                    .jobs
                    .values()
                    .filter(|j| filter == NO_VAL || j.job_id == filter)
                    .map(|j| JobInfo {
                        job_id: j.job_id,
                        name: j.name.clone(),
                        user_id: j.user_id,
                        partition: j.partition.clone(),
                        state: j.state.to_string(),
                        node_list: j.nodes.clone(),
                        priority: j.priority,
                        submit_time: j.submit_time,
                        start_time: j.start_time,
                        end_time: j.end_time,
                    })
                    .collect();
                drop(ls);
                let mut out = PackBuf::new();
                JobInfoResponse { jobs }.pack(&mut out);
                Ok(self.response_frame(MessageType::ResponseJobInfo, out.into_bytes()))
            }
            MessageType::RequestStepCreate => {
                let msg = StepCreateMsg::unpack(&mut buf)?;
                self.check_job_owner(msg.job_id, auth)?;
                let req = crate::core::model::StepRequest {
                    job_id: msg.job_id,
                    user_id: auth.uid,
                    node_count: msg.node_count,
                    node_list: msg.node_list,
                    num_tasks: msg.num_tasks,
                    dist: crate::core::model::TaskDist::from_str(&msg.dist)
                        .map_err(|_| LatticeError::BadDistribution)?,
                    reserved_id: (msg.reserved_id != NO_VAL).then_some(msg.reserved_id),
                };
                let resp = step_mgr::step_create(&self.state, &req)?;
                metrics::CREDS_ISSUED_TOTAL
                    .with_label_values(&["launch"])
                    .inc();
                metrics::CREDS_ISSUED_TOTAL.with_label_values(&["net"]).inc();
                let mut out = PackBuf::new();
                StepCreateResponseMsg {
                    rc: 0,
                    job_id: resp.job_id,
                    step_id: resp.step_id,
                    node_list: resp.node_list,
                    switch_ctx: resp.switch_ctx,
                    credential: resp.credential,
                    net_credential: resp.net_credential,
                }
                .pack(&mut out);
                Ok(self.response_frame(MessageType::ResponseStepCreate, out.into_bytes()))
            }
            MessageType::RequestSbcastCred => {
                let msg = SbcastCredMsg::unpack(&mut buf)?;
                self.check_job_owner(msg.job_id, auth)?;
                let (node_list, gid) = {
                    let ls = self.state.lock(entry.locks);
                    let job = ls
                        .jobs()
                        .get(msg.job_id)
                        .ok_or(LatticeError::InvalidJobId(msg.job_id))?;
                    if job.state != JobState::Running {
                        return Err(LatticeError::JobNotRunning);
                    }
                    (job.nodes.clone(), job.group_id)
                };
                let credential = self.state.cred.issue(
                    crate::core::cred::CredPayload::Sbcast(crate::core::cred::SbcastPayload {
                        job_id: msg.job_id,
                        node_list: node_list.clone(),
                        path: msg.path,
                        mode: msg.mode,
                    }),
                    auth.uid,
                    gid,
                    now(),
                )?;
                metrics::CREDS_ISSUED_TOTAL
                    .with_label_values(&["sbcast"])
                    .inc();
                let mut out = PackBuf::new();
                SbcastCredResponseMsg {
                    rc: 0,
                    job_id: msg.job_id,
                    node_list,
                    credential,
                }
                .pack(&mut out);
                Ok(self.response_frame(MessageType::ResponseSbcastCred, out.into_bytes()))
            }
            MessageType::RequestStepComplete => {
                let msg = StepCompleteMsg::unpack(&mut buf)?;
                step_mgr::step_complete(&self.state, msg.job_id, msg.step_id)?;
                Ok(self.rc_frame(0))
            }
            MessageType::RequestCancelStep => {
                let msg = StepCompleteMsg::unpack(&mut buf)?;
                self.check_job_owner(msg.job_id, auth)?;
                step_mgr::cancel_step(&self.state, msg.job_id, msg.step_id)?;
                Ok(self.rc_frame(0))
            }
            MessageType::RequestUpdatePartition => {
                let msg = UpdatePartitionMsg::unpack(&mut buf)?;
                let mut ls = self.state.lock(entry.locks);
                let (parts, nodes, configs) = ls.part_view();
                part_mgr::update_partition(parts, nodes, configs, &msg.update)?;
                Ok(self.rc_frame(0))
            }
            MessageType::RequestPartitionInfo => {
                let ls = self.state.lock(entry.locks);
                let partitions = ls
                    .partitions()
                    .parts
                    .values()
                    .map(|p| PartitionInfo {
                        name: p.name.clone(),
                        nodes: p.nodes.clone(),
                        max_time: p.max_time,
                        max_nodes: p.max_nodes,
                        state_up: p.state_up,
                        is_default: p.is_default,
                        shared: p.shared.to_string(),
                        total_nodes: p.total_nodes,
                        total_cpus: p.total_cpus,
                    })
                    .collect();
                drop(ls);
                let mut out = PackBuf::new();
                PartitionInfoResponse { partitions }.pack(&mut out);
                Ok(self.response_frame(MessageType::ResponsePartitionInfo, out.into_bytes()))
            }
            MessageType::RequestRegisterCluster => {
                let msg = RegisterClusterMsg::unpack(&mut buf)?;
                writer::register_ctld(
                    self.state.store.as_ref(),
                    &auth.uid.to_string(),
                    &msg.cluster,
                    &msg.control_host,
                    msg.control_port,
                    msg.rpc_version,
                )
                .await?;
                Ok(self.rc_frame(0))
            }
            // Responses are never dispatched.
            MessageType::ResponseRc
            | MessageType::ResponseSubmitJob
            | MessageType::ResponseStepCreate
            | MessageType::ResponseNodeInfo
            | MessageType::ResponseJobInfo
            | MessageType::ResponsePartitionInfo
            | MessageType::ResponseSbcastCred => {
                Err(LatticeError::UnknownMessageType(entry.msg_type as u16))
            }
        }
    }

    /// A job may be cancelled/updated by its owner or by uid 0.
    fn check_job_owner(&self, job_id: u32, auth: AuthInfo) -> Result<(), LatticeError> {
        if auth.uid == 0 {
            return Ok(());
        }
        let ls = self.state.lock(LockRequest {
            jobs: LockLevel::Read,
            ..Default::default()
        });
        let job = ls
            .jobs()
            .get(job_id)
            .ok_or(LatticeError::InvalidJobId(job_id))?;
        if job.user_id != auth.uid {
            return Err(LatticeError::AccessDenied);
        }
        Ok(())
    }

    /// Node registration plus the accounting events it implies: the
    /// cluster-capacity registration row and open/close of down rows.
    async fn handle_node_registration(
        &self,
        buf: &mut UnpackBuf,
    ) -> Result<Frame, LatticeError> {
        let msg = NodeRegistrationMsg::unpack(buf)?;
        let tnow = now();
        let conf = self.state.config();
        let reg = node_mgr::Registration {
            node: msg.node.clone(),
            cpus: msg.cpus,
            real_memory: msg.real_memory,
            tmp_disk: msg.tmp_disk,
        };

        let mut ops: Vec<StoreOp> = Vec::new();
        {
            let mut ls = self.state.lock(LockRequest {
                nodes: LockLevel::Write,
                configs: LockLevel::Read,
                ..Default::default()
            });
            let (nodes, configs) = ls.node_view();
            let (prev, new) = node_mgr::register_node(nodes, configs, &conf, &reg, tnow)?;

            if prev == NodeState::Down && new != NodeState::Down {
                ops.push(StoreOp::CloseEvent {
                    cluster: conf.cluster_name.clone(),
                    node: msg.node.clone(),
                    end: tnow,
                });
            }
            if new == NodeState::Down && prev != NodeState::Down {
                let idx = nodes.find_index(&msg.node).expect("registered above");
                ops.push(StoreOp::InsertEvent(EventRow {
                    cluster: conf.cluster_name.clone(),
                    node: msg.node.clone(),
                    cpus: configs.configs[nodes.nodes[idx].config_idx].cpus,
                    start: tnow,
                    end: 0,
                    reason: "registration below configuration".to_string(),
                    maint: false,
                }));
            }

            // Capacity registration row: one open row per distinct
            // cluster CPU total.
            let total: u32 = nodes
                .up_nodes
                .iter_set()
                .map(|i| configs.configs[nodes.nodes[i].config_idx].cpus)
                .sum();
            if total != self.state.last_reported_cpus.swap(total, Ordering::Relaxed) {
                ops.push(StoreOp::CloseEvent {
                    cluster: conf.cluster_name.clone(),
                    node: String::new(),
                    end: tnow,
                });
                ops.push(StoreOp::InsertEvent(EventRow {
                    cluster: conf.cluster_name.clone(),
                    node: String::new(),
                    cpus: total,
                    start: tnow,
                    end: 0,
                    reason: String::new(),
                    maint: false,
                }));
            }
        }

        if !ops.is_empty() {
            let txn = TxnInput {
                timestamp: tnow,
                action: TxnAction::RegisterCluster,
                object: msg.node.clone(),
                actor: "controller".to_string(),
                info: "node registration".to_string(),
            };
            if let Err(e) = self.state.store.commit(ops, txn).await {
                warn!(error = %e, "failed recording registration events");
            }
        }
        Ok(self.rc_frame(0))
    }

    /// Admin down: the state change plus an open down-event row.
    async fn handle_down_node(
        &self,
        buf: &mut UnpackBuf,
        auth: AuthInfo,
    ) -> Result<Frame, LatticeError> {
        let msg = DrainNodeMsg::unpack(buf)?;
        let tnow = now();
        let conf = self.state.config();
        let cpus;
        {
            let mut ls = self.state.lock(LockRequest {
                nodes: LockLevel::Write,
                configs: LockLevel::Read,
                ..Default::default()
            });
            let (nodes, configs) = ls.node_view();
            node_mgr::down_node(nodes, &msg.node, msg.reason.clone(), auth.uid, tnow)?;
            let idx = nodes.find_index(&msg.node).expect("downed above");
            cpus = configs.configs[nodes.nodes[idx].config_idx].cpus;
        }
        let ops = vec![StoreOp::InsertEvent(EventRow {
            cluster: conf.cluster_name.clone(),
            node: msg.node.clone(),
            cpus,
            start: tnow,
            end: 0,
            reason: msg.reason.clone(),
            maint: false,
        })];
        let txn = TxnInput {
            timestamp: tnow,
            action: TxnAction::RegisterCluster,
            object: msg.node.clone(),
            actor: auth.uid.to_string(),
            info: "node down".to_string(),
        };
        if let Err(e) = self.state.store.commit(ops, txn).await {
            warn!(error = %e, "failed recording down event");
        }
        Ok(self.rc_frame(0))
    }
}

/// Refreshes the job/node state gauges; called by the scheduler agent.
pub fn refresh_state_gauges(state: &ControllerState) {
    let ls = state.lock(LockRequest {
        jobs: LockLevel::Read,
        nodes: LockLevel::Read,
        ..Default::default()
    });
    for s in [
        JobState::Pending,
        JobState::Running,
        JobState::Suspended,
        JobState::Completing,
        JobState::Completed,
        JobState::Cancelled,
        JobState::Failed,
    ] {
        let count = ls.jobs().jobs.values().filter(|j| j.state == s).count();
        metrics::JOBS_BY_STATE
            .with_label_values(&[&s.to_string()])
            .set(count as f64);
    }
    let nodes = ls.nodes();
    for s in [
        NodeState::Unknown,
        NodeState::Idle,
        NodeState::Busy,
        NodeState::Down,
        NodeState::Draining,
        NodeState::Drained,
    ] {
        let count = nodes.nodes.iter().filter(|n| n.state == s).count();
        metrics::NODES_BY_STATE
            .with_label_values(&[&s.to_string()])
            .set(count as f64);
    }
}
