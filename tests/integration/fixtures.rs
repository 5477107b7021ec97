//! Shared plumbing for driving an in-process controller through the
//! dispatcher, frames and all.

use bytes::Bytes;
use latticed::config::Config;
use latticed::core::accounting::store::MemoryStore;
use latticed::core::cred::{CredManager, Keyring, signer_for};
use latticed::core::rpc::dispatcher::Dispatcher;
use latticed::core::rpc::frame::Frame;
use latticed::core::rpc::message::*;
use latticed::core::rpc::pack::{PackBuf, UnpackBuf};
use latticed::core::rpc::ratelimit::{NoopLimiter, RateLimiter};
use latticed::core::rpc::{PROTOCOL_VERSION, auth};
use latticed::core::sched::topology::NoneTopology;
use latticed::core::state::{ControllerState, now};
use std::sync::Arc;

pub const TEST_CONFIG: &str = r#"
ControlMachine=ctl0
ClusterName=tux
NodeName=lx[00-03] CPUs=2 RealMemory=2000 TmpDisk=500 Weight=4 Feature=fast
PartitionName=batch Nodes=lx[00-03] MaxTime=60 Default=YES Shared=NO State=UP AllowGroups=staff
"#;

pub struct Harness {
    pub state: Arc<ControllerState>,
    pub dispatcher: Dispatcher,
}

impl Harness {
    pub fn new(config_text: &str) -> Self {
        Self::with_limiter(config_text, Arc::new(NoopLimiter))
    }

    pub fn with_limiter(config_text: &str, limiter: Arc<dyn RateLimiter>) -> Self {
        let conf = Config::parse(config_text).unwrap();
        let cred = Arc::new(CredManager::new(
            signer_for("mac").unwrap(),
            Keyring::new(vec![3u8; 32]),
            60,
        ));
        let state = ControllerState::initialize(
            conf,
            cred,
            Arc::new(MemoryStore::new()),
            Arc::new(NoneTopology::default()),
        )
        .unwrap();
        let dispatcher = Dispatcher::new(state.clone(), limiter);
        Self { state, dispatcher }
    }

    /// Builds a signed request frame from `(uid, gid)`.
    pub fn frame(&self, msg_type: MessageType, uid: u32, gid: u32, body: Bytes) -> Frame {
        let token = auth::make_auth(&self.state.cred.keyring(), uid, gid, now()).unwrap();
        Frame::new(PROTOCOL_VERSION, msg_type as u16, token, body)
    }

    pub async fn rc(&self, msg_type: MessageType, uid: u32, body: Bytes) -> u32 {
        let response = self
            .dispatcher
            .dispatch(self.frame(msg_type, uid, uid, body))
            .await;
        assert_eq!(response.msg_type, MessageType::ResponseRc as u16);
        let mut buf = UnpackBuf::new(response.body);
        RcResponse::unpack(&mut buf).unwrap().rc
    }

    /// Registers every configured node as an exact match, via RPC.
    pub async fn register_all_nodes(&self) {
        for name in ["lx00", "lx01", "lx02", "lx03"] {
            let mut body = PackBuf::new();
            NodeRegistrationMsg {
                node: name.to_string(),
                cpus: 2,
                real_memory: 2000,
                tmp_disk: 500,
            }
            .pack(&mut body);
            let rc = self
                .rc(MessageType::RequestNodeRegistration, 0, body.into_bytes())
                .await;
            assert_eq!(rc, 0, "registration of {name} failed");
        }
    }

    pub fn submit_msg(&self, min_nodes: u32, num_procs: u32) -> SubmitJobMsg {
        use latticed::core::model::{JobDetails, JobSubmit};
        SubmitJobMsg {
            submit: JobSubmit {
                name: "e2e".to_string(),
                user_id: 1000,
                group_id: 100,
                user_name: "alice".to_string(),
                group_name: "staff".to_string(),
                partition: "batch".to_string(),
                time_limit: 30,
                details: JobDetails {
                    num_procs,
                    min_nodes,
                    ..Default::default()
                },
                ..Default::default()
            },
        }
    }

    /// Submits through the dispatcher; a refusal comes back as the bare
    /// return code.
    pub async fn submit(&self, msg: &SubmitJobMsg) -> Result<SubmitJobResponse, u32> {
        let mut body = PackBuf::new();
        msg.pack(&mut body);
        let response = self
            .dispatcher
            .dispatch(self.frame(MessageType::RequestSubmitJob, 1000, 100, body.into_bytes()))
            .await;
        let mut buf = UnpackBuf::new(response.body);
        if response.msg_type == MessageType::ResponseRc as u16 {
            return Err(RcResponse::unpack(&mut buf).unwrap().rc);
        }
        assert_eq!(response.msg_type, MessageType::ResponseSubmitJob as u16);
        Ok(SubmitJobResponse::unpack(&mut buf).unwrap())
    }
}
