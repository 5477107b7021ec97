use latticed::LatticeError;
use latticed::config::Config;
use latticed::core::accounting::store::MemoryStore;
use latticed::core::cred::{CredContext, CredManager, CredPayload, Keyring, signer_for};
use latticed::core::locks::{LockLevel, LockRequest};
use latticed::core::model::{JobDetails, JobState, JobSubmit, STEP_BATCH, StepRequest};
use latticed::core::sched::topology::NoneTopology;
use latticed::core::state::{ControllerState, job_mgr, node_mgr, now, step_mgr};
use std::sync::Arc;

const CONFIG: &str = r#"
ControlMachine=ctl0
ClusterName=tux
NodeName=lx[00-03] CPUs=2 RealMemory=2000 TmpDisk=500
PartitionName=batch Nodes=lx[00-03] MaxTime=60 Default=YES
"#;

fn build_state() -> Arc<ControllerState> {
    let conf = Config::parse(CONFIG).unwrap();
    let cred = Arc::new(CredManager::new(
        signer_for("mac").unwrap(),
        Keyring::new(vec![1u8; 32]),
        60,
    ));
    ControllerState::initialize(
        conf,
        cred,
        Arc::new(MemoryStore::new()),
        Arc::new(NoneTopology::default()),
    )
    .unwrap()
}

fn register_all(state: &ControllerState) {
    let conf = state.config();
    let mut ls = state.lock(LockRequest {
        nodes: LockLevel::Write,
        configs: LockLevel::Read,
        ..Default::default()
    });
    let (nodes, configs) = ls.node_view();
    for name in ["lx00", "lx01", "lx02", "lx03"] {
        node_mgr::register_node(
            nodes,
            configs,
            &conf,
            &node_mgr::Registration {
                node: name.to_string(),
                cpus: 2,
                real_memory: 2000,
                tmp_disk: 500,
            },
            100,
        )
        .unwrap();
    }
}

async fn running_job(state: &ControllerState, min_nodes: u32) -> u32 {
    let resp = job_mgr::job_allocate(
        state,
        JobSubmit {
            name: "steps".to_string(),
            user_id: 1000,
            group_id: 100,
            user_name: "alice".to_string(),
            group_name: "staff".to_string(),
            partition: "batch".to_string(),
            time_limit: 30,
            details: JobDetails {
                num_procs: min_nodes,
                min_nodes,
                ..Default::default()
            },
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(resp.state, JobState::Running);
    resp.job_id
}

#[tokio::test]
async fn test_step_create_issues_credential_and_context() {
    let state = build_state();
    register_all(&state);
    let job_id = running_job(&state, 2).await;

    let resp = step_mgr::step_create(
        &state,
        &StepRequest {
            job_id,
            user_id: 1000,
            node_count: 0,
            num_tasks: 4,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(resp.step_id, 0);
    assert_eq!(resp.node_list, "lx[00-01]");
    assert!(resp.switch_ctx != 0);

    // The launch credential verifies and carries the step's identity.
    let cred = state
        .cred
        .verify(&resp.credential, CredContext::Launch, now())
        .unwrap();
    match cred.payload {
        CredPayload::Launch(p) => {
            assert_eq!(p.job_id, job_id);
            assert_eq!(p.step_id, 0);
            assert_eq!(p.node_list, "lx[00-01]");
            assert_eq!(p.identity.uid, 1000);
        }
        other => panic!("wrong payload {other:?}"),
    }

    // The net-alias credential carries the step's address table and
    // survives re-presentation by restarted tasks.
    let net = state
        .cred
        .verify(&resp.net_credential, CredContext::Net, now())
        .unwrap();
    match net.payload {
        CredPayload::Net(p) => {
            assert_eq!(p.job_id, job_id);
            let names: Vec<&str> = p.aliases.iter().map(|a| a.node.as_str()).collect();
            assert_eq!(names, ["lx00", "lx01"]);
            assert!(p.aliases.iter().all(|a| a.addr == a.node && a.port == 6818));
        }
        other => panic!("wrong payload {other:?}"),
    }
    state
        .cred
        .verify(&resp.net_credential, CredContext::Net, now())
        .expect("net credentials may be re-fetched");
}

#[tokio::test]
async fn test_step_ids_are_monotonic_and_reserved_ids_work() {
    let state = build_state();
    register_all(&state);
    let job_id = running_job(&state, 2).await;

    let first = step_mgr::step_create(
        &state,
        &StepRequest {
            job_id,
            user_id: 1000,
            ..Default::default()
        },
    )
    .unwrap();
    let second = step_mgr::step_create(
        &state,
        &StepRequest {
            job_id,
            user_id: 1000,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!((first.step_id, second.step_id), (0, 1));

    let batch = step_mgr::step_create(
        &state,
        &StepRequest {
            job_id,
            user_id: 1000,
            reserved_id: Some(STEP_BATCH),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(batch.step_id, STEP_BATCH);
    // The batch slot is single-occupancy.
    assert!(
        step_mgr::step_create(
            &state,
            &StepRequest {
                job_id,
                user_id: 1000,
                reserved_id: Some(STEP_BATCH),
                ..Default::default()
            },
        )
        .is_err()
    );
}

#[tokio::test]
async fn test_step_nodes_must_be_job_subset() {
    let state = build_state();
    register_all(&state);
    let job_id = running_job(&state, 2).await;

    let err = step_mgr::step_create(
        &state,
        &StepRequest {
            job_id,
            user_id: 1000,
            node_list: Some("lx[02-03]".to_string()),
            ..Default::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, LatticeError::RequiredNodeNotAvailable(_)));

    let ok = step_mgr::step_create(
        &state,
        &StepRequest {
            job_id,
            user_id: 1000,
            node_list: Some("lx00".to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(ok.node_list, "lx[00]");
}

#[tokio::test]
async fn test_step_create_requires_running_job_and_owner() {
    let state = build_state();
    register_all(&state);
    let job_id = running_job(&state, 1).await;

    let err = step_mgr::step_create(
        &state,
        &StepRequest {
            job_id,
            user_id: 2222,
            ..Default::default()
        },
    )
    .unwrap_err();
    assert_eq!(err, LatticeError::AccessDenied);

    job_mgr::complete_job(&state, job_id, 0).await.unwrap();
    let err = step_mgr::step_create(
        &state,
        &StepRequest {
            job_id,
            user_id: 1000,
            ..Default::default()
        },
    )
    .unwrap_err();
    assert_eq!(err, LatticeError::JobNotRunning);
}

#[tokio::test]
async fn test_cancel_with_live_steps_completes_through_step_drain() {
    let state = build_state();
    register_all(&state);
    let job_id = running_job(&state, 2).await;
    let step = step_mgr::step_create(
        &state,
        &StepRequest {
            job_id,
            user_id: 1000,
            ..Default::default()
        },
    )
    .unwrap();

    // Cancel with the step live: the job drains in COMPLETING.
    let mid = job_mgr::cancel_job(&state, job_id, "1000").await.unwrap();
    assert_eq!(mid, JobState::Completing);

    // The last step completion settles the terminal state and frees the
    // nodes.
    step_mgr::step_complete(&state, job_id, step.step_id).unwrap();
    let ls = state.lock(LockRequest {
        jobs: LockLevel::Read,
        nodes: LockLevel::Read,
        ..Default::default()
    });
    assert_eq!(ls.jobs().get(job_id).unwrap().state, JobState::Cancelled);
    assert_eq!(ls.nodes().idle_nodes.count(), 4);
}

#[tokio::test]
async fn test_cancel_step_leaves_job_running() {
    let state = build_state();
    register_all(&state);
    let job_id = running_job(&state, 2).await;
    let step = step_mgr::step_create(
        &state,
        &StepRequest {
            job_id,
            user_id: 1000,
            ..Default::default()
        },
    )
    .unwrap();

    step_mgr::cancel_step(&state, job_id, step.step_id).unwrap();
    let ls = state.lock(LockRequest {
        jobs: LockLevel::Read,
        ..Default::default()
    });
    let job = ls.jobs().get(job_id).unwrap();
    assert_eq!(job.state, JobState::Running);
    assert!(job.steps[0].end_time.is_some());
}
