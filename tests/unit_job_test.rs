use latticed::LatticeError;
use latticed::config::Config;
use latticed::core::accounting::store::{AccountingStore, MemoryStore, TxnAction};
use latticed::core::cred::{CredManager, Keyring, signer_for};
use latticed::core::locks::{LockLevel, LockRequest};
use latticed::core::model::{JobDetails, JobState, JobSubmit, JobUpdate};
use latticed::core::sched::topology::NoneTopology;
use latticed::core::state::{ControllerState, job_mgr, node_mgr};
use std::sync::Arc;

const CONFIG: &str = r#"
ControlMachine=ctl0
ClusterName=tux
MinJobAge=0
NodeName=lx[00-03] CPUs=2 RealMemory=2000 TmpDisk=500 Weight=4 Feature=fast
PartitionName=batch Nodes=lx[00-03] MaxTime=60 Default=YES Shared=NO State=UP AllowGroups=staff
"#;

fn build_state(config_text: &str) -> Arc<ControllerState> {
    let conf = Config::parse(config_text).unwrap();
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
    let regs: Vec<node_mgr::Registration> = {
        let ls = state.lock(LockRequest {
            nodes: LockLevel::Read,
            configs: LockLevel::Read,
            ..Default::default()
        });
        ls.nodes()
            .nodes
            .iter()
            .map(|n| {
                let config = &ls.configs().configs[n.config_idx];
                node_mgr::Registration {
                    node: n.name.clone(),
                    cpus: config.cpus,
                    real_memory: config.real_memory,
                    tmp_disk: config.tmp_disk,
                }
            })
            .collect()
    };
    let conf = state.config();
    let mut ls = state.lock(LockRequest {
        nodes: LockLevel::Write,
        configs: LockLevel::Read,
        ..Default::default()
    });
    let (nodes, configs) = ls.node_view();
    for reg in &regs {
        node_mgr::register_node(nodes, configs, &conf, reg, 100).unwrap();
    }
}

fn submit(min_nodes: u32, num_procs: u32) -> JobSubmit {
    JobSubmit {
        name: "job".to_string(),
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
    }
}

#[tokio::test]
async fn test_submit_and_allocate() {
    let state = build_state(CONFIG);
    register_all(&state);

    let resp = job_mgr::job_allocate(&state, submit(2, 2)).await.unwrap();
    assert_eq!(resp.state, JobState::Running);
    assert_eq!(resp.cpus_per_node, vec![1]);
    assert_eq!(resp.cpu_count_reps, vec![2]);
    assert_eq!(resp.node_list, "lx[00-01]");

    let ls = state.lock(LockRequest {
        jobs: LockLevel::Read,
        nodes: LockLevel::Read,
        ..Default::default()
    });
    let job = ls.jobs().get(resp.job_id).unwrap();
    let bitmap = job.node_bitmap.as_ref().unwrap();
    assert_eq!(bitmap.iter_set().collect::<Vec<_>>(), vec![0, 1]);
    // popcount == sum of reps, and the run-length vectors account for
    // every allocated CPU.
    assert_eq!(
        bitmap.count() as u32,
        job.cpu_count_reps.iter().sum::<u32>()
    );
    assert_eq!(job.total_alloc_cpus(), 2);
    assert_eq!(ls.nodes().nodes[0].state.to_string(), "BUSY");
    assert_eq!(ls.nodes().nodes[1].state.to_string(), "BUSY");
    assert_eq!(ls.nodes().nodes[2].state.to_string(), "IDLE");
    drop(ls);

    let txns = state.store.txns().await;
    assert_eq!(txns.len(), 1);
    assert_eq!(txns[0].action, TxnAction::AddJob);
}

#[tokio::test]
async fn test_group_filter_rejects_without_trace() {
    let state = build_state(CONFIG);
    register_all(&state);

    let mut bad = submit(1, 1);
    bad.group_name = "guests".to_string();
    let err = job_mgr::job_allocate(&state, bad).await.unwrap_err();
    assert_eq!(err, LatticeError::MissingPartitionGroup);

    let ls = state.lock(LockRequest {
        jobs: LockLevel::Read,
        ..Default::default()
    });
    assert!(ls.jobs().jobs.is_empty());
    drop(ls);
    assert!(state.store.txns().await.is_empty());
}

#[tokio::test]
async fn test_contiguous_fragmentation_leaves_job_pending() {
    let state = build_state(CONFIG);
    register_all(&state);
    {
        let mut ls = state.lock(LockRequest {
            nodes: LockLevel::Write,
            ..Default::default()
        });
        node_mgr::down_node(ls.nodes_mut(), "lx02", "bad disk".into(), 0, 100).unwrap();
    }

    let mut wide = submit(3, 3);
    wide.details.contiguous = true;
    let resp = job_mgr::job_allocate(&state, wide).await.unwrap();
    assert_eq!(resp.state, JobState::Pending);
    assert!(resp.node_list.is_empty());
}

#[tokio::test]
async fn test_immediate_failure_withdraws_job() {
    let state = build_state(CONFIG);
    register_all(&state);

    // Fill the partition first.
    let mut fill = submit(4, 8);
    fill.details.exclusive = true;
    let resp = job_mgr::job_allocate(&state, fill).await.unwrap();
    assert_eq!(resp.state, JobState::Running);

    let mut urgent = submit(1, 1);
    urgent.immediate = true;
    let err = job_mgr::job_allocate(&state, urgent).await.unwrap_err();
    assert_eq!(err, LatticeError::NodesBusy);
    let ls = state.lock(LockRequest {
        jobs: LockLevel::Read,
        ..Default::default()
    });
    assert_eq!(ls.jobs().jobs.len(), 1);
}

#[tokio::test]
async fn test_will_run_simulates_without_mutation() {
    let state = build_state(CONFIG);
    register_all(&state);

    let mut probe = submit(2, 2);
    probe.will_run = true;
    let resp = job_mgr::job_allocate(&state, probe).await.unwrap();
    assert_eq!(resp.job_id, 0);
    assert_eq!(resp.node_list, "lx[00-01]");

    let ls = state.lock(LockRequest {
        jobs: LockLevel::Read,
        nodes: LockLevel::Read,
        ..Default::default()
    });
    assert!(ls.jobs().jobs.is_empty());
    assert_eq!(ls.nodes().idle_nodes.count(), 4);
    drop(ls);
    assert!(state.store.txns().await.is_empty());
}

#[tokio::test]
async fn test_cancel_is_idempotent_with_single_txn() {
    let state = build_state(CONFIG);
    register_all(&state);

    let resp = job_mgr::job_allocate(&state, submit(1, 1)).await.unwrap();
    job_mgr::complete_job(&state, resp.job_id, 0).await.unwrap();
    let txns_after_complete = state.store.txns().await.len();

    let first = job_mgr::cancel_job(&state, resp.job_id, "1000").await;
    let second = job_mgr::cancel_job(&state, resp.job_id, "1000").await;
    assert_eq!(first.unwrap_err(), LatticeError::AlreadyDone);
    assert_eq!(second.unwrap_err(), LatticeError::AlreadyDone);

    let ls = state.lock(LockRequest {
        jobs: LockLevel::Read,
        ..Default::default()
    });
    assert_eq!(
        ls.jobs().get(resp.job_id).unwrap().state,
        JobState::Completed
    );
    drop(ls);
    // No txn row beyond the completion's.
    assert_eq!(state.store.txns().await.len(), txns_after_complete);
}

#[tokio::test]
async fn test_cancel_pending_job() {
    let state = build_state(CONFIG);
    // Nodes never registered: everything stays pending.
    let resp = job_mgr::job_allocate(&state, submit(1, 1)).await.unwrap();
    assert_eq!(resp.state, JobState::Pending);
    let final_state = job_mgr::cancel_job(&state, resp.job_id, "1000").await.unwrap();
    assert_eq!(final_state, JobState::Cancelled);
}

#[tokio::test]
async fn test_job_ids_are_monotonic_from_floor() {
    let state = build_state(CONFIG);
    register_all(&state);
    let first = job_mgr::job_allocate(&state, submit(1, 1)).await.unwrap();
    let second = job_mgr::job_allocate(&state, submit(1, 1)).await.unwrap();
    assert_eq!(first.job_id, 1 << 16);
    assert_eq!(second.job_id, (1 << 16) + 1);
}

#[tokio::test]
async fn test_time_limit_increase_bounded_by_partition() {
    let state = build_state(CONFIG);
    register_all(&state);
    let resp = job_mgr::job_allocate(&state, submit(1, 1)).await.unwrap();

    // Decrease is always legal.
    job_mgr::modify_job(
        &state,
        &JobUpdate {
            job_id: resp.job_id,
            time_limit: Some(10),
            ..Default::default()
        },
    )
    .unwrap();
    // Increase within MaxTime=60 is legal.
    job_mgr::modify_job(
        &state,
        &JobUpdate {
            job_id: resp.job_id,
            time_limit: Some(45),
            ..Default::default()
        },
    )
    .unwrap();
    // Past the partition cap is not.
    let err = job_mgr::modify_job(
        &state,
        &JobUpdate {
            job_id: resp.job_id,
            time_limit: Some(90),
            ..Default::default()
        },
    )
    .unwrap_err();
    assert_eq!(err, LatticeError::InvalidTimeLimit);
}

#[tokio::test]
async fn test_persisted_priority_change_refused() {
    let state = build_state(CONFIG);
    register_all(&state);
    let resp = job_mgr::job_allocate(&state, submit(1, 1)).await.unwrap();
    let err = job_mgr::modify_job(
        &state,
        &JobUpdate {
            job_id: resp.job_id,
            priority: Some(99),
            persist_priority: true,
            ..Default::default()
        },
    )
    .unwrap_err();
    assert_eq!(err, LatticeError::PrioResetFail);
}

#[tokio::test]
async fn test_scheduler_tick_starts_queued_work() {
    let state = build_state(CONFIG);
    // Submit before any node registers; the job queues.
    let resp = job_mgr::job_allocate(&state, submit(2, 2)).await.unwrap();
    assert_eq!(resp.state, JobState::Pending);

    register_all(&state);
    let started = job_mgr::schedule_tick(&state).await;
    assert_eq!(started, vec![resp.job_id]);

    let ls = state.lock(LockRequest {
        jobs: LockLevel::Read,
        ..Default::default()
    });
    assert_eq!(ls.jobs().get(resp.job_id).unwrap().state, JobState::Running);
}

#[tokio::test]
async fn test_purge_frees_finished_jobs() {
    let state = build_state(CONFIG);
    register_all(&state);
    let resp = job_mgr::job_allocate(&state, submit(1, 1)).await.unwrap();
    job_mgr::complete_job(&state, resp.job_id, 0).await.unwrap();

    // MinJobAge=0 makes the job purgeable immediately.
    std::thread::sleep(std::time::Duration::from_millis(1100));
    let purged = job_mgr::purge_old_jobs(&state);
    assert_eq!(purged, 1);
    let ls = state.lock(LockRequest {
        jobs: LockLevel::Read,
        ..Default::default()
    });
    assert!(ls.jobs().jobs.is_empty());
    drop(ls);
    // The accounting summary survives the purge.
    assert!(!state.store.txns().await.is_empty());
}
