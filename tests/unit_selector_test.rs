use latticed::LatticeError;
use latticed::config::Config;
use latticed::core::accounting::store::MemoryStore;
use latticed::core::cred::{CredManager, Keyring, signer_for};
use latticed::core::locks::{LockLevel, LockRequest};
use latticed::core::model::JobDetails;
use latticed::core::sched::selector::{SelectContext, select_nodes};
use latticed::core::sched::topology::NoneTopology;
use latticed::core::sched::{SelectorKind, cons_res};
use latticed::core::state::{ControllerState, node_mgr};
use std::sync::Arc;

const CONFIG: &str = r#"
ControlMachine=ctl0
ClusterName=tux
NodeName=lx[00-03] CPUs=2 RealMemory=2000 TmpDisk=500 Weight=4 Feature=fast
NodeName=fat[0-1] CPUs=8 RealMemory=32000 TmpDisk=4000 Weight=8 Feature=bigmem
PartitionName=batch Nodes=lx[00-03],fat[0-1] MaxTime=60 Default=YES Shared=YES
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

fn select(
    state: &ControllerState,
    details: &JobDetails,
    test_only: bool,
) -> Result<(Vec<usize>, Vec<u32>), LatticeError> {
    let topology = state.topology.clone();
    let mut ls = state.lock(LockRequest {
        nodes: LockLevel::Write,
        partitions: LockLevel::Read,
        configs: LockLevel::Read,
        ..Default::default()
    });
    let (parts, nodes, configs) = ls.part_view();
    let part = parts.get("batch").unwrap();
    let ctx = SelectContext {
        details,
        part,
        part_idx: 0,
        resv: None,
        topo_params: None,
        kind: SelectorKind::ConsRes,
        test_only,
    };
    let (alloc, _) = select_nodes(&ctx, nodes, configs, topology.as_ref())?;
    Ok((alloc.node_bitmap.iter_set().collect(), alloc.per_node_cpus))
}

#[test]
fn test_lowest_weight_wins() {
    let state = build_state();
    register_all(&state);
    // One node, one cpu: the weight-4 lx nodes come before the fat ones.
    let (nodes, cpus) = select(
        &state,
        &JobDetails {
            num_procs: 1,
            min_nodes: 1,
            ..Default::default()
        },
        true,
    )
    .unwrap();
    assert_eq!(nodes, vec![0]);
    assert_eq!(cpus, vec![1]);
}

#[test]
fn test_feature_constraint_restricts_candidates() {
    let state = build_state();
    register_all(&state);
    let (nodes, _) = select(
        &state,
        &JobDetails {
            num_procs: 1,
            min_nodes: 1,
            features: vec!["bigmem".to_string()],
            ..Default::default()
        },
        true,
    )
    .unwrap();
    // Only the fat nodes carry the feature; index 4 is fat0.
    assert_eq!(nodes, vec![4]);
}

#[test]
fn test_memory_floor_excludes_thin_nodes() {
    let state = build_state();
    register_all(&state);
    let (nodes, _) = select(
        &state,
        &JobDetails {
            num_procs: 2,
            min_nodes: 1,
            min_memory: 16000,
            ..Default::default()
        },
        true,
    )
    .unwrap();
    assert_eq!(nodes, vec![4]);
}

#[test]
fn test_exclusive_charges_every_cpu() {
    let state = build_state();
    register_all(&state);
    let (nodes, cpus) = select(
        &state,
        &JobDetails {
            num_procs: 2,
            min_nodes: 2,
            exclusive: true,
            ..Default::default()
        },
        true,
    )
    .unwrap();
    assert_eq!(nodes, vec![0, 1]);
    assert_eq!(cpus, vec![2, 2]);
}

#[test]
fn test_insufficient_resources_is_nodes_busy() {
    let state = build_state();
    register_all(&state);
    let err = select(
        &state,
        &JobDetails {
            num_procs: 1,
            min_nodes: 10,
            ..Default::default()
        },
        true,
    )
    .unwrap_err();
    assert_eq!(err, LatticeError::NodesBusy);
}

#[test]
fn test_min_over_max_rejected_at_validation() {
    let state = build_state();
    register_all(&state);
    let err = select(
        &state,
        &JobDetails {
            num_procs: 1,
            min_nodes: 3,
            max_nodes: 2,
            ..Default::default()
        },
        true,
    )
    .unwrap_err();
    assert_eq!(err, LatticeError::InvalidNodeCount);
}

#[test]
fn test_required_node_pulled_into_allocation() {
    let state = build_state();
    register_all(&state);
    let req_bitmap = {
        let ls = state.lock(LockRequest {
            nodes: LockLevel::Read,
            ..Default::default()
        });
        ls.nodes().name2bitmap("lx03").unwrap()
    };
    let (nodes, _) = select(
        &state,
        &JobDetails {
            num_procs: 1,
            min_nodes: 1,
            req_node_bitmap: Some(req_bitmap),
            ..Default::default()
        },
        true,
    )
    .unwrap();
    assert_eq!(nodes, vec![3]);
}

#[test]
fn test_row_charges_accumulate_and_unwind() {
    let state = build_state();
    register_all(&state);

    // A real (non-simulated) selection charges the chosen rows.
    let details = JobDetails {
        num_procs: 2,
        min_nodes: 1,
        shared: true,
        ..Default::default()
    };
    let (nodes, cpus) = select(&state, &details, false).unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(cpus.iter().sum::<u32>(), 2);
    {
        let ls = state.lock(LockRequest {
            nodes: LockLevel::Read,
            ..Default::default()
        });
        let rows = ls.nodes().cr_rows.get(&(nodes[0], 0)).unwrap();
        assert_eq!(rows.iter().map(|r| r.used_cpus).sum::<u32>(), 2);
    }

    // A will-run pass must not move the counters.
    let before: u32 = {
        let ls = state.lock(LockRequest {
            nodes: LockLevel::Read,
            ..Default::default()
        });
        ls.nodes()
            .cr_rows
            .values()
            .flat_map(|rows| rows.iter().map(|r| r.used_cpus))
            .sum()
    };
    select(&state, &details, true).unwrap();
    let after: u32 = {
        let ls = state.lock(LockRequest {
            nodes: LockLevel::Read,
            ..Default::default()
        });
        ls.nodes()
            .cr_rows
            .values()
            .flat_map(|rows| rows.iter().map(|r| r.used_cpus))
            .sum()
    };
    assert_eq!(before, after);
}

#[test]
fn test_best_fit_row_selection() {
    let rows = vec![
        latticed::core::state::CrRow {
            used_cpus: 1,
            used_cores_per_socket: Vec::new(),
        },
        latticed::core::state::CrRow {
            used_cpus: 3,
            used_cores_per_socket: Vec::new(),
        },
        latticed::core::state::CrRow::default(),
        latticed::core::state::CrRow::default(),
    ];
    // Capacity 4, need 1: the most-used row that still fits wins.
    assert_eq!(cons_res::pick_row(&rows, 1, 4), Some(1));
    // Need 2: row 1 has only one free cpu, so row 0 wins over the empty
    // rows.
    assert_eq!(cons_res::pick_row(&rows, 2, 4), Some(0));
}
