use latticed::config::Config;
use latticed::core::accounting::store::MemoryStore;
use latticed::core::cred::{CredManager, Keyring, signer_for};
use latticed::core::locks::{LockLevel, LockRequest};
use latticed::core::model::{PartitionUpdate, SharedPolicy};
use latticed::core::sched::topology::NoneTopology;
use latticed::core::state::{ControllerState, part_mgr};
use std::sync::Arc;

const CONFIG: &str = r#"
ControlMachine=ctl0
ClusterName=tux
NodeName=lx[00-05] CPUs=2 RealMemory=1000 TmpDisk=100
PartitionName=batch Nodes=lx[00-03] MaxTime=60 Default=YES Shared=NO AllowGroups=staff
PartitionName=debug Nodes=lx[04-05] MaxTime=10 Shared=YES
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

fn update_locks() -> LockRequest {
    LockRequest {
        nodes: LockLevel::Write,
        partitions: LockLevel::Write,
        configs: LockLevel::Read,
        ..Default::default()
    }
}

#[test]
fn test_nodes_change_rebuilds_bitmap_and_pointers() {
    let state = build_state();
    let mut ls = state.lock(update_locks());
    let (parts, nodes, configs) = ls.part_view();

    part_mgr::update_partition(
        parts,
        nodes,
        configs,
        &PartitionUpdate {
            name: "batch".to_string(),
            nodes: Some("lx[00-01,04]".to_string()),
            ..Default::default()
        },
    )
    .unwrap();

    let part = parts.get("batch").unwrap();
    let part_idx = parts.index_of("batch").unwrap();
    // Ground truth: the bitmap equals a fresh resolution of the node
    // expression, and every member node points back at the partition.
    let expected = nodes.name2bitmap(&part.nodes).unwrap();
    assert_eq!(part.node_bitmap, expected);
    assert_eq!(part.total_nodes, 3);
    assert_eq!(part.total_cpus, 6);
    for idx in part.node_bitmap.iter_set() {
        assert_eq!(nodes.nodes[idx].part_idx, Some(part_idx));
    }
    // Departed nodes are detached.
    assert_eq!(nodes.nodes[2].part_idx, None);
    assert_eq!(nodes.nodes[3].part_idx, None);
}

#[test]
fn test_untouched_fields_survive_diff() {
    let state = build_state();
    let mut ls = state.lock(update_locks());
    let (parts, nodes, configs) = ls.part_view();

    part_mgr::update_partition(
        parts,
        nodes,
        configs,
        &PartitionUpdate {
            name: "batch".to_string(),
            max_time: Some(120),
            ..Default::default()
        },
    )
    .unwrap();

    let part = parts.get("batch").unwrap();
    assert_eq!(part.max_time, 120);
    // Everything absent from the diff is untouched.
    assert_eq!(part.allow_groups, vec!["staff".to_string()]);
    assert_eq!(part.shared, SharedPolicy::No);
    assert!(part.is_default);
}

#[test]
fn test_empty_string_clears_group_list() {
    let state = build_state();
    let mut ls = state.lock(update_locks());
    let (parts, nodes, configs) = ls.part_view();

    part_mgr::update_partition(
        parts,
        nodes,
        configs,
        &PartitionUpdate {
            name: "batch".to_string(),
            allow_groups: Some(String::new()),
            ..Default::default()
        },
    )
    .unwrap();
    let part = parts.get("batch").unwrap();
    assert!(part.allow_groups.is_empty());
    assert!(part.group_allowed("anyone"));
}

#[test]
fn test_default_flag_moves_exclusively() {
    let state = build_state();
    let mut ls = state.lock(update_locks());
    let (parts, nodes, configs) = ls.part_view();

    part_mgr::update_partition(
        parts,
        nodes,
        configs,
        &PartitionUpdate {
            name: "debug".to_string(),
            set_default: Some(true),
            ..Default::default()
        },
    )
    .unwrap();
    let defaults: Vec<&str> = parts
        .parts
        .values()
        .filter(|p| p.is_default)
        .map(|p| p.name.as_str())
        .collect();
    assert_eq!(defaults, vec!["debug"]);
}

#[test]
fn test_bad_node_expression_leaves_partition_untouched() {
    let state = build_state();
    let mut ls = state.lock(update_locks());
    let (parts, nodes, configs) = ls.part_view();

    let before = parts.get("batch").unwrap().node_bitmap.clone();
    let err = part_mgr::update_partition(
        parts,
        nodes,
        configs,
        &PartitionUpdate {
            name: "batch".to_string(),
            nodes: Some("ghost[0-3]".to_string()),
            ..Default::default()
        },
    );
    assert!(err.is_err());
    assert_eq!(parts.get("batch").unwrap().node_bitmap, before);
}

#[test]
fn test_unknown_partition_rejected() {
    let state = build_state();
    let mut ls = state.lock(update_locks());
    let (parts, nodes, configs) = ls.part_view();
    assert!(
        part_mgr::update_partition(
            parts,
            nodes,
            configs,
            &PartitionUpdate {
                name: "nope".to_string(),
                ..Default::default()
            },
        )
        .is_err()
    );
}

#[test]
fn test_two_phase_removal() {
    let state = build_state();
    {
        let mut ls = state.lock(LockRequest {
            partitions: LockLevel::Write,
            ..Default::default()
        });
        part_mgr::flag_partition_removal(ls.partitions_mut(), "debug").unwrap();
        assert!(!ls.partitions().get("debug").unwrap().state_up);
    }
    {
        let mut ls = state.lock(LockRequest {
            jobs: LockLevel::Read,
            nodes: LockLevel::Write,
            partitions: LockLevel::Write,
            ..Default::default()
        });
        let (jobs, nodes, parts) = ls.purge_view();
        let removed = part_mgr::sweep_removed_partitions(parts, jobs, nodes);
        assert_eq!(removed, vec!["debug".to_string()]);
        assert!(parts.get("debug").is_none());
        // Former members are detached.
        assert_eq!(nodes.nodes[4].part_idx, None);
        assert_eq!(nodes.nodes[5].part_idx, None);
    }
}

#[test]
fn test_default_partition_cannot_be_removed() {
    let state = build_state();
    let mut ls = state.lock(LockRequest {
        partitions: LockLevel::Write,
        ..Default::default()
    });
    assert!(part_mgr::flag_partition_removal(ls.partitions_mut(), "batch").is_err());
}
