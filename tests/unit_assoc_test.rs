use latticed::core::Bitmap;
use latticed::core::model::Association;
use latticed::core::state::{AssocTable, QOS_WIDTH};

fn assoc(id: u32, acct: &str, user: &str, parent: &str) -> Association {
    Association {
        id,
        cluster: "tux".to_string(),
        acct: acct.to_string(),
        user: user.to_string(),
        partition: String::new(),
        parent_acct: parent.to_string(),
        lft: 0,
        rgt: 0,
        limits: Default::default(),
        qos: Bitmap::new(QOS_WIDTH),
        delta_qos: String::new(),
        deleted: false,
        mod_time: 0,
    }
}

fn sample_table() -> AssocTable {
    let mut table = AssocTable {
        next_assoc_id: 8,
        next_qos_id: 1,
        ..Default::default()
    };
    table.assocs.push(assoc(1, "root", "", "root"));
    table.assocs.push(assoc(2, "physics", "", "root"));
    table.assocs.push(assoc(3, "physics", "alice", "physics"));
    table.assocs.push(assoc(4, "physics", "bob", "physics"));
    table.assocs.push(assoc(5, "chemistry", "", "root"));
    table.assocs.push(assoc(6, "chemistry", "carol", "chemistry"));
    table.assocs.push(assoc(7, "organic", "", "chemistry"));
    table.rebuild_nested_sets();
    table
}

/// The nested-set invariant: any two intervals are either disjoint or one
/// properly contains the other.
fn assert_nested_set_invariant(table: &AssocTable) {
    for a in &table.assocs {
        assert!(a.lft < a.rgt, "assoc {} has lft >= rgt", a.id);
        for b in &table.assocs {
            if a.id == b.id {
                continue;
            }
            let disjoint = a.rgt < b.lft || b.rgt < a.lft;
            let a_in_b = b.lft < a.lft && a.rgt < b.rgt;
            let b_in_a = a.lft < b.lft && b.rgt < a.rgt;
            assert!(
                disjoint || a_in_b || b_in_a,
                "assocs {} [{} {}] and {} [{} {}] overlap improperly",
                a.id,
                a.lft,
                a.rgt,
                b.id,
                b.lft,
                b.rgt
            );
        }
    }
}

#[test]
fn test_rebuild_satisfies_interval_invariant() {
    let table = sample_table();
    assert_nested_set_invariant(&table);
}

#[test]
fn test_root_spans_everything() {
    let table = sample_table();
    let root = table.find("root", "", "").unwrap();
    for a in &table.assocs {
        assert!(root.contains(a), "root does not span assoc {}", a.id);
    }
}

#[test]
fn test_subtree_query_is_one_interval_scan() {
    let table = sample_table();
    let chemistry = table.find("chemistry", "", "").unwrap();
    let mut ids: Vec<u32> = table.subtree(chemistry).iter().map(|a| a.id).collect();
    ids.sort_unstable();
    // chemistry itself, carol, and the nested organic account.
    assert_eq!(ids, vec![5, 6, 7]);
}

#[test]
fn test_users_nest_inside_their_account() {
    let table = sample_table();
    let physics = table.find("physics", "", "").unwrap();
    let alice = table.find("physics", "alice", "").unwrap();
    assert!(physics.contains(alice));
    let chemistry = table.find("chemistry", "", "").unwrap();
    assert!(!chemistry.contains(alice));
}

#[test]
fn test_deleted_assocs_drop_out_of_lookup() {
    let mut table = sample_table();
    table.assocs.iter_mut().find(|a| a.id == 4).unwrap().deleted = true;
    assert!(table.find("physics", "bob", "").is_none());
    // Still addressable by id for history.
    assert!(table.find_by_id(4).is_some());
}

#[test]
fn test_rebuild_after_growth_keeps_invariant() {
    let mut table = sample_table();
    table.assocs.push(assoc(8, "organic", "dave", "organic"));
    table.assocs.push(assoc(9, "inorganic", "", "chemistry"));
    table.rebuild_nested_sets();
    assert_nested_set_invariant(&table);
    let chemistry = table.find("chemistry", "", "").unwrap();
    let dave = table.find("organic", "dave", "").unwrap();
    assert!(chemistry.contains(dave));
}
