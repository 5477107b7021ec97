use latticed::core::Bitmap;
use latticed::core::model::Association;
use latticed::core::state::{AssocTable, QOS_WIDTH};
use proptest::prelude::*;

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

/// Builds a random account tree: each account's parent is chosen among
/// the accounts created before it, and each account gets a few users.
fn random_table(parents: &[usize], users_per_acct: &[usize]) -> AssocTable {
    let mut table = AssocTable::default();
    let mut next_id = 1u32;
    table.assocs.push(assoc(next_id, "root", "", "root"));
    next_id += 1;

    let mut acct_names = vec!["root".to_string()];
    for (i, &parent) in parents.iter().enumerate() {
        let name = format!("acct{i}");
        let parent_name = acct_names[parent % acct_names.len()].clone();
        table.assocs.push(assoc(next_id, &name, "", &parent_name));
        next_id += 1;
        acct_names.push(name);
    }
    for (i, &count) in users_per_acct.iter().enumerate() {
        let acct = acct_names[i % acct_names.len()].clone();
        for u in 0..count {
            table
                .assocs
                .push(assoc(next_id, &acct, &format!("user{i}_{u}"), &acct));
            next_id += 1;
        }
    }
    table.rebuild_nested_sets();
    table
}

proptest! {
    /// For any two associations the nested-set intervals are disjoint or
    /// strictly nested, and lft < rgt everywhere.
    #[test]
    fn intervals_disjoint_or_nested(
        parents in prop::collection::vec(0usize..8, 0..12),
        users in prop::collection::vec(0usize..4, 0..12),
    ) {
        let table = random_table(&parents, &users);
        for a in &table.assocs {
            prop_assert!(a.lft < a.rgt);
            for b in &table.assocs {
                if a.id == b.id {
                    continue;
                }
                let disjoint = a.rgt < b.lft || b.rgt < a.lft;
                let nested = (b.lft < a.lft && a.rgt < b.rgt) || (a.lft < b.lft && b.rgt < a.rgt);
                prop_assert!(disjoint || nested,
                    "{}:[{},{}] vs {}:[{},{}]", a.id, a.lft, a.rgt, b.id, b.lft, b.rgt);
            }
        }
    }

    /// The root interval spans every association, and the bounds are a
    /// permutation of 1..=2n over live associations.
    #[test]
    fn root_spans_and_bounds_are_tight(
        parents in prop::collection::vec(0usize..8, 0..10),
        users in prop::collection::vec(0usize..4, 0..10),
    ) {
        let table = random_table(&parents, &users);
        let root = table.find("root", "", "").unwrap();
        let mut bounds: Vec<u32> = Vec::new();
        for a in &table.assocs {
            prop_assert!(root.contains(a));
            bounds.push(a.lft);
            bounds.push(a.rgt);
        }
        bounds.sort_unstable();
        let expected: Vec<u32> = (1..=2 * table.assocs.len() as u32).collect();
        prop_assert_eq!(bounds, expected);
    }
}
