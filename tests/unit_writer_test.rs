use latticed::core::accounting::store::{
    AccountingStore, AccountRow, MemoryStore, TxnAction, UserRow,
};
use latticed::core::accounting::writer;

#[tokio::test]
async fn test_add_users_bulk_single_txn() {
    let store = MemoryStore::new();
    let users = vec![
        UserRow {
            name: "alice".to_string(),
            default_acct: "physics".to_string(),
            ..Default::default()
        },
        UserRow {
            name: "bob".to_string(),
            default_acct: "physics".to_string(),
            ..Default::default()
        },
    ];
    writer::add_users(&store, "root", users).await.unwrap();
    assert_eq!(store.users().await.len(), 2);
    let txns = store.txns().await;
    assert_eq!(txns.len(), 1);
    assert_eq!(txns[0].action, TxnAction::AddUser);
    assert_eq!(txns[0].object, "alice,bob");
    assert_eq!(txns[0].actor, "root");
}

#[tokio::test]
async fn test_remove_user_is_soft_delete() {
    let store = MemoryStore::new();
    writer::add_users(
        &store,
        "root",
        vec![UserRow {
            name: "carol".to_string(),
            ..Default::default()
        }],
    )
    .await
    .unwrap();
    writer::remove_user(&store, "root", "carol").await.unwrap();

    let users = store.users().await;
    assert_eq!(users.len(), 1);
    assert!(users[0].deleted);
    assert!(users[0].mod_time > 0);
    // Removing again finds no live row; the batch fails whole.
    assert!(writer::remove_user(&store, "root", "carol").await.is_err());
    assert_eq!(store.txns().await.len(), 2);
}

#[tokio::test]
async fn test_accounts_and_coordinators() {
    let store = MemoryStore::new();
    writer::add_accounts(
        &store,
        "root",
        vec![AccountRow {
            name: "physics".to_string(),
            description: "physics dept".to_string(),
            ..Default::default()
        }],
    )
    .await
    .unwrap();

    writer::add_coordinators(
        &store,
        "root",
        "physics",
        vec!["alice".to_string(), "bob".to_string()],
    )
    .await
    .unwrap();
    let coords = store.coords().await;
    assert_eq!(coords.len(), 2);
    assert!(coords.iter().all(|c| c.direct && !c.deleted));

    writer::remove_coordinators(&store, "root", "physics", vec!["bob".to_string()])
        .await
        .unwrap();
    let coords = store.coords().await;
    assert!(coords.iter().any(|c| c.user == "bob" && c.deleted));
    assert!(coords.iter().any(|c| c.user == "alice" && !c.deleted));
}

#[tokio::test]
async fn test_register_ctld_upserts_and_logs_actor() {
    let store = MemoryStore::new();
    writer::register_ctld(&store, "opsuser", "tux", "ctl0.example", 6817, 1 << 16)
        .await
        .unwrap();
    // Re-registration from a new host replaces the row, not duplicates.
    writer::register_ctld(&store, "opsuser", "tux", "ctl1.example", 6817, 1 << 16)
        .await
        .unwrap();

    let clusters = store.clusters().await;
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].control_host, "ctl1.example");

    let txns = store.txns().await;
    assert_eq!(txns.len(), 2);
    assert!(txns.iter().all(|t| t.action == TxnAction::RegisterCluster));
    assert!(txns.iter().all(|t| t.actor == "opsuser"));
    // Txn ids are monotonic and break timestamp ties.
    assert!(txns[0].id < txns[1].id);
}
