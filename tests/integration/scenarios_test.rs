//! End-to-end controller scenarios driven through the dispatcher.

use super::fixtures::{Harness, TEST_CONFIG};
use latticed::core::accounting::store::{AccountingStore, TxnAction};
use latticed::core::locks::{LockLevel, LockRequest};
use latticed::core::model::JobState;
use latticed::core::rpc::message::{CancelJobMsg, DrainNodeMsg, MessageType};
use latticed::core::rpc::pack::{NO_VAL, PackBuf};

#[tokio::test]
async fn test_submit_and_allocate_end_to_end() {
    let harness = Harness::new(TEST_CONFIG);
    harness.register_all_nodes().await;

    let resp = harness.submit(&harness.submit_msg(2, 2)).await.unwrap();
    assert_eq!(resp.rc, 0);
    assert_eq!(resp.job_state(), Some(JobState::Running));
    assert_eq!(resp.node_list, "lx[00-01]");
    assert_eq!(resp.cpus_per_node, vec![1]);
    assert_eq!(resp.cpu_count_reps, vec![2]);

    // Nodes 0 and 1 went IDLE -> BUSY; one ADD_JOB txn landed.
    let ls = harness.state.lock(LockRequest {
        nodes: LockLevel::Read,
        ..Default::default()
    });
    assert!(!ls.nodes().idle_nodes.test(0));
    assert!(!ls.nodes().idle_nodes.test(1));
    assert!(ls.nodes().idle_nodes.test(2));
    drop(ls);

    let txns = harness.state.store.txns().await;
    let adds: Vec<_> = txns
        .iter()
        .filter(|t| t.action == TxnAction::AddJob)
        .collect();
    assert_eq!(adds.len(), 1);
    assert_eq!(adds[0].object, resp.job_id.to_string());
}

#[tokio::test]
async fn test_partition_group_filter_end_to_end() {
    let harness = Harness::new(TEST_CONFIG);
    harness.register_all_nodes().await;

    let mut msg = harness.submit_msg(1, 1);
    msg.submit.group_name = "guests".to_string();
    let rc = harness.submit(&msg).await.unwrap_err();
    assert_eq!(rc, 2103);

    // No job record and no txn row.
    let ls = harness.state.lock(LockRequest {
        jobs: LockLevel::Read,
        ..Default::default()
    });
    assert!(ls.jobs().jobs.is_empty());
    drop(ls);
    let job_txns = harness
        .state
        .store
        .txns()
        .await
        .iter()
        .filter(|t| t.action == TxnAction::AddJob)
        .count();
    assert_eq!(job_txns, 0);
}

#[tokio::test]
async fn test_contiguous_constraint_end_to_end() {
    let harness = Harness::new(TEST_CONFIG);
    harness.register_all_nodes().await;

    // Down node lx02: the idle set becomes {0, 1, 3}.
    let mut body = PackBuf::new();
    DrainNodeMsg {
        node: "lx02".to_string(),
        reason: "flaky nic".to_string(),
    }
    .pack(&mut body);
    let rc = harness
        .rc(MessageType::RequestDownNode, 0, body.into_bytes())
        .await;
    assert_eq!(rc, 0);

    let mut msg = harness.submit_msg(3, 3);
    msg.submit.details.contiguous = true;
    let resp = harness.submit(&msg).await.unwrap();
    // No contiguous run of three exists; the job queues.
    assert_eq!(resp.job_state(), Some(JobState::Pending));
    assert!(resp.node_list.is_empty());
}

#[tokio::test]
async fn test_cancel_idempotence_end_to_end() {
    let harness = Harness::new(TEST_CONFIG);
    harness.register_all_nodes().await;
    let resp = harness.submit(&harness.submit_msg(1, 1)).await.unwrap();

    let cancel_body = || {
        let mut body = PackBuf::new();
        CancelJobMsg {
            job_id: resp.job_id,
            step_id: NO_VAL,
        }
        .pack(&mut body);
        body.into_bytes()
    };

    let first = harness
        .rc(MessageType::RequestCancelJob, 1000, cancel_body())
        .await;
    assert_eq!(first, 0);
    let txns_after_first = harness.state.store.txns().await.len();

    // The job is gone; both repeat cancels answer ALREADY_DONE and leave
    // no new txn row.
    let second = harness
        .rc(MessageType::RequestCancelJob, 1000, cancel_body())
        .await;
    let third = harness
        .rc(MessageType::RequestCancelJob, 1000, cancel_body())
        .await;
    assert_eq!(second, 2302);
    assert_eq!(third, 2302);
    assert_eq!(harness.state.store.txns().await.len(), txns_after_first);

    let ls = harness.state.lock(LockRequest {
        jobs: LockLevel::Read,
        ..Default::default()
    });
    assert_eq!(
        ls.jobs().get(resp.job_id).unwrap().state,
        JobState::Cancelled
    );
}

#[tokio::test]
async fn test_foreign_user_cannot_cancel() {
    let harness = Harness::new(TEST_CONFIG);
    harness.register_all_nodes().await;
    let resp = harness.submit(&harness.submit_msg(1, 1)).await.unwrap();

    let mut body = PackBuf::new();
    CancelJobMsg {
        job_id: resp.job_id,
        step_id: NO_VAL,
    }
    .pack(&mut body);
    let rc = harness
        .rc(MessageType::RequestCancelJob, 4444, body.into_bytes())
        .await;
    assert_eq!(rc, 2102);
}

#[tokio::test]
async fn test_sbcast_credential_end_to_end() {
    use latticed::core::cred::{CredContext, CredPayload};
    use latticed::core::rpc::message::{SbcastCredMsg, SbcastCredResponseMsg};
    use latticed::core::rpc::pack::UnpackBuf;
    use latticed::core::state::now;

    let harness = Harness::new(TEST_CONFIG);
    harness.register_all_nodes().await;
    let resp = harness.submit(&harness.submit_msg(2, 2)).await.unwrap();

    let mut body = PackBuf::new();
    SbcastCredMsg {
        job_id: resp.job_id,
        path: "/tmp/payload.bin".to_string(),
        mode: 0o755,
    }
    .pack(&mut body);
    let response = harness
        .dispatcher
        .dispatch(harness.frame(MessageType::RequestSbcastCred, 1000, 100, body.into_bytes()))
        .await;
    assert_eq!(response.msg_type, MessageType::ResponseSbcastCred as u16);
    let mut buf = UnpackBuf::new(response.body);
    let sbcast = SbcastCredResponseMsg::unpack(&mut buf).unwrap();
    assert_eq!(sbcast.node_list, "lx[00-01]");

    // The token verifies in the sbcast context and names the target
    // path; a second presentation is a replay.
    let cred = harness
        .state
        .cred
        .verify(&sbcast.credential, CredContext::Sbcast, now())
        .unwrap();
    match cred.payload {
        CredPayload::Sbcast(p) => {
            assert_eq!(p.job_id, resp.job_id);
            assert_eq!(p.path, "/tmp/payload.bin");
            assert_eq!(p.mode, 0o755);
            assert_eq!(p.node_list, "lx[00-01]");
        }
        other => panic!("wrong payload {other:?}"),
    }
    assert!(
        harness
            .state
            .cred
            .verify(&sbcast.credential, CredContext::Sbcast, now())
            .is_err()
    );
}
