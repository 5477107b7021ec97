//! Credential lifecycle driven through the dispatcher: a step create
//! returns launch and net-alias tokens, the compute side verifies them,
//! and replay/expiration behave per context.

use super::fixtures::{Harness, TEST_CONFIG};
use latticed::LatticeError;
use latticed::core::cred::{CredContext, CredPayload};
use latticed::core::model::JobState;
use latticed::core::rpc::message::{MessageType, StepCreateMsg, StepCreateResponseMsg};
use latticed::core::rpc::pack::{NO_VAL, PackBuf, UnpackBuf};
use latticed::core::state::now;

async fn create_step(harness: &Harness, job_id: u32) -> StepCreateResponseMsg {
    let mut body = PackBuf::new();
    StepCreateMsg {
        job_id,
        user_id: 1000,
        node_count: 0,
        node_list: None,
        num_tasks: 2,
        dist: "block".to_string(),
        reserved_id: NO_VAL,
    }
    .pack(&mut body);
    let response = harness
        .dispatcher
        .dispatch(harness.frame(MessageType::RequestStepCreate, 1000, 100, body.into_bytes()))
        .await;
    assert_eq!(response.msg_type, MessageType::ResponseStepCreate as u16);
    let mut buf = UnpackBuf::new(response.body);
    StepCreateResponseMsg::unpack(&mut buf).unwrap()
}

#[tokio::test]
async fn test_launch_credential_timeline() {
    let harness = Harness::new(TEST_CONFIG);
    harness.register_all_nodes().await;
    let job = harness.submit(&harness.submit_msg(2, 2)).await.unwrap();
    assert_eq!(job.job_state(), Some(JobState::Running));

    let step = create_step(&harness, job.job_id).await;
    let issued = now();

    // First presentation inside the window verifies and carries the
    // step's coordinates.
    let cred = harness
        .state
        .cred
        .verify(&step.credential, CredContext::Launch, issued + 10)
        .unwrap();
    match cred.payload {
        CredPayload::Launch(p) => {
            assert_eq!((p.job_id, p.step_id), (job.job_id, step.step_id));
            assert_eq!(p.node_list, "lx[00-01]");
        }
        other => panic!("wrong payload {other:?}"),
    }

    // Second presentation of the same token is a replay.
    assert_eq!(
        harness
            .state
            .cred
            .verify(&step.credential, CredContext::Launch, issued + 20)
            .unwrap_err(),
        LatticeError::CredReplayed
    );

    // Past the 60-second lifetime the token is dead regardless.
    assert_eq!(
        harness
            .state
            .cred
            .verify(&step.credential, CredContext::Launch, issued + 70)
            .unwrap_err(),
        LatticeError::CredExpired
    );
}

#[tokio::test]
async fn test_step_response_carries_reusable_net_credential() {
    let harness = Harness::new(TEST_CONFIG);
    harness.register_all_nodes().await;
    let job = harness.submit(&harness.submit_msg(2, 2)).await.unwrap();

    let step = create_step(&harness, job.job_id).await;
    let tnow = now();

    for _ in 0..2 {
        let net = harness
            .state
            .cred
            .verify(&step.net_credential, CredContext::Net, tnow + 1)
            .expect("net credential re-fetchable inside its window");
        match net.payload {
            CredPayload::Net(ref p) => {
                assert_eq!(p.job_id, job.job_id);
                assert_eq!(p.aliases.len(), 2);
                assert_eq!(p.aliases[0].node, "lx00");
            }
            ref other => panic!("wrong payload {other:?}"),
        }
    }

    // A net token presented under the launch context is a skip, not a
    // launch authorization.
    assert_eq!(
        harness
            .state
            .cred
            .verify(&step.net_credential, CredContext::Launch, tnow + 1)
            .unwrap_err(),
        LatticeError::CredSkip
    );
}
