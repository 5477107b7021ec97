//! Dispatcher-level contract: auth, versioning, rate limiting, unknown
//! types, and the bare return-code path.

use super::fixtures::{Harness, TEST_CONFIG};
use bytes::Bytes;
use latticed::core::rpc::frame::Frame;
use latticed::core::rpc::message::MessageType;
use latticed::core::rpc::pack::{PackBuf, UnpackBuf};
use latticed::core::rpc::ratelimit::TokenBucketLimiter;
use latticed::core::rpc::{MIN_PROTOCOL_VERSION, PROTOCOL_VERSION};
use std::sync::Arc;

#[tokio::test]
async fn test_ping_roundtrip() {
    let harness = Harness::new(TEST_CONFIG);
    let rc = harness
        .rc(MessageType::RequestPing, 1000, Bytes::new())
        .await;
    assert_eq!(rc, 0);
}

#[tokio::test]
async fn test_missing_auth_rejected() {
    let harness = Harness::new(TEST_CONFIG);
    let frame = Frame::new(
        PROTOCOL_VERSION,
        MessageType::RequestPing as u16,
        Vec::new(),
        Bytes::new(),
    );
    let response = harness.dispatcher.dispatch(frame).await;
    let mut buf = UnpackBuf::new(response.body);
    let rc = latticed::core::rpc::message::RcResponse::unpack(&mut buf)
        .unwrap()
        .rc;
    assert_eq!(rc, 2006);
}

#[tokio::test]
async fn test_version_mismatch_rejected() {
    let harness = Harness::new(TEST_CONFIG);
    let mut frame = harness.frame(MessageType::RequestPing, 0, 0, Bytes::new());
    frame.version = MIN_PROTOCOL_VERSION - 1;
    let response = harness.dispatcher.dispatch(frame).await;
    let mut buf = UnpackBuf::new(response.body);
    let rc = latticed::core::rpc::message::RcResponse::unpack(&mut buf)
        .unwrap()
        .rc;
    assert_eq!(rc, 2004);
}

#[tokio::test]
async fn test_unknown_message_type_rejected() {
    let harness = Harness::new(TEST_CONFIG);
    let mut frame = harness.frame(MessageType::RequestPing, 0, 0, Bytes::new());
    frame.msg_type = 0x7777;
    let response = harness.dispatcher.dispatch(frame).await;
    let mut buf = UnpackBuf::new(response.body);
    let rc = latticed::core::rpc::message::RcResponse::unpack(&mut buf)
        .unwrap()
        .rc;
    assert_eq!(rc, 2008);
}

#[tokio::test]
async fn test_admin_handlers_refuse_plain_users() {
    let harness = Harness::new(TEST_CONFIG);
    let mut body = PackBuf::new();
    latticed::core::rpc::message::NodeRegistrationMsg {
        node: "lx00".to_string(),
        cpus: 2,
        real_memory: 2000,
        tmp_disk: 500,
    }
    .pack(&mut body);
    let rc = harness
        .rc(MessageType::RequestNodeRegistration, 1000, body.into_bytes())
        .await;
    assert_eq!(rc, 2102);
}

#[tokio::test]
async fn test_rate_limit_backoff() {
    // A bucket with one token and no refill: the second request backs
    // off.
    let harness = Harness::with_limiter(TEST_CONFIG, Arc::new(TokenBucketLimiter::new(0.0, 1.0)));
    let first = harness
        .rc(MessageType::RequestPing, 1000, Bytes::new())
        .await;
    let second = harness
        .rc(MessageType::RequestPing, 1000, Bytes::new())
        .await;
    assert_eq!(first, 0);
    assert_eq!(second, 2007);
}
