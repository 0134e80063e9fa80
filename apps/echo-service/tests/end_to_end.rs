//! End-to-end scenarios driven against the built service over a [`MockBus`],
//! mirroring the happy-path/validation/domain-error/concurrent-fan-out cases
//! this framework is built to serve.

use std::sync::Arc;

use bytes::Bytes;
use natsapi::bus::mock::MockBus;
use natsapi::lifecycle::Runnable;
use natsapi::{App, EndpointOptions, MessageBus};
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[path = "../src/handlers.rs"]
mod handlers;

fn build_app() -> natsapi::BuiltApp {
    let mut app = App::new("development.echo")
        .with_title("echo-service")
        .with_version("0.1.0")
        .with_domain_errors(handlers::domain_error_catalog().unwrap());

    app.state().register(Arc::new(handlers::EchoCounter::default()));

    app.add_request("foo", handlers::echo, EndpointOptions::new()).unwrap();
    app.add_request("lookup.RETRIEVE", handlers::lookup, EndpointOptions::new())
        .unwrap();
    app.add_request("brokers.CREATE", handlers::create_broker, EndpointOptions::new())
        .unwrap();

    app.build().unwrap()
}

async fn run_against(bus: Arc<MockBus>, messages: Vec<(&str, &str, serde_json::Value)>) -> Vec<(String, Bytes)> {
    let built = build_app();
    let service = Arc::new(built.into_service(bus.clone() as Arc<dyn MessageBus>));
    let cancel = CancellationToken::new();
    let runner = {
        let service = service.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { service.run(cancel).await })
    };

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    for (subject, reply, params) in messages {
        let body = json!({"jsonrpc": "2.0", "params": params});
        bus.deliver(
            &format!("development.echo.{subject}"),
            Some(reply),
            Bytes::from(serde_json::to_vec(&body).unwrap()),
        )
        .await;
    }

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    cancel.cancel();
    let _ = runner.await;

    bus.replies()
}

#[tokio::test]
async fn happy_request_replies_with_ok_status() {
    let bus = Arc::new(MockBus::new());
    let replies = run_against(bus, vec![("foo", "_INBOX.1", json!({"foo": 1}))]).await;

    assert_eq!(replies.len(), 1);
    let reply: natsapi::JsonRpcReply = serde_json::from_slice(&replies[0].1).unwrap();
    assert_eq!(reply.result.unwrap()["status"], "OK");
}

#[tokio::test]
async fn union_result_lookup_returns_the_matching_variant() {
    let bus = Arc::new(MockBus::new());
    let replies = run_against(
        bus,
        vec![("lookup.RETRIEVE", "_INBOX.1", json!({"name": "broker-9"}))],
    )
    .await;

    let reply: natsapi::JsonRpcReply = serde_json::from_slice(&replies[0].1).unwrap();
    assert_eq!(reply.result.unwrap()["broker_id"], "broker-9");
}

#[tokio::test]
async fn domain_error_is_reported_with_its_declared_code() {
    let bus = Arc::new(MockBus::new());
    let replies = run_against(
        bus,
        vec![("brokers.CREATE", "_INBOX.1", json!({"broker_id": "b-1"}))],
    )
    .await;

    let reply: natsapi::JsonRpcReply = serde_json::from_slice(&replies[0].1).unwrap();
    let error = reply.error.unwrap();
    assert_eq!(error.code, -27001);
    assert_eq!(error.message, "BROKER_EXISTS");
}

#[tokio::test]
async fn validation_failure_is_reported_for_a_missing_field() {
    let bus = Arc::new(MockBus::new());
    let replies = run_against(bus, vec![("foo", "_INBOX.1", json!({}))]).await;

    let reply: natsapi::JsonRpcReply = serde_json::from_slice(&replies[0].1).unwrap();
    let error = reply.error.unwrap();
    assert_eq!(error.code, natsapi::errors::VALIDATION_ERROR_CODE);
}

#[tokio::test]
async fn unknown_subject_is_reported_as_no_such_endpoint() {
    let bus = Arc::new(MockBus::new());
    let built = build_app();
    let service = Arc::new(built.into_service(bus.clone() as Arc<dyn MessageBus>));
    let cancel = CancellationToken::new();
    let runner = {
        let service = service.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { service.run(cancel).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    bus.deliver(
        "development.echo.nonexistent.METHOD",
        Some("_INBOX.1"),
        Bytes::from_static(b"{\"jsonrpc\":\"2.0\",\"params\":{}}"),
    )
    .await;

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    cancel.cancel();
    let _ = runner.await;

    let replies = bus.replies();
    assert_eq!(replies.len(), 1);
    let reply: natsapi::JsonRpcReply = serde_json::from_slice(&replies[0].1).unwrap();
    let error = reply.error.unwrap();
    assert_eq!(error.code, natsapi::errors::UNKNOWN_METHOD_CODE);
}

#[tokio::test]
async fn concurrent_fan_out_increments_the_counter_for_every_call() {
    let bus = Arc::new(MockBus::new());
    let messages: Vec<_> = (0..5).map(|i| ("foo", "_INBOX.1", json!({"foo": i}))).collect();
    let replies = run_against(bus, messages).await;

    assert_eq!(replies.len(), 5);
    for (_, payload) in &replies {
        let reply: natsapi::JsonRpcReply = serde_json::from_slice(payload).unwrap();
        assert_eq!(reply.result.unwrap()["status"], "OK");
    }
}
