//! Concurrent dispatch (§4.4, §4.5 "Dispatch & Concurrency").
//!
//! Mirrors `client.py`'s `handle_request`/`_handle_request`/`_handle_publish`:
//! classify by presence of a reply subject, decode the envelope, resolve the
//! endpoint (falling back to a `subject + "." + method` lookup), validate and
//! invoke, normalize the result, and — for requests — always publish a reply,
//! even when the handler raised.
//!
//! The source runs one task per message on a single-threaded event loop
//! (cooperative concurrency). This dispatcher spawns each message onto the
//! multi-threaded tokio executor instead, so two in-flight handlers can run
//! on different OS threads; callers sharing mutable state across handlers
//! must synchronize themselves (also true of the source, which makes the
//! same promise about `StateBag`/`State`, just enforced by the GIL there).

use std::sync::Arc;

use bytes::Bytes;
use rand::RngCore;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::{BusMessage, MessageBus};
use crate::context;
use crate::endpoint::{AppHandle, Endpoint};
use crate::errors::{ErrorHandlerRegistry, JsonRpcException};
use crate::router::RoutingTable;
use crate::rpc::{JsonRpcReply, JsonRpcRequest};

/// Generates the same kind of opaque per-task id the source stamps onto its
/// `asyncio` task names (`"natsapi_" + secrets.token_hex(16)`), used here only
/// for log correlation since tokio tasks aren't named on stable Rust.
fn task_tag() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    format!("natsapi_{}", hex::encode(bytes))
}

pub struct Dispatcher {
    routing: Arc<RoutingTable>,
    app: AppHandle,
    error_handlers: Arc<ErrorHandlerRegistry>,
    bus: Arc<dyn MessageBus>,
    tasks: TaskTracker,
}

impl Dispatcher {
    pub fn new(
        routing: Arc<RoutingTable>,
        app: AppHandle,
        error_handlers: Arc<ErrorHandlerRegistry>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        Self {
            routing,
            app,
            error_handlers,
            bus,
            tasks: TaskTracker::new(),
        }
    }

    /// Classify and spawn a freshly-received message (`handle_request`).
    /// A message with a usable reply subject is treated as a request/reply
    /// call; otherwise it's a fire-and-forget publish.
    pub fn handle_message(&self, msg: BusMessage) {
        let is_request = msg
            .reply
            .as_deref()
            .map(|r| !r.is_empty() && r != "None")
            .unwrap_or(false);

        let routing = self.routing.clone();
        let app = self.app.clone();
        let error_handlers = self.error_handlers.clone();
        let bus = self.bus.clone();
        let tag = task_tag();

        self.tasks.spawn(async move {
            if is_request {
                handle_request(tag, routing, app, error_handlers, bus, msg).await;
            } else {
                handle_publish(tag, routing, app, msg).await;
            }
        });
    }

    /// Await every in-flight dispatched task (app shutdown, §6).
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }

    pub fn inflight_count(&self) -> usize {
        self.tasks.len()
    }
}

fn resolve_endpoint(
    routing: &RoutingTable,
    subject: &str,
    method: Option<&str>,
) -> Result<Arc<Endpoint>, JsonRpcException> {
    routing.resolve(subject, method).ok_or_else(|| {
        JsonRpcException::unknown_method(format!(
            "No such endpoint available. Checked for {subject}"
        ))
    })
}

async fn handle_publish(tag: String, routing: Arc<RoutingTable>, app: AppHandle, msg: BusMessage) {
    let request: JsonRpcRequest = match serde_json::from_slice(&msg.payload) {
        Ok(r) => r,
        Err(e) => {
            warn!(task = %tag, subject = %msg.subject, error = %e, "dropping malformed publish envelope");
            return;
        }
    };

    let endpoint = match resolve_endpoint(&routing, &msg.subject, request.method.as_deref()) {
        Ok(e) => e,
        Err(e) => {
            warn!(task = %tag, subject = %msg.subject, error = %e, "no handler for publish");
            return;
        }
    };

    let Endpoint::Publish(publish) = endpoint.as_ref() else {
        warn!(task = %tag, subject = %msg.subject, "resolved a request endpoint for a one-way publish");
        return;
    };

    debug!(task = %tag, subject = %msg.subject, "dispatching publish");
    if let Err(e) = (publish.handler)(app, request.params).await {
        warn!(task = %tag, subject = %msg.subject, error = %e, "publish handler failed");
    }
}

async fn handle_request(
    tag: String,
    routing: Arc<RoutingTable>,
    app: AppHandle,
    error_handlers: Arc<ErrorHandlerRegistry>,
    bus: Arc<dyn MessageBus>,
    msg: BusMessage,
) {
    let reply_subject = msg.reply.clone().unwrap_or_default();

    let reply = dispatch_request(tag.clone(), &routing, app, &error_handlers, &msg).await;

    let payload = reply.to_bytes();
    if let Err(e) = bus.publish_reply(&reply_subject, Bytes::from(payload)).await {
        warn!(task = %tag, reply = %reply_subject, error = %e, "failed to publish reply");
    }
}

async fn dispatch_request(
    tag: String,
    routing: &RoutingTable,
    app: AppHandle,
    error_handlers: &ErrorHandlerRegistry,
    msg: &BusMessage,
) -> JsonRpcReply {
    let mut request: JsonRpcRequest = match serde_json::from_slice(&msg.payload) {
        Ok(r) => r,
        Err(e) => {
            let err = JsonRpcException::invalid_request(None);
            let dispatch_err: &dyn crate::errors::DispatchError = &err;
            let jsonrpc_error = error_handlers.resolve(dispatch_err, &msg.subject);
            warn!(task = %tag, subject = %msg.subject, error = %e, "malformed request envelope");
            return JsonRpcReply::err(Uuid::new_v4(), jsonrpc_error);
        }
    };
    let id = request.id_or_assign();

    context::scope(id, || async move {
        let endpoint = match resolve_endpoint(routing, &msg.subject, request.method.as_deref()) {
            Ok(e) => e,
            Err(e) => {
                let dispatch_err: &dyn crate::errors::DispatchError = &e;
                let jsonrpc_error = error_handlers.resolve(dispatch_err, &msg.subject);
                return JsonRpcReply::err(id, jsonrpc_error);
            }
        };

        let Endpoint::Request(req) = endpoint.as_ref() else {
            let err = JsonRpcException::unknown_method(format!(
                "{} is registered as a one-way publish endpoint, not a request",
                msg.subject
            ));
            let dispatch_err: &dyn crate::errors::DispatchError = &err;
            let jsonrpc_error = error_handlers.resolve(dispatch_err, &msg.subject);
            return JsonRpcReply::err(id, jsonrpc_error);
        };

        debug!(task = %tag, subject = %msg.subject, %id, "dispatching request");
        match (req.handler)(app, request.params.clone()).await {
            Ok(result) => JsonRpcReply::ok(id, result),
            Err(err) => {
                let jsonrpc_error = error_handlers.resolve(err.as_ref(), &msg.subject);
                JsonRpcReply::err(id, jsonrpc_error)
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::MockBus;
    use crate::errors::BoxDispatchError;
    use crate::router::{EndpointOptions, RoutingTable, SubjectRouter};
    use crate::statebag::StateBag;
    use schemars::JsonSchema;
    use serde::Deserialize;

    #[derive(Deserialize, JsonSchema)]
    struct PingParams {
        value: i64,
    }

    fn build_table() -> Arc<RoutingTable> {
        let mut router = SubjectRouter::new();
        router
            .add_request(
                "development.ping.CREATE",
                |_app: AppHandle, p: PingParams| async move {
                    Ok::<_, BoxDispatchError>(serde_json::json!({"value": p.value * 2}))
                },
                EndpointOptions::new(),
                &mut crate::schema::SchemaRegistry::new(),
            )
            .unwrap();
        let mut table = RoutingTable::new();
        table.include(router).unwrap();
        Arc::new(table)
    }

    #[tokio::test]
    async fn a_request_gets_a_result_reply() {
        let bus = Arc::new(MockBus::new());
        let dispatcher = Dispatcher::new(
            build_table(),
            Arc::new(StateBag::new()),
            Arc::new(ErrorHandlerRegistry::new()),
            bus.clone(),
        );

        let payload = serde_json::to_vec(&serde_json::json!({
            "jsonrpc": "2.0",
            "params": {"value": 21},
        }))
        .unwrap();
        dispatcher.handle_message(BusMessage {
            subject: "development.ping.CREATE".to_string(),
            reply: Some("_INBOX.abc".to_string()),
            payload: Bytes::from(payload),
        });
        dispatcher.drain().await;

        let replies = bus.replies();
        assert_eq!(replies.len(), 1);
        let reply: JsonRpcReply = serde_json::from_slice(&replies[0].1).unwrap();
        assert_eq!(reply.result, Some(serde_json::json!({"value": 42})));
    }

    #[tokio::test]
    async fn unknown_subject_gets_an_error_reply() {
        let bus = Arc::new(MockBus::new());
        let dispatcher = Dispatcher::new(
            Arc::new(RoutingTable::new()),
            Arc::new(StateBag::new()),
            Arc::new(ErrorHandlerRegistry::new()),
            bus.clone(),
        );

        let payload = serde_json::to_vec(&serde_json::json!({"jsonrpc": "2.0", "params": {}})).unwrap();
        dispatcher.handle_message(BusMessage {
            subject: "no.such.subject".to_string(),
            reply: Some("_INBOX.abc".to_string()),
            payload: Bytes::from(payload),
        });
        dispatcher.drain().await;

        let replies = bus.replies();
        let reply: JsonRpcReply = serde_json::from_slice(&replies[0].1).unwrap();
        assert_eq!(reply.error.unwrap().code, crate::errors::UNKNOWN_METHOD_CODE);
    }

    #[tokio::test]
    async fn a_publish_with_no_reply_subject_gets_no_reply() {
        let bus = Arc::new(MockBus::new());
        let dispatcher = Dispatcher::new(
            build_table(),
            Arc::new(StateBag::new()),
            Arc::new(ErrorHandlerRegistry::new()),
            bus.clone(),
        );

        let payload = serde_json::to_vec(&serde_json::json!({
            "jsonrpc": "2.0",
            "params": {"value": 1},
        }))
        .unwrap();
        dispatcher.handle_message(BusMessage {
            subject: "development.ping.CREATE".to_string(),
            reply: None,
            payload: Bytes::from(payload),
        });
        dispatcher.drain().await;

        assert!(bus.replies().is_empty());
    }
}
