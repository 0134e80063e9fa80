//! Connection to the message broker (§4.5).
//!
//! [`BusConfig`] narrows the source's `ConnectConfig`/`SubscribeConfig` pair
//! down to the options that matter once connection details are
//! figment-driven config rather than constructor keyword arguments.
//! [`MessageBus`] is the seam the dispatcher talks to; [`NatsBus`] is the
//! `async-nats`-backed implementation, [`MockBus`] an in-memory stand-in for
//! tests that never touches a socket.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_nats::{Client, Subscriber};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("failed to connect to nats server(s) {servers:?}: {source}")]
    Connect {
        servers: Vec<String>,
        #[source]
        source: async_nats::ConnectError,
    },

    #[error("publish to {subject:?} failed: {source}")]
    Publish {
        subject: String,
        #[source]
        source: async_nats::PublishError,
    },

    #[error("subscribe to {subject:?} failed: {source}")]
    Subscribe {
        subject: String,
        #[source]
        source: async_nats::SubscribeError,
    },

    #[error("request to {subject:?} timed out or failed: {source}")]
    Request {
        subject: String,
        #[source]
        source: async_nats::RequestError,
    },

    #[error("drain failed: {0}")]
    Drain(#[source] async_nats::client::DrainError),
}

/// Connection and subscription options (§4.5's option table, trimmed to what
/// a Rust client actually needs to expose — callbacks and TLS contexts are
/// constructed by the bus, not configured here).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub servers: Vec<String>,
    pub name: Option<String>,
    pub connect_timeout_ms: u64,
    pub reconnect_time_wait_ms: u64,
    pub max_reconnect_attempts: i64,
    pub ping_interval_secs: u64,
    pub no_echo: bool,
    pub user: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub drain_timeout_ms: u64,
    pub subscribe_queue: Option<String>,
    pub subscribe_pending_msgs_limit: i64,
    pub subscribe_pending_bytes_limit: i64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            servers: vec!["nats://127.0.0.1:4222".to_string()],
            name: None,
            connect_timeout_ms: 5_000,
            reconnect_time_wait_ms: 2_000,
            max_reconnect_attempts: 60,
            ping_interval_secs: 120,
            no_echo: false,
            user: None,
            password: None,
            token: None,
            drain_timeout_ms: 30_000,
            subscribe_queue: None,
            subscribe_pending_msgs_limit: 65536,
            subscribe_pending_bytes_limit: 67_108_864,
        }
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A single inbound message, whatever its transport.
pub struct BusMessage {
    pub subject: String,
    pub reply: Option<String>,
    pub payload: Bytes,
}

/// The seam between the dispatcher and whatever transport carries JSON-RPC
/// envelopes. Lets tests swap in [`MockBus`] without a running broker.
pub trait MessageBus: Send + Sync {
    fn subscribe(&self, subject: &str) -> BoxFuture<'_, Result<BusSubscription, BusError>>;
    fn publish(&self, subject: &str, payload: Bytes) -> BoxFuture<'_, Result<(), BusError>>;
    fn publish_reply(&self, reply_subject: &str, payload: Bytes) -> BoxFuture<'_, Result<(), BusError>>;
    fn drain(&self) -> BoxFuture<'_, Result<(), BusError>>;
}

/// A live subscription a caller can pull messages from.
pub enum BusSubscription {
    Nats(Subscriber),
    Mock(tokio::sync::mpsc::UnboundedReceiver<BusMessage>),
}

impl BusSubscription {
    pub async fn next(&mut self) -> Option<BusMessage> {
        match self {
            BusSubscription::Nats(sub) => {
                use futures::StreamExt;
                sub.next().await.map(|m| BusMessage {
                    subject: m.subject.to_string(),
                    reply: m.reply.map(|r| r.to_string()),
                    payload: m.payload,
                })
            }
            BusSubscription::Mock(rx) => rx.recv().await,
        }
    }
}

/// `async-nats`-backed bus.
pub struct NatsBus {
    client: Client,
}

impl NatsBus {
    pub async fn connect(config: &BusConfig) -> Result<Self, BusError> {
        let reconnect_time_wait_ms = config.reconnect_time_wait_ms;
        let mut options = async_nats::ConnectOptions::new()
            .connection_timeout(Duration::from_millis(config.connect_timeout_ms))
            .reconnect_delay_callback(move |_attempts| {
                Duration::from_millis(reconnect_time_wait_ms)
            })
            .max_reconnects(if config.max_reconnect_attempts <= 0 {
                None
            } else {
                Some(config.max_reconnect_attempts as usize)
            })
            .ping_interval(Duration::from_secs(config.ping_interval_secs))
            .no_echo();

        if let Some(name) = &config.name {
            options = options.name(name);
        }
        if let (Some(user), Some(password)) = (&config.user, &config.password) {
            options = options.user_and_password(user.clone(), password.clone());
        }
        if let Some(token) = &config.token {
            options = options.token(token.clone());
        }

        let client = options
            .connect(config.servers.clone())
            .await
            .map_err(|source| BusError::Connect {
                servers: config.servers.clone(),
                source,
            })?;

        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl MessageBus for NatsBus {
    fn subscribe(&self, subject: &str) -> BoxFuture<'_, Result<BusSubscription, BusError>> {
        let subject = subject.to_string();
        Box::pin(async move {
            let sub = self
                .client
                .subscribe(subject.clone())
                .await
                .map_err(|source| BusError::Subscribe { subject, source })?;
            Ok(BusSubscription::Nats(sub))
        })
    }

    fn publish(&self, subject: &str, payload: Bytes) -> BoxFuture<'_, Result<(), BusError>> {
        let subject = subject.to_string();
        Box::pin(async move {
            self.client
                .publish(subject.clone(), payload)
                .await
                .map_err(|source| BusError::Publish { subject, source })
        })
    }

    fn publish_reply(&self, reply_subject: &str, payload: Bytes) -> BoxFuture<'_, Result<(), BusError>> {
        self.publish(reply_subject, payload)
    }

    fn drain(&self) -> BoxFuture<'_, Result<(), BusError>> {
        Box::pin(async move { self.client.drain().await.map_err(BusError::Drain) })
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    /// In-memory bus for dispatcher tests: `publish` delivers directly to any
    /// matching local subscriber, `publish_reply` records replies for
    /// assertions instead of sending them anywhere.
    #[derive(Default)]
    pub struct MockBus {
        subscribers: Mutex<HashMap<String, mpsc::UnboundedSender<BusMessage>>>,
        replies: Mutex<Vec<(String, Bytes)>>,
    }

    impl MockBus {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn replies(&self) -> Vec<(String, Bytes)> {
            self.replies.lock().clone()
        }

        pub async fn deliver(&self, subject: &str, reply: Option<&str>, payload: Bytes) {
            if let Some(tx) = self.subscribers.lock().get(subject) {
                let _ = tx.send(BusMessage {
                    subject: subject.to_string(),
                    reply: reply.map(|r| r.to_string()),
                    payload,
                });
            }
        }
    }

    impl MessageBus for MockBus {
        fn subscribe(&self, subject: &str) -> BoxFuture<'_, Result<BusSubscription, BusError>> {
            let subject = subject.to_string();
            Box::pin(async move {
                let (tx, rx) = mpsc::unbounded_channel();
                self.subscribers.lock().insert(subject, tx);
                Ok(BusSubscription::Mock(rx))
            })
        }

        fn publish(&self, _subject: &str, _payload: Bytes) -> BoxFuture<'_, Result<(), BusError>> {
            Box::pin(async move { Ok(()) })
        }

        fn publish_reply(&self, reply_subject: &str, payload: Bytes) -> BoxFuture<'_, Result<(), BusError>> {
            let reply_subject = reply_subject.to_string();
            Box::pin(async move {
                self.replies.lock().push((reply_subject, payload));
                Ok(())
            })
        }

        fn drain(&self) -> BoxFuture<'_, Result<(), BusError>> {
            Box::pin(async move { Ok(()) })
        }
    }

    #[tokio::test]
    async fn delivered_message_is_observed_by_the_subscriber() {
        let bus = MockBus::new();
        let mut sub = bus.subscribe("foo.CREATE").await.unwrap();
        bus.deliver("foo.CREATE", Some("_INBOX.abc"), Bytes::from_static(b"{}"))
            .await;
        let msg = sub.next().await.unwrap();
        assert_eq!(msg.subject, "foo.CREATE");
        assert_eq!(msg.reply.as_deref(), Some("_INBOX.abc"));
    }

    #[tokio::test]
    async fn publish_reply_is_recorded() {
        let bus = MockBus::new();
        bus.publish_reply("_INBOX.abc", Bytes::from_static(b"{\"ok\":true}"))
            .await
            .unwrap();
        assert_eq!(bus.replies().len(), 1);
    }
}
