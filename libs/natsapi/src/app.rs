//! Application wiring and lifecycle (§4.1 "Application", §6 "Lifecycle").
//!
//! Mirrors `applications.py`'s `NatsAPI`: a builder that accumulates routers,
//! documentation-only subs/pubs, and a domain error catalog; `build()` seals
//! it into a [`RoutingTable`] plus a generated AsyncAPI document, exactly the
//! way `_add_asyncapi_route` registers `schema.RETRIEVE` right before the
//! source subscribes to its root wildcard subject. The running service is a
//! [`Runnable`] driven by [`Lifecycle`], so starting/stopping it composes
//! with whatever else a host binary manages under the same lifecycle.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use natsapi_errors::DomainErrorCatalog;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::asyncapi::{self, ServiceInfo};
use crate::bus::{BusError, MessageBus};
use crate::dispatcher::Dispatcher;
use crate::endpoint::AppHandle;
use crate::errors::ErrorHandlerRegistry;
use crate::lifecycle::Runnable;
use crate::router::{EndpointOptions, RegisterError, RouterError, RoutingTable, SubjectRouter};
use crate::schema::{ResultSchema, SchemaRegistry};
use crate::statebag::StateBag;
use crate::subject;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Register(#[from] RegisterError),
    #[error(transparent)]
    Route(#[from] RouterError),
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("'{method}' is an invalid request method for subject {subject:?}; allowed methods: {allowed:?}")]
    InvalidRpcMethod {
        subject: String,
        method: String,
        allowed: Vec<String>,
    },
}

/// Builder for a service's root path, metadata, routers, and domain error
/// catalog — the source's `NatsAPI.__init__`/`include_router`/`add_pub`.
pub struct App {
    root_path: String,
    title: String,
    version: String,
    description: Option<String>,
    schemas: SchemaRegistry,
    table: RoutingTable,
    error_handlers: ErrorHandlerRegistry,
    domain_errors: Option<DomainErrorCatalog>,
    state: Arc<StateBag>,
    rpc_methods: Option<HashSet<String>>,
}

impl App {
    pub fn new(root_path: impl Into<String>) -> Self {
        Self {
            root_path: root_path.into(),
            title: "natsapi".to_string(),
            version: "0.1.0".to_string(),
            description: None,
            schemas: SchemaRegistry::new(),
            table: RoutingTable::new(),
            error_handlers: ErrorHandlerRegistry::new(),
            domain_errors: None,
            state: Arc::new(StateBag::new()),
            rpc_methods: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_domain_errors(mut self, catalog: DomainErrorCatalog) -> Self {
        self.domain_errors = Some(catalog);
        self
    }

    /// Restrict every request subject's last dot-separated token (its JSON-RPC
    /// "method") to this set (§4.2(2)). Unset by default, matching the
    /// source's `rpc_methods=None` meaning "no restriction".
    pub fn with_rpc_methods(mut self, methods: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.rpc_methods = Some(methods.into_iter().map(Into::into).collect());
        self
    }

    /// Check every request endpoint's method token against `rpc_methods`,
    /// when declared (`include_router`'s `assert method in self.rpc_methods`).
    fn check_rpc_methods(&self, router: &SubjectRouter) -> Result<(), AppError> {
        let Some(allowed) = &self.rpc_methods else {
            return Ok(());
        };
        for endpoint in router.routes() {
            if let crate::endpoint::Endpoint::Request(r) = endpoint {
                let method = r.subject.rsplit('.').next().unwrap_or(&r.subject);
                if !allowed.contains(method) {
                    return Err(AppError::InvalidRpcMethod {
                        subject: r.subject.clone(),
                        method: method.to_string(),
                        allowed: allowed.iter().cloned().collect(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Application state bag shared by every handler (§5).
    pub fn state(&self) -> &Arc<StateBag> {
        &self.state
    }

    pub fn error_handlers_mut(&mut self) -> &mut ErrorHandlerRegistry {
        &mut self.error_handlers
    }

    pub fn schemas_mut(&mut self) -> &mut SchemaRegistry {
        &mut self.schemas
    }

    /// Qualify every route in `router` under this app's root path and merge
    /// it into the routing table (`include_router`).
    pub fn include_router(&mut self, router: SubjectRouter) -> Result<(), AppError> {
        self.check_rpc_methods(&router)?;
        self.table.include(router)?;
        Ok(())
    }

    pub fn add_request<P, R, F, Fut>(
        &mut self,
        subject: &str,
        handler: F,
        opts: EndpointOptions,
    ) -> Result<(), AppError>
    where
        P: serde::de::DeserializeOwned + schemars::JsonSchema + Send + 'static,
        R: serde::Serialize + ResultSchema,
        F: Fn(AppHandle, P) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<R, crate::errors::BoxDispatchError>> + Send + 'static,
    {
        let mut router = SubjectRouter::new().with_prefix(self.root_path.clone());
        router.add_request(subject, handler, opts, &mut self.schemas)?;
        self.check_rpc_methods(&router)?;
        self.table.include(router)?;
        Ok(())
    }

    fn asyncapi_document(&self) -> Value {
        let info = ServiceInfo {
            title: self.title.clone(),
            version: self.version.clone(),
            description: self.description.clone(),
        };
        asyncapi::generate(&info, &self.table, &self.schemas, self.domain_errors.as_ref())
    }

    /// Seal the builder: register the `schema.RETRIEVE` introspection
    /// endpoint (generated once, cached, exactly like `generate_asyncapi`'s
    /// `self.asyncapi_schema` memoization) and return the routing table.
    pub fn build(mut self) -> Result<BuiltApp, AppError> {
        let document = Arc::new(OnceLock::new());
        let cached = document.clone();
        let precomputed = self.asyncapi_document();

        let mut schema_router = SubjectRouter::new().with_prefix(self.root_path.clone());
        schema_router.add_request_raw(
            "schema.RETRIEVE",
            move |_app: AppHandle, _params: Value| {
                let cached = cached.clone();
                let precomputed = precomputed.clone();
                async move { Ok::<_, crate::errors::BoxDispatchError>(cached.get_or_init(|| precomputed).clone()) }
            },
            EndpointOptions {
                include_schema: false,
                summary: Some("Retrieve this service's AsyncAPI description".to_string()),
                ..EndpointOptions::new()
            },
            &mut self.schemas,
        )?;
        self.check_rpc_methods(&schema_router)?;
        self.table.include(schema_router)?;

        let root_wildcard = subject::root_wildcard(&self.root_path);
        Ok(BuiltApp {
            root_wildcard,
            table: Arc::new(self.table),
            error_handlers: Arc::new(self.error_handlers),
            state: self.state,
        })
    }
}

/// A sealed application, ready to be driven against a [`MessageBus`].
pub struct BuiltApp {
    root_wildcard: String,
    table: Arc<RoutingTable>,
    error_handlers: Arc<ErrorHandlerRegistry>,
    state: Arc<StateBag>,
}

impl BuiltApp {
    pub fn routes(&self) -> &RoutingTable {
        &self.table
    }

    /// Wrap the sealed app and a connected bus into a runnable service
    /// (`startup`'s `root_path_subscribe` + message loop).
    pub fn into_service(self, bus: Arc<dyn MessageBus>) -> RunningService {
        RunningService {
            root_wildcard: self.root_wildcard,
            dispatcher: Dispatcher::new(self.table, self.state, self.error_handlers, bus.clone()),
            bus,
            inflight_at_stop: AtomicUsize::new(0),
        }
    }
}

/// Subscribes to the app's root wildcard subject and feeds every message to
/// a [`Dispatcher`] until cancelled — the source's `NatsClient.connect` plus
/// its per-message `asyncio.create_task` loop, as a [`Runnable`].
pub struct RunningService {
    root_wildcard: String,
    dispatcher: Dispatcher,
    bus: Arc<dyn MessageBus>,
    inflight_at_stop: AtomicUsize,
}

impl RunningService {
    /// Number of dispatcher tasks still in flight as of the last `run()`
    /// cancellation, observable after shutdown for diagnostics.
    pub fn inflight_at_last_stop(&self) -> usize {
        self.inflight_at_stop.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Runnable for RunningService {
    async fn run(self: Arc<Self>, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut subscription = self.bus.subscribe(&self.root_wildcard).await?;
        info!(subject = %self.root_wildcard, "subscribed to root path");

        loop {
            tokio::select! {
                msg = subscription.next() => {
                    match msg {
                        Some(msg) => self.dispatcher.handle_message(msg),
                        None => {
                            warn!("bus subscription ended unexpectedly");
                            break;
                        }
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }

        info!("draining in-flight dispatcher tasks");
        self.dispatcher.drain().await;
        self.inflight_at_stop
            .store(self.dispatcher.inflight_count(), Ordering::Relaxed);
        Ok(())
    }
}

/// Install handlers for `SIGHUP`, `SIGTERM`, and `SIGINT` that cancel `token`
/// on the first signal received (`_listen_to_signals`). Spawned as a
/// detached task; intended to be started once per process.
#[cfg(unix)]
pub fn listen_to_signals(token: CancellationToken) {
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let mut hangup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
        let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut interrupt = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        tokio::select! {
            _ = hangup.recv() => info!("received SIGHUP"),
            _ = terminate.recv() => info!("received SIGTERM"),
            _ = interrupt.recv() => info!("received SIGINT"),
        }
        token.cancel();
    });
}
