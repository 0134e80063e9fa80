//! # natsapi
//!
//! Exposes application handlers as remote procedures over NATS publish/
//! subscribe. A service declares handlers against dot-separated subjects,
//! groups them with [`router::SubjectRouter`], and assembles them into an
//! [`app::App`]; the framework validates inbound payloads against a
//! per-handler JSON schema, dispatches concurrently, and replies with a
//! JSON-RPC 2.0 envelope. A machine-readable AsyncAPI 2.0.0 description of
//! the whole service is generated from the same route declarations.
//!
//! ## Example
//!
//! ```rust,ignore
//! use natsapi::app::App;
//! use natsapi::router::EndpointOptions;
//! use schemars::JsonSchema;
//! use serde::Deserialize;
//!
//! #[derive(Deserialize, JsonSchema)]
//! struct GreetParams { name: String }
//!
//! let mut app = App::new("development.greeter");
//! app.add_request("GREET", |_app, p: GreetParams| async move {
//!     Ok::<_, natsapi::errors::BoxDispatchError>(serde_json::json!({"hello": p.name}))
//! }, EndpointOptions::new())?;
//! let built = app.build()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod app;
pub mod asyncapi;
pub mod bus;
pub mod context;
pub mod dispatcher;
pub mod endpoint;
pub mod errors;
pub mod lifecycle;
pub mod router;
pub mod rpc;
pub mod schema;
pub mod statebag;
pub mod subject;

pub use app::{App, AppError, BuiltApp, RunningService};
pub use bus::{BusConfig, BusError, MessageBus, NatsBus};
pub use dispatcher::Dispatcher;
pub use endpoint::{AppHandle, UnionResult2};
pub use errors::{BoxDispatchError, DispatchError, ErrorHandlerRegistry, JsonRpcException};
pub use lifecycle::{Lifecycle, Runnable, Status, StopReason, WithLifecycle};
pub use router::{EndpointOptions, RoutingTable, SubjectRouter};
pub use rpc::{JsonRpcReply, JsonRpcRequest};
pub use schema::SchemaRegistry;
pub use statebag::StateBag;
