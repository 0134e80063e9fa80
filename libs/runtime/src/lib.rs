//! Ambient runtime concerns shared by `natsapi` host binaries: layered
//! configuration (figment: defaults → YAML → env) and structured logging
//! (tracing + rotating files), independent of any one service's routes.

pub mod config;
pub mod logging;

pub use config::{AppConfig, CliArgs, LoggingConfig, Section, ServerConfig};
pub use logging::init_logging_from_config;
