//! Error taxonomy, JSON-RPC error codes, and the most-derived-first error
//! handler registry (C4).
//!
//! Rust has no open-ended exception hierarchy to walk at runtime, so a
//! handler error declares its own ancestry explicitly: [`DispatchError::chain`]
//! returns a list of type tags, most-derived first, always terminating at
//! the universal `"Exception"` root tag. [`ErrorHandlerRegistry::resolve`]
//! walks that list and returns the first handler registered for any tag in
//! it, falling back to the root handler.

use std::collections::HashMap;
use std::fmt;

use crate::rpc::{ErrorData, ErrorDetail, JsonRpcError};

/// Root tag every error chain terminates at.
pub const ROOT_TAG: &str = "Exception";
/// Tag for the generic framework-level JSON-RPC exception family.
pub const JSONRPC_EXCEPTION_TAG: &str = "JsonRPCException";
/// Tag for parameter validation failures.
pub const VALIDATION_ERROR_TAG: &str = "ValidationError";

pub const INVALID_REQUEST_CODE: i64 = -32600;
pub const UNKNOWN_METHOD_CODE: i64 = -32601;
pub const INVALID_PARAMS_CODE: i64 = -32602;
pub const INTERNAL_ERROR_CODE: i64 = -32603;
pub const GENERIC_UNHANDLED_CODE: i64 = -40000;
pub const VALIDATION_ERROR_CODE: i64 = -40001;

/// An error raised anywhere along the dispatch path (decode, route,
/// validate, invoke) or by a handler.
pub trait DispatchError: std::error::Error + Send + Sync + 'static {
    /// Ancestry tags, most-derived first, always ending at [`ROOT_TAG`].
    fn chain(&self) -> Vec<&'static str> {
        vec![ROOT_TAG]
    }

    /// Suggested JSON-RPC code, honored by the default root handler when
    /// present (mirrors the source's optional `rpc_code` attribute).
    fn rpc_code(&self) -> Option<i64> {
        None
    }

    /// Suggested short message (mirrors the source's optional `msg`
    /// attribute, combined with `detail()` as `"{msg}: {detail}"`).
    fn rpc_message(&self) -> Option<String> {
        None
    }

    fn rpc_detail(&self) -> Option<String> {
        None
    }

    /// Structured error data to carry onto the wire, if this error built its
    /// own (mirrors the source's exceptions always carrying a `data` payload
    /// through `handle_jsonrpc_exception`).
    fn rpc_data(&self) -> Option<ErrorData> {
        None
    }

    /// Structured validation failures, if this error represents one.
    fn validation_errors(&self) -> Option<Vec<ErrorDetail>> {
        None
    }
}

/// Type-erased dispatch error, as passed through the dispatcher and into
/// the error handler registry.
pub type BoxDispatchError = Box<dyn DispatchError>;

/// The framework's own exception family, equivalent to `JsonRPCException`
/// and its built-in subclasses in the source.
#[derive(Debug)]
pub struct JsonRpcException {
    pub code: i64,
    pub message: String,
    pub data: Option<ErrorData>,
}

impl fmt::Display for JsonRpcException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for JsonRpcException {}

impl DispatchError for JsonRpcException {
    fn chain(&self) -> Vec<&'static str> {
        vec![JSONRPC_EXCEPTION_TAG, ROOT_TAG]
    }

    fn rpc_code(&self) -> Option<i64> {
        Some(self.code)
    }

    fn rpc_message(&self) -> Option<String> {
        Some(self.message.clone())
    }

    fn rpc_data(&self) -> Option<ErrorData> {
        self.data.clone()
    }
}

impl JsonRpcException {
    pub fn invalid_request(data: Option<ErrorData>) -> Self {
        Self {
            code: INVALID_REQUEST_CODE,
            message: "INVALID_REQUEST_FORMAT".to_string(),
            data,
        }
    }

    pub fn unknown_method(detail: impl Into<String>) -> Self {
        Self {
            code: UNKNOWN_METHOD_CODE,
            message: "NO_SUCH_ENDPOINT".to_string(),
            data: Some(ErrorData {
                kind: Some(JSONRPC_EXCEPTION_TAG.to_string()),
                errors: vec![ErrorDetail {
                    kind: JSONRPC_EXCEPTION_TAG.to_string(),
                    target: None,
                    message: detail.into(),
                }],
            }),
        }
    }

    pub fn invalid_params(message: impl Into<String>, data: Option<ErrorData>) -> Self {
        Self {
            code: INVALID_PARAMS_CODE,
            message: message.into(),
            data,
        }
    }

    pub fn internal(data: Option<ErrorData>) -> Self {
        Self {
            code: INTERNAL_ERROR_CODE,
            message: "INTERNAL_ERROR".to_string(),
            data,
        }
    }
}

/// Parameter validation failure, equivalent to pydantic's `ValidationError`
/// arriving at `handle_validation_error`.
#[derive(Debug)]
pub struct ValidationFailure {
    pub errors: Vec<ErrorDetail>,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed for {} field(s)", self.errors.len())
    }
}

impl std::error::Error for ValidationFailure {}

impl DispatchError for ValidationFailure {
    fn chain(&self) -> Vec<&'static str> {
        vec![VALIDATION_ERROR_TAG, ROOT_TAG]
    }

    fn validation_errors(&self) -> Option<Vec<ErrorDetail>> {
        Some(self.errors.clone())
    }
}

/// A handler function: takes the failed error and the subject it failed on,
/// returns the wire-visible JSON-RPC error.
pub type ErrorHandlerFn = Box<dyn Fn(&dyn DispatchError, &str) -> JsonRpcError + Send + Sync>;

/// Insertion-ordered `tag -> handler` map with most-derived-first lookup
/// over a thrown error's declared [`DispatchError::chain`] (C4).
pub struct ErrorHandlerRegistry {
    handlers: HashMap<&'static str, ErrorHandlerFn>,
}

impl Default for ErrorHandlerRegistry {
    fn default() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
        };
        registry.register(JSONRPC_EXCEPTION_TAG, Box::new(handle_jsonrpc_exception));
        registry.register(VALIDATION_ERROR_TAG, Box::new(handle_validation_error));
        registry.register(ROOT_TAG, Box::new(handle_internal_error));
        registry
    }
}

impl ErrorHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or override) the handler for a given ancestry tag.
    pub fn register(&mut self, tag: &'static str, handler: ErrorHandlerFn) {
        self.handlers.insert(tag, handler);
    }

    /// Walk `error.chain()` most-derived first; return the first registered
    /// handler's output, falling back to the root handler if nothing in the
    /// chain matched (this only happens for a malformed chain that omits
    /// [`ROOT_TAG`]).
    pub fn resolve(&self, error: &dyn DispatchError, subject: &str) -> JsonRpcError {
        for tag in error.chain() {
            if let Some(handler) = self.handlers.get(tag) {
                return handler(error, subject);
            }
        }
        handle_internal_error(error, subject)
    }
}

fn handle_jsonrpc_exception(error: &dyn DispatchError, _subject: &str) -> JsonRpcError {
    let code = error.rpc_code().unwrap_or(INTERNAL_ERROR_CODE);
    let message = error.rpc_message().unwrap_or_else(|| error.to_string());
    JsonRpcError::new(code, message, error.rpc_data())
}

fn handle_validation_error(error: &dyn DispatchError, _subject: &str) -> JsonRpcError {
    let errors = error.validation_errors().unwrap_or_default();
    let data = ErrorData {
        kind: Some(VALIDATION_ERROR_TAG.to_string()),
        errors,
    };
    JsonRpcError::new(
        VALIDATION_ERROR_CODE,
        "Invalid data was provided or some data is missing.",
        Some(data),
    )
}

fn handle_internal_error(error: &dyn DispatchError, _subject: &str) -> JsonRpcError {
    let code = error.rpc_code().unwrap_or(GENERIC_UNHANDLED_CODE);
    let message = match (error.rpc_message(), error.rpc_detail()) {
        (Some(msg), Some(detail)) => format!("{msg}: {detail}"),
        (Some(msg), None) => msg,
        _ => error.to_string(),
    };
    let data = ErrorData {
        kind: Some(ROOT_TAG.to_string()),
        errors: vec![],
    };
    JsonRpcError::new(code, message, Some(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct BrokerAlreadyExists;

    impl fmt::Display for BrokerAlreadyExists {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "broker already exists")
        }
    }
    impl std::error::Error for BrokerAlreadyExists {}
    impl DispatchError for BrokerAlreadyExists {
        fn chain(&self) -> Vec<&'static str> {
            vec!["BrokerAlreadyExists", ROOT_TAG]
        }
        fn rpc_code(&self) -> Option<i64> {
            Some(-27001)
        }
        fn rpc_message(&self) -> Option<String> {
            Some("BROKER_EXISTS".to_string())
        }
    }

    #[test]
    fn unregistered_tag_falls_back_to_parent() {
        let registry = ErrorHandlerRegistry::new();
        let err = BrokerAlreadyExists;
        let reply = registry.resolve(&err, "natsapi.development.brokers.CREATE");
        assert_eq!(reply.code, -27001);
        assert_eq!(reply.message, "BROKER_EXISTS");
    }

    #[test]
    fn most_derived_handler_wins_when_both_registered() {
        let mut registry = ErrorHandlerRegistry::new();
        registry.register(
            "BrokerAlreadyExists",
            Box::new(|_e, _s| JsonRpcError::new(-1, "specific", None)),
        );
        let err = BrokerAlreadyExists;
        let reply = registry.resolve(&err, "subj");
        assert_eq!(reply.code, -1);
        assert_eq!(reply.message, "specific");
    }

    #[test]
    fn validation_failure_produces_dash_40001() {
        let registry = ErrorHandlerRegistry::new();
        let err = ValidationFailure {
            errors: vec![ErrorDetail {
                kind: "ValidationError".to_string(),
                target: Some("foo".to_string()),
                message: "value is not a valid integer".to_string(),
            }],
        };
        let reply = registry.resolve(&err, "subj");
        assert_eq!(reply.code, VALIDATION_ERROR_CODE);
        let data = reply.data.unwrap();
        assert_eq!(data.errors.len(), 1);
        assert_eq!(data.errors[0].target.as_deref(), Some("foo"));
    }

    #[test]
    fn unknown_method_uses_documented_code_and_message() {
        let registry = ErrorHandlerRegistry::new();
        let err = JsonRpcException::unknown_method("No such endpoint available for subj");
        let reply = registry.resolve(&err, "subj");
        assert_eq!(reply.code, UNKNOWN_METHOD_CODE);
        assert_eq!(reply.message, "NO_SUCH_ENDPOINT");
    }

    #[test]
    fn unknown_method_carries_its_error_data_onto_the_wire() {
        let registry = ErrorHandlerRegistry::new();
        let err = JsonRpcException::unknown_method("No such endpoint available for subj");
        let reply = registry.resolve(&err, "subj");
        let data = reply.data.expect("unknown_method should carry ErrorData");
        assert_eq!(data.kind.as_deref(), Some(JSONRPC_EXCEPTION_TAG));
        assert_eq!(data.errors[0].message, "No such endpoint available for subj");
    }
}
