//! Example handlers demonstrating the end-to-end scenarios this framework
//! is built to serve: a happy-path echo, a union result type, and a
//! declared domain error a caller can match on.

use std::sync::atomic::{AtomicU64, Ordering};

use natsapi::errors::{BoxDispatchError, DispatchError};
use natsapi::{AppHandle, UnionResult2};
use natsapi_errors::{CatalogError, DomainErrorCatalog, DomainErrorDef};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EchoParams {
    pub foo: i64,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct EchoResult {
    pub status: String,
}

/// Counts handler invocations, exposed via [`crate::handlers::EchoCounter`]
/// in the app's state bag so tests can assert fan-out behavior.
#[derive(Default)]
pub struct EchoCounter(AtomicU64);

impl EchoCounter {
    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

pub async fn echo(app: AppHandle, _params: EchoParams) -> Result<EchoResult, BoxDispatchError> {
    if let Ok(counter) = app.get::<EchoCounter>() {
        counter.increment();
    }
    Ok(EchoResult {
        status: "OK".to_string(),
    })
}

/// A result type with two variants, one field each — the "union result"
/// scenario (§4.6, §8 scenario 4). Each variant registers as its own
/// AsyncAPI component schema, so the channel's reply payload documents
/// `anyOf: [BrokerRef, QueueRef]` rather than one combined schema.
#[derive(Debug, Serialize, JsonSchema)]
pub struct BrokerRef {
    pub broker_id: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct QueueRef {
    pub queue_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct LookupParams {
    pub name: String,
}

pub async fn lookup(
    _app: AppHandle,
    params: LookupParams,
) -> Result<UnionResult2<BrokerRef, QueueRef>, BoxDispatchError> {
    if params.name.starts_with("broker-") {
        Ok(UnionResult2::A(BrokerRef {
            broker_id: params.name,
        }))
    } else {
        Ok(UnionResult2::B(QueueRef { queue_id: params.name }))
    }
}

/// A domain-specific error, declared so its code falls within the
/// service's documented domain error range.
#[derive(Debug)]
pub struct BrokerAlreadyExists {
    pub broker_id: String,
}

impl std::fmt::Display for BrokerAlreadyExists {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "broker {} already exists", self.broker_id)
    }
}

impl std::error::Error for BrokerAlreadyExists {}

impl DispatchError for BrokerAlreadyExists {
    fn chain(&self) -> Vec<&'static str> {
        vec!["BrokerAlreadyExists", natsapi::errors::ROOT_TAG]
    }

    fn rpc_code(&self) -> Option<i64> {
        Some(-27001)
    }

    fn rpc_message(&self) -> Option<String> {
        Some("BROKER_EXISTS".to_string())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateBrokerParams {
    pub broker_id: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct CreateBrokerResult {
    pub broker_id: String,
}

/// Always fails with [`BrokerAlreadyExists`] — a handler that demonstrates
/// a declared domain error rather than one that's actually useful.
pub async fn create_broker(
    _app: AppHandle,
    params: CreateBrokerParams,
) -> Result<CreateBrokerResult, BoxDispatchError> {
    Err(Box::new(BrokerAlreadyExists {
        broker_id: params.broker_id,
    }))
}

/// Domain error catalog documenting every domain error this service can
/// raise, published in its AsyncAPI description (§4.3).
pub fn domain_error_catalog() -> Result<DomainErrorCatalog, CatalogError> {
    Ok(DomainErrorCatalog::new(-27000, -3000)?.with_error(DomainErrorDef::new(-27001, "BROKER_EXISTS")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use natsapi::StateBag;
    use std::sync::Arc;

    fn app_handle() -> AppHandle {
        Arc::new(StateBag::new())
    }

    #[tokio::test]
    async fn echo_increments_the_shared_counter() {
        let state: AppHandle = Arc::new(StateBag::new());
        state.register(Arc::new(EchoCounter::default()));
        let app = state.clone();

        echo(app.clone(), EchoParams { foo: 1 }).await.unwrap();
        echo(app, EchoParams { foo: 2 }).await.unwrap();

        assert_eq!(state.get::<EchoCounter>().unwrap().count(), 2);
    }

    #[tokio::test]
    async fn echo_without_a_registered_counter_still_succeeds() {
        let result = echo(app_handle(), EchoParams { foo: 1 }).await.unwrap();
        assert_eq!(result.status, "OK");
    }

    #[tokio::test]
    async fn lookup_dispatches_on_name_prefix() {
        let broker = lookup(
            app_handle(),
            LookupParams {
                name: "broker-1".to_string(),
            },
        )
        .await
        .unwrap();
        assert!(matches!(broker, UnionResult2::A(BrokerRef { broker_id }) if broker_id == "broker-1"));

        let queue = lookup(
            app_handle(),
            LookupParams {
                name: "queue-1".to_string(),
            },
        )
        .await
        .unwrap();
        assert!(matches!(queue, UnionResult2::B(QueueRef { queue_id }) if queue_id == "queue-1"));
    }

    #[tokio::test]
    async fn create_broker_always_fails_with_the_declared_domain_error() {
        let err = create_broker(
            app_handle(),
            CreateBrokerParams {
                broker_id: "b-1".to_string(),
            },
        )
        .await
        .unwrap_err();

        assert_eq!(err.chain(), vec!["BrokerAlreadyExists", natsapi::errors::ROOT_TAG]);
        assert_eq!(err.rpc_code(), Some(-27001));
        assert_eq!(err.rpc_message().as_deref(), Some("BROKER_EXISTS"));
    }

    #[test]
    fn domain_error_catalog_declares_broker_exists_in_range() {
        let catalog = domain_error_catalog().unwrap();
        assert_eq!(catalog.lower_bound(), -27000);
        assert_eq!(catalog.upper_bound(), -3000);
        assert_eq!(catalog.errors()[0].code, -27001);
    }
}
