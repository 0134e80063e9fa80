//! Endpoint descriptors (§3) and the type-erased handler machinery that lets
//! the dispatcher invoke differently-typed handlers uniformly.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::errors::{BoxDispatchError, ValidationFailure};
use crate::rpc::ErrorDetail;
use crate::schema::{ResultSchema, SchemaError, SchemaRegistry};
use crate::statebag::StateBag;

/// Handle to the running application, passed as the first argument to every
/// handler — the source's conventional `app` parameter.
pub type AppHandle = Arc<StateBag>;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A handler with its parameter type erased to `serde_json::Value`, so the
/// dispatcher can hold a uniform collection of endpoints.
pub type ErasedHandler =
    Arc<dyn Fn(AppHandle, Value) -> BoxFuture<'static, Result<Value, BoxDispatchError>> + Send + Sync>;

/// Wrap a typed async handler into an [`ErasedHandler`] that decodes its
/// parameters from `Value` before calling it (§4.4 step 6, "validate").
///
/// A decode failure becomes a [`ValidationFailure`] whose `target` is the
/// dotted path of the offending field, mirroring pydantic's `loc` tuple.
pub fn erase<P, R, F, Fut>(handler: F) -> ErasedHandler
where
    P: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(AppHandle, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, BoxDispatchError>> + Send + 'static,
{
    let handler = Arc::new(handler);
    Arc::new(move |app: AppHandle, params: Value| {
        let handler = handler.clone();
        Box::pin(async move {
            let typed: P = serde_path_to_error::deserialize(&params).map_err(|e| {
                let target = e.path().to_string();
                let target = if target.is_empty() || target == "." {
                    None
                } else {
                    Some(target)
                };
                Box::new(ValidationFailure {
                    errors: vec![ErrorDetail {
                        kind: "ValidationError".to_string(),
                        target,
                        message: e.inner().to_string(),
                    }],
                }) as BoxDispatchError
            })?;
            let result = handler(app, typed).await?;
            serde_json::to_value(result).map_err(|e| {
                Box::new(ValidationFailure {
                    errors: vec![ErrorDetail {
                        kind: "SerializationError".to_string(),
                        target: None,
                        message: e.to_string(),
                    }],
                }) as BoxDispatchError
            })
        })
    })
}

/// Wrap a handler that opts out of parameter validation (`skip_validation`):
/// it receives the raw params object untouched.
pub fn erase_raw<R, F, Fut>(handler: F) -> ErasedHandler
where
    R: Serialize + Send + 'static,
    F: Fn(AppHandle, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, BoxDispatchError>> + Send + 'static,
{
    let handler = Arc::new(handler);
    Arc::new(move |app: AppHandle, params: Value| {
        let handler = handler.clone();
        Box::pin(async move {
            let result = handler(app, params).await?;
            serde_json::to_value(result).map_err(|e| {
                Box::new(ValidationFailure {
                    errors: vec![ErrorDetail {
                        kind: "SerializationError".to_string(),
                        target: None,
                        message: e.to_string(),
                    }],
                }) as BoxDispatchError
            })
        })
    })
}

/// External documentation reference, attached to `Sub`/`Pub` descriptors.
#[derive(Debug, Clone)]
pub struct ExternalDocs {
    pub url: String,
    pub description: Option<String>,
}

/// Metadata shared by every endpoint kind.
#[derive(Debug, Clone, Default)]
pub struct EndpointMeta {
    pub summary: String,
    pub description: String,
    pub tags: Vec<String>,
    pub deprecated: bool,
    pub include_schema: bool,
}

/// Request endpoint: expects a reply.
pub struct RequestEndpoint {
    pub subject: String,
    pub operation_id: String,
    pub meta: EndpointMeta,
    pub handler: ErasedHandler,
    pub params_type_name: &'static str,
    /// Component schema name the params type was registered under.
    pub params_schema_name: String,
    /// Component schema name(s) the result type registered under (§4.6).
    /// One name for an ordinary result; one name per member, in declaration
    /// order, for a [`UnionResult2`] result — the AsyncAPI generator emits
    /// `anyOf` over all of them when there's more than one.
    pub result_schema_names: Vec<String>,
    pub skip_validation: bool,
    pub suggested_timeout: Option<f64>,
}

/// A handler result that is one of two independently-documented shapes —
/// the Rust analogue of a Python `typing.Union[TypeA, TypeB]` return
/// annotation. Each member registers as its own AsyncAPI component schema,
/// so the channel's reply payload becomes `anyOf` over two refs instead of
/// one schema embedding an internal union (§4.6, §8 scenario 4).
pub enum UnionResult2<A, B> {
    A(A),
    B(B),
}

impl<A: Serialize, B: Serialize> Serialize for UnionResult2<A, B> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            UnionResult2::A(a) => a.serialize(serializer),
            UnionResult2::B(b) => b.serialize(serializer),
        }
    }
}

impl<A, B> ResultSchema for UnionResult2<A, B>
where
    A: schemars::JsonSchema + Send + 'static,
    B: schemars::JsonSchema + Send + 'static,
{
    fn register(schemas: &mut SchemaRegistry, _base_name: &str) -> Result<Vec<String>, SchemaError> {
        let name_a = A::schema_name();
        let name_b = B::schema_name();
        schemas.ensure::<A>(&name_a)?;
        schemas.ensure::<B>(&name_b)?;
        Ok(vec![name_a, name_b])
    }
}

/// Publish endpoint: fire-and-forget, no reply.
pub struct PublishEndpoint {
    pub subject: String,
    pub operation_id: String,
    pub meta: EndpointMeta,
    pub handler: ErasedHandler,
    pub params_type_name: &'static str,
    pub params_schema_name: String,
    pub skip_validation: bool,
}

/// Documentation-only subscribe descriptor — declares that the service (or a
/// collaborator) consumes this subject, without registering a handler here.
#[derive(Debug, Clone)]
pub struct SubDescriptor {
    pub subject: String,
    pub queue: Option<String>,
    pub meta: EndpointMeta,
    pub external_docs: Option<ExternalDocs>,
}

/// Documentation-only publish descriptor — declares that the service
/// publishes to this subject with the given payload type.
pub struct PubDescriptor {
    pub subject: String,
    pub meta: EndpointMeta,
    pub params_type_name: &'static str,
    pub params_schema_name: String,
    pub external_docs: Option<ExternalDocs>,
}

/// Sum type over the four endpoint kinds the router deals with.
pub enum Endpoint {
    Request(RequestEndpoint),
    Publish(PublishEndpoint),
}

impl Endpoint {
    pub fn subject(&self) -> &str {
        match self {
            Endpoint::Request(r) => &r.subject,
            Endpoint::Publish(p) => &p.subject,
        }
    }

    pub fn include_schema(&self) -> bool {
        match self {
            Endpoint::Request(r) => r.meta.include_schema,
            Endpoint::Publish(p) => p.meta.include_schema,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;
    use serde::Deserialize;

    #[derive(Deserialize, JsonSchema)]
    struct FooParams {
        foo: i64,
    }

    #[tokio::test]
    async fn erase_decodes_valid_params() {
        let handler = erase(|_app: AppHandle, p: FooParams| async move {
            Ok::<_, BoxDispatchError>(serde_json::json!({"status": "OK", "foo": p.foo}))
        });
        let app: AppHandle = Arc::new(StateBag::new());
        let result = handler(app, serde_json::json!({"foo": 1})).await.unwrap();
        assert_eq!(result, serde_json::json!({"status": "OK", "foo": 1}));
    }

    #[tokio::test]
    async fn erase_reports_field_path_on_type_mismatch() {
        let handler = erase(|_app: AppHandle, _p: FooParams| async move {
            Ok::<_, BoxDispatchError>(serde_json::json!({}))
        });
        let app: AppHandle = Arc::new(StateBag::new());
        let err = handler(app, serde_json::json!({"foo": "not-an-int"}))
            .await
            .unwrap_err();
        let details = err.validation_errors().unwrap();
        assert_eq!(details[0].target.as_deref(), Some("foo"));
    }

    #[derive(serde::Serialize, JsonSchema)]
    struct Broker {
        broker_id: String,
    }

    #[derive(serde::Serialize, JsonSchema)]
    struct Queue {
        queue_id: String,
    }

    #[test]
    fn union_result_registers_both_members_as_separate_components() {
        let mut schemas = crate::schema::SchemaRegistry::new();
        let names = UnionResult2::<Broker, Queue>::register(&mut schemas, "LookupResult").unwrap();
        assert_eq!(names, vec!["Broker".to_string(), "Queue".to_string()]);
        assert!(schemas.get_by_name("Broker").is_some());
        assert!(schemas.get_by_name("Queue").is_some());
    }

    #[test]
    fn union_result_serializes_as_the_present_variant() {
        let value: UnionResult2<Broker, Queue> = UnionResult2::A(Broker {
            broker_id: "b-1".to_string(),
        });
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json, serde_json::json!({"broker_id": "b-1"}));
    }
}
