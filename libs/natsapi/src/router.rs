//! Router builder and routing table (§3, §4.2).
//!
//! [`SubjectRouter`] mirrors the source's own class of the same name: a
//! builder that accumulates `Request`/`Publish`/`Sub`/`Pub` descriptors under
//! a shared `prefix` and inherited `tags`, to be merged into an
//! [`Application`](crate::app::Application) via `include_router`.
//! [`RoutingTable`] is the flattened, fully-qualified-subject-keyed map the
//! dispatcher actually looks handlers up in.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::endpoint::{
    erase, erase_raw, AppHandle, Endpoint, EndpointMeta, ExternalDocs, PubDescriptor,
    PublishEndpoint, RequestEndpoint, SubDescriptor,
};
use crate::errors::BoxDispatchError;
use crate::schema::{ResultSchema, SchemaError, SchemaRegistry};
use crate::subject::{self, SubjectError};

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error(transparent)]
    Subject(#[from] SubjectError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error(transparent)]
    Subject(#[from] SubjectError),

    #[error("duplicate route registered for subject {subject:?} (first registered by operation {existing_operation_id:?})")]
    DuplicateRoute {
        subject: String,
        existing_operation_id: String,
    },
}

/// Options shared by `add_request`/`add_publish`, mirroring the source's
/// keyword arguments.
#[derive(Default)]
pub struct EndpointOptions {
    pub summary: Option<String>,
    pub description: String,
    pub tags: Vec<String>,
    pub deprecated: Option<bool>,
    pub include_schema: bool,
    pub skip_validation: bool,
}

impl EndpointOptions {
    pub fn new() -> Self {
        Self {
            include_schema: true,
            ..Default::default()
        }
    }
}

/// Accumulates endpoint descriptors under a shared prefix and tag set before
/// they're merged into an application's routing table.
#[derive(Default)]
pub struct SubjectRouter {
    prefix: Option<String>,
    tags: Vec<String>,
    deprecated: Option<bool>,
    routes: Vec<Endpoint>,
    subs: Vec<SubDescriptor>,
    pubs: Vec<PubDescriptor>,
}

impl SubjectRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_deprecated(mut self, deprecated: bool) -> Self {
        self.deprecated = Some(deprecated);
        self
    }

    fn qualify(&self, subject: &str) -> String {
        match &self.prefix {
            Some(prefix) => subject::join(prefix, subject),
            None => subject.to_string(),
        }
    }

    fn merged_tags(&self, extra: &[String]) -> Vec<String> {
        let mut tags = self.tags.clone();
        tags.extend(extra.iter().cloned());
        tags
    }

    /// Register a request/reply endpoint. `P` is the params type, `R` the
    /// result type; both drive AsyncAPI schema generation. `R` may be a
    /// `#[serde(untagged)]` enum to document a union result.
    pub fn add_request<P, R, F, Fut>(
        &mut self,
        subject: &str,
        handler: F,
        opts: EndpointOptions,
        schemas: &mut SchemaRegistry,
    ) -> Result<(), RegisterError>
    where
        P: DeserializeOwned + schemars::JsonSchema + Send + 'static,
        R: Serialize + ResultSchema,
        F: Fn(AppHandle, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, BoxDispatchError>> + Send + 'static,
    {
        subject::validate_concrete(subject)?;
        let full_subject = self.qualify(subject);
        let summary = opts.summary.clone().unwrap_or_else(|| full_subject.clone());
        let operation_id = subject::operation_id(&summary, &full_subject);
        let params_schema_name = format!("{operation_id}Params");
        let result_schema_name = format!("{operation_id}Result");
        schemas.ensure::<P>(&params_schema_name)?;
        let result_schema_names = R::register(schemas, &result_schema_name)?;
        let meta = EndpointMeta {
            summary,
            description: opts.description,
            tags: self.merged_tags(&opts.tags),
            deprecated: opts.deprecated.or(self.deprecated).unwrap_or(false),
            include_schema: opts.include_schema,
        };
        self.routes.push(Endpoint::Request(RequestEndpoint {
            subject: full_subject,
            operation_id,
            meta,
            handler: erase(handler),
            params_type_name: std::any::type_name::<P>(),
            params_schema_name,
            result_schema_names,
            skip_validation: false,
            suggested_timeout: None,
        }));
        Ok(())
    }

    /// Register a request/reply endpoint that opts out of parameter
    /// validation: the handler receives the raw params object untouched
    /// (the source's `skip_validation=True`).
    pub fn add_request_raw<R, F, Fut>(
        &mut self,
        subject: &str,
        handler: F,
        opts: EndpointOptions,
        schemas: &mut SchemaRegistry,
    ) -> Result<(), RegisterError>
    where
        R: Serialize + ResultSchema,
        F: Fn(AppHandle, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, BoxDispatchError>> + Send + 'static,
    {
        subject::validate_concrete(subject)?;
        let full_subject = self.qualify(subject);
        let summary = opts.summary.clone().unwrap_or_else(|| full_subject.clone());
        let operation_id = subject::operation_id(&summary, &full_subject);
        let result_schema_name = format!("{operation_id}Result");
        let result_schema_names = R::register(schemas, &result_schema_name)?;
        let meta = EndpointMeta {
            summary,
            description: opts.description,
            tags: self.merged_tags(&opts.tags),
            deprecated: opts.deprecated.or(self.deprecated).unwrap_or(false),
            include_schema: opts.include_schema,
        };
        self.routes.push(Endpoint::Request(RequestEndpoint {
            subject: full_subject,
            operation_id,
            meta,
            handler: erase_raw(handler),
            params_type_name: std::any::type_name::<Value>(),
            params_schema_name: String::new(),
            result_schema_names,
            skip_validation: true,
            suggested_timeout: None,
        }));
        Ok(())
    }

    /// Register a fire-and-forget publish endpoint.
    pub fn add_publish<P, F, Fut>(
        &mut self,
        subject: &str,
        handler: F,
        opts: EndpointOptions,
        schemas: &mut SchemaRegistry,
    ) -> Result<(), RegisterError>
    where
        P: DeserializeOwned + schemars::JsonSchema + Send + 'static,
        F: Fn(AppHandle, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxDispatchError>> + Send + 'static,
    {
        subject::validate_concrete(subject)?;
        let full_subject = self.qualify(subject);
        let summary = opts.summary.clone().unwrap_or_else(|| full_subject.clone());
        let operation_id = subject::operation_id(&summary, &full_subject);
        let params_schema_name = format!("{operation_id}Params");
        schemas.ensure::<P>(&params_schema_name)?;
        let meta = EndpointMeta {
            summary,
            description: opts.description,
            tags: self.merged_tags(&opts.tags),
            deprecated: opts.deprecated.or(self.deprecated).unwrap_or(false),
            include_schema: opts.include_schema,
        };
        self.routes.push(Endpoint::Publish(PublishEndpoint {
            subject: full_subject,
            operation_id,
            meta,
            handler: erase(handler),
            params_type_name: std::any::type_name::<P>(),
            params_schema_name,
            skip_validation: false,
        }));
        Ok(())
    }

    /// Register a publish endpoint that opts out of parameter validation.
    pub fn add_publish_raw<F, Fut>(
        &mut self,
        subject: &str,
        handler: F,
        opts: EndpointOptions,
    ) -> Result<(), RegisterError>
    where
        F: Fn(AppHandle, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxDispatchError>> + Send + 'static,
    {
        subject::validate_concrete(subject)?;
        let full_subject = self.qualify(subject);
        let summary = opts.summary.clone().unwrap_or_else(|| full_subject.clone());
        let operation_id = subject::operation_id(&summary, &full_subject);
        let meta = EndpointMeta {
            summary,
            description: opts.description,
            tags: self.merged_tags(&opts.tags),
            deprecated: opts.deprecated.or(self.deprecated).unwrap_or(false),
            include_schema: opts.include_schema,
        };
        self.routes.push(Endpoint::Publish(PublishEndpoint {
            subject: full_subject,
            operation_id,
            meta,
            handler: erase_raw(handler),
            params_type_name: std::any::type_name::<Value>(),
            params_schema_name: String::new(),
            skip_validation: true,
        }));
        Ok(())
    }

    /// Document (without handling) that this service consumes `subject`.
    pub fn add_sub(
        &mut self,
        subject: &str,
        queue: Option<String>,
        meta: EndpointMeta,
        external_docs: Option<ExternalDocs>,
    ) {
        self.subs.push(SubDescriptor {
            subject: self.qualify(subject),
            queue,
            meta,
            external_docs,
        });
    }

    /// Document that this service publishes `P`-shaped payloads to `subject`.
    pub fn add_pub<P: schemars::JsonSchema + 'static>(
        &mut self,
        subject: &str,
        meta: EndpointMeta,
        external_docs: Option<ExternalDocs>,
        schemas: &mut SchemaRegistry,
    ) -> Result<(), SchemaError> {
        let full_subject = self.qualify(subject);
        let params_schema_name = format!("Publish_{full_subject}");
        schemas.ensure::<P>(&params_schema_name)?;
        self.pubs.push(PubDescriptor {
            subject: full_subject,
            meta,
            params_type_name: std::any::type_name::<P>(),
            params_schema_name,
            external_docs,
        });
        Ok(())
    }

    pub fn routes(&self) -> &[Endpoint] {
        &self.routes
    }

    pub fn subs(&self) -> &[SubDescriptor] {
        &self.subs
    }

    pub fn pubs(&self) -> &[PubDescriptor] {
        &self.pubs
    }

    pub fn into_parts(self) -> (Vec<Endpoint>, Vec<SubDescriptor>, Vec<PubDescriptor>) {
        (self.routes, self.subs, self.pubs)
    }
}

/// Fully-qualified-subject -> endpoint map, with method-in-params fallback
/// lookup (§4.4 step 5) and duplicate-registration detection (§4.2).
#[derive(Default)]
pub struct RoutingTable {
    by_subject: HashMap<String, Arc<Endpoint>>,
    subs: Vec<SubDescriptor>,
    pubs: Vec<PubDescriptor>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a router's accumulated routes in. Errors if a subject was
    /// already registered (mirrors `include_router`'s duplicate check).
    /// Accumulates the router's `Sub`/`Pub` descriptors alongside its routes
    /// (§4.2(4)) so they survive into the generated AsyncAPI document.
    pub fn include(&mut self, router: SubjectRouter) -> Result<(), RouterError> {
        let (routes, subs, pubs) = router.into_parts();
        for endpoint in routes {
            self.insert(endpoint)?;
        }
        self.subs.extend(subs);
        self.pubs.extend(pubs);
        Ok(())
    }

    pub fn subs(&self) -> &[SubDescriptor] {
        &self.subs
    }

    pub fn pubs(&self) -> &[PubDescriptor] {
        &self.pubs
    }

    pub fn insert(&mut self, endpoint: Endpoint) -> Result<(), RouterError> {
        let subject = endpoint.subject().to_string();
        if let Some(existing) = self.by_subject.get(&subject) {
            let existing_operation_id = match existing.as_ref() {
                Endpoint::Request(r) => r.operation_id.clone(),
                Endpoint::Publish(p) => p.operation_id.clone(),
            };
            return Err(RouterError::DuplicateRoute {
                subject,
                existing_operation_id,
            });
        }
        self.by_subject.insert(subject, Arc::new(endpoint));
        Ok(())
    }

    /// Look the subject up directly, falling back to `subject + "." + method`
    /// when `method` is present in the decoded request (§4.4 step 5).
    pub fn resolve(&self, subject: &str, method: Option<&str>) -> Option<Arc<Endpoint>> {
        if let Some(endpoint) = self.by_subject.get(subject) {
            return Some(endpoint.clone());
        }
        let method = method?;
        let with_method = subject::with_method(subject, method);
        self.by_subject.get(&with_method).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Endpoint>> {
        self.by_subject.values()
    }

    pub fn len(&self) -> usize {
        self.by_subject.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_subject.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;
    use serde::Deserialize;

    #[derive(Deserialize, JsonSchema)]
    struct PingParams {
        value: i64,
    }

    #[tokio::test]
    async fn add_request_qualifies_subject_with_prefix() {
        let mut router = SubjectRouter::new().with_prefix("development.brokers");
        router
            .add_request(
                "CREATE",
                |_app: AppHandle, p: PingParams| async move {
                    Ok::<_, BoxDispatchError>(serde_json::json!({"value": p.value}))
                },
                EndpointOptions::new(),
                &mut SchemaRegistry::new(),
            )
            .unwrap();
        assert_eq!(router.routes()[0].subject(), "development.brokers.CREATE");
    }

    #[test]
    fn duplicate_subjects_are_rejected() {
        let mut schemas = SchemaRegistry::new();
        let mut table = RoutingTable::new();
        let mut router_a = SubjectRouter::new();
        router_a
            .add_request(
                "foo.CREATE",
                |_app: AppHandle, p: PingParams| async move {
                    Ok::<_, BoxDispatchError>(serde_json::json!({"value": p.value}))
                },
                EndpointOptions::new(),
                &mut schemas,
            )
            .unwrap();
        table.include(router_a).unwrap();

        let mut router_b = SubjectRouter::new();
        router_b
            .add_request(
                "foo.CREATE",
                |_app: AppHandle, p: PingParams| async move {
                    Ok::<_, BoxDispatchError>(serde_json::json!({"value": p.value}))
                },
                EndpointOptions::new(),
                &mut schemas,
            )
            .unwrap();
        let err = table.include(router_b).unwrap_err();
        assert!(matches!(err, RouterError::DuplicateRoute { .. }));
    }

    #[test]
    fn resolve_falls_back_to_method_suffixed_subject() {
        let mut schemas = SchemaRegistry::new();
        let mut table = RoutingTable::new();
        let mut router = SubjectRouter::new();
        router
            .add_request(
                "rpc.GET",
                |_app: AppHandle, p: PingParams| async move {
                    Ok::<_, BoxDispatchError>(serde_json::json!({"value": p.value}))
                },
                EndpointOptions::new(),
                &mut schemas,
            )
            .unwrap();
        table.include(router).unwrap();

        assert!(table.resolve("rpc", Some("GET")).is_some());
        assert!(table.resolve("rpc", None).is_none());
    }
}
