//! AsyncAPI 2.0.0 service description generator (C7, §4.6).
//!
//! A pure function over a [`RoutingTable`] + [`SchemaRegistry`], mirroring
//! `asyncapi/utils.py`'s `get_asyncapi()`: walks every schema-included route,
//! builds one channel entry per subject (`request`/`publish`/`subscribe`
//! operations), collects component schemas, and — when a domain error
//! catalog was declared — appends the `errors` section.

use std::collections::HashMap;

use natsapi_errors::DomainErrorCatalog;
use serde_json::{json, Value};

use crate::endpoint::{Endpoint, PubDescriptor, SubDescriptor};
use crate::router::RoutingTable;
use crate::rpc::JsonRpcError;
use crate::schema::SchemaRegistry;

pub const ASYNCAPI_VERSION: &str = "2.0.0";

#[derive(Debug, Clone, Default)]
pub struct ServiceInfo {
    pub title: String,
    pub version: String,
    pub description: Option<String>,
}

fn ref_for(name: &str) -> Value {
    json!({"$ref": format!("#/components/schemas/{name}")})
}

fn tags_value(tags: &[String]) -> Option<Value> {
    if tags.is_empty() {
        None
    } else {
        Some(Value::Array(
            tags.iter().map(|t| json!({"name": t})).collect(),
        ))
    }
}

fn request_channel(endpoint: &crate::endpoint::RequestEndpoint) -> Value {
    let mut operation = json!({
        "summary": endpoint.meta.summary,
        "description": endpoint.meta.description,
        "operationId": endpoint.operation_id,
        "message": {"payload": ref_for(&endpoint.params_schema_name)},
    });
    if let Some(obj) = operation.as_object_mut() {
        if endpoint.meta.deprecated {
            obj.insert("deprecated".to_string(), json!(true));
        }
        if let Some(tags) = tags_value(&endpoint.meta.tags) {
            obj.insert("tags".to_string(), tags);
        }
        if let Some(timeout) = endpoint.suggested_timeout {
            obj.insert("x-suggested-timeout".to_string(), json!(timeout));
        }
        let mut replies = Vec::new();
        if endpoint.result_schema_names.len() > 1 {
            let any_of: Vec<Value> = endpoint.result_schema_names.iter().map(|name| ref_for(name)).collect();
            replies.push(json!({"payload": {"anyOf": any_of}}));
        } else if let Some(name) = endpoint.result_schema_names.first() {
            replies.push(json!({"payload": ref_for(name)}));
        }
        replies.push(json!({"payload": ref_for("JsonRpcError")}));
        obj.insert("replies".to_string(), Value::Array(replies));
    }
    json!({"request": operation, "deprecated": endpoint.meta.deprecated})
}

fn publish_channel(endpoint: &crate::endpoint::PublishEndpoint) -> Value {
    let mut operation = json!({
        "summary": endpoint.meta.summary,
        "description": endpoint.meta.description,
        "operationId": endpoint.operation_id,
        "message": {"payload": ref_for(&endpoint.params_schema_name)},
    });
    if let Some(obj) = operation.as_object_mut() {
        if endpoint.meta.deprecated {
            obj.insert("deprecated".to_string(), json!(true));
        }
        if let Some(tags) = tags_value(&endpoint.meta.tags) {
            obj.insert("tags".to_string(), tags);
        }
    }
    json!({"publish": operation, "deprecated": endpoint.meta.deprecated})
}

fn sub_channel(sub: &SubDescriptor) -> Value {
    json!({
        "subscribe": {
            "summary": sub.meta.summary,
            "description": sub.meta.description,
            "tags": tags_value(&sub.meta.tags),
            "message": {"summary": sub.meta.summary},
        }
    })
}

fn pub_channel(pub_desc: &PubDescriptor) -> Value {
    json!({
        "publish": {
            "summary": pub_desc.meta.summary,
            "description": pub_desc.meta.description,
            "tags": tags_value(&pub_desc.meta.tags),
            "message": {"payload": ref_for(&pub_desc.params_schema_name), "pub": pub_desc.meta.summary},
        }
    })
}

fn domain_errors_section(catalog: &DomainErrorCatalog) -> Value {
    let items: Vec<Value> = catalog
        .errors()
        .iter()
        .map(|e| json!({"code": e.code, "message": e.message}))
        .collect();
    json!({
        "range": {"upper": catalog.upper_bound(), "lower": catalog.lower_bound()},
        "items": items,
    })
}

fn json_rpc_error_schema() -> Value {
    json!({
        "type": "object",
        "required": ["code", "message", "timestamp"],
        "properties": {
            "code": {"type": "integer"},
            "message": {"type": "string"},
            "timestamp": {"type": "string", "format": "date-time"},
            "data": {
                "type": "object",
                "properties": {
                    "type": {"type": "string"},
                    "errors": {"type": "array", "items": {"type": "object"}},
                },
            },
        },
    })
}

/// Build the full AsyncAPI 2.0.0 document for a service.
pub fn generate(
    info: &ServiceInfo,
    routing: &RoutingTable,
    schemas: &SchemaRegistry,
    domain_errors: Option<&DomainErrorCatalog>,
) -> Value {
    let mut channels: HashMap<String, Value> = HashMap::new();

    for endpoint in routing.iter() {
        if !endpoint.include_schema() {
            continue;
        }
        let channel = match endpoint.as_ref() {
            Endpoint::Request(r) => request_channel(r),
            Endpoint::Publish(p) => publish_channel(p),
        };
        channels.insert(endpoint.subject().to_string(), channel);
    }

    let mut definitions = schemas.definitions();
    definitions.insert("JsonRpcError".to_string(), json_rpc_error_schema());

    let mut output = json!({
        "asyncapi": ASYNCAPI_VERSION,
        "info": {
            "title": info.title,
            "version": info.version,
            "description": info.description,
        },
        "defaultContentType": "application/json",
        "components": {"schemas": definitions},
    });

    for sub in routing.subs() {
        if sub.meta.include_schema {
            channels.insert(sub.subject.clone(), sub_channel(sub));
        }
    }
    for pub_desc in routing.pubs() {
        if pub_desc.meta.include_schema {
            channels.insert(pub_desc.subject.clone(), pub_channel(pub_desc));
        }
    }

    if !channels.is_empty() {
        output["channels"] = Value::Object(channels.into_iter().collect());
    }
    if let Some(catalog) = domain_errors {
        output["errors"] = domain_errors_section(catalog);
    }

    output
}

/// Validate a reply's error section parses back to [`JsonRpcError`] — used by
/// integration tests asserting the wire shape matches what this module
/// documents.
pub fn parse_error_example(value: &Value) -> serde_json::Result<JsonRpcError> {
    serde_json::from_value(value.clone())
}
