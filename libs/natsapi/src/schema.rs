//! Schema registry (C1): derives, caches, and emits JSON schemas for handler
//! parameter and result types.
//!
//! The source introspects a handler's Python signature at registration time
//! to synthesize a pydantic model. Rust has no runtime signature
//! introspection, so callers supply the parameters type directly (it derives
//! [`schemars::JsonSchema`] and [`serde::de::DeserializeOwned`]); the
//! registry's job narrows to deriving+caching the JSON Schema document for
//! that type and catching two distinct types that would collide under the
//! same generated name.

use std::any::TypeId;
use std::collections::HashMap;

use schemars::{schema::RootSchema, JsonSchema};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema name clash: type {new_type} and type {existing_type} both generate the name {name:?}; rename one of the parameter structs")]
    NameClash {
        name: String,
        existing_type: &'static str,
        new_type: &'static str,
    },
}

#[derive(Clone)]
struct CachedSchema {
    type_name: &'static str,
    document: RootSchema,
}

/// Caches synthesized JSON schemas by the Rust type's [`TypeId`], and
/// detects when two distinct types would generate the same schema name.
#[derive(Default)]
pub struct SchemaRegistry {
    by_type: HashMap<TypeId, CachedSchema>,
    name_owner: HashMap<String, TypeId>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive (or return the cached) schema for `T` under `name`. Re-deriving
    /// for the same `T` is idempotent; deriving a second, distinct type under
    /// a name already claimed by another type is a [`SchemaError::NameClash`].
    pub fn ensure<T>(&mut self, name: &str) -> Result<(), SchemaError>
    where
        T: JsonSchema + 'static,
    {
        let type_id = TypeId::of::<T>();
        if self.by_type.contains_key(&type_id) {
            return Ok(());
        }

        if let Some(owner) = self.name_owner.get(name) {
            if *owner != type_id {
                let existing_type = self
                    .by_type
                    .get(owner)
                    .map(|c| c.type_name)
                    .unwrap_or("<unknown>");
                return Err(SchemaError::NameClash {
                    name: name.to_string(),
                    existing_type,
                    new_type: std::any::type_name::<T>(),
                });
            }
        }

        let mut generator = schemars::gen::SchemaGenerator::new(
            schemars::gen::SchemaSettings::draft07().with(|s| {
                s.definitions_path = "#/components/schemas/".to_string();
            }),
        );
        let schema = generator.root_schema_for::<T>();

        self.name_owner.insert(name.to_string(), type_id);
        self.by_type.insert(
            type_id,
            CachedSchema {
                type_name: std::any::type_name::<T>(),
                document: schema,
            },
        );
        Ok(())
    }

    pub fn get_by_name(&self, name: &str) -> Option<Value> {
        let type_id = self.name_owner.get(name)?;
        let cached = self.by_type.get(type_id)?;
        Some(serde_json::to_value(&cached.document.schema).unwrap_or_default())
    }

    /// All definitions collected so far, keyed by generated name.
    pub fn definitions(&self) -> HashMap<String, Value> {
        self.name_owner
            .iter()
            .filter_map(|(name, type_id)| {
                let cached = self.by_type.get(type_id)?;
                Some((
                    name.clone(),
                    serde_json::to_value(&cached.document.schema).unwrap_or_default(),
                ))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

/// What a handler's result type registers itself as in the schema registry:
/// one component for an ordinary type, one component per member for a
/// declared union result (§4.6, §8 scenario 4) — the Rust analogue of the
/// source's `get_flat_response_models` splitting a `typing.Union[A, B]`
/// return annotation into its member models before schema generation.
pub trait ResultSchema: Send + 'static {
    /// Register this result's schema(s) under `base_name`, returning the
    /// component name(s) a reply payload should `$ref`. More than one name
    /// means the caller should emit `anyOf` over all of them.
    fn register(schemas: &mut SchemaRegistry, base_name: &str) -> Result<Vec<String>, SchemaError>;
}

impl<T> ResultSchema for T
where
    T: JsonSchema + Send + 'static,
{
    fn register(schemas: &mut SchemaRegistry, base_name: &str) -> Result<Vec<String>, SchemaError> {
        schemas.ensure::<T>(base_name)?;
        Ok(vec![base_name.to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, JsonSchema)]
    struct Foo {
        foo: i64,
    }

    #[derive(Serialize, Deserialize, JsonSchema)]
    struct Bar {
        bar: String,
    }

    #[test]
    fn ensure_is_idempotent_for_the_same_type() {
        let mut registry = SchemaRegistry::new();
        registry.ensure::<Foo>("foo_params").unwrap();
        registry.ensure::<Foo>("foo_params").unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn distinct_types_under_the_same_name_is_an_error() {
        let mut registry = SchemaRegistry::new();
        registry.ensure::<Foo>("params").unwrap();
        let err = registry.ensure::<Bar>("params").unwrap_err();
        assert!(matches!(err, SchemaError::NameClash { .. }));
    }

    #[test]
    fn definitions_are_retrievable_by_name() {
        let mut registry = SchemaRegistry::new();
        registry.ensure::<Foo>("foo_params").unwrap();
        let doc = registry.get_by_name("foo_params").unwrap();
        assert!(doc.get("properties").is_some());
    }
}
