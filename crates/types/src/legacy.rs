//! Legacy type handlers
//!
//! When a type's shape changes, the registry assigns it a new type id and the
//! old description stays in the dictionary. Records written under the old id
//! are read with the old description and then handed to the
//! [`LegacyTypeHandler`] registered for the type name, which rebuilds field
//! values in the current shape.
//!
//! Mapping is never automatic: without a registered handler a legacy record
//! cannot be loaded. [`FieldMapping`] is a declarative handler covering the
//! common cases (copy by name, rename, default for new fields).

use crate::description::TypeDescription;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tessera_core::{Error, Result, Value};

/// Maps field values of a legacy layout into the current layout
pub trait LegacyTypeHandler: Send + Sync {
    /// Qualified name of the type this handler is responsible for
    fn type_name(&self) -> &str;

    /// Rebuild `values` (in `legacy` order) as values in `current` order
    fn map(
        &self,
        legacy: &TypeDescription,
        current: &TypeDescription,
        values: Vec<Value>,
    ) -> Result<Vec<Value>>;
}

#[derive(Debug, Clone)]
enum FieldSource {
    Legacy(String),
    Default(Value),
}

/// Declarative legacy handler
///
/// Each current field is filled from, in order of precedence:
/// 1. an explicit [`FieldMapping::rename`] source,
/// 2. an explicit [`FieldMapping::default_value`],
/// 3. the legacy field of the same name, if its kind is unchanged,
/// 4. the kind's zero value.
#[derive(Debug, Clone)]
pub struct FieldMapping {
    type_name: String,
    sources: FxHashMap<String, FieldSource>,
    copy_matching: bool,
}

impl FieldMapping {
    /// Mapping for `type_name` that copies same-named fields
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            sources: FxHashMap::default(),
            copy_matching: true,
        }
    }

    /// Fill current field `current` from legacy field `legacy`
    pub fn rename(mut self, current: impl Into<String>, legacy: impl Into<String>) -> Self {
        self.sources
            .insert(current.into(), FieldSource::Legacy(legacy.into()));
        self
    }

    /// Fill current field `current` with a fixed value
    pub fn default_value(mut self, current: impl Into<String>, value: Value) -> Self {
        self.sources.insert(current.into(), FieldSource::Default(value));
        self
    }

    /// Only copy explicitly mapped fields
    pub fn explicit_only(mut self) -> Self {
        self.copy_matching = false;
        self
    }
}

impl LegacyTypeHandler for FieldMapping {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn map(
        &self,
        legacy: &TypeDescription,
        current: &TypeDescription,
        values: Vec<Value>,
    ) -> Result<Vec<Value>> {
        if values.len() != legacy.fields().len() {
            return Err(Error::LayoutMismatch {
                type_id: legacy.type_id(),
                type_name: legacy.type_name().to_string(),
                detail: format!(
                    "expected {} legacy values, got {}",
                    legacy.fields().len(),
                    values.len()
                ),
            });
        }
        let take = |name: &str| -> Option<(usize, Value)> {
            let index = legacy.layout().field_index(name)?;
            Some((index, values[index].clone()))
        };

        let mut mapped = Vec::with_capacity(current.fields().len());
        for field in current.fields() {
            let value = match self.sources.get(field.name()) {
                Some(FieldSource::Legacy(source)) => match take(source) {
                    Some((_, value)) => value,
                    None => {
                        return Err(Error::invalid_operation(format!(
                            "legacy field {}.{} does not exist",
                            legacy.type_name(),
                            source
                        )))
                    }
                },
                Some(FieldSource::Default(value)) => value.clone(),
                None if self.copy_matching => match take(field.name()) {
                    Some((index, value)) if legacy.fields()[index].kind() == field.kind() => value,
                    _ => field.kind().default_value(),
                },
                None => field.kind().default_value(),
            };
            if !field.kind().accepts(&value) {
                return Err(Error::invalid_operation(format!(
                    "value of kind {} does not fit field {}.{} of kind {}",
                    value.kind_name(),
                    current.type_name(),
                    field.name(),
                    field.kind()
                )));
            }
            mapped.push(value);
        }
        Ok(mapped)
    }
}

/// Legacy handlers keyed by type name
#[derive(Default)]
pub struct LegacyHandlerRegistry {
    handlers: RwLock<FxHashMap<String, Arc<dyn LegacyTypeHandler>>>,
}

impl LegacyHandlerRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for its type name
    pub fn register(&self, handler: Arc<dyn LegacyTypeHandler>) {
        self.handlers
            .write()
            .insert(handler.type_name().to_string(), handler);
    }

    /// Handler for a type name
    pub fn get(&self, type_name: &str) -> Option<Arc<dyn LegacyTypeHandler>> {
        self.handlers.read().get(type_name).cloned()
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// True if no handler is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for LegacyHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read();
        let mut names: Vec<&String> = handlers.keys().collect();
        names.sort();
        f.debug_struct("LegacyHandlerRegistry")
            .field("types", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::TypeLayout;
    use tessera_core::TypeId;

    fn legacy() -> TypeDescription {
        let layout = TypeLayout::builder("app.Person")
            .text("name")
            .int("age")
            .reference("home")
            .build()
            .unwrap();
        TypeDescription::new(TypeId::new(1_000_000), layout).unwrap()
    }

    fn current() -> TypeDescription {
        let layout = TypeLayout::builder("app.Person")
            .text("full_name")
            .long("age")
            .reference("home")
            .bool("active")
            .build()
            .unwrap();
        TypeDescription::new(TypeId::new(1_000_001), layout).unwrap()
    }

    fn legacy_values() -> Vec<Value> {
        vec![
            Value::Text("Ada".to_string()),
            Value::Int(36),
            Value::reference(tessera_core::ObjectId::new(7)),
        ]
    }

    #[test]
    fn test_field_mapping_rename_and_defaults() {
        let mapping = FieldMapping::new("app.Person")
            .rename("full_name", "name")
            .default_value("active", Value::Bool(true));
        let mapped = mapping.map(&legacy(), &current(), legacy_values()).unwrap();
        assert_eq!(
            mapped,
            vec![
                Value::Text("Ada".to_string()),
                // kind changed from int to long: zero value
                Value::Long(0),
                Value::reference(tessera_core::ObjectId::new(7)),
                Value::Bool(true),
            ]
        );
    }

    #[test]
    fn test_explicit_only_skips_matching() {
        let mapping = FieldMapping::new("app.Person").explicit_only();
        let mapped = mapping.map(&legacy(), &current(), legacy_values()).unwrap();
        assert_eq!(mapped[2], Value::Ref(None));
    }

    #[test]
    fn test_missing_legacy_source_fails() {
        let mapping = FieldMapping::new("app.Person").rename("full_name", "nickname");
        assert!(mapping.map(&legacy(), &current(), legacy_values()).is_err());
    }

    #[test]
    fn test_incompatible_default_fails() {
        let mapping = FieldMapping::new("app.Person").default_value("active", Value::Int(1));
        assert!(mapping.map(&legacy(), &current(), legacy_values()).is_err());
    }

    #[test]
    fn test_value_count_checked() {
        let mapping = FieldMapping::new("app.Person");
        let result = mapping.map(&legacy(), &current(), vec![Value::Int(1)]);
        assert!(matches!(result, Err(Error::LayoutMismatch { .. })));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = LegacyHandlerRegistry::new();
        assert!(registry.is_empty());
        registry.register(Arc::new(FieldMapping::new("app.Person")));
        assert!(registry.get("app.Person").is_some());
        assert!(registry.get("app.Other").is_none());
        assert_eq!(registry.len(), 1);
    }
}
