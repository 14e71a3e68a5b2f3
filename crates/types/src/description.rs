//! Persisted type descriptions
//!
//! A [`TypeDescription`] binds a [`TypeId`] to a qualified type name and an
//! ordered pseudo-field list. Once registered, the field list and the derived
//! byte offsets never change for that type id.

use crate::layout::{PseudoField, TypeLayout};
use std::fmt;
use tessera_core::{Error, Result, TypeId};

/// (typeId, type name, pseudo-fields) plus derived fixed-block offsets
#[derive(Debug, Clone)]
pub struct TypeDescription {
    type_id: TypeId,
    layout: TypeLayout,
    /// Offset of each fixed field inside the fixed block, `None` for tail fields
    offsets: Vec<Option<u64>>,
    fixed_length: u64,
    variable_count: usize,
}

impl TypeDescription {
    /// Describe `layout` under `type_id`
    pub fn new(type_id: TypeId, layout: TypeLayout) -> Result<Self> {
        if type_id.is_null() {
            return Err(Error::configuration(format!(
                "type {} has no type id",
                layout.type_name()
            )));
        }
        let mut offsets = Vec::with_capacity(layout.fields().len());
        let mut fixed_length = 0u64;
        let mut variable_count = 0usize;
        for field in layout.fields() {
            match field.kind().fixed_width() {
                Some(width) => {
                    offsets.push(Some(fixed_length));
                    fixed_length += width;
                }
                None => {
                    offsets.push(None);
                    variable_count += 1;
                }
            }
        }
        Ok(Self {
            type_id,
            layout,
            offsets,
            fixed_length,
            variable_count,
        })
    }

    /// Build from name and field list
    pub fn from_parts(
        type_id: TypeId,
        type_name: impl Into<String>,
        fields: Vec<PseudoField>,
    ) -> Result<Self> {
        Self::new(type_id, TypeLayout::new(type_name, fields)?)
    }

    /// Persistent type id
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Qualified type name
    pub fn type_name(&self) -> &str {
        self.layout.type_name()
    }

    /// Pseudo-fields in persisted order
    pub fn fields(&self) -> &[PseudoField] {
        self.layout.fields()
    }

    /// The layout this description persists
    pub fn layout(&self) -> &TypeLayout {
        &self.layout
    }

    /// Offset of field `index` inside the fixed block
    pub fn fixed_offset(&self, index: usize) -> Option<u64> {
        self.offsets.get(index).copied().flatten()
    }

    /// Total width of the fixed block
    pub fn fixed_length(&self) -> u64 {
        self.fixed_length
    }

    /// Number of tail fields
    pub fn variable_count(&self) -> usize {
        self.variable_count
    }

    /// True if `layout` has exactly this name and field list
    pub fn matches(&self, layout: &TypeLayout) -> bool {
        &self.layout == layout
    }

    /// True if any field holds references
    pub fn has_references(&self) -> bool {
        self.fields().iter().any(|f| f.kind().is_reference())
    }
}

impl PartialEq for TypeDescription {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.layout == other.layout
    }
}

impl Eq for TypeDescription {}

impl fmt::Display for TypeDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.type_id, self.type_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::PrimitiveKind;

    fn node_layout() -> TypeLayout {
        TypeLayout::builder("app.Node")
            .bool("flag")
            .long("value")
            .primitive_array("samples", PrimitiveKind::Int)
            .reference("next")
            .text("label")
            .build()
            .unwrap()
    }

    #[test]
    fn test_offsets_skip_tail_fields() {
        let desc = TypeDescription::new(TypeId::new(1_000_001), node_layout()).unwrap();
        assert_eq!(desc.fixed_offset(0), Some(0));
        assert_eq!(desc.fixed_offset(1), Some(1));
        assert_eq!(desc.fixed_offset(2), None);
        assert_eq!(desc.fixed_offset(3), Some(9));
        assert_eq!(desc.fixed_offset(4), None);
        assert_eq!(desc.fixed_length(), 17);
        assert_eq!(desc.variable_count(), 2);
        assert!(desc.has_references());
    }

    #[test]
    fn test_null_type_id_rejected() {
        assert!(TypeDescription::new(TypeId::NULL, node_layout()).is_err());
    }

    #[test]
    fn test_matches_layout() {
        let desc = TypeDescription::new(TypeId::new(1_000_001), node_layout()).unwrap();
        assert!(desc.matches(&node_layout()));
        let changed = TypeLayout::builder("app.Node").long("value").build().unwrap();
        assert!(!desc.matches(&changed));
    }
}
