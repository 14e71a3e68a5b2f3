//! Field values
//!
//! [`Value`] is the state of one pseudo-field. It is generic over the
//! reference representation:
//!
//! - `Value<ObjectId>` is the binary view the codec reads and writes
//! - the engine instantiates it with live entity handles
//!
//! Converting between the two is [`Value::try_map_refs`], which is where
//! swizzling (object id -> instance) and unswizzling happen.

use crate::ids::ObjectId;
use std::fmt;

/// Primitive kinds and their fixed binary widths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    /// 1 byte, 0 or 1
    Bool,
    /// 1 byte signed
    Byte,
    /// 2 bytes signed
    Short,
    /// 4 bytes, Unicode scalar value
    Char,
    /// 4 bytes signed
    Int,
    /// 4 bytes IEEE 754
    Float,
    /// 8 bytes signed
    Long,
    /// 8 bytes IEEE 754
    Double,
}

impl PrimitiveKind {
    /// All primitive kinds
    pub const ALL: [PrimitiveKind; 8] = [
        PrimitiveKind::Bool,
        PrimitiveKind::Byte,
        PrimitiveKind::Short,
        PrimitiveKind::Char,
        PrimitiveKind::Int,
        PrimitiveKind::Float,
        PrimitiveKind::Long,
        PrimitiveKind::Double,
    ];

    /// Binary width in bytes
    pub const fn width(&self) -> u64 {
        match self {
            PrimitiveKind::Bool | PrimitiveKind::Byte => 1,
            PrimitiveKind::Short => 2,
            PrimitiveKind::Char | PrimitiveKind::Int | PrimitiveKind::Float => 4,
            PrimitiveKind::Long | PrimitiveKind::Double => 8,
        }
    }

    /// Dictionary keyword
    pub const fn name(&self) -> &'static str {
        match self {
            PrimitiveKind::Bool => "bool",
            PrimitiveKind::Byte => "byte",
            PrimitiveKind::Short => "short",
            PrimitiveKind::Char => "char",
            PrimitiveKind::Int => "int",
            PrimitiveKind::Float => "float",
            PrimitiveKind::Long => "long",
            PrimitiveKind::Double => "double",
        }
    }

    /// Parse a dictionary keyword
    pub fn from_name(name: &str) -> Option<Self> {
        PrimitiveKind::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Zero value of this kind
    pub fn default_value<R>(&self) -> Value<R> {
        match self {
            PrimitiveKind::Bool => Value::Bool(false),
            PrimitiveKind::Byte => Value::Byte(0),
            PrimitiveKind::Short => Value::Short(0),
            PrimitiveKind::Char => Value::Char('\0'),
            PrimitiveKind::Int => Value::Int(0),
            PrimitiveKind::Float => Value::Float(0.0),
            PrimitiveKind::Long => Value::Long(0),
            PrimitiveKind::Double => Value::Double(0.0),
        }
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// State of one pseudo-field
#[derive(Debug, Clone, PartialEq)]
pub enum Value<R = ObjectId> {
    /// bool
    Bool(bool),
    /// byte
    Byte(i8),
    /// short
    Short(i16),
    /// char
    Char(char),
    /// int
    Int(i32),
    /// float
    Float(f32),
    /// long
    Long(i64),
    /// double
    Double(f64),
    /// Reference, `None` is null
    Ref(Option<R>),
    /// Sized array of primitives or references
    Array(Vec<Value<R>>),
    /// UTF-8 text
    Text(String),
}

impl<R> Value<R> {
    /// Primitive kind if this is a primitive value
    pub fn primitive_kind(&self) -> Option<PrimitiveKind> {
        match self {
            Value::Bool(_) => Some(PrimitiveKind::Bool),
            Value::Byte(_) => Some(PrimitiveKind::Byte),
            Value::Short(_) => Some(PrimitiveKind::Short),
            Value::Char(_) => Some(PrimitiveKind::Char),
            Value::Int(_) => Some(PrimitiveKind::Int),
            Value::Float(_) => Some(PrimitiveKind::Float),
            Value::Long(_) => Some(PrimitiveKind::Long),
            Value::Double(_) => Some(PrimitiveKind::Double),
            Value::Ref(_) | Value::Array(_) | Value::Text(_) => None,
        }
    }

    /// Short name of the variant, for error messages
    pub fn kind_name(&self) -> &'static str {
        match self.primitive_kind() {
            Some(kind) => kind.name(),
            None => match self {
                Value::Ref(_) => "ref",
                Value::Array(_) => "array",
                _ => "text",
            },
        }
    }

    /// Referenced value, if this is a non-null reference
    pub fn as_ref_target(&self) -> Option<&R> {
        match self {
            Value::Ref(target) => target.as_ref(),
            _ => None,
        }
    }

    /// Integer view of integral primitives
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Byte(v) => Some(i64::from(*v)),
            Value::Short(v) => Some(i64::from(*v)),
            Value::Int(v) => Some(i64::from(*v)),
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Floating point view of float primitives
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean view
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Text view
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Array elements
    pub fn as_array(&self) -> Option<&[Value<R>]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Visit every non-null reference, including array elements
    pub fn for_each_ref(&self, f: &mut impl FnMut(&R)) {
        match self {
            Value::Ref(Some(target)) => f(target),
            Value::Array(items) => {
                for item in items {
                    item.for_each_ref(f);
                }
            }
            _ => {}
        }
    }

    /// Convert the reference representation, leaving primitives untouched
    ///
    /// `f` is only called for non-null references; returning `Ok(None)` turns
    /// the reference into null.
    pub fn try_map_refs<S, E>(
        &self,
        f: &mut impl FnMut(&R) -> Result<Option<S>, E>,
    ) -> Result<Value<S>, E> {
        Ok(match self {
            Value::Bool(v) => Value::Bool(*v),
            Value::Byte(v) => Value::Byte(*v),
            Value::Short(v) => Value::Short(*v),
            Value::Char(v) => Value::Char(*v),
            Value::Int(v) => Value::Int(*v),
            Value::Float(v) => Value::Float(*v),
            Value::Long(v) => Value::Long(*v),
            Value::Double(v) => Value::Double(*v),
            Value::Ref(None) => Value::Ref(None),
            Value::Ref(Some(target)) => Value::Ref(f(target)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| item.try_map_refs(f))
                    .collect::<Result<Vec<_>, E>>()?,
            ),
            Value::Text(s) => Value::Text(s.clone()),
        })
    }
}

impl Value<ObjectId> {
    /// Reference to an object id, null ids becoming null references
    pub fn reference(id: ObjectId) -> Self {
        Value::Ref(id.non_null())
    }
}
