//! Pseudo-field layouts
//!
//! A type's persisted shape is an ordered list of [`PseudoField`]s. Layouts are
//! declared explicitly with [`TypeLayoutBuilder`]; there is no reflection. The
//! declaration is built once and shared (`Arc<TypeLayout>`) by every entity of
//! that type.
//!
//! ## Binary placement
//!
//! Fixed-width fields (primitives, references) are packed in declaration order
//! directly after the record header. Variable-length fields (arrays, text) go to
//! the tail, also in declaration order, each as `[count: i64][elements]`.

use std::fmt;
use tessera_core::{Error, PrimitiveKind, Result, Value};

/// Width of a persisted reference
pub const REFERENCE_WIDTH: u64 = 8;

/// Width of the element count that prefixes every variable-length field
pub const COUNT_WIDTH: u64 = 8;

/// Element kind of a sized array
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// Fixed-width primitive elements
    Primitive(PrimitiveKind),
    /// Object references, optionally restricted to one type
    Reference {
        /// Qualified name of the referenced type, `None` for any type
        target: Option<String>,
    },
}

impl ElementKind {
    /// Binary width of one element
    pub fn width(&self) -> u64 {
        match self {
            ElementKind::Primitive(kind) => kind.width(),
            ElementKind::Reference { .. } => REFERENCE_WIDTH,
        }
    }

    /// True if `value` can be stored as an element of this kind
    pub fn accepts<R>(&self, value: &Value<R>) -> bool {
        match self {
            ElementKind::Primitive(kind) => value.primitive_kind() == Some(*kind),
            ElementKind::Reference { .. } => matches!(value, Value::Ref(_)),
        }
    }

    fn token(&self) -> String {
        match self {
            ElementKind::Primitive(kind) => kind.name().to_string(),
            ElementKind::Reference { target: None } => "ref".to_string(),
            ElementKind::Reference { target: Some(t) } => format!("ref<{}>", t),
        }
    }

    fn parse_token(token: &str) -> Option<Self> {
        if let Some(kind) = PrimitiveKind::from_name(token) {
            return Some(ElementKind::Primitive(kind));
        }
        parse_reference_token(token, "ref").map(|target| ElementKind::Reference { target })
    }
}

/// Kind of one pseudo-field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Fixed-width primitive
    Primitive(PrimitiveKind),
    /// Object reference stored as an 8-byte object id
    Reference {
        /// Qualified name of the referenced type, `None` for any type
        target: Option<String>,
        /// Lazy references are not followed when loading
        lazy: bool,
    },
    /// Sized array in the variable-length tail
    Array(ElementKind),
    /// UTF-8 text in the variable-length tail
    Text,
}

impl FieldKind {
    /// Untyped eager reference
    pub fn reference() -> Self {
        FieldKind::Reference {
            target: None,
            lazy: false,
        }
    }

    /// Width inside the fixed block, `None` for tail fields
    pub fn fixed_width(&self) -> Option<u64> {
        match self {
            FieldKind::Primitive(kind) => Some(kind.width()),
            FieldKind::Reference { .. } => Some(REFERENCE_WIDTH),
            FieldKind::Array(_) | FieldKind::Text => None,
        }
    }

    /// True for tail fields
    pub fn is_variable(&self) -> bool {
        self.fixed_width().is_none()
    }

    /// True if the field holds object references
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            FieldKind::Reference { .. }
                | FieldKind::Array(ElementKind::Reference { .. })
        )
    }

    /// True for lazy references
    pub fn is_lazy(&self) -> bool {
        matches!(self, FieldKind::Reference { lazy: true, .. })
    }

    /// Referenced type name, for typed references
    pub fn target(&self) -> Option<&str> {
        match self {
            FieldKind::Reference { target, .. } => target.as_deref(),
            FieldKind::Array(ElementKind::Reference { target }) => target.as_deref(),
            _ => None,
        }
    }

    /// The length column of the type dictionary
    ///
    /// Fixed width for fixed fields, element width for arrays, 1 for text.
    pub fn dictionary_length(&self) -> u64 {
        match self {
            FieldKind::Array(element) => element.width(),
            FieldKind::Text => 1,
            other => other.fixed_width().unwrap_or(0),
        }
    }

    /// True if `value` is a valid state for a field of this kind
    pub fn accepts<R>(&self, value: &Value<R>) -> bool {
        match self {
            FieldKind::Primitive(kind) => value.primitive_kind() == Some(*kind),
            FieldKind::Reference { .. } => matches!(value, Value::Ref(_)),
            FieldKind::Array(element) => match value {
                Value::Array(items) => items.iter().all(|item| element.accepts(item)),
                _ => false,
            },
            FieldKind::Text => matches!(value, Value::Text(_)),
        }
    }

    /// Initial state of a freshly created instance
    pub fn default_value<R>(&self) -> Value<R> {
        match self {
            FieldKind::Primitive(kind) => kind.default_value(),
            FieldKind::Reference { .. } => Value::Ref(None),
            FieldKind::Array(_) => Value::Array(Vec::new()),
            FieldKind::Text => Value::Text(String::new()),
        }
    }

    /// Dictionary token for this kind
    pub fn token(&self) -> String {
        match self {
            FieldKind::Primitive(kind) => kind.name().to_string(),
            FieldKind::Reference { target, lazy } => {
                let keyword = if *lazy { "lazy" } else { "ref" };
                match target {
                    Some(t) => format!("{}<{}>", keyword, t),
                    None => keyword.to_string(),
                }
            }
            FieldKind::Array(element) => format!("[{}]", element.token()),
            FieldKind::Text => "text".to_string(),
        }
    }

    /// Parse a dictionary token
    pub fn parse_token(token: &str) -> Option<Self> {
        if token == "text" {
            return Some(FieldKind::Text);
        }
        if let Some(kind) = PrimitiveKind::from_name(token) {
            return Some(FieldKind::Primitive(kind));
        }
        if let Some(inner) = token.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
            return ElementKind::parse_token(inner).map(FieldKind::Array);
        }
        if let Some(target) = parse_reference_token(token, "ref") {
            return Some(FieldKind::Reference {
                target,
                lazy: false,
            });
        }
        parse_reference_token(token, "lazy").map(|target| FieldKind::Reference { target, lazy: true })
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

/// `ref` -> Some(None), `ref<a.B>` -> Some(Some("a.B")), anything else -> None
fn parse_reference_token(token: &str, keyword: &str) -> Option<Option<String>> {
    let rest = token.strip_prefix(keyword)?;
    if rest.is_empty() {
        return Some(None);
    }
    let target = rest.strip_prefix('<')?.strip_suffix('>')?;
    if is_valid_type_name(target) {
        Some(Some(target.to_string()))
    } else {
        None
    }
}

/// Type names: non-empty, no whitespace, none of the dictionary's structural characters
pub fn is_valid_type_name(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '{' | '}' | '[' | ']' | '<' | '>' | ','))
}

/// Field names: identifier characters only
pub fn is_valid_field_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// One named, typed slot of a persisted layout
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PseudoField {
    name: String,
    kind: FieldKind,
}

impl PseudoField {
    /// Create a pseudo-field
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Field name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field kind
    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }
}

/// Declared in-memory shape of a type
///
/// Two layouts are the same type iff name and pseudo-fields are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeLayout {
    type_name: String,
    fields: Vec<PseudoField>,
}

impl TypeLayout {
    /// Start declaring a layout
    pub fn builder(type_name: impl Into<String>) -> TypeLayoutBuilder {
        TypeLayoutBuilder {
            type_name: type_name.into(),
            fields: Vec::new(),
        }
    }

    /// Build a layout from already validated parts
    pub fn new(type_name: impl Into<String>, fields: Vec<PseudoField>) -> Result<Self> {
        let layout = Self {
            type_name: type_name.into(),
            fields,
        };
        layout.validate()?;
        Ok(layout)
    }

    /// Qualified type name
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Pseudo-fields in declaration order
    pub fn fields(&self) -> &[PseudoField] {
        &self.fields
    }

    /// Position of a field by name
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Default state for every field
    pub fn default_values<R>(&self) -> Vec<Value<R>> {
        self.fields.iter().map(|f| f.kind.default_value()).collect()
    }

    fn validate(&self) -> Result<()> {
        if !is_valid_type_name(&self.type_name) {
            return Err(Error::configuration(format!(
                "invalid type name '{}'",
                self.type_name
            )));
        }
        for (i, field) in self.fields.iter().enumerate() {
            if !is_valid_field_name(&field.name) {
                return Err(Error::configuration(format!(
                    "invalid field name '{}' in type {}",
                    field.name, self.type_name
                )));
            }
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(Error::configuration(format!(
                    "duplicate field '{}' in type {}",
                    field.name, self.type_name
                )));
            }
        }
        Ok(())
    }
}

/// Builder for [`TypeLayout`]
#[derive(Debug, Clone)]
pub struct TypeLayoutBuilder {
    type_name: String,
    fields: Vec<PseudoField>,
}

impl TypeLayoutBuilder {
    /// Add a field of any kind
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(PseudoField::new(name, kind));
        self
    }

    /// Add a primitive field
    pub fn primitive(self, name: impl Into<String>, kind: PrimitiveKind) -> Self {
        self.field(name, FieldKind::Primitive(kind))
    }

    /// Add a `bool` field
    pub fn bool(self, name: impl Into<String>) -> Self {
        self.primitive(name, PrimitiveKind::Bool)
    }

    /// Add an `int` field
    pub fn int(self, name: impl Into<String>) -> Self {
        self.primitive(name, PrimitiveKind::Int)
    }

    /// Add a `long` field
    pub fn long(self, name: impl Into<String>) -> Self {
        self.primitive(name, PrimitiveKind::Long)
    }

    /// Add a `double` field
    pub fn double(self, name: impl Into<String>) -> Self {
        self.primitive(name, PrimitiveKind::Double)
    }

    /// Add a text field
    pub fn text(self, name: impl Into<String>) -> Self {
        self.field(name, FieldKind::Text)
    }

    /// Add an untyped eager reference
    pub fn reference(self, name: impl Into<String>) -> Self {
        self.field(name, FieldKind::reference())
    }

    /// Add an eager reference to a specific type
    pub fn reference_to(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.field(
            name,
            FieldKind::Reference {
                target: Some(target.into()),
                lazy: false,
            },
        )
    }

    /// Add an untyped lazy reference
    pub fn lazy(self, name: impl Into<String>) -> Self {
        self.field(
            name,
            FieldKind::Reference {
                target: None,
                lazy: true,
            },
        )
    }

    /// Add a sized array
    pub fn array(self, name: impl Into<String>, element: ElementKind) -> Self {
        self.field(name, FieldKind::Array(element))
    }

    /// Add a sized array of primitives
    pub fn primitive_array(self, name: impl Into<String>, kind: PrimitiveKind) -> Self {
        self.array(name, ElementKind::Primitive(kind))
    }

    /// Add a sized array of untyped references
    pub fn reference_array(self, name: impl Into<String>) -> Self {
        self.array(name, ElementKind::Reference { target: None })
    }

    /// Finish and validate the declaration
    pub fn build(self) -> Result<TypeLayout> {
        TypeLayout::new(self.type_name, self.fields)
    }
}
