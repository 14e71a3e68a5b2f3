//! Type dictionary text format
//!
//! The dictionary is the human-readable, persisted list of every type
//! description of a storage. One stanza per type:
//!
//! ```text
//! 1000001 app.Node
//! {
//!     long       value     8
//!     ref<app.Node> next   8
//!     [int]      samples   4
//!     text       label     1
//! }
//! ```
//!
//! Each field line is `kind name length`, where length is the fixed width,
//! the element width for arrays, or 1 for text. Parsing is token based, so
//! line breaks and indentation are free; `//` starts a comment running to the
//! end of the line.
//!
//! [`assemble`] writes descriptions in type id order, [`parse`] is its exact
//! inverse.

use crate::description::TypeDescription;
use crate::layout::{is_valid_type_name, FieldKind, PseudoField, TypeLayout};
use rustc_hash::FxHashSet;
use std::fmt::Write;
use std::sync::Arc;
use tessera_core::{Error, Result, TypeId};

/// Render descriptions as dictionary text
pub fn assemble<'a, I>(descriptions: I) -> String
where
    I: IntoIterator<Item = &'a TypeDescription>,
{
    let mut sorted: Vec<&TypeDescription> = descriptions.into_iter().collect();
    sorted.sort_by_key(|d| d.type_id());

    let mut out = String::new();
    for desc in sorted {
        let kind_width = desc
            .fields()
            .iter()
            .map(|f| f.kind().token().len())
            .max()
            .unwrap_or(0);
        let name_width = desc.fields().iter().map(|f| f.name().len()).max().unwrap_or(0);

        // Writing into a String cannot fail
        let _ = writeln!(out, "{} {}", desc.type_id(), desc.type_name());
        out.push_str("{\n");
        for field in desc.fields() {
            let _ = writeln!(
                out,
                "\t{:<kw$} {:<nw$} {}",
                field.kind().token(),
                field.name(),
                field.kind().dictionary_length(),
                kw = kind_width,
                nw = name_width,
            );
        }
        out.push_str("}\n\n");
    }
    out
}

/// Render shared descriptions, as returned by the registry
pub fn assemble_shared(descriptions: &[Arc<TypeDescription>]) -> String {
    assemble(descriptions.iter().map(|d| d.as_ref()))
}

/// Parse dictionary text into descriptions, in text order
///
/// Fails on malformed text, duplicate type ids, duplicate fields, a length
/// column that disagrees with the field kind, and typed references to types
/// the dictionary does not declare.
pub fn parse(text: &str) -> Result<Vec<TypeDescription>> {
    let mut tokens = Tokens::new(text);
    let mut descriptions = Vec::new();
    let mut seen_ids = FxHashSet::default();
    let mut declared: FxHashSet<String> = FxHashSet::default();
    let mut pending_targets: Vec<(String, String)> = Vec::new();

    while let Some((line, token)) = tokens.next_token() {
        let type_id = token
            .parse::<u64>()
            .ok()
            .filter(|id| *id > 0)
            .map(TypeId::new)
            .ok_or_else(|| parse_error(line, format!("expected type id, found '{}'", token)))?;
        if !seen_ids.insert(type_id) {
            return Err(parse_error(line, format!("duplicate type id {}", type_id)));
        }

        let (line, type_name) = tokens.expect("type name")?;
        if !is_valid_type_name(type_name) {
            return Err(parse_error(line, format!("invalid type name '{}'", type_name)));
        }
        declared.insert(type_name.to_string());
        tokens.expect_exact("{")?;

        let mut fields = Vec::new();
        loop {
            let (line, token) = tokens.expect("field kind or '}'")?;
            if token == "}" {
                break;
            }
            let kind = FieldKind::parse_token(token)
                .ok_or_else(|| parse_error(line, format!("unknown field kind '{}'", token)))?;
            let (_, name) = tokens.expect("field name")?;
            let (length_line, length) = tokens.expect("field length")?;
            let length = length.parse::<u64>().map_err(|_| {
                parse_error(length_line, format!("invalid field length '{}'", length))
            })?;
            if length != kind.dictionary_length() {
                return Err(parse_error(
                    length_line,
                    format!(
                        "field {}.{} of kind {} must have length {}, found {}",
                        type_name,
                        name,
                        kind,
                        kind.dictionary_length(),
                        length
                    ),
                ));
            }
            if let Some(target) = kind.target() {
                pending_targets.push((target.to_string(), format!("{}.{}", type_name, name)));
            }
            fields.push(PseudoField::new(name, kind));
        }

        let layout = TypeLayout::new(type_name, fields).map_err(|e| match e {
            Error::Configuration(message) => parse_error(line, message),
            other => other,
        })?;
        descriptions.push(TypeDescription::new(type_id, layout)?);
    }

    for (target, referenced_by) in pending_targets {
        if !declared.contains(&target) {
            return Err(Error::UnresolvableType {
                type_name: target,
                referenced_by,
            });
        }
    }
    Ok(descriptions)
}

fn parse_error(line: usize, message: impl Into<String>) -> Error {
    Error::DictionaryParse {
        line,
        message: message.into(),
    }
}

/// Whitespace separated tokens with 1-based line numbers
///
/// Braces are always tokens of their own.
struct Tokens<'a> {
    tokens: std::vec::IntoIter<(usize, &'a str)>,
    last_line: usize,
}

impl<'a> Tokens<'a> {
    fn new(text: &'a str) -> Self {
        let mut tokens = Vec::new();
        for (index, raw_line) in text.lines().enumerate() {
            let line = index + 1;
            let content = match raw_line.find("//") {
                Some(pos) => &raw_line[..pos],
                None => raw_line,
            };
            for word in content.split_whitespace() {
                let mut rest = word;
                while !rest.is_empty() {
                    match rest.find(['{', '}']) {
                        Some(0) => {
                            tokens.push((line, &rest[..1]));
                            rest = &rest[1..];
                        }
                        Some(pos) => {
                            tokens.push((line, &rest[..pos]));
                            rest = &rest[pos..];
                        }
                        None => {
                            tokens.push((line, rest));
                            rest = "";
                        }
                    }
                }
            }
        }
        let last_line = text.lines().count().max(1);
        Self {
            tokens: tokens.into_iter(),
            last_line,
        }
    }

    fn next_token(&mut self) -> Option<(usize, &'a str)> {
        self.tokens.next()
    }

    fn expect(&mut self, what: &str) -> Result<(usize, &'a str)> {
        self.next_token().ok_or_else(|| {
            parse_error(
                self.last_line,
                format!("unexpected end of dictionary, expected {}", what),
            )
        })
    }

    fn expect_exact(&mut self, token: &str) -> Result<()> {
        let (line, found) = self.expect(token)?;
        if found == token {
            Ok(())
        } else {
            Err(parse_error(
                line,
                format!("expected '{}', found '{}'", token, found),
            ))
        }
    }
}
