//! Parsing of the declarative query specification.
//!
//! The surface is a JSON document:
//!
//! ```json
//! {
//!   "filter": [ { "path": "quantity", "min": 5, "max": 18, "index": true } ],
//!   "fields": [ { "path": "quantity" }, { "path": "name" } ],
//!   "post":   [ { "type": "filter" } ]
//! }
//! ```
//!
//! `filter` is an ordered list of phases; each phase is a predicate object
//! or an array of predicate objects (implicit AND). Phases compose as a
//! pipeline, not as one conjunction: every phase sees the already-narrowed
//! ranges of the previous one, so cheap index-only phases can run ahead of
//! expensive ones. `post` declares record-level stages whose bodies are
//! host closures attached through the [`Scan`](crate::Scan) builder; a
//! `script` payload has no meaning in this embedding and is rejected.

use serde_json::Value;

use crate::error::{Error, Result};
use crate::predicate::Predicate;
use crate::scalar::Literal;

/// A column to materialize into records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub path: String,
    /// JSON blob column: parse each value and merge its keys into the
    /// record, omitting the raw field.
    pub source: bool,
}

/// Kind of a declared post stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostKind {
    Filter,
    Transform,
}

/// A parsed query specification.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub phases: Vec<Predicate>,
    pub fields: Vec<FieldSpec>,
    pub post: Vec<PostKind>,
}

impl QuerySpec {
    /// Parses a specification from its JSON form. All spec errors surface
    /// here, before any reader is touched.
    pub fn parse(spec: &Value) -> Result<Self> {
        let object = spec
            .as_object()
            .ok_or_else(|| Error::spec("query spec must be an object"))?;
        for key in object.keys() {
            if !matches!(key.as_str(), "filter" | "fields" | "post") {
                return Err(Error::spec(format!("unknown query key '{key}'")));
            }
        }

        let phases = match object.get("filter") {
            None => Vec::new(),
            Some(Value::Array(phases)) => phases
                .iter()
                .map(parse_phase)
                .collect::<Result<Vec<_>>>()?,
            Some(other) => {
                return Err(Error::spec(format!("'filter' must be an array, got {other}")))
            }
        };

        let fields = match object.get("fields") {
            None => Vec::new(),
            Some(Value::Array(fields)) => fields
                .iter()
                .map(parse_field)
                .collect::<Result<Vec<_>>>()?,
            Some(other) => {
                return Err(Error::spec(format!("'fields' must be an array, got {other}")))
            }
        };

        let post = match object.get("post") {
            None => Vec::new(),
            Some(Value::Array(stages)) => stages
                .iter()
                .map(parse_post)
                .collect::<Result<Vec<_>>>()?,
            Some(other) => {
                return Err(Error::spec(format!("'post' must be an array, got {other}")))
            }
        };

        Ok(QuerySpec {
            phases,
            fields,
            post,
        })
    }

    /// Parses a specification from JSON text.
    pub fn parse_str(spec: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(spec).map_err(|e| Error::spec(format!("invalid JSON: {e}")))?;
        Self::parse(&value)
    }

    /// Every column path the filter phases and field list reference.
    pub fn referenced_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        for phase in &self.phases {
            phase.paths(&mut paths);
        }
        for field in &self.fields {
            if !paths.iter().any(|p| p == &field.path) {
                paths.push(field.path.clone());
            }
        }
        paths
    }
}

/// One phase: a predicate object, or an array treated as an implicit AND.
fn parse_phase(phase: &Value) -> Result<Predicate> {
    match phase {
        Value::Object(_) => parse_predicate(phase),
        Value::Array(children) => {
            if children.is_empty() {
                return Err(Error::spec("a phase array must not be empty"));
            }
            if children.len() == 1 {
                return parse_predicate(&children[0]);
            }
            Ok(Predicate::And(
                children
                    .iter()
                    .map(parse_predicate)
                    .collect::<Result<Vec<_>>>()?,
            ))
        }
        other => Err(Error::spec(format!(
            "a phase must be a predicate object or array, got {other}"
        ))),
    }
}

/// Free-function predicate parser; composites reference the variant set,
/// never this module.
pub(crate) fn parse_predicate(node: &Value) -> Result<Predicate> {
    let object = node
        .as_object()
        .ok_or_else(|| Error::spec(format!("predicate must be an object, got {node}")))?;
    for key in object.keys() {
        if !matches!(
            key.as_str(),
            "path" | "value" | "min" | "max" | "and" | "or" | "index" | "source"
        ) {
            return Err(Error::spec(format!("unknown predicate key '{key}'")));
        }
    }

    let sub_tree = |key: &str| -> Result<Option<Vec<Predicate>>> {
        match object.get(key) {
            None => Ok(None),
            Some(Value::Array(children)) => {
                if children.is_empty() {
                    return Err(Error::spec(format!("'{key}' must not be empty")));
                }
                Ok(Some(
                    children
                        .iter()
                        .map(parse_predicate)
                        .collect::<Result<Vec<_>>>()?,
                ))
            }
            Some(other) => Err(Error::spec(format!("'{key}' must be an array, got {other}"))),
        }
    };

    if let Some(children) = sub_tree("and")? {
        if object.len() > 1 {
            return Err(Error::spec("'and' cannot be combined with other keys"));
        }
        return Ok(Predicate::And(children));
    }
    if let Some(children) = sub_tree("or")? {
        if object.len() > 1 {
            return Err(Error::spec("'or' cannot be combined with other keys"));
        }
        return Ok(Predicate::Or(children));
    }

    let path = object
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::spec("predicate needs a string 'path'"))?
        .to_string();
    let source = flag(object, "source")?;
    // A source column holds opaque blobs; page-index pruning over it is
    // meaningless, so the index flag is bypassed (never an error).
    let index_only = !source && flag(object, "index")?;

    let value = object.get("value");
    let min = object.get("min");
    let max = object.get("max");
    if value.is_some() && (min.is_some() || max.is_some()) {
        return Err(Error::spec(
            "'value' cannot be combined with 'min' or 'max'",
        ));
    }

    if let Some(value) = value {
        return Ok(Predicate::Value {
            path,
            literal: Literal::from_json(value)?,
            index_only,
        });
    }
    if min.is_some() || max.is_some() {
        return Ok(Predicate::Range {
            path,
            min: min.map(Literal::from_json).transpose()?,
            max: max.map(Literal::from_json).transpose()?,
            index_only,
        });
    }
    Ok(Predicate::Path { path, source })
}

fn parse_field(field: &Value) -> Result<FieldSpec> {
    let object = field
        .as_object()
        .ok_or_else(|| Error::spec(format!("field must be an object, got {field}")))?;
    for key in object.keys() {
        if !matches!(key.as_str(), "path" | "source") {
            return Err(Error::spec(format!("unknown field key '{key}'")));
        }
    }
    let path = object
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::spec("field needs a string 'path'"))?
        .to_string();
    Ok(FieldSpec {
        path,
        source: flag(object, "source")?,
    })
}

fn parse_post(stage: &Value) -> Result<PostKind> {
    let object = stage
        .as_object()
        .ok_or_else(|| Error::spec(format!("post stage must be an object, got {stage}")))?;
    for key in object.keys() {
        if !matches!(key.as_str(), "type") {
            return Err(Error::spec(format!(
                "unknown post key '{key}' (stage bodies are attached as closures)"
            )));
        }
    }
    match object.get("type").and_then(Value::as_str) {
        Some("filter") => Ok(PostKind::Filter),
        Some("transform") => Ok(PostKind::Transform),
        Some(other) => Err(Error::spec(format!("unknown post stage type '{other}'"))),
        None => Err(Error::spec("post stage needs a string 'type'")),
    }
}

fn flag(object: &serde_json::Map<String, Value>, key: &str) -> Result<bool> {
    match object.get(key) {
        None => Ok(false),
        Some(Value::Bool(flag)) => Ok(*flag),
        Some(other) => Err(Error::spec(format!("'{key}' must be a boolean, got {other}"))),
    }
}
