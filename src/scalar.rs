//! Scalar value model shared by statistics, page values, and predicates.
//!
//! Column statistics arrive already decoded from the reader, either in a
//! numeric encoding or as strings. Predicates therefore keep their constant
//! in both forms and compare in whichever encoding the statistic uses; the
//! two encodings never mix inside one comparison.

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;

use crate::error::{Error, Result};

/// A decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    /// Whether this scalar carries a numeric encoding.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Scalar::Int(_) | Scalar::Float(_))
    }

    /// Numeric view, when the encoding allows one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(v) => Some(*v as f64),
            Scalar::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Converts a JSON value into a scalar. `Null` has no scalar form.
    pub fn from_json(value: &Value) -> Option<Scalar> {
        match value {
            Value::Bool(b) => Some(Scalar::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Scalar::Int(i))
                } else {
                    n.as_f64().map(Scalar::Float)
                }
            }
            Value::String(s) => Some(Scalar::Str(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(v) => write!(f, "{v}"),
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v}"),
            Scalar::Str(v) => write!(f, "{v}"),
        }
    }
}

impl From<Scalar> for Value {
    fn from(scalar: Scalar) -> Value {
        match scalar {
            Scalar::Bool(v) => Value::Bool(v),
            Scalar::Int(v) => Value::from(v),
            Scalar::Float(v) => Value::from(v),
            Scalar::Str(v) => Value::String(v),
        }
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Str(v.to_string())
    }
}

/// A predicate-side constant, kept in both its typed and stringified forms.
///
/// Comparison happens in the encoding of the statistic it is compared
/// against: a numeric literal against a string statistic falls back to the
/// string form, while a string literal against a numeric statistic has no
/// meaningful order and is rejected as an invariant violation.
#[derive(Debug, Clone, PartialEq)]
pub struct Literal {
    scalar: Scalar,
    text: String,
}

impl Literal {
    pub fn new(scalar: Scalar) -> Self {
        let text = scalar.to_string();
        Self { scalar, text }
    }

    /// Parses a literal out of a filter-spec JSON value.
    pub fn from_json(value: &Value) -> Result<Self> {
        Scalar::from_json(value)
            .map(Literal::new)
            .ok_or_else(|| Error::spec(format!("literal must be a scalar, got {value}")))
    }

    pub fn scalar(&self) -> &Scalar {
        &self.scalar
    }

    /// Orders this literal against a column statistic, in the statistic's
    /// encoding.
    pub fn cmp_stat(&self, stat: &Scalar) -> Result<Ordering> {
        match stat {
            Scalar::Str(s) => Ok(self.text.as_str().cmp(s.as_str())),
            Scalar::Bool(b) => match &self.scalar {
                Scalar::Bool(v) => Ok(v.cmp(b)),
                other => Err(mixed_encoding(other, stat)),
            },
            Scalar::Int(rhs) => self.cmp_numeric(*rhs as f64, stat),
            Scalar::Float(rhs) => self.cmp_numeric(*rhs, stat),
        }
    }

    fn cmp_numeric(&self, rhs: f64, stat: &Scalar) -> Result<Ordering> {
        let lhs = self
            .scalar
            .as_f64()
            .ok_or_else(|| mixed_encoding(&self.scalar, stat))?;
        lhs.partial_cmp(&rhs)
            .ok_or_else(|| Error::invariant("NaN in statistic comparison"))
    }

    /// Equality against an actual page value.
    pub fn matches(&self, value: &Scalar) -> Result<bool> {
        Ok(self.cmp_stat(value)? == Ordering::Equal)
    }
}

impl From<Scalar> for Literal {
    fn from(scalar: Scalar) -> Self {
        Literal::new(scalar)
    }
}

/// Orders two scalars of the same statistic encoding.
pub(crate) fn scalar_cmp(a: &Scalar, b: &Scalar) -> Result<Ordering> {
    Literal::new(a.clone()).cmp_stat(b)
}

/// The smaller of two same-encoding scalars.
pub(crate) fn scalar_min(a: Scalar, b: &Scalar) -> Result<Scalar> {
    Ok(if scalar_cmp(&a, b)? == Ordering::Greater {
        b.clone()
    } else {
        a
    })
}

/// The larger of two same-encoding scalars.
pub(crate) fn scalar_max(a: Scalar, b: &Scalar) -> Result<Scalar> {
    Ok(if scalar_cmp(&a, b)? == Ordering::Less {
        b.clone()
    } else {
        a
    })
}

fn mixed_encoding(literal: &Scalar, stat: &Scalar) -> Error {
    Error::invariant(format!(
        "cannot compare literal '{literal}' against statistic '{stat}': mixed encodings"
    ))
}
