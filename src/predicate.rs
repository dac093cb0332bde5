//! Predicate tree evaluated against statistics and page values.
//!
//! A closed variant set; stages dispatch `fast_filter`, `fast_pass`, and the
//! two `evaluate` flavors by matching on it. The parser in [`crate::spec`]
//! is a free function constructing these variants, so composite stages can
//! reference the tree without a cycle back into parsing.

use crate::error::Result;
use crate::range::RowRange;
use crate::scalar::{Literal, Scalar};
use std::cmp::Ordering;

/// One node of a filter phase.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Equality against a constant.
    Value {
        path: String,
        literal: Literal,
        index_only: bool,
    },
    /// Inclusive range; either bound may be open.
    Range {
        path: String,
        min: Option<Literal>,
        max: Option<Literal>,
        index_only: bool,
    },
    /// Conjunction. Children are piped serially inside one phase.
    And(Vec<Predicate>),
    /// Disjunction. Children run as sub-pipelines whose outputs are unioned.
    Or(Vec<Predicate>),
    /// Field-load-only node; always matches. `source` marks a JSON blob
    /// column whose keys merge into the record.
    Path { path: String, source: bool },
}

impl Predicate {
    /// Collects every column path referenced under this node.
    pub fn paths(&self, out: &mut Vec<String>) {
        match self {
            Predicate::Value { path, .. }
            | Predicate::Range { path, .. }
            | Predicate::Path { path, .. } => {
                if !out.iter().any(|p| p == path) {
                    out.push(path.clone());
                }
            }
            Predicate::And(children) | Predicate::Or(children) => {
                for child in children {
                    child.paths(out);
                }
            }
        }
    }

    /// Statistics disproof: returns `false` iff the range's effective
    /// bounds prove no row can match. Missing bounds never disprove.
    pub fn fast_filter(&self, range: &RowRange) -> Result<bool> {
        match self {
            Predicate::Value { path, literal, .. } => {
                let (Some(row_min), Some(row_max)) =
                    (range.min_value(path), range.max_value(path))
                else {
                    return Ok(true);
                };
                Ok(literal.cmp_stat(&row_min)? != Ordering::Less
                    && literal.cmp_stat(&row_max)? != Ordering::Greater)
            }
            Predicate::Range { path, min, max, .. } => {
                if let (Some(max), Some(row_min)) = (max, range.min_value(path)) {
                    if max.cmp_stat(&row_min)? == Ordering::Less {
                        return Ok(false);
                    }
                }
                if let (Some(min), Some(row_max)) = (min, range.max_value(path)) {
                    if min.cmp_stat(&row_max)? == Ordering::Greater {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Predicate::And(children) => {
                for child in children {
                    if !child.fast_filter(range)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Predicate::Or(children) => {
                for child in children {
                    if child.fast_filter(range)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Predicate::Path { .. } => Ok(true),
        }
    }

    /// Statistics proof: returns `true` iff the range's effective bounds
    /// prove every row matches, so it can be emitted without reading pages.
    pub fn fast_pass(&self, range: &RowRange) -> Result<bool> {
        match self {
            Predicate::Value { path, literal, .. } => {
                let (Some(row_min), Some(row_max)) =
                    (range.min_value(path), range.max_value(path))
                else {
                    return Ok(false);
                };
                Ok(literal.cmp_stat(&row_min)? == Ordering::Equal
                    && literal.cmp_stat(&row_max)? == Ordering::Equal)
            }
            Predicate::Range { path, min, max, .. } => {
                let (Some(row_min), Some(row_max)) =
                    (range.min_value(path), range.max_value(path))
                else {
                    return Ok(false);
                };
                if let Some(min) = min {
                    if min.cmp_stat(&row_min)? == Ordering::Greater {
                        return Ok(false);
                    }
                }
                if let Some(max) = max {
                    if max.cmp_stat(&row_max)? == Ordering::Less {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Predicate::And(children) => {
                for child in children {
                    if !child.fast_pass(range)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Predicate::Or(children) => {
                for child in children {
                    if child.fast_pass(range)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Predicate::Path { .. } => Ok(true),
        }
    }

    /// Page-level check against one page's min/max: can the page contain a
    /// match?
    pub fn evaluate_bounds(&self, page_min: &Scalar, page_max: &Scalar) -> Result<bool> {
        match self {
            Predicate::Value { literal, .. } => Ok(literal.cmp_stat(page_min)? != Ordering::Less
                && literal.cmp_stat(page_max)? != Ordering::Greater),
            Predicate::Range { min, max, .. } => {
                if let Some(max) = max {
                    if max.cmp_stat(page_min)? == Ordering::Less {
                        return Ok(false);
                    }
                }
                if let Some(min) = min {
                    if min.cmp_stat(page_max)? == Ordering::Greater {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Predicate::And(children) => {
                for child in children {
                    if !child.evaluate_bounds(page_min, page_max)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Predicate::Or(children) => {
                for child in children {
                    if child.evaluate_bounds(page_min, page_max)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Predicate::Path { .. } => Ok(true),
        }
    }

    /// Row-level check against an actual value. A null slot never matches a
    /// value or range predicate.
    pub fn evaluate_value(&self, value: Option<&Scalar>) -> Result<bool> {
        match self {
            Predicate::Value { literal, .. } => match value {
                Some(value) => literal.matches(value),
                None => Ok(false),
            },
            Predicate::Range { min, max, .. } => {
                let Some(value) = value else {
                    return Ok(false);
                };
                if let Some(min) = min {
                    if min.cmp_stat(value)? == Ordering::Greater {
                        return Ok(false);
                    }
                }
                if let Some(max) = max {
                    if max.cmp_stat(value)? == Ordering::Less {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Predicate::And(children) => {
                for child in children {
                    if !child.evaluate_value(value)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Predicate::Or(children) => {
                for child in children {
                    if child.evaluate_value(value)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Predicate::Path { .. } => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range_pred(min: Option<i64>, max: Option<i64>) -> Predicate {
        Predicate::Range {
            path: "quantity".into(),
            min: min.map(|v| Literal::new(Scalar::Int(v))),
            max: max.map(|v| Literal::new(Scalar::Int(v))),
            index_only: false,
        }
    }

    #[test]
    fn bounds_evaluation_is_inclusive() {
        let pred = range_pred(Some(18), Some(20));
        assert!(pred.evaluate_bounds(&Scalar::Int(20), &Scalar::Int(30)).unwrap());
        assert!(pred.evaluate_bounds(&Scalar::Int(10), &Scalar::Int(18)).unwrap());
        assert!(!pred.evaluate_bounds(&Scalar::Int(21), &Scalar::Int(30)).unwrap());
        assert!(!pred.evaluate_bounds(&Scalar::Int(10), &Scalar::Int(17)).unwrap());
    }

    #[test]
    fn open_bounds_never_exclude_on_that_side() {
        let pred = range_pred(Some(18), None);
        assert!(pred.evaluate_bounds(&Scalar::Int(100), &Scalar::Int(200)).unwrap());
        assert!(!pred.evaluate_bounds(&Scalar::Int(1), &Scalar::Int(17)).unwrap());
    }

    #[test]
    fn value_evaluation_rejects_nulls() {
        let pred = Predicate::Value {
            path: "quantity".into(),
            literal: Literal::new(Scalar::Int(25)),
            index_only: false,
        };
        assert!(pred.evaluate_value(Some(&Scalar::Int(25))).unwrap());
        assert!(!pred.evaluate_value(Some(&Scalar::Int(26))).unwrap());
        assert!(!pred.evaluate_value(None).unwrap());
    }

    #[test]
    fn composite_evaluation_folds_children() {
        let and = Predicate::And(vec![range_pred(Some(10), None), range_pred(None, Some(20))]);
        assert!(and.evaluate_value(Some(&Scalar::Int(15))).unwrap());
        assert!(!and.evaluate_value(Some(&Scalar::Int(25))).unwrap());

        let or = Predicate::Or(vec![range_pred(None, Some(5)), range_pred(Some(20), None)]);
        assert!(or.evaluate_value(Some(&Scalar::Int(3))).unwrap());
        assert!(or.evaluate_value(Some(&Scalar::Int(25))).unwrap());
        assert!(!or.evaluate_value(Some(&Scalar::Int(10))).unwrap());
    }

    #[test]
    fn path_nodes_always_match() {
        let pred = Predicate::Path {
            path: "name".into(),
            source: false,
        };
        assert!(pred.evaluate_value(None).unwrap());
        assert!(pred.evaluate_bounds(&Scalar::Int(0), &Scalar::Int(0)).unwrap());
    }
}
