//! Per-phase pipeline operators over row ranges.
//!
//! A phase compiles to an ordered list of stages. Each stage turns one
//! arriving range into zero or more narrowed ranges:
//!
//! ```text
//! Arrived -> (FastFiltered | FastPassed | Split -> (Scanned -> Matched* | Dropped))
//! ```
//!
//! Index-only phases stop at the page-index level and never read values;
//! value phases split along page boundaries and scan surviving pages row by
//! row. Composites wire child stages serially (AND) or as unioned
//! sub-pipelines (OR).

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::predicate::Predicate;
use crate::range::RowRange;

mod compose;
mod index;
mod value;

pub(crate) use compose::{AndStage, OrStage};
pub(crate) use index::IndexStage;
pub(crate) use value::{ScanStage, SplitStage};

/// One pipeline operator. `apply` consumes an arriving range and produces
/// the narrowed ranges it survives as, in non-decreasing `low` order.
#[async_trait]
pub(crate) trait Stage: Send + Sync {
    async fn apply(&self, range: RowRange) -> Result<Vec<RowRange>>;
}

/// Compiles one phase predicate into its stage list.
pub(crate) fn compile_phase(predicate: &Predicate) -> Vec<Arc<dyn Stage>> {
    match predicate {
        Predicate::Value { path, index_only, .. } | Predicate::Range { path, index_only, .. } => {
            if *index_only {
                vec![Arc::new(IndexStage::new(path.clone(), predicate.clone()))]
            } else {
                vec![
                    Arc::new(SplitStage::new(path.clone(), predicate.clone())),
                    Arc::new(ScanStage::new(path.clone(), predicate.clone())),
                ]
            }
        }
        Predicate::And(children) => vec![Arc::new(AndStage::new(predicate.clone(), children))],
        Predicate::Or(children) => vec![Arc::new(OrStage::new(predicate.clone(), children))],
        // Load-only nodes match every row; the phase is a pass-through.
        Predicate::Path { .. } => Vec::new(),
    }
}

/// Feeds one range through a stage list serially, fanning intermediate
/// outputs into the next stage.
pub(crate) async fn apply_pipeline(
    stages: &[Arc<dyn Stage>],
    range: RowRange,
) -> Result<Vec<RowRange>> {
    let mut current = vec![range];
    for stage in stages {
        let mut next = Vec::new();
        for range in current {
            next.extend(stage.apply(range).await?);
        }
        current = next;
        if current.is_empty() {
            break;
        }
    }
    Ok(current)
}
