//! AND / OR composition of filter stages.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use roaring::RoaringBitmap;

use crate::error::{Error, Result};
use crate::predicate::Predicate;
use crate::range::RowRange;
use crate::stage::{apply_pipeline, compile_phase, Stage};

/// Conjunction: the children's offset and column indices are primed in
/// parallel on arrival, then the children's stage lists run serially, each
/// child narrowing what the previous one emitted.
pub(crate) struct AndStage {
    predicate: Predicate,
    stages: Vec<Arc<dyn Stage>>,
    prime_paths: Vec<String>,
}

impl AndStage {
    pub(crate) fn new(predicate: Predicate, children: &[Predicate]) -> Self {
        let mut prime_paths = Vec::new();
        let mut stages = Vec::new();
        for child in children {
            child.paths(&mut prime_paths);
            stages.extend(compile_phase(child));
        }
        Self {
            predicate,
            stages,
            prime_paths,
        }
    }
}

#[async_trait]
impl Stage for AndStage {
    async fn apply(&self, range: RowRange) -> Result<Vec<RowRange>> {
        if !self.predicate.fast_filter(&range)? {
            return Ok(Vec::new());
        }
        prime_all(&range, &self.prime_paths).await?;
        apply_pipeline(&self.stages, range).await
    }
}

/// Disjunction: each child runs as an independent sub-pipeline over the
/// same input, and their emissions are unioned over the row-index domain.
///
/// A bitmap of already-claimed positions (relative to the input range)
/// guarantees each row is emitted at most once per input; the first child
/// to emit a row wins. The merged output is ordered by `low` so lineage
/// ordering survives the union.
pub(crate) struct OrStage {
    predicate: Predicate,
    children: Vec<Vec<Arc<dyn Stage>>>,
}

impl OrStage {
    pub(crate) fn new(predicate: Predicate, children: &[Predicate]) -> Self {
        Self {
            predicate,
            children: children.iter().map(|c| compile_phase(c)).collect(),
        }
    }
}

#[async_trait]
impl Stage for OrStage {
    async fn apply(&self, range: RowRange) -> Result<Vec<RowRange>> {
        if !self.predicate.fast_filter(&range)? {
            return Ok(Vec::new());
        }
        let width = range.high() - range.low() + 1;
        if width > u64::from(u32::MAX) {
            return Err(Error::invariant(format!(
                "row range of {width} rows exceeds the claim bitmap domain"
            )));
        }

        let base = range.low();
        let mut claimed = RoaringBitmap::new();
        let mut out: Vec<RowRange> = Vec::new();
        for child in &self.children {
            for emitted in apply_pipeline(child, range.clone()).await? {
                let rel_low = (emitted.low() - base) as u32;
                let rel_high = (emitted.high() - base) as u32;
                let mut fresh = RoaringBitmap::new();
                fresh.insert_range(rel_low..=rel_high);
                fresh -= &claimed;
                claimed.insert_range(rel_low..=rel_high);
                for (sub_low, sub_high) in contiguous_runs(&fresh) {
                    let low = base + u64::from(sub_low);
                    let high = base + u64::from(sub_high);
                    if low == emitted.low() && high == emitted.high() {
                        out.push(emitted.clone());
                    } else {
                        out.push(emitted.extend(low, high)?);
                    }
                }
            }
        }
        out.sort_by_key(RowRange::low);
        Ok(out)
    }
}

/// Decomposes a bitmap into its maximal contiguous runs.
fn contiguous_runs(bitmap: &RoaringBitmap) -> Vec<(u32, u32)> {
    let mut runs = Vec::new();
    let mut current: Option<(u32, u32)> = None;
    for bit in bitmap {
        current = Some(match current {
            Some((start, end)) if end + 1 == bit => (start, bit),
            Some(done) => {
                runs.push(done);
                (bit, bit)
            }
            None => (bit, bit),
        });
    }
    if let Some(done) = current {
        runs.push(done);
    }
    runs
}

/// Primes offset and column indices for every path, concurrently.
pub(crate) async fn prime_all(range: &RowRange, paths: &[String]) -> Result<()> {
    let present: Vec<&String> = paths
        .iter()
        .filter(|path| range.row_group().column(path).is_some())
        .collect();
    futures::try_join!(
        try_join_all(present.iter().map(|path| range.prime_offset_index(path))),
        try_join_all(present.iter().map(|path| range.prime_column_index(path))),
    )?;
    Ok(())
}
