//! Index-only filter stage: prunes by page statistics, never reads values.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::predicate::Predicate;
use crate::range::RowRange;
use crate::scalar::{scalar_max, scalar_min, Scalar};
use crate::stage::Stage;

/// Walks the pages an arriving range touches and flushes one derived range
/// per run of consecutive pages whose column-index entry could match.
///
/// The flushed range carries tightened bounds equal to the union of the
/// run's per-page min/max, clamped to the input interval and the run's
/// actual page rows.
pub(crate) struct IndexStage {
    path: String,
    predicate: Predicate,
}

impl IndexStage {
    pub(crate) fn new(path: String, predicate: Predicate) -> Self {
        Self { path, predicate }
    }
}

struct Run {
    first_page: usize,
    last_page: usize,
    next_low: Scalar,
    next_high: Scalar,
}

#[async_trait]
impl Stage for IndexStage {
    async fn apply(&self, range: RowRange) -> Result<Vec<RowRange>> {
        // Row-group statistics come first: a disproven range schedules no
        // index fetches at all.
        if range.row_group().column(&self.path).is_none() {
            return Ok(Vec::new());
        }
        if !self.predicate.fast_filter(&range)? {
            tracing::trace!(?range, path = %self.path, "index stage fast-filtered");
            return Ok(Vec::new());
        }

        let (_, column_index) = futures::try_join!(
            range.prime_offset_index(&self.path),
            range.prime_column_index(&self.path),
        )?;

        let first = range.find_relevant_page_index(&self.path, range.low())?;
        let last = range.find_relevant_page_index(&self.path, range.high())?;
        if column_index.min_values.len() <= last || column_index.max_values.len() <= last {
            return Err(Error::invariant(format!(
                "column index for '{}' shorter than its offset index",
                self.path
            )));
        }

        let mut out = Vec::new();
        let mut run: Option<Run> = None;
        for page in first..=last {
            let page_min = &column_index.min_values[page];
            let page_max = &column_index.max_values[page];
            if self.predicate.evaluate_bounds(page_min, page_max)? {
                run = Some(match run {
                    None => Run {
                        first_page: page,
                        last_page: page,
                        next_low: page_min.clone(),
                        next_high: page_max.clone(),
                    },
                    Some(run) => Run {
                        first_page: run.first_page,
                        last_page: page,
                        next_low: scalar_min(run.next_low, page_min)?,
                        next_high: scalar_max(run.next_high, page_max)?,
                    },
                });
            } else if let Some(done) = run.take() {
                out.push(self.flush(&range, done)?);
            }
        }
        if let Some(done) = run.take() {
            out.push(self.flush(&range, done)?);
        }
        Ok(out)
    }
}

impl IndexStage {
    fn flush(&self, range: &RowRange, run: Run) -> Result<RowRange> {
        let (first_row, _) = range.page_row_bounds(&self.path, run.first_page)?;
        let (_, last_row) = range.page_row_bounds(&self.path, run.last_page)?;
        let low = first_row.max(range.low());
        let high = last_row.min(range.high());
        range.extend_with_bounds(low, high, &self.path, run.next_low, run.next_high)
    }
}
