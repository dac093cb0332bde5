//! Value filter stage: page split followed by a row-by-row scan.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::predicate::Predicate;
use crate::range::RowRange;
use crate::scalar::{scalar_max, scalar_min, Scalar};
use crate::stage::Stage;

/// First half of a value phase. Drops statistics-disproven ranges, passes
/// statistics-proven ones through untouched, and splits everything else
/// into one range per page it touches, carrying that page's column-index
/// bounds as tightened bounds.
pub(crate) struct SplitStage {
    path: String,
    predicate: Predicate,
}

impl SplitStage {
    pub(crate) fn new(path: String, predicate: Predicate) -> Self {
        Self { path, predicate }
    }
}

#[async_trait]
impl Stage for SplitStage {
    async fn apply(&self, range: RowRange) -> Result<Vec<RowRange>> {
        if range.row_group().column(&self.path).is_none() {
            return Ok(Vec::new());
        }
        if !self.predicate.fast_filter(&range)? {
            return Ok(Vec::new());
        }
        if self.predicate.fast_pass(&range)? {
            return Ok(vec![range]);
        }

        let (_, column_index) = futures::try_join!(
            range.prime_offset_index(&self.path),
            range.prime_column_index(&self.path),
        )?;

        let first = range.find_relevant_page_index(&self.path, range.low())?;
        let last = range.find_relevant_page_index(&self.path, range.high())?;
        if first == last {
            // Already single-page; record the page's bounds so the scan
            // stage can fast-pass or fast-filter on them.
            return Ok(vec![self.page_range(&range, &column_index, first)?]);
        }

        let mut out = Vec::with_capacity(last - first + 1);
        for page in first..=last {
            out.push(self.page_range(&range, &column_index, page)?);
        }
        Ok(out)
    }
}

impl SplitStage {
    fn page_range(
        &self,
        range: &RowRange,
        column_index: &crate::reader::ColumnIndex,
        page: usize,
    ) -> Result<RowRange> {
        let (first_row, last_row) = range.page_row_bounds(&self.path, page)?;
        let low = first_row.max(range.low());
        let high = last_row.min(range.high());
        match (
            column_index.min_values.get(page),
            column_index.max_values.get(page),
        ) {
            (Some(page_min), Some(page_max)) => range.extend_with_bounds(
                low,
                high,
                &self.path,
                page_min.clone(),
                page_max.clone(),
            ),
            _ => range.extend(low, high),
        }
    }
}

/// Second half of a value phase. The input is a single-page range; the
/// stage fast-passes or drops it on its tightened bounds, otherwise reads
/// the page and emits contiguous runs of matching rows, each carrying the
/// run's value extrema as tightened bounds.
pub(crate) struct ScanStage {
    path: String,
    predicate: Predicate,
}

impl ScanStage {
    pub(crate) fn new(path: String, predicate: Predicate) -> Self {
        Self { path, predicate }
    }
}

struct Run {
    first_row: u64,
    last_row: u64,
    low: Scalar,
    high: Scalar,
}

#[async_trait]
impl Stage for ScanStage {
    async fn apply(&self, range: RowRange) -> Result<Vec<RowRange>> {
        if range.row_group().column(&self.path).is_none() {
            return Ok(Vec::new());
        }
        if !self.predicate.fast_filter(&range)? {
            return Ok(Vec::new());
        }
        if self.predicate.fast_pass(&range)? {
            return Ok(vec![range]);
        }

        range.prime_offset_index(&self.path).await?;
        let page = range.find_relevant_page_index(&self.path, range.low())?;
        if range.find_relevant_page_index(&self.path, range.high())? != page {
            return Err(Error::invariant(format!(
                "scan-stage range {range:?} spans a page boundary of '{}'",
                self.path
            )));
        }
        let (first_row, _) = range.page_row_bounds(&self.path, page)?;
        let values = range.page_data(&self.path, page).await?;

        let mut out = Vec::new();
        let mut run: Option<Run> = None;
        for row in range.low()..=range.high() {
            let slot = values
                .get((row - first_row) as usize)
                .ok_or_else(|| {
                    Error::invariant(format!(
                        "page {page} of '{}' shorter than its row span",
                        self.path
                    ))
                })?
                .as_ref();
            if self.predicate.evaluate_value(slot)? {
                // Nulls never match a value or range predicate.
                let value = slot.ok_or_else(|| {
                    Error::invariant("null slot matched a value predicate")
                })?;
                run = Some(match run {
                    None => Run {
                        first_row: row,
                        last_row: row,
                        low: value.clone(),
                        high: value.clone(),
                    },
                    Some(run) => Run {
                        first_row: run.first_row,
                        last_row: row,
                        low: scalar_min(run.low, value)?,
                        high: scalar_max(run.high, value)?,
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

impl ScanStage {
    fn flush(&self, range: &RowRange, run: Run) -> Result<RowRange> {
        range.extend_with_bounds(run.first_row, run.last_row, &self.path, run.low, run.high)
    }
}
