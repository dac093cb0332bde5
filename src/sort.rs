//! Optional globally-sorted record emission.
//!
//! The stage merges across pages using page-level statistics as a priority
//! bound: repeatedly take the smallest `max_value` among not-yet-read
//! pages, materialize every page whose `min_value` fits under that bound,
//! sort the buffered rows by the sort field, and flush everything at or
//! below the bound. Memory stays proportional to the overlap window of the
//! page statistics rather than the full result set.

use std::cmp::Ordering;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};

use crate::error::Result;
use crate::load::{FieldLoader, Record};
use crate::range::RowRange;
use crate::scalar::{scalar_cmp, scalar_min, Scalar};

struct PendingPage {
    range: RowRange,
    min: Scalar,
    max: Scalar,
}

pub(crate) struct SortState {
    path: String,
    loader: Arc<FieldLoader>,
    pending: Vec<PendingPage>,
    /// Ranges whose row group lacks the sort column; they have no key and
    /// flush after everything else.
    unkeyed: Vec<RowRange>,
    buffer: Vec<(Option<Scalar>, Record)>,
}

impl SortState {
    /// Splits the surviving ranges along the sort path's pages, priming
    /// indices as needed. A deliberate barrier: sorting needs the full set
    /// of competing pages before the first flush.
    pub(crate) async fn build(
        ranges: Vec<RowRange>,
        path: String,
        loader: Arc<FieldLoader>,
    ) -> Result<SortState> {
        let mut pending = Vec::new();
        let mut unkeyed = Vec::new();
        for range in ranges {
            if range.row_group().column(&path).is_none() {
                unkeyed.push(range);
                continue;
            }
            let (_, column_index) = futures::try_join!(
                range.prime_offset_index(&path),
                range.prime_column_index(&path),
            )?;
            let first = range.find_relevant_page_index(&path, range.low())?;
            let last = range.find_relevant_page_index(&path, range.high())?;
            for page in first..=last {
                let (page_low, page_high) = range.page_row_bounds(&path, page)?;
                let low = page_low.max(range.low());
                let high = page_high.min(range.high());
                let (Some(min), Some(max)) = (
                    column_index.min_values.get(page).cloned(),
                    column_index.max_values.get(page).cloned(),
                ) else {
                    unkeyed.push(range.extend(low, high)?);
                    continue;
                };
                pending.push(PendingPage {
                    range: range.extend(low, high)?,
                    min,
                    max,
                });
            }
        }
        Ok(SortState {
            path,
            loader,
            pending,
            unkeyed,
            buffer: Vec::new(),
        })
    }

    /// One merge step: materialize the pages under the current bound and
    /// flush the buffered rows the bound proves complete.
    async fn next_batch(&mut self) -> Result<Option<Vec<Record>>> {
        if self.pending.is_empty() {
            for range in std::mem::take(&mut self.unkeyed) {
                for record in self.loader.load(range).await? {
                    self.buffer.push((None, record));
                }
            }
            if self.buffer.is_empty() {
                return Ok(None);
            }
            self.sort_buffer();
            let batch = std::mem::take(&mut self.buffer);
            return Ok(Some(batch.into_iter().map(|(_, record)| record).collect()));
        }

        let mut bound = self.pending[0].max.clone();
        for page in &self.pending[1..] {
            bound = scalar_min(bound, &page.max)?;
        }
        let mut still_pending = Vec::new();
        for page in std::mem::take(&mut self.pending) {
            if scalar_cmp(&page.min, &bound)? != Ordering::Greater {
                for keyed in self.loader.load_keyed(page.range, &self.path).await? {
                    self.buffer.push(keyed);
                }
            } else {
                still_pending.push(page);
            }
        }
        self.pending = still_pending;

        self.sort_buffer();
        let cutoff = self.buffer.partition_point(|(key, _)| match key {
            Some(key) => scalar_cmp(key, &bound).unwrap_or(Ordering::Greater) != Ordering::Greater,
            None => false,
        });
        let flushed = self
            .buffer
            .drain(..cutoff)
            .map(|(_, record)| record)
            .collect();
        Ok(Some(flushed))
    }

    fn sort_buffer(&mut self) {
        // Keys come from one column and share an encoding; rows without a
        // sort value order last.
        self.buffer.sort_by(|(a, _), (b, _)| match (a, b) {
            (Some(a), Some(b)) => scalar_cmp(a, b).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
    }
}

/// Wraps the merge loop as a lazily-driven record stream.
pub(crate) fn sorted_stream(state: SortState) -> BoxStream<'static, Result<Record>> {
    stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        match state.next_batch().await {
            Ok(Some(batch)) => Some((
                stream::iter(batch.into_iter().map(Ok)).left_stream(),
                Some(state),
            )),
            Ok(None) => None,
            Err(err) => Some((
                stream::once(futures::future::ready(Err(err))).right_stream(),
                None,
            )),
        }
    })
    .flatten()
    .boxed()
}
