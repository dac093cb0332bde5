//! The pipeline's unit of work: a contiguous row interval inside one row
//! group, carrying narrowing metadata between stages.
//!
//! Narrowing never mutates a range. Every stage derives child ranges that
//! point back at their parent and share its already-fetched offset and
//! column indices; lookups walk the parent chain, nearest override first.
//! The only interior mutation is the first write into a range's own primed
//! index tables, and concurrent primes collapse into one fetch through the
//! cache's future sharing.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::cache::{CacheKey, CacheKind, IndexCache};
use crate::error::{Error, Result};
use crate::reader::{ColumnIndex, OffsetIndex, PageValues, Reader, RowGroupMeta};
use crate::scalar::Scalar;

struct RangeInner {
    reader: Arc<dyn Reader>,
    cache: Arc<IndexCache>,
    row_group_no: usize,
    low: u64,
    high: u64,
    parent: Option<Arc<RangeInner>>,
    tightened_mins: HashMap<String, Scalar>,
    tightened_maxes: HashMap<String, Scalar>,
    offset_indexes: RwLock<HashMap<String, Arc<OffsetIndex>>>,
    column_indexes: RwLock<HashMap<String, Arc<ColumnIndex>>>,
}

/// A contiguous row interval `[low, high]` inside one row group.
///
/// Cheap to clone; clones share the same underlying state.
#[derive(Clone)]
pub struct RowRange {
    inner: Arc<RangeInner>,
}

impl std::fmt::Debug for RowRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowRange")
            .field("reader", &self.inner.reader.id())
            .field("row_group", &self.inner.row_group_no)
            .field("low", &self.inner.low)
            .field("high", &self.inner.high)
            .finish()
    }
}

impl RowRange {
    /// Root range covering a whole row group. `None` when the group is
    /// empty, since an empty interval cannot satisfy `low <= high`.
    pub(crate) fn root(
        reader: Arc<dyn Reader>,
        cache: Arc<IndexCache>,
        row_group_no: usize,
    ) -> Option<RowRange> {
        let num_rows = reader.row_groups().get(row_group_no)?.num_rows;
        if num_rows == 0 {
            return None;
        }
        Some(RowRange {
            inner: Arc::new(RangeInner {
                reader,
                cache,
                row_group_no,
                low: 0,
                high: num_rows - 1,
                parent: None,
                tightened_mins: HashMap::new(),
                tightened_maxes: HashMap::new(),
                offset_indexes: RwLock::new(HashMap::new()),
                column_indexes: RwLock::new(HashMap::new()),
            }),
        })
    }

    pub fn reader(&self) -> &Arc<dyn Reader> {
        &self.inner.reader
    }

    pub fn row_group_no(&self) -> usize {
        self.inner.row_group_no
    }

    pub fn row_group(&self) -> &RowGroupMeta {
        &self.inner.reader.row_groups()[self.inner.row_group_no]
    }

    pub fn low(&self) -> u64 {
        self.inner.low
    }

    pub fn high(&self) -> u64 {
        self.inner.high
    }

    pub fn num_rows(&self) -> u64 {
        self.row_group().num_rows
    }

    /// Effective lower bound for `path`: the nearest tightened bound on the
    /// parent chain, else the row-group statistic.
    pub fn min_value(&self, path: &str) -> Option<Scalar> {
        let mut node = Some(&self.inner);
        while let Some(inner) = node {
            if let Some(value) = inner.tightened_mins.get(path) {
                return Some(value.clone());
            }
            node = inner.parent.as_ref();
        }
        self.row_group()
            .column(path)
            .and_then(|c| c.statistics.as_ref())
            .map(|s| s.min_value.clone())
    }

    /// Effective upper bound for `path`; see [`min_value`](Self::min_value).
    pub fn max_value(&self, path: &str) -> Option<Scalar> {
        let mut node = Some(&self.inner);
        while let Some(inner) = node {
            if let Some(value) = inner.tightened_maxes.get(path) {
                return Some(value.clone());
            }
            node = inner.parent.as_ref();
        }
        self.row_group()
            .column(path)
            .and_then(|c| c.statistics.as_ref())
            .map(|s| s.max_value.clone())
    }

    /// Derives a narrowed range. Fetched indices and tightened bounds are
    /// inherited through the parent pointer.
    pub fn extend(&self, low: u64, high: u64) -> Result<RowRange> {
        self.derive(low, high, None)
    }

    /// Derives a narrowed range, recording tightened bounds for `path` in
    /// the derived range only.
    pub fn extend_with_bounds(
        &self,
        low: u64,
        high: u64,
        path: &str,
        min: Scalar,
        max: Scalar,
    ) -> Result<RowRange> {
        self.derive(low, high, Some((path, min, max)))
    }

    fn derive(
        &self,
        low: u64,
        high: u64,
        bounds: Option<(&str, Scalar, Scalar)>,
    ) -> Result<RowRange> {
        if low > high || high >= self.num_rows() {
            return Err(Error::invariant(format!(
                "derived range [{low}, {high}] outside row group of {} rows",
                self.num_rows()
            )));
        }
        // Narrowing only: inherited tightened bounds would be claimed for
        // rows the parent never covered otherwise.
        if low < self.inner.low || high > self.inner.high {
            return Err(Error::invariant(format!(
                "derived range [{low}, {high}] escapes its parent [{}, {}]",
                self.inner.low, self.inner.high
            )));
        }
        let mut tightened_mins = HashMap::new();
        let mut tightened_maxes = HashMap::new();
        if let Some((path, min, max)) = bounds {
            if crate::scalar::Literal::new(min.clone()).cmp_stat(&max)?
                == std::cmp::Ordering::Greater
            {
                return Err(Error::invariant(format!(
                    "tightened bounds for '{path}' have min '{min}' above max '{max}'"
                )));
            }
            tightened_mins.insert(path.to_string(), min);
            tightened_maxes.insert(path.to_string(), max);
        }
        Ok(RowRange {
            inner: Arc::new(RangeInner {
                reader: self.inner.reader.clone(),
                cache: self.inner.cache.clone(),
                row_group_no: self.inner.row_group_no,
                low,
                high,
                parent: Some(self.inner.clone()),
                tightened_mins,
                tightened_maxes,
                offset_indexes: RwLock::new(HashMap::new()),
                column_indexes: RwLock::new(HashMap::new()),
            }),
        })
    }

    /// Offset index for `path`, if some range on the parent chain already
    /// primed it.
    pub fn offset_index(&self, path: &str) -> Option<Arc<OffsetIndex>> {
        let mut node = Some(&self.inner);
        while let Some(inner) = node {
            if let Some(index) = inner.offset_indexes.read().get(path) {
                return Some(index.clone());
            }
            node = inner.parent.as_ref();
        }
        None
    }

    /// Column index for `path`, if already primed on the chain.
    pub fn column_index(&self, path: &str) -> Option<Arc<ColumnIndex>> {
        let mut node = Some(&self.inner);
        while let Some(inner) = node {
            if let Some(index) = inner.column_indexes.read().get(path) {
                return Some(index.clone());
            }
            node = inner.parent.as_ref();
        }
        None
    }

    /// Fetches the offset index for `path` through the cache. Idempotent.
    pub async fn prime_offset_index(&self, path: &str) -> Result<Arc<OffsetIndex>> {
        if let Some(index) = self.offset_index(path) {
            return Ok(index);
        }
        let key = CacheKey::index(
            self.inner.reader.id(),
            self.inner.row_group_no,
            CacheKind::OffsetIndex,
            path,
        );
        let reader = self.inner.reader.clone();
        let row_group = self.inner.row_group_no;
        let owned_path = path.to_string();
        let index = self
            .inner
            .cache
            .offset_index(key, async move {
                reader.read_offset_index(row_group, &owned_path).await
            })
            .await?;
        self.inner
            .offset_indexes
            .write()
            .entry(path.to_string())
            .or_insert_with(|| index.clone());
        Ok(index)
    }

    /// Fetches the column index for `path` through the cache. Idempotent.
    pub async fn prime_column_index(&self, path: &str) -> Result<Arc<ColumnIndex>> {
        if let Some(index) = self.column_index(path) {
            return Ok(index);
        }
        let key = CacheKey::index(
            self.inner.reader.id(),
            self.inner.row_group_no,
            CacheKind::ColumnIndex,
            path,
        );
        let reader = self.inner.reader.clone();
        let row_group = self.inner.row_group_no;
        let owned_path = path.to_string();
        let index = self
            .inner
            .cache
            .column_index(key, async move {
                reader.read_column_index(row_group, &owned_path).await
            })
            .await?;
        self.inner
            .column_indexes
            .write()
            .entry(path.to_string())
            .or_insert_with(|| index.clone());
        Ok(index)
    }

    /// Fetches the decoded values of one page. Short-scope: the cache only
    /// deduplicates concurrent fetches, it does not retain the page.
    pub async fn page_data(&self, path: &str, page: usize) -> Result<Arc<PageValues>> {
        let offset_index = self.prime_offset_index(path).await?;
        let key = CacheKey::page(self.inner.reader.id(), self.inner.row_group_no, path, page);
        let reader = self.inner.reader.clone();
        let row_group = self.inner.row_group_no;
        let owned_path = path.to_string();
        self.inner
            .cache
            .page(key, async move {
                reader
                    .read_page(row_group, &owned_path, &offset_index, page)
                    .await
            })
            .await
    }

    /// Binary search for the page of `path` containing `row`.
    ///
    /// Returns the page `p` with `loc[p].first_row_index <= row <
    /// loc[p + 1].first_row_index`, the last page extending to the end of
    /// the group. Requires a primed offset index.
    pub fn find_relevant_page_index(&self, path: &str, row: u64) -> Result<usize> {
        let offset_index = self
            .offset_index(path)
            .ok_or_else(|| Error::invariant(format!("offset index for '{path}' not primed")))?;
        let locations = &offset_index.page_locations;
        if locations.is_empty() {
            return Err(Error::invariant(format!("offset index for '{path}' is empty")));
        }
        let mut lo = 0usize;
        let mut hi = locations.len() - 1;
        while lo < hi {
            // Down to two candidates: take the higher when it still starts
            // at or before the row; equal starts resolve to the later page.
            if hi - lo == 1 {
                if locations[hi].first_row_index <= row {
                    lo = hi;
                }
                break;
            }
            let mid = lo + (hi - lo) / 2;
            if locations[mid].first_row_index <= row {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        Ok(lo)
    }

    /// Row span of page `page` for `path`, from a primed offset index.
    pub fn page_row_bounds(&self, path: &str, page: usize) -> Result<(u64, u64)> {
        let offset_index = self
            .offset_index(path)
            .ok_or_else(|| Error::invariant(format!("offset index for '{path}' not primed")))?;
        offset_index
            .page_rows(page, self.num_rows())
            .ok_or_else(|| Error::invariant(format!("page {page} out of range for '{path}'")))
    }
}
