//! The reader contract the pipeline consumes.
//!
//! Parsing the on-disk format, decompression, and decoding all live behind
//! this boundary. The core only needs row-group metadata up front plus three
//! asynchronous fetches: the offset index and column index for a column, and
//! the decoded values of one page.

use async_trait::async_trait;

use crate::error::Result;
use crate::scalar::Scalar;

/// Row-group-level statistics for one column chunk.
#[derive(Debug, Clone)]
pub struct ColumnStatistics {
    pub min_value: Scalar,
    pub max_value: Scalar,
}

/// Metadata for one column chunk inside a row group.
#[derive(Debug, Clone)]
pub struct ColumnChunkMeta {
    /// Path segments in the schema; nested paths have more than one segment.
    pub path_in_schema: Vec<String>,
    pub statistics: Option<ColumnStatistics>,
}

impl ColumnChunkMeta {
    /// The canonical path string, segments joined by `,`.
    pub fn path(&self) -> String {
        self.path_in_schema.join(",")
    }
}

/// Metadata for one row group.
#[derive(Debug, Clone)]
pub struct RowGroupMeta {
    pub columns: Vec<ColumnChunkMeta>,
    pub num_rows: u64,
}

impl RowGroupMeta {
    /// Looks up a column chunk by its canonical path.
    pub fn column(&self, path: &str) -> Option<&ColumnChunkMeta> {
        self.columns.iter().find(|c| c.path() == path)
    }
}

/// The starting row of one page within its row group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLocation {
    pub first_row_index: u64,
}

/// Per-page starting rows for one column chunk.
///
/// Page `i` covers rows `[locations[i].first_row_index,
/// locations[i + 1].first_row_index - 1]`; the last page extends to
/// `num_rows - 1`.
#[derive(Debug, Clone)]
pub struct OffsetIndex {
    pub page_locations: Vec<PageLocation>,
}

impl OffsetIndex {
    /// Row span of page `page`, given the row group's total row count.
    /// `None` when the page ordinal is out of range.
    pub fn page_rows(&self, page: usize, num_rows: u64) -> Option<(u64, u64)> {
        let start = self.page_locations.get(page)?.first_row_index;
        let end = match self.page_locations.get(page + 1) {
            Some(next) => next.first_row_index.checked_sub(1)?,
            None => num_rows.checked_sub(1)?,
        };
        Some((start, end))
    }
}

/// Per-page min/max statistics, parallel to the offset index.
#[derive(Debug, Clone)]
pub struct ColumnIndex {
    pub min_values: Vec<Scalar>,
    pub max_values: Vec<Scalar>,
}

/// Decoded values for one page, indexed by `row - first_row_index`.
/// `None` marks a null slot.
pub type PageValues = Vec<Option<Scalar>>;

/// An open columnar file the pipeline can plan against.
///
/// Implementations are treated as immutable after open. `id` must be stable
/// and unique per open reader: it namespaces the process-wide cache, so two
/// readers sharing an id would cross-contaminate each other's indices.
#[async_trait]
pub trait Reader: Send + Sync {
    /// Stable unique identifier for cache namespacing.
    fn id(&self) -> &str;

    /// Row groups in on-disk order; their position is the ordinal used in
    /// cache keys and row ranges.
    fn row_groups(&self) -> &[RowGroupMeta];

    /// Fetches the offset index for `path` in row group `row_group`.
    async fn read_offset_index(&self, row_group: usize, path: &str) -> Result<OffsetIndex>;

    /// Fetches the column index for `path` in row group `row_group`.
    async fn read_column_index(&self, row_group: usize, path: &str) -> Result<ColumnIndex>;

    /// Fetches and decodes the values of one page.
    async fn read_page(
        &self,
        row_group: usize,
        path: &str,
        offset_index: &OffsetIndex,
        page: usize,
    ) -> Result<PageValues>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_rows_spans() {
        let index = OffsetIndex {
            page_locations: vec![
                PageLocation { first_row_index: 0 },
                PageLocation { first_row_index: 4 },
            ],
        };
        assert_eq!(index.page_rows(0, 6), Some((0, 3)));
        assert_eq!(index.page_rows(1, 6), Some((4, 5)));
        assert_eq!(index.page_rows(2, 6), None);
    }

    #[test]
    fn nested_path_joins_with_comma() {
        let column = ColumnChunkMeta {
            path_in_schema: vec!["address".into(), "city".into()],
            statistics: None,
        };
        assert_eq!(column.path(), "address,city");
    }
}
