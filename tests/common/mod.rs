//! In-memory reader fixture with read counters.
#![allow(dead_code)]

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use async_trait::async_trait;
use weir::{
    ColumnChunkMeta, ColumnIndex, ColumnStatistics, Error, OffsetIndex, PageLocation, PageValues,
    Reader, Result, RowGroupMeta, Scalar,
};

#[derive(Default)]
pub struct Counters {
    pub offset_index_reads: AtomicUsize,
    pub column_index_reads: AtomicUsize,
    pub page_reads: AtomicUsize,
}

impl Counters {
    pub fn offset(&self) -> usize {
        self.offset_index_reads.load(AtomicOrdering::SeqCst)
    }

    pub fn column(&self) -> usize {
        self.column_index_reads.load(AtomicOrdering::SeqCst)
    }

    pub fn pages(&self) -> usize {
        self.page_reads.load(AtomicOrdering::SeqCst)
    }
}

pub struct ColumnFixture {
    path: String,
    page_starts: Vec<u64>,
    values: Vec<Option<Scalar>>,
}

impl ColumnFixture {
    pub fn new(path: &str, page_starts: Vec<u64>, values: Vec<Option<Scalar>>) -> Self {
        assert!(!page_starts.is_empty() && page_starts[0] == 0);
        Self {
            path: path.to_string(),
            page_starts,
            values,
        }
    }

    fn page_span(&self, page: usize) -> (usize, usize) {
        let start = self.page_starts[page] as usize;
        let end = self
            .page_starts
            .get(page + 1)
            .map(|s| *s as usize)
            .unwrap_or(self.values.len());
        (start, end)
    }

    fn stats(&self) -> Option<ColumnStatistics> {
        let (min, max) = value_extrema(&self.values)?;
        Some(ColumnStatistics {
            min_value: min,
            max_value: max,
        })
    }
}

pub struct TestReader {
    id: String,
    groups: Vec<RowGroupMeta>,
    columns: Vec<HashMap<String, ColumnFixture>>,
    pub counters: Arc<Counters>,
    pub fail_pages: bool,
}

impl TestReader {
    pub fn new(id: &str, group_fixtures: Vec<Vec<ColumnFixture>>) -> Arc<TestReader> {
        Arc::new(Self::build(id, group_fixtures))
    }

    pub fn build(id: &str, group_fixtures: Vec<Vec<ColumnFixture>>) -> TestReader {
        let mut groups = Vec::new();
        let mut columns = Vec::new();
        for fixtures in group_fixtures {
            let num_rows = fixtures[0].values.len() as u64;
            let metas = fixtures
                .iter()
                .map(|f| {
                    assert_eq!(f.values.len() as u64, num_rows, "ragged fixture");
                    ColumnChunkMeta {
                        path_in_schema: f.path.split(',').map(str::to_string).collect(),
                        statistics: f.stats(),
                    }
                })
                .collect();
            groups.push(RowGroupMeta {
                columns: metas,
                num_rows,
            });
            columns.push(fixtures.into_iter().map(|f| (f.path.clone(), f)).collect());
        }
        TestReader {
            id: id.to_string(),
            groups,
            columns,
            counters: Arc::new(Counters::default()),
            fail_pages: false,
        }
    }

    fn column(&self, row_group: usize, path: &str) -> Result<&ColumnFixture> {
        self.columns
            .get(row_group)
            .and_then(|group| group.get(path))
            .ok_or_else(|| Error::reader_msg(format!("no column '{path}' in group {row_group}")))
    }
}

#[async_trait]
impl Reader for TestReader {
    fn id(&self) -> &str {
        &self.id
    }

    fn row_groups(&self) -> &[RowGroupMeta] {
        &self.groups
    }

    async fn read_offset_index(&self, row_group: usize, path: &str) -> Result<OffsetIndex> {
        self.counters
            .offset_index_reads
            .fetch_add(1, AtomicOrdering::SeqCst);
        let column = self.column(row_group, path)?;
        Ok(OffsetIndex {
            page_locations: column
                .page_starts
                .iter()
                .map(|first| PageLocation {
                    first_row_index: *first,
                })
                .collect(),
        })
    }

    async fn read_column_index(&self, row_group: usize, path: &str) -> Result<ColumnIndex> {
        self.counters
            .column_index_reads
            .fetch_add(1, AtomicOrdering::SeqCst);
        let column = self.column(row_group, path)?;
        let mut min_values = Vec::new();
        let mut max_values = Vec::new();
        for page in 0..column.page_starts.len() {
            let (start, end) = column.page_span(page);
            let (min, max) =
                value_extrema(&column.values[start..end]).expect("fixture page has values");
            min_values.push(min);
            max_values.push(max);
        }
        Ok(ColumnIndex {
            min_values,
            max_values,
        })
    }

    async fn read_page(
        &self,
        row_group: usize,
        path: &str,
        _offset_index: &OffsetIndex,
        page: usize,
    ) -> Result<PageValues> {
        self.counters.page_reads.fetch_add(1, AtomicOrdering::SeqCst);
        if self.fail_pages {
            return Err(Error::reader_msg("page store unavailable"));
        }
        let column = self.column(row_group, path)?;
        let (start, end) = column.page_span(page);
        Ok(column.values[start..end].to_vec())
    }
}

fn value_extrema(values: &[Option<Scalar>]) -> Option<(Scalar, Scalar)> {
    let mut extrema: Option<(Scalar, Scalar)> = None;
    for value in values.iter().flatten() {
        extrema = Some(match extrema {
            None => (value.clone(), value.clone()),
            Some((min, max)) => (
                if stat_cmp(value, &min) == Ordering::Less {
                    value.clone()
                } else {
                    min
                },
                if stat_cmp(value, &max) == Ordering::Greater {
                    value.clone()
                } else {
                    max
                },
            ),
        });
    }
    extrema
}

fn stat_cmp(a: &Scalar, b: &Scalar) -> Ordering {
    match (a, b) {
        (Scalar::Int(a), Scalar::Int(b)) => a.cmp(b),
        (Scalar::Str(a), Scalar::Str(b)) => a.cmp(b),
        (Scalar::Float(a), Scalar::Float(b)) => a.partial_cmp(b).expect("fixture floats"),
        _ => panic!("mixed-encoding fixture column"),
    }
}

pub fn ints(values: &[i64]) -> Vec<Option<Scalar>> {
    values.iter().map(|v| Some(Scalar::Int(*v))).collect()
}

pub fn strs(values: &[&str]) -> Vec<Option<Scalar>> {
    values.iter().map(|v| Some(Scalar::Str((*v).into()))).collect()
}

/// The two-row-group fixture the end-to-end scenarios run against.
///
/// Group 0 (6 rows): `quantity` pages start at [0, 4] with values
/// [20, 25, 30, 22 | 29, 25]; `name` is a single page. Group 1 (5 rows):
/// `quantity` pages start at [0, 1, 3] with values [20 | 15, 17 | 18, 30].
/// `payload` holds one-key JSON blobs for source-column tests.
pub fn fixture_reader(id: &str) -> Arc<TestReader> {
    TestReader::new(id, fixture_groups())
}

/// Same fixture, but every page read fails.
pub fn failing_fixture_reader(id: &str) -> Arc<TestReader> {
    let mut reader = TestReader::build(id, fixture_groups());
    reader.fail_pages = true;
    Arc::new(reader)
}

fn fixture_groups() -> Vec<Vec<ColumnFixture>> {
    vec![
            vec![
                ColumnFixture::new("quantity", vec![0, 4], ints(&[20, 25, 30, 22, 29, 25])),
                ColumnFixture::new(
                    "name",
                    vec![0],
                    strs(&["amy", "dallas", "kim", "noel", "pat", "miles"]),
                ),
                ColumnFixture::new(
                    "payload",
                    vec![0],
                    strs(&[
                        r#"{"tier":"a"}"#,
                        r#"{"tier":"b"}"#,
                        r#"{"tier":"c"}"#,
                        r#"{"tier":"d"}"#,
                        r#"{"tier":"e"}"#,
                        r#"{"tier":"f"}"#,
                    ]),
                ),
            ],
            vec![
                ColumnFixture::new("quantity", vec![0, 1, 3], ints(&[20, 15, 17, 18, 30])),
                ColumnFixture::new(
                    "name",
                    vec![0],
                    strs(&["quinn", "rosa", "sam", "tina", "uma"]),
                ),
                ColumnFixture::new(
                    "payload",
                    vec![0],
                    strs(&[
                        r#"{"tier":"g"}"#,
                        r#"{"tier":"h"}"#,
                        r#"{"tier":"i"}"#,
                        r#"{"tier":"j"}"#,
                        r#"{"tier":"k"}"#,
                    ]),
                ),
            ],
        ]
}
