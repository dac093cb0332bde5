//! Predicate-driven row-range pruning and streaming over Parquet-like
//! columnar readers.
//!
//! Weir turns a declarative filter specification into the minimum set of
//! column pages that must be read. Pruning happens at three levels before
//! any value is decoded:
//!
//! 1. **Row-group statistics** — a range whose column bounds disprove the
//!    predicate is dropped without fetching anything.
//! 2. **Page indices** — per-page min/max statistics narrow a range to the
//!    runs of pages that could match.
//! 3. **Page values** — only the surviving single-page ranges are scanned
//!    row by row.
//!
//! Filter phases compose as a pipeline over [`RowRange`] streams: each
//! phase sees the already-narrowed output of the previous one, so cheap
//! index-only phases can run ahead of expensive value scans. After the
//! last phase the field loader splits ranges along page boundaries and
//! materializes records from the requested columns.
//!
//! The on-disk format stays behind the [`Reader`] contract: the core needs
//! row-group metadata plus three async fetches (offset index, column
//! index, page values) and nothing else.
//!
//! ```no_run
//! use weir::{Scan, IndexCache, ScanOptions};
//! use futures_util::StreamExt;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn run(readers: Vec<std::sync::Arc<dyn weir::Reader>>) -> weir::Result<()> {
//! let cache = Arc::new(IndexCache::default());
//! let spec = json!({
//!     "filter": [{"path": "quantity", "value": 25}],
//!     "fields": [{"path": "quantity"}, {"path": "name"}]
//! });
//!
//! let mut records = Scan::new(readers, &spec)?
//!     .with_cache(cache)
//!     .with_options(ScanOptions::builder().stage_fanout(64).build())
//!     .stream()?;
//! while let Some(record) = records.next().await {
//!     println!("{:?}", record?);
//! }
//! # Ok(())
//! # }
//! ```

mod cache;
mod error;
mod load;
mod predicate;
mod range;
mod reader;
mod scalar;
mod scan;
mod sort;
mod spec;
mod stage;
mod stream;

pub use cache::{CacheHooks, CacheKey, CacheKind, IndexCache};
pub use error::{Error, Result};
pub use load::Record;
pub use predicate::Predicate;
pub use range::RowRange;
pub use reader::{
    ColumnChunkMeta, ColumnIndex, ColumnStatistics, OffsetIndex, PageLocation, PageValues,
    Reader, RowGroupMeta,
};
pub use scalar::{Literal, Scalar};
pub use scan::{Scan, ScanOptions, ScanOptionsBuilder};
pub use spec::{FieldSpec, PostKind, QuerySpec};
