//! The query surface: builds and runs the predicate pipeline.

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use futures::FutureExt;
use serde_json::Value;

use crate::cache::IndexCache;
use crate::error::{Error, Result};
use crate::load::{FieldLoader, Record};
use crate::range::RowRange;
use crate::reader::Reader;
use crate::sort::{sorted_stream, SortState};
use crate::spec::{PostKind, QuerySpec};
use crate::stage::compile_phase;
use crate::stream::{fuse_on_error, pipe};

/// Options controlling pipeline execution.
#[derive(Clone, Debug)]
pub struct ScanOptions {
    stage_fanout: usize,
    cache_capacity: usize,
}

impl ScanOptions {
    /// Create a new builder for ScanOptions
    pub fn builder() -> ScanOptionsBuilder {
        ScanOptionsBuilder::default()
    }

    /// Maximum in-flight async operations per stage
    pub fn stage_fanout(&self) -> usize {
        self.stage_fanout
    }

    /// Durable index-cache capacity, in entries
    pub fn cache_capacity(&self) -> usize {
        self.cache_capacity
    }
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            stage_fanout: 500,
            cache_capacity: IndexCache::DEFAULT_CAPACITY,
        }
    }
}

/// Builder for ScanOptions
#[derive(Clone, Debug, Default)]
pub struct ScanOptionsBuilder {
    stage_fanout: Option<usize>,
    cache_capacity: Option<usize>,
}

impl ScanOptionsBuilder {
    /// Bound on in-flight async operations per stage (default: 500)
    pub fn stage_fanout(mut self, value: usize) -> Self {
        self.stage_fanout = Some(value);
        self
    }

    /// Durable index-cache capacity when the scan builds its own cache
    /// (default: 10000 entries). Ignored when a cache is supplied with
    /// [`Scan::with_cache`].
    pub fn cache_capacity(mut self, value: usize) -> Self {
        self.cache_capacity = Some(value);
        self
    }

    /// Build the ScanOptions
    pub fn build(self) -> ScanOptions {
        ScanOptions {
            stage_fanout: self.stage_fanout.unwrap_or(500).max(1),
            cache_capacity: self
                .cache_capacity
                .unwrap_or(IndexCache::DEFAULT_CAPACITY),
        }
    }
}

type PostError = Box<dyn std::error::Error + Send + Sync>;

enum PostStage {
    Filter(Arc<dyn Fn(&Record) -> std::result::Result<bool, PostError> + Send + Sync>),
    Transform(Arc<dyn Fn(Record) -> std::result::Result<Record, PostError> + Send + Sync>),
}

impl PostStage {
    fn kind(&self) -> PostKind {
        match self {
            PostStage::Filter(_) => PostKind::Filter,
            PostStage::Transform(_) => PostKind::Transform,
        }
    }
}

/// A planned query over one or more readers.
///
/// Construction parses and validates the specification, so spec and schema
/// errors surface before any I/O. [`stream`](Self::stream) then runs the
/// phase pipeline: one root range per `(reader, row group)`, narrowed by
/// each filter phase in declaration order, materialized by the field
/// loader, and finally passed through any post stages.
///
/// # Examples
///
/// ```no_run
/// use weir::Scan;
/// use futures_util::StreamExt;
/// use serde_json::json;
///
/// # async fn run(reader: std::sync::Arc<dyn weir::Reader>) -> weir::Result<()> {
/// let spec = json!({
///     "filter": [
///         {"path": "quantity", "min": 5, "max": 18, "index": true},
///         {"path": "quantity", "value": 15}
///     ],
///     "fields": [{"path": "quantity"}, {"path": "name"}]
/// });
///
/// let mut records = Scan::new(vec![reader], &spec)?.stream()?;
/// while let Some(record) = records.next().await {
///     println!("{:?}", record?);
/// }
/// # Ok(())
/// # }
/// ```
pub struct Scan {
    readers: Vec<Arc<dyn Reader>>,
    spec: QuerySpec,
    options: ScanOptions,
    cache: Option<Arc<IndexCache>>,
    post: Vec<PostStage>,
    sort: Option<String>,
}

impl Scan {
    /// Parses the query spec and checks every referenced path against the
    /// readers' row groups.
    ///
    /// # Errors
    ///
    /// [`Error::Spec`] for a malformed specification; [`Error::Schema`]
    /// when a path is absent from every row group of every reader.
    pub fn new(readers: Vec<Arc<dyn Reader>>, spec: &Value) -> Result<Self> {
        let spec = QuerySpec::parse(spec)?;
        for path in spec.referenced_paths() {
            Self::check_path(&readers, &path)?;
        }
        Ok(Self {
            readers,
            spec,
            options: ScanOptions::default(),
            cache: None,
            post: Vec::new(),
            sort: None,
        })
    }

    /// Replaces the default options.
    pub fn with_options(mut self, options: ScanOptions) -> Self {
        self.options = options;
        self
    }

    /// Shares a process-wide cache instead of building a private one.
    pub fn with_cache(mut self, cache: Arc<IndexCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Appends a record-level filter stage. Runs after field loading, in
    /// attachment order; a failing closure terminates the stream as a
    /// reader error.
    pub fn with_post_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Record) -> std::result::Result<bool, PostError> + Send + Sync + 'static,
    {
        self.post.push(PostStage::Filter(Arc::new(filter)));
        self
    }

    /// Appends a record-level transform stage.
    pub fn with_post_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Record) -> std::result::Result<Record, PostError> + Send + Sync + 'static,
    {
        self.post.push(PostStage::Transform(Arc::new(transform)));
        self
    }

    /// Sorts the output globally by `path`, merging across pages with
    /// bounded memory.
    pub fn with_sort(mut self, path: impl Into<String>) -> Self {
        self.sort = Some(path.into());
        self
    }

    /// Compiles the pipeline and returns the record stream.
    ///
    /// Dropping the stream cancels all upstream work; no new fetches are
    /// scheduled once the consumer goes away.
    pub fn stream(self) -> Result<BoxStream<'static, Result<Record>>> {
        let Scan {
            readers,
            spec,
            options,
            cache,
            post,
            sort,
        } = self;

        // Declared post stages must line up with the attached closures.
        if !spec.post.is_empty() {
            let attached: Vec<PostKind> = post.iter().map(PostStage::kind).collect();
            if attached != spec.post {
                return Err(Error::spec(format!(
                    "spec declares post stages {:?} but {:?} are attached",
                    spec.post, attached
                )));
            }
        }
        if let Some(path) = &sort {
            Self::check_path(&readers, path)?;
        }

        let cache = cache.unwrap_or_else(|| Arc::new(IndexCache::new(options.cache_capacity)));
        let fanout = options.stage_fanout();

        let mut roots = Vec::new();
        for reader in &readers {
            for row_group_no in 0..reader.row_groups().len() {
                if let Some(root) = RowRange::root(reader.clone(), cache.clone(), row_group_no) {
                    roots.push(root);
                }
            }
        }
        tracing::debug!(
            readers = readers.len(),
            roots = roots.len(),
            phases = spec.phases.len(),
            "starting scan"
        );

        let mut ranges: BoxStream<'static, Result<RowRange>> =
            stream::iter(roots.into_iter().map(Ok)).boxed();
        for phase in &spec.phases {
            for stage in compile_phase(phase) {
                ranges = pipe(ranges, fanout, move |range| {
                    let stage = stage.clone();
                    async move { stage.apply(range).await }.boxed()
                });
            }
        }

        let loader = Arc::new(FieldLoader::new(spec.fields.clone()));
        let mut records: BoxStream<'static, Result<Record>> = match sort {
            Some(path) => {
                let build = async move {
                    let mut surviving = Vec::new();
                    let mut ranges = ranges;
                    while let Some(range) = ranges.next().await {
                        surviving.push(range?);
                    }
                    SortState::build(surviving, path, loader).await
                };
                stream::once(build)
                    .map(|state| match state {
                        Ok(state) => sorted_stream(state),
                        Err(err) => stream::once(futures::future::ready(Err(err))).boxed(),
                    })
                    .flatten()
                    .boxed()
            }
            None => pipe(ranges, fanout, move |range| {
                let loader = loader.clone();
                async move { loader.load(range).await }.boxed()
            }),
        };

        for stage in post {
            records = match stage {
                PostStage::Filter(filter) => pipe(records, fanout, move |record| {
                    let filter = filter.clone();
                    async move {
                        match filter(&record) {
                            Ok(true) => Ok(vec![record]),
                            Ok(false) => Ok(Vec::new()),
                            Err(source) => Err(Error::Reader {
                                source: Arc::from(source),
                            }),
                        }
                    }
                    .boxed()
                }),
                PostStage::Transform(transform) => pipe(records, fanout, move |record| {
                    let transform = transform.clone();
                    async move {
                        match transform(record) {
                            Ok(record) => Ok(vec![record]),
                            Err(source) => Err(Error::Reader {
                                source: Arc::from(source),
                            }),
                        }
                    }
                    .boxed()
                }),
            };
        }

        Ok(fuse_on_error(records))
    }

    fn check_path(readers: &[Arc<dyn Reader>], path: &str) -> Result<()> {
        let known = readers.iter().any(|reader| {
            reader
                .row_groups()
                .iter()
                .any(|group| group.column(path).is_some())
        });
        if known {
            Ok(())
        } else {
            Err(Error::schema(path))
        }
    }
}
