//! Field materialization: turns surviving row ranges into records.
//!
//! The loader reads as few pages as possible: it splits every range along
//! the page boundaries of all requested paths so each sub-range sits inside
//! a single page per path, then fetches exactly those pages, concurrently.

use std::sync::Arc;

use futures::future::try_join_all;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::range::RowRange;
use crate::reader::OffsetIndex;
use crate::scalar::Scalar;
use crate::spec::FieldSpec;

/// A materialized row: column path to decoded value.
pub type Record = serde_json::Map<String, Value>;

struct LoadField {
    path: String,
    source: bool,
    /// Loaded for keying only, never written into the record.
    hidden: bool,
}

/// Plans minimal page reads for the requested fields and assembles records.
pub(crate) struct FieldLoader {
    fields: Vec<FieldSpec>,
}

impl FieldLoader {
    pub(crate) fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    /// Records for every row of `range`, in row order.
    pub(crate) async fn load(&self, range: RowRange) -> Result<Vec<Record>> {
        Ok(self
            .load_inner(range, None)
            .await?
            .into_iter()
            .map(|(_, record)| record)
            .collect())
    }

    /// Records paired with the value of `key_path`, which is loaded even
    /// when it is not part of the requested fields.
    pub(crate) async fn load_keyed(
        &self,
        range: RowRange,
        key_path: &str,
    ) -> Result<Vec<(Option<Scalar>, Record)>> {
        self.load_inner(range, Some(key_path)).await
    }

    async fn load_inner(
        &self,
        range: RowRange,
        key_path: Option<&str>,
    ) -> Result<Vec<(Option<Scalar>, Record)>> {
        let mut fields: Vec<LoadField> = self
            .fields
            .iter()
            .filter(|f| range.row_group().column(&f.path).is_some())
            .map(|f| LoadField {
                path: f.path.clone(),
                source: f.source,
                hidden: false,
            })
            .collect();
        if let Some(key) = key_path {
            if !fields.iter().any(|f| f.path == key)
                && range.row_group().column(key).is_some()
            {
                fields.push(LoadField {
                    path: key.to_string(),
                    source: false,
                    hidden: true,
                });
            }
        }

        let rows = (range.high() - range.low() + 1) as usize;
        if fields.is_empty() {
            // Nothing to read; every row materializes as an empty record.
            return Ok(vec![(None, Record::new()); rows]);
        }

        let offset_indexes: Vec<Arc<OffsetIndex>> = try_join_all(
            fields.iter().map(|f| range.prime_offset_index(&f.path)),
        )
        .await?;

        let mut out = Vec::with_capacity(rows);
        for split in split_by_pages(&range, &fields, &offset_indexes)? {
            self.load_split(&range, &fields, &offset_indexes, &split, key_path, &mut out)
                .await?;
        }
        Ok(out)
    }

    async fn load_split(
        &self,
        range: &RowRange,
        fields: &[LoadField],
        offset_indexes: &[Arc<OffsetIndex>],
        split: &Split,
        key_path: Option<&str>,
        out: &mut Vec<(Option<Scalar>, Record)>,
    ) -> Result<()> {
        let pages = try_join_all(
            fields
                .iter()
                .zip(&split.pages)
                .map(|(f, page)| range.page_data(&f.path, *page)),
        )
        .await?;
        let first_rows: Vec<u64> = split
            .pages
            .iter()
            .zip(offset_indexes)
            .map(|(page, index)| index.page_locations[*page].first_row_index)
            .collect();

        for row in split.low..=split.high {
            let mut record = Record::new();
            let mut key = None;
            for (i, field) in fields.iter().enumerate() {
                let slot = pages[i]
                    .get((row - first_rows[i]) as usize)
                    .ok_or_else(|| {
                        Error::invariant(format!(
                            "page {} of '{}' shorter than its row span",
                            split.pages[i], field.path
                        ))
                    })?;
                let Some(value) = slot else {
                    continue;
                };
                if key_path == Some(field.path.as_str()) {
                    key = Some(value.clone());
                }
                if field.hidden {
                    continue;
                }
                if field.source {
                    merge_source(&mut record, &field.path, value)?;
                } else {
                    record.insert(field.path.clone(), value.clone().into());
                }
            }
            out.push((key, record));
        }
        Ok(())
    }
}

struct Split {
    low: u64,
    high: u64,
    /// Current page per field, parallel to the field list.
    pages: Vec<usize>,
}

/// Multi-path page split: page boundaries of every field are event points;
/// each emitted sub-range sits inside a single page of every field.
fn split_by_pages(
    range: &RowRange,
    fields: &[LoadField],
    offset_indexes: &[Arc<OffsetIndex>],
) -> Result<Vec<Split>> {
    let mut pages: Vec<usize> = fields
        .iter()
        .map(|f| range.find_relevant_page_index(&f.path, range.low()))
        .collect::<Result<_>>()?;

    let mut splits = Vec::new();
    let mut low = range.low();
    loop {
        // Advance past pages that ended before `low`, then find the
        // nearest next page boundary still inside the range.
        let mut boundary: Option<u64> = None;
        for (i, index) in offset_indexes.iter().enumerate() {
            while let Some(next) = index.page_locations.get(pages[i] + 1) {
                if next.first_row_index <= low {
                    pages[i] += 1;
                } else {
                    break;
                }
            }
            if let Some(next) = index.page_locations.get(pages[i] + 1) {
                if next.first_row_index <= range.high() {
                    boundary =
                        Some(boundary.map_or(next.first_row_index, |b| b.min(next.first_row_index)));
                }
            }
        }
        match boundary {
            Some(boundary) => {
                splits.push(Split {
                    low,
                    high: boundary - 1,
                    pages: pages.clone(),
                });
                low = boundary;
            }
            None => {
                splits.push(Split {
                    low,
                    high: range.high(),
                    pages,
                });
                return Ok(splits);
            }
        }
    }
}

/// Merges a JSON blob column into the record, dropping the raw field.
fn merge_source(record: &mut Record, path: &str, value: &Scalar) -> Result<()> {
    let Scalar::Str(blob) = value else {
        return Err(Error::reader_msg(format!(
            "source column '{path}' holds a non-string value"
        )));
    };
    let parsed: Value = serde_json::from_str(blob)
        .map_err(|e| Error::reader_msg(format!("source column '{path}' is not valid JSON: {e}")))?;
    let Value::Object(object) = parsed else {
        return Err(Error::reader_msg(format!(
            "source column '{path}' is not a JSON object"
        )));
    };
    for (k, v) in object {
        record.insert(k, v);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_merge_replaces_the_raw_field() {
        let mut record = Record::new();
        merge_source(
            &mut record,
            "payload",
            &Scalar::Str(r#"{"city":"dallas","zip":75201}"#.into()),
        )
        .unwrap();
        assert_eq!(record.get("city"), Some(&Value::String("dallas".into())));
        assert_eq!(record.get("zip"), Some(&Value::from(75201)));
        assert!(record.get("payload").is_none());
    }

    #[test]
    fn source_merge_rejects_non_objects() {
        let mut record = Record::new();
        assert!(merge_source(&mut record, "payload", &Scalar::Str("[1,2]".into())).is_err());
        assert!(merge_source(&mut record, "payload", &Scalar::Int(3)).is_err());
    }
}
