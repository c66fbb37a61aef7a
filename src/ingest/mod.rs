//! Ingestion pipeline: reconcile upstream records with the canonical dataset.
//!
//! Stages, in order:
//! 1. resolve linked-record ids through lookup tables
//! 2. extract the allow-listed fields into a typed row
//! 3. content-type filter
//! 4. pre-split dedup of repeated raw keywords
//! 5. split `<qualifier><separator><keyword>`
//! 6. merge with the existing file, last occurrence of a key wins
//! 7. atomic replace of the dataset file
//! 8. advance the sync checkpoint

mod checkpoint;
mod sync;
pub mod upstream;

pub use checkpoint::{high_water_mark, Checkpoint, EPOCH};
pub use sync::{ChangeNotification, NotifiedRecord, Synchronizer};
pub use upstream::{HttpRecordSource, LookupTables, RecordSource, UpstreamRecord};

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    dataset::{self, Record},
    errors::{IngestError, LoadError},
    lock::FileLock,
    profile::{MergeKey, Profile},
};

/// Allow-listed, typed view of one upstream record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceRow {
    pub source_record_id: String,
    pub raw_keyword: String,
    pub target_url: String,
    /// Resolved display names, aligned with `Profile::scopes`.
    pub scopes: Vec<String>,
    pub period_label: String,
    pub content_type: Option<String>,
    pub annotation_text: String,
    pub last_modified: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergeReport {
    pub incoming: usize,
    /// Rows without a keyword or failing the content-type filter.
    pub filtered: usize,
    /// Rows removed by the pre-split duplicate rule.
    pub duplicates: usize,
    /// Rows added or replaced in the dataset.
    pub written: usize,
    pub total: usize,
    /// Latest last-modified seen in this batch.
    pub high_water_mark: Option<String>,
}

/// Read the allow-listed fields of `record`, resolving linked ids. Fields
/// outside the allow-list are never looked at.
pub fn extract(record: &UpstreamRecord, profile: &Profile, lookups: &LookupTables) -> SourceRow {
    let fields = &record.fields;
    let source = &profile.source;

    let scopes = profile
        .scopes
        .iter()
        .map(|dim| {
            let ids: Vec<String> = match fields.get(dim.upstream_field) {
                Some(Value::Array(ids)) => ids.iter().filter_map(upstream::value_to_string).collect(),
                // already a display name
                Some(Value::String(name)) => return name.trim().to_string(),
                _ => vec![],
            };
            ids.iter()
                .map(|id| lookups.resolve(dim.upstream_field, id))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .collect();

    SourceRow {
        source_record_id: record.id.clone(),
        raw_keyword: field_text(fields, Some(source.keyword)),
        target_url: field_text(fields, Some(source.target_url)),
        scopes,
        period_label: field_text(fields, source.period_label),
        content_type: source
            .content_type
            .and_then(|name| fields.get(name))
            .map(|_| field_text(fields, source.content_type)),
        annotation_text: field_text(fields, source.annotation),
        last_modified: field_text(fields, source.last_modified),
    }
}

fn field_text(fields: &Map<String, Value>, name: Option<&str>) -> String {
    match name.and_then(|name| fields.get(name)) {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(upstream::value_to_string)
            .collect::<Vec<_>>()
            .join(", "),
        Some(value) => upstream::value_to_string(value).unwrap_or_default(),
        None => String::new(),
    }
}

/// Split on the first `separator` into `(qualifier, keyword)`, both trimmed.
/// Without a separator the qualifier is empty.
pub fn decompose(raw: &str, separator: Option<char>) -> (String, String) {
    match separator.and_then(|sep| raw.split_once(sep)) {
        Some((qualifier, keyword)) => (qualifier.trim().to_string(), keyword.trim().to_string()),
        None => (String::new(), raw.trim().to_string()),
    }
}

/// Drop every copy of a raw keyword that occurs more than once, unless the
/// value contains the separator. Returns the kept rows and the drop count.
///
/// This mirrors the upstream convention that disambiguated keywords carry
/// a qualifier; it can discard distinct rows whose raw value repeats.
pub fn presplit_dedup(rows: Vec<SourceRow>, separator: char) -> (Vec<SourceRow>, usize) {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for row in &rows {
        *counts.entry(row.raw_keyword.as_str()).or_default() += 1;
    }

    let drop: Vec<bool> = rows
        .iter()
        .map(|row| counts[row.raw_keyword.as_str()] > 1 && !row.raw_keyword.contains(separator))
        .collect();
    let dropped = drop.iter().filter(|d| **d).count();

    let kept = rows
        .into_iter()
        .zip(drop)
        .filter(|(_, drop)| !drop)
        .map(|(row, _)| row)
        .collect();

    (kept, dropped)
}

fn merge_key(record: &Record, profile: &Profile) -> String {
    match profile.merge_key {
        MergeKey::NormalizedKeyword => profile.normalize(&record.keyword),
        MergeKey::SourceRecordId => record.source_record_id.trim().to_string(),
    }
}

/// Concatenate `existing` and `incoming`, keeping only the last row for each
/// merge key at that row's position. Rows with an empty key are kept as-is.
pub fn merge_records(existing: Vec<Record>, incoming: Vec<Record>, profile: &Profile) -> Vec<Record> {
    let combined: Vec<Record> = existing.into_iter().chain(incoming).collect();
    let keys: Vec<String> = combined.iter().map(|r| merge_key(r, profile)).collect();

    let mut last: HashMap<&str, usize> = HashMap::new();
    for (idx, key) in keys.iter().enumerate() {
        if !key.is_empty() {
            last.insert(key.as_str(), idx);
        }
    }

    combined
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| keys[*idx].is_empty() || last.get(keys[*idx].as_str()) == Some(idx))
        .map(|(_, record)| record)
        .collect()
}

pub struct IngestionPipeline {
    profile: Arc<Profile>,
    dataset_path: PathBuf,
    checkpoint: Checkpoint,
    /// Serializes merges within the process; the file lock covers other
    /// processes.
    merge_lock: Mutex<()>,
}

impl IngestionPipeline {
    pub fn new(profile: Arc<Profile>, dataset_path: &Path, checkpoint_path: &Path) -> Self {
        Self {
            profile,
            dataset_path: dataset_path.to_path_buf(),
            checkpoint: Checkpoint::new(checkpoint_path),
            merge_lock: Mutex::new(()),
        }
    }

    pub fn dataset_path(&self) -> &Path {
        &self.dataset_path
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    /// Stages 1-5: turn upstream records into dataset records.
    pub fn prepare(
        &self,
        incoming: &[UpstreamRecord],
        lookups: &LookupTables,
    ) -> (Vec<Record>, MergeReport) {
        let profile = self.profile.as_ref();
        let mut report = MergeReport {
            incoming: incoming.len(),
            ..Default::default()
        };

        let mut rows: Vec<SourceRow> = incoming
            .iter()
            .map(|record| extract(record, profile, lookups))
            .collect();
        report.high_water_mark = high_water_mark(rows.iter().map(|r| r.last_modified.as_str()));

        let before = rows.len();
        // a cleared keyword still replaces the stored row when rows are keyed
        // by record id; the load step drops it
        let keep_cleared = profile.merge_key == MergeKey::SourceRecordId;
        rows.retain(|row| {
            !row.raw_keyword.trim().is_empty()
                || (keep_cleared && !row.source_record_id.trim().is_empty())
        });

        // filter only applies when the batch carries the field at all
        if let Some(wanted) = profile.content_type_filter {
            if rows.iter().any(|row| row.content_type.is_some()) {
                rows.retain(|row| row.content_type.as_deref() == Some(wanted));
            }
        }
        report.filtered = before - rows.len();

        if let Some(separator) = profile.separator {
            let (kept, dropped) = presplit_dedup(rows, separator);
            rows = kept;
            report.duplicates = dropped;
        }

        let records: Vec<Record> = rows
            .into_iter()
            .map(|row| {
                let (qualifier, keyword) = decompose(&row.raw_keyword, profile.separator);
                Record {
                    source_record_id: row.source_record_id,
                    qualifier,
                    normalized_keyword: profile.normalize(&keyword),
                    keyword,
                    display_keyword: row.raw_keyword,
                    scopes: row.scopes,
                    target_url: row.target_url,
                    period_label: row.period_label,
                    content_type: row.content_type.unwrap_or_default(),
                    annotation_text: row.annotation_text,
                    last_modified: row.last_modified,
                }
            })
            .collect();

        log::info!(
            "prepared {} of {} incoming records ({} filtered, {} duplicate raw keywords)",
            records.len(),
            report.incoming,
            report.filtered,
            report.duplicates
        );

        (records, report)
    }

    /// Run all stages and persist. The dataset file is replaced atomically
    /// and the checkpoint only moves after the write succeeded.
    pub fn merge(
        &self,
        incoming: &[UpstreamRecord],
        lookups: &LookupTables,
    ) -> Result<MergeReport, IngestError> {
        let _guard = self
            .merge_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let lock_dir = self
            .dataset_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let _file_lock = match FileLock::try_acquire(lock_dir) {
            Ok(lock) => lock,
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                log::info!("waiting for another ingestion run to finish");
                FileLock::acquire_blocking(lock_dir).map_err(IngestError::Lock)?
            }
            Err(err) => return Err(IngestError::Lock(err)),
        };

        let (records, mut report) = self.prepare(incoming, lookups);
        let profile = self.profile.as_ref();

        let existing = self.read_existing()?;
        if records.is_empty() {
            log::info!("no records to merge");
            if existing.is_none() {
                self.write(&[])?;
                log::info!("created empty dataset at {}", self.dataset_path.display());
            }
            report.total = existing.map(|rows| rows.len()).unwrap_or(0);
            return Ok(report);
        }

        report.written = records.len();
        let merged = merge_records(existing.unwrap_or_default(), records, profile);
        report.total = merged.len();

        self.write(&merged)?;
        log::info!(
            "updated {} with {} records (total: {})",
            self.dataset_path.display(),
            report.written,
            report.total
        );

        if let Some(mark) = &report.high_water_mark {
            let stored = self.checkpoint.load().unwrap_or_else(|err| {
                log::warn!("{err}, replacing it");
                EPOCH.to_string()
            });
            let latest = high_water_mark([stored.as_str(), mark.as_str()]);
            if latest.as_deref() == Some(mark.as_str()) && stored != *mark {
                self.checkpoint.save(mark)?;
            }
        }

        Ok(report)
    }

    fn read_existing(&self) -> Result<Option<Vec<Record>>, IngestError> {
        let bytes = match std::fs::read(&self.dataset_path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(LoadError::from(err).into()),
        };

        let key_column = match self.profile.merge_key {
            MergeKey::NormalizedKeyword => self.profile.schema.keyword,
            MergeKey::SourceRecordId => self.profile.schema.record_id,
        };
        if !dataset::header(&bytes)?.iter().any(|name| name == key_column) {
            return Err(LoadError::MissingColumn(key_column.to_string()).into());
        }

        let existing = dataset::read_raw(&bytes, &self.profile)?;
        log::debug!("existing dataset has {} rows", existing.len());
        Ok(Some(existing))
    }

    fn write(&self, records: &[Record]) -> Result<(), IngestError> {
        dataset::write_table(&self.dataset_path, &self.profile, records)
            .map_err(|err| IngestError::MergeWrite(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, raw: &str) -> SourceRow {
        SourceRow {
            source_record_id: id.to_string(),
            raw_keyword: raw.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_decompose_with_separator() {
        assert_eq!(
            decompose("BlogA - Keyword B", Some('-')),
            ("BlogA".to_string(), "Keyword B".to_string())
        );
        assert_eq!(
            decompose("  Keyword only  ", Some('-')),
            (String::new(), "Keyword only".to_string())
        );
        assert_eq!(
            decompose("a-b-c", Some('-')),
            ("a".to_string(), "b-c".to_string())
        );
    }

    #[test]
    fn test_decompose_without_separator_keeps_whole_value() {
        assert_eq!(
            decompose(" self-hosted tools ", None),
            (String::new(), "self-hosted tools".to_string())
        );
    }

    #[test]
    fn test_presplit_dedup() {
        let rows = vec![
            row("1", "hotels"),
            row("2", "hotels"),
            row("3", "BlogA - tours"),
            row("4", "BlogA - tours"),
            row("5", "flights"),
        ];

        let (kept, dropped) = presplit_dedup(rows, '-');
        let ids: Vec<&str> = kept.iter().map(|r| r.source_record_id.as_str()).collect();
        assert_eq!(ids, vec!["3", "4", "5"]);
        assert_eq!(dropped, 2);
    }

    #[test]
    fn test_merge_last_occurrence_wins() {
        let profile = Profile::directory();
        let record = |id: &str, kw: &str| Record {
            source_record_id: id.to_string(),
            keyword: kw.to_string(),
            ..Default::default()
        };

        let existing = vec![record("r1", "old one"), record("r2", "two"), record("", "orphan")];
        let incoming = vec![record("r1", "new one"), record("r3", "three")];

        let merged = merge_records(existing, incoming, &profile);
        let keywords: Vec<&str> = merged.iter().map(|r| r.keyword.as_str()).collect();
        assert_eq!(keywords, vec!["two", "orphan", "new one", "three"]);
    }

    #[test]
    fn test_merge_by_normalized_keyword() {
        let profile = Profile::client();
        let record = |id: &str, kw: &str| Record {
            source_record_id: id.to_string(),
            keyword: kw.to_string(),
            ..Default::default()
        };

        let merged = merge_records(
            vec![record("a", "Cheap  Flights"), record("b", "hotels")],
            vec![record("c", "cheap flights")],
            &profile,
        );
        let ids: Vec<&str> = merged.iter().map(|r| r.source_record_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }
}
