//! Canonical keyword dataset: record type and the delimited file format.

mod store;

pub use store::{DatasetStore, Snapshot, StoreStatus};

use std::{collections::HashMap, path::Path, time::Instant};

use serde::Serialize;

use crate::{
    errors::LoadError,
    profile::{Field, Profile},
    storage,
};

/// One row of the canonical dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Record {
    pub source_record_id: String,
    pub qualifier: String,
    /// Keyword as stored in the file, before normalization.
    pub keyword: String,
    /// Matching and dedup key. Empty only for rows read in raw mode.
    pub normalized_keyword: String,
    pub display_keyword: String,
    /// Scope values, aligned with `Profile::scopes`.
    pub scopes: Vec<String>,
    pub target_url: String,
    pub period_label: String,
    pub content_type: String,
    pub annotation_text: String,
    pub last_modified: String,
}

impl Record {
    pub fn scope(&self, idx: usize) -> &str {
        self.scopes.get(idx).map(String::as_str).unwrap_or_default()
    }

    fn field(&self, field: Field) -> &str {
        match field {
            Field::Qualifier => &self.qualifier,
            Field::Keyword => &self.keyword,
            Field::Scope(idx) => self.scope(idx),
            Field::DisplayKeyword => &self.display_keyword,
            Field::TargetUrl => &self.target_url,
            Field::PeriodLabel => &self.period_label,
            Field::ContentType => &self.content_type,
            Field::Annotation => &self.annotation_text,
            Field::LastModified => &self.last_modified,
            Field::RecordId => &self.source_record_id,
        }
    }
}

/// Parsed dataset plus bookkeeping about what was filtered out.
#[derive(Debug, Default)]
pub struct Table {
    pub records: Vec<Record>,
    pub dropped: usize,
}

/// Read every row as stored, without required-field or content filtering.
/// Used by the merge so existing rows are carried over untouched.
pub fn read_raw(bytes: &[u8], profile: &Profile) -> Result<Vec<Record>, LoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);

    let headers = reader.headers()?.clone();
    let positions: HashMap<&str, usize> = headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.trim_start_matches('\u{feff}'), idx))
        .collect();

    let layout: Vec<(Field, Option<usize>)> = profile
        .layout()
        .into_iter()
        .map(|(column, field)| (field, positions.get(column).copied()))
        .collect();

    let mut records = vec![];
    for row in reader.records() {
        let row = row?;
        let mut record = Record {
            scopes: vec![String::new(); profile.scopes.len()],
            ..Default::default()
        };

        for (field, position) in &layout {
            let value = position
                .and_then(|p| row.get(p))
                .unwrap_or_default()
                .to_string();

            match field {
                Field::Qualifier => record.qualifier = value,
                Field::Keyword => record.keyword = value,
                Field::Scope(idx) => record.scopes[*idx] = value,
                Field::DisplayKeyword => record.display_keyword = value,
                Field::TargetUrl => record.target_url = value,
                Field::PeriodLabel => record.period_label = value,
                Field::ContentType => record.content_type = value,
                Field::Annotation => record.annotation_text = value,
                Field::LastModified => record.last_modified = value,
                Field::RecordId => record.source_record_id = value,
            }
        }

        records.push(record);
    }

    Ok(records)
}

/// Column names of the file's header row.
pub fn header(bytes: &[u8]) -> Result<Vec<String>, LoadError> {
    Ok(csv::ReaderBuilder::new()
        .from_reader(bytes)
        .headers()?
        .iter()
        .map(|name| name.trim_start_matches('\u{feff}').to_string())
        .collect())
}

/// Parse the dataset for serving: required columns must exist, rows missing
/// any required value are dropped, the content-type filter is applied and
/// keywords (and scopes, where the profile says so) are normalized.
pub fn parse_table(bytes: &[u8], profile: &Profile) -> Result<Table, LoadError> {
    let now = Instant::now();

    let header = header(bytes)?;

    for required in profile.schema.required {
        if !header.iter().any(|name| name == required) {
            return Err(LoadError::MissingColumn(required.to_string()));
        }
    }
    let has_content_type = profile
        .schema
        .content_type
        .map(|column| header.iter().any(|name| name == column))
        .unwrap_or(false);

    let layout = profile.layout();
    let mut table = Table::default();

    for mut record in read_raw(bytes, profile)? {
        let missing_required = layout.iter().any(|(column, field)| {
            profile.schema.required.contains(column) && record.field(*field).trim().is_empty()
        });
        if missing_required {
            table.dropped += 1;
            continue;
        }

        if let (Some(wanted), true) = (profile.content_type_filter, has_content_type) {
            if record.content_type != wanted {
                table.dropped += 1;
                continue;
            }
        }

        record.normalized_keyword = profile.normalize(&record.keyword);
        if record.normalized_keyword.is_empty() {
            table.dropped += 1;
            continue;
        }

        if record.display_keyword.is_empty() {
            record.display_keyword = record.keyword.clone();
        }
        if profile.normalize_scopes {
            for scope in record.scopes.iter_mut() {
                *scope = profile.normalize_scope(scope);
            }
        }

        table.records.push(record);
    }

    log::debug!(
        "took {}ms to parse dataset ({} rows, {} dropped)",
        now.elapsed().as_micros() as f64 / 1000.0,
        table.records.len(),
        table.dropped
    );

    Ok(table)
}

/// Replace the dataset file with `records` in one atomic rename.
pub fn write_table(path: &Path, profile: &Profile, records: &[Record]) -> std::io::Result<()> {
    let layout = profile.layout();

    storage::write_atomic_with(path, |file| {
        let mut csv_wrt = csv::Writer::from_writer(file);
        csv_wrt.write_record(layout.iter().map(|(column, _)| *column))?;
        for record in records {
            csv_wrt.write_record(layout.iter().map(|(_, field)| record.field(*field)))?;
        }
        csv_wrt.flush()
    })
}
