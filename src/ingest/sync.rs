use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use super::{
    upstream::{self, LookupTables, RecordSource, UpstreamRecord},
    IngestionPipeline, MergeReport,
};
use crate::{config::LookupTable, errors::IngestError, profile::Profile};

/// Body of a single-record change notification.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangeNotification {
    #[serde(default)]
    pub record: Option<NotifiedRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifiedRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

/// Drives the pipeline from the upstream store: batch syncs and single
/// change notifications.
pub struct Synchronizer {
    pipeline: Arc<IngestionPipeline>,
    source: Option<Arc<dyn RecordSource>>,
    /// Why `source` is unset, reported on sync.
    unavailable: Option<String>,
    main_table: String,
    lookups: Vec<LookupTable>,
    incremental: bool,
}

impl Synchronizer {
    /// `lookups` empty means one lookup per scope dimension, named after its
    /// upstream field.
    pub fn new(
        pipeline: Arc<IngestionPipeline>,
        source: Result<Arc<dyn RecordSource>, String>,
        main_table: &str,
        lookups: &[LookupTable],
        profile: &Profile,
    ) -> Self {
        let lookups = if lookups.is_empty() {
            profile
                .scopes
                .iter()
                .map(|dim| LookupTable {
                    field: dim.upstream_field.to_string(),
                    table: dim.upstream_field.to_string(),
                    name_field: None,
                })
                .collect()
        } else {
            lookups.to_vec()
        };

        let (source, unavailable) = match source {
            Ok(source) => (Some(source), None),
            Err(reason) => (None, Some(reason)),
        };

        Self {
            pipeline,
            source,
            unavailable,
            main_table: main_table.to_string(),
            lookups,
            incremental: profile.source.last_modified.is_some(),
        }
    }

    fn source(&self) -> Result<&dyn RecordSource, IngestError> {
        match &self.source {
            Some(source) => Ok(source.as_ref()),
            None => Err(IngestError::SourceUnavailable(
                self.unavailable.clone().unwrap_or_default(),
            )),
        }
    }

    /// Fetch from upstream and merge. Without `full`, profiles that track a
    /// last-modified field only request records changed since the checkpoint;
    /// a missing dataset always forces a full fetch.
    pub fn sync(&self, full: bool) -> Result<MergeReport, IngestError> {
        let source = self.source()?;
        if self.main_table.is_empty() {
            return Err(IngestError::SourceUnavailable(
                "upstream.main_table is not set".to_string(),
            ));
        }

        let modified_after = if full || !self.incremental || !self.pipeline.dataset_path().exists() {
            log::info!("running full sync");
            None
        } else {
            let checkpoint = self.pipeline.checkpoint().load()?;
            log::info!("running incremental sync, changes after {checkpoint}");
            Some(checkpoint)
        };

        let lookups = upstream::fetch_lookups(source, &self.lookups)?;
        let records = source.fetch_all(&self.main_table, modified_after.as_deref())?;

        if records.is_empty() && modified_after.is_some() {
            log::info!("no new records since last sync");
            return Ok(MergeReport::default());
        }

        self.pipeline.merge(&records, &lookups)
    }

    /// Merge one notified record.
    pub fn ingest_event(&self, notification: ChangeNotification) -> Result<MergeReport, IngestError> {
        let record = notification
            .record
            .ok_or_else(|| IngestError::InvalidPayload("missing 'record'".to_string()))?;
        let id = record
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| IngestError::InvalidPayload("missing 'id'".to_string()))?;

        log::info!("change notification received for record {}", upstream::mask_id(&id));

        self.ingest_batch(&[UpstreamRecord {
            id,
            fields: record.fields,
        }])
    }

    /// Merge records supplied directly rather than fetched. Linked ids are
    /// resolved when an upstream source is configured and left as
    /// `Unknown (<id>)` otherwise.
    pub fn ingest_batch(&self, records: &[UpstreamRecord]) -> Result<MergeReport, IngestError> {
        let lookups = match &self.source {
            Some(source) if records.iter().any(|r| self.has_linked_ids(&r.fields)) => {
                upstream::fetch_lookups(source.as_ref(), &self.lookups)?
            }
            _ => LookupTables::default(),
        };

        self.pipeline.merge(records, &lookups)
    }

    fn has_linked_ids(&self, fields: &Map<String, Value>) -> bool {
        self.lookups
            .iter()
            .any(|lookup| matches!(fields.get(&lookup.field), Some(Value::Array(ids)) if !ids.is_empty()))
    }
}
