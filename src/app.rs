//! Wires config, dataset store, matcher and ingestion into one handle shared
//! by the CLI and the daemon.

use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;

use crate::{
    config::Config,
    dataset::{DatasetStore, StoreStatus},
    errors::{AppError, IngestError, MatchError},
    ingest::{
        ChangeNotification, HttpRecordSource, IngestionPipeline, MergeReport, RecordSource,
        Synchronizer, UpstreamRecord,
    },
    matcher::{MatchResult, ScopeFilters, ScopeListing, SimilarityMatcher},
    profile::{Profile, ProfileKind},
    semantic::{EmbeddingModel, VectorProvider},
};

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub profile: ProfileKind,
    pub model: String,
    #[serde(flatten)]
    pub store: StoreStatus,
    /// Loaded but the last reload failed, so results may be stale.
    pub degraded: bool,
}

pub struct App {
    store: Arc<DatasetStore>,
    matcher: SimilarityMatcher,
    synchronizer: Synchronizer,
}

impl App {
    /// Load the embedding model named in `config` and open the dataset.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let model = EmbeddingModel::new(&config.semantic.model, config.model_cache_dir())
            .context("couldnt load embedding model")?;

        let profile = config.build_profile();
        let source = HttpRecordSource::new(&config.upstream, profile.source.last_modified)
            .map(|source| Arc::new(source) as Arc<dyn RecordSource>)
            .map_err(|err| err.to_string());
        if let Err(reason) = &source {
            log::warn!("upstream sync disabled: {reason}");
        }

        Ok(Self::with_parts(config, profile, Arc::new(model), source))
    }

    pub fn with_parts(
        config: &Config,
        profile: Profile,
        provider: Arc<dyn VectorProvider>,
        source: Result<Arc<dyn RecordSource>, String>,
    ) -> Self {
        let profile = Arc::new(profile);
        let dataset_path = config.dataset_path();

        log::info!(
            "profile {}, dataset {}",
            profile.kind,
            dataset_path.display()
        );

        let store = Arc::new(DatasetStore::open(&dataset_path, profile.clone(), provider));
        let pipeline = Arc::new(IngestionPipeline::new(
            profile.clone(),
            &dataset_path,
            &config.checkpoint_path(),
        ));
        let synchronizer = Synchronizer::new(
            pipeline,
            source,
            &config.upstream.main_table,
            &config.upstream.lookups,
            &profile,
        );

        Self {
            matcher: SimilarityMatcher::new(store.clone()),
            store,
            synchronizer,
        }
    }

    pub fn search(&self, keyword: &str, filters: &ScopeFilters) -> Result<MatchResult, MatchError> {
        self.matcher.match_keyword(keyword, filters)
    }

    pub fn scopes(&self) -> ScopeListing {
        self.matcher.list_scopes()
    }

    pub fn scope_values(
        &self,
        dimension: &str,
        within: &ScopeFilters,
    ) -> Result<Vec<String>, MatchError> {
        self.matcher.scope_values(dimension, within)
    }

    pub fn sync(&self, full: bool) -> Result<MergeReport, IngestError> {
        let report = self.synchronizer.sync(full)?;
        self.refresh();
        Ok(report)
    }

    pub fn ingest_event(&self, notification: ChangeNotification) -> Result<MergeReport, IngestError> {
        let report = self.synchronizer.ingest_event(notification)?;
        self.refresh();
        Ok(report)
    }

    pub fn ingest_records(&self, records: &[UpstreamRecord]) -> Result<MergeReport, AppError> {
        let report = self.synchronizer.ingest_batch(records)?;
        self.refresh();
        Ok(report)
    }

    pub fn health(&self) -> Health {
        let store = self.store.status();
        Health {
            profile: self.store.profile().kind,
            model: self.store.provider().name().to_string(),
            degraded: store.last_error.is_some() && store.generation > 0,
            store,
        }
    }

    // pick up the merged file now instead of on the next read
    fn refresh(&self) {
        if let Err(err) = self.store.refresh_if_stale() {
            log::warn!("dataset reload after merge failed: {err}");
        }
    }
}
