use std::path::PathBuf;

use crate::matcher::ExactMatch;
use crate::semantic::EmbeddingError;

/// The backing dataset could not be read. The store keeps serving its
/// previous table when this happens.
#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("dataset file not found at {0}")]
    Missing(PathBuf),

    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("malformed dataset: {0}")]
    Csv(#[from] csv::Error),

    #[error("dataset is missing required column '{0}'")]
    MissingColumn(String),

    #[error("embedding rebuild failed: {0}")]
    Embedding(#[from] EmbeddingError),
}

#[derive(thiserror::Error, Debug)]
pub enum MatchError {
    #[error("query is empty after normalization")]
    EmptyQuery,

    #[error("no keywords in the selected scope")]
    ScopeEmpty,

    #[error("unknown scope dimension '{0}'")]
    UnknownScope(String),

    #[error("keyword not found")]
    KeywordNotFound,

    /// Nothing cleared the lowest threshold. The literal row, if the query
    /// had one, is still reported.
    #[error("no similar keywords found")]
    NoSimilar { exact: Option<Box<ExactMatch>> },

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
}

#[derive(thiserror::Error, Debug)]
pub enum UpstreamError {
    #[error("request to {table} failed: {source}")]
    Transport {
        table: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{table} responded with {status}: {body}")]
    Status {
        table: String,
        status: u16,
        body: String,
    },

    #[error("could not decode {table} page: {detail}")]
    Decode { table: String, detail: String },

    #[error("lookup table {0} has no records to detect a name field from")]
    EmptyLookup(String),

    #[error("missing upstream token, set {0}")]
    MissingToken(String),
}

#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    #[error("upstream fetch failed: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("existing dataset could not be read: {0}")]
    Load(#[from] LoadError),

    #[error("failed to persist merged dataset: {0}")]
    MergeWrite(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("ingestion lock unavailable: {0:?}")]
    Lock(std::io::Error),

    #[error("invalid change notification: {0}")]
    InvalidPayload(String),

    #[error("upstream source is not configured: {0}")]
    SourceUnavailable(String),
}

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Match(#[from] MatchError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}
