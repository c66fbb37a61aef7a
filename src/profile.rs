//! Deployment profiles.
//!
//! The client and link-directory deployments run the same engine. A
//! `Profile` captures everything that differs between them: the dataset
//! columns, how keywords are normalized, which scope dimensions exist, how
//! results are bucketed and how incoming records are keyed during a merge.

use serde::{Deserialize, Serialize};

use crate::normalize::Normalization;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    Client,
    Directory,
}

impl std::fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileKind::Client => write!(f, "client"),
            ProfileKind::Directory => write!(f, "directory"),
        }
    }
}

/// How ranked candidates are cut into result buckets.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Thresholds {
    /// Everything scoring at least `soft`, truncated to `max_output`.
    Single { soft: f32, max_output: usize },
    /// `matched` scores at least `hard`, `suggested` sits in `[soft, hard)`.
    /// Matched come first, suggested backfill up to `top_limit`.
    Dual { hard: f32, soft: f32, top_limit: usize },
}

impl Thresholds {
    pub fn soft(&self) -> f32 {
        match self {
            Thresholds::Single { soft, .. } | Thresholds::Dual { soft, .. } => *soft,
        }
    }
}

/// Where candidate vectors come from at query time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingStrategy {
    /// Re-embed only the scope-filtered rows for every query.
    PerQuery,
    /// Reuse the whole-dataset index built on reload.
    WholeIndex,
}

/// Which column identifies a row when merging old and new data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeKey {
    NormalizedKeyword,
    SourceRecordId,
}

/// A filterable dimension and the dataset column that holds it.
#[derive(Clone, Debug)]
pub struct ScopeDimension {
    pub name: &'static str,
    pub column: &'static str,
    /// Upstream linked-record field resolved into this column on ingestion.
    pub upstream_field: &'static str,
    /// A blank filter value selects every row instead of rows with a blank
    /// value.
    pub blank_matches_all: bool,
}

/// Dataset column names. `None` means the profile has no such column.
#[derive(Clone, Debug)]
pub struct Schema {
    pub record_id: &'static str,
    pub qualifier: Option<&'static str>,
    pub keyword: &'static str,
    pub display_keyword: Option<&'static str>,
    pub target_url: &'static str,
    pub period_label: Option<&'static str>,
    pub content_type: Option<&'static str>,
    pub annotation: Option<&'static str>,
    pub last_modified: Option<&'static str>,
    pub required: &'static [&'static str],
}

/// Upstream field names read by the ingestion allow-list.
#[derive(Clone, Debug)]
pub struct SourceFields {
    /// Raw keyword, possibly `<qualifier><separator><keyword>`.
    pub keyword: &'static str,
    pub target_url: &'static str,
    pub period_label: Option<&'static str>,
    pub content_type: Option<&'static str>,
    pub annotation: Option<&'static str>,
    pub last_modified: Option<&'static str>,
}

#[derive(Clone, Debug)]
pub struct Profile {
    pub kind: ProfileKind,
    pub schema: Schema,
    pub source: SourceFields,
    pub scopes: Vec<ScopeDimension>,
    pub normalization: Normalization,
    /// Scope column values go through `normalization` as well.
    pub normalize_scopes: bool,
    pub thresholds: Thresholds,
    pub strategy: EmbeddingStrategy,
    /// Queries without a literal dataset row are rejected.
    pub require_exact_match: bool,
    /// Keep only rows whose content type equals this value.
    pub content_type_filter: Option<&'static str>,
    pub separator: Option<char>,
    pub merge_key: MergeKey,
    /// Scope reported alongside results, taken from the top-ranked neighbor.
    pub result_category: Option<&'static str>,
}

const CLIENT_REQUIRED: &[&str] = &["Keyword Name", "SEO Name", "Project Name", "Keyword"];
const DIRECTORY_REQUIRED: &[&str] = &["Main Keyword", "🔗 Keyword Link", "Categories", "Website"];

impl Profile {
    pub fn for_kind(kind: ProfileKind) -> Self {
        match kind {
            ProfileKind::Client => Self::client(),
            ProfileKind::Directory => Self::directory(),
        }
    }

    pub fn client() -> Self {
        Profile {
            kind: ProfileKind::Client,
            schema: Schema {
                record_id: "id",
                qualifier: Some("Blog Name"),
                keyword: "Keyword Name",
                display_keyword: Some("Keyword"),
                target_url: "url",
                period_label: Some("Month"),
                content_type: Some("Content Type"),
                annotation: Some("Internal Link / External Link"),
                last_modified: None,
                required: CLIENT_REQUIRED,
            },
            source: SourceFields {
                keyword: "Keyword",
                target_url: "url",
                period_label: Some("Month"),
                content_type: Some("Content Type"),
                annotation: Some("Internal Link / External Link"),
                last_modified: None,
            },
            scopes: vec![
                ScopeDimension {
                    name: "seo",
                    column: "SEO Name",
                    upstream_field: "SEO",
                    blank_matches_all: false,
                },
                ScopeDimension {
                    name: "project",
                    column: "Project Name",
                    upstream_field: "Project",
                    blank_matches_all: true,
                },
            ],
            normalization: Normalization::Whitespace,
            normalize_scopes: false,
            thresholds: Thresholds::Single {
                soft: 0.1,
                max_output: 10,
            },
            strategy: EmbeddingStrategy::PerQuery,
            require_exact_match: true,
            content_type_filter: Some("On Page"),
            separator: Some('-'),
            merge_key: MergeKey::NormalizedKeyword,
            result_category: None,
        }
    }

    pub fn directory() -> Self {
        Profile {
            kind: ProfileKind::Directory,
            schema: Schema {
                record_id: "record_id",
                qualifier: None,
                keyword: "Main Keyword",
                display_keyword: None,
                target_url: "🔗 Keyword Link",
                period_label: None,
                content_type: None,
                annotation: None,
                last_modified: Some("Last Modified"),
                required: DIRECTORY_REQUIRED,
            },
            source: SourceFields {
                keyword: "Main Keyword",
                target_url: "🔗 Keyword Link",
                period_label: None,
                content_type: None,
                annotation: None,
                last_modified: Some("Last Modified"),
            },
            scopes: vec![
                ScopeDimension {
                    name: "website",
                    column: "Website",
                    upstream_field: "Website",
                    blank_matches_all: true,
                },
                ScopeDimension {
                    name: "category",
                    column: "Categories",
                    upstream_field: "Categories",
                    blank_matches_all: true,
                },
            ],
            normalization: Normalization::StripPunctuation,
            normalize_scopes: true,
            thresholds: Thresholds::Dual {
                hard: 0.75,
                soft: 0.50,
                top_limit: 20,
            },
            strategy: EmbeddingStrategy::WholeIndex,
            require_exact_match: false,
            content_type_filter: None,
            separator: None,
            merge_key: MergeKey::SourceRecordId,
            result_category: Some("category"),
        }
    }

    pub fn normalize(&self, text: &str) -> String {
        self.normalization.apply(text)
    }

    pub fn normalize_scope(&self, value: &str) -> String {
        if self.normalize_scopes {
            self.normalization.apply(value)
        } else {
            value.trim().to_string()
        }
    }

    pub fn scope(&self, name: &str) -> Option<(usize, &ScopeDimension)> {
        self.scopes
            .iter()
            .enumerate()
            .find(|(_, dim)| dim.name == name)
    }

    /// Dataset header in write order, paired with the record field each
    /// column carries.
    pub fn layout(&self) -> Vec<(&'static str, Field)> {
        let schema = &self.schema;
        let mut layout = vec![];
        layout.extend(schema.qualifier.map(|c| (c, Field::Qualifier)));
        layout.push((schema.keyword, Field::Keyword));
        layout.extend(
            self.scopes
                .iter()
                .enumerate()
                .map(|(idx, dim)| (dim.column, Field::Scope(idx))),
        );
        layout.extend(schema.display_keyword.map(|c| (c, Field::DisplayKeyword)));
        layout.push((schema.target_url, Field::TargetUrl));
        layout.extend(schema.period_label.map(|c| (c, Field::PeriodLabel)));
        layout.extend(schema.content_type.map(|c| (c, Field::ContentType)));
        layout.extend(schema.annotation.map(|c| (c, Field::Annotation)));
        layout.extend(schema.last_modified.map(|c| (c, Field::LastModified)));
        layout.push((schema.record_id, Field::RecordId));
        layout
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    Qualifier,
    Keyword,
    Scope(usize),
    DisplayKeyword,
    TargetUrl,
    PeriodLabel,
    ContentType,
    Annotation,
    LastModified,
    RecordId,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(profile: &Profile) -> Vec<&'static str> {
        profile.layout().into_iter().map(|(column, _)| column).collect()
    }

    #[test]
    fn test_columns_are_unique() {
        for profile in [Profile::client(), Profile::directory()] {
            let columns = columns(&profile);
            let mut seen = std::collections::HashSet::new();
            for column in &columns {
                assert!(seen.insert(*column), "duplicate column {column}");
            }
            for required in profile.schema.required {
                assert!(columns.contains(required), "{required} not written");
            }
        }
    }

    #[test]
    fn test_client_columns_lead_with_decomposed_keyword() {
        let columns = columns(&Profile::client());
        assert_eq!(
            &columns[..4],
            &["Blog Name", "Keyword Name", "SEO Name", "Project Name"]
        );
    }

    #[test]
    fn test_scope_lookup() {
        let profile = Profile::directory();
        let (idx, dim) = profile.scope("category").unwrap();
        assert_eq!(idx, 1);
        assert_eq!(dim.column, "Categories");
        assert!(profile.scope("seo").is_none());
    }

    #[test]
    fn test_directory_scope_values_are_normalized() {
        let profile = Profile::directory();
        assert_eq!(profile.normalize_scope(" https://Blog.Example.com/ "), "blog.example.com");

        let profile = Profile::client();
        assert_eq!(profile.normalize_scope("  Team A "), "Team A");
    }
}
