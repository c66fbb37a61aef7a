//! Keyword similarity matching.
//!
//! One call answers two questions about a query: which dataset row is this
//! exact keyword (if any), and which other keywords in the same scope are
//! semantically close to it.

mod links;
mod scopes;

pub use links::{extract_links, Link};
pub use scopes::{ScopeFilters, ScopeListing};

use std::{collections::BTreeMap, collections::HashSet, sync::Arc};

use serde::Serialize;

use crate::{
    dataset::{DatasetStore, Record, Snapshot},
    errors::MatchError,
    profile::{EmbeddingStrategy, Profile, Thresholds},
    semantic::{score_vectors, EmbeddingError},
};

/// Metadata of the dataset row whose normalized keyword equals the query.
#[derive(Debug, Clone, Serialize)]
pub struct ExactMatch {
    pub keyword: String,
    pub display_keyword: String,
    pub qualifier: String,
    pub target_url: String,
    pub period_label: String,
    pub scopes: BTreeMap<String, String>,
    pub links: Vec<Link>,
    pub raw_annotation_text: String,
}

impl ExactMatch {
    fn from_record(record: &Record, profile: &Profile) -> Self {
        ExactMatch {
            keyword: record.normalized_keyword.clone(),
            display_keyword: record.display_keyword.clone(),
            qualifier: record.qualifier.clone(),
            target_url: record.target_url.clone(),
            period_label: record.period_label.clone(),
            scopes: profile
                .scopes
                .iter()
                .enumerate()
                .map(|(idx, dim)| (dim.name.to_string(), record.scope(idx).to_string()))
                .collect(),
            links: extract_links(&record.annotation_text),
            raw_annotation_text: record.annotation_text.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Neighbor {
    pub keyword: String,
    pub display_keyword: String,
    pub target_url: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub input: String,
    pub normalized: String,
    pub exact: Option<ExactMatch>,
    /// Single-threshold profiles put every result here.
    pub matched: Vec<Neighbor>,
    pub suggested: Vec<Neighbor>,
    pub category: Option<String>,
}

pub struct SimilarityMatcher {
    store: Arc<DatasetStore>,
}

impl SimilarityMatcher {
    pub fn new(store: Arc<DatasetStore>) -> Self {
        Self { store }
    }

    pub fn match_keyword(
        &self,
        query: &str,
        filters: &ScopeFilters,
    ) -> Result<MatchResult, MatchError> {
        let snapshot = self.store.current();
        let profile = self.store.profile().as_ref();

        let normalized = profile.normalize(query);
        log::info!("search input '{query}' -> normalized '{normalized}', scope {filters:?}");
        if normalized.is_empty() {
            return Err(MatchError::EmptyQuery);
        }

        let resolved = scopes::resolve(profile, filters)?;
        let positions = scopes::positions(&snapshot, &resolved);
        log::debug!("{} rows in scope", positions.len());
        if positions.is_empty() {
            return Err(MatchError::ScopeEmpty);
        }

        let exact = positions
            .iter()
            .map(|&pos| &snapshot.records[pos])
            .find(|record| record.normalized_keyword == normalized)
            .map(|record| ExactMatch::from_record(record, profile));

        if exact.is_none() && profile.require_exact_match {
            log::info!("no dataset row for '{normalized}' in scope");
            return Err(MatchError::KeywordNotFound);
        }

        let scores = self.score(&snapshot, &positions, &normalized)?;
        let ranked = rank(&snapshot, &positions, &scores, &normalized);
        let (matched, suggested) = bucket(ranked, &profile.thresholds);

        if matched.is_empty() && suggested.is_empty() {
            return Err(MatchError::NoSimilar {
                exact: exact.map(Box::new),
            });
        }

        let category = profile.result_category.and_then(|name| {
            let (idx, _) = profile.scope(name)?;
            let first = matched.first().or(suggested.first())?;
            Some(snapshot.records[first.position].scope(idx).to_string())
        });

        Ok(MatchResult {
            input: query.to_string(),
            normalized,
            exact,
            matched: matched.iter().map(|r| r.to_neighbor(&snapshot)).collect(),
            suggested: suggested.iter().map(|r| r.to_neighbor(&snapshot)).collect(),
            category,
        })
    }

    pub fn list_scopes(&self) -> ScopeListing {
        let snapshot = self.store.current();
        scopes::listing(&snapshot, self.store.profile())
    }

    /// Sorted values of `dimension` among rows matching `within`.
    pub fn scope_values(
        &self,
        dimension: &str,
        within: &ScopeFilters,
    ) -> Result<Vec<String>, MatchError> {
        let snapshot = self.store.current();
        scopes::values(&snapshot, self.store.profile(), dimension, within)
    }

    /// Cosine score per position, in `positions` order.
    fn score(
        &self,
        snapshot: &Snapshot,
        positions: &[usize],
        normalized: &str,
    ) -> Result<Vec<f32>, MatchError> {
        let provider = self.store.provider();

        match self.store.profile().strategy {
            EmbeddingStrategy::WholeIndex => {
                let query = provider.embed(normalized)?;
                Ok(snapshot.index.score(&query, positions))
            }
            EmbeddingStrategy::PerQuery => {
                // query first, then the scoped keywords, in one batch
                let mut texts = Vec::with_capacity(positions.len() + 1);
                texts.push(normalized.to_string());
                texts.extend(
                    positions
                        .iter()
                        .map(|&pos| snapshot.records[pos].normalized_keyword.clone()),
                );

                let mut vectors = provider.embed_batch(&texts)?;
                if vectors.len() != texts.len() {
                    return Err(MatchError::Embedding(EmbeddingError::EmbeddingFailed(
                        format!(
                            "expected {} vectors, provider returned {}",
                            texts.len(),
                            vectors.len()
                        ),
                    )));
                }
                let query = vectors.remove(0);
                Ok(score_vectors(&query, &vectors))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Ranked {
    position: usize,
    score: f32,
}

impl Ranked {
    fn to_neighbor(&self, snapshot: &Snapshot) -> Neighbor {
        let record = &snapshot.records[self.position];
        Neighbor {
            keyword: record.normalized_keyword.clone(),
            display_keyword: record.display_keyword.clone(),
            target_url: record.target_url.clone(),
            score: self.score,
        }
    }
}

/// Drop the query itself, sort by score descending with ties kept in
/// dataset order, and keep only the first row for each keyword.
fn rank(snapshot: &Snapshot, positions: &[usize], scores: &[f32], normalized: &str) -> Vec<Ranked> {
    let mut ranked: Vec<Ranked> = positions
        .iter()
        .zip(scores)
        .map(|(&position, &score)| Ranked { position, score })
        .filter(|r| snapshot.records[r.position].normalized_keyword != normalized)
        .collect();

    // sort_by is stable
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut seen = HashSet::new();
    ranked.retain(|r| seen.insert(snapshot.records[r.position].normalized_keyword.as_str()));
    ranked
}

fn bucket(ranked: Vec<Ranked>, thresholds: &Thresholds) -> (Vec<Ranked>, Vec<Ranked>) {
    match *thresholds {
        Thresholds::Single { soft, max_output } => {
            let matched = ranked
                .into_iter()
                .filter(|r| r.score >= soft)
                .take(max_output)
                .collect();
            (matched, vec![])
        }
        Thresholds::Dual {
            hard,
            soft,
            top_limit,
        } => {
            let (matched, rest): (Vec<Ranked>, Vec<Ranked>) =
                ranked.into_iter().partition(|r| r.score >= hard);
            let matched: Vec<Ranked> = matched.into_iter().take(top_limit).collect();
            let suggested = rest
                .into_iter()
                .filter(|r| r.score >= soft)
                .take(top_limit - matched.len())
                .collect();
            (matched, suggested)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(scores: &[f32]) -> Vec<Ranked> {
        scores
            .iter()
            .enumerate()
            .map(|(position, &score)| Ranked { position, score })
            .collect()
    }

    #[test]
    fn test_single_bucket_truncates() {
        let thresholds = Thresholds::Single {
            soft: 0.3,
            max_output: 2,
        };
        let (matched, suggested) = bucket(ranked(&[0.9, 0.8, 0.7, 0.2]), &thresholds);

        assert_eq!(matched.iter().map(|r| r.position).collect::<Vec<_>>(), vec![0, 1]);
        assert!(suggested.is_empty());
    }

    #[test]
    fn test_dual_buckets_do_not_overlap() {
        let thresholds = Thresholds::Dual {
            hard: 0.75,
            soft: 0.5,
            top_limit: 10,
        };
        let (matched, suggested) =
            bucket(ranked(&[0.95, 0.75, 0.74, 0.5, 0.49]), &thresholds);

        assert_eq!(matched.iter().map(|r| r.position).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(suggested.iter().map(|r| r.position).collect::<Vec<_>>(), vec![2, 3]);
        assert!(matched.iter().all(|r| r.score >= 0.75));
        assert!(suggested.iter().all(|r| r.score >= 0.5 && r.score < 0.75));
    }

    #[test]
    fn test_dual_backfill_respects_top_limit() {
        let thresholds = Thresholds::Dual {
            hard: 0.8,
            soft: 0.1,
            top_limit: 3,
        };
        let (matched, suggested) = bucket(ranked(&[0.9, 0.85, 0.5, 0.4, 0.3]), &thresholds);
        assert_eq!(matched.len(), 2);
        assert_eq!(suggested.len(), 1);
        assert_eq!(suggested[0].position, 2);

        let (matched, suggested) =
            bucket(ranked(&[0.99, 0.98, 0.97, 0.96, 0.5]), &thresholds);
        assert_eq!(matched.len(), 3);
        assert!(suggested.is_empty());
    }
}
