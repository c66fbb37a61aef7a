use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::{dataset::Snapshot, errors::MatchError, profile::Profile};

/// Scope dimension name to required value. A blank value selects all rows
/// for dimensions that allow it.
pub type ScopeFilters = BTreeMap<String, String>;

/// Values available for populating filter choices.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScopeListing {
    /// Sorted unique values per dimension.
    pub dimensions: BTreeMap<String, Vec<String>>,
    /// First dimension value to the sorted values of the second dimension
    /// found alongside it. Empty for single-dimension profiles.
    pub tree: BTreeMap<String, Vec<String>>,
}

/// Turn named filters into `(dimension index, normalized value)` pairs.
pub fn resolve(profile: &Profile, filters: &ScopeFilters) -> Result<Vec<(usize, String)>, MatchError> {
    let mut resolved = vec![];
    for (name, value) in filters {
        let (idx, dim) = profile
            .scope(name)
            .ok_or_else(|| MatchError::UnknownScope(name.clone()))?;

        let value = profile.normalize_scope(value);
        if value.is_empty() && dim.blank_matches_all {
            continue;
        }
        resolved.push((idx, value));
    }
    Ok(resolved)
}

/// Row positions matching every resolved filter, in dataset order.
pub fn positions(snapshot: &Snapshot, resolved: &[(usize, String)]) -> Vec<usize> {
    snapshot
        .records
        .iter()
        .enumerate()
        .filter(|(_, record)| {
            resolved
                .iter()
                .all(|(idx, value)| record.scope(*idx) == value)
        })
        .map(|(pos, _)| pos)
        .collect()
}

pub fn values(
    snapshot: &Snapshot,
    profile: &Profile,
    dimension: &str,
    within: &ScopeFilters,
) -> Result<Vec<String>, MatchError> {
    let (idx, _) = profile
        .scope(dimension)
        .ok_or_else(|| MatchError::UnknownScope(dimension.to_string()))?;
    let resolved = resolve(profile, within)?;

    let values: BTreeSet<&str> = positions(snapshot, &resolved)
        .into_iter()
        .map(|pos| snapshot.records[pos].scope(idx))
        .filter(|value| !value.is_empty())
        .collect();

    Ok(values.into_iter().map(str::to_string).collect())
}

pub fn listing(snapshot: &Snapshot, profile: &Profile) -> ScopeListing {
    let mut dimensions: BTreeMap<String, BTreeSet<&str>> = BTreeMap::new();
    let mut tree: BTreeMap<String, BTreeSet<&str>> = BTreeMap::new();

    for record in &snapshot.records {
        for (idx, dim) in profile.scopes.iter().enumerate() {
            dimensions
                .entry(dim.name.to_string())
                .or_default()
                .insert(record.scope(idx));
        }

        if profile.scopes.len() > 1 {
            tree.entry(record.scope(0).to_string())
                .or_default()
                .insert(record.scope(1));
        }
    }

    ScopeListing {
        dimensions: dimensions
            .into_iter()
            .map(|(name, set)| (name, set.into_iter().map(str::to_string).collect()))
            .collect(),
        tree: tree
            .into_iter()
            .map(|(parent, set)| (parent, set.into_iter().map(str::to_string).collect()))
            .collect(),
    }
}
