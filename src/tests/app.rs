use std::sync::Arc;

use serde_json::json;

use super::support::{client_vocabulary, touch_ahead, CLIENT_DATASET};
use crate::{
    app::App,
    config::Config,
    errors::MatchError,
    ingest::UpstreamRecord,
    matcher::ScopeFilters,
};

/// App over a temp base directory with a deterministic provider and no
/// upstream source.
fn create_app() -> (App, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let config = Config::load_with(tmp.path()).expect("failed to load config");

    let app = App::with_parts(
        &config,
        config.build_profile(),
        Arc::new(client_vocabulary()),
        Err("no upstream in tests".to_string()),
    );
    (app, tmp)
}

fn team_a() -> ScopeFilters {
    [("seo".to_string(), "Team A".to_string())].into_iter().collect()
}

#[test]
fn test_health_before_any_data() {
    let (app, _tmp) = create_app();

    let health = app.health();
    assert_eq!(health.store.records, 0);
    assert!(health.store.last_error.is_some());
    assert!(!health.degraded);
    assert_eq!(health.model, "bag-of-words");
}

#[test]
fn test_ingested_records_are_searchable() {
    let (app, _tmp) = create_app();

    let records: Vec<UpstreamRecord> = serde_json::from_value(json!([
        {"id": "rec1", "fields": {"Keyword": "BlogA - cheap flights", "url": "https://a/1", "SEO": "Team A", "Project": "Travel", "Content Type": "On Page"}},
        {"id": "rec2", "fields": {"Keyword": "cheap deals", "url": "https://a/2", "SEO": "Team A", "Project": "Travel", "Content Type": "On Page"}}
    ]))
    .unwrap();

    let report = app.ingest_records(&records).unwrap();
    assert_eq!(report.total, 2);

    let result = app.search("cheap flights", &team_a()).unwrap();
    assert_eq!(result.exact.unwrap().qualifier, "BlogA");
    assert_eq!(result.matched[0].keyword, "cheap deals");

    let health = app.health();
    assert_eq!(health.store.records, 2);
    assert_eq!(health.store.generation, 1);
    assert!(health.store.last_error.is_none());
}

#[test]
fn test_search_sees_replaced_dataset() {
    let (app, tmp) = create_app();
    let path = tmp.path().join("dataset.csv");

    std::fs::write(&path, CLIENT_DATASET).unwrap();
    touch_ahead(&path, 10);
    assert!(matches!(
        app.search("cheap cruises", &team_a()),
        Err(MatchError::KeywordNotFound)
    ));

    let replaced = CLIENT_DATASET.replace("Off Page", "On Page");
    std::fs::write(&path, replaced).unwrap();
    touch_ahead(&path, 20);

    let result = app.search("cheap cruises", &team_a()).unwrap();
    assert_eq!(result.exact.unwrap().target_url, "https://a/5");
}

#[test]
fn test_scopes_listing() {
    let (app, tmp) = create_app();
    std::fs::write(tmp.path().join("dataset.csv"), CLIENT_DATASET).unwrap();

    let listing = app.scopes();
    assert_eq!(listing.dimensions["seo"], vec!["Team A", "Team B"]);
    assert_eq!(listing.tree["Team A"], vec!["Hotels", "Travel"]);

    let projects = app.scope_values("project", &team_a()).unwrap();
    assert_eq!(projects, vec!["Hotels", "Travel"]);
}

#[test]
fn test_sync_without_upstream_is_rejected() {
    let (app, _tmp) = create_app();
    assert!(app.sync(false).is_err());
}
