//! Paginated upstream record source.

use std::{collections::HashMap, thread, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    config::{LookupTable, UpstreamConfig},
    errors::UpstreamError,
};

/// One upstream record: an id and a loosely typed field map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamRecord {
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    records: Vec<UpstreamRecord>,
    #[serde(default)]
    offset: Option<String>,
}

/// Linked-record id to display name, per upstream field.
#[derive(Debug, Clone, Default)]
pub struct LookupTables {
    tables: HashMap<String, HashMap<String, String>>,
}

impl LookupTables {
    pub fn insert(&mut self, field: &str, names: HashMap<String, String>) {
        self.tables.insert(field.to_string(), names);
    }

    /// Display name for `id` linked through `field`, or `Unknown (<id>)`.
    pub fn resolve(&self, field: &str, id: &str) -> String {
        self.tables
            .get(field)
            .and_then(|names| names.get(id))
            .cloned()
            .unwrap_or_else(|| format!("Unknown ({id})"))
    }
}

pub trait RecordSource: Send + Sync {
    /// Fetch every page of `table`. With `modified_after`, only records whose
    /// last-modified field is newer are requested.
    fn fetch_all(
        &self,
        table: &str,
        modified_after: Option<&str>,
    ) -> Result<Vec<UpstreamRecord>, UpstreamError>;
}

/// Build id to name maps for every configured lookup table.
pub fn fetch_lookups(
    source: &dyn RecordSource,
    lookups: &[LookupTable],
) -> Result<LookupTables, UpstreamError> {
    let mut tables = LookupTables::default();

    for lookup in lookups {
        let records = source.fetch_all(&lookup.table, None)?;
        let name_field = match &lookup.name_field {
            Some(name) => name.clone(),
            None => detect_name_field(&records)
                .ok_or_else(|| UpstreamError::EmptyLookup(lookup.table.clone()))?,
        };
        log::info!(
            "lookup {} resolves '{}' through field '{name_field}' ({} records)",
            mask_id(&lookup.table),
            lookup.field,
            records.len()
        );

        let names = records
            .iter()
            .map(|record| {
                let name = record
                    .fields
                    .get(&name_field)
                    .and_then(value_to_string)
                    .unwrap_or_else(|| format!("Unknown ({})", record.id));
                (record.id.clone(), name)
            })
            .collect();
        tables.insert(&lookup.field, names);
    }

    Ok(tables)
}

/// First field of the first record, in the order the upstream sent it.
fn detect_name_field(records: &[UpstreamRecord]) -> Option<String> {
    records.first()?.fields.keys().next().cloned()
}

/// Render a scalar field value as text. Arrays and objects yield `None`.
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Show only the first characters of an upstream identifier.
pub fn mask_id(value: &str) -> String {
    const VISIBLE: usize = 6;
    if value.chars().count() <= VISIBLE {
        return value.to_string();
    }
    format!("{}***", value.chars().take(VISIBLE).collect::<String>())
}

pub struct HttpRecordSource {
    client: reqwest::blocking::Client,
    config: UpstreamConfig,
    token: String,
    /// Table whose records carry the last-modified field.
    main_table: String,
    last_modified_field: Option<String>,
}

impl HttpRecordSource {
    pub fn new(
        config: &UpstreamConfig,
        last_modified_field: Option<&str>,
    ) -> Result<Self, UpstreamError> {
        let token = std::env::var(&config.token_env)
            .map_err(|_| UpstreamError::MissingToken(config.token_env.clone()))?;

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|source| UpstreamError::Transport {
                table: String::new(),
                source,
            })?;

        Ok(Self {
            client,
            config: config.clone(),
            token,
            main_table: config.main_table.clone(),
            last_modified_field: last_modified_field.map(str::to_string),
        })
    }

    fn fetch_page(
        &self,
        table: &str,
        offset: Option<&str>,
        modified_after: Option<&str>,
    ) -> Result<Page, UpstreamError> {
        let url = format!(
            "{}/{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.base_id,
            table
        );

        let mut params = vec![("pageSize".to_string(), self.config.page_size.to_string())];
        if let Some(offset) = offset {
            params.push(("offset".to_string(), offset.to_string()));
        }
        if let (Some(after), Some(field), true) = (
            modified_after,
            &self.last_modified_field,
            table == self.main_table,
        ) {
            params.push((
                "filterByFormula".to_string(),
                format!("IS_AFTER({{{field}}}, '{after}')"),
            ));
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .client
                .get(&url)
                .bearer_auth(&self.token)
                .query(&params)
                .send();

            let retryable = match result {
                Ok(response) if response.status().is_success() => {
                    return response.json::<Page>().map_err(|err| UpstreamError::Decode {
                        table: mask_id(table),
                        detail: err.to_string(),
                    });
                }
                Ok(response) => {
                    let status = response.status();
                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if !retryable || attempt > self.config.max_retries {
                        return Err(UpstreamError::Status {
                            table: mask_id(table),
                            status: status.as_u16(),
                            body: response.text().unwrap_or_default(),
                        });
                    }
                    format!("status {status}")
                }
                Err(source) => {
                    if attempt > self.config.max_retries {
                        return Err(UpstreamError::Transport {
                            table: mask_id(table),
                            source,
                        });
                    }
                    source.to_string()
                }
            };

            let backoff = Duration::from_millis(self.config.retry_backoff_ms * attempt as u64);
            log::warn!(
                "fetching {} failed ({retryable}), retry {attempt}/{} in {}ms",
                mask_id(table),
                self.config.max_retries,
                backoff.as_millis()
            );
            thread::sleep(backoff);
        }
    }
}

impl RecordSource for HttpRecordSource {
    fn fetch_all(
        &self,
        table: &str,
        modified_after: Option<&str>,
    ) -> Result<Vec<UpstreamRecord>, UpstreamError> {
        log::info!("fetching records from {}", mask_id(table));

        let mut records = vec![];
        let mut offset: Option<String> = None;
        loop {
            let page = self.fetch_page(table, offset.as_deref(), modified_after)?;
            records.extend(page.records);

            match page.offset {
                Some(next) if !next.is_empty() => offset = Some(next),
                _ => break,
            }
        }

        log::info!("fetched {} records from {}", records.len(), mask_id(table));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct Tables(HashMap<String, Vec<UpstreamRecord>>, Mutex<Vec<String>>);

    impl RecordSource for Tables {
        fn fetch_all(
            &self,
            table: &str,
            _modified_after: Option<&str>,
        ) -> Result<Vec<UpstreamRecord>, UpstreamError> {
            self.1.lock().unwrap().push(table.to_string());
            Ok(self.0.get(table).cloned().unwrap_or_default())
        }
    }

    fn record(id: &str, fields: Value) -> UpstreamRecord {
        UpstreamRecord {
            id: id.to_string(),
            fields: fields.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_lookup_with_configured_and_detected_fields() {
        let mut tables = HashMap::new();
        tables.insert(
            "seo_team".to_string(),
            vec![
                record("recS1", json!({"Name": "Team A", "Email": "a@x"})),
                record("recS2", json!({"Email": "b@x"})),
            ],
        );
        tables.insert("Website".to_string(), vec![record("recW1", json!({"Site": "blog.example.com"}))]);
        let source = Tables(tables, Mutex::new(vec![]));

        let lookups = vec![
            LookupTable {
                field: "SEO".into(),
                table: "seo_team".into(),
                name_field: Some("Name".into()),
            },
            LookupTable {
                field: "Website".into(),
                table: "Website".into(),
                name_field: None,
            },
        ];

        let resolved = fetch_lookups(&source, &lookups).unwrap();
        assert_eq!(resolved.resolve("SEO", "recS1"), "Team A");
        assert_eq!(resolved.resolve("SEO", "recS2"), "Unknown (recS2)");
        assert_eq!(resolved.resolve("SEO", "recS9"), "Unknown (recS9)");
        assert_eq!(resolved.resolve("Website", "recW1"), "blog.example.com");
    }

    #[test]
    fn test_detected_name_field_follows_payload_order() {
        let page: Vec<UpstreamRecord> = serde_json::from_str(
            r#"[{"id": "recW1", "fields": {"Name": "blog.example.com", "Description": "my blog"}}]"#,
        )
        .unwrap();
        let mut tables = HashMap::new();
        tables.insert("Website".to_string(), page);
        let source = Tables(tables, Mutex::new(vec![]));

        let lookups = vec![LookupTable {
            field: "Website".into(),
            table: "Website".into(),
            name_field: None,
        }];

        let resolved = fetch_lookups(&source, &lookups).unwrap();
        assert_eq!(resolved.resolve("Website", "recW1"), "blog.example.com");
    }

    #[test]
    fn test_empty_lookup_without_name_field_fails() {
        let source = Tables(HashMap::new(), Mutex::new(vec![]));
        let lookups = vec![LookupTable {
            field: "Categories".into(),
            table: "Categories".into(),
            name_field: None,
        }];

        let err = fetch_lookups(&source, &lookups).unwrap_err();
        assert!(matches!(err, UpstreamError::EmptyLookup(t) if t == "Categories"));
    }

    #[test]
    fn test_mask_id() {
        assert_eq!(mask_id("tblEZLLELhP9q5QLH"), "tblEZL***");
        assert_eq!(mask_id("short"), "short");
    }

    #[test]
    fn test_value_to_string() {
        assert_eq!(value_to_string(&json!("x")), Some("x".into()));
        assert_eq!(value_to_string(&json!(3)), Some("3".into()));
        assert_eq!(value_to_string(&json!(["a"])), None);
    }
}
