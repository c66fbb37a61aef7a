//! Deterministic vector providers and fixtures shared by the scenario tests.

use std::{
    collections::HashMap,
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
    time::{Duration, SystemTime},
};

use crate::semantic::{EmbeddingError, VectorProvider};

/// Counts each vocabulary word in the text. Texts sharing no vocabulary
/// word score 0 against each other.
pub struct BagOfWords {
    vocabulary: Vec<&'static str>,
    pub calls: AtomicUsize,
}

impl BagOfWords {
    pub fn new(vocabulary: &[&'static str]) -> Self {
        Self {
            vocabulary: vocabulary.to_vec(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0; self.vocabulary.len()];
        for token in text.split_whitespace() {
            if let Some(idx) = self.vocabulary.iter().position(|w| *w == token) {
                v[idx] += 1.0;
            }
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

impl VectorProvider for BagOfWords {
    fn name(&self) -> &str {
        "bag-of-words"
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// Explicit text to vector table. Unknown texts map to the zero vector.
pub struct Table {
    vectors: HashMap<String, Vec<f32>>,
    dimensions: usize,
    pub calls: AtomicUsize,
}

impl Table {
    pub fn new(entries: &[(&str, Vec<f32>)]) -> Self {
        let dimensions = entries.first().map(|(_, v)| v.len()).unwrap_or(1);
        Self {
            vectors: entries
                .iter()
                .map(|(text, v)| (text.to_string(), v.clone()))
                .collect(),
            dimensions,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl VectorProvider for Table {
    fn name(&self) -> &str {
        "table"
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                self.vectors
                    .get(t)
                    .cloned()
                    .unwrap_or_else(|| vec![0.0; self.dimensions])
            })
            .collect())
    }
}

/// A provider that always fails, for degraded-model scenarios.
pub struct Broken;

impl VectorProvider for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::EmbeddingFailed("model unavailable".to_string()))
    }
}

pub const CLIENT_HEADER: &str = "Blog Name,Keyword Name,SEO Name,Project Name,Keyword,url,Month,Content Type,Internal Link / External Link,id";

pub const CLIENT_DATASET: &str = "\
Blog Name,Keyword Name,SEO Name,Project Name,Keyword,url,Month,Content Type,Internal Link / External Link,id
BlogA,cheap flights,Team A,Travel,BlogA - cheap flights,https://a/1,Jan,On Page,\"[Home](https://a/) and [Deals](https://a/deals)\",rec1
,cheap deals,Team A,Travel,cheap deals,https://a/2,Jan,On Page,,rec2
,hotel booking,Team A,Travel,hotel booking,https://a/3,Feb,On Page,,rec3
,cheap tickets,Team A,Hotels,cheap tickets,https://a/4,,On Page,,rec4
,cheap airfare,Team B,Travel,cheap airfare,https://b/1,,On Page,,rec5
,cheap cruises,Team A,Travel,cheap cruises,https://a/5,,Off Page,,rec6
";

pub fn client_vocabulary() -> BagOfWords {
    BagOfWords::new(&[
        "cheap", "flights", "deals", "hotel", "booking", "tickets", "airfare", "cruises",
    ])
}

pub const DIRECTORY_DATASET: &str = "\
record_id,Main Keyword,Website,Categories,🔗 Keyword Link,Last Modified
r1,SEO Tools,https://Blog.A.com,Marketing,https://a/seo-tools,2024-05-01T10:00:00.000Z
r2,SEO Software,blog.a.com,Marketing,https://a/seo-software,2024-05-01T10:00:00.000Z
r3,Keyword Research,blog.a.com,Marketing,https://a/keyword-research,2024-05-01T10:00:00.000Z
r4,Baking Bread,blog.a.com,Food,https://a/bread,2024-05-01T10:00:00.000Z
r5,SEO Tools,blog.b.com,Tech,https://b/seo-tools,2024-05-01T10:00:00.000Z
";

/// Fixed vectors for the directory dataset: against "seo tools", "seo
/// software" scores 0.9, "keyword research" 0.6 and "baking bread" 0.
pub fn directory_vectors() -> Table {
    Table::new(&[
        ("seo tools", vec![1.0, 0.0, 0.0]),
        ("seo software", vec![0.9, (1.0f32 - 0.81).sqrt(), 0.0]),
        ("keyword research", vec![0.6, 0.8, 0.0]),
        ("baking bread", vec![0.0, 0.0, 1.0]),
    ])
}

/// Set the file's mtime `secs` seconds into the future, so reload detection
/// does not depend on filesystem timestamp granularity.
pub fn touch_ahead(path: &Path, secs: u64) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(secs))
        .unwrap();
}
