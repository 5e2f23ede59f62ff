//! External template lookup for unresolved references
//!
//! Backed by the DuckDuckGo instant-answer JSON endpoint. Failures are
//! reported as `WebSearchError` and swallowed to empty lists at call
//! sites; a dead search backend never blocks an analysis run.

use async_trait::async_trait;
use docsense_common::{AppError, Result};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, serde::Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>>;
}

/// Instant-answer client
pub struct DuckDuckGoSearch {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct InstantAnswer {
    #[serde(rename = "RelatedTopics", default)]
    related_topics: Vec<RelatedTopic>,
}

#[derive(Deserialize)]
struct RelatedTopic {
    #[serde(rename = "FirstURL", default)]
    first_url: Option<String>,
    #[serde(rename = "Text", default)]
    text: Option<String>,
}

impl DuckDuckGoSearch {
    pub fn new() -> Result<Self> {
        Self::with_base_url("https://api.duckduckgo.com")
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::WebSearchError {
                message: format!("failed to build search client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl WebSearch for DuckDuckGoSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("q", query), ("format", "json"), ("no_html", "1")])
            .send()
            .await
            .map_err(|e| AppError::WebSearchError {
                message: format!("search request failed: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(AppError::WebSearchError {
                message: format!("search returned status {}", response.status()),
            });
        }

        let answer: InstantAnswer =
            response.json().await.map_err(|e| AppError::WebSearchError {
                message: format!("malformed search response: {e}"),
            })?;

        let results: Vec<SearchResult> = answer
            .related_topics
            .into_iter()
            .filter_map(|topic| {
                let url = topic.first_url?;
                let text = topic.text.unwrap_or_default();
                // the instant-answer text packs title and blurb together;
                // the leading segment before " - " serves as the title
                let (title, snippet) = match text.split_once(" - ") {
                    Some((t, s)) => (t.to_string(), s.to_string()),
                    None => (text.clone(), text),
                };
                Some(SearchResult {
                    title,
                    url,
                    snippet,
                })
            })
            .take(max_results)
            .collect();

        debug!(query, count = results.len(), "Web search completed");
        Ok(results)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted backend keyed by query substring
    pub struct ScriptedSearch {
        responses: Mutex<HashMap<String, Vec<SearchResult>>>,
        pub fail: bool,
    }

    impl ScriptedSearch {
        pub fn new() -> Self {
            Self {
                responses: Mutex::new(HashMap::new()),
                fail: false,
            }
        }

        pub fn failing() -> Self {
            Self {
                responses: Mutex::new(HashMap::new()),
                fail: true,
            }
        }

        pub fn script(&self, query_fragment: &str, results: Vec<SearchResult>) {
            self.responses
                .lock()
                .unwrap()
                .insert(query_fragment.to_string(), results);
        }
    }

    #[async_trait]
    impl WebSearch for ScriptedSearch {
        async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
            if self.fail {
                return Err(AppError::WebSearchError {
                    message: "scripted failure".into(),
                });
            }
            let responses = self.responses.lock().unwrap();
            let hits = responses
                .iter()
                .find(|(fragment, _)| query.contains(fragment.as_str()))
                .map(|(_, results)| results.clone())
                .unwrap_or_default();
            Ok(hits.into_iter().take(max_results).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedSearch;
    use super::*;

    #[tokio::test]
    async fn test_scripted_search_matches_fragment() {
        let search = ScriptedSearch::new();
        search.script(
            "Exhibit A",
            vec![SearchResult {
                title: "Exhibit A template".into(),
                url: "https://example.gov/exhibit-a".into(),
                snippet: "Standard exhibit template".into(),
            }],
        );

        let results = search
            .search("Exhibit A exhibit template example", 3)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "https://example.gov/exhibit-a");
    }

    #[tokio::test]
    async fn test_scripted_search_respects_limit() {
        let search = ScriptedSearch::new();
        let many = (0..5)
            .map(|i| SearchResult {
                title: format!("result {i}"),
                url: format!("https://example.org/{i}"),
                snippet: String::new(),
            })
            .collect();
        search.script("schedule", many);

        let results = search.search("schedule template", 3).await.unwrap();
        assert_eq!(results.len(), 3);
    }
}
