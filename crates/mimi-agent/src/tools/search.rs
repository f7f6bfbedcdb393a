//! Tool: web_search via the Brave Search API.

use async_trait::async_trait;
use serde::Deserialize;

use super::{Tool, ToolResult};

const SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";
const DEFAULT_MAX_RESULTS: usize = 5;

pub struct WebSearchTool {
    client: reqwest::Client,
    api_key: String,
}

impl WebSearchTool {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            api_key,
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information. Use this for up-to-date \
         facts, news, weather, or anything beyond your training data."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query string."
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum results to include (default: 5)."
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let Some(query) = input.get("query").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: query");
        };
        if self.api_key.is_empty() {
            return ToolResult::error(
                "web search is not configured (set search.api_key in mimi.toml)",
            );
        }
        let max_results = input
            .get("max_results")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_MAX_RESULTS);

        let resp = match self
            .client
            .get(SEARCH_URL)
            .query(&[("q", query), ("count", &max_results.to_string())])
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return ToolResult::error(format!("search request failed: {e}")),
        };
        if !resp.status().is_success() {
            return ToolResult::error(format!("search API returned {}", resp.status()));
        }

        let body: SearchResponse = match resp.json().await {
            Ok(body) => body,
            Err(e) => return ToolResult::error(format!("bad search response: {e}")),
        };

        let results = body.web.map(|w| w.results).unwrap_or_default();
        if results.is_empty() {
            return ToolResult::success("no results");
        }

        let mut out = String::new();
        for (i, r) in results.iter().take(max_results).enumerate() {
            out.push_str(&format!(
                "{}. {}\n   {}\n   {}\n",
                i + 1,
                r.title,
                r.url,
                r.description.as_deref().unwrap_or("")
            ));
        }
        ToolResult::success(out)
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    web: Option<WebResults>,
}

#[derive(Deserialize)]
struct WebResults {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Deserialize)]
struct SearchResult {
    title: String,
    url: String,
    description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_key_reports_an_error() {
        let tool = WebSearchTool::new(String::new());
        let result = tool.execute(serde_json::json!({ "query": "rust" })).await;
        assert!(result.is_error);
        assert!(result.content.contains("not configured"));
    }
}
