use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;

use magnat_core::error::{MagnatError, Result};
use magnat_core::traits::Tool;
use magnat_core::types::ToolResult;

use crate::documents::MemoryDocumentStore;

/// Keyword search over ingested rulebooks.
pub struct SearchDocumentsTool {
    store: Arc<MemoryDocumentStore>,
}

impl SearchDocumentsTool {
    pub fn new(store: Arc<MemoryDocumentStore>) -> Self {
        Self { store }
    }
}

#[derive(Deserialize)]
struct SearchInput {
    query: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    5
}

impl Tool for SearchDocumentsTool {
    fn name(&self) -> &str {
        "search_documents"
    }

    fn description(&self) -> &str {
        "Search the rulebook library for sections matching the query. \
         Returns the best matching sections with their game title and heading."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Keywords to look for"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of sections (default 5)",
                    "default": 5
                }
            },
            "required": ["query"]
        })
    }

    fn execute(&self, input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let params: SearchInput = serde_json::from_value(input)
                .map_err(|e| MagnatError::ToolValidation(e.to_string()))?;

            let hits = self.store.search(&params.query, params.limit.max(1)).await;
            if hits.is_empty() {
                return Ok(ToolResult::success("No matching sections found."));
            }
            Ok(ToolResult::json(&serde_json::to_value(&hits)?))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> Arc<MemoryDocumentStore> {
        let store = Arc::new(MemoryDocumentStore::new().unwrap());
        store
            .add_markdown(
                "go.md",
                "# Go\n\n## Capture\n\nStones without liberties are captured.\n\n## Ko\n\nA ko may not be retaken immediately.\n",
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_returns_matching_sections() {
        let tool = SearchDocumentsTool::new(store().await);
        let result = tool
            .execute(json!({"query": "when are stones captured"}))
            .await
            .unwrap();

        let hits: serde_json::Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(hits[0]["heading"], "Capture");
        assert_eq!(hits[0]["title"], "Go");
    }

    #[tokio::test]
    async fn test_no_hits() {
        let tool = SearchDocumentsTool::new(store().await);
        let result = tool.execute(json!({"query": "dice"})).await.unwrap();
        assert_eq!(result.content, "No matching sections found.");
    }

    #[tokio::test]
    async fn test_missing_query() {
        let tool = SearchDocumentsTool::new(store().await);
        let err = tool.execute(json!({})).await.unwrap_err();
        assert!(matches!(err, MagnatError::ToolValidation(_)));
    }
}
