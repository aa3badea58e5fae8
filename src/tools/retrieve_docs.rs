//! 文档检索工具：在启动时加载的文档索引中查找与 query 最相关的 top-k 段落

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::memory::DocumentRetriever;
use crate::tools::Tool;

pub struct RetrieveDocsTool {
    retriever: Arc<dyn DocumentRetriever>,
    top_k: usize,
}

impl RetrieveDocsTool {
    pub fn new(retriever: Arc<dyn DocumentRetriever>, top_k: usize) -> Self {
        Self { retriever, top_k }
    }
}

#[async_trait]
impl Tool for RetrieveDocsTool {
    fn name(&self) -> &str {
        "retrieve_docs"
    }

    fn description(&self) -> &str {
        "在用户提供的文档中检索与查询最相关的段落"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "检索内容"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Vec<String>, String> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or("missing required argument: query")?;
        let hits = self
            .retriever
            .query(query, self.top_k)
            .await
            .map_err(|e| format!("retrieval failed: {e}"))?;
        if hits.is_empty() {
            return Err(format!("no document passage matches '{query}'"));
        }
        Ok(hits
            .into_iter()
            .map(|d| format!("[{}] {}", d.source, d.content))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::KeywordIndex;

    #[tokio::test]
    async fn test_retrieve_top_k_with_source() {
        let index = Arc::new(KeywordIndex::new());
        index
            .add_document("guide.md", "Python 列表推导式\n\nPython 装饰器\n\nRust 生命周期")
            .await
            .unwrap();
        let tool = RetrieveDocsTool::new(index, 2);

        let hits = tool
            .execute(serde_json::json!({"query": "Python 装饰器"}))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0], "[guide.md] Python 装饰器");

        let err = tool
            .execute(serde_json::json!({"query": "量子"}))
            .await
            .unwrap_err();
        assert!(err.contains("no document"));
    }
}
