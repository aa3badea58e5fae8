//! 联网检索工具：通过 Tavily 搜索 API 获取关键词相关的网页内容
//!
//! 参数 key_words；返回每条命中的 content 片段。总长度超过 max_result_chars 时截断并追加 ...[truncated]。
//! 未设置 TAVILY_API_KEY 或 HTTP 失败时返回错误，由 ToolGateway 转为工具响应消息。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::Tool;

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    max_results: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(default)]
    content: String,
}

/// web_search 工具
pub struct WebSearchTool {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    max_results: usize,
    max_result_chars: usize,
}

impl WebSearchTool {
    /// API Key 从环境变量 TAVILY_API_KEY 读取
    pub fn new(timeout_secs: u64, max_results: usize, max_result_chars: usize) -> Self {
        let api_key = std::env::var("TAVILY_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            endpoint: TAVILY_ENDPOINT.to_string(),
            api_key,
            max_results,
            max_result_chars,
        }
    }

    /// 覆盖搜索端点（自建代理或测试）
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

/// 按总字符数截断片段列表（UTF-8 安全）
fn truncate_snippets(snippets: Vec<String>, max_chars: usize) -> Vec<String> {
    let mut budget = max_chars;
    let mut out = Vec::with_capacity(snippets.len());
    for snippet in snippets {
        let len = snippet.chars().count();
        if len <= budget {
            budget -= len;
            out.push(snippet);
        } else {
            let head: String = snippet.chars().take(budget).collect();
            out.push(format!("{head}...[truncated]"));
            break;
        }
    }
    out
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "执行联网检索并返回搜索结果。通过 Tavily 搜索引擎获取指定关键词的网页内容，返回文本片段列表"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "key_words": {
                    "type": "string",
                    "description": "要搜索的关键字"
                }
            },
            "required": ["key_words"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Vec<String>, String> {
        let key_words = args
            .get("key_words")
            .or_else(|| args.get("query"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or("missing required argument: key_words")?;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or("TAVILY_API_KEY is not set")?;

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&SearchRequest {
                query: key_words,
                max_results: self.max_results,
            })
            .send()
            .await
            .map_err(|e| format!("search request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("search API returned HTTP {}", status.as_u16()));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| format!("invalid search response: {e}"))?;

        let snippets: Vec<String> = body
            .results
            .into_iter()
            .map(|hit| hit.content.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        tracing::debug!(key_words, hits = snippets.len(), "web_search");
        Ok(truncate_snippets(snippets, self.max_result_chars))
    }
}
