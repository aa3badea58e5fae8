//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock / Scripted）

pub mod deepseek;
pub mod embedding;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use deepseek::{create_deepseek_client, DEEPSEEK_BASE_URL, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use embedding::{create_embedder_from_config, EmbeddingProvider, OpenAiEmbedder};
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::OpenAiClient;
pub use traits::{with_idle_timeout, LlmClient, LlmError, TokenStream};

use crate::config::AppConfig;

/// 按配置创建 LLM 客户端；所选提供方缺少 API Key 时回退到 MockLlmClient
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let llm = &cfg.llm;
    let timeouts = &llm.timeouts;
    match llm.provider.as_str() {
        "deepseek" => {
            let model = llm.model.as_deref().or(llm.deepseek.model.as_deref());
            match create_deepseek_client(llm.base_url.as_deref(), model, timeouts.request, timeouts.stream) {
                Some(client) => {
                    tracing::info!(provider = "deepseek", "LLM client ready");
                    Arc::new(client)
                }
                None => {
                    tracing::warn!("DEEPSEEK_API_KEY not set, falling back to mock LLM");
                    Arc::new(MockLlmClient)
                }
            }
        }
        "openai" => match std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty()) {
            Some(key) => {
                let model = llm
                    .model
                    .as_deref()
                    .or(llm.openai.model.as_deref())
                    .unwrap_or("gpt-4o-mini");
                tracing::info!(provider = "openai", model, "LLM client ready");
                Arc::new(
                    OpenAiClient::new(llm.base_url.as_deref(), model, Some(&key))
                        .with_request_timeout(timeouts.request)
                        .with_stream_timeout(timeouts.stream),
                )
            }
            None => {
                tracing::warn!("OPENAI_API_KEY not set, falling back to mock LLM");
                Arc::new(MockLlmClient)
            }
        },
        "mock" => Arc::new(MockLlmClient),
        other => {
            tracing::warn!(provider = other, "unknown LLM provider, using mock");
            Arc::new(MockLlmClient)
        }
    }
}
