//! DeepSeek API 客户端（OpenAI 兼容格式）
//!
//! - Base URL: https://api.deepseek.com
//! - 模型: deepseek-chat (常规对话), deepseek-reasoner (思考模式)

use crate::llm::OpenAiClient;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
pub const DEEPSEEK_REASONER: &str = "deepseek-reasoner";

/// 创建 DeepSeek 客户端
///
/// - API Key 只从环境变量 `DEEPSEEK_API_KEY` 读取
/// - 模型优先取参数，其次 `DEEPSEEK_MODEL` 环境变量，最后 `deepseek-chat`
/// - base_url 为 None 时使用官方地址
pub fn create_deepseek_client(
    base_url: Option<&str>,
    model: Option<&str>,
    request_timeout_secs: u64,
    stream_timeout_secs: u64,
) -> Option<OpenAiClient> {
    let api_key = std::env::var("DEEPSEEK_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty())?;

    let model = model
        .map(String::from)
        .or_else(|| std::env::var("DEEPSEEK_MODEL").ok())
        .unwrap_or_else(|| DEEPSEEK_CHAT.to_string());

    Some(
        OpenAiClient::new(
            Some(base_url.unwrap_or(DEEPSEEK_BASE_URL)),
            &model,
            Some(api_key.as_str()),
        )
        .with_request_timeout(request_timeout_secs)
        .with_stream_timeout(stream_timeout_secs),
    )
}
