//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock / Scripted）实现 LlmClient：complete（非流式）、complete_stream（流式 Token）。
//! with_idle_timeout 为流式输出加上片段间隔超时，避免停滞的连接卡住报告阶段。
//! 工具绑定与结构化输出都在 prompt 层实现，客户端只负责文本进、文本出。

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, Stream, StreamExt};
use thiserror::Error;

use crate::memory::Message;

/// 生成能力失败的原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limited (retry after {retry_after_ms} ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// 流式完成返回的 Token 流
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// 给 Token 流加上片段间隔超时：超过 idle 未收到下一个片段时产出 LlmError::Timeout 并结束
pub fn with_idle_timeout(tokens: TokenStream, idle: Duration) -> TokenStream {
    Box::pin(stream::unfold(Some(tokens), move |pending| async move {
        let mut tokens = pending?;
        match tokio::time::timeout(idle, tokens.next()).await {
            Ok(Some(item)) => Some((item, Some(tokens))),
            Ok(None) => None,
            Err(_) => Some((Err(LlmError::Timeout), None)),
        }
    }))
}

/// LLM 客户端 trait：非流式完成与流式完成（返回 Token 流）
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 流式完成；默认把完整回复作为单个片段
    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, LlmError> {
        let content = self.complete(messages).await?;
        Ok(Box::pin(stream::iter(vec![Ok(content)])))
    }
}
