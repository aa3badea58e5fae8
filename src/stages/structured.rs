//! 结构化输出与工具调用解析
//!
//! 生成能力只做文本进、文本出：结构化模式把 JSON Schema 拼进 prompt，回复经 [`decode`] 严格解码；
//! 工具绑定模式下用 [`parse_tool_reply`] 从回复中提取工具调用描述。

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::core::{AgentError, RecoveryAction, RecoveryEngine};
use crate::llm::LlmClient;
use crate::memory::{Message, ToolCall};

/// 从文本中提取 JSON 块（```json ... ``` 或首个 '{' 到最后一个 '}'）
pub fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 结构化输出说明：要求只输出符合 T 的 JSON Schema 的对象
pub fn schema_instruction<T: JsonSchema>() -> String {
    let schema = schemars::schema_for!(T);
    let schema = serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string());
    format!(
        "输出格式：只输出一个符合以下 JSON Schema 的 JSON 对象，不要输出 Markdown 或其它文字。\n{schema}"
    )
}

/// 严格解码：找不到 JSON 或字段类型不符都视为 PlanValidation
pub fn decode<T: DeserializeOwned>(reply: &str) -> Result<T, AgentError> {
    let json = extract_json(reply)
        .ok_or_else(|| AgentError::PlanValidation("no JSON object in reply".to_string()))?;
    serde_json::from_str(json).map_err(|e| AgentError::PlanValidation(format!("malformed output: {e}")))
}

/// 结构化生成：解码并校验；不合法时按 RecoveryEngine 的建议带提示重新请求。
/// 返回校验后的值与重新提示的次数。
pub async fn generate_validated<T, U, F>(
    llm: &dyn LlmClient,
    mut messages: Vec<Message>,
    recovery: &RecoveryEngine,
    validate: F,
) -> Result<(U, u32), AgentError>
where
    T: DeserializeOwned,
    F: Fn(T) -> Result<U, AgentError>,
{
    let mut attempt = 0;
    loop {
        let reply = llm.complete(&messages).await?;
        let err = match decode::<T>(&reply).and_then(&validate) {
            Ok(value) => return Ok((value, attempt)),
            Err(err) => err,
        };
        match recovery.handle(&err, attempt) {
            RecoveryAction::RetryWithPrompt(hint) => {
                tracing::warn!(error = %err, attempt, "structured output rejected, re-prompting");
                messages.push(Message::assistant(reply));
                messages.push(Message::user(hint));
                attempt += 1;
            }
            _ => return Err(err),
        }
    }
}

#[derive(Deserialize)]
struct RawCall {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ToolReply {
    Calls { tool_calls: Vec<RawCall> },
    Short {
        tool: String,
        #[serde(default)]
        args: serde_json::Value,
    },
}

/// 解析绑定工具后的回复：识别为工具调用则生成带 tool_calls 的助手消息（每个调用分配新 id），否则为普通回复
pub fn parse_tool_reply(reply: &str) -> Message {
    let calls: Vec<ToolCall> = extract_json(reply)
        .and_then(|json| serde_json::from_str::<ToolReply>(json).ok())
        .map(|parsed| match parsed {
            ToolReply::Calls { tool_calls } => tool_calls
                .into_iter()
                .map(|c| (c.name, c.arguments))
                .collect::<Vec<_>>(),
            ToolReply::Short { tool, args } => vec![(tool, args)],
        })
        .unwrap_or_default()
        .into_iter()
        .filter(|(name, _)| !name.trim().is_empty())
        .map(|(name, args)| {
            let args = if args.is_null() {
                serde_json::json!({})
            } else {
                args
            };
            ToolCall::new(name.trim(), args)
        })
        .collect();

    if calls.is_empty() {
        Message::assistant(reply.trim())
    } else {
        Message::assistant_with_calls(reply.trim(), calls)
    }
}
