//! 工具网关
//!
//! 持有 ToolRegistry 与全局超时。invoke(name, args) 在超时内调用工具，失败统一为 AgentError::ToolInvocation；
//! execute_call 进一步把结果（或错误）包装成与调用 id 关联的工具响应消息，错误不会向上传播。
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::{AgentError, RecoveryAction, RecoveryEngine};
use crate::memory::{Message, ToolCall};
use crate::tools::ToolRegistry;

/// 一次工具调用的结果：回填到对话的工具响应消息 + 成功的片段或失败原因
#[derive(Debug)]
pub struct ToolOutcome {
    pub message: Message,
    pub result: Result<Vec<String>, AgentError>,
}

/// 工具网关：统一的调用 / 超时 / 错误包装边界
pub struct ToolGateway {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
    recovery: RecoveryEngine,
}

impl ToolGateway {
    pub fn new(registry: Arc<ToolRegistry>, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
            recovery: RecoveryEngine::default(),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 执行指定工具；未知工具、工具返回 Err、超时都转为 ToolInvocation；输出 JSON 审计日志
    pub async fn invoke(
        &self,
        tool_name: &str,
        args: serde_json::Value,
    ) -> Result<Vec<String>, AgentError> {
        let start = Instant::now();
        let args_preview = args_preview(&args);

        let result = match self.registry.get(tool_name) {
            None => Err((format!("Unknown tool: {tool_name}"), "unknown_tool")),
            Some(tool) => match timeout(self.timeout, tool.execute(args)).await {
                Ok(Ok(snippets)) => Ok(snippets),
                Ok(Err(e)) => Err((e, "error")),
                Err(_) => Err((
                    format!("timed out after {}s", self.timeout.as_secs()),
                    "timeout",
                )),
            },
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err((_, kind)) => *kind,
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result.map_err(|(reason, _)| AgentError::ToolInvocation {
            tool: tool_name.to_string(),
            reason,
        })
    }

    /// 执行一次工具调用并生成关联的工具响应消息；失败时消息内容为
    /// "Error: <原因>. please fix your mistakes."，供下一轮求解或重规划自行纠正
    pub async fn execute_call(&self, call: &ToolCall) -> ToolOutcome {
        let result = self.invoke(&call.name, call.arguments.clone()).await;
        let content = match &result {
            Ok(snippets) => {
                serde_json::to_string(snippets).unwrap_or_else(|_| snippets.join("\n"))
            }
            Err(err) => {
                tracing::warn!(tool = %call.name, error = %err, "tool call failed, feeding back to model");
                match self.recovery.handle(err, 0) {
                    RecoveryAction::FeedBackToModel(text) => text,
                    _ => format!("Error: {err}"),
                }
            }
        };
        ToolOutcome {
            message: Message::tool(content, call.id.clone()),
            result,
        }
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::recovery::TOOL_ERROR_SUFFIX;
    use crate::memory::Role;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Snippets;

    #[async_trait]
    impl Tool for Snippets {
        fn name(&self) -> &str {
            "web_search"
        }

        fn description(&self) -> &str {
            "测试用搜索"
        }

        async fn execute(&self, args: Value) -> Result<Vec<String>, String> {
            match args.get("key_words").and_then(Value::as_str) {
                Some("boom") => Err("HTTP 500".to_string()),
                Some(kw) => Ok(vec![format!("{kw} 入门"), format!("{kw} 进阶")]),
                None => Err("missing key_words".to_string()),
            }
        }
    }

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "永不返回"
        }

        async fn execute(&self, _args: Value) -> Result<Vec<String>, String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![])
        }
    }

    fn gateway(timeout_secs: u64) -> ToolGateway {
        let mut registry = ToolRegistry::new();
        registry.register(Snippets);
        registry.register(Slow);
        ToolGateway::new(Arc::new(registry), timeout_secs)
    }

    #[tokio::test]
    async fn test_success_is_correlated() {
        let gw = gateway(5);
        let call = ToolCall::new("web_search", json!({"key_words": "Python 教程"}));
        let outcome = gw.execute_call(&call).await;

        let snippets = outcome.result.unwrap();
        assert_eq!(snippets.len(), 2);
        assert_eq!(outcome.message.role, Role::Tool);
        assert_eq!(outcome.message.tool_call_id.as_deref(), Some(call.id.as_str()));
        assert!(outcome.message.content.contains("Python 教程 入门"));
    }

    #[tokio::test]
    async fn test_failure_becomes_tool_message() {
        let gw = gateway(5);
        let call = ToolCall::new("web_search", json!({"key_words": "boom"}));
        let outcome = gw.execute_call(&call).await;

        assert!(matches!(
            outcome.result,
            Err(AgentError::ToolInvocation { ref reason, .. }) if reason == "HTTP 500"
        ));
        assert!(outcome.message.content.starts_with("Error: HTTP 500"));
        assert!(outcome.message.content.ends_with(TOOL_ERROR_SUFFIX));
        assert_eq!(outcome.message.tool_call_id.as_deref(), Some(call.id.as_str()));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let gw = gateway(5);
        let err = gw.invoke("shell", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolInvocation { ref reason, .. } if reason.contains("Unknown tool")));
    }

    #[tokio::test]
    async fn test_timeout() {
        let gw = gateway(1);
        let err = gw.invoke("slow", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolInvocation { ref reason, .. } if reason.contains("timed out")));
    }
}
