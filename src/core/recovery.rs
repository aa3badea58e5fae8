//! 错误恢复引擎
//!
//! 根据 AgentError 类型与已重试次数返回 RecoveryAction，供各阶段与编排器决定是重新提示、反馈给模型、
//! 生成尽力报告还是终止。

use crate::core::{AgentError, RecoveryAction};

/// 工具失败时回填给模型的提示后缀
pub const TOOL_ERROR_SUFFIX: &str = "please fix your mistakes.";

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    /// 结构化输出不合法时允许的重新提示次数
    structured_retries: u32,
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new(1)
    }
}

impl RecoveryEngine {
    pub fn new(structured_retries: u32) -> Self {
        Self { structured_retries }
    }

    /// attempt 为该阶段已重新提示的次数（首次失败时为 0）
    pub fn handle(&self, err: &AgentError, attempt: u32) -> RecoveryAction {
        match err {
            AgentError::PlanValidation(reason) if attempt < self.structured_retries => {
                RecoveryAction::RetryWithPrompt(format!(
                    "上一次输出不符合要求：{reason}。\
                    请严格按照给定的 JSON Schema 只输出一个 JSON 对象，步骤数量必须在 1 到 5 之间，\
                    不要输出 Markdown 或其它文字。"
                ))
            }
            AgentError::ToolInvocation { reason, .. } => {
                RecoveryAction::FeedBackToModel(format!("Error: {reason}. {TOOL_ERROR_SUFFIX}"))
            }
            AgentError::RecursionLimitExceeded { .. } => RecoveryAction::BestEffortReport,
            _ => RecoveryAction::Abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;

    #[test]
    fn test_plan_validation_retries_once() {
        let engine = RecoveryEngine::default();
        let err = AgentError::PlanValidation("steps must contain 1..=5 items, got 7".to_string());
        match engine.handle(&err, 0) {
            RecoveryAction::RetryWithPrompt(msg) => assert!(msg.contains("got 7")),
            other => panic!("Expected RetryWithPrompt, got {other:?}"),
        }
        assert_eq!(engine.handle(&err, 1), RecoveryAction::Abort);
    }

    #[test]
    fn test_tool_failure_is_fed_back() {
        let engine = RecoveryEngine::default();
        let err = AgentError::ToolInvocation {
            tool: "web_search".to_string(),
            reason: "HTTP 500".to_string(),
        };
        match engine.handle(&err, 0) {
            RecoveryAction::FeedBackToModel(msg) => {
                assert_eq!(msg, "Error: HTTP 500. please fix your mistakes.");
            }
            other => panic!("Expected FeedBackToModel, got {other:?}"),
        }
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_recursion_limit_gets_best_effort_report() {
        let engine = RecoveryEngine::default();
        let err = AgentError::RecursionLimitExceeded { limit: 25 };
        assert_eq!(engine.handle(&err, 0), RecoveryAction::BestEffortReport);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_generation_error_aborts() {
        let engine = RecoveryEngine::default();
        let err = AgentError::Generation(LlmError::Request("connection reset".to_string()));
        assert_eq!(engine.handle(&err, 0), RecoveryAction::Abort);
        assert!(err.is_fatal());
    }
}
