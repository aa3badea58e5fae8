//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 RetryWithPrompt / FeedBackToModel / BestEffortReport / Abort。

use thiserror::Error;

use crate::llm::LlmError;
use crate::memory::LedgerError;
use crate::workflow::WorkflowError;

/// 会话运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 生成能力本身失败（网络、鉴权、配额）；不在核心内重试
    #[error("Generation failed: {0}")]
    Generation(#[from] LlmError),

    /// 工具调用失败；由 ToolGateway 就地转为工具响应消息
    #[error("Tool '{tool}' failed: {reason}")]
    ToolInvocation { tool: String, reason: String },

    /// Planner / Replanner 输出违反结构或步骤数约束
    #[error("Plan validation failed: {0}")]
    PlanValidation(String),

    /// 阶段转移次数超过会话预算
    #[error("Recursion limit of {limit} transitions exceeded")]
    RecursionLimitExceeded { limit: usize },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Cancelled")]
    Cancelled,
}

impl AgentError {
    /// 致命错误：会话终止
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            AgentError::ToolInvocation { .. } | AgentError::PlanValidation(_)
        )
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 将提示注入下一次生成，让模型重新输出（结构化输出不合法时）
    RetryWithPrompt(String),
    /// 把错误作为工具响应反馈给模型，由下一轮求解/重规划自行纠正
    FeedBackToModel(String),
    /// 终止会话，仅用已完成步骤生成尽力报告
    BestEffortReport,
    /// 终止会话
    Abort,
}
