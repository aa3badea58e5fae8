//! 编排图类型定义
//!
//! 定义阶段（节点）、边与图装配错误

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::SessionState;
use crate::stages::Route;

/// 编排阶段；ToolExec 携带要执行的工具名
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "tool", rename_all = "snake_case")]
pub enum Stage {
    Goal,
    Plan,
    Solve,
    ToolExec(String),
    Replan,
    Report,
    End,
}

impl Stage {
    pub fn kind(&self) -> StageKind {
        match self {
            Stage::Goal => StageKind::Goal,
            Stage::Plan => StageKind::Plan,
            Stage::Solve => StageKind::Solve,
            Stage::ToolExec(_) => StageKind::ToolExec,
            Stage::Replan => StageKind::Replan,
            Stage::Report => StageKind::Report,
            Stage::End => StageKind::End,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::End)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::ToolExec(tool) => write!(f, "tool_exec({tool})"),
            other => write!(f, "{}", other.kind()),
        }
    }
}

/// 图节点键（ToolExec 不区分具体工具）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Goal,
    Plan,
    Solve,
    ToolExec,
    Replan,
    Report,
    End,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageKind::Goal => "goal",
            StageKind::Plan => "plan",
            StageKind::Solve => "solve",
            StageKind::ToolExec => "tool_exec",
            StageKind::Replan => "replan",
            StageKind::Report => "report",
            StageKind::End => "end",
        };
        f.write_str(name)
    }
}

/// 条件边的路由函数：纯函数，读取会话状态给出下一跳
pub type RouterFn = fn(&SessionState) -> Route;

/// 出边
#[derive(Clone)]
pub enum Edge {
    /// 无条件边
    Direct(StageKind),
    /// 条件边：路由函数 + 允许的目标集合
    Conditional {
        router: RouterFn,
        targets: Vec<StageKind>,
    },
}

impl Edge {
    pub fn targets(&self) -> Vec<StageKind> {
        match self {
            Edge::Direct(to) => vec![*to],
            Edge::Conditional { targets, .. } => targets.clone(),
        }
    }
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::Direct(to) => write!(f, "Direct({to})"),
            Edge::Conditional { targets, .. } => write!(f, "Conditional({targets:?})"),
        }
    }
}

/// 图装配与运行时转移错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Stage '{0}' has no outgoing edge")]
    MissingEdge(StageKind),

    #[error("Stage '{0}' already has an outgoing edge")]
    DuplicateEdge(StageKind),

    #[error("Terminal stage cannot have outgoing edges")]
    TerminalHasEdge,

    #[error("Stage '{0}' is unreachable from the entry stage")]
    Unreachable(StageKind),

    #[error("End must be reachable only from report, found edge from '{0}'")]
    EndNotFromReport(StageKind),

    #[error("Router for '{from}' chose '{to}', which is not a declared target")]
    UnexpectedTarget { from: StageKind, to: StageKind },

    #[error("Tool stage requires a tool name")]
    MissingToolName,
}
