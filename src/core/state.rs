//! 会话状态：一次对话线程内唯一的可变记录
//!
//! 目标、计划、步骤、账本、游标、消息历史、文档都在这里；每个阶段通过 &mut SessionState 读写，
//! 没有模块级缓存。整个结构可序列化，供检查点存储持久化与恢复。

use serde::{Deserialize, Serialize};

use crate::memory::{Ledger, Message, MessageLog, StepKey};
use crate::workflow::Stage;

/// 计划步骤数上限（Planner / Replanner 强制）
pub const MAX_STEPS: usize = 5;

/// 未执行步骤在摘要中的标记
pub const NOT_EXECUTED: &str = "未执行";

/// 步骤执行方式提示
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ModeHint {
    /// 调用工具
    Tool,
    /// 直接生成
    Direct,
}

/// 计划中的一步（index 从 1 开始）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub index: usize,
    pub description: String,
    pub mode_hint: ModeHint,
    /// mode_hint 为 Tool 时建议使用的工具
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
}

impl StepSpec {
    pub fn key(&self) -> StepKey {
        StepKey::new(self.index)
    }

    /// 形如 "step1: 收集资料（工具：web_search）"
    pub fn render(&self) -> String {
        let hint = match (self.mode_hint, &self.tool) {
            (ModeHint::Tool, Some(tool)) => format!("（工具：{tool}）"),
            (ModeHint::Tool, None) => "（工具）".to_string(),
            (ModeHint::Direct, _) => "（直接生成）".to_string(),
        };
        format!("{}: {}{}", self.key(), self.description, hint)
    }
}

/// Replanner 产出的步骤结果摘要
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub index: usize,
    pub result: String,
}

impl StepSummary {
    pub fn not_executed(index: usize) -> Self {
        Self {
            index,
            result: NOT_EXECUTED.to_string(),
        }
    }

    pub fn is_not_executed(&self) -> bool {
        self.result.contains(NOT_EXECUTED)
    }

    /// 形如 "step2: <结果或未执行>"
    pub fn render(&self) -> String {
        format!("{}: {}", StepKey::new(self.index), self.result)
    }
}

/// 旁路输入/输出：上传文件、检索或工具获取的内容
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    pub source: String,
}

impl Document {
    pub fn new(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source: source.into(),
        }
    }
}

/// 单个会话线程的全部状态
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub task: String,
    pub goal: String,
    pub plan: String,
    pub steps: Vec<StepSpec>,
    pub ledger: Ledger,
    /// 1 起始；全部完成时等于 steps.len() + 1
    pub current_step: usize,
    pub messages: MessageLog,
    pub documents: Vec<Document>,
    pub summaries: Vec<StepSummary>,
    pub report: Option<String>,
    /// 下一个要执行的阶段
    pub stage: Stage,
    /// 本任务已发生的阶段转移次数
    pub transitions: usize,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            task: String::new(),
            goal: String::new(),
            plan: String::new(),
            steps: Vec::new(),
            ledger: Ledger::new(),
            current_step: 1,
            messages: MessageLog::new(),
            documents: Vec::new(),
            summaries: Vec::new(),
            report: None,
            stage: Stage::Goal,
            transitions: 0,
        }
    }

    /// 新会话并立即开始一个任务
    pub fn for_task(session_id: impl Into<String>, task: impl Into<String>) -> Self {
        let mut state = Self::new(session_id);
        state.begin_task(task);
        state
    }

    /// 在同一会话中开始新任务：重置任务相关字段，保留消息与文档
    pub fn begin_task(&mut self, task: impl Into<String>) {
        let task = task.into().trim().to_string();
        self.messages.push(Message::user(task.clone()));
        self.task = task;
        self.goal.clear();
        self.plan.clear();
        self.steps.clear();
        self.ledger = Ledger::new();
        self.current_step = 1;
        self.summaries.clear();
        self.report = None;
        self.stage = Stage::Goal;
        self.transitions = 0;
    }

    /// 当前游标指向的步骤；全部完成时为 None
    pub fn current_spec(&self) -> Option<&StepSpec> {
        self.current_step
            .checked_sub(1)
            .and_then(|i| self.steps.get(i))
    }

    pub fn current_key(&self) -> StepKey {
        StepKey::new(self.current_step)
    }

    pub fn all_steps_complete(&self) -> bool {
        self.current_step > self.steps.len()
    }

    /// 每步一行的步骤列表
    pub fn render_steps(&self) -> String {
        self.steps
            .iter()
            .map(StepSpec::render)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
