//! 编排过程事件：按阶段顺序流式推送给 CLI / 批处理等消费方

use serde::Serialize;

use crate::core::{StepSpec, StepSummary};

/// 单个过程事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageEvent {
    /// 进入某个阶段
    StageStarted { stage: String, transition: usize },
    /// 目标已确定
    GoalRefined { goal: String },
    /// 计划已生成
    Planned { plan: String, steps: Vec<StepSpec> },
    /// 发起工具调用
    ToolCall {
        step: usize,
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation {
        step: usize,
        tool: String,
        preview: String,
    },
    /// 工具执行失败（已反馈给模型）
    ToolFailure {
        step: usize,
        tool: String,
        reason: String,
    },
    /// 某一步完成
    StepCompleted { step: usize, result: String },
    /// 计划已更新
    Replanned {
        plan: String,
        steps: Vec<StepSpec>,
        summaries: Vec<StepSummary>,
    },
    /// 报告的一小段（流式输出）
    ReportChunk { text: String },
    /// 错误恢复动作
    Recovery { action: String, detail: String },
    /// 致命错误
    Error { text: String },
    /// 会话结束
    Done { session_id: String },
}

/// 预览：最多 max_chars 个字符
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}

impl StageEvent {
    /// CLI 打印的文本片段；None 表示不打印
    pub fn display_text(&self) -> Option<String> {
        match self {
            StageEvent::StageStarted { .. } => None,
            StageEvent::GoalRefined { goal } => Some(format!("🎯 目标：{goal}\n")),
            StageEvent::Planned { plan, steps } => {
                let lines: Vec<String> = steps.iter().map(|s| format!("  {}", s.render())).collect();
                Some(format!("📋 计划：{plan}\n{}\n", lines.join("\n")))
            }
            StageEvent::ToolCall { step, tool, args } => {
                Some(format!("🔧 step{step} 调用工具 {tool} {args}\n"))
            }
            StageEvent::Observation { tool, preview, .. } => {
                Some(format!("👀 {tool} 返回：{preview}\n"))
            }
            StageEvent::ToolFailure { step, tool, reason } => Some(format!(
                "⚠️ step{step} 工具 {tool} 失败：{reason}，将重试或重新规划\n"
            )),
            StageEvent::StepCompleted { step, result } => {
                Some(format!("✅ step{step}：{}\n", preview(result, 200)))
            }
            StageEvent::Replanned { plan, summaries, .. } => {
                let lines: Vec<String> = summaries.iter().map(|s| format!("  {}", s.render())).collect();
                Some(format!("🔄 计划更新：{plan}\n{}\n", lines.join("\n")))
            }
            StageEvent::ReportChunk { text } => Some(text.clone()),
            StageEvent::Recovery { action, detail } => Some(format!("↩️ {action}：{detail}\n")),
            StageEvent::Error { text } => Some(format!("❌ {text}\n")),
            StageEvent::Done { .. } => Some("\n".to_string()),
        }
    }
}
