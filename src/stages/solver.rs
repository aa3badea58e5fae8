//! Dispatcher（Solve 阶段）：每次调用只处理游标指向的当前步骤，做出一个决定
//!
//! 1. 账本中当前步骤已有 tool_result：不再调用工具，总结结果后完成该步，游标 +1
//! 2. 否则请求生成（绑定工具）：
//!    - 回复含工具调用：只采纳第一个，记录 {sub_task, tool_call}，游标不变
//!    - 直接回复：记录 {sub_task, generated_result}，游标 +1
//!
//! 当前步骤失败的工具调用达到 max_tool_attempts 次后不再绑定工具，强制直接生成。
//! 模型的原始回复总会追加到 messages。

use std::sync::Arc;

use crate::core::{AgentError, SessionState};
use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, RecordPatch, ToolCall};
use crate::stages::prompts::{
    render, SOLVE_INSTRUCTION, SOLVE_PROMPT, SUMMARIZE_INSTRUCTION, SUMMARIZE_PROMPT, TOOL_BINDING,
};
use crate::stages::structured::parse_tool_reply;
use crate::tools::ToolRegistry;

const TOOLS_EXHAUSTED_NOTE: &str =
    "注意：该子任务的工具调用已多次失败，本次不要调用工具，请根据已有信息直接生成结果。";

/// 一次 Dispatcher 调用的结果
#[derive(Debug, Clone, PartialEq)]
pub enum SolveOutcome {
    /// 发出工具调用，步骤仍在进行中
    ToolRequested { step: usize, call: ToolCall },
    /// 步骤完成，游标已前进
    Completed { step: usize, result: String },
    /// 游标已越过最后一步，未做任何修改
    NothingToSolve,
}

pub struct Dispatcher {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    max_tool_attempts: u32,
}

impl Dispatcher {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<ToolRegistry>, max_tool_attempts: u32) -> Self {
        Self {
            llm,
            registry,
            max_tool_attempts,
        }
    }

    pub async fn solve(&self, state: &mut SessionState) -> Result<SolveOutcome, AgentError> {
        let Some(spec) = state.current_spec().cloned() else {
            tracing::warn!(session = %state.session_id, cursor = state.current_step, "no step to solve");
            return Ok(SolveOutcome::NothingToSolve);
        };
        let key = spec.key();
        let record = state.ledger.get(key).cloned().unwrap_or_default();
        let step_line = spec.render();

        if let Some(snippets) = &record.tool_result {
            let tool_result = snippets.join("\n");
            let prompt = render(
                SUMMARIZE_PROMPT,
                &[
                    ("goal", state.goal.as_str()),
                    ("current_step", step_line.as_str()),
                    ("tool_result", tool_result.as_str()),
                ],
            );
            let reply = self
                .llm
                .complete(&[Message::system(prompt), Message::user(SUMMARIZE_INSTRUCTION)])
                .await?;
            let text = non_empty(&reply)?;
            state
                .ledger
                .upsert(key, RecordPatch::new().generated_result(text.clone()))?;
            state.messages.push(Message::assistant(text.clone()));
            state.current_step += 1;
            tracing::info!(session = %state.session_id, step = spec.index, "step finalized from tool result");
            return Ok(SolveOutcome::Completed {
                step: spec.index,
                result: text,
            });
        }

        let failed = record.failed_attempts();
        let bind_tools = !self.registry.is_empty() && failed < self.max_tool_attempts;
        let ledger_json = state.ledger.to_prompt_json();
        let mut system = render(
            SOLVE_PROMPT,
            &[
                ("goal", state.goal.as_str()),
                ("current_step", step_line.as_str()),
                ("ledger", ledger_json.as_str()),
            ],
        );
        if bind_tools {
            let tools = self.registry.to_schema_json();
            system.push_str("\n\n");
            system.push_str(&render(TOOL_BINDING, &[("tools", tools.as_str())]));
        } else if failed > 0 {
            tracing::warn!(session = %state.session_id, step = spec.index, failed, "tool attempts exhausted, unbinding tools");
            system.push_str("\n\n");
            system.push_str(TOOLS_EXHAUSTED_NOTE);
        }
        tracing::debug!(prompt_chars = system.chars().count(), bind_tools, "solve prompt");

        let reply = self
            .llm
            .complete(&[Message::system(system), Message::user(SOLVE_INSTRUCTION)])
            .await?;
        let message = if bind_tools {
            parse_tool_reply(&reply)
        } else {
            Message::assistant(reply.trim())
        };

        if let Some(call) = message.tool_calls.first().cloned() {
            if message.tool_calls.len() > 1 {
                tracing::warn!(
                    ignored = message.tool_calls.len() - 1,
                    "multiple tool calls in one reply, only the first is honoured"
                );
            }
            state.ledger.upsert(
                key,
                RecordPatch::new()
                    .sub_task(spec.description.clone())
                    .tool_call(call.clone()),
            )?;
            state.messages.push(message);
            tracing::info!(session = %state.session_id, step = spec.index, tool = %call.name, "tool call requested");
            return Ok(SolveOutcome::ToolRequested {
                step: spec.index,
                call,
            });
        }

        let text = non_empty(&message.content)?;
        state.ledger.upsert(
            key,
            RecordPatch::new()
                .sub_task(spec.description.clone())
                .generated_result(text.clone()),
        )?;
        state.messages.push(message);
        state.current_step += 1;
        tracing::info!(session = %state.session_id, step = spec.index, "step generated directly");
        Ok(SolveOutcome::Completed {
            step: spec.index,
            result: text,
        })
    }
}

fn non_empty(reply: &str) -> Result<String, AgentError> {
    let text = reply.trim();
    if text.is_empty() {
        return Err(LlmError::InvalidResponse("empty step result".to_string()).into());
    }
    Ok(text.to_string())
}
