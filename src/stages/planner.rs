//! Planner：把目标分解为 1 到 5 个有序子任务，每步带执行方式提示
//!
//! 输出经 JSON Schema 约束 + 严格解码校验；不合法时重新提示一次，仍不合法则以 PlanValidation 终止会话。

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;

use crate::core::{AgentError, ModeHint, RecoveryEngine, SessionState, StepSpec, MAX_STEPS};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::stages::prompts::{render, PLAN_INSTRUCTION, PLAN_PROMPT};
use crate::stages::structured::{generate_validated, schema_instruction};
use crate::tools::ToolRegistry;

/// 计划（模型输出）
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PlanDraft {
    /// 用一句话概括总体计划
    pub summary: String,
    /// 1 到 5 个子任务，按执行顺序排列
    pub steps: Vec<DraftStep>,
}

/// 子任务（模型输出）
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DraftStep {
    /// 具体、可独立执行的子任务描述
    pub description: String,
    /// tool：需要调用工具；direct：直接生成
    pub mode: ModeHint,
    /// mode 为 tool 时使用的工具名称
    #[serde(default)]
    pub tool: Option<String>,
}

/// 校验步骤数、描述与工具名，编号为 start_index 起的连续序号
pub fn validate_steps(
    drafts: Vec<DraftStep>,
    registry: &ToolRegistry,
    start_index: usize,
) -> Result<Vec<StepSpec>, AgentError> {
    drafts
        .into_iter()
        .enumerate()
        .map(|(offset, draft)| {
            let index = start_index + offset;
            let description = draft.description.trim().to_string();
            if description.is_empty() {
                return Err(AgentError::PlanValidation(format!(
                    "step{index} has an empty description"
                )));
            }
            let tool = match draft.mode {
                ModeHint::Direct => None,
                ModeHint::Tool => match draft.tool.map(|t| t.trim().to_string()) {
                    Some(name) if name.is_empty() => None,
                    Some(name) if !registry.contains(&name) => {
                        return Err(AgentError::PlanValidation(format!(
                            "step{index} references unknown tool '{name}'"
                        )))
                    }
                    other => other,
                },
            };
            Ok(StepSpec {
                index,
                description,
                mode_hint: draft.mode,
                tool,
            })
        })
        .collect()
}

/// 步骤数必须在 1..=MAX_STEPS
pub fn check_step_count(n: usize) -> Result<(), AgentError> {
    if (1..=MAX_STEPS).contains(&n) {
        Ok(())
    } else {
        Err(AgentError::PlanValidation(format!(
            "steps must contain 1..={MAX_STEPS} items, got {n}"
        )))
    }
}

/// 计划结果；retries 为重新提示次数
#[derive(Debug)]
pub struct PlanOutcome {
    pub retries: u32,
}

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    recovery: RecoveryEngine,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<ToolRegistry>, recovery: RecoveryEngine) -> Self {
        Self {
            llm,
            registry,
            recovery,
        }
    }

    /// 写入 state.plan / state.steps，游标置为 1
    pub async fn plan(&self, state: &mut SessionState) -> Result<PlanOutcome, AgentError> {
        let max_steps = MAX_STEPS.to_string();
        let tools = self.registry.to_prompt_text();
        let prompt = render(
            PLAN_PROMPT,
            &[
                ("goal", state.goal.as_str()),
                ("tools", tools.as_str()),
                ("max_steps", max_steps.as_str()),
            ],
        );
        let messages = vec![
            Message::system(format!("{prompt}\n\n{}", schema_instruction::<PlanDraft>())),
            Message::user(PLAN_INSTRUCTION),
        ];

        let registry = &self.registry;
        let ((summary, steps), retries) = generate_validated(
            self.llm.as_ref(),
            messages,
            &self.recovery,
            |draft: PlanDraft| {
                check_step_count(draft.steps.len())?;
                let steps = validate_steps(draft.steps, registry, 1)?;
                Ok((draft.summary.trim().to_string(), steps))
            },
        )
        .await?;

        tracing::info!(session = %state.session_id, steps = steps.len(), retries, "plan ready");
        state.plan = summary;
        state.steps = steps;
        state.current_step = 1;
        Ok(PlanOutcome { retries })
    }
}
