//! Replanner：总结账本为逐步结果摘要，并可改写尚未执行的步骤
//!
//! - 已完成的步骤（游标之前）原样沿用当前计划中的描述与顺序，摘要只能来自账本，不能编造
//! - 游标及之后的步骤一律标记“未执行”
//! - 修订后的步骤总数为 1..=5，且不少于已完成步骤数；否则 PlanValidation（重新提示一次）
//! - 不修改账本与游标

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;

use crate::core::{
    AgentError, ModeHint, RecoveryEngine, SessionState, StepSpec, StepSummary, MAX_STEPS,
    NOT_EXECUTED,
};
use crate::llm::LlmClient;
use crate::memory::{Message, StepKey};
use crate::stages::events::preview;
use crate::stages::planner::{check_step_count, validate_steps, DraftStep};
use crate::stages::prompts::{render, REPLAN_INSTRUCTION, REPLAN_PROMPT};
use crate::stages::structured::{generate_validated, schema_instruction};
use crate::tools::ToolRegistry;

/// 从账本回退生成摘要时的最大字符数
const SUMMARY_PREVIEW_CHARS: usize = 300;

/// 更新后的计划（模型输出）
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ReplanDraft {
    /// 用一句话概括总体计划
    pub plan: String,
    /// 全部步骤（含已完成的），1 到 5 个
    pub steps: Vec<ReplannedStep>,
}

/// 更新后的单个步骤（模型输出）
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ReplannedStep {
    /// 子任务描述
    pub description: String,
    /// tool：需要调用工具；direct：直接生成
    pub mode: ModeHint,
    /// mode 为 tool 时使用的工具名称
    #[serde(default)]
    pub tool: Option<String>,
    /// 该步骤的执行结果总结；没有执行记录则严格写'未执行'
    pub result: String,
}

/// 一次重规划的结果
#[derive(Debug)]
pub struct ReplanOutcome {
    pub retries: u32,
}

pub struct Replanner {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    recovery: RecoveryEngine,
}

impl Replanner {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<ToolRegistry>, recovery: RecoveryEngine) -> Self {
        Self {
            llm,
            registry,
            recovery,
        }
    }

    /// 写入 state.plan / state.steps / state.summaries
    pub async fn replan(&self, state: &mut SessionState) -> Result<ReplanOutcome, AgentError> {
        let completed = state.current_step.saturating_sub(1).min(state.steps.len());
        for index in 1..=completed {
            if !state.ledger.is_complete(StepKey::new(index)) {
                return Err(AgentError::InvalidState(format!(
                    "step{index} is before the cursor but has no complete record"
                )));
            }
        }

        let steps_json = serde_json::to_string_pretty(
            &state
                .steps
                .iter()
                .map(|s| serde_json::json!({"description": s.description, "mode": s.mode_hint, "tool": s.tool}))
                .collect::<Vec<_>>(),
        )
        .unwrap_or_else(|_| "[]".to_string());
        let ledger_json = state.ledger.to_prompt_json();
        let completed_text = completed.to_string();
        let max_steps = MAX_STEPS.to_string();
        let prompt = render(
            REPLAN_PROMPT,
            &[
                ("task", state.task.as_str()),
                ("plan", state.plan.as_str()),
                ("steps", steps_json.as_str()),
                ("ledger", ledger_json.as_str()),
                ("completed", completed_text.as_str()),
                ("max_steps", max_steps.as_str()),
            ],
        );
        let messages = vec![
            Message::system(format!("{prompt}\n\n{}", schema_instruction::<ReplanDraft>())),
            Message::user(REPLAN_INSTRUCTION),
        ];

        let registry = &self.registry;
        let kept: Vec<StepSpec> = state.steps[..completed].to_vec();
        let ((plan, steps, model_results), retries) = generate_validated(
            self.llm.as_ref(),
            messages,
            &self.recovery,
            |draft: ReplanDraft| {
                check_step_count(draft.steps.len())?;
                if draft.steps.len() < completed {
                    return Err(AgentError::PlanValidation(format!(
                        "revised plan has {} steps but {completed} are already complete",
                        draft.steps.len()
                    )));
                }
                let results: Vec<String> = draft.steps.iter().map(|s| s.result.clone()).collect();
                let future: Vec<DraftStep> = draft.steps[completed..]
                    .iter()
                    .map(|s| DraftStep {
                        description: s.description.clone(),
                        mode: s.mode,
                        tool: s.tool.clone(),
                    })
                    .collect();
                let mut steps = kept.clone();
                steps.extend(validate_steps(future, registry, completed + 1)?);
                Ok((draft.plan.trim().to_string(), steps, results))
            },
        )
        .await?;

        let summaries = steps
            .iter()
            .map(|spec| {
                if spec.index > completed {
                    return StepSummary::not_executed(spec.index);
                }
                let from_model = model_results
                    .get(spec.index - 1)
                    .map(|r| r.trim())
                    .filter(|r| !r.is_empty() && !r.contains(NOT_EXECUTED));
                let result = match from_model {
                    Some(text) => text.to_string(),
                    None => state
                        .ledger
                        .get(spec.key())
                        .and_then(|r| r.outcome_text())
                        .map(|t| preview(&t, SUMMARY_PREVIEW_CHARS))
                        .unwrap_or_default(),
                };
                StepSummary {
                    index: spec.index,
                    result,
                }
            })
            .collect::<Vec<_>>();

        tracing::info!(
            session = %state.session_id,
            completed,
            steps = steps.len(),
            retries,
            "plan revised"
        );
        if !plan.is_empty() {
            state.plan = plan;
        }
        state.steps = steps;
        state.summaries = summaries;
        Ok(ReplanOutcome { retries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::memory::{RecordPatch, ToolCall};
    use crate::stages::router::{decide_after_replan, Route};
    use serde_json::json;

    fn base_state() -> SessionState {
        let mut state = SessionState::for_task("s1", "写一个关于Python的博客");
        state.goal = "撰写一篇 Python 博客".into();
        state.plan = "先定主题再成文".into();
        state.steps = vec![
            StepSpec { index: 1, description: "确定主题".into(), mode_hint: ModeHint::Direct, tool: None },
            StepSpec {
                index: 2,
                description: "检索资料".into(),
                mode_hint: ModeHint::Tool,
                tool: Some("web_search".into()),
            },
            StepSpec { index: 3, description: "撰写正文".into(), mode_hint: ModeHint::Direct, tool: None },
        ];
        state
            .ledger
            .upsert(
                StepKey::new(1),
                RecordPatch::new().sub_task("确定主题").generated_result("主题为 Python 数据类型"),
            )
            .unwrap();
        state.current_step = 2;
        state
    }

    fn registry() -> Arc<ToolRegistry> {
        Arc::new(ToolRegistry::new())
    }

    #[tokio::test]
    async fn test_failed_tool_step_is_marked_not_executed() {
        let mut state = base_state();
        // step2 工具失败，记录未完成
        let key = StepKey::new(2);
        state
            .ledger
            .upsert(key, RecordPatch::new().tool_call(ToolCall::new("web_search", json!({}))))
            .unwrap();
        state.ledger.upsert(key, RecordPatch::new().tool_error("HTTP 500")).unwrap();
        let ledger_before = state.ledger.clone();

        // 模型为 step2 编造了结果，且改写了已完成的 step1 描述
        let reply = json!({
            "plan": "换用直接生成",
            "steps": [
                {"description": "确定博客主题（改写）", "mode": "direct", "result": "主题：数据类型"},
                {"description": "根据已有知识整理资料", "mode": "direct", "result": "已整理"},
                {"description": "撰写正文", "mode": "direct", "result": "未执行"}
            ]
        });
        let llm = Arc::new(ScriptedLlmClient::new([reply.to_string()]));
        let replanner = Replanner::new(llm, registry(), RecoveryEngine::default());
        replanner.replan(&mut state).await.unwrap();

        assert_eq!(state.steps[0].description, "确定主题");
        assert_eq!(state.steps[1].description, "根据已有知识整理资料");
        assert_eq!(state.summaries[0].result, "主题：数据类型");
        assert_eq!(state.summaries[1].result, NOT_EXECUTED);
        assert_eq!(state.summaries[2].result, NOT_EXECUTED);
        assert_eq!(state.plan, "换用直接生成");
        assert_eq!(state.current_step, 2);
        assert_eq!(state.ledger, ledger_before);
        assert_eq!(decide_after_replan(&state), Route::Solve);
    }

    #[tokio::test]
    async fn test_completed_step_summary_falls_back_to_ledger() {
        let mut state = base_state();
        let reply = json!({
            "plan": "",
            "steps": [
                {"description": "确定主题", "mode": "direct", "result": "未执行"},
                {"description": "检索资料", "mode": "tool", "tool": "web_search", "result": "未执行"}
            ]
        });
        let mut registry = ToolRegistry::new();
        registry.register_arc(Arc::new(crate::tools::WebSearchTool::new(1, 1, 100)));
        let llm = Arc::new(ScriptedLlmClient::new([reply.to_string()]));
        let replanner = Replanner::new(llm, Arc::new(registry), RecoveryEngine::default());
        replanner.replan(&mut state).await.unwrap();

        assert_eq!(state.summaries[0].result, "主题为 Python 数据类型");
        assert_eq!(state.steps.len(), 2);
        assert_eq!(state.plan, "先定主题再成文");
    }

    #[tokio::test]
    async fn test_dropping_completed_steps_is_rejected() {
        let mut state = base_state();
        state
            .ledger
            .upsert(StepKey::new(2), RecordPatch::new().generated_result("资料"))
            .unwrap();
        state.current_step = 3;
        let too_short = json!({
            "plan": "p",
            "steps": [{"description": "只剩一步", "mode": "direct", "result": "x"}]
        })
        .to_string();
        let llm = Arc::new(ScriptedLlmClient::new([too_short.clone(), too_short]));
        let replanner = Replanner::new(llm, registry(), RecoveryEngine::default());

        let err = replanner.replan(&mut state).await.unwrap_err();
        assert!(matches!(err, AgentError::PlanValidation(_)));
        assert_eq!(state.steps.len(), 3);
        assert!(state.summaries.is_empty());
    }

    #[tokio::test]
    async fn test_ledger_text_with_braces_reaches_model_unchanged() {
        let mut state = base_state();
        state.steps.truncate(2);
        state
            .ledger
            .upsert(
                StepKey::new(2),
                RecordPatch::new().generated_result(r#"print(f"done {completed} of {max_steps}")"#),
            )
            .unwrap();
        state.current_step = 3;
        let reply = json!({
            "plan": "p",
            "steps": [
                {"description": "确定主题", "mode": "direct", "result": "主题确定"},
                {"description": "检索资料", "mode": "direct", "result": "已输出代码"}
            ]
        });
        let llm = Arc::new(ScriptedLlmClient::new([reply.to_string()]));
        let replanner = Replanner::new(llm.clone(), registry(), RecoveryEngine::default());
        replanner.replan(&mut state).await.unwrap();

        let system = &llm.prompts()[0][0].content;
        assert!(system.contains("done {completed} of {max_steps}"));
        assert!(!system.contains("done 2 of 5"));
    }

    #[tokio::test]
    async fn test_all_complete_routes_to_report() {
        let mut state = base_state();
        state.steps.truncate(1);
        let reply = json!({
            "plan": "p",
            "steps": [{"description": "确定主题", "mode": "direct", "result": "主题确定"}]
        });
        let llm = Arc::new(ScriptedLlmClient::new([reply.to_string()]));
        let replanner = Replanner::new(llm, registry(), RecoveryEngine::default());
        replanner.replan(&mut state).await.unwrap();
        assert_eq!(decide_after_replan(&state), Route::Report);
    }
}
