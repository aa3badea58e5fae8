//! Reporter：终止阶段，汇总目标、计划与各步骤结果为一份 Markdown 报告
//!
//! 报告骨架（任务概述 / 执行计划 / 步骤执行结果）由状态直接渲染，`## 总结` 一节由模型流式生成。
//! fallback_report 只用已完成的步骤渲染同样的骨架，不调用模型。

use std::sync::Arc;

use futures_util::StreamExt;

use crate::core::{AgentError, ModeHint, SessionState, NOT_EXECUTED};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::stages::events::preview;
use crate::stages::prompts::{render, REPORT_INSTRUCTION, REPORT_PROMPT};

const OUTCOME_PREVIEW_CHARS: usize = 500;

/// 每步的结果：已完成步骤优先用重规划摘要，其次账本内容；未完成为“未执行”
pub fn step_outcomes(state: &SessionState) -> Vec<(usize, String)> {
    state
        .steps
        .iter()
        .map(|spec| {
            let Some(record) = state.ledger.get(spec.key()).filter(|r| r.is_complete()) else {
                return (spec.index, NOT_EXECUTED.to_string());
            };
            let summary = state
                .summaries
                .iter()
                .find(|s| s.index == spec.index && !s.is_not_executed() && !s.result.trim().is_empty())
                .map(|s| s.result.clone());
            let outcome = summary
                .or_else(|| record.outcome_text().map(|t| preview(&t, OUTCOME_PREVIEW_CHARS)))
                .unwrap_or_default();
            (spec.index, outcome)
        })
        .collect()
}

/// 报告骨架；only_completed 时省略未完成的步骤结果
pub fn render_skeleton(state: &SessionState, only_completed: bool) -> String {
    let mut out = String::from("# 任务报告\n\n## 任务概述\n\n");
    out.push_str(&format!("- 目标：{}\n- 原始任务：{}\n\n", state.goal, state.task));

    out.push_str("## 执行计划\n\n");
    if !state.plan.is_empty() {
        out.push_str(&format!("{}\n\n", state.plan));
    }
    for spec in &state.steps {
        let mode = match (spec.mode_hint, &spec.tool) {
            (ModeHint::Tool, Some(tool)) => format!("工具：{tool}"),
            (ModeHint::Tool, None) => "工具".to_string(),
            (ModeHint::Direct, _) => "直接生成".to_string(),
        };
        out.push_str(&format!("{}. {}（{}）\n", spec.index, spec.description, mode));
    }

    out.push_str("\n## 步骤执行结果\n\n");
    for (index, outcome) in step_outcomes(state) {
        if only_completed && outcome == NOT_EXECUTED {
            continue;
        }
        out.push_str(&format!("- step{index}: {outcome}\n"));
    }
    out.push('\n');
    out
}

/// 尽力报告：会话被中止时只用已完成步骤渲染
pub fn fallback_report(state: &SessionState, reason: &str) -> String {
    let mut out = render_skeleton(state, true);
    out.push_str(&format!(
        "## 总结\n\n会话在完成全部步骤前终止（{reason}），以上仅包含已完成步骤的结果。\n"
    ));
    out
}

pub struct Reporter {
    llm: Arc<dyn LlmClient>,
}

impl Reporter {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 生成报告：on_chunk 依次收到骨架、总结标题与模型流式输出的每个片段；完成后写入 state.report 并追加助手消息
    pub async fn report(
        &self,
        state: &mut SessionState,
        on_chunk: &mut (dyn FnMut(&str) + Send),
    ) -> Result<String, AgentError> {
        let skeleton = render_skeleton(state, false);
        let outcomes = step_outcomes(state)
            .into_iter()
            .map(|(i, o)| format!("step{i}: {o}"))
            .collect::<Vec<_>>()
            .join("\n");
        let steps = state.render_steps();
        let prompt = render(
            REPORT_PROMPT,
            &[
                ("goal", state.goal.as_str()),
                ("plan", state.plan.as_str()),
                ("steps", steps.as_str()),
                ("summaries", outcomes.as_str()),
            ],
        );
        let messages = [Message::system(prompt), Message::user(REPORT_INSTRUCTION)];
        let mut stream = self.llm.complete_stream(&messages).await?;

        let mut report = skeleton;
        on_chunk(&report);
        let heading = "## 总结\n\n";
        report.push_str(heading);
        on_chunk(heading);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            report.push_str(&chunk);
            on_chunk(&chunk);
        }
        if !report.ends_with('\n') {
            report.push('\n');
            on_chunk("\n");
        }

        tracing::info!(session = %state.session_id, chars = report.chars().count(), "report generated");
        state.messages.push(Message::assistant(report.clone()));
        state.report = Some(report.clone());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{StepSpec, StepSummary};
    use crate::llm::{with_idle_timeout, LlmClient, LlmError, ScriptedLlmClient, TokenStream};
    use crate::memory::{RecordPatch, StepKey};
    use async_trait::async_trait;
    use futures_util::stream;
    use std::time::Duration;

    /// 输出一个片段后再也不产出的流式客户端
    struct StalledStreamLlm;

    #[async_trait]
    impl LlmClient for StalledStreamLlm {
        async fn complete(&self, _messages: &[Message]) -> Result<String, LlmError> {
            Err(LlmError::Request("not used".to_string()))
        }

        async fn complete_stream(&self, _messages: &[Message]) -> Result<TokenStream, LlmError> {
            let stalled: TokenStream =
                Box::pin(stream::iter(vec![Ok("部分总结".to_string())]).chain(stream::pending()));
            Ok(with_idle_timeout(stalled, Duration::from_millis(50)))
        }
    }

    fn finished_state() -> SessionState {
        let mut state = SessionState::for_task("s1", "写一个关于Python的博客");
        state.goal = "撰写一篇介绍 Python 基础的博客".into();
        state.plan = "先定主题再成文".into();
        state.steps = vec![
            StepSpec { index: 1, description: "确定主题".into(), mode_hint: ModeHint::Direct, tool: None },
            StepSpec {
                index: 2,
                description: "检索资料".into(),
                mode_hint: ModeHint::Tool,
                tool: Some("web_search".into()),
            },
        ];
        state
            .ledger
            .upsert(StepKey::new(1), RecordPatch::new().generated_result("主题为数据类型"))
            .unwrap();
        state
            .ledger
            .upsert(StepKey::new(2), RecordPatch::new().tool_result(vec!["官方教程".into()]))
            .unwrap();
        state.current_step = 3;
        state.summaries = vec![
            StepSummary { index: 1, result: "确定以数据类型为主题".into() },
            StepSummary::not_executed(2),
        ];
        state
    }

    #[tokio::test]
    async fn test_report_references_goal_and_each_step() {
        let llm = Arc::new(ScriptedLlmClient::new(["博客内容覆盖了 Python 数据类型。"]));
        let reporter = Reporter::new(llm);
        let mut state = finished_state();
        let mut chunks = Vec::new();

        let report = reporter
            .report(&mut state, &mut |c: &str| chunks.push(c.to_string()))
            .await
            .unwrap();

        assert!(report.starts_with("# 任务报告"));
        assert!(report.contains("撰写一篇介绍 Python 基础的博客"));
        assert!(report.contains("step1: 确定以数据类型为主题"));
        assert!(report.contains("step2: 官方教程"));
        assert!(report.contains("## 总结\n\n博客内容覆盖了 Python 数据类型。"));
        assert_eq!(chunks.concat(), report);
        assert_eq!(state.report.as_deref(), Some(report.as_str()));
        assert_eq!(state.messages.last().unwrap().content, report);
    }

    #[test]
    fn test_fallback_report_only_completed_steps() {
        let mut state = finished_state();
        state.ledger = Default::default();
        state
            .ledger
            .upsert(StepKey::new(1), RecordPatch::new().generated_result("主题为数据类型"))
            .unwrap();
        state.current_step = 2;

        let report = fallback_report(&state, "recursion limit of 25 transitions exceeded");
        assert!(report.contains("step1: 确定以数据类型为主题"));
        assert!(!report.contains("step2:"));
        assert!(report.contains("recursion limit"));
        assert!(report.contains("2. 检索资料（工具：web_search）"));
    }

    #[tokio::test]
    async fn test_stalled_stream_fails_with_timeout() {
        let reporter = Reporter::new(Arc::new(StalledStreamLlm));
        let mut state = finished_state();
        let mut chunks = Vec::new();

        let err = reporter
            .report(&mut state, &mut |c: &str| chunks.push(c.to_string()))
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Generation(LlmError::Timeout)));
        assert!(chunks.concat().ends_with("部分总结"));
        assert!(state.report.is_none());
    }
}
