//! 编排流程集成测试：用脚本化 LLM 与测试内工具驱动完整状态机

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use taskpilot::config::OrchestratorSection;
use taskpilot::core::{AgentError, Orchestrator, OrchestratorBuilder, SessionState, NOT_EXECUTED};
use taskpilot::llm::{LlmError, ScriptedLlmClient};
use taskpilot::memory::{CheckpointStore, MemoryCheckpointStore, Role, StepKey};
use taskpilot::stages::prompts::TOOL_BINDING_MARKER;
use taskpilot::stages::StageEvent;
use taskpilot::tools::{Tool, ToolRegistry};
use taskpilot::workflow::Stage;

/// 记录参数的搜索工具；fail 为 Some 时总是失败
struct RecordingSearch {
    calls: Arc<Mutex<Vec<Value>>>,
    fail: Option<&'static str>,
}

#[async_trait]
impl Tool for RecordingSearch {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "联网检索"
    }

    async fn execute(&self, args: Value) -> Result<Vec<String>, String> {
        self.calls.lock().unwrap().push(args);
        match self.fail {
            Some(reason) => Err(reason.to_string()),
            None => Ok(vec!["Python 官方教程".to_string(), "Python 入门指南".to_string()]),
        }
    }
}

fn search_tool(fail: Option<&'static str>) -> (ToolRegistry, Arc<Mutex<Vec<Value>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut registry = ToolRegistry::new();
    registry.register(RecordingSearch {
        calls: calls.clone(),
        fail,
    });
    (registry, calls)
}

fn orchestrator(
    llm: Arc<ScriptedLlmClient>,
    registry: ToolRegistry,
    store: Arc<MemoryCheckpointStore>,
    recursion_limit: usize,
) -> Orchestrator {
    OrchestratorBuilder::new(llm)
        .with_tools(registry)
        .with_checkpoints(store)
        .with_settings(OrchestratorSection {
            recursion_limit,
            ..OrchestratorSection::default()
        })
        .with_tool_timeout(5)
        .build()
        .unwrap()
}

fn plan_reply(steps: Value) -> String {
    json!({"summary": "先定大纲，再查资料，最后成文", "steps": steps}).to_string()
}

fn replan_reply(results: &[(&str, &str, &str)]) -> String {
    let steps: Vec<Value> = results
        .iter()
        .map(|(description, mode, result)| {
            let mut step = json!({"description": description, "mode": mode, "result": result});
            if *mode == "tool" {
                step["tool"] = json!("web_search");
            }
            step
        })
        .collect();
    json!({"plan": "按原计划继续", "steps": steps}).to_string()
}

fn drain(mut rx: mpsc::UnboundedReceiver<StageEvent>) -> Vec<StageEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_blog_task_runs_through_tool_step_to_report() {
    let llm = Arc::new(ScriptedLlmClient::new([
        "撰写一篇介绍 Python 基础知识的博客。".to_string(),
        plan_reply(json!([
            {"description": "确定博客主题与大纲", "mode": "direct"},
            {"description": "检索 Python 教程资料", "mode": "tool", "tool": "web_search"},
            {"description": "撰写博客正文", "mode": "direct"}
        ])),
        "大纲：变量、控制流、函数".to_string(),
        replan_reply(&[
            ("确定博客主题与大纲", "direct", "确定了三段式大纲"),
            ("检索 Python 教程资料", "tool", NOT_EXECUTED),
            ("撰写博客正文", "direct", NOT_EXECUTED),
        ]),
        json!({"tool_calls": [{"name": "web_search", "arguments": {"key_words": "Python 教程"}}]})
            .to_string(),
        "整理了两份 Python 教程资料".to_string(),
        replan_reply(&[
            ("确定博客主题与大纲", "direct", "确定了三段式大纲"),
            ("检索 Python 教程资料", "tool", "整理了两份 Python 教程资料"),
            ("撰写博客正文", "direct", NOT_EXECUTED),
        ]),
        "正文完成，覆盖变量、控制流与函数".to_string(),
        "全文围绕 Python 基础展开。".to_string(),
    ]));
    let (registry, calls) = search_tool(None);
    let store = Arc::new(MemoryCheckpointStore::new());
    let orchestrator = orchestrator(llm.clone(), registry, store.clone(), 25);
    let (tx, rx) = mpsc::unbounded_channel();
    let mut state = SessionState::for_task("blog", "写一个关于Python的博客");

    orchestrator
        .run(&mut state, Some(&tx), &CancellationToken::new())
        .await
        .unwrap();
    let events = drain(rx);

    // 目标与计划
    assert!(state.goal.contains("Python") && state.goal.contains("博客"));
    assert!((3..=5).contains(&state.steps.len()));

    // step1 直接生成，没有工具调用
    let step1 = state.ledger.get(StepKey::new(1)).unwrap();
    assert!(step1.tool_call.is_none());
    assert_eq!(step1.generated_result.as_deref(), Some("大纲：变量、控制流、函数"));

    // step2 只调用一次工具，结果挂到账本，随后由总结完成
    let recorded = calls.lock().unwrap().clone();
    assert_eq!(recorded, vec![json!({"key_words": "Python 教程"})]);
    let step2 = state.ledger.get(StepKey::new(2)).unwrap();
    assert_eq!(
        step2.tool_result.as_deref(),
        Some(&["Python 官方教程".to_string(), "Python 入门指南".to_string()][..])
    );
    assert_eq!(step2.generated_result.as_deref(), Some("整理了两份 Python 教程资料"));
    let summarize_prompt = &llm.prompts()[5][0].content;
    assert!(summarize_prompt.contains("Python 官方教程"));

    // 工具响应消息与调用 id 关联
    let call_id = step2.tool_call.as_ref().unwrap().id.clone();
    let tool_msg = state
        .messages
        .messages()
        .iter()
        .find(|m| m.role == Role::Tool)
        .unwrap();
    assert_eq!(tool_msg.tool_call_id.as_deref(), Some(call_id.as_str()));

    // 全部完成后进入报告
    assert_eq!(state.current_step, 4);
    assert_eq!(state.stage, Stage::End);
    let report = state.report.clone().unwrap();
    assert!(report.contains(&state.goal));
    assert!(report.contains("step1: 确定了三段式大纲"));
    assert!(report.contains("step2: 整理了两份 Python 教程资料"));
    assert!(report.contains("step3: 正文完成，覆盖变量、控制流与函数"));
    assert!(report.contains("全文围绕 Python 基础展开。"));
    assert_eq!(llm.remaining(), 0);

    // 事件顺序
    assert!(matches!(events.first(), Some(StageEvent::StageStarted { .. })));
    assert!(matches!(events.last(), Some(StageEvent::Done { .. })));
    let tool_call_pos = events
        .iter()
        .position(|e| matches!(e, StageEvent::ToolCall { tool, .. } if tool == "web_search"))
        .unwrap();
    assert!(matches!(
        events[tool_call_pos + 2],
        StageEvent::Observation { step: 2, .. }
    ));
    let streamed: String = events
        .iter()
        .filter_map(|e| match e {
            StageEvent::ReportChunk { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, report);

    // 工具片段进入会话文档
    assert!(state.documents.iter().any(|d| d.source == "web_search"));

    // 最终状态已保存检查点
    let saved = store.load("blog").await.unwrap().unwrap();
    assert_eq!(saved.stage, Stage::End);
}

#[tokio::test]
async fn test_failed_tool_is_fed_back_then_replanned() {
    let tool_call =
        json!({"tool_calls": [{"name": "web_search", "arguments": {"key_words": "Python 教程"}}]}).to_string();
    let llm = Arc::new(ScriptedLlmClient::new([
        "撰写一篇 Python 博客。".to_string(),
        plan_reply(json!([
            {"description": "检索 Python 教程资料", "mode": "tool", "tool": "web_search"},
            {"description": "撰写博客正文", "mode": "direct"}
        ])),
        tool_call.clone(),
        tool_call,
        "根据已有知识整理了资料".to_string(),
        replan_reply(&[
            ("检索 Python 教程资料", "tool", "根据已有知识整理了资料"),
            ("撰写博客正文", "direct", NOT_EXECUTED),
        ]),
        "正文完成".to_string(),
        "总结".to_string(),
    ]));
    let (registry, calls) = search_tool(Some("HTTP 500"));
    let orchestrator = orchestrator(llm.clone(), registry, Arc::new(MemoryCheckpointStore::new()), 25);
    let (tx, rx) = mpsc::unbounded_channel();
    let mut state = SessionState::for_task("c", "写一个关于Python的博客");

    orchestrator
        .run(&mut state, Some(&tx), &CancellationToken::new())
        .await
        .unwrap();
    let events = drain(rx);

    // 两次失败都没有完成记录，之后不再绑定工具；step1 由直接生成的结果完成
    assert_eq!(calls.lock().unwrap().len(), 2);
    let step1 = state.ledger.get(StepKey::new(1)).unwrap();
    assert!(step1.tool_result.is_none());
    assert_eq!(step1.tool_error.as_deref(), Some("HTTP 500"));
    assert_eq!(step1.attempts, 2);
    assert_eq!(step1.generated_result.as_deref(), Some("根据已有知识整理了资料"));
    assert!(step1.is_complete());
    let prompts = llm.prompts();
    assert!(prompts[3][0].content.contains(TOOL_BINDING_MARKER));
    assert!(!prompts[4][0].content.contains(TOOL_BINDING_MARKER));

    // 错误作为工具响应反馈给模型
    let feedback: Vec<&str> = state
        .messages
        .messages()
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(feedback.len(), 2);
    assert_eq!(feedback[0], "Error: HTTP 500. please fix your mistakes.");
    let failures = events
        .iter()
        .filter(|e| matches!(e, StageEvent::ToolFailure { .. }))
        .count();
    assert_eq!(failures, 2);

    // 重规划把未完成的步骤标为未执行，并回到 Solve 而不是 Report
    let replan_pos = events
        .iter()
        .position(|e| matches!(e, StageEvent::Replanned { .. }))
        .unwrap();
    match &events[replan_pos] {
        StageEvent::Replanned { summaries, .. } => {
            // 工具失败的 step1 以直接生成的结果记为已完成，step2 仍未执行
            assert_eq!(summaries[0].index, 1);
            assert_eq!(summaries[0].result, "根据已有知识整理了资料");
            assert_eq!(summaries[1].result, NOT_EXECUTED);
        }
        other => panic!("Expected Replanned, got {other:?}"),
    }
    assert!(state.report.as_deref().unwrap().contains("step1: 根据已有知识整理了资料"));
    assert!(matches!(
        &events[replan_pos + 1],
        StageEvent::StageStarted { stage, .. } if stage == "solve"
    ));
    assert!(state.report.is_some());
}

#[tokio::test]
async fn test_recursion_limit_aborts_with_best_effort_report() {
    let llm = Arc::new(ScriptedLlmClient::new([
        "撰写一篇 Python 博客。".to_string(),
        plan_reply(json!([
            {"description": "确定大纲", "mode": "direct"},
            {"description": "撰写正文", "mode": "direct"}
        ])),
        "大纲已确定".to_string(),
        replan_reply(&[("确定大纲", "direct", "大纲已确定"), ("撰写正文", "direct", NOT_EXECUTED)]),
    ]));
    let orchestrator = orchestrator(llm.clone(), ToolRegistry::new(), Arc::new(MemoryCheckpointStore::new()), 4);
    let (tx, rx) = mpsc::unbounded_channel();
    let mut state = SessionState::for_task("loop", "写一个关于Python的博客");

    let err = orchestrator
        .run(&mut state, Some(&tx), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::RecursionLimitExceeded { limit: 4 }));
    assert_eq!(state.transitions, 4);

    let report = state.report.clone().unwrap();
    assert!(report.contains("step1: 大纲已确定"));
    assert!(!report.contains("step2:"));

    let events = drain(rx);
    assert!(events.iter().any(
        |e| matches!(e, StageEvent::Recovery { action, .. } if action == "best_effort_report")
    ));
    assert!(matches!(events.last(), Some(StageEvent::Error { .. })));
    assert_eq!(llm.remaining(), 0);
}

#[tokio::test]
async fn test_invalid_plan_twice_fails_session_without_report() {
    let llm = Arc::new(ScriptedLlmClient::new([
        "撰写一篇 Python 博客。".to_string(),
        plan_reply(json!([])),
        "这不是计划".to_string(),
    ]));
    let orchestrator = orchestrator(llm, ToolRegistry::new(), Arc::new(MemoryCheckpointStore::new()), 25);
    let (tx, rx) = mpsc::unbounded_channel();
    let mut state = SessionState::for_task("bad-plan", "写一个关于Python的博客");

    let err = orchestrator
        .run(&mut state, Some(&tx), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::PlanValidation(_)));
    assert!(state.steps.is_empty());
    assert!(state.report.is_none());
    assert!(matches!(drain(rx).last(), Some(StageEvent::Error { .. })));
}

#[tokio::test]
async fn test_resume_continues_from_checkpoint() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let first = Arc::new(ScriptedLlmClient::new([
        "撰写一篇 Python 博客。".to_string(),
        plan_reply(json!([
            {"description": "确定大纲", "mode": "direct"},
            {"description": "撰写正文", "mode": "direct"}
        ])),
        "大纲已确定".to_string(),
    ]));
    first.push_error(LlmError::Timeout);
    let orchestrator_a = orchestrator(first, ToolRegistry::new(), store.clone(), 25);
    let mut state = SessionState::for_task("resume-me", "写一个关于Python的博客");
    let err = orchestrator_a
        .run(&mut state, None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Generation(LlmError::Timeout)));

    let saved = store.load("resume-me").await.unwrap().unwrap();
    assert_eq!(saved.stage, Stage::Replan);
    assert_eq!(saved.current_step, 2);

    let second = Arc::new(ScriptedLlmClient::new([
        replan_reply(&[("确定大纲", "direct", "大纲已确定"), ("撰写正文", "direct", NOT_EXECUTED)]),
        "正文完成".to_string(),
        "总结".to_string(),
    ]));
    let orchestrator_b = orchestrator(second.clone(), ToolRegistry::new(), store.clone(), 25);
    let resumed = orchestrator_b
        .resume("resume-me", None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(resumed.stage, Stage::End);
    assert_eq!(resumed.current_step, 3);
    assert!(resumed.report.unwrap().contains("step2: 正文完成"));
    assert_eq!(second.remaining(), 0);

    let missing = orchestrator_b
        .resume("unknown", None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(missing, AgentError::InvalidState(_)));
}

#[tokio::test]
async fn test_cancelled_session_stops_before_next_stage() {
    let llm = Arc::new(ScriptedLlmClient::new(["目标".to_string()]));
    let orchestrator = orchestrator(llm.clone(), ToolRegistry::new(), Arc::new(MemoryCheckpointStore::new()), 25);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut state = SessionState::for_task("cancel", "写一个关于Python的博客");

    let err = orchestrator.run(&mut state, None, &cancel).await.unwrap_err();
    assert!(matches!(err, AgentError::Cancelled));
    assert!(llm.prompts().is_empty());
    assert_eq!(state.stage, Stage::Goal);
}

#[tokio::test]
async fn test_stream_yields_events_until_done() {
    let llm = Arc::new(ScriptedLlmClient::new([
        "撰写一篇 Python 博客。".to_string(),
        plan_reply(json!([{"description": "撰写正文", "mode": "direct"}])),
        "正文完成".to_string(),
        "总结".to_string(),
    ]));
    let orchestrator = Arc::new(orchestrator(
        llm,
        ToolRegistry::new(),
        Arc::new(MemoryCheckpointStore::new()),
        25,
    ));
    let state = SessionState::for_task("stream", "写一个关于Python的博客");

    let (stream, handle) = orchestrator.stream(state, CancellationToken::new());
    let events: Vec<StageEvent> = stream.collect().await;
    let outcome = handle.await.unwrap();

    outcome.result.unwrap();
    assert!(matches!(events.first(), Some(StageEvent::StageStarted { stage, .. }) if stage == "goal"));
    assert!(matches!(events.last(), Some(StageEvent::Done { session_id }) if session_id == "stream"));
    let stages: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            StageEvent::StageStarted { stage, .. } => Some(stage.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(stages, vec!["goal", "plan", "solve", "report"]);
    assert_eq!(outcome.state.stage, Stage::End);
}

#[tokio::test]
async fn test_second_task_in_same_session_keeps_history() {
    let llm = Arc::new(ScriptedLlmClient::new([
        "撰写一篇 Python 博客。".to_string(),
        plan_reply(json!([{"description": "撰写正文", "mode": "direct"}])),
        "正文完成".to_string(),
        "总结".to_string(),
        "把博客翻译成英文。".to_string(),
        plan_reply(json!([{"description": "翻译正文", "mode": "direct"}])),
        "Translated".to_string(),
        "总结二".to_string(),
    ]));
    let orchestrator = orchestrator(llm, ToolRegistry::new(), Arc::new(MemoryCheckpointStore::new()), 25);
    let cancel = CancellationToken::new();
    let mut state = SessionState::for_task("multi", "写一个关于Python的博客");
    orchestrator.run(&mut state, None, &cancel).await.unwrap();
    let first_len = state.messages.len();

    state.begin_task("把它翻译成英文");
    orchestrator.run(&mut state, None, &cancel).await.unwrap();

    assert!(state.messages.len() > first_len);
    assert_eq!(state.steps[0].description, "翻译正文");
    assert!(state.report.unwrap().contains("总结二"));
}
