//! 编排器：状态机主控循环
//!
//! Goal → Plan → Solve ⇄ {ToolExec, Replan} → Report → End。每个阶段运行完毕后由状态图给出下一阶段，
//! 转移计数超过 recursion_limit 即终止会话并输出只含已完成步骤的尽力报告。
//! 每次转移后保存检查点；取消只在转移之间检查，不打断正在运行的阶段。

use std::pin::Pin;
use std::sync::Arc;

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, Document, RecoveryAction, RecoveryEngine, SessionState};
use crate::memory::CheckpointStore;
use crate::stages::events::preview;
use crate::stages::reporter::fallback_report;
use crate::stages::router::{
    attach_tool_response, decide_after_replan, decide_after_tool_exec, decide_next_after_solve,
};
use crate::stages::{
    Dispatcher, GoalRefiner, Planner, Replanner, Reporter, SolveOutcome, StageEvent,
};
use crate::tools::ToolGateway;
use crate::workflow::{Stage, StageGraph, StageGraphBuilder, StageKind, WorkflowError};

/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 编排过程事件流：有限、只能消费一次
pub type EventStream = Pin<Box<dyn Stream<Item = StageEvent> + Send>>;

/// 一次运行的结果：最终状态（失败时为中止时的状态）与运行结果
#[derive(Debug)]
pub struct RunOutcome {
    pub state: SessionState,
    pub result: Result<(), AgentError>,
}

/// 标准编排图
pub fn default_graph() -> Result<StageGraph, WorkflowError> {
    StageGraphBuilder::new(StageKind::Goal)
        .edge(StageKind::Goal, StageKind::Plan)
        .edge(StageKind::Plan, StageKind::Solve)
        .conditional(
            StageKind::Solve,
            decide_next_after_solve,
            vec![StageKind::ToolExec, StageKind::Replan, StageKind::Report],
        )
        .conditional(StageKind::ToolExec, decide_after_tool_exec, vec![StageKind::Solve])
        .conditional(
            StageKind::Replan,
            decide_after_replan,
            vec![StageKind::Solve, StageKind::Report],
        )
        .edge(StageKind::Report, StageKind::End)
        .build()
}

/// 编排器：持有各阶段组件、工具网关与检查点存储，可被多个独立会话共享
pub struct Orchestrator {
    pub(crate) graph: StageGraph,
    pub(crate) goal: GoalRefiner,
    pub(crate) planner: Planner,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) replanner: Replanner,
    pub(crate) reporter: Reporter,
    pub(crate) gateway: Arc<ToolGateway>,
    pub(crate) checkpoints: Arc<dyn CheckpointStore>,
    pub(crate) recovery: RecoveryEngine,
    pub(crate) recursion_limit: usize,
}

fn emit(events: Option<&mpsc::UnboundedSender<StageEvent>>, event: StageEvent) {
    if let Some(tx) = events {
        // 消费方已关闭时丢弃事件，会话照常运行
        let _ = tx.send(event);
    }
}

impl Orchestrator {
    pub fn recursion_limit(&self) -> usize {
        self.recursion_limit
    }

    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    /// 从 state.stage 开始运行直到 End；事件按发生顺序写入 events
    pub async fn run(
        &self,
        state: &mut SessionState,
        events: Option<&mpsc::UnboundedSender<StageEvent>>,
        cancel: &CancellationToken,
    ) -> Result<(), AgentError> {
        tracing::info!(session = %state.session_id, stage = %state.stage, "session run started");
        while !state.stage.is_terminal() {
            if cancel.is_cancelled() {
                tracing::warn!(session = %state.session_id, stage = %state.stage, "session cancelled");
                emit(events, StageEvent::Error { text: "会话已取消".to_string() });
                return Err(AgentError::Cancelled);
            }
            if state.transitions >= self.recursion_limit {
                return Err(self.abort_on_recursion_limit(state, events).await);
            }

            let stage = state.stage.clone();
            emit(
                events,
                StageEvent::StageStarted {
                    stage: stage.to_string(),
                    transition: state.transitions,
                },
            );
            if let Err(err) = self.execute(&stage, state, events).await {
                tracing::error!(session = %state.session_id, stage = %stage, error = %err, "stage failed");
                emit(events, StageEvent::Error { text: err.to_string() });
                self.checkpoint(state).await;
                return Err(err);
            }

            let next = self.graph.next(&stage, state)?;
            state.transitions += 1;
            tracing::info!(
                session = %state.session_id,
                from = %stage,
                to = %next,
                transitions = state.transitions,
                "stage transition"
            );
            state.stage = next;
            self.checkpoint(state).await;
        }

        emit(
            events,
            StageEvent::Done {
                session_id: state.session_id.clone(),
            },
        );
        Ok(())
    }

    /// 在后台任务中运行，返回事件流与最终结果句柄
    pub fn stream(
        self: &Arc<Self>,
        mut state: SessionState,
        cancel: CancellationToken,
    ) -> (EventStream, JoinHandle<RunOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let orchestrator = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let result = orchestrator.run(&mut state, Some(&tx), &cancel).await;
            RunOutcome { state, result }
        });
        let events = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        (Box::pin(events), handle)
    }

    /// 从检查点恢复会话并继续运行到结束
    pub async fn resume(
        &self,
        session_id: &str,
        events: Option<&mpsc::UnboundedSender<StageEvent>>,
        cancel: &CancellationToken,
    ) -> Result<SessionState, AgentError> {
        let mut state = self
            .checkpoints
            .load(session_id)
            .await?
            .ok_or_else(|| AgentError::InvalidState(format!("no checkpoint for session {session_id}")))?;
        tracing::info!(
            session = %session_id,
            stage = %state.stage,
            transitions = state.transitions,
            "resuming session"
        );
        self.run(&mut state, events, cancel).await?;
        Ok(state)
    }

    async fn execute(
        &self,
        stage: &Stage,
        state: &mut SessionState,
        events: Option<&mpsc::UnboundedSender<StageEvent>>,
    ) -> Result<(), AgentError> {
        match stage {
            Stage::Goal => {
                let goal = self.goal.refine(state).await?;
                emit(events, StageEvent::GoalRefined { goal });
            }
            Stage::Plan => {
                let outcome = self.planner.plan(state).await?;
                if outcome.retries > 0 {
                    emit(
                        events,
                        StageEvent::Recovery {
                            action: "retry_with_prompt".to_string(),
                            detail: format!("计划输出不合法，已重新提示 {} 次", outcome.retries),
                        },
                    );
                }
                emit(
                    events,
                    StageEvent::Planned {
                        plan: state.plan.clone(),
                        steps: state.steps.clone(),
                    },
                );
            }
            Stage::Solve => match self.dispatcher.solve(state).await? {
                SolveOutcome::ToolRequested { step, call } => emit(
                    events,
                    StageEvent::ToolCall {
                        step,
                        tool: call.name,
                        args: call.arguments,
                    },
                ),
                SolveOutcome::Completed { step, result } => {
                    emit(events, StageEvent::StepCompleted { step, result })
                }
                SolveOutcome::NothingToSolve => {}
            },
            Stage::ToolExec(tool) => self.execute_tool(tool, state, events).await?,
            Stage::Replan => {
                let outcome = self.replanner.replan(state).await?;
                if outcome.retries > 0 {
                    emit(
                        events,
                        StageEvent::Recovery {
                            action: "retry_with_prompt".to_string(),
                            detail: format!("重规划输出不合法，已重新提示 {} 次", outcome.retries),
                        },
                    );
                }
                emit(
                    events,
                    StageEvent::Replanned {
                        plan: state.plan.clone(),
                        steps: state.steps.clone(),
                        summaries: state.summaries.clone(),
                    },
                );
            }
            Stage::Report => {
                let mut on_chunk = |text: &str| {
                    emit(events, StageEvent::ReportChunk { text: text.to_string() });
                };
                self.reporter.report(state, &mut on_chunk).await?;
            }
            Stage::End => {}
        }
        Ok(())
    }

    /// ToolExec：执行最新消息中的第一个工具调用，回填工具响应消息与账本
    async fn execute_tool(
        &self,
        tool: &str,
        state: &mut SessionState,
        events: Option<&mpsc::UnboundedSender<StageEvent>>,
    ) -> Result<(), AgentError> {
        let call = state
            .messages
            .last()
            .and_then(|m| m.tool_calls.first())
            .filter(|c| c.name == tool)
            .cloned()
            .ok_or_else(|| AgentError::InvalidState(format!("no pending call for tool '{tool}'")))?;
        let step = state.current_step;

        let outcome = self.gateway.execute_call(&call).await;
        state.messages.push(outcome.message);
        attach_tool_response(state, &call.id, &outcome.result)?;

        match outcome.result {
            Ok(snippets) => {
                let joined = snippets.join("\n");
                state
                    .documents
                    .extend(snippets.into_iter().map(|s| Document::new(s, tool)));
                emit(
                    events,
                    StageEvent::Observation {
                        step,
                        tool: tool.to_string(),
                        preview: preview(&joined, OBSERVATION_PREVIEW_CHARS),
                    },
                );
            }
            Err(err) => {
                let reason = match err {
                    AgentError::ToolInvocation { reason, .. } => reason,
                    other => other.to_string(),
                };
                emit(
                    events,
                    StageEvent::ToolFailure {
                        step,
                        tool: tool.to_string(),
                        reason,
                    },
                );
            }
        }
        Ok(())
    }

    async fn abort_on_recursion_limit(
        &self,
        state: &mut SessionState,
        events: Option<&mpsc::UnboundedSender<StageEvent>>,
    ) -> AgentError {
        let err = AgentError::RecursionLimitExceeded {
            limit: self.recursion_limit,
        };
        tracing::error!(session = %state.session_id, stage = %state.stage, error = %err, "aborting session");
        if self.recovery.handle(&err, 0) == RecoveryAction::BestEffortReport {
            let report = fallback_report(state, &err.to_string());
            emit(
                events,
                StageEvent::Recovery {
                    action: "best_effort_report".to_string(),
                    detail: err.to_string(),
                },
            );
            emit(events, StageEvent::ReportChunk { text: report.clone() });
            state.report = Some(report);
        }
        emit(events, StageEvent::Error { text: err.to_string() });
        self.checkpoint(state).await;
        err
    }

    /// 保存检查点；失败只记录日志
    async fn checkpoint(&self, state: &SessionState) {
        if let Err(e) = self.checkpoints.save(state).await {
            tracing::warn!(session = %state.session_id, error = %e, "checkpoint save failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_graph_wiring() {
        let graph = default_graph().unwrap();
        assert_eq!(graph.entry(), Stage::Goal);
        let solve_targets = graph.edge(StageKind::Solve).unwrap().targets();
        assert!(solve_targets.contains(&StageKind::ToolExec));
        assert!(solve_targets.contains(&StageKind::Report));
        assert_eq!(
            graph.edge(StageKind::Report).unwrap().targets(),
            vec![StageKind::End]
        );
        assert_eq!(
            graph.next(&Stage::Plan, &SessionState::new("s")).unwrap(),
            Stage::Solve
        );
    }
}
