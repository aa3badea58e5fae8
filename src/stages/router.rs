//! Router：根据会话状态选择下一阶段
//!
//! decide_* 都是只读函数，同一份状态总给出同一结果；attach_tool_response 是 ToolExec 阶段唯一的写操作，
//! 把工具结果（或失败原因）挂到当前步骤的账本记录上。

use crate::core::{AgentError, SessionState};
use crate::memory::RecordPatch;
use crate::workflow::Stage;

/// 路由结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// 执行指定工具
    Tool(String),
    Solve,
    Replan,
    Report,
}

impl From<Route> for Stage {
    fn from(route: Route) -> Self {
        match route {
            Route::Tool(name) => Stage::ToolExec(name),
            Route::Solve => Stage::Solve,
            Route::Replan => Stage::Replan,
            Route::Report => Stage::Report,
        }
    }
}

/// Solve 之后：最新消息带工具调用则去第一个工具；否则全部完成去 Report，未完成去 Replan
pub fn decide_next_after_solve(state: &SessionState) -> Route {
    if let Some(call) = state.messages.last().and_then(|m| m.tool_calls.first()) {
        return Route::Tool(call.name.clone());
    }
    if state.all_steps_complete() {
        Route::Report
    } else {
        Route::Replan
    }
}

/// 工具执行后总是回到 Solve，由 Dispatcher 用已有结果收尾（或在失败后重试）
pub fn decide_after_tool_exec(_state: &SessionState) -> Route {
    Route::Solve
}

/// Replan 之后：任一步骤摘要含“未执行”则回到 Solve，否则去 Report
pub fn decide_after_replan(state: &SessionState) -> Route {
    if state.summaries.iter().any(|s| s.is_not_executed()) {
        Route::Solve
    } else {
        Route::Report
    }
}

/// 把工具结果挂到当前步骤的在途记录；失败时只记录原因，记录保持未完成
pub fn attach_tool_response(
    state: &mut SessionState,
    call_id: &str,
    result: &Result<Vec<String>, AgentError>,
) -> Result<(), AgentError> {
    let key = state.current_key();
    let in_flight = state
        .ledger
        .get(key)
        .and_then(|r| r.tool_call.as_ref())
        .is_some_and(|c| c.id == call_id);
    if !in_flight {
        return Err(AgentError::InvalidState(format!(
            "tool response {call_id} does not belong to the in-flight call of {key}"
        )));
    }
    let patch = match result {
        Ok(snippets) => RecordPatch::new().tool_result(snippets.clone()),
        Err(AgentError::ToolInvocation { reason, .. }) => RecordPatch::new().tool_error(reason.clone()),
        Err(other) => RecordPatch::new().tool_error(other.to_string()),
    };
    state.ledger.upsert(key, patch)?;
    Ok(())
}
