//! 编排状态图
//!
//! 邻接表：每个阶段恰好一条出边（无条件或条件）；next() 根据当前阶段与会话状态给出下一阶段，
//! 并校验路由结果属于声明的目标集合。

use std::collections::HashMap;

use crate::core::SessionState;
use crate::workflow::types::*;

/// 编译好的状态图
#[derive(Debug, Clone)]
pub struct StageGraph {
    pub(crate) entry: StageKind,
    pub(crate) edges: HashMap<StageKind, Edge>,
}

impl StageGraph {
    pub fn entry(&self) -> Stage {
        match self.entry {
            StageKind::Goal => Stage::Goal,
            StageKind::Plan => Stage::Plan,
            StageKind::Solve => Stage::Solve,
            StageKind::Replan => Stage::Replan,
            StageKind::Report => Stage::Report,
            // 构建器保证入口不是 ToolExec/End
            StageKind::ToolExec | StageKind::End => Stage::Goal,
        }
    }

    pub fn edge(&self, from: StageKind) -> Option<&Edge> {
        self.edges.get(&from)
    }

    /// 计算下一阶段
    pub fn next(&self, from: &Stage, state: &SessionState) -> Result<Stage, WorkflowError> {
        let kind = from.kind();
        let edge = self.edges.get(&kind).ok_or(WorkflowError::MissingEdge(kind))?;
        let next = match edge {
            Edge::Direct(to) => stage_of(*to)?,
            Edge::Conditional { router, targets } => {
                let stage: Stage = router(state).into();
                if !targets.contains(&stage.kind()) {
                    return Err(WorkflowError::UnexpectedTarget {
                        from: kind,
                        to: stage.kind(),
                    });
                }
                stage
            }
        };
        Ok(next)
    }
}

/// 无条件边目标转为 Stage；ToolExec 必须由路由函数给出工具名
fn stage_of(kind: StageKind) -> Result<Stage, WorkflowError> {
    Ok(match kind {
        StageKind::Goal => Stage::Goal,
        StageKind::Plan => Stage::Plan,
        StageKind::Solve => Stage::Solve,
        StageKind::ToolExec => return Err(WorkflowError::MissingToolName),
        StageKind::Replan => Stage::Replan,
        StageKind::Report => Stage::Report,
        StageKind::End => Stage::End,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::Route;
    use crate::workflow::StageGraphBuilder;

    fn to_replan(_: &SessionState) -> Route {
        Route::Replan
    }

    fn to_tool(_: &SessionState) -> Route {
        Route::Tool("web_search".to_string())
    }

    fn graph_with_solve_router(router: RouterFn) -> StageGraph {
        StageGraphBuilder::new(StageKind::Goal)
            .edge(StageKind::Goal, StageKind::Plan)
            .edge(StageKind::Plan, StageKind::Solve)
            .conditional(StageKind::Solve, router, vec![StageKind::Replan, StageKind::Report])
            .edge(StageKind::Replan, StageKind::Solve)
            .edge(StageKind::Report, StageKind::End)
            .build()
            .unwrap()
    }

    #[test]
    fn test_direct_and_conditional_edges() {
        let graph = graph_with_solve_router(to_replan);
        let state = SessionState::new("s");
        assert_eq!(graph.entry(), Stage::Goal);
        assert_eq!(graph.next(&Stage::Goal, &state).unwrap(), Stage::Plan);
        assert_eq!(graph.next(&Stage::Solve, &state).unwrap(), Stage::Replan);
        assert_eq!(graph.next(&Stage::Report, &state).unwrap(), Stage::End);
    }

    #[test]
    fn test_undeclared_target_is_rejected() {
        let graph = graph_with_solve_router(to_tool);
        let state = SessionState::new("s");
        let err = graph.next(&Stage::Solve, &state).unwrap_err();
        assert_eq!(
            err,
            WorkflowError::UnexpectedTarget {
                from: StageKind::Solve,
                to: StageKind::ToolExec
            }
        );
    }

    #[test]
    fn test_terminal_has_no_next() {
        let graph = graph_with_solve_router(to_replan);
        let state = SessionState::new("s");
        assert_eq!(
            graph.next(&Stage::End, &state).unwrap_err(),
            WorkflowError::MissingEdge(StageKind::End)
        );
    }
}
