//! 状态图构建器
//!
//! 提供流畅的 API 声明节点间的边，build() 时校验图的结构

use std::collections::{HashMap, HashSet, VecDeque};

use crate::workflow::graph::StageGraph;
use crate::workflow::types::*;

/// 状态图构建器
pub struct StageGraphBuilder {
    entry: StageKind,
    edges: HashMap<StageKind, Edge>,
    errors: Vec<WorkflowError>,
}

impl StageGraphBuilder {
    /// 创建构建器，指定入口阶段
    pub fn new(entry: StageKind) -> Self {
        Self {
            entry,
            edges: HashMap::new(),
            errors: Vec::new(),
        }
    }

    fn insert(mut self, from: StageKind, edge: Edge) -> Self {
        if from == StageKind::End {
            self.errors.push(WorkflowError::TerminalHasEdge);
        } else if self.edges.insert(from, edge).is_some() {
            self.errors.push(WorkflowError::DuplicateEdge(from));
        }
        self
    }

    /// 添加无条件边
    pub fn edge(self, from: StageKind, to: StageKind) -> Self {
        self.insert(from, Edge::Direct(to))
    }

    /// 添加条件边
    pub fn conditional(self, from: StageKind, router: RouterFn, targets: Vec<StageKind>) -> Self {
        self.insert(from, Edge::Conditional { router, targets })
    }

    /// 校验并构建：每个可达的非终止阶段都有出边，End 可达且只能从 Report 进入
    pub fn build(self) -> Result<StageGraph, WorkflowError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }
        if matches!(self.entry, StageKind::End | StageKind::ToolExec) {
            return Err(WorkflowError::MissingEdge(self.entry));
        }

        for (from, edge) in &self.edges {
            if *from != StageKind::Report && edge.targets().contains(&StageKind::End) {
                return Err(WorkflowError::EndNotFromReport(*from));
            }
        }

        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([self.entry]);
        while let Some(kind) = queue.pop_front() {
            if !seen.insert(kind) || kind == StageKind::End {
                continue;
            }
            let edge = self.edges.get(&kind).ok_or(WorkflowError::MissingEdge(kind))?;
            queue.extend(edge.targets());
        }
        if !seen.contains(&StageKind::End) {
            return Err(WorkflowError::Unreachable(StageKind::End));
        }
        if let Some(orphan) = self.edges.keys().find(|k| !seen.contains(k)) {
            return Err(WorkflowError::Unreachable(*orphan));
        }

        Ok(StageGraph {
            entry: self.entry,
            edges: self.edges,
        })
    }
}
