//! 编排器构建器：统一的组件装配
//!
//! CLI、批处理与测试都通过这里创建 Orchestrator，保证各阶段共享同一个 LLM、工具注册表与恢复策略。

use std::sync::Arc;

use crate::config::OrchestratorSection;
use crate::core::orchestrator::{default_graph, Orchestrator};
use crate::core::{AgentError, RecoveryEngine};
use crate::llm::LlmClient;
use crate::memory::{CheckpointStore, MemoryCheckpointStore};
use crate::stages::{Dispatcher, GoalRefiner, Planner, Replanner, Reporter};
use crate::tools::{ToolGateway, ToolRegistry};

/// 编排器构建器
pub struct OrchestratorBuilder {
    llm: Arc<dyn LlmClient>,
    registry: ToolRegistry,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    settings: OrchestratorSection,
    tool_timeout_secs: u64,
}

impl OrchestratorBuilder {
    /// 创建新的构建器：空工具注册表、进程内检查点、默认编排参数
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            registry: ToolRegistry::new(),
            checkpoints: None,
            settings: OrchestratorSection::default(),
            tool_timeout_secs: 30,
        }
    }

    pub fn with_tools(mut self, registry: ToolRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_checkpoints(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    /// 编排参数：转移上限、单步工具尝试次数、结构化输出重试次数
    pub fn with_settings(mut self, settings: OrchestratorSection) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_tool_timeout(mut self, secs: u64) -> Self {
        self.tool_timeout_secs = secs;
        self
    }

    /// 构建 Orchestrator；状态图装配失败时返回 Workflow 错误
    pub fn build(self) -> Result<Orchestrator, AgentError> {
        let graph = default_graph()?;
        let registry = Arc::new(self.registry);
        let recovery = RecoveryEngine::new(self.settings.structured_retries);
        let checkpoints = self
            .checkpoints
            .unwrap_or_else(|| Arc::new(MemoryCheckpointStore::new()));

        tracing::info!(
            tools = ?registry.tool_names(),
            recursion_limit = self.settings.recursion_limit,
            max_tool_attempts = self.settings.max_tool_attempts,
            "orchestrator ready"
        );

        Ok(Orchestrator {
            graph,
            goal: GoalRefiner::new(self.llm.clone()),
            planner: Planner::new(self.llm.clone(), registry.clone(), recovery.clone()),
            dispatcher: Dispatcher::new(
                self.llm.clone(),
                registry.clone(),
                self.settings.max_tool_attempts,
            ),
            replanner: Replanner::new(self.llm.clone(), registry.clone(), recovery.clone()),
            reporter: Reporter::new(self.llm),
            gateway: Arc::new(ToolGateway::new(registry, self.tool_timeout_secs)),
            checkpoints,
            recovery,
            recursion_limit: self.settings.recursion_limit,
        })
    }
}
