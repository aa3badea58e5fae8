//! 无界面运行时
//!
//! 供 CLI 与批处理共用：按配置创建 LLM、工具注册表（web_search，加载了文档时再加 retrieve_docs）、
//! 检查点存储与 Orchestrator；提供新会话、运行任务、恢复会话三个入口。

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::{AppConfig, CheckpointBackend};
use crate::core::{AgentError, Document, Orchestrator, OrchestratorBuilder, SessionState, SessionSupervisor};
use crate::llm::{create_embedder_from_config, create_llm_from_config, LlmClient};
use crate::memory::{
    CheckpointStore, DocumentRetriever, FileCheckpointStore, KeywordIndex, MemoryCheckpointStore,
    VectorIndex,
};
use crate::stages::StageEvent;
use crate::tools::{RetrieveDocsTool, ToolRegistry, WebSearchTool};

/// 按配置选择检查点后端
pub fn create_checkpoint_store(cfg: &AppConfig) -> Arc<dyn CheckpointStore> {
    match cfg.app.checkpoint {
        CheckpointBackend::File => Arc::new(FileCheckpointStore::new(&cfg.app.data_dir)),
        CheckpointBackend::Memory => Arc::new(MemoryCheckpointStore::new()),
    }
}

/// 读取 `--doc` 指定的文本文件
pub async fn load_documents(paths: &[PathBuf]) -> Result<Vec<Document>, AgentError> {
    let mut docs = Vec::with_capacity(paths.len());
    for path in paths {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AgentError::Config(format!("cannot read document {}: {e}", path.display())))?;
        docs.push(Document::new(content, path.display().to_string()));
    }
    Ok(docs)
}

/// 建立文档索引：有嵌入服务时用向量索引，嵌入失败或没有 Key 时退回关键词索引
pub async fn build_retriever(cfg: &AppConfig, docs: &[Document]) -> Arc<dyn DocumentRetriever> {
    let retrieval = &cfg.tools.retrieval;
    if let Some(embedder) =
        create_embedder_from_config(cfg.llm.base_url.as_deref(), &retrieval.embedding_model)
    {
        let index = VectorIndex::new(embedder);
        match index_all(&index, docs).await {
            Ok(passages) => {
                tracing::info!(passages, "vector index ready");
                return Arc::new(index);
            }
            Err(e) => tracing::warn!(error = %e, "embedding failed, using keyword index"),
        }
    }
    let index = KeywordIndex::new();
    match index_all(&index, docs).await {
        Ok(passages) => tracing::info!(passages, "keyword index ready"),
        Err(e) => tracing::warn!(error = %e, "keyword indexing failed"),
    }
    Arc::new(index)
}

async fn index_all(index: &dyn DocumentRetriever, docs: &[Document]) -> Result<usize, crate::llm::LlmError> {
    let mut total = 0;
    for doc in docs {
        total += index.add_document(&doc.source, &doc.content).await?;
    }
    Ok(total)
}

/// 工具注册表：总是包含 web_search；有文档索引时加入 retrieve_docs
pub fn create_tool_registry(
    cfg: &AppConfig,
    retriever: Option<Arc<dyn DocumentRetriever>>,
) -> ToolRegistry {
    let search = &cfg.tools.web_search;
    let mut tools = ToolRegistry::new();
    tools.register(WebSearchTool::new(
        search.timeout_secs,
        search.max_results,
        search.max_result_chars,
    ));
    if let Some(retriever) = retriever {
        tools.register(RetrieveDocsTool::new(retriever, cfg.tools.retrieval.top_k));
    }
    tools
}

/// 运行时：共享的 Orchestrator + 会话监管 + 启动时加载的文档
pub struct AgentRuntime {
    pub config: AppConfig,
    pub orchestrator: Arc<Orchestrator>,
    pub supervisor: SessionSupervisor,
    documents: Vec<Document>,
}

impl AgentRuntime {
    /// 按配置创建运行时；doc_paths 非空时建立文档索引并注册 retrieve_docs
    pub async fn from_config(cfg: AppConfig, doc_paths: &[PathBuf]) -> Result<Self, AgentError> {
        let llm = create_llm_from_config(&cfg);
        Self::with_llm(cfg, llm, doc_paths).await
    }

    pub async fn with_llm(
        cfg: AppConfig,
        llm: Arc<dyn LlmClient>,
        doc_paths: &[PathBuf],
    ) -> Result<Self, AgentError> {
        let documents = load_documents(doc_paths).await?;
        let retriever = if documents.is_empty() {
            None
        } else {
            Some(build_retriever(&cfg, &documents).await)
        };
        let orchestrator = OrchestratorBuilder::new(llm)
            .with_tools(create_tool_registry(&cfg, retriever))
            .with_checkpoints(create_checkpoint_store(&cfg))
            .with_settings(cfg.orchestrator.clone())
            .with_tool_timeout(cfg.tools.tool_timeout_secs)
            .build()?;
        Ok(Self {
            config: cfg,
            orchestrator: Arc::new(orchestrator),
            supervisor: SessionSupervisor::new(),
            documents,
        })
    }

    /// 新会话：随机 session_id，附带启动时加载的文档
    pub fn new_session(&self) -> SessionState {
        let mut state = SessionState::new(uuid::Uuid::new_v4().to_string());
        state.documents = self.documents.clone();
        state
    }

    /// 在已有会话中处理一个新任务（多轮对话）
    pub async fn run_task(
        &self,
        state: &mut SessionState,
        task: &str,
        events: Option<&mpsc::UnboundedSender<StageEvent>>,
    ) -> Result<(), AgentError> {
        state.begin_task(task);
        let cancel = self.supervisor.child_token();
        self.orchestrator.run(state, events, &cancel).await
    }

    /// 从检查点恢复中断的会话
    pub async fn resume(
        &self,
        session_id: &str,
        events: Option<&mpsc::UnboundedSender<StageEvent>>,
    ) -> Result<SessionState, AgentError> {
        let cancel = self.supervisor.child_token();
        self.orchestrator.resume(session_id, events, &cancel).await
    }
}
