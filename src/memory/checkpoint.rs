//! 会话检查点：按 session_id 保存 / 加载完整 SessionState
//!
//! - MemoryCheckpointStore：进程内，测试与无持久化需求时使用
//! - FileCheckpointStore：`<dir>/<session_id>.json`，先写临时文件再 rename，避免半写文件

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::{AgentError, SessionState};

/// 检查点存储
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, state: &SessionState) -> Result<(), AgentError>;

    /// 不存在时返回 None
    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, AgentError>;
}

/// 进程内检查点
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    states: RwLock<HashMap<String, SessionState>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, state: &SessionState) -> Result<(), AgentError> {
        self.states
            .write()
            .await
            .insert(state.session_id.clone(), state.clone());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, AgentError> {
        Ok(self.states.read().await.get(session_id).cloned())
    }
}

/// JSON 文件检查点
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, session_id: &str) -> Result<PathBuf, AgentError> {
        let valid = !session_id.is_empty()
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(AgentError::Checkpoint(format!(
                "invalid session id: {session_id:?}"
            )));
        }
        Ok(self.dir.join(format!("{session_id}.json")))
    }
}

fn io_err(context: &str, path: &Path, e: impl std::fmt::Display) -> AgentError {
    AgentError::Checkpoint(format!("{context} {}: {e}", path.display()))
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, state: &SessionState) -> Result<(), AgentError> {
        let path = self.path_for(&state.session_id)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_err("create dir", &self.dir, e))?;

        let data = serde_json::to_vec_pretty(state)
            .map_err(|e| AgentError::Checkpoint(format!("serialize: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| io_err("write", &tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_err("rename", &path, e))?;
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, AgentError> {
        let path = self.path_for(session_id)?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err("read", &path, e)),
        };
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| io_err("parse", &path, e))
    }
}
