//! 任务调度：限制同时运行的独立会话数
//!
//! 各会话之间没有共享的可变状态，只共享 LLM / 工具连接；用 Semaphore 控制并发（批处理模式）。

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::core::AgentError;

/// 会话调度器
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    session_semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl TaskScheduler {
    pub fn new(max_concurrent_sessions: usize) -> Self {
        let max_concurrent = max_concurrent_sessions.max(1);
        Self {
            session_semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// 获取会话许可；许可随返回值释放
    pub async fn acquire_session(&self) -> Result<OwnedSemaphorePermit, AgentError> {
        self.session_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AgentError::InvalidState("session scheduler closed".to_string()))
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// 当前空闲的许可数
    pub fn available(&self) -> usize {
        self.session_semaphore.available_permits()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(3)
    }
}
