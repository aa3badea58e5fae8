//! 批处理：一行一个任务，每个任务独立会话
//!
//! 并发数由 TaskScheduler 限制（[batch] max_concurrent_sessions）；每个任务写 `<n>_<session_id>.json`，
//! 全部结束后写 summary.json。单个任务失败不影响其它任务。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::agent::AgentRuntime;
use crate::core::{AgentError, StepSpec, StepSummary, TaskScheduler};

/// 单个任务的结束状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Completed,
    Failed,
}

/// 单个任务的输出文件内容
#[derive(Debug, Clone, Serialize)]
pub struct BatchItemRecord {
    pub index: usize,
    pub session_id: String,
    pub task: String,
    pub goal: String,
    pub plan: String,
    pub steps: Vec<StepSpec>,
    pub summaries: Vec<StepSummary>,
    pub report: Option<String>,
    pub status: ItemStatus,
    pub error: Option<String>,
    pub started_at: String,
    pub finished_at: String,
}

/// summary.json
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub output_dir: PathBuf,
    pub started_at: String,
    pub finished_at: String,
}

/// 每个非空行是一个任务
pub fn read_tasks(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), AgentError> {
    let body = serde_json::to_vec_pretty(value)
        .map_err(|e| AgentError::Checkpoint(format!("serialize {}: {e}", path.display())))?;
    tokio::fs::write(path, body)
        .await
        .map_err(|e| AgentError::Checkpoint(format!("write {}: {e}", path.display())))
}

async fn run_item(runtime: &AgentRuntime, index: usize, task: String, output_dir: &Path) -> BatchItemRecord {
    let started_at = chrono::Utc::now().to_rfc3339();
    let mut state = runtime.new_session();
    let result = runtime.run_task(&mut state, &task, None).await;
    let (status, error) = match &result {
        Ok(()) => (ItemStatus::Completed, None),
        Err(e) => {
            tracing::warn!(index, session = %state.session_id, error = %e, "batch item failed");
            (ItemStatus::Failed, Some(e.to_string()))
        }
    };
    let record = BatchItemRecord {
        index,
        session_id: state.session_id.clone(),
        task,
        goal: state.goal,
        plan: state.plan,
        steps: state.steps,
        summaries: state.summaries,
        report: state.report,
        status,
        error,
        started_at,
        finished_at: chrono::Utc::now().to_rfc3339(),
    };
    let path = output_dir.join(format!("{index}_{}.json", record.session_id));
    if let Err(e) = write_json(&path, &record).await {
        tracing::warn!(index, error = %e, "batch item output not written");
    }
    record
}

/// 运行全部任务并写出结果；返回汇总
pub async fn run_batch(
    runtime: Arc<AgentRuntime>,
    tasks: Vec<String>,
    output_dir: &Path,
) -> Result<BatchSummary, AgentError> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|e| AgentError::Config(format!("cannot create {}: {e}", output_dir.display())))?;
    let started_at = chrono::Utc::now().to_rfc3339();
    let scheduler = TaskScheduler::new(runtime.config.batch.max_concurrent_sessions);
    tracing::info!(
        tasks = tasks.len(),
        max_concurrent = scheduler.max_concurrent(),
        "batch started"
    );

    let handles: Vec<_> = tasks
        .into_iter()
        .enumerate()
        .map(|(i, task)| {
            let runtime = runtime.clone();
            let scheduler = scheduler.clone();
            let output_dir = output_dir.to_path_buf();
            tokio::spawn(async move {
                let _permit = scheduler.acquire_session().await?;
                Ok::<_, AgentError>(run_item(&runtime, i + 1, task, &output_dir).await)
            })
        })
        .collect();

    let mut summary = BatchSummary {
        total: handles.len(),
        completed: 0,
        failed: 0,
        output_dir: output_dir.to_path_buf(),
        started_at,
        finished_at: String::new(),
    };
    for handle in handles {
        match handle.await {
            Ok(Ok(record)) if record.status == ItemStatus::Completed => summary.completed += 1,
            Ok(Ok(_)) => summary.failed += 1,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "batch item not scheduled");
                summary.failed += 1;
            }
            Err(e) => {
                tracing::error!(error = %e, "batch item panicked");
                summary.failed += 1;
            }
        }
    }
    summary.finished_at = chrono::Utc::now().to_rfc3339();
    write_json(&output_dir.join("summary.json"), &summary).await?;
    tracing::info!(completed = summary.completed, failed = summary.failed, "batch finished");
    Ok(summary)
}
