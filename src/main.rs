//! TaskPilot 命令行入口
//!
//! - 默认：交互式 REPL，每行一个任务，同一会话内多轮；exit / quit 退出并打印对话历史
//! - `--resume <id>`：从检查点继续被中断的会话，之后进入 REPL
//! - `--batch <file>`：一行一个任务，批量运行并写出结果文件
//! - `--doc <path>`（可重复）：加载文本文档，供 retrieve_docs 检索

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use taskpilot::agent::AgentRuntime;
use taskpilot::batch::{read_tasks, run_batch};
use taskpilot::config::{load_config, AppConfig};
use taskpilot::core::{AgentError, SessionState};
use taskpilot::memory::Role;
use taskpilot::stages::StageEvent;

#[derive(Parser, Debug)]
#[command(name = "taskpilot")]
#[command(about = "任务规划智能体：目标细化、分步规划、工具执行、重规划与报告")]
#[command(version)]
struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 从检查点恢复指定会话
    #[arg(long, value_name = "SESSION_ID")]
    resume: Option<String>,

    /// 加载到检索索引的文本文档，可重复
    #[arg(long = "doc", value_name = "PATH")]
    docs: Vec<PathBuf>,

    /// 批处理：一行一个任务
    #[arg(long, value_name = "FILE", conflicts_with = "resume")]
    batch: Option<PathBuf>,
}

/// 后台打印事件文本；发送端全部释放后结束
fn spawn_printer() -> (mpsc::UnboundedSender<StageEvent>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<StageEvent>();
    let handle = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(event) = rx.recv().await {
            if let Some(text) = event.display_text() {
                let _ = write!(stdout, "{text}");
                let _ = stdout.flush();
            }
        }
    });
    (tx, handle)
}

fn print_history(state: &SessionState) {
    println!("\n===== 对话历史（session {}）=====", state.session_id);
    for msg in state.messages.messages() {
        let prefix = match msg.role {
            Role::User => "User",
            Role::Assistant => "AI",
            Role::Tool => "Tool",
            Role::System => continue,
        };
        if msg.content.is_empty() && !msg.tool_calls.is_empty() {
            let names: Vec<&str> = msg.tool_calls.iter().map(|c| c.name.as_str()).collect();
            println!("{prefix}: [调用工具 {}]", names.join(", "));
        } else {
            println!("{prefix}: {}", msg.content);
        }
    }
}

async fn repl(runtime: &AgentRuntime, state: &mut SessionState) -> anyhow::Result<()> {
    let cancel = runtime.supervisor.cancel_token();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n> ");
        std::io::stdout().flush().ok();
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };
        let Some(line) = line else { break };
        let task = line.trim();
        if task.is_empty() {
            continue;
        }
        if matches!(task, "exit" | "quit") {
            break;
        }

        let (tx, printer) = spawn_printer();
        let result = runtime.run_task(state, task, Some(&tx)).await;
        drop(tx);
        printer.await.ok();
        match result {
            Ok(()) => {}
            Err(AgentError::Cancelled) => break,
            Err(e) => tracing::error!(session = %state.session_id, error = %e, "task failed"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    taskpilot::observability::init();
    let cli = Cli::parse();

    let cfg = load_config(cli.config.clone()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    let runtime = Arc::new(
        AgentRuntime::from_config(cfg, &cli.docs)
            .await
            .context("Failed to create agent runtime")?,
    );

    // Ctrl+C：取消所有会话，编排器在下一次阶段转移前停下
    let supervisor = runtime.supervisor.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling sessions");
            supervisor.cancel();
        }
    });

    if let Some(path) = cli.batch {
        let text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read batch file {}", path.display()))?;
        let output_dir = runtime.config.batch.output_dir.clone();
        let summary = run_batch(runtime.clone(), read_tasks(&text), &output_dir)
            .await
            .context("Batch run failed")?;
        println!(
            "批处理完成：共 {} 个任务，成功 {}，失败 {}，结果目录 {}",
            summary.total,
            summary.completed,
            summary.failed,
            summary.output_dir.display()
        );
        return Ok(());
    }

    let mut state = match cli.resume {
        Some(session_id) => {
            let (tx, printer) = spawn_printer();
            let resumed = runtime.resume(&session_id, Some(&tx)).await;
            drop(tx);
            printer.await.ok();
            resumed.with_context(|| format!("Failed to resume session {session_id}"))?
        }
        None => runtime.new_session(),
    };

    let app_name = runtime.config.app.name.as_deref().unwrap_or("TaskPilot");
    println!("{app_name} 已就绪（session {}），输入任务开始，exit / quit 退出。", state.session_id);
    repl(&runtime, &mut state).await?;
    print_history(&state);
    Ok(())
}
