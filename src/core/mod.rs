//! 核心编排层：错误与恢复、会话状态、会话监管、任务调度、状态机主控循环

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session_supervisor;
pub mod state;
pub mod task_scheduler;

pub use builder::OrchestratorBuilder;
pub use error::{AgentError, RecoveryAction};
pub use orchestrator::{default_graph, EventStream, Orchestrator, RunOutcome};
pub use recovery::RecoveryEngine;
pub use session_supervisor::SessionSupervisor;
pub use state::{Document, ModeHint, SessionState, StepSpec, StepSummary, MAX_STEPS, NOT_EXECUTED};
pub use task_scheduler::TaskScheduler;
