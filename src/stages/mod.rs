//! 编排阶段：目标细化、规划、求解、路由、重规划、报告
//!
//! 每个阶段只通过 &mut SessionState 读写会话状态，彼此之间没有直接调用；由 core::orchestrator 按状态图串联。

pub mod events;
pub mod goal;
pub mod planner;
pub mod prompts;
pub mod replanner;
pub mod reporter;
pub mod router;
pub mod solver;
pub mod structured;

pub use events::StageEvent;
pub use goal::GoalRefiner;
pub use planner::{PlanOutcome, Planner};
pub use replanner::{ReplanOutcome, Replanner};
pub use reporter::{fallback_report, Reporter};
pub use router::Route;
pub use solver::{Dispatcher, SolveOutcome};
