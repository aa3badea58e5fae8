//! TaskPilot - 任务规划智能体
//!
//! 模块划分：
//! - **agent**: 无界面运行时（按配置组装 LLM、工具、检查点与编排器）
//! - **batch**: 批处理模式，一行一个任务，独立会话并发运行
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、会话状态、会话监管、任务调度、状态机编排器
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock / Scripted）、嵌入
//! - **memory**: 对话历史、步骤账本、检查点、文档检索
//! - **observability**: tracing 初始化
//! - **stages**: 目标细化、规划、求解、路由、重规划、报告各阶段
//! - **tools**: 工具注册表、工具网关、联网检索与文档检索
//! - **workflow**: 编排图（阶段、边、构建器）

pub mod agent;
pub mod batch;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod stages;
pub mod tools;
pub mod workflow;

pub use agent::AgentRuntime;
pub use core::{AgentError, Orchestrator, OrchestratorBuilder, SessionState};
