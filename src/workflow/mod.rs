//! 编排图：阶段、边、构建与转移

pub mod builder;
pub mod graph;
pub mod types;

pub use builder::StageGraphBuilder;
pub use graph::StageGraph;
pub use types::*;
