//! 工具层：注册表、网关与内置工具（联网检索 / 文档检索）

pub mod gateway;
pub mod registry;
pub mod retrieve_docs;
pub mod web_search;

pub use gateway::{ToolGateway, ToolOutcome};
pub use registry::{Tool, ToolRegistry};
pub use retrieve_docs::RetrieveDocsTool;
pub use web_search::WebSearchTool;
