//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），启动时注册一次，
//! 之后按名解析；ToolGateway 在调用时加超时并把失败就地转为工具响应消息。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON，返回文本片段列表）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（工具调用中的 name 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具；失败时返回错误描述
    async fn execute(&self, args: Value) -> Result<Vec<String>, String>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>，遍历顺序稳定（按名称排序）
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// 供 Planner 阅读的工具说明：名称、描述、参数
    pub fn to_prompt_text(&self) -> String {
        if self.tools.is_empty() {
            return "（当前没有可用工具，所有子任务都需直接生成）".to_string();
        }
        self.tools
            .iter()
            .map(|(name, tool)| {
                format!(
                    "工具名称：{name}\n工具描述：{}\n工具参数：{}",
                    tool.description(),
                    tool.parameters_schema()
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// 工具绑定时拼入 prompt 的 schema JSON
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .map(|(name, tool)| {
                serde_json::json!({
                    "name": name,
                    "description": tool.description(),
                    "parameters": tool.parameters_schema()
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}
