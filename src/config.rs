//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TASKPILOT__*` 覆盖（双下划线表示嵌套，如 `TASKPILOT__LLM__PROVIDER=openai`）。
//! API Key 只从环境变量读取（DEEPSEEK_API_KEY / OPENAI_API_KEY / TAVILY_API_KEY），不进入配置文件。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub orchestrator: OrchestratorSection,
    pub batch: BatchSection,
}

/// 检查点存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    Memory,
    File,
}

/// [app] 段：应用名、检查点目录与后端
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 检查点目录，默认 ./data/checkpoints
    pub data_dir: PathBuf,
    pub checkpoint: CheckpointBackend,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            data_dir: PathBuf::from("./data/checkpoints"),
            checkpoint: CheckpointBackend::File,
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock
    pub provider: String,
    /// 覆盖各后端的默认模型
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub deepseek: LlmDeepSeekSection,
    pub openai: LlmOpenAiSection,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: None,
            base_url: None,
            deepseek: LlmDeepSeekSection::default(),
            openai: LlmOpenAiSection::default(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmDeepSeekSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmOpenAiSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub request: u64,
    pub stream: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: 60,
            stream: 120,
        }
    }
}

/// [tools] 段：工具超时、联网搜索、文档检索
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub web_search: WebSearchSection,
    pub retrieval: RetrievalSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            web_search: WebSearchSection::default(),
            retrieval: RetrievalSection::default(),
        }
    }
}

/// [tools.web_search] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSearchSection {
    pub max_results: usize,
    pub timeout_secs: u64,
    pub max_result_chars: usize,
}

impl Default for WebSearchSection {
    fn default() -> Self {
        Self {
            max_results: 5,
            timeout_secs: 15,
            max_result_chars: 4000,
        }
    }
}

/// [tools.retrieval] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalSection {
    pub top_k: usize,
    pub embedding_model: String,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            top_k: 2,
            embedding_model: "text-embedding-3-small".to_string(),
        }
    }
}

/// [orchestrator] 段：转移预算、单步工具尝试上限、结构化输出重试次数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub recursion_limit: usize,
    pub max_tool_attempts: u32,
    pub structured_retries: u32,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            recursion_limit: 25,
            max_tool_attempts: 2,
            structured_retries: 1,
        }
    }
}

/// [batch] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchSection {
    pub max_concurrent_sessions: usize,
    pub output_dir: PathBuf,
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 3,
            output_dir: PathBuf::from("./output"),
        }
    }
}

/// 从 config 目录加载配置，环境变量 TASKPILOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TASKPILOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TASKPILOT")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
