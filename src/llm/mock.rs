//! Mock 与脚本化 LLM 客户端（无需 API）
//!
//! - MockLlmClient：按 prompt 的角色定义识别阶段，返回合法的目标、计划、工具调用与总结，便于离线跑通整条流程。
//! - ScriptedLlmClient：按顺序吐出预置回复并记录收到的 prompt，供测试精确控制每一次生成。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};
use crate::stages::prompts::{
    extract_block, GOAL_ROLE, PLAN_ROLE, REPLAN_ROLE, REPORT_ROLE, SOLVE_ROLE, SUMMARIZE_ROLE,
    TOOL_BINDING_MARKER,
};

/// 取 marker 之后的第一行非空文本
fn line_after<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    let start = text.find(marker)? + marker.len();
    text[start..].lines().map(str::trim).find(|l| !l.is_empty())
}

/// 去掉 "step1: " 前缀与末尾的（…）标注
fn bare_description(step_line: &str) -> &str {
    let body = step_line
        .split_once(": ")
        .map(|(_, rest)| rest)
        .unwrap_or(step_line);
    body.rfind('（').map(|i| &body[..i]).unwrap_or(body).trim()
}

/// Mock 客户端：离线演示用
#[derive(Debug, Default)]
pub struct MockLlmClient;

impl MockLlmClient {
    fn goal(prompt: &str) -> String {
        let task = line_after(prompt, "用户输入如下:").unwrap_or("用户任务");
        format!("围绕“{task}”完成一份结构清晰、内容完整的成果，并总结关键要点。")
    }

    fn plan(prompt: &str) -> String {
        let goal = line_after(prompt, "目标描述如下：").unwrap_or("目标");
        let search = prompt.contains("web_search");
        let mut steps = vec![json!({"description": format!("明确“{goal}”的范围与大纲"), "mode": "direct"})];
        if search {
            steps.push(json!({"description": "检索相关的最新资料", "mode": "tool", "tool": "web_search"}));
        }
        steps.push(json!({"description": "撰写正文并总结要点", "mode": "direct"}));
        json!({"summary": "先确定大纲，再收集资料，最后成文", "steps": steps}).to_string()
    }

    fn solve(prompt: &str) -> String {
        let step = extract_block(prompt, "current_step").unwrap_or("当前子任务");
        if prompt.contains(TOOL_BINDING_MARKER) && step.contains("web_search") {
            return json!({
                "tool_calls": [{"name": "web_search", "arguments": {"key_words": bare_description(step)}}]
            })
            .to_string();
        }
        format!("（离线结果）已完成：{}", bare_description(step))
    }

    fn summarize(prompt: &str) -> String {
        let step = extract_block(prompt, "current_step").unwrap_or("当前子任务");
        let result = line_after(prompt, "工具执行结果如下：").unwrap_or("无");
        let preview: String = result.chars().take(120).collect();
        format!("{}：根据工具结果整理，{}", bare_description(step), preview)
    }

    fn replan(prompt: &str) -> String {
        let steps: Vec<Value> = extract_block(prompt, "steps")
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default();
        let steps: Vec<Value> = steps
            .into_iter()
            .map(|mut s| {
                if let Some(obj) = s.as_object_mut() {
                    obj.insert("result".to_string(), json!("未执行"));
                }
                s
            })
            .collect();
        json!({"plan": "按原计划继续执行", "steps": steps}).to_string()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let prompt = messages
            .iter()
            .filter(|m| matches!(m.role, Role::System))
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let reply = if prompt.contains(GOAL_ROLE) {
            Self::goal(&prompt)
        } else if prompt.contains(PLAN_ROLE) {
            Self::plan(&prompt)
        } else if prompt.contains(SUMMARIZE_ROLE) {
            Self::summarize(&prompt)
        } else if prompt.contains(SOLVE_ROLE) {
            Self::solve(&prompt)
        } else if prompt.contains(REPLAN_ROLE) {
            Self::replan(&prompt)
        } else if prompt.contains(REPORT_ROLE) {
            "（离线模式）各步骤均已完成，成果与目标一致。".to_string()
        } else {
            let last_user = messages
                .iter()
                .rev()
                .find(|m| matches!(m.role, Role::User))
                .map(|m| m.content.as_str())
                .unwrap_or("(no input)");
            format!("Echo from Mock: {last_user}")
        };
        Ok(reply)
    }
}

/// 脚本化客户端：按顺序返回预置结果，并记录每次收到的消息
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    prompts: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// 追加一条成功回复
    pub fn push_reply(&self, reply: impl Into<String>) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(Ok(reply.into()));
        }
    }

    /// 追加一次生成失败
    pub fn push_error(&self, err: LlmError) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(Err(err));
        }
    }

    /// 已收到的全部请求（按调用顺序）
    pub fn prompts(&self) -> Vec<Vec<Message>> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// 尚未消费的回复数
    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|q| q.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        if let Ok(mut p) = self.prompts.lock() {
            p.push(messages.to_vec());
        }
        self.replies
            .lock()
            .map_err(|_| LlmError::Request("scripted client poisoned".to_string()))?
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Request("scripted replies exhausted".to_string())))
    }
}
