//! Goal Refiner：把原始任务改写为一到两句话的目标描述
//!
//! 生成失败不在这里重试，直接以 AgentError::Generation 上抛，由编排器终止会话。

use std::sync::Arc;

use crate::core::{AgentError, SessionState};
use crate::llm::{LlmClient, LlmError};
use crate::memory::Message;
use crate::stages::prompts::{render, GOAL_PROMPT};

const LABEL_PREFIXES: &[&str] = &["示例输出：", "输出：", "目标描述：", "目标：", "Goal:"];

/// 保留前 max 句（按 。！？!? 以及后跟空白或结尾的 '.' 断句）
fn first_sentences(text: &str, max: usize) -> &str {
    let mut count = 0;
    let mut iter = text.char_indices().peekable();
    while let Some((i, c)) = iter.next() {
        let ends = match c {
            '。' | '！' | '？' | '!' | '?' => true,
            '.' => iter.peek().map_or(true, |(_, next)| next.is_whitespace()),
            _ => false,
        };
        if ends {
            count += 1;
            if count == max {
                return text[..i + c.len_utf8()].trim();
            }
        }
    }
    text.trim()
}

/// 清理模型输出：去掉标签前缀、引号与多余空白，合并为一行并截取至多两句
pub fn normalize_goal(raw: &str) -> String {
    let mut text = raw.trim();
    for prefix in LABEL_PREFIXES {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest.trim();
        }
    }
    let text = text.trim_matches(|c| matches!(c, '"' | '“' | '”' | '\'' | '`'));
    let joined = text.split_whitespace().collect::<Vec<_>>().join(" ");
    first_sentences(&joined, 2).to_string()
}

pub struct GoalRefiner {
    llm: Arc<dyn LlmClient>,
}

impl GoalRefiner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 写入 state.goal 并追加助手消息
    pub async fn refine(&self, state: &mut SessionState) -> Result<String, AgentError> {
        let prompt = render(GOAL_PROMPT, &[("task", state.task.as_str())]);
        let messages = [Message::system(prompt), Message::user(state.task.clone())];
        let raw = self.llm.complete(&messages).await?;

        let goal = normalize_goal(&raw);
        if goal.is_empty() {
            return Err(LlmError::InvalidResponse("empty goal".to_string()).into());
        }
        tracing::info!(session = %state.session_id, goal = %goal, "goal refined");
        state.messages.push(Message::assistant(goal.clone()));
        state.goal = goal.clone();
        Ok(goal)
    }
}
