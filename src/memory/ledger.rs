//! 步骤账本：step<N> -> 执行记录
//!
//! 按步骤序号有序存储；只有 get / upsert / is_complete，没有删除。
//! 记录一旦完成（有 tool_result 或 generated_result）即封存，之后只允许写入相同的值。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::ToolCall;

/// 步骤键：1 起始的步骤序号，显示为 "step<N>"
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct StepKey(usize);

impl StepKey {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step{}", self.0)
    }
}

impl FromStr for StepKey {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix("step")
            .and_then(|n| n.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .map(StepKey)
            .ok_or_else(|| LedgerError::InvalidKey(s.to_string()))
    }
}

impl From<StepKey> for String {
    fn from(key: StepKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for StepKey {
    type Error = LedgerError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Invalid step key: {0}")]
    InvalidKey(String),

    #[error("{key} is complete; field '{field}' cannot be rewritten")]
    Sealed { key: StepKey, field: &'static str },
}

/// 单步执行记录
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub sub_task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<Vec<String>>,
    /// 最近一次工具调用失败的描述；不会使记录完成
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_result: Option<String>,
    /// 本步骤已发出的工具调用次数
    #[serde(default)]
    pub attempts: u32,
}

impl StepRecord {
    pub fn is_complete(&self) -> bool {
        self.tool_result.is_some() || self.generated_result.is_some()
    }

    /// 已失败的工具调用次数（有错误且尚无结果的尝试）
    pub fn failed_attempts(&self) -> u32 {
        if self.tool_result.is_some() {
            0
        } else if self.tool_error.is_some() {
            self.attempts
        } else {
            self.attempts.saturating_sub(1)
        }
    }

    /// 一句话概括该记录的结果（供回退摘要与报告使用）
    pub fn outcome_text(&self) -> Option<String> {
        if let Some(text) = &self.generated_result {
            return Some(text.trim().to_string());
        }
        self.tool_result.as_ref().map(|snippets| snippets.join("\n"))
    }
}

/// 对记录的部分更新；None 字段保持不变
#[derive(Clone, Debug, Default)]
pub struct RecordPatch {
    pub sub_task: Option<String>,
    pub tool_call: Option<ToolCall>,
    pub tool_result: Option<Vec<String>>,
    pub tool_error: Option<String>,
    pub generated_result: Option<String>,
}

impl RecordPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sub_task(mut self, sub_task: impl Into<String>) -> Self {
        self.sub_task = Some(sub_task.into());
        self
    }

    pub fn tool_call(mut self, call: ToolCall) -> Self {
        self.tool_call = Some(call);
        self
    }

    pub fn tool_result(mut self, result: Vec<String>) -> Self {
        self.tool_result = Some(result);
        self
    }

    pub fn tool_error(mut self, error: impl Into<String>) -> Self {
        self.tool_error = Some(error.into());
        self
    }

    pub fn generated_result(mut self, text: impl Into<String>) -> Self {
        self.generated_result = Some(text.into());
        self
    }
}

/// 有序账本
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ledger {
    records: BTreeMap<StepKey, StepRecord>,
}

/// 封存记录上的写入：相同值为幂等空操作，不同值报错
fn check_sealed<T: PartialEq>(
    key: StepKey,
    field: &'static str,
    current: &Option<T>,
    incoming: &Option<T>,
) -> Result<(), LedgerError> {
    match incoming {
        Some(v) if current.as_ref() != Some(v) => Err(LedgerError::Sealed { key, field }),
        _ => Ok(()),
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: StepKey) -> Option<&StepRecord> {
        self.records.get(&key)
    }

    pub fn is_complete(&self, key: StepKey) -> bool {
        self.records.get(&key).is_some_and(StepRecord::is_complete)
    }

    /// 合并写入：记录不存在则创建；已完成的记录只接受相同的值（工具结果的总结可补写一次）
    pub fn upsert(&mut self, key: StepKey, patch: RecordPatch) -> Result<(), LedgerError> {
        let record = self.records.entry(key).or_default();

        if record.is_complete() {
            if let Some(sub_task) = &patch.sub_task {
                if *sub_task != record.sub_task {
                    return Err(LedgerError::Sealed { key, field: "sub_task" });
                }
            }
            check_sealed(key, "tool_call", &record.tool_call, &patch.tool_call)?;
            check_sealed(key, "tool_result", &record.tool_result, &patch.tool_result)?;
            check_sealed(key, "tool_error", &record.tool_error, &patch.tool_error)?;
            // 工具结果的总结只能补写一次
            if record.generated_result.is_none() && record.tool_result.is_some() {
                record.generated_result = patch.generated_result;
                return Ok(());
            }
            check_sealed(
                key,
                "generated_result",
                &record.generated_result,
                &patch.generated_result,
            )?;
            return Ok(());
        }

        if let Some(sub_task) = patch.sub_task {
            record.sub_task = sub_task;
        }
        if let Some(call) = patch.tool_call {
            // 新的一次尝试：上次的错误作废
            if record.tool_call.as_ref().map(|c| &c.id) != Some(&call.id) {
                record.attempts += 1;
                record.tool_error = None;
            }
            record.tool_call = Some(call);
        }
        if let Some(error) = patch.tool_error {
            record.tool_error = Some(error);
        }
        if let Some(result) = patch.tool_result {
            record.tool_result = Some(result);
            record.tool_error = None;
        }
        if let Some(text) = patch.generated_result {
            record.generated_result = Some(text);
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StepKey, &StepRecord)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 以 step<N> 为键的 JSON 文本（拼入 prompt）
    pub fn to_prompt_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}
