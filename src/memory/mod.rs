//! 记忆层：对话历史、步骤账本、会话检查点、文档检索

pub mod checkpoint;
pub mod conversation;
pub mod ledger;
pub mod retrieval;

pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use conversation::{Message, MessageLog, Role, ToolCall};
pub use ledger::{Ledger, LedgerError, RecordPatch, StepKey, StepRecord};
pub use retrieval::{DocumentRetriever, KeywordIndex, ScoredDoc, VectorIndex};
