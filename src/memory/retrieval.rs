//! 文档检索：query(text, k) -> 按相关度排序的片段
//!
//! VectorIndex 用嵌入向量 + 余弦相似度做 top-k；KeywordIndex 在没有嵌入服务时按字符二元组重合度打分。
//! 两者都在启动时由 `--doc` 文件建立，之后只读。

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::llm::{EmbeddingProvider, LlmError};

/// 单段最大字符数
const MAX_CHUNK_CHARS: usize = 500;

/// 检索结果
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDoc {
    pub content: String,
    pub source: String,
    pub score: f32,
}

/// 文档检索器
#[async_trait]
pub trait DocumentRetriever: Send + Sync {
    /// 添加文档；返回切出的片段数
    async fn add_document(&self, source: &str, text: &str) -> Result<usize, LlmError>;

    async fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredDoc>, LlmError>;

    async fn len(&self) -> usize;
}

/// 按空行切段，超长段按字符数硬切（UTF-8 安全）
pub fn split_passages(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let chars: Vec<char> = para.chars().collect();
        for piece in chars.chunks(MAX_CHUNK_CHARS) {
            let piece: String = piece.iter().collect();
            let piece = piece.trim();
            if !piece.is_empty() {
                out.push(piece.to_string());
            }
        }
    }
    out
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn top_k(mut scored: Vec<ScoredDoc>, k: usize) -> Vec<ScoredDoc> {
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
    scored
}

struct Entry {
    content: String,
    source: String,
    embedding: Vec<f32>,
}

/// 嵌入向量索引
pub struct VectorIndex {
    embedder: Arc<dyn EmbeddingProvider>,
    entries: RwLock<Vec<Entry>>,
}

impl VectorIndex {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DocumentRetriever for VectorIndex {
    async fn add_document(&self, source: &str, text: &str) -> Result<usize, LlmError> {
        let passages = split_passages(text);
        let mut embedded = Vec::with_capacity(passages.len());
        for content in passages {
            let embedding = self.embedder.embed(&content).await?;
            embedded.push(Entry {
                content,
                source: source.to_string(),
                embedding,
            });
        }
        let n = embedded.len();
        self.entries.write().await.extend(embedded);
        Ok(n)
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredDoc>, LlmError> {
        let entries = self.entries.read().await;
        if entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let query = self.embedder.embed(text).await?;
        let scored = entries
            .iter()
            .map(|e| ScoredDoc {
                content: e.content.clone(),
                source: e.source.clone(),
                score: cosine_similarity(&query, &e.embedding),
            })
            .collect();
        Ok(top_k(scored, k))
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

fn bigrams(text: &str) -> HashSet<(char, char)> {
    let chars: Vec<char> = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

/// 无嵌入服务时的关键词索引
#[derive(Default)]
pub struct KeywordIndex {
    entries: RwLock<Vec<(String, String)>>,
}

impl KeywordIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentRetriever for KeywordIndex {
    async fn add_document(&self, source: &str, text: &str) -> Result<usize, LlmError> {
        let passages = split_passages(text);
        let n = passages.len();
        self.entries
            .write()
            .await
            .extend(passages.into_iter().map(|p| (source.to_string(), p)));
        Ok(n)
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredDoc>, LlmError> {
        let query = bigrams(text);
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let scored = self
            .entries
            .read()
            .await
            .iter()
            .map(|(source, content)| {
                let hits = bigrams(content).intersection(&query).count();
                ScoredDoc {
                    content: content.clone(),
                    source: source.clone(),
                    score: hits as f32 / query.len() as f32,
                }
            })
            .filter(|d| d.score > 0.0)
            .collect();
        Ok(top_k(scored, k))
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
