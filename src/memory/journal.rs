//! 效果日志（仅追加）
//!
//! 每个工作流一条日志：启动、收到的信号、已解决的效果结果。先落日志、再推进状态机；
//! 重启时按顺序回放，已解决的效果不会再次发起。提供内存版与 JSON Lines 文件版两种实现。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::core::{EffectOutcome, JournalError, Signal};

/// 日志事件
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JournalEvent {
    /// 实例创建；goal_id 为启动时固定的目标（None 表示首条提示时匹配）
    Started { goal_id: Option<String> },
    Signal { signal: Signal },
    EffectResolved { effect_id: u64, outcome: EffectOutcome },
}

/// 日志条目：事件 + 记录时间（回放时作为状态机的「当前时间」）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: JournalEvent,
}

impl JournalEntry {
    pub fn now(event: JournalEvent) -> Self {
        Self {
            recorded_at: Utc::now(),
            event,
        }
    }
}

/// 日志存储接口
#[async_trait]
pub trait JournalStore: Send + Sync {
    /// 读取工作流的全部条目；不存在时返回空
    async fn load(&self, workflow_id: &str) -> Result<Vec<JournalEntry>, JournalError>;

    /// 追加一条；返回前必须已持久化
    async fn append(&self, workflow_id: &str, entry: &JournalEntry) -> Result<(), JournalError>;
}

/// 内存日志（测试与单进程场景）
#[derive(Debug, Default)]
pub struct MemoryJournal {
    entries: RwLock<HashMap<String, Vec<JournalEntry>>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JournalStore for MemoryJournal {
    async fn load(&self, workflow_id: &str) -> Result<Vec<JournalEntry>, JournalError> {
        Ok(self
            .entries
            .read()
            .await
            .get(workflow_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append(&self, workflow_id: &str, entry: &JournalEntry) -> Result<(), JournalError> {
        self.entries
            .write()
            .await
            .entry(workflow_id.to_string())
            .or_default()
            .push(entry.clone());
        Ok(())
    }
}

/// 文件日志：`<dir>/<workflow_id>.jsonl`，每行一个条目
#[derive(Debug, Clone)]
pub struct FileJournal {
    dir: PathBuf,
}

impl FileJournal {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, workflow_id: &str) -> PathBuf {
        let safe: String = workflow_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.jsonl"))
    }
}

#[async_trait]
impl JournalStore for FileJournal {
    async fn load(&self, workflow_id: &str) -> Result<Vec<JournalEntry>, JournalError> {
        let path = self.path_for(workflow_id);
        let data = match fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let lines: Vec<&str> = data.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut entries = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            match serde_json::from_str::<JournalEntry>(line) {
                Ok(entry) => entries.push(entry),
                // 末行写到一半进程崩溃：丢弃该行，其余照常回放
                Err(e) if i + 1 == lines.len() => {
                    tracing::warn!(path = %path.display(), error = %e, "dropping torn journal tail");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(entries)
    }

    async fn append(&self, workflow_id: &str, entry: &JournalEntry) -> Result<(), JournalError> {
        fs::create_dir_all(&self.dir).await?;
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(workflow_id))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;
        Ok(())
    }
}
