//! 会话状态：消息日志与工具调用记录日志
//!
//! 所有变更都经由这里，保证：序号连续递增、同一时刻至多一条待执行记录、
//! 已执行/已失败记录不可变、关闭后拒绝任何变更。时间戳由调用方传入，回放时可复现。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::StateError;

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
    Tool,
}

/// 单条消息；sequence_number 从 1 开始、逐条加一
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sequence_number: u64,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// 工具调用记录状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Confirmed,
    Executed,
    Failed,
}

impl ToolCallStatus {
    /// pending / confirmed 都算「等待执行」
    pub fn is_outstanding(&self) -> bool {
        matches!(self, ToolCallStatus::Pending | ToolCallStatus::Confirmed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocationRecord {
    pub tool_name: String,
    pub arguments: Value,
    pub result: Option<Value>,
    pub status: ToolCallStatus,
    pub needs_confirmation: bool,
    pub created_at: DateTime<Utc>,
}

/// 会话状态管理器
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConversationState {
    messages: Vec<Message>,
    records: Vec<ToolInvocationRecord>,
    /// 唯一一条 pending/confirmed 记录的下标
    outstanding: Option<usize>,
    ended: bool,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<(), StateError> {
        if self.ended {
            Err(StateError::Closed)
        } else {
            Ok(())
        }
    }

    /// 追加消息并分配下一个序号
    pub fn append_message(
        &mut self,
        role: Role,
        content: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<u64, StateError> {
        self.ensure_open()?;
        let sequence_number = self.messages.len() as u64 + 1;
        self.messages.push(Message {
            sequence_number,
            role,
            content: content.into(),
            created_at: at,
        });
        Ok(sequence_number)
    }

    /// 新建 pending 记录；已有等待执行的记录时违反不变式
    pub fn begin_tool_call(
        &mut self,
        tool_name: impl Into<String>,
        arguments: Value,
        needs_confirmation: bool,
        at: DateTime<Utc>,
    ) -> Result<(), StateError> {
        self.ensure_open()?;
        if let Some(i) = self.outstanding {
            return Err(StateError::Invariant(format!(
                "tool call '{}' is still {:?}",
                self.records[i].tool_name, self.records[i].status
            )));
        }
        self.outstanding = Some(self.records.len());
        self.records.push(ToolInvocationRecord {
            tool_name: tool_name.into(),
            arguments,
            result: None,
            status: ToolCallStatus::Pending,
            needs_confirmation,
            created_at: at,
        });
        Ok(())
    }

    /// pending -> confirmed；没有 pending 记录时什么也不做，返回 false
    pub fn confirm_pending(&mut self) -> Result<bool, StateError> {
        self.ensure_open()?;
        match self.outstanding {
            Some(i) if self.records[i].status == ToolCallStatus::Pending => {
                self.records[i].status = ToolCallStatus::Confirmed;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn take_confirmed(&mut self) -> Result<usize, StateError> {
        self.ensure_open()?;
        match self.outstanding {
            Some(i) if self.records[i].status == ToolCallStatus::Confirmed => {
                self.outstanding = None;
                Ok(i)
            }
            _ => Err(StateError::Invariant(
                "no confirmed tool call to resolve".to_string(),
            )),
        }
    }

    /// confirmed -> executed
    pub fn complete_pending(&mut self, result: Value) -> Result<(), StateError> {
        let i = self.take_confirmed()?;
        let record = &mut self.records[i];
        record.status = ToolCallStatus::Executed;
        record.result = Some(result);
        Ok(())
    }

    /// confirmed -> failed；错误原文只进日志，不进快照
    pub fn fail_pending(&mut self, error: &str) -> Result<(), StateError> {
        let i = self.take_confirmed()?;
        let record = &mut self.records[i];
        record.status = ToolCallStatus::Failed;
        tracing::debug!(tool = %record.tool_name, error, "tool call marked failed");
        Ok(())
    }

    /// 丢弃未执行的 pending/confirmed 记录（结束会话时使用）
    pub fn discard_pending(&mut self) -> Result<Option<ToolInvocationRecord>, StateError> {
        self.ensure_open()?;
        Ok(self.outstanding.take().map(|i| self.records.remove(i)))
    }

    /// 标记结束；之后所有变更返回 Closed
    pub fn close(&mut self) {
        self.ended = true;
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn outstanding(&self) -> Option<&ToolInvocationRecord> {
        self.outstanding.map(|i| &self.records[i])
    }

    pub fn records(&self) -> &[ToolInvocationRecord] {
        &self.records
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// 每个工具最近一条记录
    pub fn snapshot_tool_data(&self) -> BTreeMap<String, ToolInvocationRecord> {
        let mut latest = BTreeMap::new();
        for record in &self.records {
            latest.insert(record.tool_name.clone(), record.clone());
        }
        latest
    }

    pub fn snapshot_history(&self) -> Vec<Message> {
        self.messages.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sequence_numbers_gap_free() {
        let mut state = ConversationState::new();
        let now = Utc::now();
        assert_eq!(state.append_message(Role::User, "a", now).unwrap(), 1);
        assert_eq!(state.append_message(Role::Agent, "b", now).unwrap(), 2);
        assert_eq!(state.append_message(Role::Tool, "c", now).unwrap(), 3);
        let seq: Vec<u64> = state.messages().iter().map(|m| m.sequence_number).collect();
        assert_eq!(seq, vec![1, 2, 3]);
    }

    #[test]
    fn test_second_pending_is_invariant_error() {
        let mut state = ConversationState::new();
        let now = Utc::now();
        state.begin_tool_call("a", json!({}), true, now).unwrap();
        let err = state.begin_tool_call("b", json!({}), false, now).unwrap_err();
        assert!(matches!(err, StateError::Invariant(_)));
        assert_eq!(state.records().len(), 1);
    }

    #[test]
    fn test_confirm_without_pending_is_noop() {
        let mut state = ConversationState::new();
        let before = state.clone();
        assert!(!state.confirm_pending().unwrap());
        assert_eq!(state, before);
    }

    #[test]
    fn test_complete_requires_confirmed() {
        let mut state = ConversationState::new();
        let now = Utc::now();
        state.begin_tool_call("a", json!({}), true, now).unwrap();
        assert!(matches!(
            state.complete_pending(json!("x")),
            Err(StateError::Invariant(_))
        ));
        assert!(state.confirm_pending().unwrap());
        state.complete_pending(json!({"ok": true})).unwrap();
        let record = &state.records()[0];
        assert_eq!(record.status, ToolCallStatus::Executed);
        assert_eq!(record.result, Some(json!({"ok": true})));
        assert!(state.outstanding().is_none());
        assert!(matches!(
            state.fail_pending("late"),
            Err(StateError::Invariant(_))
        ));
    }

    #[test]
    fn test_snapshot_tool_data_keeps_latest() {
        let mut state = ConversationState::new();
        let now = Utc::now();
        state.begin_tool_call("search", json!({"n": 1}), false, now).unwrap();
        state.confirm_pending().unwrap();
        state.fail_pending("boom").unwrap();
        state.begin_tool_call("search", json!({"n": 2}), false, now).unwrap();
        state.confirm_pending().unwrap();
        state.complete_pending(json!([])).unwrap();

        let data = state.snapshot_tool_data();
        assert_eq!(data.len(), 1);
        assert_eq!(data["search"].arguments, json!({"n": 2}));
        assert_eq!(data["search"].status, ToolCallStatus::Executed);
    }

    #[test]
    fn test_closed_rejects_mutation() {
        let mut state = ConversationState::new();
        let now = Utc::now();
        state.begin_tool_call("a", json!({}), true, now).unwrap();
        let discarded = state.discard_pending().unwrap().unwrap();
        assert_eq!(discarded.tool_name, "a");
        assert!(state.records().is_empty());
        state.close();
        assert_eq!(
            state.append_message(Role::User, "x", now),
            Err(StateError::Closed)
        );
        assert_eq!(state.confirm_pending(), Err(StateError::Closed));
        assert!(state.snapshot_history().is_empty());
    }
}
