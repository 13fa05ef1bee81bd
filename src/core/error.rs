//! 错误类型
//!
//! 分两类：可恢复错误（工具失败、规划失败、非法信号）被吸收进 WorkflowState，
//! 以 Agent 消息或记录状态呈现；契约错误（StateError）是致命的，会中止实例。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 会话状态契约被破坏（逻辑缺陷），出现即中止实例
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Conversation is closed")]
    Closed,
}

/// 工具失败类别：transient 可重试，permanent 直接落为 failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    Transient,
    Permanent,
}

/// Tool Catalog 调用失败
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind:?} tool error: {message}")]
pub struct ToolExecutionError {
    pub kind: ToolErrorKind,
    pub message: String,
}

impl ToolExecutionError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ToolErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ToolErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ToolErrorKind::Transient
    }
}

/// Planning Capability 返回无法解析或非法的结果
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("Planning error: {message}")]
pub struct PlanningError {
    pub message: String,
}

impl PlanningError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// 效果日志读写失败
#[derive(Error, Debug)]
pub enum JournalError {
    #[error("Journal I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Journal codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// 编排器对外（Hub / Handle）的错误
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// 信号载荷不合法：记录日志后忽略
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Workflow not found: {0}")]
    NotFound(String),

    /// 实例因契约错误或日志失败而中止
    #[error("Workflow aborted: {0}")]
    Aborted(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error(transparent)]
    Goal(#[from] crate::goals::GoalError),
}
