//! 状态定义：编排阶段、外部信号、只读快照
//!
//! 查询只读取 WorkflowSnapshot（由编排器在每次状态推进后发布），不会触发任何效果。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::memory::{Message, ToolInvocationRecord};

/// 编排器阶段
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    #[default]
    AwaitingPrompt,
    Planning,
    AwaitingConfirmation,
    ExecutingTool,
    /// 终态
    Ended,
}

/// 外部信号（排队投递、发送方不等待结果）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum Signal {
    UserPrompt { text: String },
    Confirm,
    EndChat,
}

impl Signal {
    pub fn user_prompt(text: impl Into<String>) -> Self {
        Signal::UserPrompt { text: text.into() }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Signal::UserPrompt { .. } => "user_prompt",
            Signal::Confirm => "confirm",
            Signal::EndChat => "end_chat",
        }
    }
}

/// 对外可见的只读快照
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct WorkflowSnapshot {
    pub phase: Phase,
    pub goal_id: Option<String>,
    pub history: Vec<Message>,
    pub tool_data: BTreeMap<String, ToolInvocationRecord>,
    pub ended: bool,
}
