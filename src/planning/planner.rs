//! 规划能力抽象
//!
//! 规划器根据（目标、历史、剩余步骤）给出下一步：调用工具 / 请用户澄清 / 目标完成。
//! 具体实现是外部协作者；编排器只依赖这个 trait。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::PlanningError;
use crate::goals::{Goal, ToolCallSpec};
use crate::memory::Message;

fn empty_args() -> Value {
    Value::Object(Default::default())
}

/// 规划器输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NextAction {
    CallTool {
        #[serde(alias = "tool")]
        tool_name: String,
        #[serde(default = "empty_args")]
        args: Value,
    },
    AskClarification {
        text: String,
    },
    GoalComplete {
        #[serde(default)]
        summary: String,
    },
}

impl NextAction {
    pub fn call_tool(tool_name: impl Into<String>, args: Value) -> Self {
        NextAction::CallTool {
            tool_name: tool_name.into(),
            args,
        }
    }

    pub fn ask(text: impl Into<String>) -> Self {
        NextAction::AskClarification { text: text.into() }
    }

    pub fn complete(summary: impl Into<String>) -> Self {
        NextAction::GoalComplete {
            summary: summary.into(),
        }
    }
}

/// 一次规划请求的输入（由状态机在进入 PLANNING 时生成）
#[derive(Debug, Clone, PartialEq)]
pub struct PlanRequest {
    pub goal: Arc<Goal>,
    pub history: Vec<Message>,
    pub remaining: Vec<ToolCallSpec>,
}

/// 规划能力 trait
#[async_trait]
pub trait PlanningCapability: Send + Sync {
    async fn plan(
        &self,
        goal: &Goal,
        history: &[Message],
        remaining: &[ToolCallSpec],
    ) -> Result<NextAction, PlanningError>;
}
