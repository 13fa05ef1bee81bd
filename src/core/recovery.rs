//! 错误恢复引擎
//!
//! 把耗尽重试的工具失败、规划失败、步数超限映射为 RecoveryAction：
//! 回到规划（由规划器决定重试/替代/询问用户）或直接询问用户。
//! 给用户看的永远是自然语言，不包含原始错误内容。

/// 恢复动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 追加 Agent 消息后回到 PLANNING
    ReturnToPlanning(String),
    /// 追加 Agent 消息后等待用户输入
    AskUser(String),
}

impl RecoveryAction {
    pub fn message(&self) -> &str {
        match self {
            RecoveryAction::ReturnToPlanning(m) | RecoveryAction::AskUser(m) => m,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn on_tool_failure(&self, tool_name: &str, attempts: u32) -> RecoveryAction {
        let tries = if attempts > 1 {
            format!(" after {attempts} attempts")
        } else {
            String::new()
        };
        RecoveryAction::ReturnToPlanning(format!(
            "Sorry, I couldn't complete `{tool_name}`{tries}. Let me work out another way forward."
        ))
    }

    pub fn on_planning_failure(&self) -> RecoveryAction {
        RecoveryAction::AskUser(
            "Sorry, I had trouble deciding what to do next. Could you rephrase or tell me \
             a bit more about what you need?"
                .to_string(),
        )
    }

    pub fn on_step_limit(&self) -> RecoveryAction {
        RecoveryAction::AskUser(
            "I've taken a lot of steps without finishing. How would you like me to continue?"
                .to_string(),
        )
    }
}
