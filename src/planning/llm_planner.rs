//! 基于 LLM 的规划器
//!
//! 把目标、开场提示、剩余步骤与对话历史拼成 prompt，调用 LLM，
//! 再从回复中提取 JSON（```json 代码块或裸 JSON）解析为 NextAction。

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::PlanningError;
use crate::goals::{Goal, ToolCallSpec};
use crate::llm::{ChatMessage, LlmClient};
use crate::memory::{Message, Role};
use crate::planning::{NextAction, PlanningCapability};

/// 从 LLM 输出中解析下一步动作；找不到 JSON 或格式不符均为 PlanningError
pub fn parse_next_action(output: &str) -> Result<NextAction, PlanningError> {
    let trimmed = output.trim();

    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```")
            .map(|end| rest[..end].trim())
            .unwrap_or(rest.trim())
    } else if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start > end {
            return Err(PlanningError::new(format!("no JSON object in reply: {trimmed}")));
        }
        &trimmed[start..=end]
    } else {
        return Err(PlanningError::new(format!("no JSON object in reply: {trimmed}")));
    };

    serde_json::from_str(json_str)
        .map_err(|e| PlanningError::new(format!("{}: {}", e, json_str)))
}

/// LLM 规划器：持有 LLM 与基础 system prompt
pub struct LlmPlanner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl LlmPlanner {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    /// 拼接 system：基础提示 + 目标 + 剩余步骤 + 输出格式约束
    pub fn render_system(&self, goal: &Goal, remaining: &[ToolCallSpec]) -> String {
        let steps = if remaining.is_empty() {
            "(all planned tools have been executed)".to_string()
        } else {
            remaining
                .iter()
                .map(|s| {
                    let args: Vec<String> = s
                        .required_args
                        .iter()
                        .map(|(name, kind)| format!("{name}: {kind:?}"))
                        .collect();
                    format!(
                        "- {}({}){}",
                        s.tool_name,
                        args.join(", "),
                        if s.needs_confirmation {
                            " [requires user confirmation]"
                        } else {
                            ""
                        }
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            "{}\n\n## Goal: {}\n{}\n\n## Context\n{}\n\n## Remaining tools (in order)\n{}\n\n\
             Reply with exactly one JSON object and nothing else, one of:\n\
             {{\"action\": \"call_tool\", \"tool_name\": \"<name>\", \"args\": {{...}}}}\n\
             {{\"action\": \"ask_clarification\", \"text\": \"<question for the user>\"}}\n\
             {{\"action\": \"goal_complete\", \"summary\": \"<summary for the user>\"}}",
            self.system_prompt, goal.id, goal.description, goal.starter_prompt, steps
        )
    }
}

#[async_trait]
impl PlanningCapability for LlmPlanner {
    async fn plan(
        &self,
        goal: &Goal,
        history: &[Message],
        remaining: &[ToolCallSpec],
    ) -> Result<NextAction, PlanningError> {
        let mut messages = vec![ChatMessage::system(self.render_system(goal, remaining))];
        messages.extend(history.iter().map(|m| match m.role {
            Role::User => ChatMessage::user(m.content.clone()),
            Role::Agent => ChatMessage::assistant(m.content.clone()),
            Role::Tool => ChatMessage::user(format!("Tool result: {}", m.content)),
        }));

        let output = self
            .llm
            .complete(&messages)
            .await
            .map_err(|e| PlanningError::new(format!("completion failed: {e}")))?;
        parse_next_action(&output)
    }
}
