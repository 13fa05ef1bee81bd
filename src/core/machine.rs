//! 工作流状态机（确定性核心）
//!
//! 只做两件事：应用信号、应用效果结果。需要外部调用时产出一个 Effect 并挂起，
//! 直到对应结果被 resolve。本身从不 await、不读时钟（时间由调用方传入），
//! 因此按日志顺序重放会得到完全相同的状态。

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{Phase, RecoveryAction, RecoveryEngine, Signal, StateError, WorkflowSnapshot};
use crate::goals::{remaining_specs, resolve_call, Goal, GoalRegistry};
use crate::memory::{ConversationState, Role};
use crate::planning::{NextAction, PlanRequest};

/// 单个用户回合内默认允许的规划次数
pub const DEFAULT_MAX_PLANNING_STEPS: usize = 12;

/// 待执行的外部效果；id 在实例内单调递增
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Plan {
        id: u64,
        request: PlanRequest,
    },
    InvokeTool {
        id: u64,
        tool_name: String,
        args: Value,
    },
}

impl Effect {
    pub fn id(&self) -> u64 {
        match self {
            Effect::Plan { id, .. } | Effect::InvokeTool { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Effect::Plan { .. } => "plan",
            Effect::InvokeTool { .. } => "invoke_tool",
        }
    }
}

/// 效果的最终结果（重试已在执行侧完成，这里只记录一次）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EffectOutcome {
    Planned { action: NextAction },
    PlanningFailed { message: String, attempts: u32 },
    ToolSucceeded { result: Value },
    ToolFailed { message: String, attempts: u32 },
}

/// 工作流状态机
#[derive(Debug, Clone)]
pub struct WorkflowMachine {
    registry: Arc<GoalRegistry>,
    recovery: RecoveryEngine,
    goal: Option<Arc<Goal>>,
    /// 启动时固定的目标不会被重新匹配
    goal_pinned: bool,
    conversation: ConversationState,
    phase: Phase,
    next_effect_id: u64,
    outstanding: Option<Effect>,
    queued_prompts: VecDeque<String>,
    /// 当前计划周期在记录日志中的起点
    cycle_start: usize,
    cycle_complete: bool,
    steps_this_turn: usize,
    max_planning_steps: usize,
}

impl WorkflowMachine {
    pub fn new(registry: Arc<GoalRegistry>, goal: Option<Arc<Goal>>) -> Self {
        Self {
            registry,
            recovery: RecoveryEngine::new(),
            goal_pinned: goal.is_some(),
            goal,
            conversation: ConversationState::new(),
            phase: Phase::AwaitingPrompt,
            next_effect_id: 1,
            outstanding: None,
            queued_prompts: VecDeque::new(),
            cycle_start: 0,
            cycle_complete: false,
            steps_this_turn: 0,
            max_planning_steps: DEFAULT_MAX_PLANNING_STEPS,
        }
    }

    pub fn with_max_planning_steps(mut self, steps: usize) -> Self {
        self.max_planning_steps = steps.max(1);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn goal(&self) -> Option<&Arc<Goal>> {
        self.goal.as_ref()
    }

    pub fn conversation(&self) -> &ConversationState {
        &self.conversation
    }

    pub fn outstanding_effect(&self) -> Option<&Effect> {
        self.outstanding.as_ref()
    }

    /// 是否正在等待该效果的结果（已结束或过期的效果返回 false）
    pub fn awaits(&self, effect_id: u64) -> bool {
        self.outstanding
            .as_ref()
            .map(|e| e.id() == effect_id)
            .unwrap_or(false)
    }

    pub fn queued_prompts(&self) -> usize {
        self.queued_prompts.len()
    }

    pub fn snapshot(&self) -> WorkflowSnapshot {
        WorkflowSnapshot {
            phase: self.phase,
            goal_id: self.goal.as_ref().map(|g| g.id.clone()),
            history: self.conversation.snapshot_history(),
            tool_data: self.conversation.snapshot_tool_data(),
            ended: self.conversation.is_ended(),
        }
    }

    /// 应用外部信号；返回新发起的效果（若有）
    pub fn apply_signal(
        &mut self,
        signal: &Signal,
        at: DateTime<Utc>,
    ) -> Result<Option<Effect>, StateError> {
        if self.conversation.is_ended() {
            tracing::debug!(signal = signal.name(), "workflow ended, signal ignored");
            return Ok(None);
        }

        match signal {
            Signal::UserPrompt { text } => {
                if text.trim().is_empty() {
                    tracing::warn!("validation error: empty user_prompt ignored");
                    return Ok(None);
                }
                if self.phase == Phase::AwaitingPrompt {
                    self.handle_prompt(text.clone(), at)
                } else {
                    tracing::info!(phase = ?self.phase, "user_prompt queued until awaiting prompt");
                    self.queued_prompts.push_back(text.clone());
                    Ok(None)
                }
            }
            Signal::Confirm => {
                if self.phase != Phase::AwaitingConfirmation {
                    tracing::debug!(phase = ?self.phase, "confirm ignored");
                    return Ok(None);
                }
                if !self.conversation.confirm_pending()? {
                    return Err(StateError::Invariant(
                        "awaiting confirmation without a pending tool call".to_string(),
                    ));
                }
                self.enter_executing()
            }
            Signal::EndChat => {
                if let Some(effect) = self.outstanding.take() {
                    tracing::info!(effect_id = effect.id(), kind = effect.kind(), "in-flight effect will be ignored");
                }
                self.queued_prompts.clear();
                if let Some(record) = self.conversation.discard_pending()? {
                    tracing::info!(tool = %record.tool_name, status = ?record.status, "discarded unexecuted tool call");
                }
                self.conversation.append_message(Role::Agent, "Chat ended.", at)?;
                self.conversation.close();
                self.phase = Phase::Ended;
                Ok(None)
            }
        }
    }

    /// 应用效果结果；与当前等待的效果不匹配（过期、已结束）时忽略
    pub fn resolve(
        &mut self,
        effect_id: u64,
        outcome: &EffectOutcome,
        at: DateTime<Utc>,
    ) -> Result<Option<Effect>, StateError> {
        let effect = match self.outstanding.take() {
            Some(effect) if effect.id() == effect_id => effect,
            other => {
                self.outstanding = other;
                tracing::debug!(effect_id, "stale effect outcome ignored");
                return Ok(None);
            }
        };

        match (effect, outcome) {
            (Effect::Plan { request, .. }, EffectOutcome::Planned { action }) => {
                self.on_planned(&request.goal, action.clone(), at)
            }
            (Effect::Plan { .. }, EffectOutcome::PlanningFailed { message, attempts }) => {
                tracing::warn!(effect_id, attempts, error = %message, "planning failed");
                let action = self.recovery.on_planning_failure();
                self.recover(action, at)
            }
            (Effect::InvokeTool { .. }, EffectOutcome::ToolSucceeded { result }) => {
                self.conversation.complete_pending(result.clone())?;
                let content = match result {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                self.conversation.append_message(Role::Tool, content, at)?;
                self.enter_planning(at)
            }
            (Effect::InvokeTool { tool_name, .. }, EffectOutcome::ToolFailed { message, attempts }) => {
                tracing::warn!(effect_id, tool = %tool_name, attempts, error = %message, "tool call failed");
                self.conversation.fail_pending(message)?;
                let action = self.recovery.on_tool_failure(&tool_name, *attempts);
                self.recover(action, at)
            }
            (effect, outcome) => Err(StateError::Invariant(format!(
                "outcome {:?} does not belong to {} effect {}",
                outcome,
                effect.kind(),
                effect.id()
            ))),
        }
    }

    fn handle_prompt(&mut self, text: String, at: DateTime<Utc>) -> Result<Option<Effect>, StateError> {
        if self.goal.is_none() || (self.cycle_complete && !self.goal_pinned) {
            let matched = self.registry.match_intent(&text);
            let switched = self
                .goal
                .as_ref()
                .map(|g| g.id != matched.id)
                .unwrap_or(true);
            if switched {
                tracing::info!(goal = %matched.id, "goal selected");
                self.goal = Some(matched);
            }
        }
        self.cycle_complete = false;
        self.conversation.append_message(Role::User, text, at)?;
        self.steps_this_turn = 0;
        self.enter_planning(at)
    }

    fn on_planned(
        &mut self,
        goal: &Goal,
        action: NextAction,
        at: DateTime<Utc>,
    ) -> Result<Option<Effect>, StateError> {
        match action {
            NextAction::AskClarification { text } => {
                self.conversation.append_message(Role::Agent, text, at)?;
                self.enter_awaiting_prompt(at)
            }
            NextAction::GoalComplete { summary } => {
                let summary = if summary.trim().is_empty() {
                    format!("All done with {}.", goal.id)
                } else {
                    summary
                };
                self.conversation.append_message(Role::Agent, summary, at)?;
                self.cycle_start = self.conversation.records().len();
                self.cycle_complete = true;
                self.enter_awaiting_prompt(at)
            }
            NextAction::CallTool { tool_name, args } => {
                let needs_confirmation = match resolve_call(goal, &tool_name, &args) {
                    Ok(spec) => spec.needs_confirmation,
                    Err(e) => {
                        tracing::warn!(tool = %tool_name, error = %e, "planner chose an invalid tool call");
                        let action = self.recovery.on_planning_failure();
                        return self.recover(action, at);
                    }
                };
                let prompt = confirmation_prompt(&tool_name, &args);
                self.conversation
                    .begin_tool_call(tool_name, args, needs_confirmation, at)?;
                if needs_confirmation {
                    self.conversation.append_message(Role::Agent, prompt, at)?;
                    self.phase = Phase::AwaitingConfirmation;
                    Ok(None)
                } else {
                    self.conversation.confirm_pending()?;
                    self.enter_executing()
                }
            }
        }
    }

    fn recover(&mut self, action: RecoveryAction, at: DateTime<Utc>) -> Result<Option<Effect>, StateError> {
        self.conversation
            .append_message(Role::Agent, action.message(), at)?;
        match action {
            RecoveryAction::ReturnToPlanning(_) => self.enter_planning(at),
            RecoveryAction::AskUser(_) => self.enter_awaiting_prompt(at),
        }
    }

    fn enter_planning(&mut self, at: DateTime<Utc>) -> Result<Option<Effect>, StateError> {
        if self.steps_this_turn >= self.max_planning_steps {
            tracing::warn!(steps = self.steps_this_turn, "planning step limit reached");
            let action = self.recovery.on_step_limit();
            return self.recover(action, at);
        }
        let goal = self
            .goal
            .clone()
            .ok_or_else(|| StateError::Invariant("planning without an active goal".to_string()))?;
        self.steps_this_turn += 1;
        let cycle_records = self
            .conversation
            .records()
            .get(self.cycle_start..)
            .unwrap_or_default();
        let request = PlanRequest {
            remaining: remaining_specs(&goal, cycle_records),
            history: self.conversation.snapshot_history(),
            goal,
        };
        self.phase = Phase::Planning;
        let id = self.take_effect_id();
        Ok(Some(self.issue(Effect::Plan { id, request })))
    }

    fn enter_executing(&mut self) -> Result<Option<Effect>, StateError> {
        let record = self
            .conversation
            .outstanding()
            .ok_or_else(|| StateError::Invariant("no tool call to execute".to_string()))?;
        let (tool_name, args) = (record.tool_name.clone(), record.arguments.clone());
        self.phase = Phase::ExecutingTool;
        let id = self.take_effect_id();
        Ok(Some(self.issue(Effect::InvokeTool { id, tool_name, args })))
    }

    fn enter_awaiting_prompt(&mut self, at: DateTime<Utc>) -> Result<Option<Effect>, StateError> {
        self.phase = Phase::AwaitingPrompt;
        match self.queued_prompts.pop_front() {
            Some(text) => self.handle_prompt(text, at),
            None => Ok(None),
        }
    }

    fn take_effect_id(&mut self) -> u64 {
        let id = self.next_effect_id;
        self.next_effect_id += 1;
        id
    }

    fn issue(&mut self, effect: Effect) -> Effect {
        if let Some(previous) = self.outstanding.replace(effect.clone()) {
            tracing::error!(effect_id = previous.id(), "effect superseded before resolution");
        }
        tracing::debug!(effect_id = effect.id(), kind = effect.kind(), "effect issued");
        effect
    }
}

fn confirmation_prompt(tool_name: &str, args: &Value) -> String {
    format!(
        "Confirmation requested: I'm ready to run `{tool_name}` with {args}. \
         Please confirm to proceed."
    )
}
