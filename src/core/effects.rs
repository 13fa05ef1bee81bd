//! 效果执行
//!
//! 把状态机产出的 Effect 交给外部协作者执行，并把最终结果折叠为一个 EffectOutcome。
//! 重试在这里完成，状态机只看到一次结果。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::{Effect, EffectOutcome, PlanningError, RetryPolicy};
use crate::goals::resolve_call;
use crate::planning::{NextAction, PlanRequest, PlanningCapability};
use crate::tools::ToolExecutor;

pub struct EffectRunner {
    planner: Arc<dyn PlanningCapability>,
    tools: ToolExecutor,
    planning_policy: RetryPolicy,
}

impl EffectRunner {
    pub fn new(
        planner: Arc<dyn PlanningCapability>,
        tools: ToolExecutor,
        planning_policy: RetryPolicy,
    ) -> Self {
        Self {
            planner,
            tools,
            planning_policy,
        }
    }

    pub async fn run(&self, effect: &Effect, cancel: &CancellationToken) -> EffectOutcome {
        match effect {
            Effect::Plan { request, .. } => self.plan(request, cancel).await,
            Effect::InvokeTool {
                tool_name, args, ..
            } => match self.tools.execute(tool_name, args, cancel).await {
                Ok(result) => EffectOutcome::ToolSucceeded { result },
                Err(failure) => EffectOutcome::ToolFailed {
                    message: failure.error.message,
                    attempts: failure.attempts,
                },
            },
        }
    }

    /// 规划失败（无法解析、选了计划外的工具、参数不合法）都按一次失败尝试计
    async fn plan(&self, request: &PlanRequest, cancel: &CancellationToken) -> EffectOutcome {
        let planner = &self.planner;
        let result = self
            .planning_policy
            .run(
                cancel,
                move |attempt| async move {
                    tracing::debug!(goal = %request.goal.id, attempt, "planning");
                    let action = planner
                        .plan(&request.goal, &request.history, &request.remaining)
                        .await?;
                    if let NextAction::CallTool { tool_name, args } = &action {
                        resolve_call(&request.goal, tool_name, args)?;
                    }
                    Ok::<NextAction, PlanningError>(action)
                },
                |_: &PlanningError| true,
                |limit| {
                    PlanningError::new(format!("planning timed out after {}ms", limit.as_millis()))
                },
            )
            .await;

        match result {
            Ok(action) => EffectOutcome::Planned { action },
            Err(failure) => EffectOutcome::PlanningFailed {
                message: failure.error.message,
                attempts: failure.attempts,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ToolExecutionError;
    use crate::goals::{ArgKind, Goal, ToolCallSpec};
    use crate::memory::Message;
    use crate::tools::ToolCatalog;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use std::time::Duration;

    struct Script(Mutex<Vec<Result<NextAction, PlanningError>>>);

    #[async_trait]
    impl PlanningCapability for Script {
        async fn plan(
            &self,
            _goal: &Goal,
            _history: &[Message],
            _remaining: &[ToolCallSpec],
        ) -> Result<NextAction, PlanningError> {
            let mut script = self.0.lock().unwrap();
            if script.is_empty() {
                Err(PlanningError::new("script exhausted"))
            } else {
                script.remove(0)
            }
        }
    }

    struct Down;

    #[async_trait]
    impl ToolCatalog for Down {
        async fn invoke(&self, _tool: &str, _args: Value) -> Result<Value, ToolExecutionError> {
            Err(ToolExecutionError::permanent("no such booking"))
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            attempt_timeout: Duration::from_millis(200),
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    fn runner(script: Vec<Result<NextAction, PlanningError>>) -> EffectRunner {
        EffectRunner::new(
            Arc::new(Script(Mutex::new(script))),
            ToolExecutor::new(Arc::new(Down), fast_policy()),
            fast_policy(),
        )
    }

    fn plan_effect() -> Effect {
        let goal = Goal {
            id: "trains".into(),
            description: String::new(),
            starter_prompt: "Ask".into(),
            tools: vec![ToolCallSpec::new("search_trains").arg("destination", ArgKind::String)],
            match_keywords: Default::default(),
        };
        Effect::Plan {
            id: 1,
            request: PlanRequest {
                remaining: goal.tools.clone(),
                goal: Arc::new(goal),
                history: vec![],
            },
        }
    }

    #[tokio::test]
    async fn test_invalid_choice_retried_as_planning_error() {
        let runner = runner(vec![
            Ok(NextAction::call_tool("launch_rocket", json!({}))),
            Ok(NextAction::call_tool("search_trains", json!({"destination": 7}))),
            Ok(NextAction::call_tool("search_trains", json!({"destination": "Paris"}))),
        ]);
        let outcome = runner.run(&plan_effect(), &CancellationToken::new()).await;
        assert_eq!(
            outcome,
            EffectOutcome::Planned {
                action: NextAction::call_tool("search_trains", json!({"destination": "Paris"}))
            }
        );
    }

    #[tokio::test]
    async fn test_planning_exhausted() {
        let runner = runner(vec![]);
        match runner.run(&plan_effect(), &CancellationToken::new()).await {
            EffectOutcome::PlanningFailed { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_permanent_tool_failure_not_retried() {
        let runner = runner(vec![]);
        let effect = Effect::InvokeTool {
            id: 2,
            tool_name: "book_train".into(),
            args: json!({}),
        };
        match runner.run(&effect, &CancellationToken::new()).await {
            EffectOutcome::ToolFailed { message, attempts } => {
                assert_eq!(attempts, 1);
                assert_eq!(message, "no such booking");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
