//! 工作流编排器：每个实例一个 actor
//!
//! actor 串行消费邮箱（信号、屏障）与在途效果的结果：先写日志，再推进状态机，
//! 最后通过 watch 发布快照，查询因此是对最新快照的同步读取。
//! 启动时回放日志；若存在未解决的效果则重新发起（且仅发起这一个）。

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::core::{
    Effect, EffectOutcome, EffectRunner, OrchestratorError, Phase, SessionSupervisor, Signal,
    StateError, WorkflowMachine, WorkflowSnapshot, DEFAULT_MAX_PLANNING_STEPS,
};
use crate::goals::{Goal, GoalRegistry};
use crate::memory::{JournalEntry, JournalEvent, JournalStore, Message, ToolInvocationRecord};

/// 实例共享的协作者
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub registry: Arc<GoalRegistry>,
    pub runner: Arc<EffectRunner>,
    pub journal: Arc<dyn JournalStore>,
    pub max_planning_steps: usize,
}

impl OrchestratorDeps {
    pub fn new(
        registry: Arc<GoalRegistry>,
        runner: Arc<EffectRunner>,
        journal: Arc<dyn JournalStore>,
    ) -> Self {
        Self {
            registry,
            runner,
            journal,
            max_planning_steps: DEFAULT_MAX_PLANNING_STEPS,
        }
    }

    pub fn with_max_planning_steps(mut self, steps: usize) -> Self {
        self.max_planning_steps = steps;
        self
    }
}

/// 对外发布的实例状态
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InstanceState {
    pub snapshot: WorkflowSnapshot,
    /// 是否有效果在途
    pub busy: bool,
    /// 实例因致命错误中止时的原因
    pub aborted: Option<String>,
}

enum Mailbox {
    Signal(Signal),
    /// 之前投递的信号全部处理完后回复
    Barrier(oneshot::Sender<()>),
}

/// 实例句柄（可克隆）
#[derive(Clone)]
pub struct OrchestratorHandle {
    workflow_id: Arc<str>,
    tx: mpsc::UnboundedSender<Mailbox>,
    state: watch::Receiver<InstanceState>,
    supervisor: SessionSupervisor,
}

impl OrchestratorHandle {
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// 投递信号（不等待处理）
    pub fn signal(&self, signal: Signal) -> Result<(), OrchestratorError> {
        if let Signal::UserPrompt { text } = &signal {
            if text.trim().is_empty() {
                tracing::warn!(workflow_id = %self.workflow_id, "empty user_prompt rejected");
                return Err(OrchestratorError::Validation(
                    "user_prompt text must not be empty".to_string(),
                ));
            }
        }
        self.tx
            .send(Mailbox::Signal(signal))
            .map_err(|_| self.stopped())
    }

    pub fn state(&self) -> InstanceState {
        self.state.borrow().clone()
    }

    pub fn snapshot(&self) -> WorkflowSnapshot {
        self.state.borrow().snapshot.clone()
    }

    pub fn phase(&self) -> Phase {
        self.state.borrow().snapshot.phase
    }

    pub fn get_tool_data(&self) -> BTreeMap<String, ToolInvocationRecord> {
        self.state.borrow().snapshot.tool_data.clone()
    }

    pub fn get_history(&self) -> Vec<Message> {
        self.state.borrow().snapshot.history.clone()
    }

    pub fn aborted(&self) -> Option<String> {
        self.state.borrow().aborted.clone()
    }

    /// actor 已退出（中止或关闭）
    pub fn is_stopped(&self) -> bool {
        self.tx.is_closed()
    }

    /// 等待此前投递的信号全部被应用
    pub async fn flush(&self) -> Result<(), OrchestratorError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Mailbox::Barrier(done_tx))
            .map_err(|_| self.stopped())?;
        done_rx.await.map_err(|_| self.stopped())
    }

    /// 等待发布的状态满足条件
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&InstanceState) -> bool,
    ) -> Result<InstanceState, OrchestratorError> {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| self.stopped())?;
        Ok(state.clone())
    }

    /// 等到没有在途效果且邮箱已清空
    pub async fn wait_idle(&self) -> Result<InstanceState, OrchestratorError> {
        self.flush().await?;
        self.wait_for(|s| !s.busy || s.aborted.is_some()).await
    }

    pub(crate) fn shutdown(&self) {
        self.supervisor.shutdown();
    }

    fn stopped(&self) -> OrchestratorError {
        let reason = self
            .state
            .borrow()
            .aborted
            .clone()
            .unwrap_or_else(|| "instance stopped".to_string());
        OrchestratorError::Aborted(reason)
    }
}

/// 启动（或从日志恢复）一个实例
pub async fn spawn(
    workflow_id: &str,
    goal: Option<Arc<Goal>>,
    deps: OrchestratorDeps,
    parent: &CancellationToken,
) -> Result<OrchestratorHandle, OrchestratorError> {
    let entries = deps.journal.load(workflow_id).await?;
    let (machine, resume) = if entries.is_empty() {
        let started = JournalEntry::now(JournalEvent::Started {
            goal_id: goal.as_ref().map(|g| g.id.clone()),
        });
        deps.journal.append(workflow_id, &started).await?;
        tracing::info!(workflow_id, goal = ?goal.as_ref().map(|g| &g.id), "workflow started");
        let machine = WorkflowMachine::new(deps.registry.clone(), goal)
            .with_max_planning_steps(deps.max_planning_steps);
        (machine, None)
    } else {
        let machine = replay(&entries, &deps)?;
        let resume = machine.outstanding_effect().cloned();
        tracing::info!(
            workflow_id,
            entries = entries.len(),
            phase = ?machine.phase(),
            resume = ?resume.as_ref().map(Effect::id),
            "workflow recovered from journal"
        );
        (machine, resume)
    };

    let supervisor = SessionSupervisor::child_of(parent);
    let (tx, rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(InstanceState::default());
    let actor = Actor {
        workflow_id: workflow_id.to_string(),
        machine,
        deps,
        state_tx,
        supervisor: supervisor.clone(),
        in_flight: None,
    };
    tokio::spawn(actor.run(rx, resume));

    Ok(OrchestratorHandle {
        workflow_id: Arc::from(workflow_id),
        tx,
        state: state_rx,
        supervisor,
    })
}

/// 按日志顺序重建状态机；回放不会发起任何效果
fn replay(entries: &[JournalEntry], deps: &OrchestratorDeps) -> Result<WorkflowMachine, OrchestratorError> {
    let (first, rest) = entries
        .split_first()
        .ok_or_else(|| StateError::Invariant("empty journal".to_string()))?;
    let goal = match &first.event {
        JournalEvent::Started { goal_id } => goal_id
            .as_deref()
            .map(|id| deps.registry.lookup(id))
            .transpose()?,
        other => {
            return Err(StateError::Invariant(format!(
                "journal must begin with started, found {other:?}"
            ))
            .into())
        }
    };

    let mut machine = WorkflowMachine::new(deps.registry.clone(), goal)
        .with_max_planning_steps(deps.max_planning_steps);
    for entry in rest {
        match &entry.event {
            JournalEvent::Signal { signal } => {
                machine.apply_signal(signal, entry.recorded_at)?;
            }
            JournalEvent::EffectResolved { effect_id, outcome } => {
                machine.resolve(*effect_id, outcome, entry.recorded_at)?;
            }
            JournalEvent::Started { .. } => {
                return Err(StateError::Invariant("duplicate started entry".to_string()).into());
            }
        }
    }
    Ok(machine)
}

struct Actor {
    workflow_id: String,
    machine: WorkflowMachine,
    deps: OrchestratorDeps,
    state_tx: watch::Sender<InstanceState>,
    supervisor: SessionSupervisor,
    in_flight: Option<JoinHandle<(u64, EffectOutcome)>>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Mailbox>, resume: Option<Effect>) {
        if let Some(effect) = resume {
            self.launch(effect);
        }
        self.publish();
        let shutdown = self.supervisor.shutdown_token();

        loop {
            let step = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!(workflow_id = %self.workflow_id, "instance shut down");
                    break;
                }
                msg = rx.recv() => match msg {
                    Some(Mailbox::Signal(signal)) => self.on_signal(signal).await,
                    Some(Mailbox::Barrier(done)) => {
                        let _ = done.send(());
                        Ok(())
                    }
                    None => break,
                },
                joined = join_in_flight(&mut self.in_flight), if self.in_flight.is_some() => {
                    self.in_flight = None;
                    self.on_joined(joined).await
                }
            };
            if let Err(e) = step {
                self.abort(e);
                break;
            }
        }

        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
    }

    async fn on_signal(&mut self, signal: Signal) -> Result<(), OrchestratorError> {
        if self.machine.conversation().is_ended() {
            tracing::debug!(workflow_id = %self.workflow_id, signal = signal.name(), "ended, signal ignored");
            return Ok(());
        }
        let entry = JournalEntry::now(JournalEvent::Signal {
            signal: signal.clone(),
        });
        self.deps.journal.append(&self.workflow_id, &entry).await?;
        tracing::info!(workflow_id = %self.workflow_id, signal = signal.name(), "signal");

        let effect = self.machine.apply_signal(&signal, entry.recorded_at)?;
        if signal == Signal::EndChat {
            self.supervisor.end_chat();
            if self.in_flight.take().is_some() {
                tracing::info!(workflow_id = %self.workflow_id, "in-flight effect detached");
            }
        }
        if let Some(effect) = effect {
            self.launch(effect);
        }
        self.publish();
        Ok(())
    }

    async fn on_joined(
        &mut self,
        joined: Result<(u64, EffectOutcome), JoinError>,
    ) -> Result<(), OrchestratorError> {
        // 关闭导致的取消不是效果结果：留给恢复时重新发起
        if self.supervisor.is_shutdown() {
            tracing::debug!(workflow_id = %self.workflow_id, "shutting down, outcome left unresolved");
            return Ok(());
        }
        let (effect_id, outcome) = match joined {
            Ok(resolved) => resolved,
            Err(e) => match self.machine.outstanding_effect() {
                Some(effect) => {
                    tracing::error!(workflow_id = %self.workflow_id, effect_id = effect.id(), kind = effect.kind(), error = %e, "effect task failed");
                    (effect.id(), task_failure(effect, &e))
                }
                None => return Ok(()),
            },
        };
        if !self.machine.awaits(effect_id) {
            tracing::debug!(workflow_id = %self.workflow_id, effect_id, "stale outcome dropped");
            return Ok(());
        }
        let entry = JournalEntry::now(JournalEvent::EffectResolved {
            effect_id,
            outcome: outcome.clone(),
        });
        self.deps.journal.append(&self.workflow_id, &entry).await?;

        let next = self.machine.resolve(effect_id, &outcome, entry.recorded_at)?;
        if let Some(effect) = next {
            self.launch(effect);
        }
        self.publish();
        Ok(())
    }

    fn launch(&mut self, effect: Effect) {
        tracing::debug!(workflow_id = %self.workflow_id, effect_id = effect.id(), kind = effect.kind(), "launching effect");
        let runner = self.deps.runner.clone();
        let cancel = self.supervisor.effect_token();
        self.in_flight = Some(tokio::spawn(async move {
            let outcome = runner.run(&effect, &cancel).await;
            (effect.id(), outcome)
        }));
    }

    fn publish(&self) {
        let snapshot = self.machine.snapshot();
        let busy = self.machine.outstanding_effect().is_some();
        self.state_tx.send_modify(|state| {
            state.snapshot = snapshot;
            state.busy = busy;
        });
    }

    fn abort(&mut self, error: OrchestratorError) {
        tracing::error!(workflow_id = %self.workflow_id, error = %error, "workflow aborted");
        self.supervisor.end_chat();
        let reason = error.to_string();
        self.state_tx.send_modify(|state| {
            state.busy = false;
            state.aborted = Some(reason);
        });
    }
}

/// 效果任务崩溃（协作者 panic）按一次失败尝试处理，实例继续运行
fn task_failure(effect: &Effect, error: &JoinError) -> EffectOutcome {
    let message = format!("effect task failed: {error}");
    match effect {
        Effect::Plan { .. } => EffectOutcome::PlanningFailed {
            message,
            attempts: 1,
        },
        Effect::InvokeTool { .. } => EffectOutcome::ToolFailed {
            message,
            attempts: 1,
        },
    }
}

async fn join_in_flight(
    handle: &mut Option<JoinHandle<(u64, EffectOutcome)>>,
) -> Result<(u64, EffectOutcome), JoinError> {
    match handle.as_mut() {
        Some(h) => h.await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PlanningError, RetryPolicy, ToolExecutionError};
    use crate::goals::{ArgKind, ToolCallSpec};
    use crate::memory::MemoryJournal;
    use crate::planning::{NextAction, PlanningCapability};
    use crate::tools::{ToolCatalog, ToolExecutor};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use std::time::Duration;

    struct Script(Mutex<Vec<NextAction>>);

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
                Ok(NextAction::ask("Anything else?"))
            } else {
                Ok(script.remove(0))
            }
        }
    }

    struct Echo;

    #[async_trait]
    impl ToolCatalog for Echo {
        async fn invoke(&self, _tool: &str, args: Value) -> Result<Value, ToolExecutionError> {
            Ok(args)
        }
    }

    struct Broken;

    #[async_trait]
    impl ToolCatalog for Broken {
        async fn invoke(&self, tool: &str, _args: Value) -> Result<Value, ToolExecutionError> {
            panic!("{tool} is broken")
        }
    }

    fn deps(script: Vec<NextAction>, journal: Arc<dyn JournalStore>) -> OrchestratorDeps {
        deps_with(script, Arc::new(Echo), journal)
    }

    fn deps_with(
        script: Vec<NextAction>,
        catalog: Arc<dyn ToolCatalog>,
        journal: Arc<dyn JournalStore>,
    ) -> OrchestratorDeps {
        let goal = Goal {
            id: "trains".into(),
            description: String::new(),
            starter_prompt: "Where to?".into(),
            tools: vec![
                ToolCallSpec::new("search_trains").arg("destination", ArgKind::String),
                ToolCallSpec::new("book_train").confirmed(),
            ],
            match_keywords: Default::default(),
        };
        let policy = RetryPolicy {
            max_attempts: 2,
            attempt_timeout: Duration::from_secs(1),
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        };
        let runner = EffectRunner::new(
            Arc::new(Script(Mutex::new(script))),
            ToolExecutor::new(catalog, policy.clone()),
            policy,
        );
        OrchestratorDeps::new(
            Arc::new(GoalRegistry::new(vec![goal]).unwrap()),
            Arc::new(runner),
            journal,
        )
    }

    #[tokio::test]
    async fn test_runs_until_confirmation() {
        let journal: Arc<dyn JournalStore> = Arc::new(MemoryJournal::new());
        let deps = deps(
            vec![
                NextAction::call_tool("search_trains", json!({"destination": "Paris"})),
                NextAction::call_tool("book_train", json!({})),
            ],
            journal.clone(),
        );
        let handle = spawn("wf-1", None, deps, &CancellationToken::new())
            .await
            .unwrap();
        handle.signal(Signal::user_prompt("train to Paris")).unwrap();
        let state = handle
            .wait_for(|s| s.snapshot.phase == Phase::AwaitingConfirmation)
            .await
            .unwrap();
        assert!(!state.busy);
        assert_eq!(state.snapshot.tool_data.len(), 2);

        let entries = journal.load("wf-1").await.unwrap();
        assert!(matches!(entries[0].event, JournalEvent::Started { goal_id: None }));
        assert_eq!(entries.len(), 5);
    }

    #[tokio::test]
    async fn test_empty_prompt_rejected() {
        let journal: Arc<dyn JournalStore> = Arc::new(MemoryJournal::new());
        let handle = spawn("wf-2", None, deps(vec![], journal), &CancellationToken::new())
            .await
            .unwrap();
        let err = handle.signal(Signal::user_prompt("  ")).unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
        handle.flush().await.unwrap();
        assert!(handle.get_history().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stops_actor() {
        let journal: Arc<dyn JournalStore> = Arc::new(MemoryJournal::new());
        let root = CancellationToken::new();
        let handle = spawn("wf-3", None, deps(vec![], journal), &root).await.unwrap();
        root.cancel();
        tokio::time::timeout(Duration::from_secs(1), async {
            while !handle.is_stopped() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(matches!(handle.flush().await, Err(OrchestratorError::Aborted(_))));
    }

    #[tokio::test]
    async fn test_panicking_tool_fails_call_without_abort() {
        let journal: Arc<dyn JournalStore> = Arc::new(MemoryJournal::new());
        let deps = deps_with(
            vec![
                NextAction::call_tool("search_trains", json!({"destination": "Paris"})),
                NextAction::ask("Shall I try another day?"),
            ],
            Arc::new(Broken),
            journal.clone(),
        );
        let handle = spawn("wf-4", None, deps, &CancellationToken::new())
            .await
            .unwrap();
        handle.signal(Signal::user_prompt("train to Paris")).unwrap();
        let state = handle
            .wait_for(|s| !s.busy && s.snapshot.phase == Phase::AwaitingPrompt)
            .await
            .unwrap();
        assert!(state.aborted.is_none());
        assert!(!handle.is_stopped());
        assert_eq!(
            state.snapshot.tool_data["search_trains"].status,
            crate::memory::ToolCallStatus::Failed
        );
        assert!(state
            .snapshot
            .history
            .iter()
            .all(|m| !m.content.contains("is broken")));

        let entries = journal.load("wf-4").await.unwrap();
        assert!(entries.iter().any(|e| matches!(
            &e.event,
            JournalEvent::EffectResolved { outcome: EffectOutcome::ToolFailed { attempts: 1, .. }, .. }
        )));
    }

    #[tokio::test]
    async fn test_outcome_after_shutdown_not_journaled() {
        let journal: Arc<dyn JournalStore> = Arc::new(MemoryJournal::new());
        let deps = deps(vec![], journal.clone());
        let mut machine = WorkflowMachine::new(deps.registry.clone(), None);
        let effect = machine
            .apply_signal(&Signal::user_prompt("train to Paris"), chrono::Utc::now())
            .unwrap()
            .unwrap();
        let (state_tx, _state_rx) = watch::channel(InstanceState::default());
        let supervisor = SessionSupervisor::new();
        let mut actor = Actor {
            workflow_id: "wf-5".to_string(),
            machine,
            deps,
            state_tx,
            supervisor: supervisor.clone(),
            in_flight: None,
        };

        supervisor.shutdown();
        let cancelled = EffectOutcome::PlanningFailed {
            message: "cancelled during backoff".to_string(),
            attempts: 1,
        };
        actor.on_joined(Ok((effect.id(), cancelled))).await.unwrap();
        assert!(actor.machine.awaits(effect.id()));
        assert!(journal.load("wf-5").await.unwrap().is_empty());
    }
}
