//! 集成测试共用：脚本化规划器、可注入失败/阻塞的工具目录、Hub 构建

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use goal_agent::config::AppConfig;
use goal_agent::core::{PlanningError, ToolExecutionError};
use goal_agent::goals::{ArgKind, Goal, ToolCallSpec};
use goal_agent::memory::{JournalStore, Message};
use goal_agent::planning::{NextAction, PlanningCapability};
use goal_agent::tools::ToolCatalog;
use goal_agent::{HubBuilder, OrchestratorHub};
use serde_json::{json, Value};
use tokio::sync::Semaphore;

pub const TRAIN_GOAL: &str = "book_train_and_invoice";

/// search_trains → book_train（需确认）→ generate_invoice
pub fn train_goal() -> Goal {
    Goal {
        id: TRAIN_GOAL.to_string(),
        description: "Book a train and invoice it".to_string(),
        starter_prompt: "Ask me where I want to travel.".to_string(),
        tools: vec![
            ToolCallSpec::new("search_trains").arg("destination", ArgKind::String),
            ToolCallSpec::new("book_train")
                .arg("train_id", ArgKind::String)
                .confirmed(),
            ToolCallSpec::new("generate_invoice"),
        ],
        match_keywords: ["paris", "train", "book"]
            .iter()
            .map(|k| k.to_string())
            .collect(),
    }
}

pub fn search() -> NextAction {
    NextAction::call_tool("search_trains", json!({"destination": "Paris"}))
}

pub fn book() -> NextAction {
    NextAction::call_tool("book_train", json!({"train_id": "T1"}))
}

pub fn invoice() -> NextAction {
    NextAction::call_tool("generate_invoice", json!({}))
}

/// 按顺序返回预置动作；耗尽后请用户补充信息
#[derive(Default)]
pub struct ScriptedPlanner {
    script: Mutex<VecDeque<NextAction>>,
    calls: Mutex<usize>,
}

impl ScriptedPlanner {
    pub fn new(actions: impl IntoIterator<Item = NextAction>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(actions.into_iter().collect()),
            calls: Mutex::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl PlanningCapability for ScriptedPlanner {
    async fn plan(
        &self,
        _goal: &Goal,
        _history: &[Message],
        _remaining: &[ToolCallSpec],
    ) -> Result<NextAction, PlanningError> {
        *self.calls.lock().unwrap() += 1;
        Ok(self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| NextAction::ask("Is there anything else I can help with?")))
    }
}

/// 回显参数的工具目录；可设置某工具总是失败或阻塞到 release
pub struct FakeCatalog {
    calls: Mutex<Vec<(String, Value)>>,
    failures: Mutex<HashMap<String, ToolExecutionError>>,
    blocked: Mutex<HashSet<String>>,
    panics: Mutex<HashSet<String>>,
    gate: Semaphore,
}

impl FakeCatalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            blocked: Mutex::new(HashSet::new()),
            panics: Mutex::new(HashSet::new()),
            gate: Semaphore::new(0),
        })
    }

    pub fn fail_always(&self, tool: &str, error: ToolExecutionError) {
        self.failures.lock().unwrap().insert(tool.to_string(), error);
    }

    /// 模拟工具实现自身的 bug
    pub fn panic_on(&self, tool: &str) {
        self.panics.lock().unwrap().insert(tool.to_string());
    }

    pub fn block(&self, tool: &str) {
        self.blocked.lock().unwrap().insert(tool.to_string());
    }

    pub fn release(&self) {
        self.blocked.lock().unwrap().clear();
        self.gate.add_permits(1024);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn call_count(&self, tool: &str) -> usize {
        self.calls().iter().filter(|name| *name == tool).count()
    }
}

#[async_trait]
impl ToolCatalog for FakeCatalog {
    async fn invoke(&self, tool_name: &str, args: Value) -> Result<Value, ToolExecutionError> {
        self.calls
            .lock()
            .unwrap()
            .push((tool_name.to_string(), args.clone()));
        let panics = self.panics.lock().unwrap().contains(tool_name);
        if panics {
            panic!("bug in {tool_name}");
        }
        let blocked = self.blocked.lock().unwrap().contains(tool_name);
        if blocked {
            let _permit = self.gate.acquire().await;
        }
        if let Some(error) = self.failures.lock().unwrap().get(tool_name) {
            return Err(error.clone());
        }
        Ok(json!({"tool": tool_name, "echo": args}))
    }
}

/// 重试间隔压到毫秒级
pub fn fast_config() -> AppConfig {
    let mut config = AppConfig::default();
    for section in [&mut config.tools, &mut config.planning] {
        section.attempt_timeout_ms = 2_000;
        section.max_attempts = 3;
        section.initial_backoff_ms = 1;
        section.max_backoff_ms = 5;
    }
    config
}

pub fn build_hub(
    planner: Arc<ScriptedPlanner>,
    catalog: Arc<FakeCatalog>,
    journal: Arc<dyn JournalStore>,
) -> OrchestratorHub {
    build_hub_with(fast_config(), planner, catalog, journal)
}

pub fn build_hub_with(
    config: AppConfig,
    planner: Arc<ScriptedPlanner>,
    catalog: Arc<FakeCatalog>,
    journal: Arc<dyn JournalStore>,
) -> OrchestratorHub {
    goal_agent::observability::init_for_tests();
    HubBuilder::new(config)
        .with_goals(vec![train_goal()])
        .with_planner(planner)
        .with_catalog(catalog)
        .with_journal(journal)
        .build()
        .unwrap()
}

/// 带超时地等待，避免挂死测试
pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out waiting for workflow")
}
