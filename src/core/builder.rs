//! Hub 构建器：统一的初始化逻辑
//!
//! 从 AppConfig 组装目标注册表（内置目标 + goals_dir）、效果日志、规划器与工具执行器，
//! 宿主只需提供 PlanningCapability（或 LlmClient）与 ToolCatalog。

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::{EffectRunner, OrchestratorDeps, OrchestratorError, OrchestratorHub};
use crate::goals::{
    builtin_goals, Goal, GoalError, GoalLoader, GoalRegistry, GOAL_EVENT_FLIGHT_INVOICE,
};
use crate::llm::LlmClient;
use crate::memory::{FileJournal, JournalStore, MemoryJournal};
use crate::planning::{LlmPlanner, PlanningCapability};
use crate::tools::{ToolCatalog, ToolExecutor};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful booking assistant. \
Work through the goal's tool plan one step at a time and reply with a single JSON object.";

pub struct HubBuilder {
    config: AppConfig,
    planner: Option<Arc<dyn PlanningCapability>>,
    catalog: Option<Arc<dyn ToolCatalog>>,
    journal: Option<Arc<dyn JournalStore>>,
    goals: Vec<Goal>,
}

impl HubBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            planner: None,
            catalog: None,
            journal: None,
            goals: Vec::new(),
        }
    }

    pub fn with_planner(mut self, planner: Arc<dyn PlanningCapability>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// 使用 LLM 规划器；系统提示词取自配置文件，否则用内置提示
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        let system_prompt = self.system_prompt();
        self.planner = Some(Arc::new(LlmPlanner::new(llm, system_prompt)));
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn ToolCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// 覆盖配置中的日志存储
    pub fn with_journal(mut self, journal: Arc<dyn JournalStore>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// 追加目标（同 ID 覆盖内置目标）
    pub fn with_goals(mut self, goals: impl IntoIterator<Item = Goal>) -> Self {
        self.goals.extend(goals);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 内置目标 → goals_dir → 代码追加的目标，后者按 ID 覆盖前者
    pub fn build_registry(&self) -> Result<GoalRegistry, GoalError> {
        let mut goals = builtin_goals();
        if let Some(dir) = &self.config.agent.goals_dir {
            let loaded = GoalLoader::new(dir).load_all()?;
            tracing::info!(dir = %dir.display(), count = loaded.len(), "loaded goal definitions");
            merge_goals(&mut goals, loaded);
        }
        merge_goals(&mut goals, self.goals.clone());
        GoalRegistry::new(goals)
    }

    /// 配置的默认目标；未知 ID 时告警并回退到活动+航班目标（未注册时取第一个目标）
    pub fn default_goal(&self, registry: &GoalRegistry) -> Option<Arc<Goal>> {
        let id = self.config.agent.goal.as_deref()?;
        match registry.lookup(id) {
            Ok(goal) => Some(goal),
            Err(e) => {
                let fallback = registry
                    .lookup(GOAL_EVENT_FLIGHT_INVOICE)
                    .unwrap_or_else(|_| registry.first());
                tracing::warn!(error = %e, fallback = %fallback.id, "configured goal unknown, using fallback");
                Some(fallback)
            }
        }
    }

    pub fn build_journal(&self) -> Arc<dyn JournalStore> {
        if let Some(journal) = &self.journal {
            return journal.clone();
        }
        match &self.config.journal.dir {
            Some(dir) => {
                tracing::info!(dir = %dir.display(), "using file journal");
                Arc::new(FileJournal::new(dir))
            }
            None => {
                tracing::warn!("no journal dir configured, workflow state will not survive restarts");
                Arc::new(MemoryJournal::new())
            }
        }
    }

    pub fn build(self) -> Result<OrchestratorHub, OrchestratorError> {
        let planner = self
            .planner
            .clone()
            .ok_or_else(|| OrchestratorError::Validation("no planner configured".to_string()))?;
        let catalog = self
            .catalog
            .clone()
            .ok_or_else(|| OrchestratorError::Validation("no tool catalog configured".to_string()))?;

        let registry = Arc::new(self.build_registry()?);
        let default_goal = self.default_goal(&registry);
        let runner = EffectRunner::new(
            planner,
            ToolExecutor::new(catalog, self.config.tools.policy()),
            self.config.planning.policy(),
        );
        let deps = OrchestratorDeps::new(registry, Arc::new(runner), self.build_journal())
            .with_max_planning_steps(self.config.agent.max_planning_steps);
        Ok(OrchestratorHub::new(deps).with_default_goal(default_goal))
    }

    fn system_prompt(&self) -> String {
        let candidates: Vec<PathBuf> = match &self.config.agent.system_prompt {
            Some(path) => vec![path.clone()],
            None => vec![
                PathBuf::from("config/prompts/planner.md"),
                PathBuf::from("../config/prompts/planner.md"),
            ],
        };
        candidates
            .into_iter()
            .find_map(|p| std::fs::read_to_string(p).ok())
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
    }
}

fn merge_goals(goals: &mut Vec<Goal>, extra: Vec<Goal>) {
    for goal in extra {
        match goals.iter_mut().find(|g| g.id == goal.id) {
            Some(existing) => *existing = goal,
            None => goals.push(goal),
        }
    }
}
