//! OrchestratorHub：按工作流 ID 管理实例
//!
//! 对外接口（宿主进程 / HTTP 层调用）：
//! - start / send_prompt（信号即启动）/ start_with_starter_prompt
//! - confirm / end_chat
//! - get_tool_data / get_history（未知 ID 返回空）
//!
//! 实例状态全部在效果日志中，重启 Hub（同一日志存储）即可恢复所有实例。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::core::orchestrator::{spawn, OrchestratorDeps, OrchestratorHandle};
use crate::core::{OrchestratorError, ShutdownManager, ShutdownReason, Signal};
use crate::goals::Goal;
use crate::memory::{Message, ToolInvocationRecord};

/// 开场提示前缀：标记这是系统代发的开场白
pub const STARTER_PROMPT_PREFIX: &str = "### ";

pub struct OrchestratorHub {
    deps: OrchestratorDeps,
    default_goal: Option<Arc<Goal>>,
    instances: RwLock<HashMap<String, OrchestratorHandle>>,
    /// 串行化实例创建（日志加载与 Started 写入），不阻塞查询
    spawning: Mutex<()>,
    shutdown: ShutdownManager,
}

impl OrchestratorHub {
    pub fn new(deps: OrchestratorDeps) -> Self {
        Self {
            deps,
            default_goal: None,
            instances: RwLock::new(HashMap::new()),
            spawning: Mutex::new(()),
            shutdown: ShutdownManager::new(),
        }
    }

    /// 新实例未指定目标时使用的目标（不设置则在首条提示时匹配）
    pub fn with_default_goal(mut self, goal: Option<Arc<Goal>>) -> Self {
        self.default_goal = goal;
        self
    }

    /// Ctrl+C / SIGTERM 时停止所有实例；须在 tokio 运行时内调用
    pub fn install_signal_handlers(&self) {
        self.shutdown.install_signal_handlers();
    }

    /// 获取或创建实例；已存在且仍在运行时 goal_id 被忽略
    pub async fn start(
        &self,
        workflow_id: &str,
        goal_id: Option<&str>,
    ) -> Result<OrchestratorHandle, OrchestratorError> {
        if workflow_id.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "workflow id must not be empty".to_string(),
            ));
        }
        if self.shutdown.is_shutdown() {
            return Err(OrchestratorError::Aborted("hub is shut down".to_string()));
        }

        if let Some(handle) = self.running(workflow_id).await {
            return Ok(handle);
        }
        let goal = match goal_id {
            Some(id) => Some(self.deps.registry.lookup(id)?),
            None => self.default_goal.clone(),
        };

        let _spawning = self.spawning.lock().await;
        // 等锁期间可能已被其他调用创建
        if let Some(handle) = self.running(workflow_id).await {
            return Ok(handle);
        }
        if self.instances.read().await.contains_key(workflow_id) {
            tracing::warn!(workflow_id, "restarting stopped instance from journal");
        }
        let handle = spawn(workflow_id, goal, self.deps.clone(), &self.shutdown.token()).await?;
        self.instances
            .write()
            .await
            .insert(workflow_id.to_string(), handle.clone());
        Ok(handle)
    }

    async fn running(&self, workflow_id: &str) -> Option<OrchestratorHandle> {
        self.handle(workflow_id)
            .await
            .filter(|handle| !handle.is_stopped())
    }

    pub async fn handle(&self, workflow_id: &str) -> Option<OrchestratorHandle> {
        self.instances.read().await.get(workflow_id).cloned()
    }

    /// 信号即启动：实例不存在时先创建
    pub async fn send_prompt(&self, workflow_id: &str, text: &str) -> Result<(), OrchestratorError> {
        if text.trim().is_empty() {
            tracing::warn!(workflow_id, "empty prompt rejected");
            return Err(OrchestratorError::Validation(
                "user_prompt text must not be empty".to_string(),
            ));
        }
        let handle = self.start(workflow_id, None).await?;
        handle.signal(Signal::user_prompt(text))
    }

    /// 以目标的开场提示开启对话
    pub async fn start_with_starter_prompt(
        &self,
        workflow_id: &str,
        goal_id: Option<&str>,
    ) -> Result<OrchestratorHandle, OrchestratorError> {
        let handle = self.start(workflow_id, goal_id).await?;
        let goal = match handle.snapshot().goal_id {
            Some(id) => self.deps.registry.lookup(&id)?,
            None => match goal_id {
                Some(id) => self.deps.registry.lookup(id)?,
                None => self
                    .default_goal
                    .clone()
                    .unwrap_or_else(|| self.deps.registry.first()),
            },
        };
        handle.signal(Signal::user_prompt(format!(
            "{STARTER_PROMPT_PREFIX}{}",
            goal.starter_prompt
        )))?;
        Ok(handle)
    }

    pub async fn confirm(&self, workflow_id: &str) -> Result<(), OrchestratorError> {
        let handle = self
            .handle(workflow_id)
            .await
            .ok_or_else(|| OrchestratorError::NotFound(workflow_id.to_string()))?;
        handle.signal(Signal::Confirm)
    }

    /// 未知 ID 为空操作
    pub async fn end_chat(&self, workflow_id: &str) -> Result<(), OrchestratorError> {
        match self.handle(workflow_id).await {
            Some(handle) => handle.signal(Signal::EndChat),
            None => {
                tracing::debug!(workflow_id, "end_chat for unknown workflow ignored");
                Ok(())
            }
        }
    }

    pub async fn get_tool_data(&self, workflow_id: &str) -> BTreeMap<String, ToolInvocationRecord> {
        self.handle(workflow_id)
            .await
            .map(|h| h.get_tool_data())
            .unwrap_or_default()
    }

    pub async fn get_history(&self, workflow_id: &str) -> Vec<Message> {
        self.handle(workflow_id)
            .await
            .map(|h| h.get_history())
            .unwrap_or_default()
    }

    pub async fn workflow_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.instances.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 停止所有实例；之后可用同一日志存储新建 Hub 恢复
    pub async fn shutdown(&self) {
        self.shutdown.shutdown(ShutdownReason::Requested);
        let mut instances = self.instances.write().await;
        for (_, handle) in instances.drain() {
            handle.shutdown();
        }
    }
}
