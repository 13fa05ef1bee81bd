//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `AGENT__*` 覆盖（双下划线表示嵌套，如
//! `AGENT__TOOLS__MAX_ATTEMPTS=5`）。部署环境沿用的 `WORKFLOW_ID`、`AGENT_GOAL`
//! 最后覆盖 `agent.workflow_id` 与 `agent.goal`。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::{RetryPolicy, DEFAULT_MAX_PLANNING_STEPS};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub tools: RetrySection,
    pub planning: RetrySection,
    pub journal: JournalSection,
}

/// [agent] 段：默认工作流、默认目标、目标目录、单回合规划步数上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub workflow_id: String,
    /// 启动时固定的目标；未设置则按首条提示匹配
    pub goal: Option<String>,
    /// 额外的目标定义目录（*.toml）
    pub goals_dir: Option<PathBuf>,
    pub max_planning_steps: usize,
    /// 规划器系统提示词文件
    pub system_prompt: Option<PathBuf>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            workflow_id: "agent-workflow".to_string(),
            goal: None,
            goals_dir: None,
            max_planning_steps: DEFAULT_MAX_PLANNING_STEPS,
            system_prompt: None,
        }
    }
}

/// [tools] / [planning] 段：外部调用的超时与重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub attempt_timeout_ms: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: 30_000,
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
        }
    }
}

impl RetrySection {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

/// [journal] 段：未设置 dir 时使用内存日志（进程退出即丢失）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct JournalSection {
    pub dir: Option<PathBuf>,
}

/// 从 config 目录加载配置，环境变量可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 叠加环境变量 AGENT__*（双下划线表示嵌套键）
/// 4. WORKFLOW_ID / AGENT_GOAL 覆盖对应键
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder
        .add_source(
            config::Environment::with_prefix("AGENT")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .set_override_option("agent.workflow_id", std::env::var("WORKFLOW_ID").ok())?
        .set_override_option("agent.goal", std::env::var("AGENT_GOAL").ok())?;

    builder.build()?.try_deserialize()
}
