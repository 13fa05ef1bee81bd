//! 目标加载器
//!
//! 从目录读取 `*.toml` 目标定义；按文件名排序，排序即注册顺序。
//!
//! ```toml
//! [goal]
//! id = "goal_match_train_invoice"
//! starter_prompt = "..."
//! match_keywords = ["train", "match"]
//!
//! [[goal.tools]]
//! tool_name = "search_trains"
//! required_args = { origin = "string", destination = "string" }
//!
//! [[goal.tools]]
//! tool_name = "book_trains"
//! needs_confirmation = true
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::types::{Goal, GoalError};

#[derive(Debug, Deserialize)]
struct GoalToml {
    goal: Goal,
}

/// 目标加载器
pub struct GoalLoader {
    goals_dir: PathBuf,
}

impl GoalLoader {
    pub fn new(goals_dir: impl AsRef<Path>) -> Self {
        Self {
            goals_dir: goals_dir.as_ref().to_path_buf(),
        }
    }

    /// 加载目录下全部目标；目录不存在时返回空列表
    pub fn load_all(&self) -> Result<Vec<Goal>, GoalError> {
        if !self.goals_dir.exists() {
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&self.goals_dir).map_err(|e| GoalError::Load {
            path: self.goals_dir.display().to_string(),
            reason: e.to_string(),
        })?;
        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().map(|x| x == "toml").unwrap_or(false))
            .collect();
        files.sort();

        let goals = files
            .iter()
            .map(|path| Self::load_file(path))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::info!(dir = %self.goals_dir.display(), "Loaded {} goals", goals.len());
        Ok(goals)
    }

    pub fn load_file(path: &Path) -> Result<Goal, GoalError> {
        let load_err = |reason: String| GoalError::Load {
            path: path.display().to_string(),
            reason,
        };
        let content = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
        let parsed: GoalToml = toml::from_str(&content).map_err(|e| load_err(e.to_string()))?;
        parsed.goal.validated()
    }
}
