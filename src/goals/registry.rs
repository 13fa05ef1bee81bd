//! 目标注册表
//!
//! 进程启动时一次性加载，之后只读；按 id 查找，或按自由文本意图匹配（匹配策略可替换）。

use std::collections::HashMap;
use std::sync::Arc;

use super::types::{Goal, GoalError};

/// 意图匹配策略：对单个目标打分，分数相同时由注册顺序决定（先注册者胜）
pub trait GoalMatcher: Send + Sync {
    fn score(&self, goal: &Goal, intent: &str) -> usize;
}

/// 默认策略：意图文本与 match_keywords 的重合个数
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordOverlap;

impl GoalMatcher for KeywordOverlap {
    fn score(&self, goal: &Goal, intent: &str) -> usize {
        let normalized = intent.to_lowercase();
        let words: Vec<&str> = normalized
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        goal.match_keywords
            .iter()
            .filter(|k| {
                if k.contains(char::is_whitespace) {
                    normalized.contains(k.as_str())
                } else {
                    words.iter().any(|w| w == k)
                }
            })
            .count()
    }
}

/// 目标注册表：保留注册顺序，id -> 下标索引
pub struct GoalRegistry {
    goals: Vec<Arc<Goal>>,
    index: HashMap<String, usize>,
    matcher: Box<dyn GoalMatcher>,
}

impl std::fmt::Debug for GoalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoalRegistry")
            .field("goals", &self.ids())
            .finish()
    }
}

impl GoalRegistry {
    /// 校验并注册所有目标；重复 id 或空注册表均视为加载失败
    pub fn new(goals: Vec<Goal>) -> Result<Self, GoalError> {
        if goals.is_empty() {
            return Err(GoalError::EmptyRegistry);
        }
        let mut registered = Vec::with_capacity(goals.len());
        let mut index = HashMap::new();
        for goal in goals {
            let goal = goal.validated()?;
            if index.contains_key(&goal.id) {
                return Err(GoalError::Invalid {
                    goal: goal.id.clone(),
                    reason: "duplicate goal id".to_string(),
                });
            }
            index.insert(goal.id.clone(), registered.len());
            registered.push(Arc::new(goal));
        }
        Ok(Self {
            goals: registered,
            index,
            matcher: Box::new(KeywordOverlap),
        })
    }

    /// 替换匹配策略
    pub fn with_matcher(mut self, matcher: impl GoalMatcher + 'static) -> Self {
        self.matcher = Box::new(matcher);
        self
    }

    pub fn lookup(&self, id: &str) -> Result<Arc<Goal>, GoalError> {
        self.index
            .get(id)
            .map(|&i| Arc::clone(&self.goals[i]))
            .ok_or_else(|| GoalError::NotFound(id.to_string()))
    }

    /// 确定性匹配：最高分胜出，同分取注册顺序靠前者
    pub fn match_intent(&self, intent: &str) -> Arc<Goal> {
        let mut best = 0;
        let mut best_score = 0;
        for (i, goal) in self.goals.iter().enumerate() {
            let score = self.matcher.score(goal, intent);
            if score > best_score {
                best = i;
                best_score = score;
            }
        }
        tracing::debug!(goal = %self.goals[best].id, score = best_score, "goal matched");
        Arc::clone(&self.goals[best])
    }

    pub fn ids(&self) -> Vec<&str> {
        self.goals.iter().map(|g| g.id.as_str()).collect()
    }

    pub fn first(&self) -> Arc<Goal> {
        Arc::clone(&self.goals[0])
    }

    pub fn len(&self) -> usize {
        self.goals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }
}
