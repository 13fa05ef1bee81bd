//! 目标定义：Goal / ToolCallSpec / ArgKind
//!
//! Goal 加载后不可变；参数类型是封闭枚举，加载时即完成校验。

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// 目标注册表相关错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GoalError {
    #[error("Goal not found: {0}")]
    NotFound(String),

    #[error("Goal registry is empty")]
    EmptyRegistry,

    #[error("Invalid goal '{goal}': {reason}")]
    Invalid { goal: String, reason: String },

    #[error("Failed to load goal file {path}: {reason}")]
    Load { path: String, reason: String },
}

/// 工具参数类型（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgKind {
    String,
    Number,
    Integer,
    Boolean,
    /// ISO-8601 日期字符串（YYYY-MM-DD）
    Date,
    Object,
}

impl ArgKind {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ArgKind::String => value.is_string(),
            ArgKind::Number => value.is_number(),
            ArgKind::Integer => value.is_i64() || value.is_u64(),
            ArgKind::Boolean => value.is_boolean(),
            ArgKind::Date => value
                .as_str()
                .map(|s| chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok())
                .unwrap_or(false),
            ArgKind::Object => value.is_object() || value.is_array(),
        }
    }
}

/// 计划中的一步：调用哪个工具、必填参数、是否需要用户确认
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallSpec {
    pub tool_name: String,
    #[serde(default)]
    pub required_args: BTreeMap<String, ArgKind>,
    #[serde(default)]
    pub needs_confirmation: bool,
}

impl ToolCallSpec {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            required_args: BTreeMap::new(),
            needs_confirmation: false,
        }
    }

    pub fn arg(mut self, name: impl Into<String>, kind: ArgKind) -> Self {
        self.required_args.insert(name.into(), kind);
        self
    }

    pub fn confirmed(mut self) -> Self {
        self.needs_confirmation = true;
        self
    }

    /// 校验规划器给出的参数：必须是对象，必填参数齐全且类型匹配
    pub fn check_args(&self, args: &Value) -> Result<(), String> {
        let obj = args
            .as_object()
            .ok_or_else(|| format!("arguments for '{}' must be an object", self.tool_name))?;
        for (name, kind) in &self.required_args {
            match obj.get(name) {
                None | Some(Value::Null) => {
                    return Err(format!(
                        "missing required argument '{}' for '{}'",
                        name, self.tool_name
                    ))
                }
                Some(v) if !kind.accepts(v) => {
                    return Err(format!(
                        "argument '{}' for '{}' is not a valid {:?}",
                        name, self.tool_name, kind
                    ))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// 目标：有序工具计划 + 开场提示 + 匹配关键词
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub starter_prompt: String,
    #[serde(rename = "ordered_tool_plan", alias = "tools", default)]
    pub tools: Vec<ToolCallSpec>,
    #[serde(default)]
    pub match_keywords: BTreeSet<String>,
}

impl Goal {
    pub fn spec(&self, tool_name: &str) -> Option<&ToolCallSpec> {
        self.tools.iter().find(|s| s.tool_name == tool_name)
    }

    /// 加载时校验并规范化（关键词转小写、去空白）
    pub fn validated(mut self) -> Result<Self, GoalError> {
        let invalid = |reason: &str| GoalError::Invalid {
            goal: self.id.clone(),
            reason: reason.to_string(),
        };
        if self.id.trim().is_empty() {
            return Err(invalid("id must not be empty"));
        }
        if self.starter_prompt.trim().is_empty() {
            return Err(invalid("starter_prompt must not be empty"));
        }
        let mut seen = HashSet::new();
        for spec in &self.tools {
            if spec.tool_name.trim().is_empty() {
                return Err(invalid("tool_name must not be empty"));
            }
            if !seen.insert(spec.tool_name.as_str()) {
                return Err(invalid(&format!("duplicate tool '{}'", spec.tool_name)));
            }
        }
        self.match_keywords = self
            .match_keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn goal() -> Goal {
        Goal {
            id: "g".into(),
            description: String::new(),
            starter_prompt: "hello".into(),
            tools: vec![ToolCallSpec::new("search_trains").arg("destination", ArgKind::String)],
            match_keywords: ["  Train ".to_string(), "".to_string()].into_iter().collect(),
        }
    }

    #[test]
    fn test_validated_normalizes_keywords() {
        let g = goal().validated().unwrap();
        assert_eq!(g.match_keywords.len(), 1);
        assert!(g.match_keywords.contains("train"));
    }

    #[test]
    fn test_duplicate_tool_rejected() {
        let mut g = goal();
        g.tools.push(ToolCallSpec::new("search_trains"));
        assert!(matches!(g.validated(), Err(GoalError::Invalid { .. })));
    }

    #[test]
    fn test_check_args() {
        let spec = ToolCallSpec::new("book")
            .arg("when", ArgKind::Date)
            .arg("seats", ArgKind::Integer);
        assert!(spec.check_args(&json!({"when": "2025-03-01", "seats": 2})).is_ok());
        assert!(spec.check_args(&json!({"when": "tomorrow", "seats": 2})).is_err());
        assert!(spec.check_args(&json!({"when": "2025-03-01"})).is_err());
        assert!(spec.check_args(&json!("not an object")).is_err());
    }
}
