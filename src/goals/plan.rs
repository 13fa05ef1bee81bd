//! 计划解释辅助：剩余步骤计算、规划结果校验

use serde_json::Value;

use super::types::{Goal, ToolCallSpec};
use crate::core::PlanningError;
use crate::memory::{ToolCallStatus, ToolInvocationRecord};

/// 本轮计划中尚未成功执行的步骤（保持计划顺序）
pub fn remaining_specs(goal: &Goal, cycle_records: &[ToolInvocationRecord]) -> Vec<ToolCallSpec> {
    goal.tools
        .iter()
        .filter(|spec| {
            !cycle_records
                .iter()
                .any(|r| r.tool_name == spec.tool_name && r.status == ToolCallStatus::Executed)
        })
        .cloned()
        .collect()
}

/// 将规划器选择的工具解析为计划中的步骤，并校验参数
pub fn resolve_call<'g>(
    goal: &'g Goal,
    tool_name: &str,
    args: &Value,
) -> Result<&'g ToolCallSpec, PlanningError> {
    let spec = goal.spec(tool_name).ok_or_else(|| {
        PlanningError::new(format!(
            "tool '{}' is not part of goal '{}'",
            tool_name, goal.id
        ))
    })?;
    spec.check_args(args).map_err(PlanningError::new)?;
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goals::goal_event_flight_invoice;
    use chrono::Utc;
    use serde_json::json;

    fn record(tool: &str, status: ToolCallStatus) -> ToolInvocationRecord {
        ToolInvocationRecord {
            tool_name: tool.to_string(),
            arguments: json!({}),
            result: None,
            status,
            needs_confirmation: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_remaining_skips_executed_only() {
        let goal = goal_event_flight_invoice();
        let records = vec![
            record("find_events", ToolCallStatus::Executed),
            record("search_flights", ToolCallStatus::Failed),
        ];
        let names: Vec<String> = remaining_specs(&goal, &records)
            .into_iter()
            .map(|s| s.tool_name)
            .collect();
        assert_eq!(names, vec!["search_flights", "create_invoice"]);
    }

    #[test]
    fn test_resolve_call_rejects_unknown_tool_and_bad_args() {
        let goal = goal_event_flight_invoice();
        assert!(resolve_call(&goal, "book_hotel", &json!({})).is_err());
        assert!(resolve_call(&goal, "find_events", &json!({"city": "Paris"})).is_err());
        let spec = resolve_call(&goal, "find_events", &json!({"city": "Paris", "month": "May"}))
            .unwrap();
        assert!(!spec.needs_confirmation);
    }
}
