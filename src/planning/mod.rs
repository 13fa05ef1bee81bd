//! 规划：规划能力 trait 与基于 LLM 的实现

pub mod llm_planner;
pub mod planner;

pub use llm_planner::{parse_next_action, LlmPlanner};
pub use planner::{NextAction, PlanRequest, PlanningCapability};
