//! 目标系统
//!
//! 目标（Goal）是有序的工具计划 + 开场提示 + 匹配关键词，加载后只读。
//!
//! 目录结构：
//! ```text
//! config/goals/
//! └── 01_concert_hotel.toml
//! ```

mod builtin;
mod loader;
mod plan;
mod registry;
mod types;

pub use builtin::{
    builtin_goals, goal_event_flight_invoice, goal_match_train_invoice,
    GOAL_EVENT_FLIGHT_INVOICE, GOAL_MATCH_TRAIN_INVOICE,
};
pub use loader::GoalLoader;
pub use plan::{remaining_specs, resolve_call};
pub use registry::{GoalMatcher, GoalRegistry, KeywordOverlap};
pub use types::{ArgKind, Goal, GoalError, ToolCallSpec};
