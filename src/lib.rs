//! goal-agent - 目标驱动的对话智能体编排器
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 状态机、效果执行、实例 actor、Hub、重试与恢复
//! - **goals**: 目标定义、注册表、加载与匹配
//! - **llm**: LLM 客户端抽象与脚本化实现
//! - **memory**: 会话状态（消息日志、工具调用记录）与效果日志
//! - **observability**: tracing 初始化
//! - **planning**: 规划能力 trait 与 LLM 规划器
//! - **tools**: 工具目录、注册表与带重试的执行器

pub mod config;
pub mod core;
pub mod goals;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod planning;
pub mod tools;

pub use crate::core::{HubBuilder, OrchestratorHandle, OrchestratorHub, Phase, Signal};
