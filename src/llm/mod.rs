//! LLM 客户端抽象与测试实现

pub mod mock;
pub mod traits;

pub use mock::ScriptedLlmClient;
pub use traits::{ChatMessage, ChatRole, LlmClient};
