//! 状态与持久化
//!
//! - **conversation**: 消息日志与工具调用记录（会话状态管理器）
//! - **journal**: 仅追加的效果日志，用于重启后确定性回放

pub mod conversation;
pub mod journal;

pub use conversation::{ConversationState, Message, Role, ToolCallStatus, ToolInvocationRecord};
pub use journal::{FileJournal, JournalEntry, JournalEvent, JournalStore, MemoryJournal};
