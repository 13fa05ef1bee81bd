//! 实例监管：生命周期、中断管理
//!
//! 每个工作流实例持有两级 CancellationToken：
//! - shutdown：Hub 关闭时取消，actor 退出
//! - chat：end_chat 时取消，正在执行的效果协作式停止（结果到达后也会被忽略）

use tokio_util::sync::CancellationToken;

/// 实例级取消令牌
#[derive(Debug, Clone)]
pub struct SessionSupervisor {
    shutdown: CancellationToken,
    chat: CancellationToken,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::child_of(&CancellationToken::new())
    }

    /// 挂在 Hub 的关闭令牌下
    pub fn child_of(parent: &CancellationToken) -> Self {
        let shutdown = parent.child_token();
        let chat = shutdown.child_token();
        Self { shutdown, chat }
    }

    /// 单个效果使用的令牌
    pub fn effect_token(&self) -> CancellationToken {
        self.chat.child_token()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// 对话结束：取消在途效果
    pub fn end_chat(&self) {
        self.chat.cancel();
    }

    /// 停止实例
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
