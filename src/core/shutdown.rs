//! 优雅关闭
//!
//! Hub 持有一个 ShutdownManager；所有实例的令牌都挂在它下面。
//! 关闭时实例 actor 退出，在途效果被取消；已写入日志的状态在下次启动时回放恢复。

use tokio_util::sync::CancellationToken;

/// 关闭原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// 宿主主动调用 shutdown
    Requested,
    /// Ctrl+C / SIGTERM
    Signal,
}

/// 关闭信号管理器
#[derive(Debug, Clone, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        if self.token.is_cancelled() {
            return;
        }
        tracing::info!(?reason, "shutting down orchestrator hub");
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)；须在 tokio 运行时内调用
    pub fn install_signal_handlers(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if result.is_ok() {
                        tracing::info!("Received Ctrl+C");
                        manager.shutdown(ShutdownReason::Signal);
                    }
                }
                _ = manager.token.cancelled() => {}
            }
        });

        #[cfg(unix)]
        {
            let manager = self.clone();
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    tokio::select! {
                        _ = sigterm.recv() => {
                            tracing::info!("Received SIGTERM");
                            manager.shutdown(ShutdownReason::Signal);
                        }
                        _ = manager.token.cancelled() => {}
                    }
                }
            });
        }
    }
}
