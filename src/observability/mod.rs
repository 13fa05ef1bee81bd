//! 可观测性：tracing 订阅器初始化
//!
//! 默认级别 info，可通过 RUST_LOG 覆盖（如 `RUST_LOG=goal_agent=debug`）。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// 安装全局订阅器；重复调用时忽略
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(filter("info"))
        .with(fmt::layer())
        .try_init();
}

/// 测试用：输出交给 libtest 捕获
pub fn init_for_tests() {
    let _ = tracing_subscriber::registry()
        .with(filter("debug"))
        .with(fmt::layer().with_test_writer())
        .try_init();
}
