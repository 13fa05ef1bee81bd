//! 效果重试策略
//!
//! 每次尝试有独立超时；仅可重试错误会重试，间隔按指数退避并叠加抖动；
//! 取消令牌触发后不再发起新的尝试（进行中的尝试不会被强行中断）。

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// 重试策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次），至少为 1
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(30),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// 重试耗尽（或遇到不可重试错误、被取消）时的最后一次错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure<E> {
    pub error: E,
    pub attempts: u32,
    /// 最后一次错误本身是否可重试（true 表示因预算耗尽或取消而停止）
    pub retryable: bool,
}

impl RetryPolicy {
    /// 第 `failures` 次失败后的等待时间：initial * 2^(failures-1)，封顶后再加至多一半的抖动
    pub fn backoff(&self, failures: u32) -> Duration {
        let base_ms = self.initial_backoff.as_millis();
        if base_ms == 0 {
            return Duration::ZERO;
        }
        let max_ms = self.max_backoff.as_millis().max(base_ms);
        let shift = failures.saturating_sub(1).min(20);
        let backoff_ms = base_ms.saturating_mul(1u128 << shift).min(max_ms);
        let backoff = Duration::from_millis(u64::try_from(backoff_ms).unwrap_or(u64::MAX));
        backoff + jitter(backoff / 2)
    }

    /// 按策略执行 `op`；超时由 `on_timeout` 生成对应错误
    pub async fn run<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
        retryable: impl Fn(&E) -> bool,
        on_timeout: impl Fn(Duration) -> E,
    ) -> Result<T, RetryFailure<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let error = match timeout(self.attempt_timeout, op(attempt)).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => on_timeout(self.attempt_timeout),
            };

            let can_retry = retryable(&error);
            if !can_retry || attempt >= max_attempts || cancel.is_cancelled() {
                return Err(RetryFailure {
                    error,
                    attempts: attempt,
                    retryable: can_retry,
                });
            }

            let delay = self.backoff(attempt);
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying after error");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return Err(RetryFailure { error, attempts: attempt, retryable: can_retry });
                }
            }
            attempt += 1;
        }
    }
}

fn jitter(ceiling: Duration) -> Duration {
    let ceiling_ms = ceiling.as_millis() as u64;
    if ceiling_ms == 0 {
        return Duration::ZERO;
    }
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|value| value.as_nanos() as u64)
        .unwrap_or(0);
    Duration::from_millis(seed % (ceiling_ms + 1))
}
