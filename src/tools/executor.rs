//! 工具执行器
//!
//! 持有 ToolCatalog 与重试策略：每次尝试单独超时，transient 错误按退避重试，
//! 预算耗尽后降级为 permanent；每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::{RetryFailure, RetryPolicy, ToolErrorKind, ToolExecutionError};
use crate::tools::ToolCatalog;

/// 工具执行器：对每次调用施加超时与重试
pub struct ToolExecutor {
    catalog: Arc<dyn ToolCatalog>,
    policy: RetryPolicy,
}

impl ToolExecutor {
    pub fn new(catalog: Arc<dyn ToolCatalog>, policy: RetryPolicy) -> Self {
        Self { catalog, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 执行工具；失败时返回的错误一定是 permanent（transient 耗尽后降级）
    pub async fn execute(
        &self,
        tool_name: &str,
        args: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value, RetryFailure<ToolExecutionError>> {
        let start = Instant::now();
        let catalog = &self.catalog;
        let result = self
            .policy
            .run(
                cancel,
                move |attempt| {
                    tracing::debug!(tool = tool_name, attempt, "invoking tool");
                    catalog.invoke(tool_name, args.clone())
                },
                ToolExecutionError::is_transient,
                |limit| {
                    ToolExecutionError::transient(format!(
                        "attempt timed out after {}ms",
                        limit.as_millis()
                    ))
                },
            )
            .await;

        let (ok, outcome, attempts) = match &result {
            Ok(_) => (true, "ok", None),
            Err(f) if f.retryable => (false, "exhausted", Some(f.attempts)),
            Err(f) => (false, "error", Some(f.attempts)),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "attempts": attempts,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(args),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result.map_err(|mut failure| {
            if failure.error.kind == ToolErrorKind::Transient {
                failure.error = ToolExecutionError::permanent(format!(
                    "{} (gave up after {} attempts)",
                    failure.error.message, failure.attempts
                ));
            }
            failure
        })
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Flaky {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ToolCatalog for Flaky {
        async fn invoke(&self, _tool: &str, args: Value) -> Result<Value, ToolExecutionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures_before_success {
                Err(ToolExecutionError::transient("503 from upstream"))
            } else {
                Ok(args)
            }
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            attempt_timeout: Duration::from_millis(200),
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let catalog = Arc::new(Flaky {
            failures_before_success: 2,
            calls: AtomicU32::new(0),
        });
        let executor = ToolExecutor::new(catalog.clone(), policy(3));
        let out = executor
            .execute("search_trains", &json!({"to": "Paris"}), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, json!({"to": "Paris"}));
        assert_eq!(catalog.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_transient_downgraded_to_permanent() {
        let catalog = Arc::new(Flaky {
            failures_before_success: 10,
            calls: AtomicU32::new(0),
        });
        let executor = ToolExecutor::new(catalog.clone(), policy(3));
        let failure = executor
            .execute("book_train", &json!({}), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert!(failure.retryable);
        assert_eq!(failure.error.kind, ToolErrorKind::Permanent);
        assert!(failure.error.message.contains("gave up after 3 attempts"));
        assert_eq!(catalog.calls.load(Ordering::SeqCst), 3);
    }
}
