//! 共享的重试策略
//!
//! 翻译和分析两个客户端使用同一个 `RetryPolicy`。只有临时故障（5xx、超时、
//! 网络错误、服务端限流）会重试；每次尝试都受单次调用超时约束，截止时间之后
//! 不再发起新的尝试。

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};

use crate::config::constants;
use crate::error::ProviderError;

/// 指数退避重试策略
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 总尝试次数（含首次调用）
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            constants::DEFAULT_MAX_ATTEMPTS,
            Duration::from_millis(constants::DEFAULT_BASE_DELAY_MS),
            constants::DEFAULT_BACKOFF_FACTOR,
            Duration::from_millis(constants::DEFAULT_MAX_DELAY_MS),
        )
    }
}

/// 一次带重试的调用结果
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, ProviderError>,
    /// 实际发起的尝试次数
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff_factor,
            max_delay,
        }
    }

    /// 不重试
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, 1.0, Duration::ZERO)
    }

    /// 第 `retry` 次重试前的等待时间，`retry` 从 1 开始
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let millis = self.base_delay.as_millis() as f64 * self.backoff_factor.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// 执行带重试的调用
    ///
    /// `op` 接收当前尝试序号（从 1 开始）。`deadline` 之后不再发起新的尝试。
    pub async fn execute<T, F, Fut>(
        &self,
        label: &str,
        call_timeout: Duration,
        deadline: Option<Instant>,
        mut op: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;

            let result = match timeout(call_timeout, op(attempts)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(call_timeout)),
            };

            let error = match result {
                Ok(value) => {
                    if attempts > 1 {
                        tracing::info!("{} 在第 {} 次尝试后成功", label, attempts);
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        attempts,
                    };
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                tracing::warn!("{} 失败，不可重试: {}", label, error);
                return RetryOutcome {
                    result: Err(error),
                    attempts,
                };
            }

            if attempts >= self.max_attempts {
                tracing::error!("{} 失败，已尝试 {} 次: {}", label, attempts, error);
                return RetryOutcome {
                    result: Err(error),
                    attempts,
                };
            }

            let delay = self.delay_for(attempts);
            if let Some(deadline) = deadline {
                if Instant::now() + delay >= deadline {
                    tracing::warn!("{} 失败，截止时间前无法重试: {}", label, error);
                    return RetryOutcome {
                        result: Err(error),
                        attempts,
                    };
                }
            }

            tracing::warn!(
                "{} 失败，{}ms后重试 (尝试 {}/{}): {}",
                label,
                delay.as_millis(),
                attempts + 1,
                self.max_attempts,
                error
            );
            sleep(delay).await;
        }
    }
}
