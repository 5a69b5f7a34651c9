//! 章节内容获取 - 业务能力层
//!
//! 对单个章节执行"尝试 → 分类 → 退避"的小状态机：
//!
//! - 正文为空：下一次尝试使用更长的渲染等待（0s → 8s → 15s）
//! - 限流：指数退避 `30s * 2^(n-1)`，用尽后返回 `FetchError::RateLimited`
//! - 连接错误：线性退避 `n * 2s`，用尽后按软失败处理
//! - 其他错误：立即放弃本章

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::services::chapter_source::{ChapterSource, PageOutcome};

/// 重试策略
#[derive(Debug, Clone, PartialEq)]
pub struct FetchPolicy {
    /// 每章最多尝试次数
    pub max_attempts: u32,
    /// 限流退避的基数
    pub rate_limit_base: Duration,
    /// 连接错误退避的步长
    pub connection_step: Duration,
    /// 连续拿到空正文时逐级加长的渲染等待
    pub settle_delays: Vec<Duration>,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            rate_limit_base: Duration::from_secs(30),
            connection_step: Duration::from_secs(2),
            settle_delays: vec![
                Duration::ZERO,
                Duration::from_secs(8),
                Duration::from_secs(15),
            ],
        }
    }
}

impl FetchPolicy {
    /// 第 `attempt` 次（从 1 开始）被限流后的等待时间
    pub fn rate_limit_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.rate_limit_base.saturating_mul(1u32 << exponent)
    }

    /// 第 `attempt` 次（从 1 开始）连接失败后的等待时间
    pub fn connection_backoff(&self, attempt: u32) -> Duration {
        self.connection_step.saturating_mul(attempt.max(1))
    }

    /// 已经拿到 `empty_results` 次空正文时的渲染等待
    pub fn settle_delay(&self, empty_results: usize) -> Duration {
        self.settle_delays
            .get(empty_results)
            .or_else(|| self.settle_delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

/// 章节内容获取器
pub struct ContentFetcher<S> {
    source: S,
    policy: FetchPolicy,
}

enum LastFailure {
    Empty,
    Connection(String),
}

impl<S: ChapterSource> ContentFetcher<S> {
    pub fn new(source: S, policy: FetchPolicy) -> Self {
        Self { source, policy }
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// 获取一个章节的正文
    ///
    /// 只要有一次尝试被限流且最终没有成功，就返回 `RateLimited`，
    /// 让编排层把这一章放进延后重试列表
    pub async fn fetch(&self, locator: &str) -> Result<String, FetchError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut empty_results = 0usize;
        let mut rate_limited = false;
        let mut last_failure = LastFailure::Empty;

        for attempt in 1..=max_attempts {
            let settle = self.policy.settle_delay(empty_results);
            let has_next = attempt < max_attempts;

            match self.source.load(locator, settle).await {
                PageOutcome::Loaded(Some(content)) if !content.trim().is_empty() => {
                    debug!("正文获取成功 (尝试 {}/{})", attempt, max_attempts);
                    return Ok(content);
                }
                PageOutcome::Loaded(_) => {
                    empty_results += 1;
                    last_failure = LastFailure::Empty;
                    warn!(
                        "⚠️ 正文为空 (尝试 {}/{}), 下次等待渲染 {} 秒",
                        attempt,
                        max_attempts,
                        self.policy.settle_delay(empty_results).as_secs()
                    );
                }
                PageOutcome::RateLimited => {
                    rate_limited = true;
                    if has_next {
                        let delay = self.policy.rate_limit_backoff(attempt);
                        warn!(
                            "🚦 请求被限流 (尝试 {}/{}), 等待 {} 秒后重试...",
                            attempt,
                            max_attempts,
                            delay.as_secs()
                        );
                        sleep(delay).await;
                    } else {
                        warn!("🚦 请求被限流 (尝试 {}/{}), 已用尽重试次数", attempt, max_attempts);
                    }
                }
                PageOutcome::ConnectionFailed(reason) => {
                    if has_next {
                        let delay = self.policy.connection_backoff(attempt);
                        warn!(
                            "🔌 连接错误 (尝试 {}/{}): {}, 等待 {} 秒后重试...",
                            attempt,
                            max_attempts,
                            reason,
                            delay.as_secs()
                        );
                        sleep(delay).await;
                    } else {
                        warn!("🔌 连接错误 (尝试 {}/{}): {}", attempt, max_attempts, reason);
                    }
                    last_failure = LastFailure::Connection(reason);
                }
                PageOutcome::HttpStatus(status) => {
                    return Err(FetchError::Fatal {
                        reason: format!("页面加载错误，状态码: {}", status),
                    });
                }
                PageOutcome::Fatal(reason) => return Err(FetchError::Fatal { reason }),
            }
        }

        if rate_limited {
            return Err(FetchError::RateLimited {
                attempts: max_attempts,
            });
        }
        Err(match last_failure {
            LastFailure::Empty => FetchError::EmptyContent {
                attempts: max_attempts,
            },
            LastFailure::Connection(reason) => FetchError::Connection {
                attempts: max_attempts,
                reason,
            },
        })
    }
}
