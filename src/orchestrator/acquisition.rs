//! 章节获取编排 - 编排层
//!
//! ## 职责
//!
//! 驱动 `ContentFetcher` 依次获取一批章节，读写进度文件，并按失败类型分别处理。
//!
//! ## 流程
//!
//! 1. 读取会话进度，跳过已完成的章节
//! 2. 主循环：按 id 升序逐章获取
//!    - 成功：加入内容列表，第 1 章和之后每 5 章保存一次进度
//!    - 限流：放入延后列表，立即保存进度，冷却 5 秒；连续多章限流时提前结束主循环
//!    - 其他失败：计数并保存进度
//! 3. 延后列表非空时，冷却 10 秒后每章再试一次
//! 4. 最后保存一次进度并返回统计
//!
//! 本模块从不删除进度文件，是否删除由调用方根据 `AcquisitionReport::is_complete` 决定。

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::ProgressError;
use crate::models::{ProgressRecord, UnitContent, UnitRef};
use crate::services::chapter_source::ChapterSource;
use crate::services::content_fetcher::ContentFetcher;
use crate::services::progress_store::ProgressStore;
use crate::utils::logging::truncate_text;
use crate::workflow::SessionContext;

/// 错误压力下章节间隔的最大倍数
const MAX_PACING_MULTIPLIER: u32 = 4;

/// 获取节奏与进度保存设置
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionSettings {
    /// 章节之间的基础间隔
    pub request_delay: Duration,
    /// 间隔的随机抖动上限
    pub request_jitter: Duration,
    /// 单章被限流后的冷却
    pub rate_limit_cooldown: Duration,
    /// 开始延后重试前的冷却
    pub deferred_cooldown: Duration,
    /// 每成功多少章保存一次
    pub save_every: usize,
    /// 连续多少章限流后提前结束主循环
    pub max_consecutive_rate_limits: usize,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            request_delay: Duration::from_millis(2000),
            request_jitter: Duration::from_millis(1000),
            rate_limit_cooldown: Duration::from_secs(5),
            deferred_cooldown: Duration::from_secs(10),
            save_every: 5,
            max_consecutive_rate_limits: 3,
        }
    }
}

impl AcquisitionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            request_delay: Duration::from_millis(config.request_delay_ms),
            request_jitter: Duration::from_millis(config.request_jitter_ms),
            rate_limit_cooldown: Duration::from_secs(config.rate_limit_cooldown_secs),
            deferred_cooldown: Duration::from_secs(config.deferred_cooldown_secs),
            save_every: config.save_every.max(1),
            max_consecutive_rate_limits: config.max_consecutive_rate_limits.max(1),
        }
    }

    /// 章节之间的等待：基础间隔加随机抖动，连续出错时按倍数放大
    pub fn pacing_delay(&self, error_streak: u32) -> Duration {
        let jitter_ms = self.request_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        let multiplier = 1 + error_streak.min(MAX_PACING_MULTIPLIER - 1);
        (self.request_delay + jitter).saturating_mul(multiplier)
    }
}

/// 一次获取的结果
#[derive(Debug, Clone, Default)]
pub struct AcquisitionReport {
    /// 已获取的内容（只含本次请求的章节，按 id 升序）
    pub content: Vec<UnitContent>,
    /// 请求的章节数
    pub total: usize,
    /// 本次运行新获取的章节数
    pub loaded: usize,
    /// 从进度文件恢复的章节数
    pub resumed: usize,
    /// 延后重试后仍被限流的章节数
    pub rate_limited: usize,
    /// 非限流的失败次数
    pub errors: usize,
    /// 仍未获取的章节 id
    pub unresolved: Vec<usize>,
    /// 是否因为连续限流提前结束了主循环
    pub stopped_early: bool,
}

impl AcquisitionReport {
    pub fn acquired(&self) -> usize {
        self.content.len()
    }

    /// 请求的每一章都已获取
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty() && self.content.len() == self.total
    }
}

/// 主循环中单章的处理结果
enum Step {
    Loaded,
    RateLimited,
    Failed,
}

/// 一次运行中可变的状态，只在 `acquire` 内部存在
struct RunState<'a> {
    ctx: &'a SessionContext,
    full_unit_list: Option<&'a [UnitRef]>,
    content: Vec<UnitContent>,
    successes: usize,
    errors: usize,
    error_streak: u32,
}

impl RunState<'_> {
    fn record(&self) -> ProgressRecord<'_> {
        ProgressRecord::new(
            &self.content,
            Some(self.ctx.document_url.as_str()),
            self.full_unit_list,
        )
    }
}

/// 章节获取编排器
pub struct AcquisitionOrchestrator<S> {
    fetcher: ContentFetcher<S>,
    store: ProgressStore,
    settings: AcquisitionSettings,
}

impl<S: ChapterSource> AcquisitionOrchestrator<S> {
    pub fn new(fetcher: ContentFetcher<S>, store: ProgressStore, settings: AcquisitionSettings) -> Self {
        Self {
            fetcher,
            store,
            settings,
        }
    }

    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    /// 获取一批章节
    ///
    /// 单章失败不会中断本批；只有进度文件读写失败会返回错误
    pub async fn acquire(
        &self,
        ctx: &SessionContext,
        units: &[UnitRef],
        full_unit_list: Option<&[UnitRef]>,
    ) -> Result<AcquisitionReport, ProgressError> {
        let mut state = RunState {
            ctx,
            full_unit_list,
            content: self.restore(ctx, units).await?,
            successes: 0,
            errors: 0,
            error_streak: 0,
        };

        let completed: BTreeSet<usize> = state.content.iter().map(|c| c.id).collect();
        let mut remaining: Vec<&UnitRef> = units.iter().filter(|u| !completed.contains(&u.id)).collect();
        remaining.sort_by_key(|u| u.id);
        let resumed = units.len() - remaining.len();

        if resumed > 0 {
            info!(
                "{} 🔄 从进度恢复 {} 章，剩余 {} 章",
                ctx,
                resumed,
                remaining.len()
            );
        } else {
            info!("{} 📖 开始获取 {} 章", ctx, remaining.len());
        }

        // ========== 主循环 ==========
        let mut deferred: Vec<&UnitRef> = Vec::new();
        let mut consecutive_rate_limits = 0usize;
        let mut stopped_early = false;

        for (index, &unit) in remaining.iter().enumerate() {
            if index > 0 {
                sleep(self.settings.pacing_delay(state.error_streak)).await;
            }
            info!(
                "{} [章节 {}/{}] {}",
                ctx,
                index + 1,
                remaining.len(),
                truncate_text(&unit.title, 60)
            );

            match self.fetch_one(&mut state, unit).await? {
                Step::Loaded | Step::Failed => consecutive_rate_limits = 0,
                Step::RateLimited => {
                    deferred.push(unit);
                    consecutive_rate_limits += 1;
                    if consecutive_rate_limits >= self.settings.max_consecutive_rate_limits {
                        warn!(
                            "{} 🛑 连续 {} 章被限流，提前结束本轮，剩余 {} 章留到下次运行",
                            ctx,
                            consecutive_rate_limits,
                            remaining.len() - index - 1
                        );
                        stopped_early = true;
                        break;
                    }
                    info!(
                        "{} ⏳ 冷却 {} 秒后继续",
                        ctx,
                        self.settings.rate_limit_cooldown.as_secs()
                    );
                    sleep(self.settings.rate_limit_cooldown).await;
                }
            }
        }

        // ========== 延后重试 ==========
        let mut rate_limited = 0usize;
        if !deferred.is_empty() {
            info!(
                "{} 🔁 {} 章被限流，等待 {} 秒后重试",
                ctx,
                deferred.len(),
                self.settings.deferred_cooldown.as_secs()
            );
            sleep(self.settings.deferred_cooldown).await;

            for (index, &unit) in deferred.iter().enumerate() {
                if index > 0 {
                    sleep(self.settings.pacing_delay(state.error_streak)).await;
                }
                info!(
                    "{} [重试 {}/{}] {}",
                    ctx,
                    index + 1,
                    deferred.len(),
                    unit.title
                );
                if let Step::RateLimited = self.fetch_one(&mut state, unit).await? {
                    rate_limited += 1;
                }
            }
        }

        // ========== 收尾 ==========
        state.content.sort_by_key(|c| c.id);
        self.store.save(&ctx.session_key, &state.record()).await?;

        let requested: BTreeSet<usize> = units.iter().map(|u| u.id).collect();
        let content: Vec<UnitContent> = state
            .content
            .into_iter()
            .filter(|c| requested.contains(&c.id))
            .collect();
        let acquired: BTreeSet<usize> = content.iter().map(|c| c.id).collect();
        let unresolved: Vec<usize> = requested.difference(&acquired).copied().collect();

        let report = AcquisitionReport {
            total: units.len(),
            loaded: state.successes,
            resumed,
            rate_limited,
            errors: state.errors,
            unresolved,
            stopped_early,
            content,
        };
        log_report(ctx, &report);
        Ok(report)
    }

    /// 读取进度，丢弃与当前章节列表对不上的记录
    async fn restore(&self, ctx: &SessionContext, units: &[UnitRef]) -> Result<Vec<UnitContent>, ProgressError> {
        let Some(progress) = self.store.load(&ctx.session_key).await? else {
            return Ok(Vec::new());
        };

        let titles: HashMap<usize, &str> = units.iter().map(|u| (u.id, u.title.as_str())).collect();
        let mut seen = BTreeSet::new();
        let mut content = Vec::with_capacity(progress.units.len());
        for unit in progress.units {
            let stale = titles.get(&unit.id).is_some_and(|title| *title != unit.title);
            if stale {
                warn!(
                    "{} ⚠️ 进度中的第 {} 章与当前章节列表不一致，将重新获取",
                    ctx, unit.id
                );
                continue;
            }
            if seen.insert(unit.id) {
                content.push(unit);
            }
        }
        Ok(content)
    }

    /// 获取一章并在需要时保存进度
    async fn fetch_one(&self, state: &mut RunState<'_>, unit: &UnitRef) -> Result<Step, ProgressError> {
        let ctx = state.ctx;
        let key = ctx.session_key.as_str();
        match self.fetcher.fetch(&unit.locator).await {
            Ok(payload) => {
                state.content.push(UnitContent::new(unit, payload));
                state.successes += 1;
                state.error_streak = 0;
                info!("{} ✓ {} 获取成功", ctx, unit.title);

                if state.successes == 1 || state.successes % self.settings.save_every == 0 {
                    self.store.save(key, &state.record()).await?;
                }
                Ok(Step::Loaded)
            }
            Err(e) if e.is_rate_limited() => {
                warn!("{} 🚦 {} 被限流，稍后重试: {}", ctx, unit.title, e);
                state.error_streak += 1;
                self.store.save(key, &state.record()).await?;
                Ok(Step::RateLimited)
            }
            Err(e) => {
                if e.is_soft() {
                    warn!("{} ⚠️ {} 获取失败，下次运行再试: {}", ctx, unit.title, e);
                } else {
                    error!("{} ❌ {} 获取失败: {}", ctx, unit.title, e);
                }
                state.errors += 1;
                state.error_streak += 1;
                self.store.save(key, &state.record()).await?;
                Ok(Step::Failed)
            }
        }
    }
}

fn log_report(ctx: &SessionContext, report: &AcquisitionReport) {
    info!("{} {}", ctx, "─".repeat(40));
    info!(
        "{} 📊 请求 {} 章 | 已获取 {} 章 (本次 {}, 恢复 {}) | 限流 {} | 失败 {} | 未完成 {}",
        ctx,
        report.total,
        report.acquired(),
        report.loaded,
        report.resumed,
        report.rate_limited,
        report.errors,
        report.unresolved.len()
    );
    if !report.unresolved.is_empty() {
        debug!("{} 未完成的章节 id: {:?}", ctx, report.unresolved);
    }
    if report.stopped_early {
        warn!("{} 💡 本轮因限流提前结束，重新运行即可从进度继续", ctx);
    }
}
