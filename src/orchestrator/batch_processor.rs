//! 批量处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责一次完整运行的调度和资源组装。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：写入运行日志头、输出启动信息
//! 2. **章节发现**：书籍信息 + 有序章节列表
//! 3. **用户选择**：卷、处理方式、图片模式（来自 `Operator`）
//! 4. **分批处理**：整本一个文件，或每卷一个文件
//! 5. **全局统计**：汇总所有批次的结果
//!
//! ## 设计特点
//!
//! - **顶层编排**：不处理单个章节的细节
//! - **资源组装**：浏览器、HTTP 客户端、进度目录都在这里创建
//! - **向下委托**：委托 `BatchFlow` 处理单个批次

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::browser::BrowserOptions;
use crate::config::Config;
use crate::error::AppResult;
use crate::models::{BookMetadata, UnitRef};
use crate::orchestrator::acquisition::{AcquisitionOrchestrator, AcquisitionSettings};
use crate::services::assembler::{Artifact, ArtifactAssembler, AssemblyOptions};
use crate::services::chapter_source::{BrowserChapterSource, ChapterSource};
use crate::services::content_fetcher::ContentFetcher;
use crate::services::discovery::{ApiCatalog, DomCatalog, UnitDiscovery};
use crate::services::packager::{EpubPackager, Packager};
use crate::services::partitioner::{filter_by_selection, partition, volume_summary, Selection};
use crate::services::progress_store::ProgressStore;
use crate::utils::logging::{
    init_log_file, log_batch_complete, log_batch_start, log_estimate, log_startup,
    log_volume_summary, print_final_stats, FinalStats,
};
use crate::workflow::{BatchFlow, BatchOutcome, ImageMode, PartialContentGate, SessionContext};

/// 处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchMode {
    /// 所有选中章节生成一个文件
    #[default]
    Single,
    /// 每卷单独获取、单独生成文件
    PerVolume,
}

/// 运行过程中需要用户做出的选择
pub trait Operator: PartialContentGate {
    /// 根据每卷章节数选择要获取的章节
    fn selection(&self, summary: &BTreeMap<u32, usize>) -> Selection;
    /// 选择处理方式，只选了一卷时通常直接返回 `Single`
    fn batch_mode(&self, selection: &Selection, summary: &BTreeMap<u32, usize>) -> BatchMode;
    fn image_mode(&self) -> ImageMode;
}

/// 一次运行的统计
#[derive(Debug, Default)]
pub struct RunSummary {
    /// (会话键, 结果)
    pub outcomes: Vec<(String, BatchOutcome)>,
    /// (会话键, 错误信息)
    pub failures: Vec<(String, String)>,
    /// 是否因为限流提前结束
    pub stopped_early: bool,
}

impl RunSummary {
    pub fn requested(&self) -> usize {
        self.outcomes.iter().map(|(_, o)| o.report.total).sum()
    }

    pub fn acquired(&self) -> usize {
        self.outcomes.iter().map(|(_, o)| o.report.acquired()).sum()
    }

    pub fn rate_limited(&self) -> usize {
        self.outcomes.iter().map(|(_, o)| o.report.rate_limited).sum()
    }

    pub fn unresolved(&self) -> usize {
        self.outcomes.iter().map(|(_, o)| o.report.unresolved.len()).sum()
    }

    pub fn artifacts(&self) -> Vec<&Artifact> {
        self.outcomes
            .iter()
            .filter_map(|(_, o)| o.artifact.as_ref())
            .collect()
    }

    fn final_stats(&self) -> FinalStats {
        FinalStats {
            requested: self.requested(),
            acquired: self.acquired(),
            rate_limited: self.rate_limited(),
            unresolved: self.unresolved(),
            failed_batches: self.failures.len(),
            artifacts: self.artifacts().iter().map(|a| a.path.clone()).collect(),
        }
    }
}

/// 按处理方式执行所有批次
///
/// - 整本模式：会话键为书籍 ID，任何错误直接返回
/// - 分卷模式：会话键为 `书籍ID_vol_卷号`，单卷失败只记录，不影响其他卷；
///   某一卷因限流提前结束时，不再继续后面的卷
pub async fn process_batches<S: ChapterSource, P: Packager>(
    flow: &BatchFlow<'_, S, P>,
    gate: &dyn PartialContentGate,
    ctx: &SessionContext,
    units: &[UnitRef],
    metadata: &BookMetadata,
    selection: &Selection,
    mode: BatchMode,
) -> AppResult<RunSummary> {
    let selected = filter_by_selection(units, selection);
    let mut summary = RunSummary::default();

    match mode {
        BatchMode::Single => {
            let name = format!("{}{}", ctx.document_id, selection.file_suffix());
            log_batch_start(1, 1, &ctx.to_string(), selected.len());
            let outcome = flow
                .run(ctx, &selected, Some(selected.as_slice()), metadata, &name, gate)
                .await?;
            log_batch_complete(&ctx.to_string(), &outcome);
            summary.stopped_early = outcome.report.stopped_early;
            summary.outcomes.push((ctx.session_key.clone(), outcome));
        }
        BatchMode::PerVolume => {
            let groups = partition(&selected);
            let total = groups.len();
            for (index, (volume, members)) in groups.iter().enumerate() {
                let vctx = ctx.for_volume(*volume);
                let name = format!("{}_vol_{}", ctx.document_id, volume);
                log_batch_start(index + 1, total, &vctx.to_string(), members.len());

                match flow.run(&vctx, members, Some(members.as_slice()), metadata, &name, gate).await {
                    Ok(outcome) => {
                        log_batch_complete(&vctx.to_string(), &outcome);
                        let stopped = outcome.report.stopped_early;
                        summary.outcomes.push((vctx.session_key.clone(), outcome));
                        if stopped {
                            warn!(
                                "{} 🛑 因限流提前结束，剩余 {} 卷留到下次运行",
                                vctx,
                                total - index - 1
                            );
                            summary.stopped_early = true;
                            break;
                        }
                    }
                    Err(e) => {
                        error!("{} ❌ 本卷处理失败: {}", vctx, e);
                        summary.failures.push((vctx.session_key.clone(), e.to_string()));
                    }
                }
            }
        }
    }

    Ok(summary)
}

/// 应用主结构
pub struct App<O> {
    config: Config,
    operator: O,
}

impl<O: Operator> App<O> {
    /// 初始化应用
    pub fn initialize(config: Config, operator: O) -> Result<Self> {
        init_log_file(&config.run_log_file)?;
        log_startup(&config);
        Ok(Self { config, operator })
    }

    /// 运行应用主逻辑
    pub async fn run(&self, document_url: &str) -> Result<RunSummary> {
        let config = &self.config;
        let ctx = SessionContext::from_url(document_url)?;
        info!("{} 📘 书籍地址: {}", ctx, ctx.document_url);

        let browser_options = BrowserOptions::from_config(config);
        let api_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("创建 HTTP 客户端失败")?;
        let image_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.image_timeout_secs))
            .build()
            .context("创建图片下载客户端失败")?;

        // ========== 书籍信息与章节列表 ==========
        info!("{} 正在获取书籍信息...", ctx);
        let dom = DomCatalog::new(browser_options.clone());
        let metadata = dom.metadata(&ctx, &config.language, &config.toc_title).await;
        info!("{} 📖 {} / {}", ctx, metadata.title, metadata.author);

        info!("{} 正在获取章节列表...", ctx);
        let discovery = UnitDiscovery::new(ApiCatalog::new(api_client, &config.api_base_url), dom);
        let units = discovery.discover(&ctx).await?;

        let volumes = volume_summary(&units);
        log_volume_summary(&volumes, units.len());

        // ========== 用户选择 ==========
        let selection = self.operator.selection(&volumes);
        let mode = self.operator.batch_mode(&selection, &volumes);
        let image_mode = self.operator.image_mode();

        let selected_count = filter_by_selection(&units, &selection).len();
        if selected_count == 0 {
            anyhow::bail!("所选范围内没有章节，请检查卷号");
        }
        log_estimate(selected_count, config.save_every);

        // ========== 组装各层 ==========
        let orchestrator = AcquisitionOrchestrator::new(
            ContentFetcher::new(
                BrowserChapterSource::new(browser_options, config.content_selectors.clone()),
                config.fetch_policy(),
            ),
            ProgressStore::new(config.progress_dir.clone()),
            AcquisitionSettings::from_config(config),
        );
        let assembler = ArtifactAssembler::new(
            EpubPackager::new(image_client),
            AssemblyOptions {
                output_dir: config.output_dir.clone(),
                rich_timeout: config.rich_timeout(),
                degraded_timeout: config.degraded_timeout(),
                trusted_hosts: config.trusted_image_hosts.clone(),
            },
        );
        let flow = BatchFlow::new(&orchestrator, &assembler, image_mode);

        let summary = process_batches(
            &flow,
            &self.operator,
            &ctx,
            &units,
            &metadata,
            &selection,
            mode,
        )
        .await?;

        print_final_stats(&summary.final_stats(), &config.run_log_file);

        if summary.outcomes.is_empty() && !summary.failures.is_empty() {
            anyhow::bail!("所有卷都处理失败");
        }
        Ok(summary)
    }
}

/// 列出可以继续的会话
pub async fn list_sessions(config: &Config) -> Result<Vec<(String, usize)>> {
    let store = ProgressStore::new(config.progress_dir.clone());
    let mut sessions = Vec::new();
    for key in store.list_sessions().await? {
        let completed = store
            .load(&key)
            .await?
            .map(|p| p.completed_count)
            .unwrap_or(0);
        sessions.push((key, completed));
    }
    Ok(sessions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProgressRecord, UnitContent};
    use crate::orchestrator::acquisition::AcquisitionReport;

    fn content(id: usize) -> UnitContent {
        UnitContent {
            id,
            title: format!("Глава {}", id + 1),
            payload: "<p>текст</p>".to_string(),
        }
    }

    #[test]
    fn list_sessions_reports_completed_counts() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            progress_dir: dir.path().to_path_buf(),
            ..Config::default()
        };

        let sessions = tokio_test::block_on(async {
            let store = ProgressStore::new(dir.path());
            let two = vec![content(0), content(1)];
            let one = vec![content(0)];
            store.save("77--novel", &ProgressRecord::new(&two, None, None)).await?;
            store.save("77--novel_vol_3", &ProgressRecord::new(&one, None, None)).await?;
            list_sessions(&config).await
        })
        .unwrap();

        assert_eq!(
            sessions,
            vec![("77--novel".to_string(), 2), ("77--novel_vol_3".to_string(), 1)]
        );
    }

    #[test]
    fn run_summary_adds_up_batches() {
        let batch = |total: usize, acquired: usize, rate_limited: usize| BatchOutcome {
            report: AcquisitionReport {
                content: (0..acquired).map(content).collect(),
                total,
                rate_limited,
                unresolved: (acquired..total).collect(),
                ..Default::default()
            },
            artifact: None,
            progress_cleared: false,
        };
        let summary = RunSummary {
            outcomes: vec![("a".to_string(), batch(3, 3, 0)), ("b".to_string(), batch(4, 2, 1))],
            failures: vec![("c".to_string(), "boom".to_string())],
            stopped_early: false,
        };

        let stats = summary.final_stats();
        assert_eq!(stats.requested, 7);
        assert_eq!(stats.acquired, 5);
        assert_eq!(stats.rate_limited, 1);
        assert_eq!(stats.unresolved, 2);
        assert_eq!(stats.failed_batches, 1);
        assert!(stats.artifacts.is_empty());
    }
}
