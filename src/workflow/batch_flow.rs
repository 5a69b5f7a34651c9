//! 单批处理流程 - 流程层
//!
//! 核心职责：定义"一批章节"的完整处理流程
//!
//! 流程顺序：
//! 1. 获取章节（断点续传）
//! 2. 检查是否完整，不完整时询问是否继续
//! 3. 组装电子书（完整模式自动降级，或直接无图模式）
//! 4. 全部章节都已获取且文件已写出时，删除进度文件

use tracing::{info, warn};

use crate::error::{AppResult, Tier};
use crate::models::{BookMetadata, UnitRef};
use crate::orchestrator::acquisition::{AcquisitionOrchestrator, AcquisitionReport};
use crate::services::assembler::{Artifact, ArtifactAssembler};
use crate::services::chapter_source::ChapterSource;
use crate::services::packager::Packager;
use crate::workflow::session_ctx::SessionContext;

/// 图片模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageMode {
    /// 保留图片，网络出错时自动改为无图
    #[default]
    Rich,
    /// 不下载任何图片
    None,
}

/// 章节不完整时是否继续生成电子书
pub trait PartialContentGate: Send + Sync {
    fn proceed(&self, ctx: &SessionContext, report: &AcquisitionReport) -> bool;
}

/// 固定答复的开关（命令行参数或测试使用）
#[derive(Debug, Clone, Copy)]
pub struct FixedGate(pub bool);

impl PartialContentGate for FixedGate {
    fn proceed(&self, _ctx: &SessionContext, _report: &AcquisitionReport) -> bool {
        self.0
    }
}

/// 一批的处理结果
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub report: AcquisitionReport,
    /// 没有生成文件时为 `None`（没有内容，或用户选择不生成）
    pub artifact: Option<Artifact>,
    /// 进度文件是否已删除
    pub progress_cleared: bool,
}

impl BatchOutcome {
    pub fn tier(&self) -> Option<Tier> {
        self.artifact.as_ref().map(|a| a.tier)
    }
}

/// 单批处理流程
///
/// - 不持有任何资源，只借用编排器和组装器
/// - 决定何时组装、何时清理进度
pub struct BatchFlow<'a, S, P> {
    orchestrator: &'a AcquisitionOrchestrator<S>,
    assembler: &'a ArtifactAssembler<P>,
    image_mode: ImageMode,
}

impl<'a, S: ChapterSource, P: Packager> BatchFlow<'a, S, P> {
    pub fn new(
        orchestrator: &'a AcquisitionOrchestrator<S>,
        assembler: &'a ArtifactAssembler<P>,
        image_mode: ImageMode,
    ) -> Self {
        Self {
            orchestrator,
            assembler,
            image_mode,
        }
    }

    pub async fn run(
        &self,
        ctx: &SessionContext,
        units: &[UnitRef],
        full_unit_list: Option<&[UnitRef]>,
        metadata: &BookMetadata,
        output_name: &str,
        gate: &dyn PartialContentGate,
    ) -> AppResult<BatchOutcome> {
        let report = self.orchestrator.acquire(ctx, units, full_unit_list).await?;

        if report.content.is_empty() {
            warn!("{} ❌ 没有获取到任何章节，跳过生成", ctx);
            return Ok(BatchOutcome {
                report,
                artifact: None,
                progress_cleared: false,
            });
        }

        if !report.is_complete() {
            warn!(
                "{} ⚠️ 章节不完整: 已获取 {}/{}，限流 {}，未完成 {}",
                ctx,
                report.acquired(),
                report.total,
                report.rate_limited,
                report.unresolved.len()
            );
            if !gate.proceed(ctx, &report) {
                info!("{} 💾 进度已保存，重新运行即可继续获取剩余章节", ctx);
                return Ok(BatchOutcome {
                    report,
                    artifact: None,
                    progress_cleared: false,
                });
            }
            info!("{} 📝 按要求使用已获取的 {} 章生成电子书", ctx, report.acquired());
        }

        let artifact = match self.image_mode {
            ImageMode::Rich => {
                self.assembler
                    .assemble(&report.content, metadata, output_name)
                    .await?
            }
            ImageMode::None => {
                self.assembler
                    .assemble_degraded(&report.content, metadata, output_name)
                    .await?
            }
        };

        let progress_cleared = if report.is_complete() {
            let removed = self.orchestrator.store().delete(&ctx.session_key).await?;
            if removed {
                info!("{} 🗑️ 进度文件已清理", ctx);
            }
            removed
        } else {
            false
        };

        Ok(BatchOutcome {
            report,
            artifact: Some(artifact),
            progress_cleared,
        })
    }
}
