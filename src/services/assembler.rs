//! 电子书组装 - 业务能力层
//!
//! 两级组装：
//!
//! 1. 完整模式：清理图片后带图打包，超时 5 分钟
//! 2. 无图模式：去掉所有图片后打包，超时 2 分钟，输出到 `<名称>_degraded.epub`
//!
//! 完整模式出现网络类错误（含超时）时自动改用无图模式；
//! 其他错误以及无图模式的任何错误都直接返回给调用方。

use std::path::PathBuf;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{info, warn};

use crate::error::{AssemblyError, Tier};
use crate::models::{BookMetadata, UnitContent};
use crate::services::packager::{BookDocument, Packager};
use crate::services::sanitizer::{count_images, sanitize_degraded, sanitize_rich};

/// 无图模式输出文件名的后缀
pub const DEGRADED_SUFFIX: &str = "_degraded";

/// 组装参数
#[derive(Debug, Clone)]
pub struct AssemblyOptions {
    pub output_dir: PathBuf,
    pub rich_timeout: Duration,
    pub degraded_timeout: Duration,
    pub trusted_hosts: Vec<String>,
}

impl Default for AssemblyOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("books"),
            rich_timeout: Duration::from_secs(300),
            degraded_timeout: Duration::from_secs(120),
            trusted_hosts: Vec::new(),
        }
    }
}

/// 组装结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub tier: Tier,
    pub chapter_count: usize,
}

/// 电子书组装器
pub struct ArtifactAssembler<P> {
    packager: P,
    options: AssemblyOptions,
}

impl<P: Packager> ArtifactAssembler<P> {
    pub fn new(packager: P, options: AssemblyOptions) -> Self {
        Self { packager, options }
    }

    pub fn options(&self) -> &AssemblyOptions {
        &self.options
    }

    /// 输出文件路径
    pub fn output_path(&self, name: &str, tier: Tier) -> PathBuf {
        match tier {
            Tier::Rich => self.options.output_dir.join(format!("{}.epub", name)),
            Tier::Degraded => self
                .options
                .output_dir
                .join(format!("{}{}.epub", name, DEGRADED_SUFFIX)),
        }
    }

    /// 完整模式组装，网络类错误时自动改用无图模式
    pub async fn assemble(
        &self,
        content: &[UnitContent],
        metadata: &BookMetadata,
        name: &str,
    ) -> Result<Artifact, AssemblyError> {
        match self.assemble_tier(Tier::Rich, content, metadata, name).await {
            Ok(artifact) => Ok(artifact),
            Err(e) if e.is_connection_class() => {
                warn!("⚠️ 生成电子书时出现网络错误: {}", e);
                info!("🔄 改用无图模式重新生成...");
                let artifact = self.assemble_degraded(content, metadata, name).await?;
                info!("💡 图片已移除，电子书以无图模式生成");
                Ok(artifact)
            }
            Err(e) => Err(e),
        }
    }

    /// 直接使用无图模式组装
    pub async fn assemble_degraded(
        &self,
        content: &[UnitContent],
        metadata: &BookMetadata,
        name: &str,
    ) -> Result<Artifact, AssemblyError> {
        self.assemble_tier(Tier::Degraded, content, metadata, name)
            .await
    }

    /// 按指定层级组装一次，不做兜底
    pub async fn assemble_tier(
        &self,
        tier: Tier,
        content: &[UnitContent],
        metadata: &BookMetadata,
        name: &str,
    ) -> Result<Artifact, AssemblyError> {
        check_order(content)?;

        let chapters: Vec<UnitContent> = content
            .iter()
            .map(|unit| UnitContent {
                payload: match tier {
                    Tier::Rich => sanitize_rich(&unit.payload, &self.options.trusted_hosts),
                    Tier::Degraded => sanitize_degraded(&unit.payload),
                },
                ..unit.clone()
            })
            .collect();

        let images: usize = chapters.iter().map(|c| count_images(&c.payload)).sum();
        let book = BookDocument {
            metadata: BookMetadata {
                cover: match tier {
                    Tier::Rich => metadata.cover.clone(),
                    Tier::Degraded => None,
                },
                ..metadata.clone()
            },
            chapters,
            images_enabled: tier == Tier::Rich,
        };

        let path = self.output_path(name, tier);
        let limit = match tier {
            Tier::Rich => self.options.rich_timeout,
            Tier::Degraded => self.options.degraded_timeout,
        };
        info!(
            "📚 开始生成电子书 ({}): {} 章, {} 张图片 → {}",
            tier,
            book.chapters.len(),
            images,
            path.display()
        );

        match timeout(limit, self.packager.package(&book, &path)).await {
            Ok(Ok(())) => {
                info!("✅ 电子书已生成 ({}): {}", tier, path.display());
                Ok(Artifact {
                    path,
                    tier,
                    chapter_count: book.chapters.len(),
                })
            }
            Ok(Err(source)) => Err(AssemblyError::Package { tier, source }),
            Err(_) => Err(AssemblyError::TimedOut { tier, limit }),
        }
    }
}

/// 章节必须非空且按 id 严格升序
fn check_order(content: &[UnitContent]) -> Result<(), AssemblyError> {
    if content.is_empty() {
        return Err(AssemblyError::NoContent);
    }
    for pair in content.windows(2) {
        if pair[1].id <= pair[0].id {
            return Err(AssemblyError::OutOfOrder {
                previous: pair[0].id,
                next: pair[1].id,
            });
        }
    }
    Ok(())
}
