/// 日志工具模块
///
/// 提供日志格式化和输出的辅助函数
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::workflow::BatchOutcome;

/// 估算时每章大约耗时（秒）
const SECONDS_PER_CHAPTER: usize = 30;

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &Path) -> Result<()> {
    let log_header = format!(
        "{}\n章节获取日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    if let Some(parent) = log_file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("无法创建日志目录: {}", parent.display()))?;
    }
    fs::write(log_file_path, log_header)
        .with_context(|| format!("无法写入日志文件: {}", log_file_path.display()))?;
    Ok(())
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 章节获取与电子书生成");
    info!("📁 进度目录: {}", config.progress_dir.display());
    info!("📚 输出目录: {}", config.output_dir.display());
    info!("{}", "=".repeat(60));
}

/// 记录每卷的章节数
///
/// # 参数
/// - `summary`: 卷号 → 章节数
/// - `total`: 章节总数
pub fn log_volume_summary(summary: &BTreeMap<u32, usize>, total: usize) {
    info!("\n📚 找到 {} 卷，共 {} 章", summary.len(), total);
    for (volume, count) in summary {
        if *volume == 0 {
            info!("   未分卷: {} 章", count);
        } else {
            info!("   第 {} 卷: {} 章", volume, count);
        }
    }
}

/// 记录预计耗时
///
/// # 参数
/// - `chapters`: 要获取的章节数
/// - `save_every`: 进度保存间隔
pub fn log_estimate(chapters: usize, save_every: usize) {
    let minutes = (chapters * SECONDS_PER_CHAPTER).div_ceil(60);
    info!("\n📖 待获取: {} 章", chapters);
    info!("⏱️ 预计耗时: 约 {} 分钟", minutes);
    info!("💾 每获取 {} 章自动保存一次进度", save_every);
    info!("🔄 中断后重新运行即可从上次的位置继续\n");
}

/// 记录批次开始信息
///
/// # 参数
/// - `batch_num`: 批次编号
/// - `total_batches`: 批次总数
/// - `label`: 批次标识
/// - `chapters`: 本批章节数
pub fn log_batch_start(batch_num: usize, total_batches: usize, label: &str, chapters: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📦 开始处理第 {}/{} 批 {}", batch_num, total_batches, label);
    info!("📄 本批章节: {} 章", chapters);
    info!("{}", "=".repeat(60));
}

/// 记录批次完成信息
pub fn log_batch_complete(label: &str, outcome: &BatchOutcome) {
    let report = &outcome.report;
    info!("\n{}", "─".repeat(60));
    info!(
        "✓ {} 完成: 获取 {}/{}，限流 {}，未完成 {}",
        label,
        report.acquired(),
        report.total,
        report.rate_limited,
        report.unresolved.len()
    );
    match &outcome.artifact {
        Some(artifact) => info!("📂 {} ({})", artifact.path.display(), artifact.tier),
        None => info!("📂 本批未生成文件"),
    }
    info!("{}", "─".repeat(60));
}

/// 最终统计
#[derive(Debug, Default)]
pub struct FinalStats {
    pub requested: usize,
    pub acquired: usize,
    pub rate_limited: usize,
    pub unresolved: usize,
    pub failed_batches: usize,
    pub artifacts: Vec<PathBuf>,
}

/// 打印最终统计信息
pub fn print_final_stats(stats: &FinalStats, log_file_path: &Path) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 已获取: {}/{}", stats.acquired, stats.requested);
    info!("🚦 限流: {}", stats.rate_limited);
    info!("❌ 未完成: {}", stats.unresolved);
    if stats.failed_batches > 0 {
        info!("⚠️ 失败批次: {}", stats.failed_batches);
    }
    if stats.artifacts.is_empty() {
        info!("📂 没有生成任何电子书");
    } else {
        info!("📂 已生成 {} 个文件:", stats.artifacts.len());
        for (index, path) in stats.artifacts.iter().enumerate() {
            info!("   {}. {}", index + 1, path.display());
        }
    }
    info!("{}", "=".repeat(60));
    info!("\n日志已保存至: {}", log_file_path.display());
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
