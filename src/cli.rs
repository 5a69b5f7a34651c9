//! 命令行参数与交互式选择

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use tracing::{info, warn};

use ranobe_epub::orchestrator::{AcquisitionReport, BatchMode, Operator};
use ranobe_epub::services::Selection;
use ranobe_epub::workflow::{ImageMode, PartialContentGate, SessionContext};

/// 没有给出有效数量时获取的章节数
const DEFAULT_FIRST_N: usize = 5;
/// 输入无效时获取的卷
const FALLBACK_VOLUME: u32 = 1;

/// 获取连载小说的章节并生成 EPUB 电子书
///
/// 未通过参数给出的选择会在终端中询问
#[derive(Parser, Debug, Default)]
#[command(name = "ranobe_epub")]
#[command(author, version, about)]
#[command(group(ArgGroup::new("selection").args(["all", "volumes", "range", "first"])))]
pub struct Args {
    /// 书籍页面地址
    pub url: Option<String>,

    /// 获取全部卷
    #[arg(long)]
    pub all: bool,

    /// 指定卷号，用逗号分隔（例如 1,3,5）
    #[arg(long, value_name = "LIST")]
    pub volumes: Option<String>,

    /// 卷范围（例如 2-4）
    #[arg(long, value_name = "A-B")]
    pub range: Option<String>,

    /// 只获取前 N 章（测试用）
    #[arg(long, value_name = "N")]
    pub first: Option<usize>,

    /// 每卷单独生成一个文件
    #[arg(long)]
    pub per_volume: bool,

    /// 不下载图片
    #[arg(long)]
    pub no_images: bool,

    /// 章节不完整时也生成电子书
    #[arg(long)]
    pub allow_partial: bool,

    /// 配置文件路径（默认读取工作目录下的 ranobe_epub.toml）
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// 列出可以继续的会话后退出
    #[arg(long)]
    pub list_sessions: bool,

    /// 显示详细日志
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    fn has_selection(&self) -> bool {
        self.all || self.volumes.is_some() || self.range.is_some() || self.first.is_some()
    }
}

/// 解析逗号分隔的卷号，只保留存在的卷
pub fn parse_volume_list(input: &str, available: &BTreeSet<u32>) -> Option<BTreeSet<u32>> {
    let volumes: BTreeSet<u32> = input
        .split(',')
        .filter_map(|v| v.trim().parse().ok())
        .filter(|v| available.contains(v))
        .collect();
    (!volumes.is_empty()).then_some(volumes)
}

/// 解析 `a-b` 形式的卷范围，只保留存在的卷
pub fn parse_volume_range(input: &str, available: &BTreeSet<u32>) -> Option<BTreeSet<u32>> {
    let (start, end) = input.split_once('-')?;
    let start: u32 = start.trim().parse().ok()?;
    let end: u32 = end.trim().parse().ok()?;
    if start > end {
        return None;
    }
    let volumes: BTreeSet<u32> = available.range(start..=end).copied().collect();
    (!volumes.is_empty()).then_some(volumes)
}

/// 解析章节数量，无效时取 5
pub fn parse_first_n(input: &str) -> usize {
    input
        .trim()
        .parse()
        .ok()
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_FIRST_N)
}

fn fallback_selection() -> Selection {
    Selection::Volumes([FALLBACK_VOLUME].into_iter().collect())
}

/// 菜单选项 + 追加输入 → 选择
///
/// 任何无效输入都退回到第 1 卷（前 N 章模式退回到前 5 章）
pub fn selection_from_menu(choice: &str, detail: Option<&str>, available: &BTreeSet<u32>) -> Selection {
    let detail = detail.unwrap_or_default();
    match choice.trim() {
        "1" => Selection::All,
        "2" => parse_volume_list(detail, available)
            .map(Selection::Volumes)
            .unwrap_or_else(fallback_selection),
        "3" => parse_volume_range(detail, available)
            .map(Selection::Volumes)
            .unwrap_or_else(fallback_selection),
        "4" => Selection::FirstN(parse_first_n(detail)),
        _ => fallback_selection(),
    }
}

/// 选择涉及的卷数
fn volume_count(selection: &Selection, summary: &BTreeMap<u32, usize>) -> usize {
    match selection {
        Selection::All => summary.len(),
        Selection::Volumes(volumes) => volumes.len(),
        Selection::FirstN(_) => 1,
    }
}

fn prompt(message: &str) -> Option<String> {
    print!("{}", message);
    io::stdout().flush().ok()?;
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim().to_string()),
    }
}

/// 询问书籍地址
pub fn prompt_url() -> Result<String> {
    let url = prompt("请输入书籍页面地址: ").context("未输入书籍地址")?;
    if url.is_empty() {
        anyhow::bail!("未输入书籍地址");
    }
    Ok(url)
}

/// 命令行参数 + 终端交互
pub struct CliOperator {
    args: Args,
    interactive: bool,
}

impl CliOperator {
    pub fn new(args: Args) -> Self {
        let interactive = io::stdin().is_terminal();
        Self { args, interactive }
    }

    fn selection_from_args(&self, available: &BTreeSet<u32>) -> Option<Selection> {
        let args = &self.args;
        if args.all {
            return Some(Selection::All);
        }
        if let Some(n) = args.first {
            return Some(Selection::FirstN(if n > 0 { n } else { DEFAULT_FIRST_N }));
        }
        if let Some(list) = &args.volumes {
            return Some(
                parse_volume_list(list, available)
                    .map(Selection::Volumes)
                    .unwrap_or_else(|| {
                        warn!("❌ 卷号无效: {}，只获取第 {} 卷", list, FALLBACK_VOLUME);
                        fallback_selection()
                    }),
            );
        }
        if let Some(range) = &args.range {
            return Some(
                parse_volume_range(range, available)
                    .map(Selection::Volumes)
                    .unwrap_or_else(|| {
                        warn!("❌ 卷范围无效: {}，只获取第 {} 卷", range, FALLBACK_VOLUME);
                        fallback_selection()
                    }),
            );
        }
        None
    }
}

impl PartialContentGate for CliOperator {
    fn proceed(&self, ctx: &SessionContext, report: &AcquisitionReport) -> bool {
        if self.args.allow_partial {
            return true;
        }
        if !self.interactive {
            return false;
        }
        let answer = prompt(&format!(
            "{} 只获取到 {}/{} 章，是否用已有章节生成电子书？(y/N): ",
            ctx,
            report.acquired(),
            report.total
        ));
        matches!(answer.as_deref().map(str::to_lowercase).as_deref(), Some("y" | "yes"))
    }
}

impl Operator for CliOperator {
    fn selection(&self, summary: &BTreeMap<u32, usize>) -> Selection {
        let available: BTreeSet<u32> = summary.keys().copied().collect();
        if let Some(selection) = self.selection_from_args(&available) {
            return selection;
        }
        if !self.interactive {
            info!("未指定范围，获取全部卷");
            return Selection::All;
        }

        let list: Vec<String> = available.iter().map(u32::to_string).collect();
        println!("\n⚠️ 获取全部章节可能需要几个小时！");
        println!("\n请选择要获取的内容:");
        println!("1. 全部卷");
        println!("2. 指定卷");
        println!("3. 卷范围（例如 1-3）");
        println!("4. 只获取前 N 章（测试用）");

        let choice = prompt("请选择 (1-4): ").unwrap_or_default();
        let detail = match choice.as_str() {
            "2" => prompt(&format!("请输入卷号，用逗号分隔（可选: {}）: ", list.join(", "))),
            "3" => prompt("请输入卷范围（例如 1-3）: "),
            "4" => prompt("请输入要获取的章节数: "),
            _ => None,
        };

        let selection = selection_from_menu(&choice, detail.as_deref(), &available);
        info!("✅ 已选择: {:?}", selection);
        selection
    }

    fn batch_mode(&self, selection: &Selection, summary: &BTreeMap<u32, usize>) -> BatchMode {
        if self.args.per_volume {
            return BatchMode::PerVolume;
        }
        if !self.interactive || self.args.has_selection() || volume_count(selection, summary) <= 1 {
            return BatchMode::Single;
        }

        println!("\n🔧 请选择处理方式:");
        println!("1. 📚 合并为一个 EPUB（出错时可能要重新获取全部内容）");
        println!("2. 🔥 每卷单独处理（推荐，出错只影响当前卷）");
        match prompt("请选择 (1-2): ").as_deref() {
            Some("2") => BatchMode::PerVolume,
            _ => BatchMode::Single,
        }
    }

    fn image_mode(&self) -> ImageMode {
        if self.args.no_images {
            return ImageMode::None;
        }
        if !self.interactive || self.args.has_selection() {
            return ImageMode::Rich;
        }

        println!("\n🖼️ 请选择图片处理方式:");
        println!("1. 📷 包含图片（出现网络错误时自动改为无图）");
        println!("2. 🚫 不包含图片（更稳定、更快、文件更小）");
        match prompt("请选择 (1-2): ").as_deref() {
            Some("2") => ImageMode::None,
            _ => ImageMode::Rich,
        }
    }
}
