use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::services::packager::PackageError;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 章节发现错误
    #[error("章节发现错误: {0}")]
    Discovery(#[from] DiscoveryError),
    /// 进度文件错误
    #[error("进度文件错误: {0}")]
    Progress(#[from] ProgressError),
    /// 电子书组装错误
    #[error("电子书组装错误: {0}")]
    Assembly(#[from] AssemblyError),
}

/// 章节发现错误
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// 无法从地址中解析出书籍标识
    #[error("无法解析书籍地址: {locator}")]
    InvalidLocator { locator: String },
    /// 所有策略都没有找到章节
    #[error("未找到任何章节: {locator}")]
    NoUnits { locator: String },
}

/// 单个章节的获取错误
///
/// 区分"限流"和"普通失败"，编排层据此决定延后重试还是直接跳过
#[derive(Debug, Error)]
pub enum FetchError {
    /// 所有尝试都被限流
    #[error("请求被限流 (已尝试 {attempts} 次)")]
    RateLimited { attempts: u32 },
    /// 页面渲染后仍然没有正文
    #[error("章节内容为空 (已尝试 {attempts} 次)")]
    EmptyContent { attempts: u32 },
    /// 连接错误在重试后仍未恢复
    #[error("连接失败 (已尝试 {attempts} 次): {reason}")]
    Connection { attempts: u32, reason: String },
    /// 不可重试的错误，只放弃当前章节
    #[error("章节获取失败: {reason}")]
    Fatal { reason: String },
}

impl FetchError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. })
    }

    /// 软失败：跳过本章，下次运行再试
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            FetchError::EmptyContent { .. } | FetchError::Connection { .. }
        )
    }
}

/// 进度文件错误
#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("读取进度文件失败 ({path}): {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("写入进度文件失败 ({path}): {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("删除进度文件失败 ({path}): {source}")]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("进度文件格式错误 ({path}): {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// 组装层级
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// 保留图片
    Rich,
    /// 去掉所有图片
    Degraded,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Rich => write!(f, "完整模式"),
            Tier::Degraded => write!(f, "无图模式"),
        }
    }
}

/// 电子书组装错误
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// 打包器返回错误
    #[error("打包失败 ({tier}): {source}")]
    Package {
        tier: Tier,
        #[source]
        source: PackageError,
    },
    /// 打包超时
    #[error("打包超时 ({tier}): 超过 {}秒", limit.as_secs())]
    TimedOut { tier: Tier, limit: Duration },
    /// 章节没有按 id 升序排列
    #[error("章节顺序错误: id {previous} 之后出现 id {next}")]
    OutOfOrder { previous: usize, next: usize },
    /// 没有任何章节可以打包
    #[error("没有可打包的章节")]
    NoContent,
}

impl AssemblyError {
    /// 网络类错误会触发无图模式兜底
    pub fn is_connection_class(&self) -> bool {
        match self {
            AssemblyError::Package { source, .. } => source.is_connection_class(),
            AssemblyError::TimedOut { .. } => true,
            _ => false,
        }
    }
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件失败 ({path}): {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("配置文件解析失败 ({path}): {source}")]
    FileParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    InvalidValue {
        var_name: String,
        value: String,
        expected_type: String,
    },
}

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
