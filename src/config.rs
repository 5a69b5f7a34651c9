use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::services::content_fetcher::FetchPolicy;

/// 默认配置文件名（位于工作目录）
pub const DEFAULT_CONFIG_FILE: &str = "ranobe_epub.toml";

/// 程序配置文件
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 进度文件目录
    pub progress_dir: PathBuf,
    /// 电子书输出目录
    pub output_dir: PathBuf,
    /// 章节列表 API 地址（后接 `/{书籍ID}/chapters`）
    pub api_base_url: String,
    /// 浏览器可执行文件，为空时由 chromiumoxide 自动查找
    pub browser_executable: Option<PathBuf>,
    /// 是否使用无头模式
    pub headless: bool,
    /// 正文容器选择器，按顺序尝试
    pub content_selectors: Vec<String>,
    /// 章节之间的基础间隔
    pub request_delay_ms: u64,
    /// 章节间隔的随机抖动上限
    pub request_jitter_ms: u64,
    // --- 重试与退避 ---
    pub max_attempts: u32,
    pub rate_limit_base_secs: u64,
    pub connection_step_secs: u64,
    pub settle_delays_secs: Vec<u64>,
    pub rate_limit_cooldown_secs: u64,
    pub deferred_cooldown_secs: u64,
    /// 每成功多少章保存一次进度
    pub save_every: usize,
    /// 连续多少章被限流后提前结束本轮
    pub max_consecutive_rate_limits: usize,
    // --- 打包 ---
    pub rich_timeout_secs: u64,
    pub degraded_timeout_secs: u64,
    pub image_timeout_secs: u64,
    /// 可以直接下载的图片域名，其他域名的图片替换为占位块
    pub trusted_image_hosts: Vec<String>,
    pub language: String,
    pub toc_title: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 运行日志文件
    pub run_log_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            progress_dir: PathBuf::from("progress"),
            output_dir: PathBuf::from("books"),
            api_base_url: "https://api.lib.social/api/manga".to_string(),
            browser_executable: None,
            headless: false,
            content_selectors: vec![
                "div.text-content".to_string(),
                "div.reader-container.container.container_center".to_string(),
            ],
            request_delay_ms: 2000,
            request_jitter_ms: 1000,
            max_attempts: 3,
            rate_limit_base_secs: 30,
            connection_step_secs: 2,
            settle_delays_secs: vec![0, 8, 15],
            rate_limit_cooldown_secs: 5,
            deferred_cooldown_secs: 10,
            save_every: 5,
            max_consecutive_rate_limits: 3,
            rich_timeout_secs: 300,
            degraded_timeout_secs: 120,
            image_timeout_secs: 30,
            trusted_image_hosts: vec![
                "ranobelib.me".to_string(),
                "lib.social".to_string(),
                "cdnlibs.org".to_string(),
            ],
            language: "ru".to_string(),
            toc_title: "Содержание".to_string(),
            verbose_logging: false,
            run_log_file: PathBuf::from("ranobe_epub.log"),
        }
    }
}

impl Config {
    /// 按 默认值 → 配置文件 → 环境变量 的顺序加载
    ///
    /// `path` 为空时尝试读取工作目录下的 `ranobe_epub.toml`，不存在则跳过
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env()
    }

    /// 从 TOML 文件加载，缺失的字段使用默认值
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::FileParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 用 `RANOBE_` 前缀的环境变量覆盖配置
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Some(v) = env_string("PROGRESS_DIR") {
            self.progress_dir = PathBuf::from(v);
        }
        if let Some(v) = env_string("OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }
        if let Some(v) = env_string("API_BASE_URL") {
            self.api_base_url = v;
        }
        if let Some(v) = env_string("BROWSER_EXECUTABLE") {
            self.browser_executable = Some(PathBuf::from(v));
        }
        if let Some(v) = env_parsed("HEADLESS", "bool")? {
            self.headless = v;
        }
        if let Some(v) = env_parsed("REQUEST_DELAY_MS", "u64")? {
            self.request_delay_ms = v;
        }
        if let Some(v) = env_parsed("VERBOSE_LOGGING", "bool")? {
            self.verbose_logging = v;
        }
        Ok(self)
    }

    /// 章节获取的重试策略
    pub fn fetch_policy(&self) -> FetchPolicy {
        FetchPolicy {
            max_attempts: self.max_attempts.max(1),
            rate_limit_base: Duration::from_secs(self.rate_limit_base_secs),
            connection_step: Duration::from_secs(self.connection_step_secs),
            settle_delays: self
                .settle_delays_secs
                .iter()
                .copied()
                .map(Duration::from_secs)
                .collect(),
        }
    }

    pub fn rich_timeout(&self) -> Duration {
        Duration::from_secs(self.rich_timeout_secs)
    }

    pub fn degraded_timeout(&self) -> Duration {
        Duration::from_secs(self.degraded_timeout_secs)
    }
}

/// 所有环境变量覆盖项的前缀
pub const ENV_PREFIX: &str = "RANOBE_";

fn env_string(var_name: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, var_name))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn env_parsed<T: std::str::FromStr>(
    var_name: &str,
    expected_type: &str,
) -> Result<Option<T>, ConfigError> {
    match env_string(var_name) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                var_name: format!("{}{}", ENV_PREFIX, var_name),
                value,
                expected_type: expected_type.to_string(),
            }),
        None => Ok(None),
    }
}
