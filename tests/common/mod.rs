#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use ranobe_epub::orchestrator::{AcquisitionOrchestrator, AcquisitionSettings};
use ranobe_epub::services::{ChapterSource, ContentFetcher, FetchPolicy, PageOutcome, ProgressStore};
use ranobe_epub::{SessionContext, UnitRef};

pub const BOOK_URL: &str = "https://ranobelib.me/ru/book/77--novel";

/// 一次 `load` 调用的记录
#[derive(Debug, Clone)]
pub struct Call {
    pub locator: String,
    pub at: Instant,
    pub settle: Duration,
}

#[derive(Default)]
struct Script {
    outcomes: HashMap<String, VecDeque<PageOutcome>>,
    calls: Vec<Call>,
}

/// 按脚本返回结果的章节来源
///
/// 脚本用完后返回 `<p>{locator}</p>` 作为正文
#[derive(Clone, Default)]
pub struct ScriptedSource {
    script: Arc<Mutex<Script>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, locator: &str, outcomes: impl IntoIterator<Item = PageOutcome>) -> &Self {
        self.script
            .lock()
            .unwrap()
            .outcomes
            .entry(locator.to_string())
            .or_default()
            .extend(outcomes);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn calls_for(&self, locator: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.locator == locator).collect()
    }
}

#[async_trait]
impl ChapterSource for ScriptedSource {
    async fn load(&self, locator: &str, settle: Duration) -> PageOutcome {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call {
            locator: locator.to_string(),
            at: Instant::now(),
            settle,
        });
        script
            .outcomes
            .get_mut(locator)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| PageOutcome::Loaded(Some(payload_for(locator))))
    }
}

pub fn payload_for(locator: &str) -> String {
    format!("<p>{}</p>", locator)
}

pub fn context() -> SessionContext {
    SessionContext::from_url(BOOK_URL).unwrap()
}

pub fn locator(volume: u32, chapter: usize) -> String {
    format!("https://ranobelib.me/ru/77--novel/read/v{}/c{}", volume, chapter)
}

/// 第 1 卷的前 `count` 章
pub fn units(count: usize) -> Vec<UnitRef> {
    (0..count)
        .map(|id| UnitRef::new(id, format!("Том 1 Глава {}", id + 1), locator(1, id + 1)))
        .collect()
}

/// 没有随机抖动的设置，方便断言时间
pub fn quiet_settings() -> AcquisitionSettings {
    AcquisitionSettings {
        request_delay: Duration::from_millis(500),
        request_jitter: Duration::ZERO,
        ..Default::default()
    }
}

pub fn orchestrator(
    source: &ScriptedSource,
    progress_dir: &Path,
    settings: AcquisitionSettings,
) -> AcquisitionOrchestrator<ScriptedSource> {
    AcquisitionOrchestrator::new(
        ContentFetcher::new(source.clone(), FetchPolicy::default()),
        ProgressStore::new(progress_dir),
        settings,
    )
}

/// 直接读取进度文件的 JSON
pub fn read_progress(progress_dir: &Path, session_key: &str) -> Option<serde_json::Value> {
    let path = ProgressStore::new(progress_dir).path_for(session_key);
    let text = std::fs::read_to_string(path).ok()?;
    Some(serde_json::from_str(&text).unwrap())
}
