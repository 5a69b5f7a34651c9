use std::cmp::Ordering;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// 一个可获取的章节
///
/// `id` 从 0 开始连续递增，是下游唯一的排序依据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRef {
    pub id: usize,
    pub title: String,
    /// 章节阅读页地址
    #[serde(rename = "link")]
    pub locator: String,
}

impl UnitRef {
    pub fn new(id: usize, title: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            locator: locator.into(),
        }
    }

    /// 卷号与章节号，优先从地址解析，其次从标题解析
    pub fn key(&self) -> ChapterKey {
        ChapterKey::from_locator(&self.locator)
            .or_else(|| ChapterKey::from_title(&self.title))
            .unwrap_or_default()
    }
}

/// 已获取的章节内容，创建后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitContent {
    pub id: usize,
    pub title: String,
    /// 正文 HTML
    #[serde(rename = "data")]
    pub payload: String,
}

impl UnitContent {
    pub fn new(unit: &UnitRef, payload: String) -> Self {
        Self {
            id: unit.id,
            title: unit.title.clone(),
            payload,
        }
    }
}

/// 章节排序键：(卷号, 章节号)
///
/// 章节号可能带小数（例如 `10.5` 番外），按数值比较
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChapterKey {
    pub volume: u32,
    pub number: f64,
}

impl ChapterKey {
    pub fn new(volume: u32, number: f64) -> Self {
        Self { volume, number }
    }

    /// 从形如 `.../read/v2/c15.5` 的地址解析
    pub fn from_locator(locator: &str) -> Option<Self> {
        static LINK_RE: OnceLock<Regex> = OnceLock::new();
        let re = LINK_RE
            .get_or_init(|| Regex::new(r"/v(\d+)/c(\d+(?:\.\d+)?)").expect("static regex"));
        let caps = re.captures(locator)?;
        Some(Self {
            volume: caps[1].parse().ok()?,
            number: caps[2].parse().ok()?,
        })
    }

    /// 从形如 `Том 2 Глава 15` 的标题解析，没有章节号时取 0
    pub fn from_title(title: &str) -> Option<Self> {
        static TITLE_RE: OnceLock<Regex> = OnceLock::new();
        let re = TITLE_RE.get_or_init(|| {
            Regex::new(r"Том\s+(\d+)(?:\s+Глава\s+(\d+(?:\.\d+)?))?").expect("static regex")
        });
        let caps = re.captures(title)?;
        Some(Self {
            volume: caps[1].parse().ok()?,
            number: caps
                .get(2)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0.0),
        })
    }
}

impl Eq for ChapterKey {}

impl PartialOrd for ChapterKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChapterKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.volume
            .cmp(&other.volume)
            .then_with(|| self.number.total_cmp(&other.number))
    }
}

/// 发现阶段得到的原始章节记录，尚未排序和编号
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterEntry {
    pub key: ChapterKey,
    pub title: String,
    pub locator: String,
}

/// 按 (卷号, 章节号) 排序并从 0 重新编号
///
/// 排序是稳定的，键相同的章节保持来源顺序
pub fn order_units(mut entries: Vec<ChapterEntry>) -> Vec<UnitRef> {
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    entries
        .into_iter()
        .enumerate()
        .map(|(id, entry)| UnitRef::new(id, entry.title, entry.locator))
        .collect()
}

/// 反序列化字符串或数字为字符串（章节 API 中卷号、章节号两种写法都有）
pub(crate) fn deserialize_number_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Visitor;
    use std::fmt;

    struct NumberVisitor;

    impl<'de> Visitor<'de> for NumberVisitor {
        type Value = String;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or number")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value.trim().to_string())
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value.to_string())
        }
    }

    deserializer.deserialize_any(NumberVisitor)
}
