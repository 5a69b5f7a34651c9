use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::unit::{UnitContent, UnitRef};

/// 一次获取会话的进度记录（从磁盘读取）
///
/// 每次保存都是完整覆盖，不记录增量
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquisitionProgress {
    pub timestamp: DateTime<Utc>,
    pub completed_count: usize,
    #[serde(rename = "chapters", default)]
    pub units: Vec<UnitContent>,
    #[serde(rename = "url", default)]
    pub source_url: Option<String>,
    #[serde(rename = "allChapters", default)]
    pub full_unit_list: Option<Vec<UnitRef>>,
}

/// 写入磁盘时使用的借用视图
///
/// 内容列表归编排层所有，存储层只负责序列化
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord<'a> {
    pub timestamp: DateTime<Utc>,
    pub completed_count: usize,
    #[serde(rename = "chapters")]
    pub units: &'a [UnitContent],
    #[serde(rename = "url", skip_serializing_if = "Option::is_none")]
    pub source_url: Option<&'a str>,
    #[serde(rename = "allChapters", skip_serializing_if = "Option::is_none")]
    pub full_unit_list: Option<&'a [UnitRef]>,
}

impl<'a> ProgressRecord<'a> {
    pub fn new(
        units: &'a [UnitContent],
        source_url: Option<&'a str>,
        full_unit_list: Option<&'a [UnitRef]>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            completed_count: units.len(),
            units,
            source_url,
            full_unit_list,
        }
    }
}
