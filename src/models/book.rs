use serde::{Deserialize, Serialize};

/// 书籍元数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookMetadata {
    pub title: String,
    pub author: String,
    /// 封面图片地址，可能为空
    pub cover: Option<String>,
    pub language: String,
    /// 目录标题
    pub toc_title: String,
}

impl BookMetadata {
    /// 抓取失败时使用的最小元数据
    pub fn fallback(document_id: &str, language: &str, toc_title: &str) -> Self {
        Self {
            title: document_id.to_string(),
            author: String::new(),
            cover: None,
            language: language.to_string(),
            toc_title: toc_title.to_string(),
        }
    }
}
