//! 会话上下文
//!
//! 封装"我正在处理哪本书的哪一批章节"这一信息，创建后不再修改，逐层向下传递

use std::fmt::Display;

use reqwest::Url;

use crate::error::DiscoveryError;

/// 会话上下文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    /// 书籍页面地址（去掉查询参数）
    pub document_url: String,

    /// 书籍标识，取地址最后一段
    pub document_id: String,

    /// 站点根地址，例如 `https://ranobelib.me`
    pub origin: String,

    /// 进度文件使用的会话键
    pub session_key: String,

    /// 当前批次的卷号，整本处理时为 `None`
    pub volume: Option<u32>,
}

impl SessionContext {
    /// 从书籍地址创建上下文
    pub fn from_url(locator: &str) -> Result<Self, DiscoveryError> {
        let invalid = || DiscoveryError::InvalidLocator {
            locator: locator.to_string(),
        };

        let mut url = Url::parse(locator.trim()).map_err(|_| invalid())?;
        url.set_query(None);
        url.set_fragment(None);

        let document_id = url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(str::to_string)
            .ok_or_else(invalid)?;
        let host = url.host_str().ok_or_else(invalid)?;
        let origin = match url.port() {
            Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
            None => format!("{}://{}", url.scheme(), host),
        };

        Ok(Self {
            document_url: url.to_string(),
            session_key: document_id.clone(),
            document_id,
            origin,
            volume: None,
        })
    }

    /// 派生出某一卷的上下文，会话键加上 `_vol_<卷号>` 后缀
    pub fn for_volume(&self, volume: u32) -> Self {
        Self {
            session_key: volume_session_key(&self.document_id, volume),
            volume: Some(volume),
            ..self.clone()
        }
    }
}

/// 卷批次的会话键
pub fn volume_session_key(session_key: &str, volume: u32) -> String {
    format!("{}_vol_{}", session_key, volume)
}

impl Display for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.volume {
            Some(volume) => write!(f, "[书籍 {} 卷#{}]", self.document_id, volume),
            None => write!(f, "[书籍 {}]", self.document_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_query_and_takes_last_segment() {
        let ctx = SessionContext::from_url("https://ranobelib.me/ru/book/1234--some-novel?section=chapters").unwrap();
        assert_eq!(ctx.document_id, "1234--some-novel");
        assert_eq!(ctx.session_key, "1234--some-novel");
        assert_eq!(ctx.origin, "https://ranobelib.me");
        assert_eq!(ctx.document_url, "https://ranobelib.me/ru/book/1234--some-novel");
    }

    #[test]
    fn trailing_slash_is_ignored() {
        let ctx = SessionContext::from_url("https://ranobelib.me/sakurasou-no-pet-na-kanojo-novel/").unwrap();
        assert_eq!(ctx.document_id, "sakurasou-no-pet-na-kanojo-novel");
    }

    #[test]
    fn volume_context_suffixes_session_key() {
        let ctx = SessionContext::from_url("http://localhost:8080/book").unwrap();
        let vol = ctx.for_volume(3);
        assert_eq!(vol.session_key, "book_vol_3");
        assert_eq!(vol.document_id, "book");
        assert_eq!(vol.origin, "http://localhost:8080");
    }

    #[test]
    fn rejects_locator_without_path() {
        assert!(SessionContext::from_url("https://ranobelib.me/").is_err());
        assert!(SessionContext::from_url("not a url").is_err());
    }
}
