use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ranobe_epub::error::DiscoveryError;
use ranobe_epub::models::{ChapterEntry, ChapterKey};
use ranobe_epub::services::{ApiCatalog, ChapterCatalog, UnitDiscovery};
use ranobe_epub::SessionContext;

const BOOK_URL: &str = "https://ranobelib.me/ru/book/77--novel?section=chapters";

/// 返回固定章节的目录，记录调用次数
#[derive(Clone, Default)]
struct FixedCatalog {
    entries: Vec<ChapterEntry>,
    calls: Arc<AtomicUsize>,
}

impl FixedCatalog {
    fn with(entries: Vec<ChapterEntry>) -> Self {
        Self {
            entries,
            ..Default::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChapterCatalog for FixedCatalog {
    fn name(&self) -> &'static str {
        "固定目录"
    }

    async fn list(&self, _ctx: &SessionContext) -> anyhow::Result<Vec<ChapterEntry>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries.clone())
    }
}

fn entry(volume: u32, number: f64) -> ChapterEntry {
    ChapterEntry {
        key: ChapterKey::new(volume, number),
        title: format!("Том {} Глава {}", volume, number),
        locator: format!("https://ranobelib.me/ru/77--novel/read/v{}/c{}", volume, number),
    }
}

async fn api_server(status: u16, body: serde_json::Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/manga/77--novel/chapters"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(&server)
        .await;
    server
}

fn api(server: &MockServer) -> ApiCatalog {
    ApiCatalog::new(reqwest::Client::new(), format!("{}/api/manga/", server.uri()))
}

#[tokio::test]
async fn api_chapters_are_sorted_and_renumbered() {
    let server = api_server(
        200,
        json!({
            "data": [
                {"volume": "2", "number": "1", "name": "Новый том", "branches": [{"branch_id": 3}]},
                {"volume": "1", "number": "10", "branches": []},
                {"volume": "1", "number": "2", "branches": [{"branch_id": 9}, {"branch_id": 4}]},
                {"volume": "1", "number": "2.5", "name": "  "},
                {"volume": "x", "number": "1"}
            ]
        }),
    )
    .await;
    let fallback = FixedCatalog::default();
    let discovery = UnitDiscovery::new(api(&server), fallback.clone());

    let ctx = SessionContext::from_url(BOOK_URL).unwrap();
    let units = discovery.discover(&ctx).await.unwrap();

    let titles: Vec<&str> = units.iter().map(|u| u.title.as_str()).collect();
    assert_eq!(
        titles,
        vec![
            "Том 1 Глава 2",
            "Том 1 Глава 2.5",
            "Том 1 Глава 10",
            "Том 2 Глава 1 - Новый том",
        ]
    );
    assert_eq!(units.iter().map(|u| u.id).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    assert_eq!(units[0].locator, "https://ranobelib.me/ru/77--novel/read/v1/c2?bid=4");
    assert_eq!(units[2].locator, "https://ranobelib.me/ru/77--novel/read/v1/c10");
    assert_eq!(fallback.calls(), 0);
}

#[tokio::test]
async fn api_failure_falls_back_to_page_scan() {
    let server = api_server(500, json!({"message": "Server Error"})).await;
    let fallback = FixedCatalog::with(vec![entry(1, 3.0), entry(1, 1.0)]);
    let discovery = UnitDiscovery::new(api(&server), fallback.clone());

    let ctx = SessionContext::from_url(BOOK_URL).unwrap();
    let units = discovery.discover(&ctx).await.unwrap();

    assert_eq!(fallback.calls(), 1);
    assert_eq!(units.len(), 2);
    assert_eq!(units[0].key(), ChapterKey::new(1, 1.0));
    assert_eq!(units[0].id, 0);
}

#[tokio::test]
async fn empty_catalogs_report_no_units() {
    let server = api_server(200, json!({"data": []})).await;
    let discovery = UnitDiscovery::new(api(&server), FixedCatalog::default());

    let ctx = SessionContext::from_url(BOOK_URL).unwrap();
    let err = discovery.discover(&ctx).await.unwrap_err();

    assert!(matches!(err, DiscoveryError::NoUnits { .. }));
}

#[test]
fn book_locator_must_be_a_url() {
    assert!(matches!(
        SessionContext::from_url("77--novel"),
        Err(DiscoveryError::InvalidLocator { .. })
    ));

    let ctx = SessionContext::from_url(BOOK_URL).unwrap();
    assert_eq!(ctx.document_id, "77--novel");
    assert_eq!(ctx.document_url, "https://ranobelib.me/ru/book/77--novel");
}
