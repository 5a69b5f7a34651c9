use std::collections::VecDeque;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ranobe_epub::error::{AssemblyError, Tier};
use ranobe_epub::services::{ArtifactAssembler, AssemblyOptions, BookDocument, EpubPackager, PackageError, Packager};
use ranobe_epub::{BookMetadata, UnitContent};

/// 按顺序返回预设结果的打包器，记录每次收到的书
#[derive(Clone, Default)]
struct ScriptedPackager {
    results: Arc<Mutex<VecDeque<Result<(), PackageError>>>>,
    books: Arc<Mutex<Vec<(BookDocument, PathBuf)>>>,
    delay: Duration,
}

impl ScriptedPackager {
    fn new(results: impl IntoIterator<Item = Result<(), PackageError>>) -> Self {
        Self {
            results: Arc::new(Mutex::new(results.into_iter().collect())),
            ..Default::default()
        }
    }

    fn books(&self) -> Vec<(BookDocument, PathBuf)> {
        self.books.lock().unwrap().clone()
    }
}

#[async_trait]
impl Packager for ScriptedPackager {
    async fn package(&self, book: &BookDocument, output: &Path) -> Result<(), PackageError> {
        self.books.lock().unwrap().push((book.clone(), output.to_path_buf()));
        if !self.delay.is_zero() && book.images_enabled {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.results.lock().unwrap().pop_front();
        next.unwrap_or(Ok(()))
    }
}

fn metadata() -> BookMetadata {
    BookMetadata {
        title: "Новелла".to_string(),
        author: "Автор".to_string(),
        cover: Some("https://ranobelib.me/covers/77.jpg".to_string()),
        language: "ru".to_string(),
        toc_title: "Содержание".to_string(),
    }
}

fn chapters(body: &str) -> Vec<UnitContent> {
    (0..2)
        .map(|id| UnitContent {
            id,
            title: format!("Том 1 Глава {}", id + 1),
            payload: body.to_string(),
        })
        .collect()
}

fn options(dir: &Path, trusted: &[&str]) -> AssemblyOptions {
    AssemblyOptions {
        output_dir: dir.to_path_buf(),
        trusted_hosts: trusted.iter().map(|h| h.to_string()).collect(),
        ..Default::default()
    }
}

fn entry_names(path: &Path) -> Vec<String> {
    let file = std::fs::File::open(path).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

fn read_entry(path: &Path, name: &str) -> String {
    let file = std::fs::File::open(path).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut content = String::new();
    entry.read_to_string(&mut content).unwrap();
    content
}

#[tokio::test]
async fn connection_error_falls_back_to_degraded_output() {
    let dir = tempfile::tempdir().unwrap();
    let packager = ScriptedPackager::new([Err(PackageError::Connection("reset".to_string())), Ok(())]);
    let assembler = ArtifactAssembler::new(packager.clone(), options(dir.path(), &["ranobelib.me"]));

    let content = chapters(r#"<p>Текст</p><img src="https://ranobelib.me/i/1.png" alt="Карта">"#);
    let artifact = assembler.assemble(&content, &metadata(), "77--novel").await.unwrap();

    assert_eq!(artifact.tier, Tier::Degraded);
    assert_eq!(artifact.path, dir.path().join("77--novel_degraded.epub"));
    assert_eq!(artifact.chapter_count, 2);

    let books = packager.books();
    assert_eq!(books.len(), 2);
    assert!(books[0].0.images_enabled);
    assert_eq!(books[0].1, dir.path().join("77--novel.epub"));
    assert!(books[0].0.chapters[0].payload.contains("<img"));

    let (degraded, _) = &books[1];
    assert!(!degraded.images_enabled);
    assert!(degraded.metadata.cover.is_none());
    assert!(degraded.chapters.iter().all(|c| !c.payload.contains("<img")));
    assert!(degraded.chapters[0].payload.contains("Карта"));
}

#[tokio::test]
async fn other_package_errors_are_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let packager = ScriptedPackager::new([Err(PackageError::Invalid("broken".to_string()))]);
    let assembler = ArtifactAssembler::new(packager.clone(), options(dir.path(), &[]));

    let err = assembler
        .assemble(&chapters("<p>a</p>"), &metadata(), "77--novel")
        .await
        .unwrap_err();

    assert!(matches!(err, AssemblyError::Package { tier: Tier::Rich, .. }));
    assert_eq!(packager.books().len(), 1);
}

#[tokio::test]
async fn degraded_failure_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let packager = ScriptedPackager::new([
        Err(PackageError::Connection("reset".to_string())),
        Err(PackageError::Connection("reset again".to_string())),
    ]);
    let assembler = ArtifactAssembler::new(packager.clone(), options(dir.path(), &[]));

    let err = assembler
        .assemble(&chapters("<p>a</p>"), &metadata(), "77--novel")
        .await
        .unwrap_err();

    assert!(matches!(err, AssemblyError::Package { tier: Tier::Degraded, .. }));
    assert_eq!(packager.books().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn rich_timeout_counts_as_connection_failure() {
    let dir = tempfile::tempdir().unwrap();
    let packager = ScriptedPackager {
        delay: Duration::from_secs(600),
        ..Default::default()
    };
    let assembler = ArtifactAssembler::new(packager.clone(), options(dir.path(), &[]));

    let artifact = assembler
        .assemble(&chapters("<p>a</p>"), &metadata(), "77--novel")
        .await
        .unwrap();

    assert_eq!(artifact.tier, Tier::Degraded);
    assert_eq!(packager.books().len(), 2);
}

#[tokio::test]
async fn unsorted_content_is_rejected_before_packaging() {
    let dir = tempfile::tempdir().unwrap();
    let packager = ScriptedPackager::default();
    let assembler = ArtifactAssembler::new(packager.clone(), options(dir.path(), &[]));

    let mut content = chapters("<p>a</p>");
    content.reverse();
    let err = assembler.assemble(&content, &metadata(), "77--novel").await.unwrap_err();

    assert!(matches!(err, AssemblyError::OutOfOrder { previous: 1, next: 0 }));
    assert!(packager.books().is_empty());
}

#[tokio::test]
async fn rich_epub_embeds_downloaded_images() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/i/map.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "image/png")
                .set_body_bytes(vec![0x89, b'P', b'N', b'G']),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let assembler = ArtifactAssembler::new(
        EpubPackager::new(reqwest::Client::new()),
        options(dir.path(), &["127.0.0.1"]),
    );

    let body = format!(r#"<p>Текст</p><img src="{}/i/map.png" alt="Карта">"#, server.uri());
    let book = BookMetadata {
        cover: None,
        ..metadata()
    };
    let artifact = assembler.assemble(&chapters(&body), &book, "77--novel").await.unwrap();

    assert_eq!(artifact.tier, Tier::Rich);
    assert_eq!(artifact.path, dir.path().join("77--novel.epub"));

    let names = entry_names(&artifact.path);
    assert_eq!(names[0], "mimetype");
    assert!(names.iter().any(|n| n == "OEBPS/images/img_0001.png"));

    let chapter = read_entry(&artifact.path, "OEBPS/text/chapter_0001.xhtml");
    assert!(chapter.contains(r#"src="../images/img_0001.png""#));
    assert!(!chapter.contains("127.0.0.1"));
}

#[tokio::test]
async fn escaped_query_string_reaches_image_host_decoded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/i/map.png"))
        .and(query_param("w", "1"))
        .and(query_param("h", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "image/png")
                .set_body_bytes(vec![0x89, b'P', b'N', b'G']),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let assembler = ArtifactAssembler::new(
        EpubPackager::new(reqwest::Client::new()),
        options(dir.path(), &["127.0.0.1"]),
    );

    // 浏览器导出的 innerHTML 会把属性里的 & 写成 &amp;
    let body = format!(r#"<img src="{}/i/map.png?w=1&amp;h=2" alt="Карта">"#, server.uri());
    let content = vec![UnitContent {
        id: 0,
        title: "Том 1 Глава 1".to_string(),
        payload: body,
    }];
    let book = BookMetadata {
        cover: None,
        ..metadata()
    };
    let artifact = assembler.assemble(&content, &book, "77--novel").await.unwrap();

    assert_eq!(artifact.tier, Tier::Rich);
    let names = entry_names(&artifact.path);
    assert!(names.iter().any(|n| n == "OEBPS/images/img_0001.png"));
    let chapter = read_entry(&artifact.path, "OEBPS/text/chapter_0001.xhtml");
    assert!(chapter.contains(r#"src="../images/img_0001.png""#));
}

#[tokio::test]
async fn unreachable_image_host_produces_degraded_epub() {
    let dir = tempfile::tempdir().unwrap();
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    let assembler = ArtifactAssembler::new(EpubPackager::new(client), options(dir.path(), &["127.0.0.1"]));

    let body = r#"<p>Текст</p><img src="http://127.0.0.1:1/i/map.png" alt="Карта">"#;
    let book = BookMetadata {
        cover: None,
        ..metadata()
    };
    let artifact = assembler.assemble(&chapters(body), &book, "77--novel").await.unwrap();

    assert_eq!(artifact.tier, Tier::Degraded);
    assert!(artifact.path.ends_with("77--novel_degraded.epub"));
    assert!(!dir.path().join("77--novel.epub").exists());

    let names = entry_names(&artifact.path);
    assert!(!names.iter().any(|n| n.starts_with("OEBPS/images/")));
    let css = read_entry(&artifact.path, "OEBPS/style.css");
    assert!(css.contains("display: none"));
    let chapter = read_entry(&artifact.path, "OEBPS/text/chapter_0002.xhtml");
    assert!(chapter.contains("Карта"));
    assert!(!chapter.contains("<img"));
}
