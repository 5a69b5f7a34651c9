//! EPUB 打包 - 业务能力层
//!
//! 把已经清理过的章节写成 EPUB 3 文件：
//!
//! ```text
//! mimetype                  (不压缩，必须是第一个条目)
//! META-INF/container.xml
//! OEBPS/content.opf
//! OEBPS/toc.ncx
//! OEBPS/nav.xhtml
//! OEBPS/style.css
//! OEBPS/text/chapter_0001.xhtml ...
//! OEBPS/images/...          (仅完整模式)
//! ```

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::Utc;
use phf::phf_map;
use regex::{Captures, Regex};
use thiserror::Error;
use tracing::{debug, info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::models::{BookMetadata, UnitContent};
use crate::services::sanitizer::{attr_value, escape_attr, img_re, DEGRADED_CSS};

/// 打包错误
#[derive(Debug, Error)]
pub enum PackageError {
    /// 下载图片或封面时连接失败
    #[error("网络连接错误: {0}")]
    Connection(String),
    #[error("下载失败，状态码 {status}: {url}")]
    Http { status: u16, url: String },
    #[error("文件写入失败: {0}")]
    Io(#[from] std::io::Error),
    #[error("压缩失败: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("无效的书籍内容: {0}")]
    Invalid(String),
}

impl PackageError {
    pub fn is_connection_class(&self) -> bool {
        matches!(self, PackageError::Connection(_))
    }
}

/// 待打包的书籍
#[derive(Debug, Clone)]
pub struct BookDocument {
    pub metadata: BookMetadata,
    /// 已按 id 升序排列的章节
    pub chapters: Vec<UnitContent>,
    /// 是否下载并嵌入图片
    pub images_enabled: bool,
}

/// 打包器
#[async_trait]
pub trait Packager: Send + Sync {
    async fn package(&self, book: &BookDocument, output: &Path) -> Result<(), PackageError>;
}

/// 扩展名 → 媒体类型
static MEDIA_TYPES: phf::Map<&'static str, &'static str> = phf_map! {
    "jpg" => "image/jpeg",
    "jpeg" => "image/jpeg",
    "png" => "image/png",
    "gif" => "image/gif",
    "webp" => "image/webp",
    "svg" => "image/svg+xml",
};

const BASE_CSS: &str = "body { font-family: serif; line-height: 1.5; margin: 0 5%; }\n\
h2 { text-align: center; margin: 1em 0; }\n\
p { text-indent: 1.5em; margin: 0.3em 0; }\n\
img { max-width: 100%; height: auto; }\n\
.image-placeholder { text-align: center; font-style: italic; color: #666; text-indent: 0; }\n";

/// 嵌入到书中的图片
#[derive(Debug, Clone)]
struct EmbeddedImage {
    /// 相对 OEBPS 的路径，例如 `images/img_0001.png`
    href: String,
    media_type: &'static str,
    data: Vec<u8>,
}

/// 基于 zip 的 EPUB 打包器
#[derive(Debug, Clone)]
pub struct EpubPackager {
    client: reqwest::Client,
}

impl EpubPackager {
    /// `client` 应当已经设置了单张图片的下载超时
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// 下载一张图片
    ///
    /// 连接类错误向上返回；非 2xx 或无法识别类型的图片返回 `None`，只丢掉这一张
    async fn download(&self, url: &str) -> Result<Option<(Vec<u8>, &'static str)>, PackageError> {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() => {
                warn!("⚠️ 图片地址无效，已跳过: {}", url);
                return Ok(None);
            }
            Err(e) => return Err(PackageError::Connection(format!("{}: {}", url, e))),
        };

        let status = response.status();
        if !status.is_success() {
            warn!(
                "⚠️ {}",
                PackageError::Http {
                    status: status.as_u16(),
                    url: url.to_string()
                }
            );
            return Ok(None);
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PackageError::Connection(format!("{}: {}", url, e)))?;

        match media_type_for(url, content_type.as_deref()) {
            Some(media_type) => Ok(Some((bytes.to_vec(), media_type))),
            None => {
                warn!("⚠️ 无法识别的图片类型，已跳过: {}", url);
                Ok(None)
            }
        }
    }

    /// 下载章节中出现的所有图片，返回 原地址 → 书内图片 的映射
    async fn collect_images(
        &self,
        chapters: &[UnitContent],
    ) -> Result<HashMap<String, EmbeddedImage>, PackageError> {
        let mut images: HashMap<String, EmbeddedImage> = HashMap::new();
        let mut skipped = 0usize;

        for chapter in chapters {
            for tag in img_re().find_iter(&chapter.payload) {
                let Some(src) = attr_value(tag.as_str(), "src") else {
                    continue;
                };
                if src.is_empty() || images.contains_key(&src) {
                    continue;
                }
                match self.download(&src).await? {
                    Some((data, media_type)) => {
                        let href = format!(
                            "images/img_{:04}.{}",
                            images.len() + 1,
                            extension_for(media_type)
                        );
                        debug!("图片已下载: {} → {}", src, href);
                        images.insert(
                            src,
                            EmbeddedImage {
                                href,
                                media_type,
                                data,
                            },
                        );
                    }
                    None => skipped += 1,
                }
            }
        }

        if skipped > 0 {
            warn!("⚠️ {} 张图片下载失败，已从书中移除", skipped);
        }
        Ok(images)
    }

    async fn collect_cover(&self, cover: Option<&str>) -> Result<Option<EmbeddedImage>, PackageError> {
        let Some(url) = cover.filter(|c| !c.trim().is_empty()) else {
            return Ok(None);
        };
        Ok(self.download(url).await?.map(|(data, media_type)| EmbeddedImage {
            href: format!("images/cover.{}", extension_for(media_type)),
            media_type,
            data,
        }))
    }
}

#[async_trait]
impl Packager for EpubPackager {
    async fn package(&self, book: &BookDocument, output: &Path) -> Result<(), PackageError> {
        if book.chapters.is_empty() {
            return Err(PackageError::Invalid("没有章节".to_string()));
        }

        let (images, cover) = if book.images_enabled {
            let images = self.collect_images(&book.chapters).await?;
            let cover = self.collect_cover(book.metadata.cover.as_deref()).await?;
            (images, cover)
        } else {
            (HashMap::new(), None)
        };

        let identifier = output
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| book.metadata.title.clone());
        let bytes = write_epub(book, &identifier, &images, cover.as_ref())?;

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output, bytes).await?;

        info!(
            "📦 EPUB 已写入: {} ({} 章, {} 张图片)",
            output.display(),
            book.chapters.len(),
            images.len()
        );
        Ok(())
    }
}

fn media_type_for(url: &str, content_type: Option<&str>) -> Option<&'static str> {
    if let Some(mime) = content_type.map(|c| c.split(';').next().unwrap_or(c).trim().to_lowercase()) {
        if let Some(known) = MEDIA_TYPES.values().find(|m| **m == mime) {
            return Some(*known);
        }
    }

    let path = reqwest::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    let ext = path.rsplit_once('.')?.1.to_lowercase();
    MEDIA_TYPES.get(ext.as_str()).copied()
}

fn extension_for(media_type: &str) -> &'static str {
    match media_type {
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        _ => "jpg",
    }
}

fn chapter_href(index: usize) -> String {
    format!("text/chapter_{:04}.xhtml", index + 1)
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// 把 HTML 片段转成 XHTML 可以接受的形式
///
/// - 空元素自闭合（`<br>` → `<br/>`）
/// - `&nbsp;` 换成数字实体
pub(crate) fn normalize_xhtml(html: &str) -> String {
    static VOID_RE: OnceLock<Regex> = OnceLock::new();
    let re = VOID_RE.get_or_init(|| {
        Regex::new(r"(?i)<(br|hr|img|input|meta|link|wbr|col|area|source)\b([^>]*?)\s*/?>")
            .expect("static regex")
    });
    re.replace_all(html, "<$1$2/>").replace("&nbsp;", "&#160;")
}

/// 把图片地址换成书内路径，下载失败的图片直接去掉
fn relink_images(html: &str, images: &HashMap<String, EmbeddedImage>) -> String {
    img_re()
        .replace_all(html, |caps: &Captures| {
            let tag = &caps[0];
            let embedded = attr_value(tag, "src").and_then(|src| images.get(&src));
            match embedded {
                Some(image) => format!(
                    r#"<img src="../{}" alt="{}"/>"#,
                    image.href,
                    escape_attr(&attr_value(tag, "alt").unwrap_or_default())
                ),
                None => String::new(),
            }
        })
        .into_owned()
}

fn chapter_xhtml(chapter: &UnitContent, language: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" lang="{lang}" xml:lang="{lang}">
<head>
<meta charset="UTF-8"/>
<title>{title}</title>
<link rel="stylesheet" type="text/css" href="../style.css"/>
</head>
<body>
<h2>{title}</h2>
{body}
</body>
</html>
"#,
        lang = xml_escape(language),
        title = xml_escape(&chapter.title),
        body = body
    )
}

fn container_xml() -> &'static str {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#
}

fn content_opf(
    book: &BookDocument,
    identifier: &str,
    images: &[&EmbeddedImage],
    cover: Option<&EmbeddedImage>,
) -> String {
    let meta = &book.metadata;
    let mut manifest = String::new();
    let mut spine = String::new();

    manifest.push_str(r#"    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>"#);
    manifest.push('\n');
    manifest.push_str(r#"    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>"#);
    manifest.push('\n');
    manifest.push_str(r#"    <item id="css" href="style.css" media-type="text/css"/>"#);
    manifest.push('\n');
    if let Some(cover) = cover {
        manifest.push_str(&format!(
            "    <item id=\"cover-image\" href=\"{}\" media-type=\"{}\" properties=\"cover-image\"/>\n",
            cover.href, cover.media_type
        ));
    }
    for (index, image) in images.iter().enumerate() {
        manifest.push_str(&format!(
            "    <item id=\"img{}\" href=\"{}\" media-type=\"{}\"/>\n",
            index + 1,
            image.href,
            image.media_type
        ));
    }
    for index in 0..book.chapters.len() {
        manifest.push_str(&format!(
            "    <item id=\"chapter{}\" href=\"{}\" media-type=\"application/xhtml+xml\"/>\n",
            index + 1,
            chapter_href(index)
        ));
        spine.push_str(&format!("    <itemref idref=\"chapter{}\"/>\n", index + 1));
    }

    let creator = if meta.author.trim().is_empty() {
        String::new()
    } else {
        format!("    <dc:creator>{}</dc:creator>\n", xml_escape(&meta.author))
    };
    let cover_meta = if cover.is_some() {
        "    <meta name=\"cover\" content=\"cover-image\"/>\n"
    } else {
        ""
    };

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="book-id">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="book-id">urn:ranobe-epub:{identifier}</dc:identifier>
    <dc:title>{title}</dc:title>
{creator}    <dc:language>{language}</dc:language>
    <meta property="dcterms:modified">{modified}</meta>
{cover_meta}  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine toc="ncx">
{spine}  </spine>
</package>
"#,
        identifier = xml_escape(identifier),
        title = xml_escape(&meta.title),
        creator = creator,
        language = xml_escape(&meta.language),
        modified = Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
        cover_meta = cover_meta,
        manifest = manifest,
        spine = spine
    )
}

fn toc_ncx(book: &BookDocument, identifier: &str) -> String {
    let points: String = book
        .chapters
        .iter()
        .enumerate()
        .map(|(index, chapter)| {
            format!(
                "    <navPoint id=\"navpoint-{n}\" playOrder=\"{n}\">\n      <navLabel><text>{title}</text></navLabel>\n      <content src=\"{href}\"/>\n    </navPoint>\n",
                n = index + 1,
                title = xml_escape(&chapter.title),
                href = chapter_href(index)
            )
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="urn:ranobe-epub:{identifier}"/>
    <meta name="dtb:depth" content="1"/>
  </head>
  <docTitle><text>{title}</text></docTitle>
  <navMap>
{points}  </navMap>
</ncx>
"#,
        identifier = xml_escape(identifier),
        title = xml_escape(&book.metadata.title),
        points = points
    )
}

fn nav_xhtml(book: &BookDocument) -> String {
    let items: String = book
        .chapters
        .iter()
        .enumerate()
        .map(|(index, chapter)| {
            format!(
                "      <li><a href=\"{}\">{}</a></li>\n",
                chapter_href(index),
                xml_escape(&chapter.title)
            )
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" lang="{lang}" xml:lang="{lang}">
<head>
<meta charset="UTF-8"/>
<title>{toc}</title>
</head>
<body>
  <nav epub:type="toc" id="toc">
    <h1>{toc}</h1>
    <ol>
{items}    </ol>
  </nav>
</body>
</html>
"#,
        lang = xml_escape(&book.metadata.language),
        toc = xml_escape(&book.metadata.toc_title),
        items = items
    )
}

/// 在内存中生成整个 EPUB 文件
fn write_epub(
    book: &BookDocument,
    identifier: &str,
    images: &HashMap<String, EmbeddedImage>,
    cover: Option<&EmbeddedImage>,
) -> Result<Vec<u8>, PackageError> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let stored = FileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file("mimetype", stored)?;
    zip.write_all(b"application/epub+zip")?;

    zip.start_file("META-INF/container.xml", deflated)?;
    zip.write_all(container_xml().as_bytes())?;

    let mut ordered_images: Vec<&EmbeddedImage> = images.values().collect();
    ordered_images.sort_by(|a, b| a.href.cmp(&b.href));

    zip.start_file("OEBPS/content.opf", deflated)?;
    zip.write_all(content_opf(book, identifier, &ordered_images, cover).as_bytes())?;

    zip.start_file("OEBPS/toc.ncx", deflated)?;
    zip.write_all(toc_ncx(book, identifier).as_bytes())?;

    zip.start_file("OEBPS/nav.xhtml", deflated)?;
    zip.write_all(nav_xhtml(book).as_bytes())?;

    let mut css = BASE_CSS.to_string();
    if !book.images_enabled {
        css.push_str(DEGRADED_CSS);
    }
    zip.start_file("OEBPS/style.css", deflated)?;
    zip.write_all(css.as_bytes())?;

    for (index, chapter) in book.chapters.iter().enumerate() {
        let body = if book.images_enabled {
            relink_images(&chapter.payload, images)
        } else {
            chapter.payload.clone()
        };
        let xhtml = chapter_xhtml(chapter, &book.metadata.language, &normalize_xhtml(&body));
        zip.start_file(format!("OEBPS/{}", chapter_href(index)), deflated)?;
        zip.write_all(xhtml.as_bytes())?;
    }

    for image in cover.into_iter().chain(ordered_images.iter().copied()) {
        zip.start_file(format!("OEBPS/{}", image.href), stored)?;
        zip.write_all(&image.data)?;
    }

    let cursor = zip.finish()?;
    Ok(cursor.into_inner())
}
