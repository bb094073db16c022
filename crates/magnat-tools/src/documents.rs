use std::sync::OnceLock;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use magnat_core::error::{MagnatError, Result};
use magnat_core::traits::DocumentStore;
use magnat_core::types::IngestReceipt;

fn script_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>")
            .expect("valid script/style pattern")
    })
}

fn tag_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"<[^>]+>").expect("valid tag pattern"))
}

fn word_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"\w+").expect("valid word pattern"))
}

/// One heading-delimited section of a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    /// Nearest heading above the section, if any.
    pub heading: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct Document {
    pub source: String,
    pub title: String,
    pub chunks: Vec<Chunk>,
}

/// A chunk returned by [`MemoryDocumentStore::search`].
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub title: String,
    pub heading: Option<String>,
    pub text: String,
    pub score: usize,
}

/// In-process rulebook library. Sources are URLs (fetched over HTTP) or
/// inline markdown, split into sections at headings.
pub struct MemoryDocumentStore {
    docs: RwLock<Vec<Document>>,
    client: reqwest::Client,
}

impl MemoryDocumentStore {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("Magnat/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MagnatError::DocumentStore(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            docs: RwLock::new(Vec::new()),
            client,
        })
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }

    /// Add already-fetched markdown. Re-adding a source replaces it.
    pub async fn add_markdown(&self, source: &str, markdown: &str) -> Result<IngestReceipt> {
        let chunks = chunk_markdown(markdown);
        if chunks.is_empty() {
            return Err(MagnatError::DocumentRejected(format!("'{}' has no text", source)));
        }
        let title = title_of(markdown).unwrap_or_else(|| source.to_string());
        let receipt = IngestReceipt {
            source: source.to_string(),
            title: Some(title.clone()),
            chunks: chunks.len(),
        };

        let mut docs = self.docs.write().await;
        docs.retain(|d| d.source != source);
        docs.push(Document {
            source: source.to_string(),
            title,
            chunks,
        });
        Ok(receipt)
    }

    /// Keyword search: sections ranked by how many query terms they contain.
    pub async fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        let terms: Vec<String> = word_re()
            .find_iter(&query.to_lowercase())
            .map(|m| m.as_str().to_string())
            .collect();
        if terms.is_empty() {
            return Vec::new();
        }

        let docs = self.docs.read().await;
        let mut hits: Vec<SearchHit> = docs
            .iter()
            .flat_map(|doc| {
                doc.chunks.iter().filter_map(|chunk| {
                    let haystack = format!(
                        "{} {}",
                        chunk.heading.as_deref().unwrap_or(""),
                        chunk.text
                    )
                    .to_lowercase();
                    let score = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                    (score > 0).then(|| SearchHit {
                        title: doc.title.clone(),
                        heading: chunk.heading.clone(),
                        text: chunk.text.clone(),
                        score,
                    })
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.cmp(&a.score));
        hits.truncate(limit);
        hits
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        debug!(url, "Fetching document");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MagnatError::DocumentStore(format!("Request failed: {}", e)))?;

        let status = resp.status();
        if status.is_client_error() {
            return Err(MagnatError::DocumentRejected(format!(
                "HTTP {} fetching {}",
                status.as_u16(),
                url
            )));
        }
        if !status.is_success() {
            return Err(MagnatError::DocumentStore(format!(
                "HTTP {} fetching {}",
                status.as_u16(),
                url
            )));
        }

        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !is_text_content(&content_type) {
            return Err(MagnatError::DocumentRejected(format!(
                "unsupported content type '{}' for {}",
                content_type, url
            )));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| MagnatError::DocumentStore(format!("Failed to read body: {}", e)))?;

        Ok(if content_type.contains("html") {
            strip_html(&body)
        } else {
            body
        })
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn ingest<'a>(&'a self, source: &'a str) -> BoxFuture<'a, Result<IngestReceipt>> {
        Box::pin(async move {
            let source = source.trim();
            let receipt = if is_url(source) {
                let body = self.fetch(source).await?;
                self.add_markdown(source, &body).await?
            } else {
                let label = title_of(source).unwrap_or_else(|| "inline document".to_string());
                self.add_markdown(&label, source).await?
            };
            info!(source = %receipt.source, chunks = receipt.chunks, "Document added");
            Ok(receipt)
        })
    }
}

/// Text, markdown and HTML bodies are accepted; PDF and other binaries are not.
fn is_text_content(content_type: &str) -> bool {
    content_type.is_empty() || content_type.starts_with("text/") || content_type.contains("markdown")
}

fn is_url(s: &str) -> bool {
    (s.starts_with("http://") || s.starts_with("https://")) && !s.contains(char::is_whitespace)
}

/// Heading text of a markdown line (`# Title` -> `Title`).
fn heading(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &trimmed[hashes..];
    if !rest.starts_with(' ') {
        return None;
    }
    let text = rest.trim();
    (!text.is_empty()).then_some(text)
}

/// First heading of the document.
fn title_of(markdown: &str) -> Option<String> {
    markdown.lines().find_map(heading).map(str::to_string)
}

/// Split markdown into sections at headings. Text before the first heading
/// becomes a section without a heading. Empty sections are dropped.
pub fn chunk_markdown(markdown: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut current: Option<String> = None;
    let mut body: Vec<&str> = Vec::new();
    let mut in_fence = false;

    let mut flush = |heading: Option<String>, body: &mut Vec<&str>| {
        let text = body.join("\n").trim().to_string();
        body.clear();
        if !text.is_empty() {
            chunks.push(Chunk { heading, text });
        }
    };

    for line in markdown.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        }
        match heading(line).filter(|_| !in_fence) {
            Some(h) => {
                flush(current.take(), &mut body);
                current = Some(h.to_string());
            }
            None => body.push(line),
        }
    }
    flush(current, &mut body);
    chunks
}

fn strip_html(html: &str) -> String {
    let cleaned = script_re().replace_all(html, "");
    let text = tag_re().replace_all(&cleaned, "");
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&nbsp;", " ")
}
