//! Mailbox document loading.
//!
//! Walks a user's source directory, picks a loader per file extension, and
//! turns each file into a [`LoadedDocument`]: plain text plus the stable
//! `source` key that full-text candidates are matched against.
//!
//! | Format | Source key | Notes |
//! |--------|------------|-------|
//! | `eml` | `Message-ID` header | multipart bodies prefer `text/plain`, fall back to stripped HTML |
//! | `json` | `mid` field | one mail record per file (`{"mid", "text", ...}`) |
//! | everything else | relative path | text via [`crate::extract`] or read as-is |
//!
//! Raw maildir messages have no extension (`1.`, `2.`, ...); they are read
//! as `extensionless_format` (email by default).

use anyhow::{bail, Context, Result};
use base64::Engine;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::IndexConfig;
use crate::extract;

/// Maximum multipart nesting followed when looking for a text body.
const MAX_MIME_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Eml,
    Json,
    Txt,
    Md,
    Html,
    Csv,
    Pdf,
    Docx,
    Pptx,
    Xlsx,
    Odt,
}

impl DocumentFormat {
    pub const ALL: [DocumentFormat; 11] = [
        DocumentFormat::Eml,
        DocumentFormat::Json,
        DocumentFormat::Txt,
        DocumentFormat::Md,
        DocumentFormat::Html,
        DocumentFormat::Csv,
        DocumentFormat::Pdf,
        DocumentFormat::Docx,
        DocumentFormat::Pptx,
        DocumentFormat::Xlsx,
        DocumentFormat::Odt,
    ];

    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            DocumentFormat::Eml => &["eml"],
            DocumentFormat::Json => &["json"],
            DocumentFormat::Txt => &["txt"],
            DocumentFormat::Md => &["md", "markdown"],
            DocumentFormat::Html => &["html", "htm"],
            DocumentFormat::Csv => &["csv"],
            DocumentFormat::Pdf => &["pdf"],
            DocumentFormat::Docx => &["docx"],
            DocumentFormat::Pptx => &["pptx"],
            DocumentFormat::Xlsx => &["xlsx"],
            DocumentFormat::Odt => &["odt"],
        }
    }

    /// Case-insensitive extension lookup.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.extensions().contains(&ext.as_str()))
    }
}

/// A file selected for loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Path relative to the scanned root, `/`-separated as walkdir reports it.
    pub relative: String,
    pub format: DocumentFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedDocument {
    pub source: String,
    pub path: String,
    pub text: String,
    pub date: Option<DateTime<Utc>>,
}

/// List loadable files under `root`, sorted by relative path.
///
/// A missing root yields an empty list; the caller decides whether that
/// is worth reporting.
pub fn scan_directory(root: &Path, config: &IndexConfig) -> Result<Vec<SourceFile>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut excludes = vec!["**/.git/**".to_string(), "**/.DS_Store".to_string()];
    excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) {
            continue;
        }

        let Some(format) = format_for(path, config) else {
            continue;
        };

        files.push(SourceFile {
            path: path.to_path_buf(),
            relative: rel_str,
            format,
        });
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

fn format_for(path: &Path, config: &IndexConfig) -> Option<DocumentFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty());
    let format = match ext {
        Some(ext) => DocumentFormat::from_extension(ext)?,
        None => config.extensionless_format?,
    };
    config.formats.contains(&format).then_some(format)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Read and convert one file.
pub fn load_document(file: &SourceFile) -> Result<LoadedDocument> {
    let bytes = std::fs::read(&file.path)
        .with_context(|| format!("Failed to read {}", file.path.display()))?;
    parse_document(&bytes, &file.relative, file.format)
}

/// Convert raw bytes of a known format. `relative` is used as the source
/// key when the format carries no identifier of its own.
pub fn parse_document(
    bytes: &[u8],
    relative: &str,
    format: DocumentFormat,
) -> Result<LoadedDocument> {
    let plain = |text: String| LoadedDocument {
        source: relative.to_string(),
        path: relative.to_string(),
        text,
        date: None,
    };

    let doc = match format {
        DocumentFormat::Eml => parse_email(&String::from_utf8_lossy(bytes), relative),
        DocumentFormat::Json => parse_mail_record(bytes, relative)?,
        DocumentFormat::Txt | DocumentFormat::Md => {
            plain(String::from_utf8_lossy(bytes).into_owned())
        }
        DocumentFormat::Html => plain(html_to_text(&String::from_utf8_lossy(bytes))),
        DocumentFormat::Csv => plain(csv_to_text(&String::from_utf8_lossy(bytes))),
        DocumentFormat::Pdf => plain(extract::extract_pdf(bytes)?),
        DocumentFormat::Docx => plain(extract::extract_docx(bytes)?),
        DocumentFormat::Pptx => plain(extract::extract_pptx(bytes)?),
        DocumentFormat::Xlsx => plain(extract::extract_xlsx(bytes)?),
        DocumentFormat::Odt => plain(extract::extract_odt(bytes)?),
    };
    Ok(doc)
}

// ============ Email ============

type Headers = Vec<(String, String)>;

enum Body {
    Plain(String),
    Html(String),
}

/// Parse an RFC 822 message. The text is the subject line followed by the
/// body; the source key is the `Message-ID`, or `relative` when absent.
pub fn parse_email(raw: &str, relative: &str) -> LoadedDocument {
    let raw = raw.replace("\r\n", "\n");
    let (headers, body) = split_message(&raw);

    let body = match body_text(&headers, body, 0) {
        Some(Body::Plain(text)) => text,
        Some(Body::Html(html)) => html_to_text(&html),
        None => String::new(),
    };

    let mut text = String::new();
    if let Some(subject) = header(&headers, "subject").filter(|s| !s.is_empty()) {
        text.push_str(subject);
    }
    let body = body.trim();
    if !body.is_empty() {
        if !text.is_empty() {
            text.push_str("\n\n");
        }
        text.push_str(body);
    }

    let source = header(&headers, "message-id")
        .filter(|id| !id.is_empty())
        .unwrap_or(relative)
        .to_string();

    LoadedDocument {
        source,
        path: relative.to_string(),
        text,
        date: header(&headers, "date").and_then(parse_mail_date),
    }
}

fn split_message(raw: &str) -> (Headers, &str) {
    let (head, body) = match raw.find("\n\n") {
        Some(i) => (&raw[..i], &raw[i + 2..]),
        None => (raw, ""),
    };

    let mut headers: Headers = Vec::new();
    for line in head.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            // Folded continuation of the previous header
            if let Some((_, value)) = headers.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }
    (headers, body)
}

fn header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

/// Split a `Content-Type` value into its lowercased MIME type and the
/// `boundary` parameter, if any.
fn content_type(headers: &Headers) -> (String, Option<String>) {
    let Some(value) = header(headers, "content-type") else {
        return ("text/plain".to_string(), None);
    };
    let mut parts = value.split(';');
    let mime = parts.next().unwrap_or("").trim().to_ascii_lowercase();
    let boundary = parts.find_map(|p| {
        let (key, val) = p.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("boundary")
            .then(|| val.trim().trim_matches('"').to_string())
    });
    (mime, boundary)
}

fn body_text(headers: &Headers, body: &str, depth: usize) -> Option<Body> {
    let (mime, boundary) = content_type(headers);

    if mime.starts_with("multipart/") {
        let boundary = boundary?;
        if depth >= MAX_MIME_DEPTH {
            return None;
        }
        let mut html = None;
        for part in multipart_parts(body, &boundary) {
            let (part_headers, part_body) = split_message(part);
            match body_text(&part_headers, part_body, depth + 1) {
                Some(Body::Plain(text)) => return Some(Body::Plain(text)),
                Some(Body::Html(h)) if html.is_none() => html = Some(h),
                _ => {}
            }
        }
        return html.map(Body::Html);
    }

    let is_attachment = header(headers, "content-disposition")
        .map(|d| d.to_ascii_lowercase().starts_with("attachment"))
        .unwrap_or(false);
    if is_attachment {
        return None;
    }

    let decoded = decode_transfer(headers, body);
    match mime.as_str() {
        "text/html" => Some(Body::Html(decoded)),
        "text/plain" | "" => Some(Body::Plain(decoded)),
        _ => None,
    }
}

fn multipart_parts<'a>(body: &'a str, boundary: &str) -> Vec<&'a str> {
    let delimiter = format!("--{}", boundary);
    let mut parts = Vec::new();
    for segment in body.split(delimiter.as_str()).skip(1) {
        if segment.starts_with("--") {
            break;
        }
        parts.push(segment.strip_prefix('\n').unwrap_or(segment));
    }
    parts
}

fn decode_transfer(headers: &Headers, body: &str) -> String {
    let encoding = header(headers, "content-transfer-encoding")
        .unwrap_or("")
        .to_ascii_lowercase();
    match encoding.as_str() {
        "quoted-printable" => decode_quoted_printable(body),
        "base64" => {
            let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
            match base64::engine::general_purpose::STANDARD.decode(compact) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    tracing::debug!(error = %e, "undecodable base64 body, keeping raw text");
                    body.to_string()
                }
            }
        }
        _ => body.to_string(),
    }
}

fn decode_quoted_printable(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'=' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        // Soft line break
        if bytes.get(i + 1) == Some(&b'\n') {
            i += 2;
            continue;
        }
        let hi = bytes.get(i + 1).and_then(|b| hex_value(*b));
        let lo = bytes.get(i + 2).and_then(|b| hex_value(*b));
        match (hi, lo) {
            (Some(hi), Some(lo)) => {
                out.push(hi << 4 | lo);
                i += 3;
            }
            _ => {
                out.push(b'=');
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// RFC 2822 date, tolerating the trailing zone comment Enron headers carry
/// (`Mon, 14 May 2001 16:39:00 -0700 (PDT)`).
fn parse_mail_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.split('(').next().unwrap_or(value).trim();
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

// ============ JSON mail records ============

#[derive(Deserialize)]
struct MailRecord {
    mid: serde_json::Value,
    #[serde(default)]
    text: String,
}

fn parse_mail_record(bytes: &[u8], relative: &str) -> Result<LoadedDocument> {
    let record: MailRecord = serde_json::from_slice(bytes)
        .with_context(|| format!("{} is not a mail record", relative))?;
    let source = match record.mid {
        serde_json::Value::String(s) if !s.is_empty() => s,
        serde_json::Value::Number(n) => n.to_string(),
        other => bail!("{}: unusable mid {}", relative, other),
    };
    Ok(LoadedDocument {
        source,
        path: relative.to_string(),
        text: record.text,
        date: None,
    })
}

// ============ HTML ============

const PARAGRAPH_TAGS: &[&str] = &[
    "p", "div", "table", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote",
];
const LINE_TAGS: &[&str] = &["br", "li", "td", "th"];

/// Strip tags, drop `<script>`/`<style>` content, and decode the common
/// entities. Block elements become paragraph breaks.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        let after = &rest[start..];
        let Some(end) = after.find('>') else {
            rest = "";
            break;
        };
        let closing = after[1..end].starts_with('/');
        let name = tag_name(&after[1..end]);
        rest = &after[end + 1..];

        if !closing && (name == "script" || name == "style") {
            // Drop the element body along with its closing tag.
            let close = format!("</{}", name);
            rest = match rest.to_ascii_lowercase().find(&close) {
                Some(i) => match rest[i..].find('>') {
                    Some(j) => &rest[i + j + 1..],
                    None => "",
                },
                None => "",
            };
            continue;
        }
        if PARAGRAPH_TAGS.contains(&name.as_str()) {
            out.push_str("\n\n");
        } else if LINE_TAGS.contains(&name.as_str()) {
            out.push('\n');
        }
    }
    out.push_str(rest);

    tidy_lines(&decode_entities(&out))
}

fn tag_name(tag: &str) -> String {
    tag.trim_start_matches('/')
        .split(|c: char| c.is_whitespace() || c == '/')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Collapse runs of spaces within lines and runs of blank lines into one
/// paragraph break.
fn tidy_lines(text: &str) -> String {
    let mut out = String::new();
    let mut pending_blank = false;
    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            pending_blank = true;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if pending_blank { "\n\n" } else { "\n" });
        }
        pending_blank = false;
        out.push_str(&line);
    }
    out
}

// ============ CSV ============

/// Render each data row as `header: value` lines, one paragraph per row.
fn csv_to_text(text: &str) -> String {
    let rows = parse_csv(text);
    let Some((header, data)) = rows.split_first() else {
        return String::new();
    };

    data.iter()
        .filter(|row| row.iter().any(|f| !f.trim().is_empty()))
        .map(|row| {
            row.iter()
                .enumerate()
                .map(|(i, value)| {
                    let name = header.get(i).map(|h| h.trim()).unwrap_or("");
                    format!("{}: {}", name, value.trim())
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}
