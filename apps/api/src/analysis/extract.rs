//! Document text extraction for uploaded CVs (PDF and DOCX).
//!
//! Parsing is CPU-bound and runs on the blocking pool under a timeout. A file
//! whose magic bytes do not match its declared type yields empty text, which
//! the caller rejects as insufficient.

use std::io::{Cursor, Read};
use std::sync::OnceLock;
use std::time::Duration;

use bytes::Bytes;
use regex::{Captures, Regex};
use tracing::{debug, warn};

use crate::errors::AppError;

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const MIN_EXTRACTED_CHARS: usize = 50;

pub const PDF_MIME: &str = "application/pdf";
pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

const PDF_MAGIC: &[u8] = b"%PDF-";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const DOCX_BODY_PART: &str = "word/document.xml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
}

impl DocumentKind {
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.split(';').next().map(str::trim) {
            Some(PDF_MIME) => Some(DocumentKind::Pdf),
            Some(DOCX_MIME) => Some(DocumentKind::Docx),
            _ => None,
        }
    }
}

/// Extracts plain text off the async executor, bounded by `timeout`.
pub async fn extract_text(
    kind: DocumentKind,
    data: Bytes,
    timeout: Duration,
) -> Result<String, AppError> {
    let task = tokio::task::spawn_blocking(move || extract_text_blocking(kind, &data));

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result.map_err(AppError::Extraction),
        Ok(Err(join_err)) => Err(AppError::Extraction(format!(
            "{kind:?} parser panicked: {join_err}"
        ))),
        Err(_) => {
            warn!("{kind:?} extraction exceeded {}s", timeout.as_secs());
            Err(AppError::Extraction(format!(
                "{kind:?} extraction timed out after {}s",
                timeout.as_secs()
            )))
        }
    }
}

pub fn extract_text_blocking(kind: DocumentKind, data: &[u8]) -> Result<String, String> {
    match kind {
        DocumentKind::Pdf => {
            if !data.starts_with(PDF_MAGIC) {
                debug!("upload declared as PDF lacks a PDF header");
                return Ok(String::new());
            }
            pdf_extract::extract_text_from_mem(data)
                .map_err(|e| format!("PDF extraction error: {e}"))
        }
        DocumentKind::Docx => {
            if !data.starts_with(ZIP_MAGIC) {
                debug!("upload declared as DOCX is not a zip archive");
                return Ok(String::new());
            }
            extract_docx(data)
        }
    }
}

/// Rejects text too short to analyze.
pub fn ensure_sufficient(text: &str) -> Result<(), AppError> {
    if text.trim().chars().count() < MIN_EXTRACTED_CHARS {
        return Err(AppError::Validation(
            "Could not extract sufficient text from the file.".to_string(),
        ));
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// DOCX
// ────────────────────────────────────────────────────────────────────────────

fn docx_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"(?s:<w:tabs\b.*?</w:tabs>)",
            r"|<w:t(?:\s[^>]*)?>([^<]*)</w:t>",
            r"|</w:p>|<w:tab\b[^>]*/>|<w:br\b[^>]*/>",
        ))
        .expect("valid docx token regex")
    })
}

fn extract_docx(data: &[u8]) -> Result<String, String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(data)).map_err(|e| format!("DOCX archive error: {e}"))?;
    let mut part = archive
        .by_name(DOCX_BODY_PART)
        .map_err(|e| format!("DOCX body missing: {e}"))?;
    let mut xml = String::new();
    part.read_to_string(&mut xml)
        .map_err(|e| format!("DOCX body unreadable: {e}"))?;
    Ok(docx_xml_to_text(&xml))
}

fn entity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"&(?:#([0-9]+)|#[xX]([0-9A-Fa-f]+)|(lt|gt|quot|apos|amp));")
            .expect("valid xml entity regex")
    })
}

/// Flattens WordprocessingML runs into text: paragraphs and breaks become
/// newlines, run tabs become tabs. Tab-stop definitions are skipped.
pub fn docx_xml_to_text(xml: &str) -> String {
    let mut out = String::new();
    for caps in docx_token_re().captures_iter(xml) {
        let token = &caps[0];
        match caps.get(1) {
            Some(run) => out.push_str(&unescape_xml(run.as_str())),
            None if token.starts_with("<w:tabs") => {}
            None if token.starts_with("<w:tab") => out.push('\t'),
            None => out.push('\n'),
        }
    }
    out.trim().to_string()
}

/// Decodes the predefined entities and numeric character references in one
/// pass. A reference to an invalid code point is kept verbatim.
fn unescape_xml(text: &str) -> String {
    entity_re()
        .replace_all(text, |caps: &Captures<'_>| {
            let code = match (caps.get(1), caps.get(2)) {
                (Some(dec), _) => dec.as_str().parse::<u32>().ok(),
                (_, Some(hex)) => u32::from_str_radix(hex.as_str(), 16).ok(),
                _ => {
                    return match &caps[3] {
                        "lt" => "<",
                        "gt" => ">",
                        "quot" => "\"",
                        "apos" => "'",
                        _ => "&",
                    }
                    .to_string()
                }
            };
            code.and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
