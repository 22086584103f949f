use regex::Regex;
use scraper::Html;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::attachments::DocumentKind;
use crate::error::ExtractError;

const HIDDEN_HTML_ELEMENTS: [&str; 6] = ["head", "script", "style", "noscript", "template", "title"];

fn ws_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("invalid ws regex"))
}

fn trim_text(s: &str) -> String {
    ws_re().replace_all(s.trim(), " ").trim().to_string()
}

/// Plain text of a document payload. Any error means "no text"; none of them is fatal.
pub fn extract_text(bytes: &[u8], kind: DocumentKind, temp_dir: &Path) -> Result<String, ExtractError> {
    match kind {
        DocumentKind::Pdf => extract_pdf_text(bytes, temp_dir),
        DocumentKind::Html => Ok(extract_html_text(&String::from_utf8_lossy(bytes))),
    }
}

fn find_last(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

fn has_key(section: &[u8], key: &[u8]) -> bool {
    section
        .windows(key.len() + 1)
        .any(|w| w.starts_with(key) && !w[key.len()].is_ascii_alphanumeric())
}

/// Trailer dictionary bytes: after the last `trailer` keyword, or for
/// cross-reference streams the object header that `startxref` points at.
fn trailer_section(bytes: &[u8]) -> &[u8] {
    if let Some(pos) = find_last(bytes, b"trailer") {
        return &bytes[pos..];
    }
    let Some(pos) = find_last(bytes, b"startxref") else {
        return &[];
    };
    let digits = bytes[pos + b"startxref".len()..]
        .iter()
        .skip_while(|b| b.is_ascii_whitespace())
        .take_while(|b| b.is_ascii_digit())
        .map(|b| char::from(*b))
        .collect::<String>();
    match digits.parse::<usize>() {
        Ok(offset) if offset < bytes.len() => {
            let section = &bytes[offset..];
            let end = section
                .windows(b"stream".len())
                .position(|w| w == b"stream")
                .unwrap_or(section.len());
            &section[..end]
        }
        _ => &[],
    }
}

/// True when the trailer declares an `/Encrypt` dictionary. Used when lopdf cannot open the file.
fn trailer_declares_encryption(bytes: &[u8]) -> bool {
    has_key(trailer_section(bytes), b"/Encrypt")
}

fn extract_pdf_text(bytes: &[u8], temp_dir: &Path) -> Result<String, ExtractError> {
    let doc = match lopdf::Document::load_mem(bytes) {
        Ok(doc) => doc,
        Err(_) if trailer_declares_encryption(bytes) => return Err(ExtractError::Encrypted),
        Err(e) => return Err(ExtractError::Corrupt(e.to_string())),
    };
    if doc.trailer.get(b"Encrypt").is_ok() {
        return Err(ExtractError::Encrypted);
    }
    let page_count = doc.get_pages().len();
    drop(doc);

    let mut tmp = tempfile::Builder::new()
        .prefix("invoice_")
        .suffix(".pdf")
        .tempfile_in(temp_dir)
        .map_err(|e| ExtractError::Unreadable(format!("create temp pdf: {e}")))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.flush())
        .map_err(|e| ExtractError::Unreadable(format!("write temp pdf: {e}")))?;

    let path = tmp.path().to_path_buf();
    let extracted = panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text(&path)));

    if let Err(e) = tmp.close() {
        warn!(error = %e, "failed to remove temp pdf");
    }

    let full_text = match extracted {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => return Err(ExtractError::Corrupt(e.to_string())),
        Err(_) => return Err(ExtractError::Corrupt("pdf text extraction panicked".to_string())),
    };
    debug!(pages = page_count, chars = full_text.len(), "pdf text extracted");

    Ok(full_text
        .split('\u{000C}')
        .map(str::trim)
        .filter(|page| !page.is_empty())
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Visible text of an HTML document, whitespace-normalised.
pub fn extract_html_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut chunks = Vec::new();
    for node in doc.tree.root().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .map(|el| HIDDEN_HTML_ELEMENTS.contains(&el.name()))
                .unwrap_or(false)
        });
        if hidden {
            continue;
        }
        let cleaned = trim_text(text);
        if !cleaned.is_empty() {
            chunks.push(cleaned);
        }
    }
    chunks.join(" ")
}


#[cfg(test)]
mod tests {
    use super::pdf_fixtures::*;
    use super::*;
    use uuid::Uuid;

    fn scratch_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("invoice_text_test_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create scratch dir");
        dir
    }

    fn dir_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).expect("read scratch dir").next().is_none()
    }

    #[test]
    fn pdf_text_is_extracted_and_temp_file_removed() {
        let dir = scratch_dir();
        let pdf = text_pdf(&["Zomato order", "Total Amount 420.50"]);
        let text = extract_text(&pdf, DocumentKind::Pdf, &dir).expect("extract pdf");
        assert!(text.contains("Zomato"), "text was {text:?}");
        assert!(text.contains("420.50"), "text was {text:?}");
        assert!(dir_is_empty(&dir));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn encrypted_pdf_is_skipped_not_failed() {
        let dir = scratch_dir();
        let err = extract_text(&encrypted_pdf(), DocumentKind::Pdf, &dir).expect_err("encrypted");
        assert!(matches!(err, ExtractError::Encrypted));
        assert_eq!(err.to_string(), "skipped: encrypted");
        assert!(dir_is_empty(&dir));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupt_pdf_is_recoverable() {
        let dir = scratch_dir();
        let err = extract_text(b"%PDF-1.4\nthis is not a pdf", DocumentKind::Pdf, &dir)
            .expect_err("corrupt");
        assert!(matches!(err, ExtractError::Corrupt(_)));
        assert!(dir_is_empty(&dir));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn encryption_is_read_from_the_trailer_only() {
        assert!(trailer_declares_encryption(b"1 0 obj << >> endobj\ntrailer << /Encrypt 5 0 R >>"));
        assert!(!trailer_declares_encryption(b"trailer << /EncryptMetadata false >>"));
        assert!(!trailer_declares_encryption(
            b"BT (/Encrypt your card) Tj ET\ntrailer << /Root 1 0 R >>"
        ));
        assert!(!trailer_declares_encryption(b"plain"));
    }

    #[test]
    fn encrypt_text_in_page_content_is_not_encryption() {
        let dir = scratch_dir();
        let pdf = text_pdf(&["Swiggy order /Encrypt your card", "Rs. 500"]);
        let text = extract_text(&pdf, DocumentKind::Pdf, &dir).expect("plain pdf");
        assert!(text.contains("Swiggy order"));
        assert!(dir_is_empty(&dir));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn html_text_drops_markup_and_hidden_elements() {
        let html = r#"<html><head><title>Receipt</title><style>.x{color:red}</style></head>
            <body><h1>Swiggy</h1><script>var t = 1;</script>
            <table><tr><td>Item total</td><td>₹ 450</td></tr></table></body></html>"#;
        let text = extract_html_text(html);
        assert_eq!(text, "Swiggy Item total ₹ 450");
    }
}
