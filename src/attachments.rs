use mailparse::{DispositionType, ParsedMail};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Html,
}

impl DocumentKind {
    pub fn mime_type(self) -> &'static str {
        match self {
            DocumentKind::Pdf => "application/pdf",
            DocumentKind::Html => "text/html",
        }
    }
}

/// A document payload found in a message part.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub kind: DocumentKind,
    pub bytes: Vec<u8>,
    pub filename: Option<String>,
}

/// Walks every part in document order. PDFs count only when disposed as attachments;
/// HTML parts only when `include_html` is set.
pub fn extract_candidates(mail: &ParsedMail, include_html: bool) -> Vec<Candidate> {
    fn walk(part: &ParsedMail, include_html: bool, out: &mut Vec<Candidate>) {
        let mime = part.ctype.mimetype.to_ascii_lowercase();
        if mime == "application/pdf" {
            let disposition = part.get_content_disposition();
            if disposition.disposition == DispositionType::Attachment {
                match part.get_body_raw() {
                    Ok(bytes) => out.push(Candidate {
                        kind: DocumentKind::Pdf,
                        bytes,
                        filename: disposition
                            .params
                            .get("filename")
                            .or_else(|| part.ctype.params.get("name"))
                            .cloned(),
                    }),
                    Err(e) => debug!(error = %e, "undecodable pdf part"),
                }
            }
        } else if include_html && mime == "text/html" {
            match part.get_body() {
                Ok(body) => out.push(Candidate {
                    kind: DocumentKind::Html,
                    bytes: body.into_bytes(),
                    filename: None,
                }),
                Err(e) => debug!(error = %e, "undecodable html part"),
            }
        }
        for sub in &part.subparts {
            walk(sub, include_html, out);
        }
    }

    let mut out = Vec::new();
    walk(mail, include_html, &mut out);
    out
}
