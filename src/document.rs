/*!
 * Text extraction from stored source files.
 *
 * Emails are parsed with `mailparse`, PDFs read with `lopdf`. A PDF
 * without a text layer is treated as a scan: its embedded JPEG page
 * images go to the vision model instead.
 */

use log::{debug, warn};
use lopdf::{Document, Object};
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::database::models::{format_timestamp, IntakeFileRecord};
use crate::errors::DocumentError;
use crate::file_utils::{FileKind, FileManager};
use crate::providers::ImageInput;

/// Images larger than this are not sent to the vision model
const MAX_IMAGE_BYTES: usize = 15 * 1024 * 1024;

/// Scanned PDFs contribute at most this many page images
const MAX_SCANNED_PAGES: usize = 5;

/// Header fields of a parsed email
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmailMeta {
    pub subject: Option<String>,
    pub from_name: Option<String>,
    pub from_email: Option<String>,
    /// RFC 3339, UTC
    pub date: Option<String>,
    pub message_id: Option<String>,
}

/// A file attached to an email
#[derive(Debug, Clone)]
pub struct EmailAttachment {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Result of parsing an RFC 822 message
#[derive(Debug, Clone)]
pub struct ParsedEmail {
    pub meta: EmailMeta,
    /// Plain-text body (HTML stripped when there is no text part)
    pub body: String,
    pub attachments: Vec<EmailAttachment>,
}

/// What the extractors get to see of one file
#[derive(Debug, Clone)]
pub struct DocumentContent {
    pub filename: String,
    pub kind: FileKind,
    pub text: String,
    pub images: Vec<ImageInput>,
    pub email: Option<EmailMeta>,
    /// PDF without a text layer
    pub scanned: bool,
}

impl DocumentContent {
    fn empty(filename: &str, kind: FileKind) -> Self {
        Self {
            filename: filename.to_string(),
            kind,
            text: String::new(),
            images: Vec::new(),
            email: None,
            scanned: false,
        }
    }

    /// Neither text nor images
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.images.is_empty()
    }
}

/// Read a stored intake file and turn it into `DocumentContent`
pub fn load_document(file: &IntakeFileRecord) -> Result<DocumentContent, DocumentError> {
    let bytes = FileManager::read_bytes(&file.storage_path).map_err(|e| DocumentError::Storage {
        path: file.storage_path.clone(),
        message: e.to_string(),
    })?;
    document_from_bytes(&file.filename, file.kind, &file.mime_type, &bytes)
}

/// Turn raw bytes of a known kind into `DocumentContent`
pub fn document_from_bytes(
    filename: &str,
    kind: FileKind,
    mime_type: &str,
    bytes: &[u8],
) -> Result<DocumentContent, DocumentError> {
    let mut content = DocumentContent::empty(filename, kind);

    match kind {
        FileKind::Email => {
            let parsed = parse_email(bytes)?;
            content.text = email_text(&parsed);
            content.email = Some(parsed.meta);
        }
        FileKind::Pdf => {
            let doc = Document::load_mem(bytes).map_err(|e| DocumentError::Pdf(e.to_string()))?;
            content.text = pdf_text(&doc);
            if content.text.trim().is_empty() {
                content.scanned = true;
                content.images = pdf_page_images(&doc);
                debug!(
                    "{} has no text layer, {} page image(s) found",
                    filename,
                    content.images.len()
                );
            }
        }
        FileKind::Image => {
            if bytes.len() > MAX_IMAGE_BYTES {
                warn!("Skipping {} for vision: {} bytes is too large", filename, bytes.len());
            } else {
                content.images.push(ImageInput::from_bytes(mime_type, bytes));
            }
        }
        FileKind::Text => {
            content.text = String::from_utf8_lossy(bytes).into_owned();
        }
        FileKind::Other => {}
    }

    Ok(content)
}

// ============================================================================
// Email
// ============================================================================

/// Parse an RFC 822 message
pub fn parse_email(bytes: &[u8]) -> Result<ParsedEmail, DocumentError> {
    let mail = mailparse::parse_mail(bytes).map_err(|e| DocumentError::Email(e.to_string()))?;

    let (from_name, from_email) = mail
        .headers
        .get_first_value("From")
        .map(|raw| parse_address(&raw))
        .unwrap_or((None, None));

    let meta = EmailMeta {
        subject: non_empty(mail.headers.get_first_value("Subject")),
        from_name,
        from_email,
        date: mail
            .headers
            .get_first_value("Date")
            .and_then(|raw| mailparse::dateparse(&raw).ok())
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .map(format_timestamp),
        message_id: non_empty(mail.headers.get_first_value("Message-ID"))
            .map(|id| id.trim_matches(|c| c == '<' || c == '>').to_string()),
    };

    let mut plain: Option<String> = None;
    let mut html: Option<String> = None;
    let mut attachments = Vec::new();
    walk_parts(&mail, &mut plain, &mut html, &mut attachments)?;

    let body = plain
        .or_else(|| html.map(|h| html_to_text(&h)))
        .unwrap_or_default();

    Ok(ParsedEmail {
        meta,
        body: body.trim().to_string(),
        attachments,
    })
}

fn walk_parts(
    part: &ParsedMail,
    plain: &mut Option<String>,
    html: &mut Option<String>,
    attachments: &mut Vec<EmailAttachment>,
) -> Result<(), DocumentError> {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            walk_parts(sub, plain, html, attachments)?;
        }
        return Ok(());
    }

    let mime_type = part.ctype.mimetype.to_lowercase();
    let disposition = part.get_content_disposition();
    let filename = disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .cloned();

    let is_attachment = matches!(disposition.disposition, DispositionType::Attachment)
        || (filename.is_some() && !mime_type.starts_with("text/"));

    if is_attachment {
        let bytes = part
            .get_body_raw()
            .map_err(|e| DocumentError::Email(e.to_string()))?;
        let filename = filename.unwrap_or_else(|| {
            let extension = mime_guess::get_mime_extensions_str(&mime_type)
                .and_then(|exts| exts.first().copied())
                .unwrap_or("bin");
            format!("attachment-{}.{}", attachments.len() + 1, extension)
        });
        attachments.push(EmailAttachment {
            filename,
            mime_type,
            bytes,
        });
        return Ok(());
    }

    match mime_type.as_str() {
        "text/plain" if plain.is_none() => {
            *plain = Some(part.get_body().map_err(|e| DocumentError::Email(e.to_string()))?);
        }
        "text/html" if html.is_none() => {
            *html = Some(part.get_body().map_err(|e| DocumentError::Email(e.to_string()))?);
        }
        _ => {}
    }
    Ok(())
}

/// `Name <addr>` into its parts
fn parse_address(raw: &str) -> (Option<String>, Option<String>) {
    match mailparse::addrparse(raw) {
        Ok(list) => match list.iter().next() {
            Some(mailparse::MailAddr::Single(info)) => (
                non_empty(info.display_name.clone()),
                Some(info.addr.trim().to_lowercase()),
            ),
            Some(mailparse::MailAddr::Group(group)) => (
                None,
                group.addrs.first().map(|info| info.addr.trim().to_lowercase()),
            ),
            None => (None, None),
        },
        Err(_) => (None, None),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Header block plus body, the way the extractors read an email
fn email_text(parsed: &ParsedEmail) -> String {
    let mut text = String::new();
    if let Some(subject) = &parsed.meta.subject {
        text.push_str(&format!("Subject: {}\n", subject));
    }
    match (&parsed.meta.from_name, &parsed.meta.from_email) {
        (Some(name), Some(email)) => text.push_str(&format!("From: {} <{}>\n", name, email)),
        (None, Some(email)) => text.push_str(&format!("From: {}\n", email)),
        _ => {}
    }
    if !parsed.attachments.is_empty() {
        let names: Vec<&str> = parsed.attachments.iter().map(|a| a.filename.as_str()).collect();
        text.push_str(&format!("Attachments: {}\n", names.join(", ")));
    }
    text.push('\n');
    text.push_str(&parsed.body);
    text
}

static SCRIPT_STYLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(?:script|style)[^>]*>.*?</(?:script|style)>").unwrap());
static BLOCK_END_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<br\s*/?>|</(?:p|div|tr|li|h[1-6])>").unwrap());
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static BLANK_LINES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*(?:\n[ \t]*)+").unwrap());

/// Crude HTML to text: drop scripts and tags, keep line structure
pub fn html_to_text(html: &str) -> String {
    let text = SCRIPT_STYLE_RE.replace_all(html, "");
    let text = BLOCK_END_RE.replace_all(&text, "\n");
    let text = TAG_RE.replace_all(&text, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    let lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    BLANK_LINES_RE
        .replace_all(&lines.join("\n"), "\n\n")
        .trim()
        .to_string()
}

// ============================================================================
// PDF
// ============================================================================

/// Text layer of every page, in page order
fn pdf_text(doc: &Document) -> String {
    let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
    let mut text = String::new();
    for page in pages {
        match doc.extract_text(&[page]) {
            Ok(page_text) => {
                text.push_str(&page_text);
                text.push('\n');
            }
            Err(e) => debug!("No text on page {}: {}", page, e),
        }
    }
    text
}

/// Largest embedded JPEG of each page
///
/// Walks page dict, then /Resources, then /XObject, keeping DCTDecode
/// image streams, whose content is a complete JPEG file.
fn pdf_page_images(doc: &Document) -> Vec<ImageInput> {
    doc.page_iter()
        .take(MAX_SCANNED_PAGES)
        .filter_map(|page_id| largest_page_jpeg(doc, page_id))
        .filter(|jpeg| jpeg.len() <= MAX_IMAGE_BYTES)
        .map(|jpeg| ImageInput::from_bytes("image/jpeg", &jpeg))
        .collect()
}

fn largest_page_jpeg(doc: &Document, page_id: lopdf::ObjectId) -> Option<Vec<u8>> {
    let page = doc.get_object(page_id).ok()?.as_dict().ok()?;
    let resources = resolve(doc, page.get(b"Resources").ok()?).as_dict().ok()?;
    let xobjects = resolve(doc, resources.get(b"XObject").ok()?).as_dict().ok()?;

    xobjects
        .iter()
        .filter_map(|(_, obj)| match resolve(doc, obj) {
            Object::Stream(stream) if is_jpeg_image(&stream.dict) => Some(stream.content.clone()),
            _ => None,
        })
        .max_by_key(Vec::len)
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

fn is_jpeg_image(dict: &lopdf::Dictionary) -> bool {
    let is_image = matches!(dict.get(b"Subtype"), Ok(Object::Name(n)) if n == b"Image");
    let is_dct = match dict.get(b"Filter") {
        Ok(Object::Name(n)) => n == b"DCTDecode",
        Ok(Object::Array(filters)) => {
            filters.len() == 1 && matches!(&filters[0], Object::Name(n) if n == b"DCTDecode")
        }
        _ => false,
    };
    is_image && is_dct
}
