//! MIME-aware content extraction.
//!
//! Turns raw RFC 5322 bytes into [`NormalizedContent`]. Extraction never fails:
//! unparsable input, missing headers and undecodable payloads all degrade to
//! empty strings.

use std::sync::LazyLock;

use mail_parser::{MessageParser, MessagePart, MimeHeaders, PartType};
use regex::Regex;
use tracing::debug;
use uuid::Uuid;

use crate::pipeline::types::{Attachment, NormalizedContent};

static MARKUP_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<\s*(!doctype|html|head|body|div|p|br|table|span|a|font|img|style)\b")
        .expect("valid markup regex")
});

static SCRIPT_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>").expect("valid regex")
});

/// Which text part types count as a message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Plain,
    Html,
}

/// Extracts subject, sender, body text and attachments from raw messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentExtractor {
    /// Also accept `text/html` parts when scanning a multipart message.
    scan_html: bool,
}

impl ContentExtractor {
    pub fn new(scan_html: bool) -> Self {
        Self { scan_html }
    }

    /// Extract normalized content from a raw message.
    pub fn extract(&self, raw: &[u8]) -> NormalizedContent {
        let Some(parsed) = MessageParser::default().parse(raw) else {
            debug!(len = raw.len(), "Unparsable message, extracting nothing");
            return NormalizedContent {
                message_id: generated_id(),
                ..Default::default()
            };
        };

        let subject = parsed.subject().unwrap_or("").to_string();
        let sender = extract_sender(&parsed);
        let message_id = parsed
            .message_id()
            .map(|s| s.to_string())
            .unwrap_or_else(generated_id);

        let root = parsed.root_part();
        let body = if matches!(root.body, PartType::Multipart(_)) {
            self.first_body_part(&parsed.parts)
        } else {
            let text = decode_part(root);
            if body_kind(root) == Some(BodyKind::Html) || looks_like_markup(&text) {
                strip_html(&text)
            } else {
                text
            }
        };

        let attachments = parsed
            .parts
            .iter()
            .filter(|part| is_attachment(part))
            .map(|part| Attachment {
                filename: part.attachment_name().unwrap_or("").to_string(),
                payload: part.contents().to_vec(),
            })
            .collect();

        NormalizedContent {
            message_id,
            subject,
            sender,
            body,
            attachments,
        }
    }

    /// Text of the first acceptable body part in structural order, or empty.
    fn first_body_part(&self, parts: &[MessagePart<'_>]) -> String {
        for part in parts {
            match body_kind(part) {
                Some(BodyKind::Plain) => return decode_part(part),
                Some(BodyKind::Html) if self.scan_html => return strip_html(&decode_part(part)),
                _ => {}
            }
        }
        String::new()
    }
}

fn generated_id() -> String {
    format!("gen-{}", Uuid::new_v4())
}

/// Sender address, falling back to the display name, or empty.
fn extract_sender(parsed: &mail_parser::Message) -> String {
    parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address().or_else(|| a.name()))
        .map(|s| s.to_string())
        .unwrap_or_default()
}

fn body_kind(part: &MessagePart) -> Option<BodyKind> {
    match part.content_type() {
        Some(ct) if ct.ctype().eq_ignore_ascii_case("text") => match ct.subtype() {
            Some(sub) if sub.eq_ignore_ascii_case("plain") => Some(BodyKind::Plain),
            Some(sub) if sub.eq_ignore_ascii_case("html") => Some(BodyKind::Html),
            None => Some(BodyKind::Plain),
            Some(_) => None,
        },
        Some(_) => None,
        // No Content-Type header: RFC 2045 default is text/plain.
        None => match part.body {
            PartType::Text(_) => Some(BodyKind::Plain),
            PartType::Html(_) => Some(BodyKind::Html),
            _ => None,
        },
    }
}

/// Decoded text of a part. Invalid byte sequences become U+FFFD.
fn decode_part(part: &MessagePart) -> String {
    match &part.body {
        PartType::Text(text) | PartType::Html(text) => text.to_string(),
        PartType::Binary(bytes) | PartType::InlineBinary(bytes) => {
            String::from_utf8_lossy(bytes).into_owned()
        }
        PartType::Message(_) | PartType::Multipart(_) => String::new(),
    }
}

fn is_attachment(part: &MessagePart) -> bool {
    part.content_disposition()
        .is_some_and(|d| d.ctype().eq_ignore_ascii_case("attachment"))
}

/// Whether a decoded body appears to be HTML rather than plain text.
pub fn looks_like_markup(text: &str) -> bool {
    MARKUP_HINT.is_match(text)
}

/// Strip HTML tags from content.
pub fn strip_html(html: &str) -> String {
    let without_code = SCRIPT_STYLE.replace_all(html, " ");
    let mut result = String::with_capacity(without_code.len());
    let mut in_tag = false;
    for ch in without_code.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                // Tags separate words ("a<br>b" is two words).
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    let decoded = decode_entities(&result);
    // Normalize whitespace
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
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
