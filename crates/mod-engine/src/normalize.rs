use mailfeed_domain::{MailboxConfig, StableMessageId};
use mailfeed_error::MailError;
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    pub include_headers: bool,
    pub strict_rfc: bool,
    pub attachment_primary: bool,
}

impl From<&MailboxConfig> for NormalizeOptions {
    fn from(config: &MailboxConfig) -> Self {
        Self {
            include_headers: config.include_headers,
            strict_rfc: config.strict_rfc,
            attachment_primary: config.attachment_primary,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NormalizedMail {
    pub timestamp_ms: i64,
    pub id: StableMessageId,
    pub body: String,
}

pub fn normalize(
    raw: &[u8],
    opts: &NormalizeOptions,
    fallback_ms: i64,
) -> Result<NormalizedMail, MailError> {
    if raw.is_empty() {
        return Err(MailError::parse("empty message payload"));
    }

    let parsed =
        mailparse::parse_mail(raw).map_err(|e| MailError::parse(format!("MIME parse: {e}")))?;

    if parsed.headers.is_empty() && parsed.subparts.is_empty() {
        let bare = parsed.get_body().unwrap_or_default();
        if bare.trim().is_empty() {
            return Err(MailError::parse("message has no headers and no body"));
        }
    }

    let timestamp_ms = derive_timestamp(&parsed).unwrap_or(fallback_ms);
    let id = derive_id(&parsed);
    let mut body = compose_body(&parsed, opts);
    if opts.strict_rfc {
        body = to_crlf(&body);
    }

    Ok(NormalizedMail {
        timestamp_ms,
        id,
        body,
    })
}

fn derive_timestamp(parsed: &ParsedMail<'_>) -> Option<i64> {
    parsed
        .get_headers()
        .get_first_value("Date")
        .and_then(|raw| mailparse::dateparse(&raw).ok())
        .map(|secs| secs * 1000)
}

fn derive_id(parsed: &ParsedMail<'_>) -> StableMessageId {
    if let Some(header_id) = parsed.get_headers().get_first_value("Message-ID") {
        let header_id = header_id.trim();
        if is_well_formed_id(header_id) {
            return StableMessageId::new(header_id);
        }
    }
    StableMessageId::new(content_hash(parsed))
}

fn is_well_formed_id(id: &str) -> bool {
    if id.is_empty() || id.contains(char::is_whitespace) {
        return false;
    }
    let inner = id
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(id);
    !inner.is_empty() && inner.contains('@')
}

// Hash input is LF-normalized so the id does not depend on which transport
// delivered the message.
fn content_hash(parsed: &ParsedMail<'_>) -> String {
    let headers = parsed.get_headers();
    let mut hasher = Sha256::new();
    for name in ["From", "To", "Subject", "Date"] {
        hasher.update(headers.get_first_value(name).unwrap_or_default().as_bytes());
        hasher.update(b"\n");
    }
    hasher.update(to_lf(&body_text(parsed)).as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn compose_body(parsed: &ParsedMail<'_>, opts: &NormalizeOptions) -> String {
    let text = body_text(parsed);
    let promoted = if opts.attachment_primary {
        first_attachment(parsed).map(attachment_text)
    } else {
        None
    };

    let mut out = String::new();
    if opts.include_headers {
        out.push_str(&header_block(parsed));
        out.push('\n');
    }
    match promoted {
        Some(primary) if !primary.trim().is_empty() => {
            out.push_str(&primary);
            // With headers prepended the original text is captured
            // headers-only; the labeled section is for the bare case.
            if !opts.include_headers && !text.trim().is_empty() {
                out.push_str("\n--- message text ---\n");
                out.push_str(&text);
            }
        }
        _ => out.push_str(&text),
    }
    out
}

fn header_block(parsed: &ParsedMail<'_>) -> String {
    let mut block = String::new();
    for header in parsed.get_headers() {
        block.push_str(&header.get_key());
        block.push_str(": ");
        block.push_str(&header.get_value());
        block.push('\n');
    }
    block
}

fn body_text(parsed: &ParsedMail<'_>) -> String {
    if let Some(text) = find_text_part(parsed, "text/plain") {
        return text;
    }
    if let Some(html) = find_text_part(parsed, "text/html") {
        return strip_html(&html);
    }
    parsed.get_body().unwrap_or_default()
}

fn find_text_part(parsed: &ParsedMail<'_>, target: &str) -> Option<String> {
    if parsed.subparts.is_empty() {
        if parsed.get_content_disposition().disposition == DispositionType::Attachment {
            return None;
        }
        if parsed.ctype.mimetype == target {
            return parsed.get_body().ok();
        }
        return None;
    }
    for part in &parsed.subparts {
        if let Some(text) = find_text_part(part, target) {
            return Some(text);
        }
    }
    None
}

fn strip_html(html: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn first_attachment<'p, 'a>(parsed: &'p ParsedMail<'a>) -> Option<&'p ParsedMail<'a>> {
    if let Some(nested) = find_part(parsed, &|p| p.ctype.mimetype == "message/rfc822") {
        return Some(nested);
    }
    find_part(parsed, &|p| {
        p.get_content_disposition().disposition == DispositionType::Attachment
    })
}

fn find_part<'p, 'a, F>(parsed: &'p ParsedMail<'a>, pred: &F) -> Option<&'p ParsedMail<'a>>
where
    F: Fn(&ParsedMail<'a>) -> bool,
{
    for part in &parsed.subparts {
        if pred(part) {
            return Some(part);
        }
        if let Some(found) = find_part(part, pred) {
            return Some(found);
        }
    }
    None
}

fn attachment_text(part: &ParsedMail<'_>) -> String {
    if part.ctype.mimetype == "message/rfc822" {
        if let Ok(inner) = part.get_body_raw() {
            if let Ok(embedded) = mailparse::parse_mail(&inner) {
                return body_text(&embedded);
            }
        }
    }
    part.get_body().unwrap_or_default()
}

fn to_lf(text: &str) -> String {
    text.replace("\r\n", "\n")
}

fn to_crlf(text: &str) -> String {
    to_lf(text).replace('\n', "\r\n")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn opts() -> NormalizeOptions {
        NormalizeOptions {
            include_headers: false,
            strict_rfc: false,
            attachment_primary: false,
        }
    }

    #[test]
    fn message_id_header_wins() {
        let raw = b"From: x@example.com\r\nMessage-ID: <abc-123@mail.example.com>\r\nDate: Mon, 1 Jan 2024 00:00:00 +0000\r\n\r\nhello\r\n";
        let mail = normalize(raw, &opts(), 42).unwrap();
        assert_eq!(mail.id.as_str(), "<abc-123@mail.example.com>");
        assert_eq!(mail.timestamp_ms, 1_704_067_200_000);
    }

    #[test]
    fn malformed_message_id_falls_back_to_hash() {
        let raw = b"From: x@example.com\r\nMessage-ID: broken\r\n\r\nhello\r\n";
        let mail = normalize(raw, &opts(), 0).unwrap();
        assert_eq!(mail.id.as_str().len(), 64);
        assert!(mail.id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn content_hash_is_deterministic() {
        let raw = b"From: a@example.com\r\nTo: b@example.com\r\nSubject: greetings\r\n\r\nbody line\r\n";
        let one = normalize(raw, &opts(), 0).unwrap();
        let two = normalize(raw, &opts(), 0).unwrap();
        assert_eq!(one.id, two.id);

        let other = b"From: a@example.com\r\nTo: b@example.com\r\nSubject: greetings\r\n\r\ndifferent\r\n";
        assert_ne!(one.id, normalize(other, &opts(), 0).unwrap().id);
    }

    #[test]
    fn content_hash_ignores_line_ending_style() {
        let crlf = b"From: a@example.com\r\nSubject: s\r\n\r\nbody line\r\nsecond\r\n";
        let lf = b"From: a@example.com\nSubject: s\n\nbody line\nsecond\n";
        let a = normalize(crlf, &opts(), 0).unwrap();
        let b = normalize(lf, &opts(), 0).unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn missing_date_uses_fallback() {
        let raw = b"From: x@example.com\r\n\r\nhello\r\n";
        let mail = normalize(raw, &opts(), 777_000).unwrap();
        assert_eq!(mail.timestamp_ms, 777_000);
    }

    #[test]
    fn multipart_prefers_text_plain() {
        let raw = b"From: a@example.com\r\nContent-Type: multipart/alternative; boundary=\"XYZ\"\r\n\r\n--XYZ\r\nContent-Type: text/plain\r\n\r\nplain body\r\n--XYZ\r\nContent-Type: text/html\r\n\r\n<p>html body</p>\r\n--XYZ--\r\n";
        let mail = normalize(raw, &opts(), 0).unwrap();
        assert!(mail.body.contains("plain body"));
        assert!(!mail.body.contains("html body"));
    }

    #[test]
    fn html_only_is_stripped() {
        let raw = b"From: a@example.com\r\nContent-Type: text/html\r\n\r\n<p>Hello <b>world</b></p>\r\n";
        let mail = normalize(raw, &opts(), 0).unwrap();
        assert_eq!(mail.body.trim(), "Hello world");
    }

    #[test]
    fn include_headers_prepends_header_block() {
        let raw = b"From: a@example.com\r\nSubject: greetings\r\n\r\nhello\r\n";
        let with = NormalizeOptions {
            include_headers: true,
            ..opts()
        };
        let mail = normalize(raw, &with, 0).unwrap();
        assert!(mail.body.starts_with("From: a@example.com\n"));
        assert!(mail.body.contains("Subject: greetings\n"));
        assert!(mail.body.contains("\n\nhello"));
    }

    #[test]
    fn attachment_primary_promotes_attachment() {
        let raw = b"From: a@example.com\r\nContent-Type: multipart/mixed; boundary=\"XYZ\"\r\n\r\n--XYZ\r\nContent-Type: text/plain\r\n\r\ncover note\r\n--XYZ\r\nContent-Type: text/plain\r\nContent-Disposition: attachment; filename=\"log.txt\"\r\n\r\nattached payload\r\n--XYZ--\r\n";
        let with = NormalizeOptions {
            attachment_primary: true,
            ..opts()
        };
        let mail = normalize(raw, &with, 0).unwrap();
        assert!(mail.body.starts_with("attached payload"));
        assert!(mail.body.contains("--- message text ---"));
        assert!(mail.body.contains("cover note"));

        let without = normalize(raw, &opts(), 0).unwrap();
        assert!(without.body.starts_with("cover note"));
        assert!(!without.body.contains("attached payload"));
    }

    #[test]
    fn attachment_primary_with_headers_demotes_text_to_headers_only() {
        let raw = b"From: a@example.com\r\nSubject: report\r\nContent-Type: multipart/mixed; boundary=\"XYZ\"\r\n\r\n--XYZ\r\nContent-Type: text/plain\r\n\r\ncover note\r\n--XYZ\r\nContent-Type: text/plain\r\nContent-Disposition: attachment; filename=\"log.txt\"\r\n\r\nattached payload\r\n--XYZ--\r\n";
        let with = NormalizeOptions {
            include_headers: true,
            attachment_primary: true,
            ..opts()
        };
        let mail = normalize(raw, &with, 0).unwrap();
        assert!(mail.body.starts_with("From: a@example.com\n"));
        assert!(mail.body.contains("Subject: report\n"));
        assert!(mail.body.contains("attached payload"));
        assert!(!mail.body.contains("--- message text ---"));
        assert!(!mail.body.contains("cover note"));
    }

    #[test]
    fn attachment_primary_unwraps_embedded_message() {
        let raw = b"From: a@example.com\r\nContent-Type: multipart/mixed; boundary=\"XYZ\"\r\n\r\n--XYZ\r\nContent-Type: text/plain\r\n\r\nforwarding this\r\n--XYZ\r\nContent-Type: message/rfc822\r\n\r\nFrom: inner@example.com\r\n\r\ninner body\r\n--XYZ--\r\n";
        let with = NormalizeOptions {
            attachment_primary: true,
            ..opts()
        };
        let mail = normalize(raw, &with, 0).unwrap();
        assert!(mail.body.starts_with("inner body"));
        assert!(mail.body.contains("forwarding this"));
    }

    #[test]
    fn strict_rfc_normalizes_to_crlf() {
        let raw = b"From: a@example.com\nSubject: s\n\nline one\nline two\n";
        let strict = NormalizeOptions {
            strict_rfc: true,
            ..opts()
        };
        let mail = normalize(raw, &strict, 0).unwrap();
        assert!(mail.body.contains("line one\r\nline two"));

        let loose = normalize(raw, &opts(), 0).unwrap();
        assert_eq!(loose.id, mail.id);
    }

    #[test]
    fn empty_payload_is_parse_error() {
        let err = normalize(b"", &opts(), 0).unwrap_err();
        assert!(matches!(err, MailError::Parse(_)));
    }

    #[test]
    fn headerless_payloads_need_a_body() {
        let err = normalize(b"\r\n", &opts(), 0).unwrap_err();
        assert!(matches!(err, MailError::Parse(_)));

        let mail = normalize(b"\r\nbare body\r\n", &opts(), 42).unwrap();
        assert!(mail.body.contains("bare body"));
        assert_eq!(mail.timestamp_ms, 42);
    }
}
