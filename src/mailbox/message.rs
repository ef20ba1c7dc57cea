//! RFC 822 parsing and reply construction.

use chrono::{DateTime, Utc};
use lettre::message::{Mailbox as Address, MultiPart};
use mail_parser::{HeaderValue, MessageParser};

use crate::error::MailboxError;
use crate::pipeline::sender::normalize_address;
use crate::pipeline::types::Item;

/// Fields of one parsed message that triage cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    /// Lowercased bare sender address.
    pub from: String,
    pub from_name: Option<String>,
    pub subject: String,
    /// Readable body with quoted history removed.
    pub body: String,
    /// `<id@host>` form, ready for In-Reply-To.
    pub message_id: Option<String>,
    /// Space-separated `<id>` list.
    pub references: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

/// Parse a raw message. `None` if the bytes are not a message at all.
pub fn parse_raw(raw: &[u8]) -> Option<ParsedMessage> {
    let parsed = MessageParser::default().parse(raw)?;

    let sender = parsed.from().and_then(|addr| addr.first());
    let from = sender
        .and_then(|a| a.address())
        .map(normalize_address)
        .unwrap_or_default();
    let from_name = sender
        .and_then(|a| a.name())
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string);

    let body = if let Some(text) = parsed.body_text(0) {
        text.to_string()
    } else if let Some(html) = parsed.body_html(0) {
        strip_html(html.as_ref())
    } else {
        String::new()
    };

    let references = match parsed.references() {
        HeaderValue::Text(id) => vec![bracket(id)],
        HeaderValue::TextList(ids) => ids.iter().map(|id| bracket(id)).collect(),
        _ => Vec::new(),
    };

    Some(ParsedMessage {
        from,
        from_name,
        subject: parsed.subject().unwrap_or_default().trim().to_string(),
        body: strip_quoted_text(&body),
        message_id: parsed.message_id().map(bracket),
        references: (!references.is_empty()).then(|| references.join(" ")),
        date: parsed
            .date()
            .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0)),
    })
}

fn bracket(id: &str) -> String {
    let id = id.trim().trim_start_matches('<').trim_end_matches('>');
    format!("<{id}>")
}

/// Strip HTML tags from content (basic).
///
/// Line breaks and block-level closers become newlines.
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut tag = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                tag.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let closing = tag.starts_with('/');
                let name = tag
                    .trim_start_matches('/')
                    .split(|c: char| c.is_whitespace() || c == '/')
                    .next()
                    .unwrap_or("")
                    .to_ascii_lowercase();
                let breaks = match name.as_str() {
                    "br" => true,
                    "p" | "div" | "li" | "tr" => closing,
                    _ => false,
                };
                if breaks {
                    result.push('\n');
                }
            }
            _ if in_tag => tag.push(ch),
            _ => result.push(ch),
        }
    }

    let decoded = result
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    let lines: Vec<String> = decoded
        .lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect();
    let mut out = Vec::new();
    for line in lines {
        if line.is_empty() && out.last().is_none_or(|l: &String| l.is_empty()) {
            continue;
        }
        out.push(line);
    }
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    out.join("\n")
}

/// Strip quoted text from an email body.
///
/// Removes `>` lines and everything after an attribution or
/// forwarded-message separator.
pub fn strip_quoted_text(body: &str) -> String {
    let mut result = Vec::new();

    for line in body.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with('>') {
            continue;
        }

        // "On Mon, Jan 1, 2026 at 10:00 AM Alice <alice@ex.com> wrote:"
        if trimmed.starts_with("On ") && trimmed.ends_with("wrote:") {
            break;
        }
        if trimmed.starts_with("---") && trimmed.contains("Original Message") {
            break;
        }
        if trimmed.len() >= 10 && trimmed.chars().all(|c| c == '_') {
            break;
        }

        result.push(line);
    }

    while result.last().is_some_and(|l| l.trim().is_empty()) {
        result.pop();
    }

    result.join("\n")
}

/// `Re: <subject>` unless the subject already carries a reply prefix.
pub fn reply_subject(subject: &str) -> String {
    let subject = subject.trim();
    if subject.to_ascii_lowercase().starts_with("re:") {
        subject.to_string()
    } else {
        format!("Re: {subject}")
    }
}

/// Build a threaded multipart reply to `item`, ready for the `raw` field.
pub fn build_reply(
    item: &Item,
    from: &str,
    plain: String,
    html: String,
) -> Result<Vec<u8>, MailboxError> {
    let from = from
        .parse::<Address>()
        .map_err(|e| MailboxError::Build(format!("Invalid from address: {e}")))?;
    let to_addr = item
        .sender
        .parse::<lettre::Address>()
        .map_err(|e| MailboxError::Build(format!("Invalid recipient address: {e}")))?;
    let to = Address::new(item.sender_name.clone(), to_addr);

    let mut builder = lettre::Message::builder()
        .from(from)
        .to(to)
        .subject(reply_subject(&item.subject));

    if let Some(id) = &item.message_id_header {
        builder = builder.in_reply_to(id.clone());
        let references = match &item.references {
            Some(prior) => format!("{prior} {id}"),
            None => id.clone(),
        };
        builder = builder.references(references);
    }

    let message = builder
        .multipart(MultiPart::alternative_plain_html(plain, html))
        .map_err(|e| MailboxError::Build(format!("Failed to build email: {e}")))?;
    Ok(message.formatted())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    const RAW: &str = "From: \"Jane Doe\" <Jane@Example.com>\r\n\
        To: me@example.org\r\n\
        Subject: Quick sync\r\n\
        Message-ID: <abc123@mail.example.com>\r\n\
        References: <root@mail.example.com>\r\n\
        Date: Tue, 14 Jan 2025 10:00:00 +0000\r\n\
        Content-Type: text/plain; charset=utf-8\r\n\
        \r\n\
        Can we meet Thursday afternoon?\r\n\
        \r\n\
        On Mon, Jan 13, 2025 at 9:00 AM Me <me@example.org> wrote:\r\n\
        > earlier text\r\n";

    #[test]
    fn parses_headers_and_strips_quotes() {
        let m = parse_raw(RAW.as_bytes()).unwrap();
        assert_eq!(m.from, "jane@example.com");
        assert_eq!(m.from_name.as_deref(), Some("Jane Doe"));
        assert_eq!(m.subject, "Quick sync");
        assert_eq!(m.body, "Can we meet Thursday afternoon?");
        assert_eq!(m.message_id.as_deref(), Some("<abc123@mail.example.com>"));
        assert_eq!(m.references.as_deref(), Some("<root@mail.example.com>"));
        assert_eq!(m.date.map(|d| d.timestamp()), Some(1_736_848_800));
    }

    #[test]
    fn strip_html_keeps_paragraphs() {
        assert_eq!(
            strip_html("<p>Hello <b>there</b></p><p>Second&nbsp;line &amp; more</p>"),
            "Hello there\nSecond line & more"
        );
        assert_eq!(strip_html("a<br/>b"), "a\nb");
        assert_eq!(strip_html("plain"), "plain");
        assert_eq!(strip_html(""), "");
    }

    #[test]
    fn strip_quoted_variants() {
        assert_eq!(strip_quoted_text("Hello!\n\n> quoted\nThanks"), "Hello!\n\nThanks");
        assert_eq!(
            strip_quoted_text("My reply\n\n--- Original Message ---\nOld"),
            "My reply"
        );
        assert_eq!(strip_quoted_text("Reply\n__________\nFrom: x"), "Reply");
        assert_eq!(strip_quoted_text(""), "");
    }

    #[test]
    fn reply_subjects() {
        assert_eq!(reply_subject("Quick sync"), "Re: Quick sync");
        assert_eq!(reply_subject("RE: Quick sync"), "RE: Quick sync");
    }

    #[test]
    fn reply_threads_with_original() {
        let item = Item {
            id: "m1".into(),
            thread_id: "t1".into(),
            labels: BTreeSet::new(),
            sender: "jane@example.com".into(),
            sender_name: Some("Jane Doe".into()),
            subject: "Quick sync".into(),
            messages: vec![],
            language: None,
            message_id_header: Some("<abc123@mail.example.com>".into()),
            references: Some("<root@mail.example.com>".into()),
        };
        let raw = build_reply(
            &item,
            "me@example.org",
            "Thursday works.".into(),
            "<p>Thursday works.</p>".into(),
        )
        .unwrap();

        let parsed = MessageParser::default().parse(&raw[..]).unwrap();
        assert_eq!(parsed.subject(), Some("Re: Quick sync"));
        assert_eq!(
            parsed.in_reply_to().as_text(),
            Some("abc123@mail.example.com")
        );
        match parsed.references() {
            HeaderValue::TextList(ids) => assert_eq!(ids.len(), 2),
            other => panic!("expected two references, got {other:?}"),
        }
        assert!(parsed.body_text(0).unwrap().contains("Thursday works."));
    }

    #[test]
    fn reply_rejects_bad_recipient() {
        let item = Item {
            id: "m1".into(),
            thread_id: "t1".into(),
            labels: BTreeSet::new(),
            sender: "not an address".into(),
            sender_name: None,
            subject: "x".into(),
            messages: vec![],
            language: None,
            message_id_header: None,
            references: None,
        };
        assert!(matches!(
            build_reply(&item, "me@example.org", "a".into(), "b".into()),
            Err(MailboxError::Build(_))
        ));
    }
}
