//! Plain-text reply bodies rendered as multipart content.

use std::sync::LazyLock;

use regex::Regex;

use crate::mailbox::message::strip_html;
use crate::pipeline::types::Draft;

const BODY_STYLE: &str = "margin: 0; padding: 0; font-family: -apple-system, BlinkMacSystemFont, \
    'Segoe UI', Roboto, Arial, sans-serif; font-size: 14px; line-height: 1.5; color: #333333;";

static PARAGRAPH_BREAK: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\n\n+").ok());

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Paragraphs on blank lines, `<br>` on single newlines, special characters escaped.
pub fn text_to_html(text: &str) -> String {
    let text = escape_html(text).replace("\r\n", "\n").replace('\r', "\n");
    let text = text.trim();
    if text.is_empty() {
        return String::new();
    }
    let paragraphs: Vec<&str> = match PARAGRAPH_BREAK.as_ref() {
        Some(re) => re.split(text).collect(),
        None => text.split("\n\n").collect(),
    };
    paragraphs
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            format!(
                "<p style=\"margin: 0 0 1em 0;\">{}</p>",
                p.replace('\n', "<br>\n")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Full HTML document for a draft, signature included.
pub fn render_html(draft: &Draft) -> String {
    let signature = draft
        .signature_html
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|s| format!("\n    <div>\n      {s}\n    </div>"))
        .unwrap_or_default();
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n  <meta charset=\"UTF-8\">\n</head>\n\
         <body style=\"{BODY_STYLE}\">\n  <div>\n    {}{signature}\n  </div>\n</body>\n</html>",
        text_to_html(&draft.body)
    )
}

/// Plain-text alternative: body, then `--` and the signature's text.
pub fn render_plain(draft: &Draft) -> String {
    match draft
        .signature_html
        .as_deref()
        .map(strip_html)
        .filter(|s| !s.is_empty())
    {
        Some(signature) => format!("{}\n\n--\n{signature}", draft.body.trim_end()),
        None => draft.body.trim_end().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(body: &str, sig: Option<&str>) -> Draft {
        Draft {
            item_id: "m1".into(),
            body: body.into(),
            signature_html: sig.map(str::to_string),
        }
    }

    #[test]
    fn paragraphs_and_breaks() {
        assert_eq!(
            text_to_html("Hi Jane,\n\nThursday works.\nSee you then."),
            "<p style=\"margin: 0 0 1em 0;\">Hi Jane,</p>\n\
             <p style=\"margin: 0 0 1em 0;\">Thursday works.<br>\nSee you then.</p>"
        );
        assert_eq!(text_to_html(""), "");
    }

    #[test]
    fn escapes_markup() {
        assert!(text_to_html("a < b & \"c\"").contains("a &lt; b &amp; &quot;c&quot;"));
    }

    #[test]
    fn signature_in_both_parts() {
        let d = draft("Thursday works.", Some("<b>Sam</b><br>Acme Inc"));
        assert!(render_html(&d).contains("<b>Sam</b><br>Acme Inc"));
        assert_eq!(render_plain(&d), "Thursday works.\n\n--\nSam\nAcme Inc");
    }

    #[test]
    fn no_signature() {
        let d = draft("Thursday works.\n", None);
        assert_eq!(render_plain(&d), "Thursday works.");
        assert!(!render_html(&d).contains("<div>\n      "));
    }
}
