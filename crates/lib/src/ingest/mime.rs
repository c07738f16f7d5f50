//! Raw MIME recovery for providers that post the full message under one field.

use mailparse::{parse_mail, MailHeaderMap, ParsedMail};

/// Fields recovered from a raw MIME blob.
#[derive(Debug, Default)]
pub struct RawMail {
    pub to: Option<String>,
    pub from: Option<String>,
    pub subject: Option<String>,
    pub text: String,
    pub html: String,
}

/// Parse a raw MIME message, recovering `To`/`From`/`Subject` and the first
/// `text/plain` and `text/html` bodies in the part tree.
///
/// An unparseable blob degrades to "whole raw value as plain text" rather
/// than failing; providers must not be made to retry on cosmetic issues.
pub fn parse_raw(raw: &str) -> RawMail {
    let parsed = match parse_mail(raw.as_bytes()) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("mime parse failed, keeping raw body as text: {}", e);
            return RawMail {
                text: raw.to_string(),
                ..Default::default()
            };
        }
    };
    let headers = parsed.get_headers();
    let mut mail = RawMail {
        to: headers.get_first_value("To"),
        from: headers.get_first_value("From"),
        subject: headers.get_first_value("Subject"),
        ..Default::default()
    };
    collect_bodies(&parsed, &mut mail);
    mail
}

/// Depth-first over the part tree; the first body of each kind wins.
fn collect_bodies(part: &ParsedMail, mail: &mut RawMail) {
    if part.subparts.is_empty() {
        let body = match part.get_body() {
            Ok(b) => b,
            Err(e) => {
                log::debug!("mime part body decode failed: {}", e);
                return;
            }
        };
        match part.ctype.mimetype.as_str() {
            "text/html" if mail.html.is_empty() => mail.html = body,
            "text/plain" if mail.text.is_empty() => mail.text = body,
            _ => {}
        }
        return;
    }
    for sub in &part.subparts {
        collect_bodies(sub, mail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_part_plain() {
        let raw = concat!(
            "To: Jane Doe <jane@inbox.test>\r\n",
            "From: sender@example.com\r\n",
            "Subject: Hello\r\n",
            "\r\n",
            "just a plain body\r\n",
        );
        let mail = parse_raw(raw);
        assert_eq!(mail.to.as_deref(), Some("Jane Doe <jane@inbox.test>"));
        assert_eq!(mail.from.as_deref(), Some("sender@example.com"));
        assert_eq!(mail.subject.as_deref(), Some("Hello"));
        assert_eq!(mail.text.trim(), "just a plain body");
        assert!(mail.html.is_empty());
    }

    #[test]
    fn parses_multipart_alternative() {
        let raw = concat!(
            "To: jane@inbox.test\r\n",
            "From: sender@example.com\r\n",
            "Subject: Both bodies\r\n",
            "MIME-Version: 1.0\r\n",
            "Content-Type: multipart/alternative; boundary=\"b1\"\r\n",
            "\r\n",
            "--b1\r\n",
            "Content-Type: text/plain; charset=utf-8\r\n",
            "\r\n",
            "plain body\r\n",
            "--b1\r\n",
            "Content-Type: text/html; charset=utf-8\r\n",
            "\r\n",
            "<p>html body</p>\r\n",
            "--b1--\r\n",
        );
        let mail = parse_raw(raw);
        assert_eq!(mail.text.trim(), "plain body");
        assert_eq!(mail.html.trim(), "<p>html body</p>");
        assert_eq!(mail.subject.as_deref(), Some("Both bodies"));
    }

    #[test]
    fn headerless_blob_keeps_body_without_addresses() {
        let mail = parse_raw("no headers here, just text\r\n");
        assert!(mail.to.is_none());
        // mailparse treats a headerless blob as an empty-header message; the
        // body still comes through as text/plain.
        assert!(mail.html.is_empty());
    }
}
