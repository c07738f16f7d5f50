//! Provider payload adaptation: one canonical message out of divergent
//! webhook field schemas.

use crate::address;
use crate::error::Error;
use crate::ingest::mime;
use crate::message::{InboundMessage, NO_SUBJECT, UNKNOWN_SENDER};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Which webhook route received the payload. Each provider owns its field
/// aliases; precedence within each alias list is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// Primary flavor: header/body fields arrive pre-split (recipient,
    /// body-plain, body-html, …).
    Mailgun,
    /// Secondary flavor: may carry the full raw MIME message under `email`.
    Sendgrid,
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Mailgun => "mailgun",
            Provider::Sendgrid => "sendgrid",
        }
    }

    /// Field carrying a full raw MIME message, when the provider uses one.
    fn raw_mime_key(&self) -> Option<&'static str> {
        match self {
            Provider::Mailgun => None,
            Provider::Sendgrid => Some("email"),
        }
    }

    fn recipient_keys(&self) -> &'static [&'static str] {
        match self {
            Provider::Mailgun => &["recipient", "to"],
            Provider::Sendgrid => &["to"],
        }
    }

    fn sender_keys(&self) -> &'static [&'static str] {
        match self {
            Provider::Mailgun => &["sender", "from"],
            Provider::Sendgrid => &["from"],
        }
    }

    fn text_keys(&self) -> &'static [&'static str] {
        match self {
            Provider::Mailgun => &["body-plain", "stripped-text"],
            Provider::Sendgrid => &["text"],
        }
    }

    fn html_keys(&self) -> &'static [&'static str] {
        match self {
            Provider::Mailgun => &["body-html", "stripped-html"],
            Provider::Sendgrid => &["html"],
        }
    }

    /// Provider identifiers kept verbatim as opaque audit metadata.
    fn meta_keys(&self) -> &'static [&'static str] {
        match self {
            Provider::Mailgun => &["timestamp", "token", "signature", "Message-Id", "message-id"],
            Provider::Sendgrid => &["envelope", "charsets", "SPF", "dkim"],
        }
    }
}

/// Adapter outcome. `OffDomain` is not an error: the message is discarded,
/// but the webhook is still acknowledged so the provider does not retry.
#[derive(Debug)]
pub enum Ingested {
    Accepted(InboundMessage),
    OffDomain(String),
}

/// First alias whose value is non-blank, in declaration order.
fn first_nonblank<'a>(fields: &'a HashMap<String, String>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| fields.get(*k))
        .find(|v| !v.trim().is_empty())
        .map(|v| v.as_str())
}

/// Convert one provider payload into a canonical `InboundMessage`.
///
/// Only a payload with no usable recipient at all fails
/// (`Error::MissingRecipient`); every other malformed or absent field
/// degrades to its documented default. A recipient outside `accepted_domain`
/// (when one is configured) yields `Ingested::OffDomain`.
pub fn adapt(
    provider: Provider,
    fields: &HashMap<String, String>,
    accepted_domain: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Ingested, Error> {
    let raw = provider
        .raw_mime_key()
        .and_then(|k| fields.get(k))
        .filter(|v| !v.trim().is_empty())
        .map(|v| mime::parse_raw(v));

    let to_value = raw
        .as_ref()
        .and_then(|m| m.to.as_deref())
        .or_else(|| first_nonblank(fields, provider.recipient_keys()))
        .ok_or(Error::MissingRecipient)?;
    let recipient = address::normalize(address::extract_address(to_value))
        .map_err(|_| Error::MissingRecipient)?;

    if let Some(root) = accepted_domain {
        if !address::domain_matches(&recipient, root) {
            return Ok(Ingested::OffDomain(recipient));
        }
    }

    let sender = raw
        .as_ref()
        .and_then(|m| m.from.as_deref())
        .or_else(|| first_nonblank(fields, provider.sender_keys()))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| UNKNOWN_SENDER.to_string());

    let subject = raw
        .as_ref()
        .and_then(|m| m.subject.as_deref())
        .or_else(|| first_nonblank(fields, &["subject"]))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| NO_SUBJECT.to_string());

    let (body_text, body_html) = match &raw {
        Some(m) => (m.text.clone(), m.html.clone()),
        None => (
            first_nonblank(fields, provider.text_keys()).unwrap_or("").to_string(),
            first_nonblank(fields, provider.html_keys()).unwrap_or("").to_string(),
        ),
    };

    let mut provider_meta = serde_json::Map::new();
    for key in provider.meta_keys() {
        if let Some(v) = fields.get(*key) {
            provider_meta.insert((*key).to_string(), serde_json::Value::String(v.clone()));
        }
    }

    Ok(Ingested::Accepted(InboundMessage {
        recipient,
        sender,
        subject,
        body_text,
        body_html,
        received_at: now,
        created_at: now,
        provider_meta,
    }))
}
