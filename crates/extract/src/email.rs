use chrono::{DateTime, NaiveDate};
use mailparse::MailHeaderMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("MIME parse error: {0}")]
    Mime(#[from] mailparse::MailParseError),
    #[error("Missing {0} header")]
    MissingHeader(&'static str),
    #[error("Unparsable Date header: {0}")]
    InvalidDate(String),
    #[error("No text or HTML body part")]
    NoBody,
}

/// The fields of one mailbox message the extractor cares about.
#[derive(Debug, Clone)]
pub struct ParsedEmail {
    pub sender: String,
    pub subject: String,
    /// Calendar day the message was received; time-of-day is discarded.
    pub received: NaiveDate,
    /// Decoded HTML (preferred) or plain-text body.
    pub body: String,
    /// Message-Id when present, otherwise the subject line.
    pub source_ref: String,
}

/// Parse a raw RFC822 message into the fields extraction needs. Transfer
/// encodings (quoted-printable, base64) are decoded by the MIME layer.
pub fn parse_message(raw: &[u8]) -> Result<ParsedEmail, EmailError> {
    let mail = mailparse::parse_mail(raw)?;

    let subject = mail
        .headers
        .get_first_value("Subject")
        .ok_or(EmailError::MissingHeader("Subject"))?;
    let sender = mail
        .headers
        .get_first_value("From")
        .unwrap_or_else(|| "Unknown".to_string());

    let date_raw = mail
        .headers
        .get_first_value("Date")
        .ok_or(EmailError::MissingHeader("Date"))?;
    let timestamp = mailparse::dateparse(&date_raw)
        .map_err(|_| EmailError::InvalidDate(date_raw.clone()))?;
    let received = DateTime::from_timestamp(timestamp, 0)
        .ok_or(EmailError::InvalidDate(date_raw))?
        .date_naive();

    let body = body_part(&mail).ok_or(EmailError::NoBody)?;
    let source_ref = mail
        .headers
        .get_first_value("Message-ID")
        .unwrap_or_else(|| subject.clone());

    Ok(ParsedEmail {
        sender,
        subject,
        received,
        body: strip_outlook_prefixes(&body),
        source_ref,
    })
}

/// Depth-first search for the HTML part, falling back to any text part.
fn body_part(mail: &mailparse::ParsedMail<'_>) -> Option<String> {
    find_part(mail, true).or_else(|| find_part(mail, false))
}

fn find_part(part: &mailparse::ParsedMail<'_>, want_html: bool) -> Option<String> {
    if part.subparts.is_empty() {
        let mimetype = part.ctype.mimetype.to_lowercase();
        let accept = if want_html {
            mimetype == "text/html"
        } else {
            mimetype.starts_with("text/")
        };
        return if accept { part.get_body().ok() } else { None };
    }
    part.subparts.iter().find_map(|p| find_part(p, want_html))
}

/// Outlook-routed messages prefix element ids and classes with `x_`; strip
/// the prefix so the structured selectors still hit.
fn strip_outlook_prefixes(body: &str) -> String {
    body.replace("\"x_", "\"")
}
