//! Parses a raw message to build an [`Email`] object

use std::collections::BTreeSet;

use mail_parser::{Address, HeaderName, HeaderValue, MessageParser};

use super::MessageToken;

/// Represents a parsed email
#[derive(Debug)]
pub struct Email {
    /// Lowercased addresses found in the sender headers
    ///
    /// This merges `From`, `Reply-To`, `Sender` and `Return-Path`.
    senders: BTreeSet<String>,
    /// Decoded subject, empty if missing
    subject: String,
    /// Plain text version of the email content
    ///
    /// Every text part is concatenated. HTML-only messages are converted.
    text: String,
    /// Unique ID corresponding to the email
    token: MessageToken,
}

impl Email {
    /// Returns the sender addresses
    pub const fn as_senders(&self) -> &BTreeSet<String> {
        &self.senders
    }

    /// Returns the decoded subject
    pub fn as_subject(&self) -> &str {
        &self.subject
    }

    /// Returns the text body
    pub fn as_text(&self) -> &str {
        &self.text
    }

    /// Returns the message token
    pub const fn as_token(&self) -> &MessageToken {
        &self.token
    }
}

impl<'body> TryFrom<(MessageToken, &'body [u8])> for Email {
    type Error = Error;

    fn try_from((token, value): (MessageToken, &'body [u8])) -> Result<Self, Error> {
        let message = MessageParser::default()
            .parse(value)
            .ok_or(Error::ParseFailure)?;

        let headers = &message.parts.first().ok_or(Error::NoHeaders)?.headers;

        let senders = headers
            .iter()
            .filter(|header| is_sender_header(&header.name))
            .flat_map(|header| header_addresses(&header.value))
            .collect();

        let subject = message.subject().unwrap_or_default().to_owned();
        let text = (0..)
            .map_while(|pos| message.body_text(pos))
            .collect::<Vec<_>>()
            .concat();

        Ok(Self {
            senders,
            subject,
            text,
            token,
        })
    }
}

/// Whether the header may carry the address of the notification system.
const fn is_sender_header(name: &HeaderName<'_>) -> bool {
    matches!(
        name,
        HeaderName::From | HeaderName::ReplyTo | HeaderName::Sender | HeaderName::ReturnPath
    )
}

/// Extracts the lowercased addresses from a header value.
fn header_addresses(value: &HeaderValue<'_>) -> Vec<String> {
    match value {
        HeaderValue::Address(Address::List(list)) => list
            .iter()
            .filter_map(|addr| addr.address.as_deref())
            .map(str::to_lowercase)
            .collect(),
        HeaderValue::Address(Address::Group(groups)) => groups
            .iter()
            .flat_map(|group| group.addresses.iter())
            .filter_map(|addr| addr.address.as_deref())
            .map(str::to_lowercase)
            .collect(),
        HeaderValue::Text(text) => normalize_addresses(text),
        HeaderValue::TextList(list) => list
            .iter()
            .flat_map(|text| normalize_addresses(text))
            .collect(),
        _ => Vec::new(),
    }
}

/// Splits a free-form address list into lowercased addresses.
///
/// Entries may be separated by `,` or `;`, and may be written either bare or
/// as `Name <address>`.
pub fn normalize_addresses(value: &str) -> Vec<String> {
    value
        .split([',', ';'])
        .filter_map(|entry| {
            let entry = entry.trim();
            let address = match (entry.rfind('<'), entry.rfind('>')) {
                (Some(open), Some(close)) if open < close => &entry[open + 1..close],
                _ => entry,
            };
            let address = address.trim().to_lowercase();
            (!address.is_empty()).then_some(address)
        })
        .collect()
}

/// Errors that may occur while parsing the email.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to parse the email.
    #[error("message could not be parsed")]
    ParseFailure,
    /// Failed to get headers from the email.
    #[error("message has no headers")]
    NoHeaders,
}
