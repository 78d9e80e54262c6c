//! Decides whether a parsed message is a purchase-order notification.

use std::collections::BTreeSet;

use regex::Regex;

use super::Order;
use super::extract::Extractor;
use crate::fetch::parser::Email;

/// Marker phrase every authorization notification carries in its subject.
const SUBJECT_MARKER: &str = r"(?i)SISTEMA\s+NAF:.*AUTORIZACI";

/// Outcome of classifying one message.
#[derive(Debug, PartialEq, Eq)]
pub enum Classification {
    /// A notification with a usable order number.
    Accepted(Order),
    /// Sent by an accepted sender but without order data.
    ///
    /// Set aside rather than processed, so a human can look at it.
    Incomplete {
        /// Subject of the message, for the log
        subject: String,
    },
    /// Not from an accepted sender.
    Rejected,
}

/// Applies the sender and subject filters, then extracts the order.
pub struct Classifier {
    /// Lowercased addresses allowed to send notifications
    accepted_senders: BTreeSet<String>,
    /// Strategy pulling the order fields out of the text
    extractor: Box<dyn Extractor>,
    /// Subject marker
    marker: Regex,
}

impl Classifier {
    /// Returns the accepted sender addresses
    pub const fn as_accepted_senders(&self) -> &BTreeSet<String> {
        &self.accepted_senders
    }

    /// Classifies a parsed message.
    pub fn classify(&self, email: &Email) -> Classification {
        let sender_ok = !email.as_senders().is_disjoint(&self.accepted_senders);
        if !sender_ok {
            return Classification::Rejected;
        }

        let subject = email.as_subject();
        let fields = self.extractor.extract(subject, email.as_text());
        match fields.numero.clone() {
            Some(numero) if self.marker.is_match(subject) => Classification::Accepted(Order {
                token: email.as_token().clone(),
                numero,
                fecha_aut: fields.fecha_aut,
                fecha_orden: fields.fecha_orden,
                proveedor: fields.proveedor,
                tarea: fields.tarea,
            }),
            _ => Classification::Incomplete {
                subject: subject.to_owned(),
            },
        }
    }

    /// Creates a classifier accepting `senders` (compared case-insensitively).
    pub fn new(
        senders: impl IntoIterator<Item = String>,
        extractor: Box<dyn Extractor>,
    ) -> Result<Self, regex::Error> {
        let accepted_senders = senders
            .into_iter()
            .map(|sender| sender.trim().to_lowercase())
            .filter(|sender| !sender.is_empty())
            .collect();
        Ok(Self {
            accepted_senders,
            extractor,
            marker: Regex::new(SUBJECT_MARKER)?,
        })
    }
}
