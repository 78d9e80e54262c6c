//! Pulls purchase-order fields out of a notification.
//!
//! Extraction is a pluggable strategy: the intake only depends on the
//! [`Extractor`] trait, and [`RegexExtractor`] implements the rules used by
//! the notification system.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// Fields extracted from one notification.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFields {
    /// Authorization date, `dd/mm/yyyy`
    pub fecha_aut: Option<String>,
    /// Order date, `dd/mm/yyyy`
    pub fecha_orden: Option<String>,
    /// Purchase-order number, required for an order to be accepted
    pub numero: Option<String>,
    /// Supplier name as written in the body
    pub proveedor: Option<String>,
    /// Task number referenced in the observations
    pub tarea: Option<String>,
}

/// Strategy turning a subject and a text body into [`OrderFields`].
pub trait Extractor: Send + Sync {
    /// Extracts whatever fields are present. Never fails; missing fields are
    /// `None`.
    fn extract(&self, subject: &str, body: &str) -> OrderFields;
}

/// Pattern rules for the purchase-order notifications.
#[derive(Debug)]
pub struct RegexExtractor {
    /// Order number in the body, used when the subject has none
    body_number: Regex,
    /// `<br>` tags
    br_tag: Regex,
    /// HTML entities
    entity: Regex,
    /// Authorization date
    fecha_aut: Regex,
    /// Order date
    fecha_orden: Regex,
    /// Closing paragraph tags
    p_close: Regex,
    /// Supplier line
    proveedor: Regex,
    /// Order number in the subject
    subject_number: Regex,
    /// Any other tag
    tag: Regex,
    /// Task number, written `#123//`
    tarea: Regex,
    /// Runs of whitespace
    whitespace: Regex,
}

impl RegexExtractor {
    /// Converts basic HTML into text, keeping line breaks.
    pub fn clean_html(&self, value: &str) -> String {
        let text = self.br_tag.replace_all(value, "\n");
        let text = self.p_close.replace_all(&text, "\n");
        let text = self.tag.replace_all(&text, "");
        let text = self.entity.replace_all(&text, |caps: &Captures<'_>| {
            decode_entity(&caps[1])
                .map_or_else(|| caps[0].to_owned(), String::from)
        });
        text.replace('\u{a0}', " ")
    }

    /// Compiles the rules.
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            body_number: Regex::new(r"(?i)orden\s+de\s+compra\s+de\s+(?:No|N[°º])\.?\s*(\d+)")?,
            br_tag: Regex::new(r"(?i)<br\s*/?>")?,
            entity: Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);")?,
            fecha_aut: Regex::new(
                r"(?i)Fecha\s+Autorizaci(?:o|ó)n[:\s]*([0-9]{2}/[0-9]{2}/[0-9]{4})",
            )?,
            fecha_orden: Regex::new(r"(?i)Fecha\s+Orden[:\s]*([0-9]{2}/[0-9]{2}/[0-9]{4})")?,
            p_close: Regex::new(r"(?i)</p>")?,
            proveedor: Regex::new(r"(?i)proveedor\s*:?\s+([^\n]+?)(?:\s+con\s+Fecha|\n|$)")?,
            subject_number: Regex::new(
                r"(?i)SISTEMA\s+NAF:.*?ORDEN\s+COMPRA\s+(?:NO|N[°º])\.?\s*(\d+)",
            )?,
            tag: Regex::new(r"<[^>]+>")?,
            tarea: Regex::new(r"#(\d+)\s*//")?,
            whitespace: Regex::new(r"\s+")?,
        })
    }
}

impl Extractor for RegexExtractor {
    fn extract(&self, subject: &str, body: &str) -> OrderFields {
        let mut fields = OrderFields {
            numero: first_group(&self.subject_number, subject),
            ..OrderFields::default()
        };

        let text = self.clean_html(body);
        if text.is_empty() {
            return fields;
        }

        if fields.numero.is_none() {
            fields.numero = first_group(&self.body_number, &text);
        }
        fields.fecha_aut = first_group(&self.fecha_aut, &text);
        fields.fecha_orden = first_group(&self.fecha_orden, &text);
        fields.proveedor = first_group(&self.proveedor, &text)
            .map(|name| self.whitespace.replace_all(&name, " ").trim().to_owned())
            .filter(|name| !name.is_empty());
        fields.tarea = first_group(&self.tarea, &text);
        fields
    }
}

/// Decodes the body of an HTML entity (between `&` and `;`).
fn decode_entity(entity: &str) -> Option<char> {
    if let Some(number) = entity.strip_prefix('#') {
        let code = match number.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => number.parse().ok()?,
        };
        return char::from_u32(code);
    }
    Some(match entity {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "aacute" => 'á',
        "eacute" => 'é',
        "iacute" => 'í',
        "oacute" => 'ó',
        "uacute" => 'ú',
        "Aacute" => 'Á',
        "Eacute" => 'É',
        "Iacute" => 'Í',
        "Oacute" => 'Ó',
        "Uacute" => 'Ú',
        "ntilde" => 'ñ',
        "Ntilde" => 'Ñ',
        "ordm" => 'º',
        "deg" => '°',
        _ => return None,
    })
}

/// Returns the first capture group of the first match.
fn first_group(regex: &Regex, haystack: &str) -> Option<String> {
    regex
        .captures(haystack)
        .and_then(|caps| caps.get(1))
        .map(|group| group.as_str().to_owned())
}
