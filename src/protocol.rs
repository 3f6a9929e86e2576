//! Command and reply value types for the line-oriented instrument protocol.
//!
//! The protocol is conversational: one newline-terminated command goes out,
//! at most one newline-terminated reply comes back. Replies are comma-split
//! into fields here, but numeric interpretation is left to the caller via
//! [`parse_field`] because field semantics vary per query (scientific
//! notation, multi-value records, status strings).

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ChannelError;

/// One command line, without its terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub text: String,
    /// Whether the device answers this command with a reply line.
    pub expects_reply: bool,
}

impl Command {
    /// A query: the device is expected to reply with one line.
    pub fn query(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            expects_reply: true,
        }
    }

    /// A bare command: fire-and-forget, no reply line expected.
    pub fn bare(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            expects_reply: false,
        }
    }
}

/// One reply line, comma-split into fields and timestamped on receipt.
#[derive(Debug, Clone)]
pub struct Reply {
    pub text: String,
    pub fields: Vec<String>,
    pub received_at: DateTime<Utc>,
}

impl Reply {
    pub(crate) fn from_line(text: String) -> Self {
        let fields = text.split(',').map(|f| f.trim().to_string()).collect();
        Self {
            text,
            fields,
            received_at: Utc::now(),
        }
    }

    /// Acknowledgement for a command that expects no reply line.
    pub(crate) fn acknowledgement() -> Self {
        Self {
            text: String::new(),
            fields: Vec::new(),
            received_at: Utc::now(),
        }
    }

    /// Whether the device flagged this reply with its error token.
    ///
    /// Communication still succeeded; what to do about the device-level
    /// error is up to the caller.
    pub fn is_device_error(&self) -> bool {
        self.text.starts_with("ERR")
    }
}

/// Decimal number, optionally signed, optionally with an exponent.
static NUMERIC_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?\d+(\.\d+)?([eE][+-]?\d+)?$").expect("numeric field pattern")
});

/// Parse one reply field as a finite number.
///
/// Accepts a leading `+`, and exponents with or without sign. Anything else
/// (empty fields from a short reply, `N/A`, device prose) fails with
/// [`ChannelError::Protocol`] naming the offending field.
pub fn parse_field(index: usize, text: &str) -> Result<f64, ChannelError> {
    let trimmed = text.trim();
    let reject = || ChannelError::Protocol {
        index,
        text: text.to_string(),
    };
    if !NUMERIC_FIELD.is_match(trimmed) {
        return Err(reject());
    }
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(reject()),
    }
}

/// Ordered candidate spellings of the same semantic query.
///
/// Device firmware dialects disagree on channel naming (`CH1` / `A1` /
/// `VPA1`) and on coupling subfields (`:AC` / `:ACDC` / none); the prober
/// walks this list in order until one spelling answers with a well-formed
/// reply.
#[derive(Debug, Clone)]
pub struct VariantSet {
    variants: Vec<Command>,
}

impl VariantSet {
    pub fn new(variants: Vec<Command>) -> Self {
        Self { variants }
    }

    /// Build a set of query variants from plain command strings.
    pub fn from_queries<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            variants: texts.into_iter().map(Command::query).collect(),
        }
    }

    /// The nine stock spellings for an N-channel AC/DC voltage read:
    /// (`CH`, `A`, `VPA`) channel prefixes crossed with (`:AC`, none,
    /// `:ACDC`) coupling subfields.
    pub fn voltage_read(channels: usize) -> Self {
        let mut variants = Vec::new();
        for prefix in ["CH", "A", "VPA"] {
            for suffix in [":AC", "", ":ACDC"] {
                let terms: Vec<String> = (1..=channels)
                    .map(|ch| format!("VOLTS:{prefix}{ch}{suffix}"))
                    .collect();
                variants.push(Command::query(format!("READ? {}", terms.join(", "))));
            }
        }
        Self { variants }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.variants.iter()
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exponential_notation() {
        assert!((parse_field(0, "1.230E-3").unwrap() - 0.00123).abs() < 1e-12);
        assert_eq!(parse_field(0, "+5").unwrap(), 5.0);
        assert_eq!(parse_field(0, "-12.5e2").unwrap(), -1250.0);
        assert_eq!(parse_field(0, " 118.301 ").unwrap(), 118.301);
    }

    #[test]
    fn rejects_non_numeric_fields() {
        for bad in ["", "N/A", "inf", "NaN", "1.2.3", "ERR -113", "0x10"] {
            let err = parse_field(2, bad).unwrap_err();
            match err {
                ChannelError::Protocol { index, text } => {
                    assert_eq!(index, 2);
                    assert_eq!(text, bad);
                }
                other => panic!("expected Protocol error, got {other:?}"),
            }
        }
    }

    #[test]
    fn reply_splits_identity_fields() {
        let reply = Reply::from_line("Vendor,Model,12345,1,0,3".to_string());
        assert_eq!(
            reply.fields,
            vec!["Vendor", "Model", "12345", "1", "0", "3"]
        );
        assert!(!reply.is_device_error());
    }

    #[test]
    fn device_error_token_is_still_a_reply() {
        let reply = Reply::from_line("ERR -113,\"Undefined header\"".to_string());
        assert!(reply.is_device_error());
        assert_eq!(reply.fields.len(), 2);
    }

    #[test]
    fn stock_voltage_variants_cover_all_dialects() {
        let set = VariantSet::voltage_read(3);
        assert_eq!(set.len(), 9);
        let first = set.iter().next().unwrap();
        assert_eq!(
            first.text,
            "READ? VOLTS:CH1:AC, VOLTS:CH2:AC, VOLTS:CH3:AC"
        );
        assert!(set.iter().all(|c| c.expects_reply));
    }
}
