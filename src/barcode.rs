//! Barcode payload decoding.
//!
//! The scanner behaves like a keyboard and emits one of two payload shapes:
//!
//! - Line39: the cut length alone, e.g. `128.50`.
//! - Line128: a 4-digit work order followed by the length, e.g. `1234128.50`.
//!
//! The two are told apart by a prefix heuristic: a payload longer than four characters
//! whose first four characters are all digits is a Line128 code. A Line39 length never
//! has four integer digits in practice, but a bare 4-digit payload such as `1234` is read
//! as a Line39 length of 1234 inches.

use log::{error, info};
use thiserror::Error;

use crate::units::round_hundredths;

const ORDER_ID_LEN: usize = 4;

/// The decoded content of one committed scan.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScanResult {
    /// Work order number, present only for Line128 payloads.
    pub order_id: Option<String>,
    /// Ordered cut length, rounded to hundredths of an inch.
    pub target_length_inches: f64,
}

impl ScanResult {
    /// The "nothing scanned" result.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.order_id.is_none() && self.target_length_inches == 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    /// The length portion of the payload is not a usable number.
    #[error("could not convert '{text}' to a length")]
    InvalidLength {
        /// Work order recovered from a Line128 prefix, if there was one.
        order_id: Option<String>,
        text: String,
    },
}

impl ParseError {
    /// The result the station falls back to after this error: the work order (if known)
    /// is kept and the length reads zero.
    pub fn fallback(&self) -> ScanResult {
        match self {
            ParseError::InvalidLength { order_id, .. } => ScanResult {
                order_id: order_id.clone(),
                target_length_inches: 0.0,
            },
        }
    }
}

/// Decodes a raw scanner payload into a work order and target length.
///
/// Only the length text is trimmed. Leading whitespace therefore rules out the work
/// order prefix: ` 123456` is a Line39 length, not order `1234`.
pub fn parse(raw: &str) -> Result<ScanResult, ParseError> {
    if raw.trim().is_empty() {
        return Ok(ScanResult::empty());
    }

    if is_composite(raw) {
        let (order_id, length_text) = raw.split_at(ORDER_ID_LEN);
        let target_length_inches =
            parse_length(length_text).ok_or_else(|| ParseError::InvalidLength {
                order_id: Some(order_id.to_string()),
                text: length_text.trim().to_string(),
            })?;
        return Ok(ScanResult {
            order_id: Some(order_id.to_string()),
            target_length_inches,
        });
    }

    let target_length_inches = parse_length(raw).ok_or_else(|| ParseError::InvalidLength {
        order_id: None,
        text: raw.trim().to_string(),
    })?;
    Ok(ScanResult {
        order_id: None,
        target_length_inches,
    })
}

/// Like [`parse`], but never fails: errors are logged and replaced by their fallback.
pub fn parse_or_fallback(raw: &str) -> ScanResult {
    match parse(raw) {
        Ok(scan) => scan,
        Err(e) => {
            error!("Barcode '{}' rejected: {}", raw, e);
            e.fallback()
        }
    }
}

fn is_composite(raw: &str) -> bool {
    raw.len() > ORDER_ID_LEN && raw.as_bytes()[..ORDER_ID_LEN].iter().all(u8::is_ascii_digit)
}

fn parse_length(text: &str) -> Option<f64> {
    match text.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Some(round_hundredths(v)),
        _ => None,
    }
}

/// Collects scanner keystrokes until the line end.
#[derive(Debug, Default, Clone)]
pub struct ScanBuffer {
    pending: String,
}

impl ScanBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a keystroke. Only digits and periods belong to a payload; anything else is
    /// ignored and `false` is returned.
    pub fn push(&mut self, c: char) -> bool {
        if c.is_ascii_digit() || c == '.' {
            self.pending.push(c);
            true
        } else {
            false
        }
    }

    /// Takes the buffered payload at line end, leaving the buffer empty.
    pub fn commit(&mut self) -> String {
        let line = std::mem::take(&mut self.pending);
        info!("Received input: {}", line);
        line
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_is_nothing_scanned() {
        assert_eq!(parse("").unwrap(), ScanResult::empty());
        assert!(parse("").unwrap().is_empty());
    }

    #[test]
    fn line39_payload_is_a_plain_length() {
        for (raw, expected) in [("8.25", 8.25), ("128.5", 128.5), ("96", 96.0), ("1234", 1234.0)] {
            let scan = parse(raw).unwrap();
            assert_eq!(scan.order_id, None, "payload {raw}");
            assert_eq!(scan.target_length_inches, expected, "payload {raw}");
        }
    }

    #[test]
    fn line128_payload_splits_work_order_and_length() {
        let scan = parse("1234128.50").unwrap();
        assert_eq!(scan.order_id.as_deref(), Some("1234"));
        assert_eq!(scan.target_length_inches, 128.5);

        let scan = parse("00077").unwrap();
        assert_eq!(scan.order_id.as_deref(), Some("0007"));
        assert_eq!(scan.target_length_inches, 7.0);
    }

    #[test]
    fn leading_whitespace_rules_out_the_work_order() {
        let scan = parse(" 123456").unwrap();
        assert_eq!(scan.order_id, None);
        assert_eq!(scan.target_length_inches, 123456.0);

        let scan = parse("1234128.50\r\n").unwrap();
        assert_eq!(scan.order_id.as_deref(), Some("1234"));
        assert_eq!(scan.target_length_inches, 128.5);

        assert!(parse(" \t").unwrap().is_empty());
    }

    #[test]
    fn lengths_are_rounded_to_hundredths() {
        assert_eq!(parse("12.3456").unwrap().target_length_inches, 12.35);
        assert_eq!(parse("99991.004").unwrap().target_length_inches, 1.0);
    }

    #[test]
    fn bad_line128_suffix_keeps_the_work_order() {
        let err = parse("1234..5").unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidLength {
                order_id: Some("1234".to_string()),
                text: "..5".to_string(),
            }
        );
        let fallback = err.fallback();
        assert_eq!(fallback.order_id.as_deref(), Some("1234"));
        assert_eq!(fallback.target_length_inches, 0.0);
    }

    #[test]
    fn bad_line39_payload_falls_back_to_empty() {
        let err = parse("12..5").unwrap_err();
        assert!(matches!(err, ParseError::InvalidLength { order_id: None, .. }));
        assert_eq!(parse_or_fallback("12..5"), ScanResult::empty());
    }

    #[test]
    fn non_finite_and_negative_lengths_are_rejected() {
        assert!(parse("inf").is_err());
        assert!(parse("NaN").is_err());
        assert!(parse("-5").is_err());
    }

    #[test]
    fn scan_buffer_keeps_only_payload_characters() {
        let mut buffer = ScanBuffer::new();
        for c in "12x34.5 0".chars() {
            buffer.push(c);
        }
        assert_eq!(buffer.pending(), "1234.50");
        assert_eq!(buffer.commit(), "1234.50");
        assert_eq!(buffer.pending(), "");
    }
}
