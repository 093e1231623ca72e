//! Inbound side of the robot control protocol.
//!
//! The robot pushes newline-delimited records over the same socket the
//! bridge writes commands to. Only two record kinds carry state the bridge
//! tracks: distance reports and power reports. Everything else is parsed far
//! enough to be recognised and then ignored.

use thiserror::Error;

use crate::command::{CommandCode, FIELD_DELIMITER, RECORD_TERMINATOR};

/// A telemetry record the bridge acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryRecord {
    /// `CMD_SONIC#<cm>`
    Distance { centimetres: String },
    /// `CMD_POWER#<servo volts>#<pi volts>`
    Power { servo: String, rasp: String },
}

/// Why a single record could not be applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// A blank record inside a chunk: the stream is out of step.
    #[error("empty record")]
    Empty,

    #[error("record is not valid UTF-8")]
    Encoding,

    #[error("{code} expects {expected} data token(s), got {got}")]
    Arity {
        code: CommandCode,
        expected: usize,
        got: usize,
    },
}

impl RecordError {
    /// Only an empty record desynchronises the stream; the rest are isolated
    /// to the record that produced them.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RecordError::Empty)
    }
}

/// Split a raw receive chunk into records.
///
/// A single trailing empty piece (produced by a terminating line break) is
/// dropped. A non-empty final piece without a terminator is still a record.
/// Trailing `\r` is stripped from every record.
pub fn split_records(raw: &[u8]) -> Vec<&[u8]> {
    let terminator = RECORD_TERMINATOR as u8;
    let mut records: Vec<&[u8]> = raw
        .split(|&b| b == terminator)
        .map(|record| record.strip_suffix(b"\r").unwrap_or(record))
        .collect();
    if records.last().is_some_and(|last| last.is_empty()) {
        records.pop();
    }
    records
}

/// Parse one record.
///
/// Returns `Ok(None)` for codes the bridge does not act on, including codes it
/// has never heard of. Bytes that are not UTF-8 fail the record with
/// [`RecordError::Encoding`] rather than being patched up.
pub fn parse_record(record: &[u8]) -> Result<Option<TelemetryRecord>, RecordError> {
    if record.is_empty() {
        return Err(RecordError::Empty);
    }
    let record = std::str::from_utf8(record).map_err(|_| RecordError::Encoding)?;
    let mut tokens = record.split(FIELD_DELIMITER);
    let head = tokens.next().unwrap_or_default();
    let data: Vec<&str> = tokens.collect();

    match CommandCode::from_token(head) {
        Some(code @ CommandCode::Sonic) => match data.as_slice() {
            [cm] => Ok(Some(TelemetryRecord::Distance {
                centimetres: (*cm).to_string(),
            })),
            _ => Err(RecordError::Arity {
                code,
                expected: 1,
                got: data.len(),
            }),
        },
        Some(code @ CommandCode::Power) => match data.as_slice() {
            [servo, rasp] => Ok(Some(TelemetryRecord::Power {
                servo: (*servo).to_string(),
                rasp: (*rasp).to_string(),
            })),
            _ => Err(RecordError::Arity {
                code,
                expected: 2,
                got: data.len(),
            }),
        },
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_break_does_not_produce_a_record() {
        assert_eq!(
            split_records(b"CMD_SONIC#10\nCMD_SONIC#20\n"),
            vec![&b"CMD_SONIC#10"[..], &b"CMD_SONIC#20"[..]]
        );
    }

    #[test]
    fn unterminated_final_record_is_kept() {
        assert_eq!(
            split_records(b"CMD_SONIC#10\nCMD_POWER#8.40#5.10"),
            vec![&b"CMD_SONIC#10"[..], &b"CMD_POWER#8.40#5.10"[..]]
        );
    }

    #[test]
    fn blank_middle_record_is_preserved_for_the_parser() {
        assert_eq!(split_records(b"a\n\nb\n"), vec![&b"a"[..], &b""[..], &b"b"[..]]);
        assert!(split_records(b"").is_empty());
    }

    #[test]
    fn carriage_returns_are_stripped() {
        assert_eq!(split_records(b"CMD_SONIC#5\r\n"), vec![&b"CMD_SONIC#5"[..]]);
    }

    #[test]
    fn distance_record_parses() {
        assert_eq!(
            parse_record(b"CMD_SONIC#37").unwrap(),
            Some(TelemetryRecord::Distance {
                centimetres: "37".to_string()
            })
        );
    }

    #[test]
    fn distance_record_with_wrong_arity_is_rejected() {
        let err = parse_record(b"CMD_SONIC").unwrap_err();
        assert_eq!(
            err,
            RecordError::Arity {
                code: CommandCode::Sonic,
                expected: 1,
                got: 0
            }
        );
        assert!(!err.is_fatal());
        assert!(parse_record(b"CMD_SONIC#1#2").is_err());
    }

    #[test]
    fn power_record_needs_exactly_two_tokens() {
        assert_eq!(
            parse_record(b"CMD_POWER#8.40#5.10").unwrap(),
            Some(TelemetryRecord::Power {
                servo: "8.40".to_string(),
                rasp: "5.10".to_string()
            })
        );
        assert!(parse_record(b"CMD_POWER#8.40").is_err());
        assert!(parse_record(b"CMD_POWER#8.40#5.10#1").is_err());
    }

    #[test]
    fn unknown_and_unhandled_codes_are_ignored() {
        assert_eq!(parse_record(b"CMD_FLY#1#2").unwrap(), None);
        assert_eq!(parse_record(b"CMD_MOVE#1#0#0#8#0").unwrap(), None);
    }

    #[test]
    fn invalid_utf8_fails_only_that_record() {
        let err = parse_record(b"CMD_SONIC#3\xFF7").unwrap_err();
        assert_eq!(err, RecordError::Encoding);
        assert!(!err.is_fatal());
    }

    #[test]
    fn empty_record_is_fatal() {
        let err = parse_record(b"").unwrap_err();
        assert!(err.is_fatal());
    }
}
