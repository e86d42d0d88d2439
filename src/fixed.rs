//! fixed.rs
//!
//! Decoding of the `FP32x32 { mag: M, sign: S }` literals the contract runtime
//! prints in place of native numbers. The log uses them for event times and
//! for the tempo of `SET_TEMPO`.
//!
//! Only the magnitude is meaningful for ticks: time never runs backwards in a
//! track, so the sign is carried along but ignored by [`Fp32x32::ticks`].

use std::str::FromStr;

const FP_OPEN: &str = "FP32x32 {";

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("not an FP32x32 literal")]
pub struct InvalidLiteral;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("field `{field}` is not a valid value: {text:?}")]
    Malformed { field: String, text: String },
}

/// A fixed-point literal as printed by the runtime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Fp32x32 {
    pub mag: u64,
    pub sign: bool,
}

impl Fp32x32 {
    /// Tick count carried by this literal.
    pub fn ticks(&self) -> u64 {
        self.mag
    }
}

impl FromStr for Fp32x32 {
    type Err = InvalidLiteral;

    /// Parses exactly `FP32x32 { mag: <digits>, sign: <word> }`. Any
    /// identifier is taken as the sign; only `true` sets it.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .trim()
            .strip_prefix(FP_OPEN)
            .and_then(|r| r.strip_suffix('}'))
            .ok_or(InvalidLiteral)?;

        let rest = body.trim_start().strip_prefix("mag:").ok_or(InvalidLiteral)?;
        let (mag, rest) = rest.split_once(',').ok_or(InvalidLiteral)?;
        let mag: u64 = mag.trim().parse().map_err(|_| InvalidLiteral)?;

        let sign = rest.trim().strip_prefix("sign:").ok_or(InvalidLiteral)?;
        let sign = sign.trim();
        if sign.is_empty() || !sign.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            return Err(InvalidLiteral);
        }
        let sign = sign == "true";

        Ok(Self { mag, sign })
    }
}

/// Every value that follows a `field: ` key in `content`, in order.
///
/// Keys must start on an identifier boundary so that `note: ` does not match
/// inside a longer name.
pub(crate) fn field_values<'a>(content: &'a str, field: &str) -> Vec<&'a str> {
    let key = format!("{field}: ");
    let bytes = content.as_bytes();
    content
        .match_indices(key.as_str())
        .filter(|(at, _)| {
            *at == 0 || {
                let prev = bytes[*at - 1];
                !(prev.is_ascii_alphanumeric() || prev == b'_')
            }
        })
        .map(|(at, k)| &content[at + k.len()..])
        .collect()
}

/// Find `field: FP32x32 { ... }` in a record body.
///
/// `Ok(None)` means the record has no such field. A key whose value opens a
/// fixed-point literal that cannot be read is reported as malformed. Keys
/// followed by something other than a literal (e.g. `time: Option::Some(..)`)
/// are not this field's encoding and are skipped.
pub fn find_fp(content: &str, field: &str) -> Result<Option<Fp32x32>, FieldError> {
    match field_values(content, field)
        .into_iter()
        .find(|value| value.starts_with(FP_OPEN))
    {
        Some(value) => read_literal(value, field).map(Some),
        None => Ok(None),
    }
}

/// Find `field: Option::Some(FP32x32 { ... })` in a record body.
///
/// `Option::None`, or no key at all, both come back as `Ok(None)`.
pub fn find_optional_fp(content: &str, field: &str) -> Result<Option<Fp32x32>, FieldError> {
    match field_values(content, field)
        .into_iter()
        .find_map(|value| value.strip_prefix("Option::Some("))
    {
        Some(inner) => read_literal(inner, field).map(Some),
        None => Ok(None),
    }
}

fn read_literal(value: &str, field: &str) -> Result<Fp32x32, FieldError> {
    let literal = match value.find('}') {
        Some(end) => &value[..=end],
        None => value,
    };
    literal.parse().map_err(|_| FieldError::Malformed {
        field: field.to_string(),
        text: literal.to_string(),
    })
}

/// Find `field: <digits>` in a record body.
///
/// A key followed by anything but digits, or by a number that does not fit
/// `u32`, is malformed. When the key is repeated the first well-formed value
/// wins.
pub fn find_uint(content: &str, field: &str) -> Result<Option<u32>, FieldError> {
    let mut malformed = None;
    for value in field_values(content, field) {
        let digits_len = value.bytes().take_while(u8::is_ascii_digit).count();
        let digits = &value[..digits_len];
        match digits.parse::<u32>() {
            Ok(n) => return Ok(Some(n)),
            Err(_) if malformed.is_none() => {
                let shown = value.split([',', ' ', '}', ')']).next().unwrap_or(value);
                malformed = Some(FieldError::Malformed {
                    field: field.to_string(),
                    text: shown.to_string(),
                });
            }
            Err(_) => {}
        }
    }
    match malformed {
        Some(e) => Err(e),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_literal() {
        let fp: Fp32x32 = "FP32x32 { mag: 120, sign: false }".parse().unwrap();
        assert_eq!(fp, Fp32x32 { mag: 120, sign: false });
        assert_eq!(fp.ticks(), 120);
    }

    #[test]
    fn sign_does_not_change_ticks() {
        let fp: Fp32x32 = "FP32x32 { mag: 7, sign: true }".parse().unwrap();
        assert!(fp.sign);
        assert_eq!(fp.ticks(), 7);
    }

    #[test]
    fn rejects_partial_literals() {
        assert!("FP32x32 { mag: , sign: false }".parse::<Fp32x32>().is_err());
        assert!("FP32x32 { mag: 3 }".parse::<Fp32x32>().is_err());
        assert!("FP32x32 { mag: 3, sign: }".parse::<Fp32x32>().is_err());
        assert!("FP64x64 { mag: 3, sign: false }".parse::<Fp32x32>().is_err());
    }

    #[test]
    fn absent_field_is_none() {
        let body = "NoteOn { channel: 0, note: 60, velocity: 100 }";
        assert_eq!(find_fp(body, "time"), Ok(None));
        assert_eq!(find_uint(body, "program"), Ok(None));
    }

    #[test]
    fn malformed_field_is_reported() {
        let body = "EndOfTrack { time: FP32x32 { mag: lots, sign: false } }";
        let err = find_fp(body, "time").unwrap_err();
        assert!(format!("{err}").contains("`time`"));

        let body = "NoteOn { channel: x, note: 60 }";
        assert!(matches!(find_uint(body, "channel"), Err(FieldError::Malformed { .. })));
    }

    #[test]
    fn non_literal_value_is_not_this_encoding() {
        let body = "SetTempo { tempo: FP32x32 { mag: 600000, sign: false }, time: Option::None }";
        assert_eq!(find_fp(body, "time"), Ok(None));
        assert_eq!(find_fp(body, "tempo").unwrap().unwrap().mag, 600000);
    }

    #[test]
    fn optional_literal() {
        let body = "SetTempo { tempo: FP32x32 { mag: 1, sign: false }, time: Option::Some(FP32x32 { mag: 96, sign: false }) }";
        assert_eq!(find_optional_fp(body, "time").unwrap().unwrap().ticks(), 96);
        assert_eq!(find_fp(body, "time"), Ok(None));

        let body = "SetTempo { tempo: FP32x32 { mag: 1, sign: false }, time: Option::None }";
        assert_eq!(find_optional_fp(body, "time"), Ok(None));
    }

    #[test]
    fn keys_respect_identifier_boundaries() {
        let body = "PolyTouch { channel: 2, keynote: 9, note: 64, value: 30 }";
        assert_eq!(find_uint(body, "note"), Ok(Some(64)));
    }

    #[test]
    fn any_sign_word_is_accepted() {
        let fp: Fp32x32 = "FP32x32 { mag: 42, sign: maybe }".parse().unwrap();
        assert_eq!(fp, Fp32x32 { mag: 42, sign: false });
        assert_eq!(fp.ticks(), 42);
        assert_eq!(find_fp("NoteOn { time: FP32x32 { mag: 7, sign: True } }", "time"), Ok(Some(Fp32x32 { mag: 7, sign: false })));
    }

    #[test]
    fn overflowing_integer_is_malformed() {
        let body = "Header { ticksPerBeat: 99999999999 }";
        assert!(find_uint(body, "ticksPerBeat").is_err());
    }
}
