//! Time values: seconds since 2000-01-01T00:00:00 converted to and from
//! civil time strings.
//!
//! Format patterns use the field letters of the definition language
//! (`yyyy-MM-dd'T'HH:mm:ss.SSSSSS` and friends) and are translated to
//! strftime specifiers internally.

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};

use crate::error::{Error, Result};

pub(crate) const DEFAULT_FORMAT: &str = "yyyy-MM-dd'T'HH:mm:ss.SSSSSS";

fn epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2000, 1, 1)
        .expect("valid epoch date")
        .and_hms_opt(0, 0, 0)
        .expect("valid epoch time")
}

/// Translate a format pattern to strftime specifiers. Quoted sections are
/// literal; `%` is escaped.
fn translate_format(format: &str) -> Result<String> {
    let bytes = format.as_bytes();
    let mut out = String::new();
    let mut i = 0;
    let run = |bytes: &[u8], i: usize, c: u8| {
        let mut n = 0;
        while i + n < bytes.len() && bytes[i + n] == c {
            n += 1;
        }
        n
    };
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                i += 1;
                let start = i;
                while i < bytes.len() && bytes[i] != b'\'' {
                    i += 1;
                }
                if i >= bytes.len() {
                    return Err(Error::InvalidFormat(
                        "unterminated quote in time format".to_owned(),
                    ));
                }
                if i == start {
                    out.push('\'');
                } else {
                    for &b in &bytes[start..i] {
                        if b == b'%' {
                            out.push_str("%%");
                        } else {
                            out.push(b as char);
                        }
                    }
                }
                i += 1;
            }
            b'y' => {
                let n = run(bytes, i, b'y');
                if n < 4 {
                    return Err(Error::InvalidFormat(format!(
                        "invalid time format '{format}'"
                    )));
                }
                out.push_str("%Y");
                i += n;
            }
            b'M' => {
                let n = run(bytes, i, b'M');
                out.push_str(if n >= 3 { "%b" } else { "%m" });
                i += n;
            }
            b'd' => {
                out.push_str("%d");
                i += run(bytes, i, b'd');
            }
            b'D' => {
                out.push_str("%j");
                i += run(bytes, i, b'D');
            }
            b'H' => {
                out.push_str("%H");
                i += run(bytes, i, b'H');
            }
            b'm' => {
                out.push_str("%M");
                i += run(bytes, i, b'm');
            }
            b's' => {
                out.push_str("%S");
                i += run(bytes, i, b's');
            }
            b'S' => {
                let n = run(bytes, i, b'S');
                match n {
                    3 => out.push_str("%3f"),
                    6 => out.push_str("%6f"),
                    _ => {
                        return Err(Error::InvalidFormat(format!(
                            "invalid fractional seconds width ({n}) in time format"
                        )));
                    }
                }
                i += n;
            }
            b'%' => {
                out.push_str("%%");
                i += 1;
            }
            b => {
                out.push(b as char);
                i += 1;
            }
        }
    }
    Ok(out)
}

/// Render seconds-since-epoch as a time string.
pub(crate) fn double_to_string(value: f64, format: &str) -> Result<String> {
    if !value.is_finite() {
        return Err(Error::Expression(format!(
            "can not convert non-finite time value ({value}) to a string"
        )));
    }
    let microseconds = (value * 1e6).round() as i64;
    let moment = epoch()
        .checked_add_signed(TimeDelta::microseconds(microseconds))
        .ok_or_else(|| {
            Error::Expression(format!("time value ({value}) is out of range"))
        })?;
    let pattern = translate_format(format)?;
    Ok(moment.format(&pattern).to_string())
}

/// Parse a time string into seconds since the epoch.
pub(crate) fn string_to_double(text: &str, format: &str) -> Result<f64> {
    let pattern = translate_format(format)?;
    let moment = NaiveDateTime::parse_from_str(text, &pattern)
        .or_else(|_| {
            NaiveDate::parse_from_str(text, &pattern)
                .map(|date| date.and_hms_opt(0, 0, 0).expect("midnight"))
        })
        .map_err(|err| {
            Error::InvalidFormat(format!(
                "invalid time string '{text}' for format '{format}' ({err})"
            ))
        })?;
    let delta = moment.signed_duration_since(epoch());
    let microseconds = delta.num_microseconds().ok_or_else(|| {
        Error::InvalidFormat(format!("time string '{text}' is out of range"))
    })?;
    Ok(microseconds as f64 / 1e6)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn epoch_is_zero() {
        assert_eq!(
            double_to_string(0.0, DEFAULT_FORMAT).unwrap(),
            "2000-01-01T00:00:00.000000"
        );
        assert_eq!(
            string_to_double("2000-01-01T00:00:00.000000", DEFAULT_FORMAT).unwrap(),
            0.0
        );
    }

    #[test]
    fn round_trip_with_fraction() {
        let value = 86400.5;
        let text = double_to_string(value, DEFAULT_FORMAT).unwrap();
        assert_eq!(text, "2000-01-02T00:00:00.500000");
        assert_eq!(string_to_double(&text, DEFAULT_FORMAT).unwrap(), value);
    }

    #[test]
    fn negative_values_reach_the_past() {
        let text = double_to_string(-1.0, "yyyy-MM-dd HH:mm:ss").unwrap();
        assert_eq!(text, "1999-12-31 23:59:59");
    }

    #[test]
    fn date_only_format() {
        assert_eq!(
            string_to_double("2000-01-02", "yyyy-MM-dd").unwrap(),
            86400.0
        );
    }

    #[test]
    fn non_finite_values_are_rejected() {
        assert!(double_to_string(f64::NAN, DEFAULT_FORMAT).is_err());
        assert!(string_to_double("garbage", DEFAULT_FORMAT).is_err());
    }
}
