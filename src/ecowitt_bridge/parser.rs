// Ecowitt Bridge - Weather station relay and metrics exporter for Prometheus
//
// Copyright 2024 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use std::error::Error;
use std::fmt;

/// Number of lines preceding the data line of an upload that does not use
/// blank-line separated HTTP framing.
pub const PREAMBLE_LINES: usize = 6;

/// Characters wrapped around the data line when it is stringified before parsing.
const DECORATION: &[char] = &['[', ']', '\'', '"'];

/// Value recorded for a key whose value isn't a number.
const NON_NUMERIC_VALUE: f64 = 0.0;

/// Problems found while parsing an upload. None of these stop parsing of
/// the remaining key/value pairs.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseWarning {
    NonNumeric { key: String, value: String },
    MissingSeparator { token: String },
    EmptyKey { token: String },
}

impl ParseWarning {
    pub fn as_label(&self) -> &'static str {
        match self {
            ParseWarning::NonNumeric { .. } => "non_numeric",
            ParseWarning::MissingSeparator { .. } => "missing_separator",
            ParseWarning::EmptyKey { .. } => "empty_key",
        }
    }
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseWarning::NonNumeric { key, value } => {
                write!(f, "non-numeric value for key {}: {}", key, value)
            }
            ParseWarning::MissingSeparator { token } => write!(f, "no '=' in token: {}", token),
            ParseWarning::EmptyKey { token } => write!(f, "empty key in token: {}", token),
        }
    }
}

impl Error for ParseWarning {}

/// Single key and numeric value from an upload.
#[derive(Debug, Clone, PartialEq)]
pub struct Datapoint {
    pub key: String,
    pub value: f64,
}

/// Key/value pairs parsed from an upload in the order each key first appeared
/// along with any problems encountered.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Payload {
    pub datapoints: Vec<Datapoint>,
    pub warnings: Vec<ParseWarning>,
}

impl Payload {
    /// Get the value for a key, if it was present in the upload.
    pub fn get(&self, key: &str) -> Option<f64> {
        self.datapoints.iter().find(|d| d.key == key).map(|d| d.value)
    }

    pub fn len(&self) -> usize {
        self.datapoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datapoints.is_empty()
    }

    // Duplicate keys keep their original position but take the latest value.
    fn insert(&mut self, key: &str, value: f64) {
        match self.datapoints.iter_mut().find(|d| d.key == key) {
            Some(existing) => existing.value = value,
            None => self.datapoints.push(Datapoint {
                key: key.to_owned(),
                value,
            }),
        }
    }
}

/// Return the portion of a decoded frame that contains the `key=value` data.
///
/// Frames with HTTP framing carry the data after the first blank line. Frames
/// without it carry the data after a fixed number of preamble lines.
pub fn frame_body(text: &str) -> String {
    if let Some(i) = text.find("\r\n\r\n") {
        return text[i + 4..].to_owned();
    }

    if let Some(i) = text.find("\n\n") {
        return text[i + 2..].to_owned();
    }

    text.split('\n')
        .skip(PREAMBLE_LINES)
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("&")
}

/// Parse `&` separated `key=value` pairs, ignoring any bracket or quote characters
/// left over from the data being stringified.
///
/// Values that aren't numbers are recorded as `0.0`. Tokens without a `=` are
/// skipped. Both cases are logged and included as warnings in the result.
pub fn parse(body: &str) -> Payload {
    let cleaned: String = body.chars().filter(|c| !DECORATION.contains(c)).collect();
    let mut payload = Payload::default();

    for token in cleaned.split('&').map(str::trim).filter(|t| !t.is_empty()) {
        let (key, raw) = match token.split_once('=') {
            Some((key, raw)) => (key.trim(), raw.trim()),
            None => {
                tracing::warn!(message = "skipping token without separator", token = %token);
                payload.warnings.push(ParseWarning::MissingSeparator {
                    token: token.to_owned(),
                });
                continue;
            }
        };

        if key.is_empty() {
            tracing::warn!(message = "skipping token with empty key", token = %token);
            payload.warnings.push(ParseWarning::EmptyKey {
                token: token.to_owned(),
            });
            continue;
        }

        let value = raw.parse::<f64>().unwrap_or_else(|_| {
            tracing::warn!(message = "non-numeric value", key = %key, value = %raw);
            payload.warnings.push(ParseWarning::NonNumeric {
                key: key.to_owned(),
                value: raw.to_owned(),
            });
            NON_NUMERIC_VALUE
        });

        payload.insert(key, value);
    }

    tracing::debug!(
        message = "parsed upload",
        num_datapoints = payload.datapoints.len(),
        num_warnings = payload.warnings.len(),
    );

    payload
}

#[cfg(test)]
mod tests {
    use super::{frame_body, parse, Datapoint, ParseWarning};

    #[test]
    fn test_parse_stringified_line() {
        let payload = parse("['tempf=70.0&humidity=50&windspeedmph=10']");

        assert_eq!(3, payload.len());
        assert_eq!(Some(70.0), payload.get("tempf"));
        assert_eq!(Some(50.0), payload.get("humidity"));
        assert_eq!(Some(10.0), payload.get("windspeedmph"));
        assert!(payload.warnings.is_empty());
    }

    #[test]
    fn test_parse_non_numeric_value() {
        let payload = parse("['tempf=70.0&stationtype=GW1000']");

        assert_eq!(Some(70.0), payload.get("tempf"));
        assert_eq!(Some(0.0), payload.get("stationtype"));
        assert_eq!(
            vec![ParseWarning::NonNumeric {
                key: "stationtype".to_owned(),
                value: "GW1000".to_owned(),
            }],
            payload.warnings
        );
    }

    #[test]
    fn test_parse_missing_separator_continues() {
        let payload = parse("tempf=70.0&garbage&humidity=50");

        assert_eq!(2, payload.len());
        assert_eq!(Some(50.0), payload.get("humidity"));
        assert_eq!(
            vec![ParseWarning::MissingSeparator {
                token: "garbage".to_owned()
            }],
            payload.warnings
        );
    }

    #[test]
    fn test_parse_splits_on_first_equals() {
        let payload = parse("a=1=2&b=3");

        assert_eq!(Some(0.0), payload.get("a"));
        assert_eq!(Some(3.0), payload.get("b"));
        assert_eq!("non_numeric", payload.warnings[0].as_label());
    }

    #[test]
    fn test_parse_duplicate_key_last_wins_first_position() {
        let payload = parse("a=1&b=2&a=3");

        assert_eq!(
            vec![
                Datapoint {
                    key: "a".to_owned(),
                    value: 3.0
                },
                Datapoint {
                    key: "b".to_owned(),
                    value: 2.0
                },
            ],
            payload.datapoints
        );
    }

    #[test]
    fn test_parse_empty_tokens_and_keys() {
        let payload = parse("&a=1&&=5&\r\n");

        assert_eq!(1, payload.len());
        assert_eq!("empty_key", payload.warnings[0].as_label());
    }

    #[test]
    fn test_parse_empty_body() {
        let payload = parse("");

        assert!(payload.is_empty());
        assert!(payload.warnings.is_empty());
    }

    #[test]
    fn test_frame_body_http() {
        let frame = "POST /data/report/ HTTP/1.1\r\nHost: bridge\r\nContent-Length: 13\r\n\r\ntempf=70&uv=1";
        assert_eq!("tempf=70&uv=1", frame_body(frame));
    }

    #[test]
    fn test_frame_body_preamble_lines() {
        let frame = "one\ntwo\nthree\nfour\nfive\nsix\ntempf=70&uv=1\n";
        assert_eq!("tempf=70&uv=1", frame_body(frame));
    }

    #[test]
    fn test_frame_body_short_frame() {
        assert_eq!("", frame_body("just\na\nfew\nlines"));
    }
}
