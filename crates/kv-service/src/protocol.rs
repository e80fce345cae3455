//! The minimal newline-delimited text protocol this service speaks over TCP.
//!
//! Requests are one line each: `GET <key> <request_id>`, `PUT <key> <value> <request_id>`, or
//! `REMOVE <key> <request_id>`. Responses are `<code> <request_id> <payload>`, where `payload`
//! is a single whitespace-free token: the value on a successful `Get`/`Remove`, or a short
//! machine-readable reason otherwise.

use std::fmt::{self, Display, Formatter};

/// A parsed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `GET <key> <request_id>`
    Get { key: i32, request_id: String },
    /// `PUT <key> <value> <request_id>`
    Put { key: i32, value: String, request_id: String },
    /// `REMOVE <key> <request_id>`
    Remove { key: i32, request_id: String },
}

impl Request {
    #[must_use]
    pub fn request_id(&self) -> &str {
        match self {
            Self::Get { request_id, .. }
            | Self::Put { request_id, .. }
            | Self::Remove { request_id, .. } => request_id,
        }
    }
}

/// Why a request line could not be parsed into a [`Request`].
#[derive(Debug, Clone, Copy, thiserror::Error)]
pub enum ParseError {
    /// The line had no recognized verb, or was missing fields the verb requires.
    #[error("malformed request line")]
    Malformed,
    /// The `<key>` token was not a valid `i32`.
    #[error("key is not a valid integer")]
    InvalidKey,
}

/// Parse one request line (without its trailing newline).
pub fn parse_request(line: &str) -> Result<Request, ParseError> {
    let mut tokens = line.split_whitespace();
    let verb = tokens.next().ok_or(ParseError::Malformed)?;

    match verb {
        "GET" => {
            let (Some(key), Some(request_id), None) =
                (tokens.next(), tokens.next(), tokens.next())
            else {
                return Err(ParseError::Malformed);
            };
            let key = key.parse().map_err(|_| ParseError::InvalidKey)?;
            Ok(Request::Get { key, request_id: request_id.to_owned() })
        },
        "PUT" => {
            let (Some(key), Some(value), Some(request_id), None) =
                (tokens.next(), tokens.next(), tokens.next(), tokens.next())
            else {
                return Err(ParseError::Malformed);
            };
            let key = key.parse().map_err(|_| ParseError::InvalidKey)?;
            Ok(Request::Put { key, value: value.to_owned(), request_id: request_id.to_owned() })
        },
        "REMOVE" => {
            let (Some(key), Some(request_id), None) =
                (tokens.next(), tokens.next(), tokens.next())
            else {
                return Err(ParseError::Malformed);
            };
            let key = key.parse().map_err(|_| ParseError::InvalidKey)?;
            Ok(Request::Remove { key, request_id: request_id.to_owned() })
        },
        _ => Err(ParseError::Malformed),
    }
}

/// A response line, ready to be written followed by a newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code:       u16,
    pub request_id: String,
    pub payload:    String,
}

impl Display for Response {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.code, self.request_id, self.payload)
    }
}

impl Response {
    #[must_use]
    pub fn ok(request_id: String, payload: impl Into<String>) -> Self {
        Self { code: 200, request_id, payload: payload.into() }
    }

    #[must_use]
    pub fn not_found(request_id: String) -> Self {
        Self { code: 404, request_id, payload: "not_found".to_owned() }
    }

    #[must_use]
    pub fn reserved_key(request_id: String) -> Self {
        // Per the documented §6 code policy (200 on applied, 404 on failure), a rejected write
        // is reported the same way any other `Put` failure is: no separate code for *why* it
        // failed.
        Self { code: 404, request_id, payload: "reserved_key".to_owned() }
    }

    #[must_use]
    pub fn queue_full(request_id: String) -> Self {
        // Same reasoning as `reserved_key`: this is the chosen 404-equivalent response for the
        // `QueueFull` open question (see SPEC_FULL.md §9), not a distinct wire status.
        Self { code: 404, request_id, payload: "queue_full".to_owned() }
    }

    #[must_use]
    pub fn malformed() -> Self {
        Self { code: 400, request_id: String::new(), payload: "malformed_request".to_owned() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_get_request() {
        assert_eq!(
            parse_request("GET 42 req-1").unwrap(),
            Request::Get { key: 42, request_id: "req-1".to_owned() },
        );
    }

    #[test]
    fn parses_a_put_request() {
        assert_eq!(
            parse_request("PUT 42 hello req-2").unwrap(),
            Request::Put { key: 42, value: "hello".to_owned(), request_id: "req-2".to_owned() },
        );
    }

    #[test]
    fn parses_a_remove_request() {
        assert_eq!(
            parse_request("REMOVE 42 req-3").unwrap(),
            Request::Remove { key: 42, request_id: "req-3".to_owned() },
        );
    }

    #[test]
    fn rejects_an_unknown_verb() {
        assert!(matches!(parse_request("FROB 1 2"), Err(ParseError::Malformed)));
    }

    #[test]
    fn rejects_a_non_integer_key() {
        assert!(matches!(parse_request("GET abc req-1"), Err(ParseError::InvalidKey)));
    }

    #[test]
    fn rejects_trailing_tokens() {
        assert!(matches!(parse_request("GET 1 req-1 extra"), Err(ParseError::Malformed)));
    }

    #[test]
    fn response_display_matches_the_wire_format() {
        let response = Response::ok("req-1".to_owned(), "hello".to_owned());
        assert_eq!(response.to_string(), "200 req-1 hello");
    }
}
