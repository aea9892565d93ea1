//! Content-type negotiation for the four grpc-web media types.

use std::error::Error;
use std::fmt;

use crate::codec::PayloadFormat;
use crate::encoding::Encoding;

pub const GRPC_WEB_PROTO: &str = "application/grpc-web+proto";
pub const GRPC_WEB_TEXT_PROTO: &str = "application/grpc-web-text+proto";
pub const GRPC_WEB_JSON: &str = "application/grpc-web+json";
pub const GRPC_WEB_TEXT_JSON: &str = "application/grpc-web-text+json";

/// One of the recognized grpc-web content types: a payload format crossed
/// with a wire encoding.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ContentType {
    pub format: PayloadFormat,
    pub encoding: Encoding,
}

impl ContentType {
    /// Parse a header value against the recognized set.
    pub fn from_str(value: &str) -> Option<ContentType> {
        let content_type = match value.trim() {
            GRPC_WEB_PROTO => ContentType {
                format: PayloadFormat::Proto,
                encoding: Encoding::None,
            },
            GRPC_WEB_TEXT_PROTO => ContentType {
                format: PayloadFormat::Proto,
                encoding: Encoding::Base64,
            },
            GRPC_WEB_JSON => ContentType {
                format: PayloadFormat::Json,
                encoding: Encoding::None,
            },
            GRPC_WEB_TEXT_JSON => ContentType {
                format: PayloadFormat::Json,
                encoding: Encoding::Base64,
            },
            _ => return None,
        };

        Some(content_type)
    }

    pub fn as_str(&self) -> &'static str {
        match (self.format, self.encoding) {
            (PayloadFormat::Proto, Encoding::None) => GRPC_WEB_PROTO,
            (PayloadFormat::Proto, Encoding::Base64) => GRPC_WEB_TEXT_PROTO,
            (PayloadFormat::Json, Encoding::None) => GRPC_WEB_JSON,
            (PayloadFormat::Json, Encoding::Base64) => GRPC_WEB_TEXT_JSON,
        }
    }
}

/// The outcome of negotiation: how to read the request and how to write the
/// response.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Negotiation {
    pub request: ContentType,
    pub response: ContentType,
}

/// Negotiate request and response content types.
///
/// The request is accepted iff its `Content-Type` is in the recognized set
/// and its `Accept` is either unspecified (absent, empty, `*/*`,
/// `application/*`) or also in the set. An unspecified `Accept` echoes the
/// request's content type back.
pub fn negotiate(
    content_type: Option<&str>,
    accept: Option<&str>,
) -> Result<Negotiation, UnsupportedMediaType> {
    let request = content_type
        .and_then(ContentType::from_str)
        .ok_or_else(|| UnsupportedMediaType::new(content_type, accept))?;

    let response = if accept_unspecified(accept) {
        request
    } else {
        accept
            .and_then(ContentType::from_str)
            .ok_or_else(|| UnsupportedMediaType::new(content_type, accept))?
    };

    Ok(Negotiation { request, response })
}

fn accept_unspecified(accept: Option<&str>) -> bool {
    matches!(accept.map(str::trim), None | Some("") | Some("*/*") | Some("application/*"))
}

/// A request whose `Content-Type` or `Accept` falls outside the recognized
/// set. Mapped to HTTP 415.
#[derive(Debug)]
pub struct UnsupportedMediaType {
    content_type: Option<String>,
    accept: Option<String>,
}

impl UnsupportedMediaType {
    fn new(content_type: Option<&str>, accept: Option<&str>) -> UnsupportedMediaType {
        UnsupportedMediaType {
            content_type: content_type.map(str::to_owned),
            accept: accept.map(str::to_owned),
        }
    }
}

impl fmt::Display for UnsupportedMediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unsupported media type: content-type {:?}, accept {:?}",
            self.content_type.as_deref().unwrap_or("<absent>"),
            self.accept.as_deref().unwrap_or("<absent>"),
        )
    }
}

impl Error for UnsupportedMediaType {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognized_set_round_trips() {
        for value in [
            GRPC_WEB_PROTO,
            GRPC_WEB_TEXT_PROTO,
            GRPC_WEB_JSON,
            GRPC_WEB_TEXT_JSON,
        ] {
            let parsed = ContentType::from_str(value).unwrap();
            assert_eq!(parsed.as_str(), value);
        }
    }

    #[test]
    fn unrecognized_types_are_rejected() {
        for value in ["application/json", "application/grpc", "text/plain", ""] {
            assert!(ContentType::from_str(value).is_none(), "{}", value);
        }
    }

    #[test]
    fn unspecified_accept_echoes_request() {
        for accept in [None, Some(""), Some("*/*"), Some("application/*")] {
            let negotiation = negotiate(Some(GRPC_WEB_TEXT_PROTO), accept).unwrap();
            assert_eq!(negotiation.response.as_str(), GRPC_WEB_TEXT_PROTO);
        }
    }

    #[test]
    fn explicit_accept_wins() {
        let negotiation = negotiate(Some(GRPC_WEB_PROTO), Some(GRPC_WEB_TEXT_JSON)).unwrap();

        assert_eq!(negotiation.request.as_str(), GRPC_WEB_PROTO);
        assert_eq!(negotiation.response.as_str(), GRPC_WEB_TEXT_JSON);
    }

    #[test]
    fn bad_content_type_is_rejected() {
        assert!(negotiate(Some("application/json"), None).is_err());
        assert!(negotiate(None, None).is_err());
    }

    #[test]
    fn bad_accept_is_rejected() {
        assert!(negotiate(Some(GRPC_WEB_PROTO), Some("text/html")).is_err());
    }
}
