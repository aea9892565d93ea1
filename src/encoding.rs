//! The text transform: base64 over the framed byte stream for the
//! `grpc-web-text` content types.

use base64::Engine as _;
use bytes::Bytes;

use crate::codec::ParseError;
use crate::util::base64::STANDARD;

/// Whether the framed body travels raw or base64-wrapped.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Encoding {
    None,
    Base64,
}

impl Encoding {
    /// Classify a content-type value. Anything whose media type contains
    /// `grpc-web-text` is text mode; everything else passes through.
    pub fn for_content_type(value: &str) -> Encoding {
        if value.contains("grpc-web-text") {
            Encoding::Base64
        } else {
            Encoding::None
        }
    }

    /// Undo the transform on an inbound body, as one blob.
    pub fn decode(self, body: Bytes) -> Result<Bytes, ParseError> {
        match self {
            Encoding::None => Ok(body),
            Encoding::Base64 => STANDARD
                .decode(&body)
                .map(Bytes::from)
                .map_err(ParseError::from),
        }
    }

    /// Apply the transform to an outbound chunk.
    ///
    /// For unary responses the chunk is the whole framed body; for streaming
    /// responses each frame is encoded independently, so the HTTP chunk
    /// boundary stays on the frame boundary.
    pub fn encode(self, chunk: Bytes) -> Bytes {
        match self {
            Encoding::None => chunk,
            Encoding::Base64 => Bytes::from(STANDARD.encode(&chunk).into_bytes()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_classification() {
        let cases = &[
            ("application/grpc-web", Encoding::None),
            ("application/grpc-web+proto", Encoding::None),
            ("application/grpc-web+json", Encoding::None),
            ("application/grpc-web-text", Encoding::Base64),
            ("application/grpc-web-text+proto", Encoding::Base64),
            ("application/grpc-web-text+json", Encoding::Base64),
            ("application/json", Encoding::None),
        ];

        for (value, expected) in cases {
            assert_eq!(Encoding::for_content_type(value), *expected, "{}", value);
        }
    }

    #[test]
    fn base64_round_trip() {
        let body = Bytes::from_static(b"\x00\x00\x00\x00\x05hello");
        let encoded = Encoding::Base64.encode(body.clone());

        assert_ne!(encoded, body);
        assert_eq!(Encoding::Base64.decode(encoded).unwrap(), body);
    }

    #[test]
    fn unpadded_base64_is_accepted() {
        // grpc-web clients are inconsistent about padding.
        let decoded = Encoding::Base64.decode(Bytes::from_static(b"aGVsbG8")).unwrap();
        assert_eq!(decoded, Bytes::from_static(b"hello"));
    }

    #[test]
    fn binary_mode_is_pass_through() {
        let body = Bytes::from_static(b"\x80\x00\x00\x00\x00");
        assert_eq!(Encoding::None.encode(body.clone()), body);
        assert_eq!(Encoding::None.decode(body.clone()).unwrap(), body);
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let err = Encoding::Base64
            .decode(Bytes::from_static(b"!!not base64!!"))
            .unwrap_err();
        assert!(err.to_string().contains("invalid base64"));
    }
}
