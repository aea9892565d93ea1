//! Marshalling of request and response payloads in proto or JSON mode.

use std::error::Error;
use std::fmt;

use bytes::Bytes;
use prost::Message;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::frame::MalformedFrame;
use crate::status::Status;

/// How message payloads are rendered on the wire, chosen by content-type
/// negotiation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PayloadFormat {
    Proto,
    Json,
}

/// A message type usable on this transport: protobuf for the binary mode and
/// serde for the JSON mode.
pub trait WebMessage: Message + Serialize + DeserializeOwned + Default + Send + 'static {}

impl<T> WebMessage for T where T: Message + Serialize + DeserializeOwned + Default + Send + 'static {}

/// Serialize a message in the given format.
///
/// Proto encoding cannot fail; a JSON serializer failure is reported as an
/// `Internal` status so it travels in-band in the trailer.
pub fn encode_message<T: WebMessage>(message: &T, format: PayloadFormat) -> Result<Bytes, Status> {
    match format {
        PayloadFormat::Proto => Ok(Bytes::from(message.encode_to_vec())),
        PayloadFormat::Json => serde_json::to_vec(message)
            .map(Bytes::from)
            .map_err(|e| Status::internal(format!("response serialization failed: {}", e))),
    }
}

/// Deserialize a message in the given format.
pub fn decode_message<T: WebMessage>(bytes: &[u8], format: PayloadFormat) -> Result<T, ParseError> {
    match format {
        PayloadFormat::Proto => T::decode(bytes).map_err(ParseError::from),
        PayloadFormat::Json => serde_json::from_slice(bytes).map_err(ParseError::from),
    }
}

/// A request body that cannot be decoded: bad base64, malformed framing, or
/// a payload the serializer rejects. Mapped to HTTP 422 at the transport
/// boundary, before any gRPC frames are produced.
#[derive(Debug)]
pub struct ParseError {
    message: String,
}

impl ParseError {
    pub(crate) fn new(message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error: {}", self.message)
    }
}

impl Error for ParseError {}

impl From<MalformedFrame> for ParseError {
    fn from(err: MalformedFrame) -> Self {
        ParseError::new(err.to_string())
    }
}

impl From<prost::DecodeError> for ParseError {
    fn from(err: prost::DecodeError) -> Self {
        ParseError::new(err.to_string())
    }
}

impl From<serde_json::Error> for ParseError {
    fn from(err: serde_json::Error) -> Self {
        ParseError::new(err.to_string())
    }
}

impl From<base64::DecodeError> for ParseError {
    fn from(err: base64::DecodeError) -> Self {
        ParseError::new(format!("invalid base64 body: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Ping;

    #[test]
    fn both_formats_round_trip() {
        let message = Ping {
            seq: 3,
            note: "ready".to_owned(),
        };

        for format in [PayloadFormat::Proto, PayloadFormat::Json] {
            let bytes = encode_message(&message, format).unwrap();
            let decoded: Ping = decode_message(&bytes, format).unwrap();
            assert_eq!(decoded, message, "{:?}", format);
        }
    }

    #[test]
    fn proto_decode_failure_is_parse_error() {
        // 0x08 opens a varint field and then the buffer ends.
        let err = decode_message::<Ping>(&[0x08], PayloadFormat::Proto).unwrap_err();
        assert!(err.to_string().starts_with("parse error:"));
    }

    #[test]
    fn json_decode_failure_is_parse_error() {
        let err = decode_message::<Ping>(b"{oops", PayloadFormat::Json).unwrap_err();
        assert!(err.to_string().starts_with("parse error:"));
    }
}
