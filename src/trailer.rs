//! The in-body trailer block: an HTTP/1-style header list carrying the gRPC
//! status, wrapped in a frame whose tag has the MSB set.

use bytes::{BufMut, Bytes, BytesMut};

use crate::metadata::{Metadata, MetadataValue};
use crate::status::{Code, Status};

pub const GRPC_STATUS: &str = "grpc-status";
pub const GRPC_MESSAGE: &str = "grpc-message";
pub const GRPC_WEB_MARKER: &str = "x-grpc-web";

const RESERVED: [&str; 3] = [GRPC_STATUS, GRPC_MESSAGE, GRPC_WEB_MARKER];

/// Encode a status as a trailer block.
///
/// The mandatory lines come first and in order: `grpc-status`,
/// `grpc-message`, `x-grpc-web:1`. Non-reserved metadata follows, one
/// CRLF-terminated `name:value` line each. The message is emitted verbatim;
/// callers must keep CR and LF out of it.
pub fn encode(status: &Status) -> Bytes {
    let mut buf = BytesMut::new();

    put_line(&mut buf, GRPC_STATUS, &(status.code() as i32).to_string());
    put_line(&mut buf, GRPC_MESSAGE, status.message());
    put_line(&mut buf, GRPC_WEB_MARKER, "1");

    for (key, value) in status.metadata().iter() {
        if RESERVED.contains(&key) {
            continue;
        }
        put_line(&mut buf, key, &value.render());
    }

    buf.freeze()
}

fn put_line(buf: &mut BytesMut, name: &str, value: &str) {
    buf.put_slice(name.as_bytes());
    buf.put_u8(b':');
    buf.put_slice(value.as_bytes());
    buf.put_slice(b"\r\n");
}

/// Parse a trailer block back into a status.
///
/// Lines split on `\r?\n`; each line splits at the first `:`. Lines without
/// a separator are ignored, and the last occurrence of a duplicated name
/// wins. A missing or non-numeric `grpc-status` is treated as `Unknown`.
pub fn parse(body: &[u8]) -> Status {
    let mut code: Option<Code> = None;
    let mut message = String::new();
    let mut metadata = Metadata::new();

    for line in String::from_utf8_lossy(body).split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let (name, value) = match line.split_once(':') {
            Some(pair) => pair,
            None => continue,
        };
        let name = name.to_ascii_lowercase();

        match name.as_str() {
            GRPC_STATUS => {
                code = Some(match value.parse::<i32>() {
                    Ok(i) if i >= 0 => Code::from(i),
                    _ => Code::Unknown,
                });
            }
            GRPC_MESSAGE => message = value.to_owned(),
            GRPC_WEB_MARKER => {}
            _ => metadata.insert_ascii(name, value),
        }
    }

    Status::new(code.unwrap_or(Code::Unknown), message).with_metadata(metadata)
}

/// Fetch a parsed metadata value, decoding `*_bin` keys.
pub(crate) fn decode_bin_values(metadata: &Metadata) -> Metadata {
    let mut decoded = Metadata::new();
    for (key, value) in metadata.iter() {
        match value {
            MetadataValue::Ascii(s) if key.ends_with("_bin") => {
                use base64::Engine as _;
                match crate::util::base64::STANDARD.decode(s) {
                    Ok(bytes) => decoded.insert_binary(key, bytes),
                    Err(_) => decoded.insert_ascii(key, s.clone()),
                }
            }
            MetadataValue::Ascii(s) => decoded.insert_ascii(key, s.clone()),
            MetadataValue::Binary(b) => decoded.insert_binary(key, b.clone()),
        }
    }
    decoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_trailer_layout() {
        let block = encode(&Status::ok("OK"));
        assert_eq!(
            &block[..],
            b"grpc-status:0\r\ngrpc-message:OK\r\nx-grpc-web:1\r\n"
        );
    }

    #[test]
    fn metadata_follows_mandatory_lines() {
        let mut metadata = Metadata::new();
        metadata.insert_ascii("x-request-id", "42");

        let block = encode(&Status::invalid_argument("bad id").with_metadata(metadata));

        assert_eq!(
            &block[..],
            b"grpc-status:3\r\ngrpc-message:bad id\r\nx-grpc-web:1\r\nx_request_id:42\r\n"
        );
    }

    #[test]
    fn reserved_names_are_not_duplicated() {
        let mut metadata = Metadata::new();
        metadata.insert_ascii("grpc-status", "0");
        metadata.insert_ascii("x-grpc-web", "2");
        metadata.insert_ascii("x-extra", "keep");

        let block = encode(&Status::internal("boom").with_metadata(metadata));
        let text = std::str::from_utf8(&block).unwrap();

        assert_eq!(text.matches("grpc-status").count(), 1);
        assert_eq!(text.matches("x-grpc-web").count(), 1);
        assert!(text.contains("x_extra:keep\r\n"));
    }

    #[test]
    fn parse_round_trip() {
        let mut metadata = Metadata::new();
        metadata.insert_ascii("retry-after", "5");

        let status = Status::new(Code::Unavailable, "try later").with_metadata(metadata);
        let parsed = parse(&encode(&status));

        assert_eq!(parsed.code(), Code::Unavailable);
        assert_eq!(parsed.message(), "try later");
        assert_eq!(
            parsed.metadata().get("retry_after").unwrap().as_ascii(),
            Some("5")
        );
    }

    #[test]
    fn parse_tolerates_bare_newlines_and_garbage() {
        let parsed = parse(b"garbage line\ngrpc-status:3\ngrpc-message:nope\n");

        assert_eq!(parsed.code(), Code::InvalidArgument);
        assert_eq!(parsed.message(), "nope");
    }

    #[test]
    fn duplicate_keys_last_wins() {
        let parsed = parse(b"grpc-status:5\r\ngrpc-status:3\r\ngrpc-message:first\r\ngrpc-message:second\r\n");

        assert_eq!(parsed.code(), Code::InvalidArgument);
        assert_eq!(parsed.message(), "second");
    }

    #[test]
    fn non_numeric_status_is_unknown() {
        assert_eq!(parse(b"grpc-status:abc\r\n").code(), Code::Unknown);
        assert_eq!(parse(b"grpc-status:-1\r\n").code(), Code::Unknown);
        assert_eq!(parse(b"").code(), Code::Unknown);
    }

    #[test]
    fn message_value_may_contain_colons() {
        let parsed = parse(b"grpc-status:2\r\ngrpc-message:a: b: c\r\n");
        assert_eq!(parsed.message(), "a: b: c");
    }
}
