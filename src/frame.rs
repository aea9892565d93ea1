//! The length-prefixed frame format shared by every grpc-web body.
//!
//! Every frame is `tag (1 byte) || length (4 bytes, big-endian) || body`.
//! The codec does not reject unknown tags; classifying a frame as payload or
//! trailer is the caller's job via the MSB of the tag.

use std::error::Error;
use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Wire size of the frame header: tag byte plus u32 length.
pub const HEADER_LEN: usize = 1 + 4;

/// Tag of a frame carrying a serialized message.
pub const PAYLOAD_TAG: u8 = 0x00;

/// Tag of a frame carrying the trailer block. The MSB is what matters;
/// callers classify with `tag & TRAILER_TAG`.
pub const TRAILER_TAG: u8 = 0b1000_0000;

/// One grpc-web frame: a type tag and an opaque body.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    tag: u8,
    body: Bytes,
}

impl Frame {
    /// A frame with an explicit tag.
    pub fn new(tag: u8, body: impl Into<Bytes>) -> Frame {
        Frame {
            tag,
            body: body.into(),
        }
    }

    /// A payload frame (tag `0x00`).
    pub fn payload(body: impl Into<Bytes>) -> Frame {
        Frame::new(PAYLOAD_TAG, body)
    }

    /// A trailer frame (tag `0x80`).
    pub fn trailer(body: impl Into<Bytes>) -> Frame {
        Frame::new(TRAILER_TAG, body)
    }

    pub fn tag(&self) -> u8 {
        self.tag
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Whether the MSB of the tag marks this frame as a trailer.
    pub fn is_trailer(&self) -> bool {
        self.tag & TRAILER_TAG != 0
    }

    /// Pack this frame into its wire form: `tag || len || body`.
    pub fn encode(&self) -> Bytes {
        let len = self.body.len();
        assert!(len <= u32::MAX as usize);

        let mut buf = BytesMut::with_capacity(HEADER_LEN + len);
        buf.put_u8(self.tag);
        buf.put_u32(len as u32);
        buf.put_slice(&self.body);
        buf.freeze()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("tag", &self.tag)
            .field("len", &self.body.len())
            .finish()
    }
}

/// Unpack a buffer into the sequence of frames it contains.
///
/// Fails if the buffer ends mid-header or mid-body.
pub fn decode_all(mut buf: Bytes) -> Result<Vec<Frame>, MalformedFrame> {
    let mut frames = Vec::new();

    while buf.has_remaining() {
        if buf.remaining() < HEADER_LEN {
            return Err(MalformedFrame::new(format!(
                "truncated frame header: {} bytes remaining",
                buf.remaining()
            )));
        }

        let tag = buf.get_u8();
        let len = buf.get_u32() as usize;

        if buf.remaining() < len {
            return Err(MalformedFrame::new(format!(
                "truncated frame body: expected {} bytes, {} remaining",
                len,
                buf.remaining()
            )));
        }

        frames.push(Frame {
            tag,
            body: buf.copy_to_bytes(len),
        });
    }

    Ok(frames)
}

/// A body that does not deframe cleanly.
#[derive(Debug)]
pub struct MalformedFrame {
    reason: String,
}

impl MalformedFrame {
    pub(crate) fn new(reason: impl Into<String>) -> MalformedFrame {
        MalformedFrame {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for MalformedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed frame: {}", self.reason)
    }
}

impl Error for MalformedFrame {}
