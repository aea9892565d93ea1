//! Test-only message fixture, hand-encoded so unit tests need no protoc.

use bytes::{Buf, BufMut};
use prost::encoding::{DecodeContext, WireType};

#[derive(Clone, PartialEq, Debug, Default, serde::Serialize, serde::Deserialize)]
pub(crate) struct Ping {
    pub(crate) seq: i32,
    pub(crate) note: String,
}

impl prost::Message for Ping {
    fn encode_raw(&self, buf: &mut impl BufMut)
    where
        Self: Sized,
    {
        if self.seq != 0 {
            prost::encoding::int32::encode(1, &self.seq, buf);
        }
        if !self.note.is_empty() {
            prost::encoding::string::encode(2, &self.note, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: WireType,
        buf: &mut impl Buf,
        ctx: DecodeContext,
    ) -> Result<(), prost::DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => prost::encoding::int32::merge(wire_type, &mut self.seq, buf, ctx),
            2 => prost::encoding::string::merge(wire_type, &mut self.note, buf, ctx),
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if self.seq != 0 {
            len += prost::encoding::int32::encoded_len(1, &self.seq);
        }
        if !self.note.is_empty() {
            len += prost::encoding::string::encoded_len(2, &self.note);
        }
        len
    }

    fn clear(&mut self) {
        self.seq = 0;
        self.note.clear();
    }
}
