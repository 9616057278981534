//! MsgPack encoder using `rmp-serde`.
//!
//! **Always `to_vec_named`, never `to_vec`**: structs must be encoded as maps
//! with field names, not positional arrays, or clients in other languages
//! cannot decode them.

use bytes::Bytes;

use super::Encoder;
use crate::error::Result;
use crate::media::MediaType;
use crate::payload::Payload;

/// MessagePack encoder for structured data.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackEncoder;

impl MsgPackEncoder {
    /// Encode any serializable value in struct-as-map format.
    #[inline]
    pub fn to_vec<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }
}

impl Encoder for MsgPackEncoder {
    fn encode(&self, value: &Payload) -> Result<Bytes> {
        match value {
            Payload::Bytes(b) => Ok(b.clone()),
            Payload::Text(s) => Ok(Bytes::from(Self::to_vec(s)?)),
            Payload::Data(v) => Ok(Bytes::from(Self::to_vec(v)?)),
        }
    }

    fn media_type(&self) -> MediaType {
        MediaType::MSGPACK
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct TestStruct {
        id: u32,
        name: String,
        active: bool,
    }

    #[test]
    fn test_struct_encodes_as_map() {
        let test = TestStruct {
            id: 1,
            name: "x".to_string(),
            active: false,
        };
        let payload = Payload::data(&test).unwrap();
        let encoded = MsgPackEncoder.encode(&payload).unwrap();

        // fixmap (0x8X), not fixarray (0x9X)
        assert_eq!(encoded[0] & 0xF0, 0x80, "got {:02X}", encoded[0]);

        let decoded: TestStruct = rmp_serde::from_slice(&encoded).unwrap();
        assert_eq!(decoded, test);
    }

    #[test]
    fn test_text_encodes_as_msgpack_string() {
        let encoded = MsgPackEncoder.encode(&Payload::Text("hi".into())).unwrap();
        // fixstr of length 2
        assert_eq!(&encoded[..], &[0xa2, b'h', b'i']);
    }

    #[test]
    fn test_null_encodes_as_nil() {
        let encoded = MsgPackEncoder.encode(&Payload::Data(json!(null))).unwrap();
        assert_eq!(&encoded[..], &[0xc0]);
    }

    #[test]
    fn test_bytes_pass_through() {
        let encoded = MsgPackEncoder
            .encode(&Payload::Bytes(Bytes::from_static(b"\x01\x02")))
            .unwrap();
        assert_eq!(&encoded[..], b"\x01\x02");
    }

    #[test]
    fn test_media_type() {
        assert_eq!(MsgPackEncoder.media_type(), MediaType::MSGPACK);
    }
}
