//! JSON encoder using `serde_json`.

use bytes::Bytes;

use super::Encoder;
use crate::error::Result;
use crate::media::MediaType;
use crate::payload::Payload;

/// Serializes structured data as compact JSON.
///
/// Text is written verbatim: a handler returning a `String` from a JSON
/// route is assumed to hold JSON already.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl Encoder for JsonEncoder {
    fn encode(&self, value: &Payload) -> Result<Bytes> {
        match value {
            Payload::Bytes(b) => Ok(b.clone()),
            Payload::Text(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
            Payload::Data(v) => Ok(Bytes::from(serde_json::to_vec(v)?)),
        }
    }

    fn media_type(&self) -> MediaType {
        MediaType::JSON
    }
}
