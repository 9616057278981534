//! Raw encoder - pass-through for bytes and text.
//!
//! Structured data is rendered as its plain string form: a JSON string
//! value becomes its contents, anything else its compact JSON text.

use bytes::Bytes;

use super::Encoder;
use crate::error::Result;
use crate::media::MediaType;
use crate::payload::Payload;

/// Encoder that performs no serialization.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawEncoder;

impl Encoder for RawEncoder {
    #[inline]
    fn encode(&self, value: &Payload) -> Result<Bytes> {
        Ok(match value {
            Payload::Bytes(b) => b.clone(),
            Payload::Text(s) => Bytes::copy_from_slice(s.as_bytes()),
            Payload::Data(serde_json::Value::String(s)) => Bytes::copy_from_slice(s.as_bytes()),
            Payload::Data(v) => Bytes::from(v.to_string()),
        })
    }

    fn media_type(&self) -> MediaType {
        MediaType::TEXT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_verbatim() {
        let encoded = RawEncoder.encode(&Payload::Text("line\n".into())).unwrap();
        assert_eq!(&encoded[..], b"line\n");
    }

    #[test]
    fn test_binary_data_preserved() {
        let all_bytes: Vec<u8> = (0..=255).collect();
        let encoded = RawEncoder
            .encode(&Payload::Bytes(Bytes::from(all_bytes.clone())))
            .unwrap();
        assert_eq!(&encoded[..], &all_bytes[..]);
    }

    #[test]
    fn test_data_as_plain_string() {
        assert_eq!(
            &RawEncoder.encode(&Payload::Data(json!("plain"))).unwrap()[..],
            b"plain"
        );
        assert_eq!(
            &RawEncoder.encode(&Payload::Data(json!(42))).unwrap()[..],
            b"42"
        );
    }
}
