//! Domain values produced by route logic.
//!
//! A [`Payload`] is what the route's encoder turns into bytes. It is also
//! what after-filters see and may rewrite.

use bytes::Bytes;
use serde::Serialize;

use crate::error::Result;

/// A value awaiting encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Already-encoded bytes.
    Bytes(Bytes),
    /// Text, written as UTF-8.
    Text(String),
    /// Structured data, serialized by the route's encoder.
    Data(serde_json::Value),
}

impl Payload {
    /// Capture any serializable value as structured data.
    pub fn data<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Payload::Data(serde_json::to_value(value)?))
    }

    /// Variant name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Bytes(_) => "bytes",
            Payload::Text(_) => "text",
            Payload::Data(_) => "data",
        }
    }
}

impl From<Bytes> for Payload {
    fn from(b: Bytes) -> Self {
        Payload::Bytes(b)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(v: Vec<u8>) -> Self {
        Payload::Bytes(Bytes::from(v))
    }
}

impl From<&'static [u8]> for Payload {
    fn from(v: &'static [u8]) -> Self {
        Payload::Bytes(Bytes::from_static(v))
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<&'static str> for Payload {
    fn from(s: &'static str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<serde_json::Value> for Payload {
    fn from(v: serde_json::Value) -> Self {
        Payload::Data(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Record {
        id: u32,
    }

    #[test]
    fn test_data_from_serialize() {
        let payload = Payload::data(&Record { id: 7 }).unwrap();
        assert_eq!(payload, Payload::Data(json!({"id": 7})));
        assert_eq!(payload.kind(), "data");
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Payload::from("hi"), Payload::Text("hi".into()));
        assert_eq!(
            Payload::from(vec![1u8, 2]),
            Payload::Bytes(Bytes::from_static(&[1, 2]))
        );
    }
}
