//! Encoders - turn a route's [`Payload`] into response bytes.
//!
//! Every route carries one [`Encoder`]:
//!
//! - [`JsonEncoder`] - `serde_json`, the default
//! - [`MsgPackEncoder`] - MessagePack via `rmp-serde` (`to_vec_named`)
//! - [`RawEncoder`] - pass-through for bytes and text
//!
//! Bytes always pass through untouched, so a handler can hand over
//! pre-encoded content regardless of the route's encoder.
//!
//! # Example
//!
//! ```
//! use sendwire::codec::{Encoder, JsonEncoder};
//! use sendwire::Payload;
//! use serde_json::json;
//!
//! let bytes = JsonEncoder.encode(&Payload::Data(json!({"id": 1}))).unwrap();
//! assert_eq!(&bytes[..], br#"{"id":1}"#);
//! ```

mod json;
mod msgpack;
mod raw;

pub use json::JsonEncoder;
pub use msgpack::MsgPackEncoder;
pub use raw::RawEncoder;

use bytes::Bytes;

use crate::error::Result;
use crate::media::MediaType;
use crate::payload::Payload;

/// Turns a domain value into bytes.
pub trait Encoder: Send + Sync + 'static {
    /// Encode one value.
    fn encode(&self, value: &Payload) -> Result<Bytes>;

    /// Media type produced when the route does not say otherwise.
    fn media_type(&self) -> MediaType;
}
