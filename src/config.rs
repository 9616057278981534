//! Pipeline configuration.
//!
//! Every field has a default, so a partial JSON document is enough:
//!
//! ```
//! use sendwire::config::PipelineConfig;
//!
//! let config = PipelineConfig::from_json(r#"{"channel_capacity": 4}"#).unwrap();
//! assert_eq!(config.channel_capacity, 4);
//! assert_eq!(config.max_concurrent_requests, 256);
//! ```

use serde::Deserialize;

use crate::error::Result;
use crate::sender::SenderConfig;

/// Default maximum concurrently handled requests.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 256;

/// Default read buffer for stream and file copies.
pub const DEFAULT_STREAM_BUFFER_SIZE: usize = 8 * 1024;

/// Default depth of the sender command queue.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Tunables shared by the router and every context it creates.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Sender command queue depth.
    pub channel_capacity: usize,
    /// Read buffer used when copying input streams and files.
    pub stream_buffer_size: usize,
    /// Router admission limit.
    pub max_concurrent_requests: usize,
}

impl PipelineConfig {
    /// Parse from JSON text. Missing fields keep their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub(crate) fn sender(&self) -> SenderConfig {
        SenderConfig {
            channel_capacity: self.channel_capacity.max(1),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            stream_buffer_size: DEFAULT_STREAM_BUFFER_SIZE,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
        }
    }
}
