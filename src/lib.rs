//! # sendwire
//!
//! Response-completion pipeline for HTTP-style exchanges.
//!
//! Route handlers return whatever is natural for them: bytes, text, a
//! serializable value, a file, a future, or a stream. The pipeline turns
//! that into exactly one correctly ordered response write.
//!
//! ## Architecture
//!
//! - **Routes**: each handler is wrapped once, at registration, in the
//!   adapter chosen by its declared return shape
//! - **Context**: per-exchange façade; enforces a single terminal send
//! - **Sender**: dedicated writer task per body with one write in flight
//! - **Streams**: pulled one item at a time, framed as a JSON array when
//!   the response type is JSON
//!
//! ## Example
//!
//! ```ignore
//! use sendwire::{Chunked, Context, Router};
//!
//! #[tokio::main]
//! async fn main() -> sendwire::Result<()> {
//!     let router = Router::builder()
//!         .route("ids", |_ctx: Context| async {
//!             Ok(Chunked::json(futures::stream::iter([1, 2, 3])))
//!         })
//!         .build();
//!
//!     let (client, server) = tokio::io::duplex(4096);
//!     router.serve("ids", client).await?;
//!     // server now reads `[1,2,3]`
//!     Ok(())
//! }
//! ```

pub mod backpressure;
pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod media;
pub mod payload;
pub mod pipeline;
pub mod publisher;
pub mod sender;

mod router;

pub use config::PipelineConfig;
pub use error::{Failure, PipelineError, Result};
pub use handler::{Context, Handler, IntoReply, Json, Reply, Route, RouteBuilder, Shape};
pub use media::MediaType;
pub use payload::Payload;
pub use publisher::{Attachment, Chunked, Deferred, Single, Source};
pub use router::{Router, RouterBuilder};
