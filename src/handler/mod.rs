//! Handler module - the functional contract route logic is written against.
//!
//! Provides:
//! - [`Handler`] - `Context -> Future<Result<Reply>>`, the unit every
//!   decorator and adapter wraps
//! - [`Reply`] - what a handler hands back: already sent, or a value
//!   awaiting adaptation
//! - [`IntoReply`] - typed return values that declare their [`Shape`]
//! - [`Context`] - per-request façade over the response
//! - [`Link`] / [`Decorator`] - explicit composition records
//! - [`Route`] / [`RouteBuilder`] - a registered endpoint and its adapter chain
//!
//! # Example
//!
//! ```ignore
//! use sendwire::handler::{Route, Context};
//! use sendwire::Chunked;
//!
//! // Shape is inferred from the return type: a chunked stream.
//! let route = Route::builder("numbers", |_ctx: Context| async move {
//!     Ok(Chunked::json(futures::stream::iter([1, 2, 3])))
//! })
//! .build();
//! ```

mod context;
mod link;
mod route;

pub use context::{
    default_connection_lost, ConnectionLost, Context, ContextBuilder, DefaultErrorHandler,
    ErrorHandler, Upgrade, UpgradeFn,
};
pub use link::{Decorator, Link};
pub use route::{After, Route, RouteBuilder, Shape};

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use bytes::Bytes;
use serde::Serialize;

use crate::error::Result;
use crate::payload::Payload;
use crate::publisher::{Attachment, Publisher};

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result type for handler functions.
pub type HandlerResult = Result<Reply>;

/// Trait for handler functions and the decorators wrapping them.
pub trait Handler: Send + Sync + 'static {
    /// Handle one request.
    fn call(&self, ctx: Context) -> BoxFuture<'static, HandlerResult>;
}

/// What a handler returns.
pub enum Reply {
    /// The response was fully handled on the calling path.
    Sent,
    /// The response will be completed elsewhere (dispatched task, detached
    /// work, connection upgrade).
    Detached,
    /// Nothing to send; renders as `204 No Content`.
    Empty,
    /// A single value awaiting encoding.
    Payload(Payload),
    /// A file download.
    Attachment(Attachment),
    /// An asynchronous or streamed result.
    Publisher(Publisher),
}

impl Reply {
    /// Variant name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Sent => "sent",
            Reply::Detached => "detached",
            Reply::Empty => "empty",
            Reply::Payload(p) => p.kind(),
            Reply::Attachment(_) => "attachment",
            Reply::Publisher(p) => p.kind(),
        }
    }

    /// True when nothing is left for the pipeline to send.
    #[inline]
    pub fn is_handled(&self) -> bool {
        matches!(self, Reply::Sent | Reply::Detached)
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Payload(p) => f.debug_tuple("Payload").field(p).finish(),
            other => f.write_str(other.kind()),
        }
    }
}

/// Typed handler return value.
///
/// `SHAPE` is read once, when the route is registered, to pick the
/// terminal adapter. It is never inspected per request.
pub trait IntoReply: Send + 'static {
    const SHAPE: Shape;

    fn into_reply(self) -> Result<Reply>;
}

impl IntoReply for Reply {
    const SHAPE: Shape = Shape::Value;

    fn into_reply(self) -> Result<Reply> {
        Ok(self)
    }
}

impl IntoReply for () {
    const SHAPE: Shape = Shape::Value;

    fn into_reply(self) -> Result<Reply> {
        Ok(Reply::Empty)
    }
}

impl IntoReply for Bytes {
    const SHAPE: Shape = Shape::Bytes;

    fn into_reply(self) -> Result<Reply> {
        Ok(Reply::Payload(Payload::Bytes(self)))
    }
}

impl IntoReply for Vec<u8> {
    const SHAPE: Shape = Shape::Bytes;

    fn into_reply(self) -> Result<Reply> {
        Ok(Reply::Payload(Payload::Bytes(Bytes::from(self))))
    }
}

impl IntoReply for &'static [u8] {
    const SHAPE: Shape = Shape::Bytes;

    fn into_reply(self) -> Result<Reply> {
        Ok(Reply::Payload(Payload::Bytes(Bytes::from_static(self))))
    }
}

impl IntoReply for String {
    const SHAPE: Shape = Shape::Text;

    fn into_reply(self) -> Result<Reply> {
        Ok(Reply::Payload(Payload::Text(self)))
    }
}

impl IntoReply for &'static str {
    const SHAPE: Shape = Shape::Text;

    fn into_reply(self) -> Result<Reply> {
        Ok(Reply::Payload(Payload::Text(self.to_string())))
    }
}

impl IntoReply for Payload {
    const SHAPE: Shape = Shape::Value;

    fn into_reply(self) -> Result<Reply> {
        Ok(Reply::Payload(self))
    }
}

impl IntoReply for serde_json::Value {
    const SHAPE: Shape = Shape::Value;

    fn into_reply(self) -> Result<Reply> {
        Ok(Reply::Payload(Payload::Data(self)))
    }
}

/// Any serializable value, rendered by the route's encoder.
#[derive(Debug, Clone)]
pub struct Json<T>(pub T);

impl<T: Serialize + Send + 'static> IntoReply for Json<T> {
    const SHAPE: Shape = Shape::Value;

    fn into_reply(self) -> Result<Reply> {
        Ok(Reply::Payload(Payload::data(&self.0)?))
    }
}

/// Adapts an async closure into a [`Handler`].
pub struct FnHandler<F, R, Fut> {
    handler: F,
    _phantom: PhantomData<fn() -> (R, Fut)>,
}

impl<F, R, Fut> FnHandler<F, R, Fut>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
    R: IntoReply,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, R, Fut> Handler for FnHandler<F, R, Fut>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
    R: IntoReply,
{
    fn call(&self, ctx: Context) -> BoxFuture<'static, HandlerResult> {
        let fut = (self.handler)(ctx);
        Box::pin(async move { fut.await?.into_reply() })
    }
}

/// Wrap an async closure as a handler.
pub fn handler_fn<F, R, Fut>(handler: F) -> FnHandler<F, R, Fut>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
    R: IntoReply,
{
    FnHandler::new(handler)
}
