//! Response-completion pipeline.
//!
//! Adapters that turn a handler's declared result shape into writes on the
//! exchange:
//!
//! | Shape        | Adapter                |
//! |--------------|------------------------|
//! | `Bytes`      | [`SendBytes`]          |
//! | `Text`       | [`SendText`]           |
//! | `Source`     | [`SendSource`]         |
//! | `Attachment` | [`SendAttachment`]     |
//! | `Deferred`   | [`DeferredHandler`]    |
//! | `Single`     | [`ReactiveHandler`]    |
//! | `Stream`     | [`ChunkedHandler`]     |
//! | `Value`      | none; [`DefaultHandler`] renders it |
//!
//! Every adapter follows the same contract: call `next`; if that fails
//! synchronously, route the error to `send_error` and stop; if the response
//! already started, pass the reply through untouched; otherwise adapt.
//! Every failure reported by the chain is first shown to the route's
//! after-filter.

mod chunked;
mod default;
mod deferred;
mod dispatch;
mod reactive;
mod send;
mod upgrade;

pub use chunked::{ChunkState, ChunkedHandler, ChunkedSubscriber};
pub use default::DefaultHandler;
pub use deferred::DeferredHandler;
pub use dispatch::{BoundedExecutor, DispatchHandler, Executor, WorkerMarker};
pub use reactive::{drive, ReactiveHandler, SingleSubscriber, Subscriber, Subscription};
pub use send::{SendAttachment, SendBytes, SendSource, SendText};
pub use upgrade::{ServerSentMessage, SseHandler, WebSocketHandler};

pub(crate) use default::finish;
pub(crate) use dispatch::run_detached;

use std::future::Future;
use std::sync::Arc;

use crate::error::{Failure, PipelineError, Result};
use crate::handler::{Context, Handler, HandlerResult, Reply, Shape};
use crate::payload::Payload;

/// Link name of the terminal adapter for `shape`, if it has one.
pub(crate) fn adapter_name(shape: Shape) -> Option<&'static str> {
    match shape {
        Shape::Bytes => Some("send_bytes"),
        Shape::Text => Some("send_text"),
        Shape::Source => Some("send_source"),
        Shape::Attachment => Some("send_attachment"),
        Shape::Deferred => Some("deferred"),
        Shape::Single => Some("reactive"),
        Shape::Stream => Some("chunked"),
        Shape::Value => None,
    }
}

/// Wrap `next` in the terminal adapter for `shape`.
pub(crate) fn adapter(shape: Shape, next: Arc<dyn Handler>) -> Arc<dyn Handler> {
    match shape {
        Shape::Bytes => Arc::new(SendBytes::new(next)),
        Shape::Text => Arc::new(SendText::new(next)),
        Shape::Source => Arc::new(SendSource::new(next)),
        Shape::Attachment => Arc::new(SendAttachment::new(next)),
        Shape::Deferred => Arc::new(DeferredHandler::new(next)),
        Shape::Single => Arc::new(ReactiveHandler::new(next)),
        Shape::Stream => Arc::new(ChunkedHandler::new(next)),
        Shape::Value => next,
    }
}

/// Error for a reply that does not match the route's declared shape.
pub(crate) fn unexpected(expected: Shape, found: &Reply) -> PipelineError {
    PipelineError::UnexpectedReply {
        expected: expected.name(),
        found: found.kind(),
    }
}

/// Shared adapter body.
///
/// Calls `next`, sends a synchronous failure to the error path, passes
/// through replies that need no adapting, and otherwise hands the reply to
/// `adapt`. A failure from `adapt` goes to the error path as well.
pub(crate) async fn terminal<F, Fut>(next: &Arc<dyn Handler>, ctx: Context, adapt: F) -> HandlerResult
where
    F: FnOnce(Context, Reply) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let reply = match next.call(ctx.clone()).await {
        Ok(reply) if reply.is_handled() || ctx.is_response_started() => return Ok(reply),
        Ok(reply) => reply,
        Err(e) => {
            fail(&ctx, e).await;
            return Ok(Reply::Sent);
        }
    };

    if let Err(e) = adapt(ctx.clone(), reply).await {
        fail(&ctx, e).await;
    }
    Ok(Reply::Sent)
}

/// Run the route's after-filter on a successful value.
///
/// The filter works on a copy; if it fails, the original value is kept.
pub(crate) fn after_value(ctx: &Context, value: Payload) -> Payload {
    let Some(after) = ctx.route().after() else {
        return value;
    };
    let mut candidate = value.clone();
    match after.apply(ctx, Some(&mut candidate), None) {
        Ok(()) => candidate,
        Err(e) => {
            tracing::warn!(route = ctx.route_name(), error = %e, "after filter failed; keeping value");
            value
        }
    }
}

/// Run the route's after-filter on a failure. Its own failure is suppressed.
pub(crate) fn after_error(ctx: &Context, mut failure: Failure) -> Failure {
    if let Some(after) = ctx.route().after() {
        if let Err(e) = after.apply(ctx, None, Some(failure.error())) {
            failure.add_suppressed(e);
        }
    }
    failure
}

/// Complete the exchange with the outcome of an asynchronous computation.
///
/// Completion wrappers are stripped so the underlying cause is reported.
pub(crate) async fn complete(ctx: &Context, outcome: Result<Payload>) {
    match outcome {
        Ok(value) => {
            let value = after_value(ctx, value);
            if let Err(e) = ctx.render(value).await {
                fail(ctx, e).await;
            }
        }
        Err(e) => fail(ctx, e.unwrap_completion()).await,
    }
}

/// Report a failure of the route after its after-filter has seen it.
pub(crate) async fn fail(ctx: &Context, error: PipelineError) {
    ctx.send_error(after_error(ctx, Failure::new(error))).await;
}
