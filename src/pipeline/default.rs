//! Outermost boundary of every route chain.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use super::{complete, fail, unexpected};
use crate::error::PipelineError;
use crate::handler::{BoxFuture, Context, Handler, HandlerResult, Reply, Shape};

/// Catches what the inner chain left over.
///
/// Failures and panics go to the error path. A value that no terminal
/// adapter consumed is rendered with the route's encoder, and an empty
/// reply becomes `204 No Content`. Nothing is sent once the response has
/// started.
pub struct DefaultHandler {
    next: Arc<dyn Handler>,
}

impl DefaultHandler {
    pub fn new(next: Arc<dyn Handler>) -> Self {
        Self { next }
    }
}

impl Handler for DefaultHandler {
    fn call(&self, ctx: Context) -> BoxFuture<'static, HandlerResult> {
        let next = self.next.clone();
        Box::pin(async move {
            let outcome = AssertUnwindSafe(async { next.call(ctx.clone()).await })
                .catch_unwind()
                .await;
            let reply = match outcome {
                Ok(Ok(reply)) => finish(&ctx, reply).await,
                Ok(Err(e)) => {
                    fail(&ctx, e).await;
                    Reply::Sent
                }
                Err(panic) => {
                    fail(&ctx, PipelineError::from_panic(panic)).await;
                    Reply::Sent
                }
            };
            Ok(reply)
        })
    }
}

/// Send whatever `reply` still requires.
pub(crate) async fn finish(ctx: &Context, reply: Reply) -> Reply {
    if reply.is_handled() || ctx.is_response_started() {
        return reply;
    }
    match reply {
        Reply::Empty => {
            if let Err(e) = ctx.send_empty(204).await {
                fail(ctx, e).await;
            }
        }
        Reply::Payload(value) => complete(ctx, Ok(value)).await,
        other => {
            tracing::error!(
                route = ctx.route_name(),
                shape = %ctx.route().shape(),
                reply = other.kind(),
                "reply does not match the route's shape"
            );
            fail(ctx, unexpected(ctx.route().shape(), &other)).await;
        }
    }
    Reply::Sent
}
