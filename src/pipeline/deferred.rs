//! Adapter for results that are computed later.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use super::{complete, terminal, unexpected};
use crate::error::PipelineError;
use crate::handler::{BoxFuture, Context, Handler, HandlerResult, Reply, Shape};
use crate::publisher::Publisher;

/// Awaits a [`Deferred`](crate::publisher::Deferred) and completes the
/// exchange with its outcome.
///
/// A failure wrapped by asynchronous composition is reported by its
/// cause, not by the wrapper.
pub struct DeferredHandler {
    next: Arc<dyn Handler>,
}

impl DeferredHandler {
    pub fn new(next: Arc<dyn Handler>) -> Self {
        Self { next }
    }
}

impl Handler for DeferredHandler {
    fn call(&self, ctx: Context) -> BoxFuture<'static, HandlerResult> {
        let next = self.next.clone();
        Box::pin(async move {
            terminal(&next, ctx, |ctx, reply| async move {
                let future = match reply {
                    Reply::Publisher(Publisher::Deferred(future)) => future,
                    other => return Err(unexpected(Shape::Deferred, &other)),
                };
                let outcome = AssertUnwindSafe(future)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(PipelineError::from_panic(panic)));
                complete(&ctx, outcome).await;
                Ok(())
            })
            .await
        })
    }
}
