//! Chunked writing of streamed results.
//!
//! [`ChunkedSubscriber`] writes each item as one body chunk and requests
//! the next item only after the write completed. When the response type is
//! JSON, the items are framed as one array:
//!
//! ```text
//! item 1   ->  "[" + item
//! item n   ->  "," + item
//! complete ->  "]"
//! ```
//!
//! A JSON stream that completes without items writes nothing.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use super::reactive::{drive, Subscriber, Subscription};
use super::{after_error, after_value, terminal, unexpected};
use crate::error::{Failure, PipelineError};
use crate::handler::{BoxFuture, Context, Handler, HandlerResult, Reply, Shape};
use crate::payload::Payload;
use crate::publisher::Publisher;
use crate::sender::Sender;

/// Progress of a [`ChunkedSubscriber`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    /// No demand requested yet.
    Idle,
    /// Demand outstanding, waiting for the producer.
    AwaitingItem,
    /// An item is being written.
    Writing,
    /// The body was finished normally.
    Completed,
    /// The stream ended with an error.
    Errored,
}

/// Writes a stream of items as chunks of one response body.
pub struct ChunkedSubscriber {
    ctx: Context,
    subscription: Option<Subscription>,
    sender: Option<Sender>,
    state: ChunkState,
    json: bool,
    written: usize,
}

impl ChunkedSubscriber {
    pub fn new(ctx: Context) -> Self {
        let json = ctx.response_type().is_json();
        Self {
            ctx,
            subscription: None,
            sender: None,
            state: ChunkState::Idle,
            json,
            written: 0,
        }
    }

    #[inline]
    pub fn state(&self) -> ChunkState {
        self.state
    }

    /// Items written so far.
    #[inline]
    pub fn written(&self) -> usize {
        self.written
    }

    fn is_terminal(&self) -> bool {
        matches!(self.state, ChunkState::Completed | ChunkState::Errored)
    }

    fn sender(&mut self) -> Sender {
        let ctx = &self.ctx;
        self.sender
            .get_or_insert_with(|| ctx.response_sender())
            .clone()
    }

    fn frame(&self, encoded: Bytes) -> Bytes {
        if !self.json {
            return encoded;
        }
        let mut buf = BytesMut::with_capacity(encoded.len() + 1);
        buf.put_u8(if self.written == 0 { b'[' } else { b',' });
        buf.extend_from_slice(&encoded);
        buf.freeze()
    }

    async fn next_item(&mut self, item: Payload) {
        if self.is_terminal() {
            return;
        }
        self.state = ChunkState::Writing;

        let item = after_value(&self.ctx, item);
        let encoded = match self.ctx.route().encoder().encode(&item) {
            Ok(encoded) => encoded,
            Err(e) => return self.fail(e).await,
        };
        let chunk = self.frame(encoded);

        match self.sender().write(chunk).await {
            Ok(()) => {
                self.written += 1;
                self.state = ChunkState::AwaitingItem;
                if let Some(subscription) = &self.subscription {
                    subscription.request(1);
                }
            }
            Err(e) => self.fail(e).await,
        }
    }

    /// Cancel upstream and report `error`, unless the peer is gone.
    async fn fail(&mut self, error: PipelineError) {
        if self.is_terminal() {
            return;
        }
        self.state = ChunkState::Errored;
        if let Some(subscription) = &self.subscription {
            subscription.cancel();
        }

        let failure = after_error(&self.ctx, Failure::new(error));
        if self.ctx.is_connection_lost(failure.error()) {
            tracing::debug!(
                route = self.ctx.route_name(),
                written = self.written,
                "connection lost while streaming"
            );
            self.ctx.abort().await;
            return;
        }
        self.ctx.send_error(failure).await;
    }

    async fn finish(&mut self) {
        if self.is_terminal() {
            return;
        }
        let sender = self.sender();
        if self.json && self.written > 0 {
            if let Err(e) = sender.write(Bytes::from_static(b"]")).await {
                return self.fail(e).await;
            }
        }
        self.state = ChunkState::Completed;
        if let Err(e) = sender.close().await {
            tracing::debug!(route = self.ctx.route_name(), error = %e, "close failed");
        }
    }
}

impl Subscriber for ChunkedSubscriber {
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.state = ChunkState::AwaitingItem;
        subscription.request(1);
        self.subscription = Some(subscription);
    }

    fn on_next(&mut self, item: Payload) -> BoxFuture<'_, ()> {
        Box::pin(self.next_item(item))
    }

    fn on_error(&mut self, error: PipelineError) -> BoxFuture<'_, ()> {
        Box::pin(self.fail(error))
    }

    fn on_complete(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(self.finish())
    }
}

/// Adapter for streamed results.
pub struct ChunkedHandler {
    next: Arc<dyn Handler>,
}

impl ChunkedHandler {
    pub fn new(next: Arc<dyn Handler>) -> Self {
        Self { next }
    }
}

impl Handler for ChunkedHandler {
    fn call(&self, ctx: Context) -> BoxFuture<'static, HandlerResult> {
        let next = self.next.clone();
        Box::pin(async move {
            terminal(&next, ctx, |ctx, reply| async move {
                match reply {
                    Reply::Publisher(Publisher::Stream(items)) => {
                        let mut subscriber = ChunkedSubscriber::new(ctx);
                        drive(items, &mut subscriber).await;
                        Ok(())
                    }
                    other => Err(unexpected(Shape::Stream, &other)),
                }
            })
            .await
        })
    }
}
