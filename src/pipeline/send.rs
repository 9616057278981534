//! Terminal adapters for in-memory and file-backed results.

use std::sync::Arc;

use super::{after_value, terminal, unexpected};
use crate::error::Result;
use crate::handler::{BoxFuture, Context, Handler, HandlerResult, Reply, Shape};
use crate::media::MediaType;
use crate::payload::Payload;
use crate::publisher::{self, Publisher, Source};

/// Send a value that already passed the after-filter.
async fn send_payload(ctx: &Context, value: Payload) -> Result<()> {
    match value {
        Payload::Bytes(bytes) => ctx.send(bytes).await,
        Payload::Text(text) => ctx.send_text(text).await,
        data => ctx.render(data).await,
    }
}

/// Sends a byte buffer in one write.
pub struct SendBytes {
    next: Arc<dyn Handler>,
}

impl SendBytes {
    pub fn new(next: Arc<dyn Handler>) -> Self {
        Self { next }
    }
}

impl Handler for SendBytes {
    fn call(&self, ctx: Context) -> BoxFuture<'static, HandlerResult> {
        let next = self.next.clone();
        Box::pin(async move {
            terminal(&next, ctx, |ctx, reply| async move {
                match reply {
                    Reply::Payload(value) => send_payload(&ctx, after_value(&ctx, value)).await,
                    other => Err(unexpected(Shape::Bytes, &other)),
                }
            })
            .await
        })
    }
}

/// Sends text as UTF-8 in one write.
pub struct SendText {
    next: Arc<dyn Handler>,
}

impl SendText {
    pub fn new(next: Arc<dyn Handler>) -> Self {
        Self { next }
    }
}

impl Handler for SendText {
    fn call(&self, ctx: Context) -> BoxFuture<'static, HandlerResult> {
        let next = self.next.clone();
        Box::pin(async move {
            terminal(&next, ctx, |ctx, reply| async move {
                match reply {
                    Reply::Payload(value) => send_payload(&ctx, after_value(&ctx, value)).await,
                    other => Err(unexpected(Shape::Text, &other)),
                }
            })
            .await
        })
    }
}

/// Copies a reader, open file or file path to the body.
///
/// A path that does not exist fails with a not-found error.
pub struct SendSource {
    next: Arc<dyn Handler>,
}

impl SendSource {
    pub fn new(next: Arc<dyn Handler>) -> Self {
        Self { next }
    }
}

impl Handler for SendSource {
    fn call(&self, ctx: Context) -> BoxFuture<'static, HandlerResult> {
        let next = self.next.clone();
        Box::pin(async move {
            terminal(&next, ctx, |ctx, reply| async move {
                let source = match reply {
                    Reply::Publisher(Publisher::Source(source)) => source,
                    other => return Err(unexpected(Shape::Source, &other)),
                };
                match source {
                    Source::Reader(reader) => {
                        if ctx.explicit_response_type().is_none() {
                            ctx.set_response_type(MediaType::OCTET_STREAM);
                        }
                        ctx.send_stream(reader).await
                    }
                    Source::File(file) => {
                        if ctx.explicit_response_type().is_none() {
                            ctx.set_response_type(MediaType::OCTET_STREAM);
                        }
                        ctx.send_file(file).await
                    }
                    Source::Path(path) => {
                        let file = publisher::open(&path).await?;
                        if ctx.explicit_response_type().is_none() {
                            ctx.set_response_type(MediaType::for_path(&path));
                        }
                        ctx.send_file(file).await
                    }
                }
            })
            .await
        })
    }
}

/// Sends a download.
pub struct SendAttachment {
    next: Arc<dyn Handler>,
}

impl SendAttachment {
    pub fn new(next: Arc<dyn Handler>) -> Self {
        Self { next }
    }
}

impl Handler for SendAttachment {
    fn call(&self, ctx: Context) -> BoxFuture<'static, HandlerResult> {
        let next = self.next.clone();
        Box::pin(async move {
            terminal(&next, ctx, |ctx, reply| async move {
                match reply {
                    Reply::Attachment(attachment) => ctx.send_attachment(attachment).await,
                    other => Err(unexpected(Shape::Attachment, &other)),
                }
            })
            .await
        })
    }
}
