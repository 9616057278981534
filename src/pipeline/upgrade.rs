//! Connection upgrades: WebSocket and server-sent events.
//!
//! Both handlers claim the response and record an [`Upgrade`] on the
//! context. The transport takes it with [`Context::take_upgrade`] and runs
//! the callback once the protocol switch is done.

use std::future::Future;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::Encoder;
use crate::error::{PipelineError, Result};
use crate::handler::{BoxFuture, Context, Handler, HandlerResult, Reply, Upgrade, UpgradeFn};
use crate::media::MediaType;
use crate::payload::Payload;

fn upgrade_fn<F, Fut>(on_connect: F) -> UpgradeFn
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |ctx: Context| -> BoxFuture<'static, ()> { Box::pin(on_connect(ctx)) })
}

/// Upgrades to WebSocket when the request asks for it, otherwise answers
/// `404`.
pub struct WebSocketHandler {
    on_connect: UpgradeFn,
}

impl WebSocketHandler {
    pub fn new<F, Fut>(on_connect: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            on_connect: upgrade_fn(on_connect),
        }
    }
}

impl Handler for WebSocketHandler {
    fn call(&self, ctx: Context) -> BoxFuture<'static, HandlerResult> {
        let on_connect = self.on_connect.clone();
        Box::pin(async move {
            let wants_upgrade = ctx
                .request_header("upgrade")
                .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
            if wants_upgrade {
                return ctx.upgrade(Upgrade::WebSocket(on_connect));
            }
            Err(PipelineError::status(404, "websocket upgrade required"))
        })
    }
}

/// Switches the exchange to a `text/event-stream`.
pub struct SseHandler {
    on_connect: UpgradeFn,
}

impl SseHandler {
    pub fn new<F, Fut>(on_connect: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            on_connect: upgrade_fn(on_connect),
        }
    }
}

impl Handler for SseHandler {
    fn call(&self, ctx: Context) -> BoxFuture<'static, HandlerResult> {
        let on_connect = self.on_connect.clone();
        Box::pin(async move {
            ctx.set_response_type(MediaType::EVENT_STREAM)
                .set_response_header("Cache-Control", "no-cache")
                .set_response_header("Connection", "keep-alive");
            ctx.upgrade(Upgrade::ServerSentEvents(on_connect))
        })
    }
}

/// One server-sent event.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSentMessage {
    id: Option<String>,
    event: Option<String>,
    retry: Option<u64>,
    data: Payload,
}

impl ServerSentMessage {
    pub fn new(data: impl Into<Payload>) -> Self {
        Self {
            id: None,
            event: None,
            retry: None,
            data: data.into(),
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// Reconnection delay in milliseconds.
    pub fn retry(mut self, millis: u64) -> Self {
        self.retry = Some(millis);
        self
    }

    /// Wire form. Multi-line data becomes one `data:` line per line.
    pub fn to_bytes(&self, encoder: &dyn Encoder) -> Result<Bytes> {
        let data = encoder.encode(&self.data)?;
        let mut buf = BytesMut::with_capacity(data.len() + 32);

        if let Some(id) = &self.id {
            put_field(&mut buf, "id", id.as_bytes());
        }
        if let Some(event) = &self.event {
            put_field(&mut buf, "event", event.as_bytes());
        }
        if let Some(retry) = self.retry {
            put_field(&mut buf, "retry", retry.to_string().as_bytes());
        }
        for line in data.split(|b| *b == b'\n') {
            put_field(&mut buf, "data", line);
        }
        buf.put_u8(b'\n');
        Ok(buf.freeze())
    }
}

fn put_field(buf: &mut BytesMut, name: &str, value: &[u8]) {
    buf.extend_from_slice(name.as_bytes());
    buf.put_u8(b':');
    buf.extend_from_slice(value);
    buf.put_u8(b'\n');
}
