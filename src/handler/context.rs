//! Request context for handlers.
//!
//! A [`Context`] is the per-exchange façade adapters and route logic use to
//! produce the response:
//! - response head: `set_status`, `set_response_header`, `set_response_type`
//! - terminal sends: `send`, `send_text`, `render`, `send_stream`,
//!   `send_file`, `send_attachment`, `send_empty`
//! - incremental writes: `response_sender`
//! - error path: `send_error`
//! - hand-off: `dispatch`, `detach`, `upgrade`
//!
//! Exactly one terminal send succeeds per exchange. A second one fails with
//! [`PipelineError::ResponseStarted`].
//!
//! # Example
//!
//! ```ignore
//! async fn hello(ctx: Context) -> Result<Reply> {
//!     ctx.set_response_type(MediaType::TEXT);
//!     ctx.send_text("hello").await?;
//!     Ok(Reply::Sent)
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use super::{BoxFuture, Reply, Route};
use crate::config::PipelineConfig;
use crate::error::{Failure, PipelineError, Result};
use crate::media::MediaType;
use crate::payload::Payload;
use crate::pipeline::{self, Executor};
use crate::publisher::{self, Attachment, Source};
use crate::sender::{spawn_sender, BoxWriter, Sender};

/// Decides whether an error means the peer went away.
pub type ConnectionLost = Arc<dyn Fn(&PipelineError) -> bool + Send + Sync>;

/// Callback run once a connection has been upgraded.
pub type UpgradeFn = Arc<dyn Fn(Context) -> BoxFuture<'static, ()> + Send + Sync>;

/// Protocol the exchange was handed over to.
#[derive(Clone)]
pub enum Upgrade {
    WebSocket(UpgradeFn),
    ServerSentEvents(UpgradeFn),
}

impl Upgrade {
    pub fn kind(&self) -> &'static str {
        match self {
            Upgrade::WebSocket(_) => "websocket",
            Upgrade::ServerSentEvents(_) => "sse",
        }
    }

    /// Run the upgrade callback.
    pub fn run(&self, ctx: Context) -> BoxFuture<'static, ()> {
        match self {
            Upgrade::WebSocket(f) | Upgrade::ServerSentEvents(f) => f(ctx),
        }
    }
}

impl fmt::Debug for Upgrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Produces the error response for a failed exchange.
pub trait ErrorHandler: Send + Sync + 'static {
    fn handle(&self, ctx: Context, failure: Failure) -> BoxFuture<'static, ()>;
}

impl<F, Fut> ErrorHandler for F
where
    F: Fn(Context, Failure) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn handle(&self, ctx: Context, failure: Failure) -> BoxFuture<'static, ()> {
        Box::pin(self(ctx, failure))
    }
}

/// Writes `{"status": .., "reason": .., "message": ..}` as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorHandler;

#[derive(Serialize)]
struct ErrorBody<'a> {
    status: u16,
    reason: &'a str,
    message: String,
}

impl ErrorHandler for DefaultErrorHandler {
    fn handle(&self, ctx: Context, failure: Failure) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let status = failure.status_code();
            let body = ErrorBody {
                status,
                reason: reason_phrase(status),
                message: failure.error().to_string(),
            };

            if status >= 500 {
                tracing::error!(route = ctx.route_name(), error = %failure, "request failed");
            } else {
                tracing::debug!(route = ctx.route_name(), error = %failure, "request failed");
            }

            let bytes = match serde_json::to_vec(&body) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!(route = ctx.route_name(), error = %e, "failed to serialize error body");
                    ctx.abort().await;
                    return;
                }
            };

            ctx.set_status(status);
            ctx.set_response_type(MediaType::JSON);
            if let Err(e) = ctx.send(Bytes::from(bytes)).await {
                tracing::debug!(route = ctx.route_name(), error = %e, "error response not delivered");
            }
        })
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        415 => "Unsupported Media Type",
        499 => "Client Closed Request",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Error",
    }
}

/// Default connection-loss classifier.
///
/// Matches a closed connection and the I/O error kinds a vanished peer
/// produces.
pub fn default_connection_lost(error: &PipelineError) -> bool {
    use std::io::ErrorKind;

    match error {
        PipelineError::ConnectionClosed => true,
        PipelineError::Io(e) => matches!(
            e.kind(),
            ErrorKind::BrokenPipe
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::UnexpectedEof
        ),
        PipelineError::Completion {
            cause: Some(cause), ..
        } => default_connection_lost(cause),
        _ => false,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    route: Arc<Route>,
    request_headers: HashMap<String, String>,
    started: AtomicBool,
    detached: AtomicBool,
    status: AtomicU16,
    response_type: Mutex<Option<MediaType>>,
    response_headers: Mutex<Vec<(String, String)>>,
    body: Mutex<Option<BoxWriter>>,
    sender: Mutex<Option<Sender>>,
    upgrade: Mutex<Option<Upgrade>>,
    config: PipelineConfig,
    error_handler: Arc<dyn ErrorHandler>,
    connection_lost: ConnectionLost,
}

/// Per-exchange handle passed to every handler.
///
/// `Context` is `Clone`; all clones refer to the same exchange, so a
/// dispatched task and the I/O path observe the same response state.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    /// Start building a context for `route`.
    pub fn builder(route: Arc<Route>) -> ContextBuilder {
        ContextBuilder::new(route)
    }

    /// Context whose body is discarded. Useful in tests.
    pub fn new(route: Arc<Route>) -> Self {
        ContextBuilder::new(route).build()
    }

    #[inline]
    pub fn route(&self) -> &Arc<Route> {
        &self.inner.route
    }

    #[inline]
    pub fn route_name(&self) -> &str {
        self.inner.route.name()
    }

    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Request header value, matched case-insensitively.
    pub fn request_header(&self, name: &str) -> Option<&str> {
        self.inner
            .request_headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// True once any terminal send, sender acquisition or upgrade happened.
    #[inline]
    pub fn is_response_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// True once the exchange was handed to another task.
    #[inline]
    pub fn is_detached(&self) -> bool {
        self.inner.detached.load(Ordering::Acquire)
    }

    #[inline]
    pub fn status(&self) -> u16 {
        self.inner.status.load(Ordering::Acquire)
    }

    pub fn set_status(&self, status: u16) -> &Self {
        self.inner.status.store(status, Ordering::Release);
        self
    }

    /// Effective response type: explicit, else the route's declared type,
    /// else the encoder's type.
    pub fn response_type(&self) -> MediaType {
        if let Some(media) = self.explicit_response_type() {
            return media;
        }
        let route = self.route();
        route
            .produces()
            .cloned()
            .unwrap_or_else(|| route.encoder().media_type())
    }

    /// Response type set on this exchange, if any.
    pub fn explicit_response_type(&self) -> Option<MediaType> {
        lock(&self.inner.response_type).clone()
    }

    pub fn set_response_type(&self, media: MediaType) -> &Self {
        *lock(&self.inner.response_type) = Some(media);
        self
    }

    /// Set a response header, replacing any value with the same name.
    pub fn set_response_header(&self, name: impl Into<String>, value: impl Into<String>) -> &Self {
        let name = name.into();
        let value = value.into();
        let mut headers = lock(&self.inner.response_headers);
        match headers.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some(slot) => slot.1 = value,
            None => headers.push((name, value)),
        }
        self
    }

    pub fn response_header(&self, name: &str) -> Option<String> {
        lock(&self.inner.response_headers)
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    /// Snapshot of the response headers, in insertion order.
    pub fn response_headers(&self) -> Vec<(String, String)> {
        lock(&self.inner.response_headers).clone()
    }

    /// Whether `error` means the peer went away.
    pub fn is_connection_lost(&self, error: &PipelineError) -> bool {
        (self.inner.connection_lost)(error)
    }

    /// Mark the response started and return the body sender.
    ///
    /// Used for incremental writes. Repeated calls return the same sender.
    pub fn response_sender(&self) -> Sender {
        self.inner.started.store(true, Ordering::Release);
        self.sender()
    }

    fn sender(&self) -> Sender {
        let mut slot = lock(&self.inner.sender);
        if let Some(sender) = slot.as_ref() {
            return sender.clone();
        }
        let body = lock(&self.inner.body)
            .take()
            .unwrap_or_else(|| Box::new(tokio::io::sink()));
        let (sender, _task) = spawn_sender(body, self.inner.config.sender());
        *slot = Some(sender.clone());
        sender
    }

    /// Claim the single terminal send.
    fn begin(&self) -> Result<Sender> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(PipelineError::ResponseStarted);
        }
        Ok(self.sender())
    }

    /// Send `bytes` as the whole body.
    pub async fn send(&self, bytes: Bytes) -> Result<()> {
        let sender = self.begin()?;
        sender.write(bytes).await?;
        sender.close().await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Bytes::from(text.into())).await
    }

    /// Encode `value` with the route's encoder and send it.
    pub async fn render(&self, value: Payload) -> Result<()> {
        let bytes = self.route().encoder().encode(&value)?;
        self.send(bytes).await
    }

    /// Send an empty body with `status`.
    pub async fn send_empty(&self, status: u16) -> Result<()> {
        self.set_status(status);
        let sender = self.begin()?;
        sender.close().await
    }

    /// Copy `reader` to the body.
    pub async fn send_stream<R>(&self, mut reader: R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let sender = self.begin()?;
        self.copy(&mut reader, &sender).await?;
        sender.close().await
    }

    /// Copy an open file to the body, announcing its length.
    pub async fn send_file(&self, file: tokio::fs::File) -> Result<()> {
        if let Ok(meta) = file.metadata().await {
            self.set_response_header("Content-Length", meta.len().to_string());
        }
        self.send_stream(file).await
    }

    /// Send a download with `Content-Disposition` and a guessed type.
    pub async fn send_attachment(&self, attachment: Attachment) -> Result<()> {
        self.set_response_header("Content-Disposition", attachment.disposition());
        if self.explicit_response_type().is_none() {
            self.set_response_type(attachment.media_type());
        }
        match attachment.into_source() {
            Source::Reader(reader) => self.send_stream(reader).await,
            Source::File(file) => self.send_file(file).await,
            Source::Path(path) => self.send_file(publisher::open(&path).await?).await,
        }
    }

    async fn copy<R>(&self, reader: &mut R, sender: &Sender) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let size = self.inner.config.stream_buffer_size.max(1);
        let mut buf = BytesMut::with_capacity(size);
        let mut total = 0u64;
        loop {
            buf.reserve(size);
            let n = reader.read_buf(&mut buf).await?;
            if n == 0 {
                return Ok(total);
            }
            total += n as u64;
            sender.write(buf.split().freeze()).await?;
        }
    }

    /// Route a failure to the error path.
    ///
    /// A lost connection is only logged. If the response already started,
    /// the failure is logged and the body closed. Otherwise the configured
    /// [`ErrorHandler`] produces the error response.
    pub async fn send_error(&self, failure: impl Into<Failure>) {
        let failure = failure.into();

        if self.is_connection_lost(failure.error()) {
            tracing::debug!(route = self.route_name(), error = %failure, "connection lost");
            self.abort().await;
            return;
        }

        if self.is_response_started() {
            tracing::error!(
                route = self.route_name(),
                error = %failure,
                "error after response started"
            );
            self.abort().await;
            return;
        }

        let handler = self.inner.error_handler.clone();
        handler.handle(self.clone(), failure).await;
    }

    /// Close the body if one was opened.
    pub async fn abort(&self) {
        let sender = lock(&self.inner.sender).clone();
        if let Some(sender) = sender {
            if let Err(e) = sender.close().await {
                tracing::debug!(route = self.route_name(), error = %e, "close failed");
            }
        }
    }

    /// Run `task` on `executor`; the response will be completed there.
    pub fn dispatch<F>(&self, executor: &dyn Executor, task: F) -> Reply
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.detached.store(true, Ordering::Release);
        executor.execute(Box::pin(task));
        Reply::Detached
    }

    /// Run `task` on the runtime; the response will be completed there.
    ///
    /// If the task panics or is cancelled, the join error goes to the
    /// error path.
    pub fn detach<F>(&self, task: F) -> Reply
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.detached.store(true, Ordering::Release);
        let task = tokio::spawn(task);
        let ctx = self.clone();
        tokio::spawn(async move {
            if let Err(e) = task.await {
                pipeline::fail(&ctx, e.into()).await;
            }
        });
        Reply::Detached
    }

    /// Hand the exchange over to another protocol.
    pub fn upgrade(&self, upgrade: Upgrade) -> Result<Reply> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(PipelineError::ResponseStarted);
        }
        *lock(&self.inner.upgrade) = Some(upgrade);
        Ok(Reply::Sent)
    }

    /// Take the pending upgrade, for the transport to run.
    pub fn take_upgrade(&self) -> Option<Upgrade> {
        lock(&self.inner.upgrade).take()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("route", &self.route_name())
            .field("status", &self.status())
            .field("started", &self.is_response_started())
            .finish()
    }
}

/// Builder for [`Context`].
pub struct ContextBuilder {
    route: Arc<Route>,
    request_headers: HashMap<String, String>,
    response_type: Option<MediaType>,
    body: Option<BoxWriter>,
    config: PipelineConfig,
    error_handler: Arc<dyn ErrorHandler>,
    connection_lost: ConnectionLost,
}

impl ContextBuilder {
    pub fn new(route: Arc<Route>) -> Self {
        Self {
            route,
            request_headers: HashMap::new(),
            response_type: None,
            body: None,
            config: PipelineConfig::default(),
            error_handler: Arc::new(DefaultErrorHandler),
            connection_lost: Arc::new(default_connection_lost),
        }
    }

    /// Add a request header.
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.request_headers
            .insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Preset the response type.
    pub fn response_type(mut self, media: MediaType) -> Self {
        self.response_type = Some(media);
        self
    }

    /// Transport body sink. Without one, the body is discarded.
    pub fn body<W>(mut self, body: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.body = Some(Box::new(body));
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = handler;
        self
    }

    pub fn connection_lost(mut self, classifier: ConnectionLost) -> Self {
        self.connection_lost = classifier;
        self
    }

    pub fn build(self) -> Context {
        Context {
            inner: Arc::new(Inner {
                route: self.route,
                request_headers: self.request_headers,
                started: AtomicBool::new(false),
                detached: AtomicBool::new(false),
                status: AtomicU16::new(200),
                response_type: Mutex::new(self.response_type),
                response_headers: Mutex::new(Vec::new()),
                body: Mutex::new(self.body),
                sender: Mutex::new(None),
                upgrade: Mutex::new(None),
                config: self.config,
                error_handler: self.error_handler,
                connection_lost: self.connection_lost,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RawEncoder;
    use crate::handler::Route;
    use tokio::io::duplex;

    fn route() -> Arc<Route> {
        Arc::new(Route::builder("test", |_ctx: Context| async { Ok(()) }).build())
    }

    async fn read_all(mut server: tokio::io::DuplexStream) -> Vec<u8> {
        let mut body = Vec::new();
        server.read_to_end(&mut body).await.unwrap();
        body
    }

    #[tokio::test]
    async fn test_send_is_terminal() {
        let (client, server) = duplex(1024);
        let ctx = Context::builder(route()).body(client).build();

        ctx.send(Bytes::from_static(b"once")).await.unwrap();
        assert!(ctx.is_response_started());
        assert!(matches!(
            ctx.send(Bytes::from_static(b"twice")).await,
            Err(PipelineError::ResponseStarted)
        ));
        assert_eq!(read_all(server).await, b"once");
    }

    #[tokio::test]
    async fn test_response_type_resolution() {
        let ctx = Context::new(route());
        assert_eq!(ctx.response_type(), MediaType::JSON);

        let produces = Arc::new(
            Route::builder("p", |_ctx: Context| async { Ok(()) })
                .produces(MediaType::HTML)
                .build(),
        );
        assert_eq!(Context::new(produces.clone()).response_type(), MediaType::HTML);

        let raw = Arc::new(
            Route::builder("r", |_ctx: Context| async { Ok(()) })
                .encoder(RawEncoder)
                .build(),
        );
        assert_eq!(Context::new(raw).response_type(), MediaType::TEXT);

        let ctx = Context::builder(produces)
            .response_type(MediaType::NDJSON)
            .build();
        assert_eq!(ctx.response_type(), MediaType::NDJSON);
    }

    #[tokio::test]
    async fn test_headers_case_insensitive() {
        let ctx = Context::builder(route()).header("Upgrade", "websocket").build();
        assert_eq!(ctx.request_header("upgrade"), Some("websocket"));

        ctx.set_response_header("X-Id", "1");
        ctx.set_response_header("x-id", "2");
        assert_eq!(ctx.response_headers().len(), 1);
        assert_eq!(ctx.response_header("X-ID").as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_send_error_default_handler() {
        let (client, server) = duplex(1024);
        let ctx = Context::builder(route()).body(client).build();

        ctx.send_error(PipelineError::status(409, "taken")).await;

        assert_eq!(ctx.status(), 409);
        assert_eq!(ctx.response_type(), MediaType::JSON);
        let body: serde_json::Value = serde_json::from_slice(&read_all(server).await).unwrap();
        assert_eq!(body["status"], 409);
        assert_eq!(body["reason"], "Conflict");
        assert_eq!(body["message"], "409: taken");
    }

    #[tokio::test]
    async fn test_send_error_after_start_only_closes() {
        let (client, server) = duplex(1024);
        let ctx = Context::builder(route()).body(client).build();

        let sender = ctx.response_sender();
        sender.write(Bytes::from_static(b"partial")).await.unwrap();
        ctx.send_error(PipelineError::handler("late")).await;

        assert_eq!(ctx.status(), 200);
        assert!(sender.is_closed());
        assert_eq!(read_all(server).await, b"partial");
    }

    #[tokio::test]
    async fn test_send_error_connection_lost_skips_handler() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = calls.clone();
        let ctx = Context::builder(route())
            .error_handler(Arc::new(move |_ctx: Context, _f: Failure| {
                seen.fetch_add(1, Ordering::SeqCst);
                async {}
            }))
            .build();

        ctx.send_error(PipelineError::ConnectionClosed).await;
        ctx.send_error(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        ctx.send_error(PipelineError::handler("boom")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_send_stream_copies_everything() {
        let (client, server) = duplex(64 * 1024);
        let config = PipelineConfig {
            stream_buffer_size: 7,
            ..Default::default()
        };
        let ctx = Context::builder(route()).body(client).config(config).build();

        let data = vec![b'z'; 100];
        ctx.send_stream(&data[..]).await.unwrap();
        assert_eq!(read_all(server).await, data);
    }

    #[tokio::test]
    async fn test_send_empty_sets_status() {
        let (client, server) = duplex(64);
        let ctx = Context::builder(route()).body(client).build();
        ctx.send_empty(204).await.unwrap();
        assert_eq!(ctx.status(), 204);
        assert!(read_all(server).await.is_empty());
    }

    #[tokio::test]
    async fn test_upgrade_claims_response() {
        let ctx = Context::new(route());
        let upgrade = Upgrade::WebSocket(Arc::new(|_ctx: Context| -> BoxFuture<'static, ()> {
            Box::pin(async {})
        }));
        assert!(ctx.upgrade(upgrade.clone()).is_ok());
        assert!(matches!(ctx.upgrade(upgrade), Err(PipelineError::ResponseStarted)));
        assert_eq!(ctx.take_upgrade().map(|u| u.kind()), Some("websocket"));
    }

    #[tokio::test]
    async fn test_detach_hands_off_response() {
        let (client, server) = duplex(64);
        let ctx = Context::builder(route()).body(client).build();

        let task_ctx = ctx.clone();
        let reply = ctx.detach(async move {
            let _ = task_ctx.send_text("later").await;
        });

        assert!(matches!(reply, Reply::Detached));
        assert!(ctx.is_detached());
        assert_eq!(read_all(server).await, b"later");
    }

    #[tokio::test]
    async fn test_detached_panic_is_reported() {
        let (client, server) = duplex(1024);
        let ctx = Context::builder(route()).body(client).build();

        let reply = ctx.detach(async {
            panic!("detached");
        });

        assert!(matches!(reply, Reply::Detached));
        let body: serde_json::Value = serde_json::from_slice(&read_all(server).await).unwrap();
        assert_eq!(ctx.status(), 500);
        assert_eq!(body["message"], "panic: detached");
    }

    #[test]
    fn test_default_connection_lost() {
        use std::io::{Error, ErrorKind};
        assert!(default_connection_lost(&PipelineError::ConnectionClosed));
        assert!(default_connection_lost(&Error::from(ErrorKind::ConnectionReset).into()));
        assert!(default_connection_lost(&PipelineError::completion(
            PipelineError::ConnectionClosed
        )));
        assert!(!default_connection_lost(&Error::from(ErrorKind::PermissionDenied).into()));
        assert!(!default_connection_lost(&PipelineError::handler("x")));
    }
}
