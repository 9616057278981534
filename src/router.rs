//! Router builder and request entry point.
//!
//! The [`RouterBuilder`] provides a fluent API for registering routes and
//! the shared pipeline settings. The [`Router`] creates a [`Context`] per
//! exchange and runs the route's composed chain:
//! 1. Admit the request (bounded by `max_concurrent_requests`)
//! 2. Hand blocking routes to the worker executor, if one is configured
//! 3. Run the chain; anything it fails to send goes to the error path
//!
//! # Example
//!
//! ```ignore
//! use sendwire::{Chunked, Context, Router};
//!
//! let router = Router::builder()
//!     .route("hello", |_ctx: Context| async { Ok("hello") })
//!     .route("numbers", |_ctx: Context| async {
//!         Ok(Chunked::json(futures::stream::iter(1..=3)))
//!     })
//!     .build();
//!
//! let (client, server) = tokio::io::duplex(4096);
//! let ctx = router.serve("numbers", client).await?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::io::AsyncWrite;
use tokio::sync::Semaphore;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::handler::{
    default_connection_lost, ConnectionLost, Context, ContextBuilder, DefaultErrorHandler,
    ErrorHandler, IntoReply, Reply, Route, RouteBuilder, Shape,
};
use crate::pipeline::{fail, run_detached, Executor, SseHandler, WebSocketHandler};

/// Builder for configuring and creating a [`Router`].
pub struct RouterBuilder {
    routes: Vec<RouteBuilder>,
    config: PipelineConfig,
    error_handler: Arc<dyn ErrorHandler>,
    connection_lost: ConnectionLost,
    worker: Option<Arc<dyn Executor>>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            config: PipelineConfig::default(),
            error_handler: Arc::new(DefaultErrorHandler),
            connection_lost: Arc::new(default_connection_lost),
            worker: None,
        }
    }

    /// Register a typed handler. Its return type picks the adapter.
    pub fn route<F, R, Fut>(self, name: &str, handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: IntoReply,
    {
        self.route_with(Route::builder(name, handler))
    }

    /// Register a fully configured route.
    pub fn route_with(mut self, route: RouteBuilder) -> Self {
        self.routes.push(route);
        self
    }

    /// Register a WebSocket endpoint.
    pub fn websocket<F, Fut>(self, name: &str, on_connect: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(WebSocketHandler::new(on_connect));
        self.route_with(RouteBuilder::new(name, handler, Shape::Value).non_blocking(true))
    }

    /// Register a server-sent events endpoint.
    pub fn sse<F, Fut>(self, name: &str, on_connect: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(SseHandler::new(on_connect));
        self.route_with(RouteBuilder::new(name, handler, Shape::Value).non_blocking(true))
    }

    /// Replace the error handler. Default: [`DefaultErrorHandler`].
    pub fn error_handler<H: ErrorHandler>(mut self, handler: H) -> Self {
        self.error_handler = Arc::new(handler);
        self
    }

    /// Replace the connection-loss classifier.
    pub fn connection_lost<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&PipelineError) -> bool + Send + Sync + 'static,
    {
        self.connection_lost = Arc::new(classifier);
        self
    }

    /// Executor for blocking routes. Without one, they run in place.
    pub fn worker(mut self, executor: Arc<dyn Executor>) -> Self {
        self.worker = Some(executor);
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum number of concurrently handled requests.
    ///
    /// Requests past the limit are answered with `503`.
    /// Default: 256
    pub fn max_concurrent_requests(mut self, limit: usize) -> Self {
        self.config.max_concurrent_requests = limit;
        self
    }

    /// Set the sender command queue depth.
    /// Default: 16
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Set the read buffer used for stream and file copies.
    /// Default: 8 KiB
    pub fn stream_buffer_size(mut self, size: usize) -> Self {
        self.config.stream_buffer_size = size;
        self
    }

    pub fn build(self) -> Router {
        let mut routes = HashMap::with_capacity(self.routes.len());
        for builder in self.routes {
            let route = Arc::new(builder.build());
            tracing::debug!(
                route = route.name(),
                chain = ?route.pipeline(),
                non_blocking = route.is_non_blocking(),
                "registered route"
            );
            if let Some(previous) = routes.insert(route.name().to_string(), route) {
                tracing::warn!(route = previous.name(), "route registered twice; keeping the last");
            }
        }

        Router {
            routes,
            permits: Arc::new(Semaphore::new(self.config.max_concurrent_requests)),
            config: self.config,
            error_handler: self.error_handler,
            connection_lost: self.connection_lost,
            worker: self.worker,
        }
    }
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Registered routes plus the settings every exchange shares.
pub struct Router {
    routes: HashMap<String, Arc<Route>>,
    config: PipelineConfig,
    error_handler: Arc<dyn ErrorHandler>,
    connection_lost: ConnectionLost,
    worker: Option<Arc<dyn Executor>>,
    permits: Arc<Semaphore>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    pub fn route(&self, name: &str) -> Option<&Arc<Route>> {
        self.routes.get(name)
    }

    /// Registered route names, sorted.
    pub fn route_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Free admission slots.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Context builder for an exchange on route `name`, writing to `body`.
    pub fn context<W>(&self, name: &str, body: W) -> Result<ContextBuilder>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let route = self
            .routes
            .get(name)
            .ok_or_else(|| PipelineError::RouteNotFound(name.to_string()))?;
        Ok(Context::builder(route.clone())
            .body(body)
            .config(self.config.clone())
            .error_handler(self.error_handler.clone())
            .connection_lost(self.connection_lost.clone()))
    }

    /// Run the exchange's route.
    pub async fn handle(&self, ctx: Context) -> Reply {
        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!(
                    route = ctx.route_name(),
                    "request capacity reached, rejecting request"
                );
                ctx.send_error(PipelineError::status(503, "server busy")).await;
                return Reply::Sent;
            }
        };

        let handler = ctx.route().handler().clone();

        if !ctx.route().is_non_blocking() {
            if let Some(worker) = &self.worker {
                let task_ctx = ctx.clone();
                return ctx.dispatch(worker.as_ref(), async move {
                    let _permit = permit;
                    run_detached(handler, task_ctx).await;
                });
            }
        }

        let _permit = permit;
        match handler.call(ctx.clone()).await {
            Ok(reply) => reply,
            Err(e) => {
                fail(&ctx, e).await;
                Reply::Sent
            }
        }
    }

    /// Build a context for `name`, run it, and return it for inspection.
    pub async fn serve<W>(&self, name: &str, body: W) -> Result<Context>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let ctx = self.context(name, body)?.build();
        self.handle(ctx.clone()).await;
        Ok(ctx)
    }
}
