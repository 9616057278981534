//! Registered endpoints.
//!
//! A [`Route`] owns the composed handler chain for one endpoint. The chain is
//! assembled once, in [`RouteBuilder::build`], outer to inner:
//!
//! ```text
//! dispatch?  ->  default  ->  terminal adapter  ->  decorators  ->  handler
//! ```
//!
//! The terminal adapter is picked from the route's [`Shape`], which comes
//! from the handler's declared return type. Nothing inspects a handler's
//! result type per request.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use super::{handler_fn, Context, Decorator, Handler, IntoReply, Link};
use crate::codec::{Encoder, JsonEncoder};
use crate::error::{PipelineError, Result};
use crate::media::MediaType;
use crate::payload::Payload;
use crate::pipeline::{self, DefaultHandler, DispatchHandler, Executor};

/// Declared result shape of a route's handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// A byte buffer, sent verbatim.
    Bytes,
    /// Text, sent as UTF-8.
    Text,
    /// A reader, file handle or path.
    Source,
    /// A download.
    Attachment,
    /// A future of one value.
    Deferred,
    /// A future of zero or one value.
    Single,
    /// A stream of values.
    Stream,
    /// Anything else; rendered by the default boundary.
    Value,
}

impl Shape {
    pub fn name(self) -> &'static str {
        match self {
            Shape::Bytes => "bytes",
            Shape::Text => "text",
            Shape::Source => "source",
            Shape::Attachment => "attachment",
            Shape::Deferred => "deferred",
            Shape::Single => "single",
            Shape::Stream => "stream",
            Shape::Value => "value",
        }
    }

    /// Shapes whose adapters never block the calling task.
    pub fn is_non_blocking(self) -> bool {
        matches!(self, Shape::Deferred | Shape::Single | Shape::Stream)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Hook run before the terminal write.
///
/// Called with the value about to be rendered, or with the error about to
/// be reported. A failing hook never replaces a successful value; on the
/// error path its failure is attached as suppressed.
pub trait After: Send + Sync + 'static {
    fn apply(
        &self,
        ctx: &Context,
        value: Option<&mut Payload>,
        error: Option<&PipelineError>,
    ) -> Result<()>;
}

impl<F> After for F
where
    F: Fn(&Context, Option<&mut Payload>, Option<&PipelineError>) -> Result<()>
        + Send
        + Sync
        + 'static,
{
    fn apply(
        &self,
        ctx: &Context,
        value: Option<&mut Payload>,
        error: Option<&PipelineError>,
    ) -> Result<()> {
        self(ctx, value, error)
    }
}

/// A registered endpoint.
pub struct Route {
    name: String,
    pipeline: Link,
    shape: Shape,
    encoder: Arc<dyn Encoder>,
    after: Option<Arc<dyn After>>,
    produces: Option<MediaType>,
    non_blocking: bool,
}

impl Route {
    /// Builder for a typed handler; the shape comes from `R`.
    pub fn builder<F, R, Fut>(name: impl Into<String>, handler: F) -> RouteBuilder
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: IntoReply,
    {
        RouteBuilder::new(name, Arc::new(handler_fn(handler)), R::SHAPE)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Outermost handler of the composed chain.
    #[inline]
    pub fn handler(&self) -> &Arc<dyn Handler> {
        self.pipeline.handler()
    }

    /// The composed chain.
    #[inline]
    pub fn pipeline(&self) -> &Link {
        &self.pipeline
    }

    #[inline]
    pub fn shape(&self) -> Shape {
        self.shape
    }

    #[inline]
    pub fn encoder(&self) -> &dyn Encoder {
        self.encoder.as_ref()
    }

    pub fn after(&self) -> Option<&dyn After> {
        self.after.as_deref()
    }

    /// Declared response type.
    pub fn produces(&self) -> Option<&MediaType> {
        self.produces.as_ref()
    }

    /// Whether the route may run on the I/O task.
    #[inline]
    pub fn is_non_blocking(&self) -> bool {
        self.non_blocking
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .field("pipeline", &self.pipeline)
            .field("non_blocking", &self.non_blocking)
            .finish()
    }
}

/// Builder for [`Route`].
pub struct RouteBuilder {
    name: String,
    handler: Arc<dyn Handler>,
    shape: Shape,
    encoder: Arc<dyn Encoder>,
    after: Option<Arc<dyn After>>,
    produces: Option<MediaType>,
    decorators: Vec<Arc<dyn Decorator>>,
    executor: Option<Arc<dyn Executor>>,
    non_blocking: Option<bool>,
}

impl RouteBuilder {
    /// Builder for an untyped handler with an explicit shape.
    pub fn new(name: impl Into<String>, handler: Arc<dyn Handler>, shape: Shape) -> Self {
        Self {
            name: name.into(),
            handler,
            shape,
            encoder: Arc::new(JsonEncoder),
            after: None,
            produces: None,
            decorators: Vec::new(),
            executor: None,
            non_blocking: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Override the declared shape.
    pub fn shape(mut self, shape: Shape) -> Self {
        self.shape = shape;
        self
    }

    /// Encoder for rendered values. Defaults to JSON.
    pub fn encoder<E: Encoder>(mut self, encoder: E) -> Self {
        self.encoder = Arc::new(encoder);
        self
    }

    pub fn produces(mut self, media: MediaType) -> Self {
        self.produces = Some(media);
        self
    }

    pub fn after<A: After>(mut self, after: A) -> Self {
        self.after = Some(Arc::new(after));
        self
    }

    /// Add a decorator. The first one added ends up outermost.
    pub fn decorator<D: Decorator>(mut self, decorator: D) -> Self {
        self.decorators.push(Arc::new(decorator));
        self
    }

    /// Run the whole chain on `executor` instead of the calling task.
    pub fn dispatch(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Force the blocking flag.
    pub fn non_blocking(mut self, non_blocking: bool) -> Self {
        self.non_blocking = Some(non_blocking);
        self
    }

    pub fn build(self) -> Route {
        let mut non_blocking = self.shape.is_non_blocking();

        let mut link = Link::new("handler", self.handler);
        for decorator in self.decorators.iter().rev() {
            link = link.wrap(decorator.name(), |next| decorator.apply(next));
            if let Some(flag) = decorator.non_blocking() {
                non_blocking = flag;
            }
        }

        let shape = self.shape;
        if let Some(name) = pipeline::adapter_name(shape) {
            link = link.wrap(name, |next| pipeline::adapter(shape, next));
        }
        link = link.wrap("default", |next| Arc::new(DefaultHandler::new(next)));

        if let Some(executor) = self.executor {
            link = link.wrap("dispatch", |next| {
                Arc::new(DispatchHandler::new(executor, next))
            });
            non_blocking = true;
        }

        Route {
            name: self.name,
            pipeline: link,
            shape,
            encoder: self.encoder,
            after: self.after,
            produces: self.produces,
            non_blocking: self.non_blocking.unwrap_or(non_blocking),
        }
    }
}
