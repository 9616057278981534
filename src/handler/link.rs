//! Composition records.
//!
//! A route's effective handler is built by wrapping the user handler one
//! layer at a time. Each layer is recorded as a [`Link`] holding the
//! handler it produced and the link it wraps, so the chain can be walked
//! with plain field access (`next()`, `innermost()`).

use std::fmt;
use std::sync::Arc;

use super::Handler;

/// A handler decorator: `Handler -> Handler`.
pub trait Decorator: Send + Sync + 'static {
    /// Wrap `next`.
    fn apply(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler>;

    /// Name recorded on the link, for introspection.
    fn name(&self) -> &'static str {
        "decorator"
    }

    /// Whether the decorated route can run on the I/O thread.
    ///
    /// `None` leaves the route's setting alone.
    fn non_blocking(&self) -> Option<bool> {
        None
    }
}

impl<F> Decorator for F
where
    F: Fn(Arc<dyn Handler>) -> Arc<dyn Handler> + Send + Sync + 'static,
{
    fn apply(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler> {
        self(next)
    }
}

/// One layer of a composed handler.
#[derive(Clone)]
pub struct Link {
    name: &'static str,
    handler: Arc<dyn Handler>,
    next: Option<Arc<Link>>,
}

impl Link {
    /// Innermost link, holding the user handler.
    pub fn new(name: &'static str, handler: Arc<dyn Handler>) -> Self {
        Self {
            name,
            handler,
            next: None,
        }
    }

    /// Add an outer layer built from this link's handler.
    pub fn wrap<F>(self, name: &'static str, layer: F) -> Link
    where
        F: FnOnce(Arc<dyn Handler>) -> Arc<dyn Handler>,
    {
        let handler = layer(self.handler.clone());
        Link {
            name,
            handler,
            next: Some(Arc::new(self)),
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The handler this layer exposes.
    #[inline]
    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    /// The layer this one wraps.
    #[inline]
    pub fn next(&self) -> Option<&Link> {
        self.next.as_deref()
    }

    /// The user handler at the bottom of the chain.
    pub fn innermost(&self) -> &Link {
        let mut link = self;
        while let Some(next) = link.next() {
            link = next;
        }
        link
    }

    /// Walk from this layer inwards.
    pub fn iter(&self) -> impl Iterator<Item = &Link> {
        std::iter::successors(Some(self), |link| link.next())
    }

    /// Layer names, outermost first.
    pub fn names(&self) -> Vec<&'static str> {
        self.iter().map(Link::name).collect()
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{handler_fn, Context, Reply};

    fn user() -> Arc<dyn Handler> {
        Arc::new(handler_fn(|_ctx: Context| async { Ok(Reply::Empty) }))
    }

    #[test]
    fn test_wrap_records_next() {
        let inner = user();
        let link = Link::new("handler", inner.clone())
            .wrap("a", |next| next)
            .wrap("b", |next| next);

        assert_eq!(link.names(), vec!["b", "a", "handler"]);
        assert_eq!(link.next().map(Link::name), Some("a"));
        assert!(Arc::ptr_eq(link.innermost().handler(), &inner));
    }

    #[test]
    fn test_next_is_exact_wrapped_handler() {
        let inner = user();
        let wrapper = user();
        let wrapper_clone = wrapper.clone();
        let link = Link::new("handler", inner.clone()).wrap("outer", move |_| wrapper_clone);

        assert!(Arc::ptr_eq(link.handler(), &wrapper));
        assert!(Arc::ptr_eq(link.next().unwrap().handler(), &inner));
    }

    #[test]
    fn test_closure_decorator() {
        let decorator = |next: Arc<dyn Handler>| next;
        assert_eq!(Decorator::name(&decorator), "decorator");
        assert_eq!(decorator.non_blocking(), None);

        let inner = user();
        assert!(Arc::ptr_eq(&decorator.apply(inner.clone()), &inner));
    }
}
