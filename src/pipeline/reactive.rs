//! Demand-driven consumption of asynchronous results.
//!
//! [`drive`] pulls from a stream only while its [`Subscriber`] has
//! outstanding demand. Subscribers here request one item at a time, and
//! only after the previous item was fully handled, so at most one item is
//! ever in flight between the producer and the response body.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future;
use futures::stream::{self, Stream, StreamExt};
use futures::FutureExt;

use super::{complete, fail, terminal, unexpected};
use crate::error::{PipelineError, Result};
use crate::handler::{BoxFuture, Context, Handler, HandlerResult, Reply, Shape};
use crate::payload::Payload;
use crate::publisher::Publisher;

#[derive(Debug, Default)]
struct SubscriptionState {
    demand: AtomicUsize,
    requested: AtomicUsize,
    cancelled: AtomicBool,
}

/// Demand channel between a subscriber and [`drive`].
#[derive(Debug, Clone, Default)]
pub struct Subscription {
    state: Arc<SubscriptionState>,
}

impl Subscription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for the next item. Demand never exceeds one.
    pub fn request(&self, n: usize) {
        if n == 0 || self.is_cancelled() {
            return;
        }
        self.state.demand.store(1, Ordering::Release);
        self.state.requested.fetch_add(1, Ordering::AcqRel);
    }

    /// Stop the producer. No item is pulled afterwards.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
        self.state.demand.store(0, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Outstanding demand: zero or one.
    #[inline]
    pub fn demand(&self) -> usize {
        self.state.demand.load(Ordering::Acquire)
    }

    /// Number of `request` calls honoured so far.
    #[inline]
    pub fn requested(&self) -> usize {
        self.state.requested.load(Ordering::Acquire)
    }

    fn take(&self) -> bool {
        self.state
            .demand
            .compare_exchange(1, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Consumer side of [`drive`].
///
/// Exactly one of `on_error` and `on_complete` is called, at most once,
/// and never before `on_subscribe`.
pub trait Subscriber: Send {
    fn on_subscribe(&mut self, subscription: Subscription);

    fn on_next(&mut self, item: Payload) -> BoxFuture<'_, ()>;

    fn on_error(&mut self, error: PipelineError) -> BoxFuture<'_, ()>;

    fn on_complete(&mut self) -> BoxFuture<'_, ()>;
}

/// Feed `stream` into `subscriber`, one requested item at a time.
///
/// Stops when the stream ends or fails, when the subscription is cancelled,
/// or when the subscriber stops requesting. The stream is dropped on return.
pub async fn drive<S, T>(mut stream: S, subscriber: &mut T)
where
    S: Stream<Item = Result<Payload>> + Unpin + Send,
    T: Subscriber + ?Sized,
{
    let subscription = Subscription::new();
    subscriber.on_subscribe(subscription.clone());

    loop {
        if subscription.is_cancelled() {
            tracing::debug!("subscription cancelled");
            return;
        }
        if !subscription.take() {
            tracing::debug!("subscriber stopped requesting");
            return;
        }

        let next = AssertUnwindSafe(stream.next())
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Some(Err(PipelineError::from_panic(panic))));

        match next {
            Some(Ok(item)) => subscriber.on_next(item).await,
            Some(Err(e)) => {
                subscriber.on_error(e).await;
                return;
            }
            None => {
                subscriber.on_complete().await;
                return;
            }
        }
    }
}

/// Completes the exchange with at most one value.
///
/// Completing without a value sends `204 No Content`.
pub struct SingleSubscriber {
    ctx: Context,
    subscription: Option<Subscription>,
    received: bool,
}

impl SingleSubscriber {
    pub fn new(ctx: Context) -> Self {
        Self {
            ctx,
            subscription: None,
            received: false,
        }
    }

    async fn next_item(&mut self, item: Payload) {
        if self.received {
            // More than one value: keep the first, stop the producer.
            if let Some(subscription) = &self.subscription {
                subscription.cancel();
            }
            return;
        }
        self.received = true;
        complete(&self.ctx, Ok(item)).await;
        if let Some(subscription) = &self.subscription {
            subscription.request(1);
        }
    }

    async fn finish(&mut self) {
        if self.received || self.ctx.is_response_started() {
            return;
        }
        if let Err(e) = self.ctx.send_empty(204).await {
            fail(&self.ctx, e).await;
        }
    }
}

impl Subscriber for SingleSubscriber {
    fn on_subscribe(&mut self, subscription: Subscription) {
        subscription.request(1);
        self.subscription = Some(subscription);
    }

    fn on_next(&mut self, item: Payload) -> BoxFuture<'_, ()> {
        Box::pin(self.next_item(item))
    }

    fn on_error(&mut self, error: PipelineError) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.received {
                tracing::debug!(route = self.ctx.route_name(), error = %error, "error after value");
                return;
            }
            complete(&self.ctx, Err(error)).await
        })
    }

    fn on_complete(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(self.finish())
    }
}

/// Adapter for zero-or-one results.
pub struct ReactiveHandler {
    next: Arc<dyn Handler>,
}

impl ReactiveHandler {
    pub fn new(next: Arc<dyn Handler>) -> Self {
        Self { next }
    }
}

impl Handler for ReactiveHandler {
    fn call(&self, ctx: Context) -> BoxFuture<'static, HandlerResult> {
        let next = self.next.clone();
        Box::pin(async move {
            terminal(&next, ctx, |ctx, reply| async move {
                let mut subscriber = SingleSubscriber::new(ctx);
                match reply {
                    Reply::Publisher(Publisher::Single(future)) => {
                        let items = stream::once(future)
                            .filter_map(|outcome| future::ready(outcome.transpose()));
                        drive(Box::pin(items), &mut subscriber).await;
                    }
                    Reply::Publisher(Publisher::Deferred(future)) => {
                        drive(stream::once(future), &mut subscriber).await;
                    }
                    Reply::Publisher(Publisher::Stream(items)) => {
                        drive(items, &mut subscriber).await;
                    }
                    other => return Err(unexpected(Shape::Single, &other)),
                }
                Ok(())
            })
            .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Route;
    use crate::publisher::Single;
    use tokio::io::{duplex, AsyncReadExt};

    #[derive(Default)]
    struct Recorder {
        subscription: Option<Subscription>,
        items: Vec<Payload>,
        errors: usize,
        completed: usize,
        stop_after: Option<usize>,
    }

    impl Subscriber for Recorder {
        fn on_subscribe(&mut self, subscription: Subscription) {
            subscription.request(1);
            self.subscription = Some(subscription);
        }

        fn on_next(&mut self, item: Payload) -> BoxFuture<'_, ()> {
            Box::pin(async move {
                self.items.push(item);
                let subscription = self.subscription.as_ref().unwrap();
                if Some(self.items.len()) == self.stop_after {
                    subscription.cancel();
                } else {
                    subscription.request(1);
                }
            })
        }

        fn on_error(&mut self, _error: PipelineError) -> BoxFuture<'_, ()> {
            Box::pin(async move { self.errors += 1 })
        }

        fn on_complete(&mut self) -> BoxFuture<'_, ()> {
            Box::pin(async move { self.completed += 1 })
        }
    }

    fn items(n: i64) -> impl Stream<Item = Result<Payload>> + Unpin + Send {
        stream::iter((0..n).map(|i| Ok(Payload::Data(i.into()))))
    }

    #[tokio::test]
    async fn test_drive_delivers_all_then_completes() {
        let mut recorder = Recorder::default();
        drive(items(3), &mut recorder).await;

        assert_eq!(recorder.items.len(), 3);
        assert_eq!(recorder.completed, 1);
        assert_eq!(recorder.errors, 0);
    }

    #[tokio::test]
    async fn test_drive_stops_on_cancel() {
        let mut recorder = Recorder {
            stop_after: Some(2),
            ..Default::default()
        };
        drive(items(10), &mut recorder).await;

        assert_eq!(recorder.items.len(), 2);
        assert_eq!(recorder.completed, 0);
        assert!(recorder.subscription.unwrap().is_cancelled());
    }

    #[tokio::test]
    async fn test_drive_error_is_terminal() {
        let failing = stream::iter(vec![
            Ok(Payload::Text("a".into())),
            Err(PipelineError::handler("boom")),
            Ok(Payload::Text("b".into())),
        ]);
        let mut recorder = Recorder::default();
        drive(failing, &mut recorder).await;

        assert_eq!(recorder.items.len(), 1);
        assert_eq!(recorder.errors, 1);
        assert_eq!(recorder.completed, 0);
    }

    #[test]
    fn test_demand_never_exceeds_one() {
        let subscription = Subscription::new();
        subscription.request(5);
        subscription.request(1);
        assert_eq!(subscription.demand(), 1);
        assert_eq!(subscription.requested(), 2);
        assert!(subscription.take());
        assert!(!subscription.take());
    }

    async fn run_single(single: Single) -> (Context, Vec<u8>) {
        let route = Route::builder("single", {
            let slot = std::sync::Mutex::new(Some(single));
            move |_ctx: Context| {
                let single = slot.lock().unwrap().take();
                async move { single.ok_or(PipelineError::handler("called twice")) }
            }
        })
        .build();

        let (client, mut server) = duplex(1024);
        let ctx = Context::builder(Arc::new(route)).body(client).build();
        ctx.route().handler().call(ctx.clone()).await.unwrap();
        let mut body = Vec::new();
        server.read_to_end(&mut body).await.unwrap();
        (ctx, body)
    }

    #[tokio::test]
    async fn test_single_value() {
        let (ctx, body) = run_single(Single::new(async {
            Ok::<_, PipelineError>(Some("one".to_string()))
        }))
        .await;
        assert_eq!(ctx.status(), 200);
        assert_eq!(body, b"one");
    }

    #[tokio::test]
    async fn test_single_empty_is_no_content() {
        let (ctx, body) = run_single(Single::new(async {
            Ok::<Option<String>, PipelineError>(None)
        }))
        .await;
        assert_eq!(ctx.status(), 204);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_single_error() {
        let (ctx, body) = run_single(Single::new(async {
            Err::<Option<String>, _>(PipelineError::status(503, "later"))
        }))
        .await;
        assert_eq!(ctx.status(), 503);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["reason"], "Service Unavailable");
    }
}
