//! Moving execution off the I/O task.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

use super::{fail, finish};
use crate::error::PipelineError;
use crate::handler::{BoxFuture, Context, Decorator, Handler, HandlerResult};

/// Something that runs detached tasks.
pub trait Executor: Send + Sync + 'static {
    fn execute(&self, task: BoxFuture<'static, ()>);
}

impl Executor for Handle {
    fn execute(&self, task: BoxFuture<'static, ()>) {
        self.spawn(task);
    }
}

/// Runs tasks on a runtime with a cap on how many run at once.
///
/// Tasks past the cap wait for a slot inside their spawned task, so
/// `execute` never blocks.
#[derive(Clone)]
pub struct BoundedExecutor {
    handle: Handle,
    permits: Arc<Semaphore>,
}

impl BoundedExecutor {
    pub fn new(handle: Handle, max_tasks: usize) -> Self {
        Self {
            handle,
            permits: Arc::new(Semaphore::new(max_tasks.max(1))),
        }
    }

    /// Bounded executor on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current(max_tasks: usize) -> Self {
        Self::new(Handle::current(), max_tasks)
    }

    /// Free slots.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

impl Executor for BoundedExecutor {
    fn execute(&self, task: BoxFuture<'static, ()>) {
        let permits = self.permits.clone();
        self.handle.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            task.await;
        });
    }
}

/// Run `next` to completion as a detached task.
///
/// Failures and panics that escape `next` go to the error path.
pub(crate) async fn run_detached(next: Arc<dyn Handler>, ctx: Context) {
    let outcome = AssertUnwindSafe(async { next.call(ctx.clone()).await })
        .catch_unwind()
        .await;
    match outcome {
        Ok(Ok(reply)) => {
            finish(&ctx, reply).await;
        }
        Ok(Err(e)) => fail(&ctx, e).await,
        Err(panic) => fail(&ctx, PipelineError::from_panic(panic)).await,
    }
}

/// Runs the wrapped chain on an [`Executor`] and returns immediately.
pub struct DispatchHandler {
    executor: Arc<dyn Executor>,
    next: Arc<dyn Handler>,
}

impl DispatchHandler {
    pub fn new(executor: Arc<dyn Executor>, next: Arc<dyn Handler>) -> Self {
        Self { executor, next }
    }
}

impl Handler for DispatchHandler {
    fn call(&self, ctx: Context) -> BoxFuture<'static, HandlerResult> {
        let reply = ctx.dispatch(
            self.executor.as_ref(),
            run_detached(self.next.clone(), ctx.clone()),
        );
        Box::pin(async move { Ok(reply) })
    }
}

/// Marks a route as blocking, so the router runs it on its worker
/// executor. The chain itself is left unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerMarker;

impl Decorator for WorkerMarker {
    fn apply(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler> {
        next
    }

    fn name(&self) -> &'static str {
        "worker"
    }

    fn non_blocking(&self) -> Option<bool> {
        Some(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{Reply, Route};
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt};

    #[tokio::test]
    async fn test_dispatch_returns_detached_and_completes() {
        let route = Route::builder("slow", |_ctx: Context| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok("done")
        })
        .dispatch(Arc::new(Handle::current()))
        .build();
        let (client, mut server) = duplex(1024);
        let ctx = Context::builder(Arc::new(route)).body(client).build();

        let reply = ctx.route().handler().call(ctx.clone()).await.unwrap();
        assert!(matches!(reply, Reply::Detached));
        assert!(ctx.is_detached());

        let mut body = Vec::new();
        server.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"done");
    }

    #[tokio::test]
    async fn test_dispatched_panic_is_reported() {
        let route = Route::builder("panics", |_ctx: Context| async {
            if true {
                panic!("worker blew up");
            }
            Ok("never")
        })
        .dispatch(Arc::new(BoundedExecutor::current(2)))
        .build();
        let (client, mut server) = duplex(1024);
        let ctx = Context::builder(Arc::new(route)).body(client).build();

        ctx.route().handler().call(ctx.clone()).await.unwrap();

        let mut body = Vec::new();
        server.read_to_end(&mut body).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["status"], 500);
        assert_eq!(ctx.status(), 500);
    }

    #[tokio::test]
    async fn test_bounded_executor_limits_concurrency() {
        let executor = BoundedExecutor::current(1);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let gate = Arc::new(tokio::sync::Notify::new());

        for i in 0..2 {
            let tx = tx.clone();
            let gate = gate.clone();
            executor.execute(Box::pin(async move {
                tx.send(("start", i)).unwrap();
                gate.notified().await;
                tx.send(("end", i)).unwrap();
            }));
        }

        let first = rx.recv().await.unwrap();
        assert_eq!(first.0, "start");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err(), "second task started early");
        assert_eq!(executor.available(), 0);

        gate.notify_one();
        assert_eq!(rx.recv().await.unwrap(), ("end", first.1));
        assert_eq!(rx.recv().await.unwrap().0, "start");
        gate.notify_one();
        assert_eq!(rx.recv().await.unwrap().0, "end");
    }
}
