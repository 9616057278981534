//! Echo demo - one router, several result shapes.
//!
//! This example demonstrates:
//! - Text and byte results sent in a single write
//! - A serializable value rendered with the route's encoder
//! - A deferred result, and what its failure looks like
//! - A custom error handler

use serde::Serialize;
use sendwire::codec::MsgPackEncoder;
use sendwire::{Context, Deferred, Failure, Json, PipelineError, Route, Router};
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

#[derive(Serialize)]
struct Greeting {
    message: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let router = Router::builder()
        .route("echo", |ctx: Context| async move {
            let name = ctx.request_header("x-name").unwrap_or("world").to_string();
            Ok(format!("hello, {}", name))
        })
        .route("greet", |_ctx: Context| async {
            Ok(Json(Greeting {
                message: "hi".into(),
            }))
        })
        .route_with(
            Route::builder("greet-msgpack", |_ctx: Context| async {
                Ok(Json(Greeting {
                    message: "hi".into(),
                }))
            })
            .encoder(MsgPackEncoder),
        )
        .route("later", |_ctx: Context| async {
            Ok(Deferred::new(async {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                Ok::<_, PipelineError>("computed later")
            }))
        })
        .route("broken", |_ctx: Context| async {
            Ok(Deferred::new(async {
                Err::<String, _>(PipelineError::completion(PipelineError::status(
                    409,
                    "already exists",
                )))
            }))
        })
        .error_handler(|ctx: Context, failure: Failure| async move {
            tracing::warn!("{} failed: {}", ctx.route_name(), failure);
            ctx.set_status(failure.status_code());
            let _ = ctx.send_text(failure.error().to_string()).await;
        })
        .build();

    for name in router.route_names() {
        let (client, mut server) = tokio::io::duplex(4096);
        let ctx = router
            .context(name, client)?
            .header("X-Name", "sendwire")
            .build();
        router.handle(ctx.clone()).await;

        let mut body = Vec::new();
        server.read_to_end(&mut body).await?;
        println!(
            "{:<14} {} {:<22} {:?}",
            name,
            ctx.status(),
            ctx.response_type(),
            String::from_utf8_lossy(&body)
        );
    }
    Ok(())
}
