//! Events demo - server-sent events through a connection upgrade.
//!
//! This example demonstrates:
//! - Registering an SSE endpoint with `RouterBuilder::sse`
//! - Taking the upgrade from the context, as a transport would
//! - Writing `ServerSentMessage`s through the response sender

use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use sendwire::codec::JsonEncoder;
use sendwire::pipeline::ServerSentMessage;
use sendwire::{Context, Payload, Router};
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

/// Progress event data.
#[derive(Serialize, Debug)]
struct Progress {
    percent: u32,
}

async fn progress(ctx: Context) {
    let sender = ctx.response_sender();
    for (i, percent) in [0u32, 50, 100].into_iter().enumerate() {
        let data = match Payload::data(&Progress { percent }) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!("Failed to encode event: {}", e);
                break;
            }
        };
        let message = ServerSentMessage::new(data)
            .id(i.to_string())
            .event("progress");
        let sent = match message.to_bytes(&JsonEncoder) {
            Ok(bytes) => sender.write(bytes).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            tracing::error!("Failed to send event: {}", e);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let _ = sender.write(Bytes::from_static(b": done\n\n")).await;
    let _ = sender.close().await;
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let router = Router::builder().sse("progress", progress).build();

    let (client, mut server) = tokio::io::duplex(4096);
    let ctx = router.serve("progress", client).await?;

    println!("content-type: {}", ctx.response_type());
    for (name, value) in ctx.response_headers() {
        println!("{}: {}", name, value);
    }

    if let Some(upgrade) = ctx.take_upgrade() {
        upgrade.run(ctx.clone()).await;
    }

    let mut body = String::new();
    server.read_to_string(&mut body).await?;
    print!("{}", body);
    Ok(())
}
