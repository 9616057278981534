//! Stream demo - a route that returns a stream of records.
//!
//! This example demonstrates:
//! - Returning `Chunked::json` from a handler
//! - JSON array framing on the wire (`[`, `,`, `]`)
//! - One item in flight at a time: the producer is only polled after the
//!   previous chunk was flushed
//!
//! Run with `RUST_LOG=sendwire=debug cargo run --example stream`.

use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use sendwire::{Chunked, Context, Router};
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

/// One record of the stream.
#[derive(Serialize, Debug)]
struct Record {
    index: usize,
    data: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let router = Router::builder()
        .route("generate", |_ctx: Context| async {
            let records = futures::stream::iter(0..5).then(|index| async move {
                // Simulate some work per record
                tokio::time::sleep(Duration::from_millis(10)).await;
                Record {
                    index,
                    data: format!("Chunk {}", index),
                }
            });
            Ok(Chunked::json(records))
        })
        .build();

    let (client, mut server) = tokio::io::duplex(4096);
    let ctx = router.serve("generate", client).await?;

    let mut body = String::new();
    server.read_to_string(&mut body).await?;

    println!("status: {}", ctx.status());
    println!("content-type: {}", ctx.response_type());
    println!("{}", body);
    Ok(())
}
