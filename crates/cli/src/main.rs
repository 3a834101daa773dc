mod logging;

use anyhow::Result;
use broker::{Broker, MemoryBroker};
use clap::{Parser, Subcommand};
use client::{Client, Reply};
use serde_json::json;
use service::{Responder, Service, ServiceConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use wire::Request;

#[derive(Parser)]
#[command(name = "courier", about = "Broker-mediated request/reply RPC", version)]
struct Cli {
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Wire an echo service and a caller through an in-process broker and
  /// exercise request/reply, progress streaming and broadcast.
  Demo {
    /// Handler invocations the service may run simultaneously
    #[arg(long, default_value_t = 4)]
    concurrency: usize,
    /// Number of echo calls to issue
    #[arg(long, default_value_t = 8)]
    calls: usize,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  logging::init();
  let cli = Cli::parse();
  match cli.command {
    Command::Demo { concurrency, calls } => demo(concurrency, calls).await,
  }
}

async fn demo(concurrency: usize, calls: usize) -> Result<()> {
  let broker = Arc::new(MemoryBroker::new());

  let mut service = Service::with_config(
    "demo",
    Arc::clone(&broker) as Arc<dyn Broker>,
    ServiceConfig {
      concurrency,
      ..Default::default()
    },
  );
  service.register_fn("echo", |request: Request, responder: Responder| async move {
    responder.done(request.data).await;
    Ok(())
  })?;
  service.register_fn("countdown", |request: Request, responder: Responder| async move {
    let from = request.data.as_u64().unwrap_or(3);
    for n in (1..=from).rev() {
      responder.progress(json!(n)).await;
      tokio::time::sleep(Duration::from_millis(50)).await;
    }
    responder.done(json!("liftoff")).await;
    Ok(())
  })?;
  let handle = service.start();

  let client = Client::new("demo", Arc::clone(&broker) as Arc<dyn Broker>).await?;

  for i in 0..calls {
    let result = client
      .request("echo", json!({ "call": i }))
      .send()
      .await?
      .result()
      .await?;
    info!(call = i, %result, "echo answered");
  }

  let mut pending = client
    .request("countdown", json!(3))
    .timeout_ms(5000)?
    .send()
    .await?;
  while let Some(reply) = pending.recv().await {
    match reply {
      Reply::Progress { data } => info!(%data, "countdown"),
      Reply::Succeeded { data } => {
        info!(%data, "countdown finished");
        break;
      }
      other => anyhow::bail!("unexpected reply: {:?}", other),
    }
  }

  let reached = client.request("echo", json!("to everyone")).broadcast().await?;
  info!(reached, "broadcast fanned out");

  client.shutdown();
  handle.shutdown();
  handle.wait().await;
  Ok(())
}
