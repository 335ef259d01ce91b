use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Args;
use cli::{HttpTransport, Probe, StreamTransport};

#[derive(Args, Debug)]
pub struct ControlArgs {
    /// Thread whose stream to address
    #[arg(long)]
    pub thread: String,

    /// Server base URL
    #[arg(long, default_value = "http://localhost:8080")]
    pub server: String,
}

fn transport(server: &str) -> Result<Arc<HttpTransport>> {
    HttpTransport::new(server)
        .map(Arc::new)
        .with_context(|| format!("invalid server URL {server}"))
}

/// Prints whether the thread has a stream. A missing stream is an error so
/// scripts can branch on the exit status.
pub async fn handle_probe(args: ControlArgs) -> Result<()> {
    let transport = transport(&args.server)?;
    match transport.probe(&args.thread).await.context("probe failed")? {
        Probe::Found => {
            println!("stream found for thread {}", args.thread);
            Ok(())
        }
        Probe::NotFound => bail!("no stream for thread {}", args.thread),
    }
}

pub async fn handle_cancel(args: ControlArgs) -> Result<()> {
    let transport = transport(&args.server)?;
    transport
        .cancel(&args.thread)
        .await
        .context("cancel request failed")?;
    println!("cancel requested for thread {}", args.thread);
    Ok(())
}
