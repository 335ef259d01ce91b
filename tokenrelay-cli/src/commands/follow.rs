use std::{
    io::{self, Write},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use clap::Args;
use cli::{
    CursorStore, FileCursorStore, HttpTransport, ReconnectPolicy, ResumableConsumer,
    ResumeOutcome,
};
use tokio::signal;
use tracing::warn;

#[derive(Args, Debug)]
pub struct FollowArgs {
    /// Thread whose stream to follow
    #[arg(long)]
    pub thread: String,

    /// Server base URL
    #[arg(long, default_value = "http://localhost:8080")]
    pub server: String,

    /// Where resume cursors are kept; defaults to the user config directory
    #[arg(long)]
    pub cursor_dir: Option<PathBuf>,

    /// Pause before reconnecting after a dropped connection
    #[arg(long, default_value_t = 1000)]
    pub retry_delay_ms: u64,

    /// Consecutive failed reconnects before giving up
    #[arg(long, default_value_t = 5)]
    pub max_reconnects: u32,

    /// Ignore any saved progress and read from the start
    #[arg(long)]
    pub fresh: bool,
}

fn print_flush(text: &str) {
    let mut stdout = io::stdout();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

/// Streams the thread to stdout. Saved progress is printed first, so the output
/// is always the whole text. Ctrl+C stops reading and cancels the producer.
pub async fn handle_follow(args: FollowArgs) -> Result<()> {
    let transport = Arc::new(
        HttpTransport::new(&args.server)
            .with_context(|| format!("invalid server URL {}", args.server))?,
    );
    let store = match args.cursor_dir {
        Some(dir) => FileCursorStore::new(dir),
        None => FileCursorStore::in_default_dir()?,
    };
    if args.fresh {
        store.remove(&args.thread)?;
    }

    let mut consumer = ResumableConsumer::new(transport, store, args.thread.as_str())?
        .with_reconnect_policy(ReconnectPolicy {
            delay: Duration::from_millis(args.retry_delay_ms),
            max_attempts: args.max_reconnects,
        });
    print_flush(consumer.text());

    let canceller = consumer.canceller();
    let interrupt = tokio::spawn(async move {
        signal::ctrl_c().await.ok()?;
        Some(canceller.cancel())
    });

    let outcome = consumer
        .resume(|update| print_flush(update.delta))
        .await;
    if !consumer.text().is_empty() && !consumer.text().ends_with('\n') {
        print_flush("\n");
    }

    match outcome.context("following stream failed")? {
        ResumeOutcome::Completed(_) => {
            interrupt.abort();
            Ok(())
        }
        ResumeOutcome::NotFound => {
            interrupt.abort();
            bail!("no stream for thread {}", args.thread)
        }
        ResumeOutcome::Cancelled => {
            if let Ok(Some(request)) = interrupt.await {
                match request.await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => warn!(error = %err, "server did not accept the cancel"),
                    Err(err) => warn!(error = %err, "cancel request aborted"),
                }
            }
            eprintln!(
                "stopped at offset {}; run again to resume",
                consumer.offset()
            );
            Ok(())
        }
    }
}
