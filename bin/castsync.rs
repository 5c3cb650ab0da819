use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use jemallocator::Jemalloc;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use castsync::{AvatarLedger, Database, Settings, SyncDriver, SyncEvent, SyncOptions};

/// Reconcile avatar NFT ownership and metadata from the contract into
/// PostgreSQL. Emits one JSON event per line on stdout; the last line is
/// always a `complete` or `error` event.
#[derive(Parser, Debug)]
#[command(name = "castsync")]
struct Args {
    /// Tokens to process this invocation (0 = config default, capped at 500)
    #[arg(long, default_value_t = 0)]
    batch_size: u64,

    /// First token id to process (0 = resume from the stored checkpoint)
    #[arg(long, default_value_t = 0)]
    start_token_id: u64,

    /// Cool-down in milliseconds before signaling when more work remains
    #[arg(long)]
    batch_delay_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .unwrap();

    let args = Args::parse();

    // Load configuration
    let settings =
        Settings::new().context("Failed to load config.yaml. Please ensure it exists and is valid")?;

    let cancellation_token = CancellationToken::new();

    let db = Database::new(&settings)
        .await
        .context("Failed to initialize database connection")?;

    let ledger = AvatarLedger::new(&settings.ledger, cancellation_token.child_token())
        .context("Failed to create ledger reader")?;

    let options = SyncOptions {
        batch_size: if args.batch_size > 0 {
            args.batch_size
        } else {
            settings.sync.batch_size
        },
        start_token_id: args.start_token_id,
        batch_delay_ms: args.batch_delay_ms.unwrap_or(settings.sync.batch_delay_ms),
        lease_ttl: Duration::from_secs(settings.sync.lease_ttl_secs),
    };

    let (event_tx, event_rx) = mpsc::channel::<SyncEvent>(128);

    let store = db.postgres.as_ref().clone();
    let driver = SyncDriver::new(ledger, store, event_tx, options);

    let driver_token = cancellation_token.child_token();
    let driver_handle = tokio::spawn(async move {
        if let Err(e) = driver.run(driver_token).await {
            error!("Avatar sync failed: {:#}", e);
        }
    });

    stream_events(event_rx, cancellation_token).await?;

    let _ = driver_handle.await;
    Ok(())
}

/// Print events as NDJSON until the terminal event (or channel close).
/// A shutdown signal cancels the driver; it checkpoints what it finished and
/// still emits its terminal event before we leave.
async fn stream_events(
    mut event_rx: mpsc::Receiver<SyncEvent>,
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?
    };

    loop {
        #[cfg(unix)]
        let event = tokio::select! {
            event = event_rx.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), finishing current token...");
                cancellation_token.cancel();
                continue;
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, finishing current token...");
                cancellation_token.cancel();
                continue;
            },
        };

        #[cfg(not(unix))]
        let event = tokio::select! {
            event = event_rx.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), finishing current token...");
                cancellation_token.cancel();
                continue;
            },
        };

        match event {
            Some(event) => {
                println!("{}", serde_json::to_string(&event)?);
                if event.is_terminal() {
                    break;
                }
            },
            None => break,
        }
    }

    Ok(())
}
