mod bencode;
mod cli;
mod client;
mod error;
mod net;
mod peer;
mod piece;
mod storage;
mod torrent;
mod tracker;

use anyhow::{Context, Result};
use cli::Cli;
use error::BittorrentError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    cli.init_logging();

    let shutdown = CancellationToken::new();
    let signals = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_signal().await {
            warn!("Signal handling unavailable: {:#}", e);
            return;
        }
        info!("Shutdown requested");
        signals.cancel();
    });

    let code = match cli.run(shutdown).await {
        Ok(()) => 0,
        Err(BittorrentError::Cancelled) => BittorrentError::Cancelled.exit_code(),
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

/// Resolve on Ctrl-C or, on Unix, SIGTERM.
async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("listening for Ctrl-C")?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await.context("listening for Ctrl-C")?;
    Ok(())
}
