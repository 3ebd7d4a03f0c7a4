mod logging;

use logging::{LogFormat, LogLevel};

use crate::client::{ClientConfig, TorrentClient};
use crate::error::{BittorrentError, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "leech")]
#[command(about = "A leeching BitTorrent client", long_about = None)]
pub struct Cli {
    /// Minimum level of log lines to print
    #[arg(long, global = true, value_enum, default_value = "info")]
    log_level: LogLevel,

    /// How log lines are rendered
    #[arg(long, global = true, value_enum, default_value = "color")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pretty-print the metainfo of a .torrent file
    Bencode {
        /// Path to the .torrent file
        file: PathBuf,
    },

    /// Download a torrent
    Download {
        /// Existing directory to download into
        #[arg(short, long)]
        out: PathBuf,

        /// Maximum number of peers to connect to
        #[arg(short = 'n', long = "num-peer", default_value_t = 30)]
        num_peer: usize,

        /// Port reported to trackers
        #[arg(short, long, default_value_t = 6666)]
        port: u16,

        /// Path to the .torrent file
        torrent_file: PathBuf,
    },

    /// Print version, commit and build date
    Version,
}

/// Version line: semantic version, commit and build date.
pub fn version_string() -> String {
    format!(
        "leech {} (commit {}, built {})",
        env!("CARGO_PKG_VERSION"),
        option_env!("LEECH_COMMIT").unwrap_or("unknown"),
        option_env!("LEECH_BUILD_DATE").unwrap_or("unknown"),
    )
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn init_logging(&self) {
        logging::setup(self.log_level, self.log_format);
    }

    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        match &self.command {
            Commands::Bencode { file } => {
                let metainfo = crate::torrent::load_torrent_file(file).await?;
                print!("{}", metainfo);
            }

            Commands::Download {
                out,
                num_peer,
                port,
                torrent_file,
            } => {
                if !out.is_dir() {
                    return Err(BittorrentError::InvalidArgument(format!(
                        "output directory {} does not exist",
                        out.display()
                    )));
                }

                let config = ClientConfig {
                    download_dir: out.clone(),
                    listen_port: *port,
                    max_peers: *num_peer,
                    ..ClientConfig::default()
                };

                let client = TorrentClient::new(config);
                client.download(torrent_file, shutdown).await?;
            }

            Commands::Version => println!("{}", version_string()),
        }

        Ok(())
    }
}
