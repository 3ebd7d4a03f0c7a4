//! Download manager: wires trackers, peer sessions and the writer together.

mod pool;
mod stats;

pub use pool::PeerPool;
pub use stats::Stats;

use crate::error::{BittorrentError, Result};
use crate::peer::{PeerContext, PeerSession};
use crate::piece::{Lengths, PieceManager, Scheduler};
use crate::storage::{FileLayout, PieceWriter};
use crate::torrent::Metainfo;
use crate::tracker::{generate_peer_id, AnnounceRequest, Tracker, TrackerError, TrackerEvent};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Announce attempts per cycle before a tracker is skipped until the next interval
const ANNOUNCE_ATTEMPTS: u32 = 5;

/// Blocks buffered between peer sessions and the writer
const BLOCK_CHANNEL_CAPACITY: usize = 256;

/// How often the progress line is logged
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Time tasks get to wind down after cancellation
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Deadline for the `completed` or `stopped` announce sent on the way out
const FINAL_ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for the BitTorrent client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub download_dir: PathBuf,
    /// Port reported to trackers; nothing listens on it
    pub listen_port: u16,
    /// Cap on simultaneous peer sessions
    pub max_peers: usize,
    /// Deadline for each peer read or write
    pub peer_timeout: Duration,
    pub connect_timeout: Duration,
    /// Deadline for each UDP tracker read or write
    pub tracker_timeout: Duration,
    /// Block requests kept in flight per peer
    pub pipeline_depth: usize,
    pub show_progress: bool,
    /// Give up when no peer session is alive for this long
    pub no_peer_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("./downloads"),
            listen_port: 6666,
            max_peers: 30,
            peer_timeout: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(2),
            tracker_timeout: Duration::from_millis(500),
            pipeline_depth: 5,
            show_progress: true,
            no_peer_timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// Handles every peer task needs to join the swarm and spawn replacements.
#[derive(Clone)]
struct Swarm {
    ctx: Arc<PeerContext>,
    pool: Arc<PeerPool>,
    tasks: TaskTracker,
    cancel: CancellationToken,
    connect_timeout: Duration,
    peer_timeout: Duration,
}

impl Swarm {
    fn add_peers(&self, addrs: Vec<SocketAddr>) {
        let mut started = 0;
        for addr in addrs {
            if self.pool.offer(addr) {
                self.spawn_session(addr);
                started += 1;
            }
        }
        debug!(
            "Started {} new peer sessions ({} active, {} waiting)",
            started,
            self.pool.len(),
            self.pool.backlog_len()
        );
    }

    /// One task per pool slot; when a session ends the task dials the next
    /// waiting address.
    fn spawn_session(&self, addr: SocketAddr) {
        let swarm = self.clone();
        self.tasks.spawn(async move {
            let mut next = Some(addr);
            while let Some(addr) = next {
                swarm.run_session(addr).await;
                if swarm.cancel.is_cancelled() {
                    swarm.pool.remove(addr);
                    break;
                }
                next = swarm.pool.release(addr);
            }
        });
    }

    async fn run_session(&self, addr: SocketAddr) {
        let connect = PeerSession::connect(addr, self.ctx.clone(), self.connect_timeout, self.peer_timeout);
        let session = tokio::select! {
            _ = self.cancel.cancelled() => return,
            session = connect => session,
        };

        let session = match session {
            Ok(session) => session,
            Err(e) => {
                debug!("Could not connect to {}: {}", addr, e);
                return;
            }
        };

        self.ctx.stats.peer_connected();
        if let Err(e) = session.run(self.cancel.clone()).await {
            debug!("Peer {} dropped: {}", addr, e);
        }
        self.ctx.stats.peer_disconnected();
    }
}

/// Main BitTorrent client
pub struct TorrentClient {
    config: ClientConfig,
    peer_id: [u8; 20],
}

impl TorrentClient {
    pub fn new(config: ClientConfig) -> Self {
        let peer_id = generate_peer_id();
        info!("Client initialized with peer_id: {}", hex::encode(peer_id));

        Self { config, peer_id }
    }

    pub fn peer_id(&self) -> [u8; 20] {
        self.peer_id
    }

    /// Download a torrent file into the configured directory.
    ///
    /// Returns `Cancelled` when `shutdown` fires before the download completes.
    pub async fn download(&self, torrent_path: &Path, shutdown: CancellationToken) -> Result<()> {
        info!("Starting download for: {}", torrent_path.display());
        let metainfo = crate::torrent::load_torrent_file(torrent_path).await?;
        self.download_metainfo(&metainfo, shutdown).await
    }

    pub async fn download_metainfo(&self, metainfo: &Metainfo, shutdown: CancellationToken) -> Result<()> {
        let info = &metainfo.info;
        info!("Torrent: {}", info.name);
        info!("Total size: {} bytes", info.total_length);
        info!("Pieces: {}", info.pieces.len());
        info!("Info hash: {}", metainfo.info_hash_hex());

        let mut trackers = Vec::new();
        for url in metainfo.trackers() {
            match Tracker::from_url(&url, self.config.tracker_timeout) {
                Ok(tracker) => trackers.push(tracker),
                Err(e) => warn!("Skipping tracker {}: {}", url, e),
            }
        }
        if trackers.is_empty() {
            return Err(BittorrentError::NoTrackers);
        }

        let lengths = Lengths::from_info(info);
        let scheduler = Arc::new(Scheduler::new(lengths.piece_count() as usize));
        let stats = Arc::new(Stats::new(info.total_length));
        let mut layout = FileLayout::new(&self.config.download_dir, info)?;

        if scheduler.is_complete() {
            layout.sync_all().await?;
            info!("Nothing to download");
            return Ok(());
        }

        // Completion, a writer failure, the watchdog and `shutdown` all end the download.
        let download = shutdown.child_token();
        // Stopped separately so the writer outlives the peer sessions feeding it.
        let writer_stop = CancellationToken::new();

        let (blocks_tx, blocks_rx) = mpsc::channel(BLOCK_CHANNEL_CAPACITY);
        let writer = PieceWriter::new(
            layout,
            PieceManager::new(lengths, info.pieces.clone()),
            scheduler.clone(),
            stats.clone(),
        );
        let writer = tokio::spawn(writer.run(blocks_rx, download.clone(), writer_stop.clone()));

        let tasks = TaskTracker::new();
        let swarm = Swarm {
            ctx: Arc::new(PeerContext {
                info_hash: metainfo.info_hash,
                peer_id: self.peer_id,
                lengths,
                scheduler: scheduler.clone(),
                stats: stats.clone(),
                blocks: blocks_tx,
                pipeline_depth: self.config.pipeline_depth.max(1),
            }),
            pool: Arc::new(PeerPool::new(self.config.max_peers.max(1))),
            tasks: tasks.clone(),
            cancel: download.clone(),
            connect_timeout: self.config.connect_timeout,
            peer_timeout: self.config.peer_timeout,
        };

        info!("Announcing to {} trackers", trackers.len());
        for tracker in trackers {
            tasks.spawn(announce_loop(tracker, swarm.clone(), self.config.listen_port));
        }
        if self.config.show_progress {
            tasks.spawn(report_progress(stats.clone(), scheduler.clone(), download.clone()));
        }
        let watchdog = tokio::spawn(watch_peers(
            stats.clone(),
            download.clone(),
            self.config.no_peer_timeout,
        ));
        drop(swarm);

        download.cancelled().await;
        debug!("Download finished, stopping tasks");

        tasks.close();
        if tokio::time::timeout(SHUTDOWN_GRACE, tasks.wait()).await.is_err() {
            warn!("{} tasks still running after shutdown grace period", tasks.len());
        }
        writer_stop.cancel();

        let written = writer
            .await
            .map_err(|e| BittorrentError::Storage(format!("writer task failed: {e}")))?;
        let starved = watchdog.await.unwrap_or(false);
        written?;

        if scheduler.is_complete() {
            info!(
                "Download complete: {} bytes in {:.1}s",
                info.total_length,
                stats.elapsed().as_secs_f64()
            );
            Ok(())
        } else if starved {
            Err(BittorrentError::NoPeers(self.config.no_peer_timeout.as_secs()))
        } else {
            Err(BittorrentError::Cancelled)
        }
    }
}

fn announce_request(swarm: &Swarm, port: u16, event: Option<TrackerEvent>) -> AnnounceRequest {
    let stats = &swarm.ctx.stats;
    let mut request = AnnounceRequest::new(swarm.ctx.info_hash, swarm.ctx.peer_id, port, stats.left());
    request.uploaded = stats.uploaded();
    request.downloaded = stats.downloaded();
    request.event = event;
    request
}

/// Announce, hand the peers to the swarm, sleep the interval, repeat.
async fn announce_loop(mut tracker: Tracker, swarm: Swarm, port: u16) {
    let stats = swarm.ctx.stats.clone();
    let mut event = Some(TrackerEvent::Started);
    stats.tracker_started();

    loop {
        let request = announce_request(&swarm, port, event);

        match announce_with_retry(&mut tracker, &swarm.cancel, &request).await {
            Ok(peers) => {
                event = None;
                swarm.add_peers(peers);
            }
            Err(TrackerError::Cancelled) => break,
            Err(e) => warn!("Tracker {} failed: {}", tracker.url(), e),
        }

        if tracker.wait_interval(&swarm.cancel).await.is_err() {
            break;
        }
    }

    // Only trackers that acknowledged `started` hear how the download ended.
    if event.is_none() {
        let last = if stats.left() == 0 {
            TrackerEvent::Completed
        } else {
            TrackerEvent::Stopped
        };
        let request = announce_request(&swarm, port, Some(last));
        let cancel = CancellationToken::new();
        let announce = tracker.announce(&cancel, &request);
        match tokio::time::timeout(FINAL_ANNOUNCE_TIMEOUT, announce).await {
            Ok(Ok(_)) => debug!("Sent {} to {}", last.as_str(), tracker.url()),
            Ok(Err(e)) => debug!("Final announce to {} failed: {}", tracker.url(), e),
            Err(_) => debug!("Final announce to {} timed out", tracker.url()),
        }
    }

    tracker.close();
    stats.tracker_stopped();
    debug!("Tracker task for {} stopped", tracker.url());
}

async fn announce_with_retry(
    tracker: &mut Tracker,
    cancel: &CancellationToken,
    request: &AnnounceRequest,
) -> std::result::Result<Vec<SocketAddr>, TrackerError> {
    let mut backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_secs(1))
        .with_max_interval(Duration::from_secs(30))
        .with_max_elapsed_time(None)
        .build();

    let mut attempt = 1;
    loop {
        match tracker.announce(cancel, request).await {
            Ok(peers) => return Ok(peers),
            Err(TrackerError::Cancelled) => return Err(TrackerError::Cancelled),
            Err(e) if attempt >= ANNOUNCE_ATTEMPTS => return Err(e),
            Err(e) => {
                let delay = backoff.next_backoff().unwrap_or(Duration::from_secs(30));
                debug!(
                    "Announce to {} failed (attempt {}/{}): {}; retrying in {:?}",
                    tracker.url(),
                    attempt,
                    ANNOUNCE_ATTEMPTS,
                    e,
                    delay
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(TrackerError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

async fn report_progress(stats: Arc<Stats>, scheduler: Arc<Scheduler>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        info!(
            "Progress: {}/{} pieces, {} bytes left, {} peers, {} trackers, {:.1} KiB/s",
            scheduler.downloaded_count(),
            scheduler.piece_count(),
            stats.left(),
            stats.peers(),
            stats.trackers(),
            stats.rate() / 1024.0
        );
    }
}

/// Cancel the download when no session has been alive for `limit`.
/// Returns whether it fired.
async fn watch_peers(stats: Arc<Stats>, cancel: CancellationToken, limit: Duration) -> bool {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut last_seen = Instant::now();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = ticker.tick() => {}
        }
        if stats.peers() > 0 {
            last_seen = Instant::now();
        } else if last_seen.elapsed() >= limit {
            error!("No peers for {}s, giving up", limit.as_secs());
            cancel.cancel();
            return true;
        }
    }
}
