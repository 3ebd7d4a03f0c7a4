use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Transfer counters shared by every task of one download.
#[derive(Debug)]
pub struct Stats {
    downloaded: AtomicU64,
    uploaded: AtomicU64,
    left: AtomicU64,
    peers: AtomicUsize,
    trackers: AtomicUsize,
    started: Instant,
}

impl Stats {
    pub fn new(left: u64) -> Self {
        Self {
            downloaded: AtomicU64::new(0),
            uploaded: AtomicU64::new(0),
            left: AtomicU64::new(left),
            peers: AtomicUsize::new(0),
            trackers: AtomicUsize::new(0),
            started: Instant::now(),
        }
    }

    pub fn add_downloaded(&self, bytes: u64) {
        self.downloaded.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Bytes received from peers, including pieces later found corrupt
    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    pub fn uploaded(&self) -> u64 {
        self.uploaded.load(Ordering::Relaxed)
    }

    pub fn sub_left(&self, bytes: u64) {
        let _ = self
            .left
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |left| {
                Some(left.saturating_sub(bytes))
            });
    }

    /// Bytes of verified pieces still missing
    pub fn left(&self) -> u64 {
        self.left.load(Ordering::Relaxed)
    }

    pub fn peer_connected(&self) {
        self.peers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn peer_disconnected(&self) {
        self.peers.fetch_sub(1, Ordering::Relaxed);
    }

    /// Sessions past the handshake
    pub fn peers(&self) -> usize {
        self.peers.load(Ordering::Relaxed)
    }

    pub fn tracker_started(&self) {
        self.trackers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tracker_stopped(&self) {
        self.trackers.fetch_sub(1, Ordering::Relaxed);
    }

    /// Tracker tasks still announcing
    pub fn trackers(&self) -> usize {
        self.trackers.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Average download rate in bytes per second
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.downloaded() as f64 / secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_left_saturates() {
        let stats = Stats::new(10);
        stats.sub_left(4);
        assert_eq!(stats.left(), 6);
        stats.sub_left(100);
        assert_eq!(stats.left(), 0);
    }

    #[test]
    fn test_counters() {
        let stats = Stats::new(0);
        stats.add_downloaded(3);
        stats.add_downloaded(4);
        stats.peer_connected();
        stats.peer_connected();
        stats.peer_disconnected();
        stats.tracker_started();
        stats.tracker_started();
        stats.tracker_stopped();
        assert_eq!(stats.downloaded(), 7);
        assert_eq!(stats.uploaded(), 0);
        assert_eq!(stats.peers(), 1);
        assert_eq!(stats.trackers(), 1);
    }
}
