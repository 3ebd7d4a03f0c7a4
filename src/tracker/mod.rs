//! Tracker clients: HTTP(S) and UDP announces behind one enum.

mod error;
mod http;
mod peer;
mod request;
mod response;
mod udp;

pub use error::TrackerError;
pub use http::HttpTracker;
pub use request::{AnnounceRequest, TrackerEvent};
pub use response::AnnounceResponse;
pub use udp::UdpTracker;

use rand::Rng;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Announce interval used until a tracker tells us otherwise
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Client tag prepended to every peer id
const CLIENT_TAG: &[u8; 8] = b"-LE0100-";

/// Generate a random peer ID
/// Format: -LE0100-<12 random chars>
pub fn generate_peer_id() -> [u8; 20] {
    let mut peer_id = [0u8; 20];
    peer_id[0..8].copy_from_slice(CLIENT_TAG);

    let mut rng = rand::thread_rng();
    for byte in &mut peer_id[8..] {
        *byte = rng.gen_range(b'0'..=b'z');
    }

    peer_id
}

/// A tracker reachable over one of the supported schemes
pub enum Tracker {
    Udp(UdpTracker),
    Http(HttpTracker),
}

impl Tracker {
    /// Pick the client by URL scheme.
    pub fn from_url(raw: &str, udp_timeout: Duration) -> Result<Self, TrackerError> {
        let url = Url::parse(raw).map_err(|_| TrackerError::InvalidUrl(raw.to_string()))?;
        match url.scheme() {
            "udp" => Ok(Tracker::Udp(UdpTracker::new(&url, udp_timeout)?)),
            "http" | "https" => Ok(Tracker::Http(HttpTracker::new(url)?)),
            other => Err(TrackerError::UnsupportedScheme(other.to_string())),
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Tracker::Udp(t) => t.url(),
            Tracker::Http(t) => t.url(),
        }
    }

    pub fn interval(&self) -> Duration {
        match self {
            Tracker::Udp(t) => t.interval(),
            Tracker::Http(t) => t.interval(),
        }
    }

    /// Announce and return the peer addresses, aborting on cancellation.
    pub async fn announce(
        &mut self,
        cancel: &CancellationToken,
        request: &AnnounceRequest,
    ) -> Result<Vec<SocketAddr>, TrackerError> {
        let announce = async {
            match self {
                Tracker::Udp(t) => t.announce(request).await,
                Tracker::Http(t) => t.announce(request).await,
            }
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(TrackerError::Cancelled),
            result = announce => result,
        }
    }

    /// Sleep for the current announce interval.
    pub async fn wait_interval(&self, cancel: &CancellationToken) -> Result<(), TrackerError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(TrackerError::Cancelled),
            _ = tokio::time::sleep(self.interval()) => Ok(()),
        }
    }

    pub fn close(&mut self) {
        if let Tracker::Udp(t) = self {
            t.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_peer_id() {
        let peer_id = generate_peer_id();
        assert_eq!(peer_id.len(), 20);
        assert_eq!(&peer_id[0..8], b"-LE0100-");
        assert!(peer_id[8..].iter().all(|b| (b'0'..=b'z').contains(b)));
    }

    #[test]
    fn test_from_url_scheme() {
        let timeout = Duration::from_millis(500);
        assert!(matches!(
            Tracker::from_url("udp://tracker.example:80/announce", timeout),
            Ok(Tracker::Udp(_))
        ));
        assert!(matches!(
            Tracker::from_url("https://tracker.example/announce", timeout),
            Ok(Tracker::Http(_))
        ));
        assert!(matches!(
            Tracker::from_url("wss://tracker.example/announce", timeout),
            Err(TrackerError::UnsupportedScheme(s)) if s == "wss"
        ));
    }

    #[tokio::test]
    async fn test_wait_interval_cancelled() {
        let tracker = Tracker::from_url("udp://tracker.example:80", Duration::from_millis(500)).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            tracker.wait_interval(&cancel).await,
            Err(TrackerError::Cancelled)
        ));
    }
}
