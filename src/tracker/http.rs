use super::{AnnounceRequest, AnnounceResponse, TrackerError, DEFAULT_INTERVAL};
use reqwest::{Client, Url};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info};

/// Overall deadline for one HTTP announce
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// HTTP(S) tracker client
pub struct HttpTracker {
    url: Url,
    client: Client,
    interval: Duration,
    tracker_id: Option<String>,
}

impl HttpTracker {
    pub fn new(url: Url) -> Result<Self, TrackerError> {
        let client = Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            url,
            client,
            interval: DEFAULT_INTERVAL,
            tracker_id: None,
        })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Announce URL with our parameters appended after any the tracker URL already carries
    fn announce_url(&self, request: &AnnounceRequest) -> Url {
        let ours = request.to_query_string(self.tracker_id.as_deref());
        let query = match self.url.query() {
            Some(existing) if !existing.is_empty() => format!("{existing}&{ours}"),
            _ => ours,
        };
        let mut url = self.url.clone();
        url.set_query(Some(&query));
        url
    }

    /// Send an announce and return the peers it lists.
    pub async fn announce(&mut self, request: &AnnounceRequest) -> Result<Vec<SocketAddr>, TrackerError> {
        let url = self.announce_url(request);
        debug!("Tracker request URL: {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        debug!("Tracker response status: {}, body length: {}", status, body.len());

        if !status.is_success() {
            return Err(TrackerError::HttpStatus(status.as_u16()));
        }

        let announce = AnnounceResponse::from_bytes(&body)?;

        let interval = announce.interval.map(Duration::from_secs);
        let min_interval = announce.min_interval.map(Duration::from_secs);
        self.interval = match (interval, min_interval) {
            (Some(i), Some(min)) => i.max(min),
            (Some(i), None) => i,
            (None, Some(min)) => min.max(DEFAULT_INTERVAL),
            (None, None) => DEFAULT_INTERVAL,
        };
        if announce.tracker_id.is_some() {
            self.tracker_id = announce.tracker_id;
        }

        info!(
            "Received {} peers from {} ({} seeders, {} leechers, interval: {}s)",
            announce.peers.len(),
            self.url,
            announce.complete.unwrap_or(0),
            announce.incomplete.unwrap_or(0),
            self.interval.as_secs()
        );

        Ok(announce.peers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn request() -> AnnounceRequest {
        AnnounceRequest::new([0xab; 20], *b"-LE0100-000000000000", 6666, 100)
    }

    /// Serve one canned HTTP response and hand back the request line.
    async fn serve_once(status: &'static str, body: &'static [u8]) -> (Url, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut read = 0;
            while !buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf[read..]).await.unwrap();
                if n == 0 {
                    break;
                }
                read += n;
            }
            let head = format!(
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
            socket.shutdown().await.unwrap();
            let text = String::from_utf8_lossy(&buf[..read]).into_owned();
            text.lines().next().unwrap_or_default().to_string()
        });
        let url = Url::parse(&format!("http://{addr}/announce?passkey=xyz")).unwrap();
        (url, handle)
    }

    #[test]
    fn test_announce_url_keeps_existing_query() {
        let tracker = HttpTracker::new(Url::parse("http://t.example/a?passkey=1").unwrap()).unwrap();
        let url = tracker.announce_url(&request());
        let query = url.query().unwrap();
        assert!(query.starts_with("passkey=1&info_hash=%AB%AB"));
        assert!(query.contains("&compact=1"));
    }

    #[tokio::test]
    async fn test_announce_compact() {
        let (url, server) = serve_once(
            "200 OK",
            b"d8:intervali900e10:tracker id2:t15:peers6:\x7f\x00\x00\x01\x1a\xe1e",
        )
        .await;
        let mut tracker = HttpTracker::new(url).unwrap();

        let peers = tracker.announce(&request()).await.unwrap();
        assert_eq!(peers, vec!["127.0.0.1:6881".parse::<SocketAddr>().unwrap()]);
        assert_eq!(tracker.interval(), Duration::from_secs(900));
        assert_eq!(tracker.tracker_id.as_deref(), Some("t1"));

        let request_line = server.await.unwrap();
        assert!(request_line.starts_with("GET /announce?passkey=xyz&info_hash="));
    }

    #[tokio::test]
    async fn test_announce_two_compact_peers() {
        let (url, _server) = serve_once(
            "200 OK",
            b"d8:intervali1800e5:peers12:\x01\x02\x03\x04\x16\x2e\x09\x0a\x0b\x0c\x05\x22e",
        )
        .await;
        let mut tracker = HttpTracker::new(url).unwrap();

        let peers = tracker.announce(&request()).await.unwrap();
        assert_eq!(
            peers,
            vec![
                "1.2.3.4:5678".parse::<SocketAddr>().unwrap(),
                "9.10.11.12:1314".parse().unwrap()
            ]
        );
        assert_eq!(tracker.interval(), Duration::from_secs(1800));
    }

    #[tokio::test]
    async fn test_announce_http_error() {
        let (url, _server) = serve_once("404 Not Found", b"").await;
        let mut tracker = HttpTracker::new(url).unwrap();
        assert!(matches!(
            tracker.announce(&request()).await,
            Err(TrackerError::HttpStatus(404))
        ));
    }

    #[tokio::test]
    async fn test_announce_failure_reason() {
        let (url, _server) = serve_once("200 OK", b"d14:failure reason7:go awaye").await;
        let mut tracker = HttpTracker::new(url).unwrap();
        match tracker.announce(&request()).await {
            Err(TrackerError::Failure(reason)) => assert_eq!(reason, "go away"),
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
