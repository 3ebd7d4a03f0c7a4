use super::peer::from_compact_v4;
use super::request::TrackerEvent;
use super::{AnnounceRequest, TrackerError, DEFAULT_INTERVAL};
use crate::net::{TimeoutUdp, UDP_HANDSHAKE_LEN};
use bytes::{Buf, BufMut, BytesMut};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::lookup_host;
use tracing::{debug, info};

/// Magic constant opening every connect request
pub const PROTOCOL_ID: u64 = 0x41727101980;

/// How long a connection id stays usable
const CONNECTION_ID_TTL: Duration = Duration::from_secs(60);

const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const ACTION_ERROR: u32 = 3;

/// Announce request length on the wire
pub const ANNOUNCE_REQUEST_LEN: usize = 98;

/// Fixed part of an announce response
const ANNOUNCE_HEADER_LEN: usize = 20;

/// Decoded announce response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpAnnounce {
    pub interval: u32,
    pub leechers: u32,
    pub seeders: u32,
    pub peers: Vec<SocketAddr>,
}

pub fn connect_request(transaction_id: u32) -> [u8; 16] {
    let mut buf = [0u8; 16];
    let mut out = &mut buf[..];
    out.put_u64(PROTOCOL_ID);
    out.put_u32(ACTION_CONNECT);
    out.put_u32(transaction_id);
    buf
}

/// Check action and transaction id, turning error responses into `Failure`.
fn check_header(mut data: &[u8], want_action: u32, transaction_id: u32) -> Result<(), TrackerError> {
    if data.len() < 8 {
        return Err(TrackerError::ShortResponse(data.len()));
    }
    let action = data.get_u32();
    let got = data.get_u32();
    if got != transaction_id {
        return Err(TrackerError::TransactionMismatch { sent: transaction_id, got });
    }
    match action {
        a if a == want_action => Ok(()),
        ACTION_ERROR => Err(TrackerError::Failure(String::from_utf8_lossy(data).into_owned())),
        other => Err(TrackerError::UnexpectedAction(other)),
    }
}

pub fn parse_connect_response(data: &[u8], transaction_id: u32) -> Result<u64, TrackerError> {
    check_header(data, ACTION_CONNECT, transaction_id)?;
    if data.len() < UDP_HANDSHAKE_LEN {
        return Err(TrackerError::ShortResponse(data.len()));
    }
    Ok((&data[8..16]).get_u64())
}

pub fn announce_request(
    connection_id: u64,
    transaction_id: u32,
    key: u32,
    request: &AnnounceRequest,
) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(ANNOUNCE_REQUEST_LEN);
    buf.put_u64(connection_id);
    buf.put_u32(ACTION_ANNOUNCE);
    buf.put_u32(transaction_id);
    buf.put_slice(&request.info_hash);
    buf.put_slice(&request.peer_id);
    buf.put_u64(request.downloaded);
    buf.put_u64(request.left);
    buf.put_u64(request.uploaded);
    buf.put_u32(TrackerEvent::udp_code(request.event));
    buf.put_u32(0); // IP address: default
    buf.put_u32(key);
    buf.put_i32(-1); // num_want: default
    buf.put_u16(request.port);
    buf.to_vec()
}

pub fn parse_announce_response(data: &[u8], transaction_id: u32) -> Result<UdpAnnounce, TrackerError> {
    check_header(data, ACTION_ANNOUNCE, transaction_id)?;
    if data.len() < ANNOUNCE_HEADER_LEN {
        return Err(TrackerError::ShortResponse(data.len()));
    }
    let mut rest = &data[8..];
    let interval = rest.get_u32();
    let leechers = rest.get_u32();
    let seeders = rest.get_u32();
    Ok(UdpAnnounce {
        interval,
        leechers,
        seeders,
        peers: from_compact_v4(rest),
    })
}

/// BEP-15 UDP tracker client
pub struct UdpTracker {
    url: String,
    host: String,
    timeout: Duration,
    interval: Duration,
    key: u32,
    socket: Option<TimeoutUdp>,
    connection: Option<(u64, Instant)>,
}

impl UdpTracker {
    pub fn new(url: &url::Url, timeout: Duration) -> Result<Self, TrackerError> {
        let host = url
            .host_str()
            .ok_or_else(|| TrackerError::InvalidUrl(url.to_string()))?;
        let port = url
            .port()
            .ok_or_else(|| TrackerError::InvalidUrl(url.to_string()))?;
        let host = match host.starts_with('[') {
            true => format!("{host}:{port}"),
            false if host.contains(':') => format!("[{host}]:{port}"),
            false => format!("{host}:{port}"),
        };
        Ok(Self {
            url: url.to_string(),
            host,
            timeout,
            interval: DEFAULT_INTERVAL,
            key: rand::random(),
            socket: None,
            connection: None,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn close(&mut self) {
        self.socket = None;
        self.connection = None;
    }

    async fn socket(&mut self) -> Result<&TimeoutUdp, TrackerError> {
        if self.socket.is_none() {
            let addrs: Vec<SocketAddr> = lookup_host(&self.host)
                .await
                .map_err(|_| TrackerError::Resolve(self.host.clone()))?
                .collect();
            let addr = addrs
                .iter()
                .find(|a| a.is_ipv4())
                .or_else(|| addrs.first())
                .copied()
                .ok_or_else(|| TrackerError::Resolve(self.host.clone()))?;
            debug!("Resolved {} to {}", self.host, addr);
            self.socket = Some(TimeoutUdp::connect(addr, self.timeout).await?);
        }
        self.socket
            .as_ref()
            .ok_or_else(|| TrackerError::Resolve(self.host.clone()))
    }

    async fn connection_id(&mut self) -> Result<u64, TrackerError> {
        if let Some((id, at)) = self.connection {
            if at.elapsed() < CONNECTION_ID_TTL {
                return Ok(id);
            }
        }

        let transaction_id: u32 = rand::random();
        let socket = self.socket().await?;
        socket.write(&connect_request(transaction_id)).await?;
        let response = socket.read_udp_handshake().await?;
        let id = parse_connect_response(&response, transaction_id)?;

        debug!("Connected to {} with connection id {:#018x}", self.url, id);
        self.connection = Some((id, Instant::now()));
        Ok(id)
    }

    /// Connect if needed, then announce and return the peers.
    pub async fn announce(&mut self, request: &AnnounceRequest) -> Result<Vec<SocketAddr>, TrackerError> {
        let result = self.try_announce(request).await;
        if result.is_err() {
            self.connection = None;
        }
        result
    }

    async fn try_announce(&mut self, request: &AnnounceRequest) -> Result<Vec<SocketAddr>, TrackerError> {
        let connection_id = self.connection_id().await?;
        let transaction_id: u32 = rand::random();
        let packet = announce_request(connection_id, transaction_id, self.key, request);

        let socket = self.socket().await?;
        socket.write(&packet).await?;
        let response = socket.read_all().await?;
        let announce = parse_announce_response(&response, transaction_id)?;

        if announce.interval > 0 {
            self.interval = Duration::from_secs(u64::from(announce.interval));
        }
        info!(
            "Received {} peers from {} ({} seeders, {} leechers, interval: {}s)",
            announce.peers.len(),
            self.url,
            announce.seeders,
            announce.leechers,
            self.interval.as_secs()
        );
        Ok(announce.peers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket;

    fn request() -> AnnounceRequest {
        let mut request = AnnounceRequest::new([7; 20], *b"-LE0100-000000000001", 6666, 1000);
        request.downloaded = 24;
        request
    }

    #[test]
    fn test_connect_request_layout() {
        let packet = connect_request(0xdeadbeef);
        assert_eq!(&packet[..8], &0x41727101980u64.to_be_bytes());
        assert_eq!(&packet[8..12], &[0, 0, 0, 0]);
        assert_eq!(&packet[12..], &0xdeadbeefu32.to_be_bytes());
    }

    #[test]
    fn test_announce_request_layout() {
        let packet = announce_request(0x0123456789abcdef, 9, 42, &request());
        assert_eq!(packet.len(), ANNOUNCE_REQUEST_LEN);
        assert_eq!(&packet[..8], &0x0123456789abcdefu64.to_be_bytes());
        assert_eq!(&packet[8..12], &1u32.to_be_bytes());
        assert_eq!(&packet[12..16], &9u32.to_be_bytes());
        assert_eq!(&packet[16..36], &[7; 20]);
        assert_eq!(&packet[36..56], b"-LE0100-000000000001");
        assert_eq!(&packet[56..64], &24u64.to_be_bytes());
        assert_eq!(&packet[64..72], &1000u64.to_be_bytes());
        assert_eq!(&packet[72..80], &0u64.to_be_bytes());
        assert_eq!(&packet[80..84], &2u32.to_be_bytes());
        assert_eq!(&packet[84..88], &0u32.to_be_bytes());
        assert_eq!(&packet[88..92], &42u32.to_be_bytes());
        assert_eq!(&packet[92..96], &(-1i32).to_be_bytes());
        assert_eq!(&packet[96..], &6666u16.to_be_bytes());
    }

    #[test]
    fn test_parse_connect_response() {
        let mut data = vec![0, 0, 0, 0, 0, 0, 0, 5];
        data.extend_from_slice(&77u64.to_be_bytes());
        assert_eq!(parse_connect_response(&data, 5).unwrap(), 77);
        assert!(matches!(
            parse_connect_response(&data, 6),
            Err(TrackerError::TransactionMismatch { sent: 6, got: 5 })
        ));
        assert!(matches!(
            parse_connect_response(&data[..12], 5),
            Err(TrackerError::ShortResponse(12))
        ));
    }

    #[test]
    fn test_error_action() {
        let mut data = vec![0, 0, 0, 3, 0, 0, 0, 5];
        data.extend_from_slice(b"torrent not registered");
        match parse_announce_response(&data, 5) {
            Err(TrackerError::Failure(message)) => assert_eq!(message, "torrent not registered"),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_announce_response() {
        let mut data = vec![0, 0, 0, 1, 0, 0, 0, 8];
        data.extend_from_slice(&1800u32.to_be_bytes());
        data.extend_from_slice(&3u32.to_be_bytes());
        data.extend_from_slice(&4u32.to_be_bytes());
        data.extend_from_slice(&[10, 0, 0, 1, 0x1a, 0xe1, 10, 0, 0, 2]);
        let announce = parse_announce_response(&data, 8).unwrap();
        assert_eq!(announce.interval, 1800);
        assert_eq!(announce.leechers, 3);
        assert_eq!(announce.seeders, 4);
        assert_eq!(announce.peers, vec!["10.0.0.1:6881".parse::<SocketAddr>().unwrap()]);

        assert!(matches!(
            parse_announce_response(&data[..19], 8),
            Err(TrackerError::ShortResponse(19))
        ));
    }

    #[tokio::test]
    async fn test_connect_then_announce() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let fake = tokio::spawn(async move {
            let mut buf = [0u8; 1024];

            let (n, from) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(n, 16);
            assert_eq!(&buf[..8], &PROTOCOL_ID.to_be_bytes());
            let mut reply = vec![0, 0, 0, 0];
            reply.extend_from_slice(&buf[12..16]);
            reply.extend_from_slice(&0x0123456789ABCDEFu64.to_be_bytes());
            server.send_to(&reply, from).await.unwrap();

            let (n, from) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(n, ANNOUNCE_REQUEST_LEN);
            let connection_id = u64::from_be_bytes(buf[..8].try_into().unwrap());
            let mut reply = vec![0, 0, 0, 1];
            reply.extend_from_slice(&buf[12..16]);
            reply.extend_from_slice(&120u32.to_be_bytes());
            reply.extend_from_slice(&0u32.to_be_bytes());
            reply.extend_from_slice(&1u32.to_be_bytes());
            reply.extend_from_slice(&[127, 0, 0, 1, 0x1a, 0xe1]);
            server.send_to(&reply, from).await.unwrap();
            connection_id
        });

        let url = url::Url::parse(&format!("udp://{addr}/announce")).unwrap();
        let mut tracker = UdpTracker::new(&url, Duration::from_secs(2)).unwrap();
        let peers = tracker.announce(&request()).await.unwrap();

        assert_eq!(peers, vec!["127.0.0.1:6881".parse::<SocketAddr>().unwrap()]);
        assert_eq!(tracker.interval(), Duration::from_secs(120));
        assert_eq!(fake.await.unwrap(), 0x0123456789ABCDEF);
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let url = url::Url::parse(&format!("udp://{}", server.local_addr().unwrap())).unwrap();
        let mut tracker = UdpTracker::new(&url, Duration::from_millis(50)).unwrap();

        match tracker.announce(&request()).await {
            Err(TrackerError::Timeout) => {}
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
