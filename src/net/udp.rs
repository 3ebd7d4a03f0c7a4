use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// Largest datagram a tracker is expected to send
const MAX_DATAGRAM: usize = 64 * 1024;

/// Connect response length: action, transaction id, connection id
pub const UDP_HANDSHAKE_LEN: usize = 16;

/// Connected UDP socket with a per-operation deadline.
pub struct TimeoutUdp {
    socket: UdpSocket,
    timeout: Duration,
}

impl TimeoutUdp {
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> io::Result<Self> {
        let local: SocketAddr = if addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(addr).await?;
        Ok(Self { socket, timeout })
    }

    pub async fn write(&self, bytes: &[u8]) -> io::Result<()> {
        let sent = timeout(self.timeout, self.socket.send(bytes))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "udp send timed out"))??;
        if sent != bytes.len() {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "short udp send"));
        }
        Ok(())
    }

    async fn recv(&self, max: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; max];
        let n = timeout(self.timeout, self.socket.recv(&mut buf))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "udp read timed out"))??;
        buf.truncate(n);
        Ok(buf)
    }

    /// Read a connect response. Error responses may be shorter or longer
    /// than 16 bytes, so the whole datagram is returned.
    pub async fn read_udp_handshake(&self) -> io::Result<Vec<u8>> {
        self.recv(MAX_DATAGRAM).await
    }

    /// Read one variable-sized datagram.
    pub async fn read_all(&self) -> io::Result<Vec<u8>> {
        self.recv(MAX_DATAGRAM).await
    }
}
