use bytes::{Buf, Bytes, BytesMut};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Handshake length: 1 + 19 + 8 + 20 + 20
pub const HANDSHAKE_LEN: usize = 68;

/// Largest framed message accepted from a peer
pub const MAX_MESSAGE_LEN: usize = 2 * 1024 * 1024;

fn timed_out(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, format!("{what} timed out"))
}

/// Stream wrapper where every read and write gets a fresh deadline.
///
/// Reads go through an internal buffer, so a read abandoned by a timeout or
/// a `select!` keeps whatever bytes already arrived for the next call.
pub struct TimeoutStream<S> {
    inner: S,
    buf: BytesMut,
    timeout: Duration,
}

impl TimeoutStream<TcpStream> {
    /// Dial `addr`, giving up after `connect_timeout`.
    pub async fn connect(
        addr: SocketAddr,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> io::Result<Self> {
        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| timed_out("connect"))??;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream, io_timeout))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> TimeoutStream<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(32 * 1024),
            timeout,
        }
    }

    /// Buffer at least `n` bytes. Cancel safe.
    async fn fill(&mut self, n: usize) -> io::Result<()> {
        while self.buf.len() < n {
            if self.inner.read_buf(&mut self.buf).await? == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
        }
        Ok(())
    }

    /// Read exactly `n` bytes or fail with a timeout or EOF.
    pub async fn read_exactly(&mut self, n: usize) -> io::Result<Bytes> {
        timeout(self.timeout, self.fill(n))
            .await
            .map_err(|_| timed_out("read"))??;
        Ok(self.buf.split_to(n).freeze())
    }

    async fn read_frame(&mut self) -> io::Result<Bytes> {
        self.fill(4).await?;
        let length = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if length > MAX_MESSAGE_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("message of {length} bytes exceeds limit"),
            ));
        }
        self.fill(4 + length).await?;
        self.buf.advance(4);
        Ok(self.buf.split_to(length).freeze())
    }

    /// Read one length-prefixed message and return its body.
    ///
    /// An empty body is a keep-alive.
    pub async fn read_peer_message(&mut self) -> io::Result<Bytes> {
        timeout(self.timeout, self.read_frame())
            .await
            .map_err(|_| timed_out("read"))?
    }

    /// Like [`read_peer_message`](Self::read_peer_message) but waits up to
    /// `wait` and reports silence as `None` rather than an error.
    pub async fn poll_peer_message(&mut self, wait: Duration) -> io::Result<Option<Bytes>> {
        match timeout(wait, self.read_frame()).await {
            Ok(frame) => frame.map(Some),
            Err(_) => Ok(None),
        }
    }

    pub async fn read_peer_handshake(&mut self) -> io::Result<Bytes> {
        self.read_exactly(HANDSHAKE_LEN).await
    }

    pub async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        timeout(self.timeout, async {
            self.inner.write_all(bytes).await?;
            self.inner.flush().await
        })
        .await
        .map_err(|_| timed_out("write"))?
    }

    /// Drain the stream until EOF.
    #[cfg(test)]
    pub async fn read_all(&mut self) -> io::Result<Bytes> {
        let mut rest = Vec::new();
        timeout(self.timeout, self.inner.read_to_end(&mut rest))
            .await
            .map_err(|_| timed_out("read"))??;
        self.buf.extend_from_slice(&rest);
        Ok(self.buf.split().freeze())
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}
