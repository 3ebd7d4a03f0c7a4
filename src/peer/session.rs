use super::{BlockInfo, Handshake, PeerError, PeerMessage, PeerState};
use crate::client::Stats;
use crate::net::TimeoutStream;
use crate::piece::{Bitset, Lengths, Scheduler};
use crate::storage::PieceBlock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Send a keep-alive when nothing went out for this long
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(114);

/// Wait for a message when unchoked but out of work
const IDLE_WAIT: Duration = Duration::from_secs(2);

/// Wait for an unchoke before re-checking state
const CHOKE_WAIT: Duration = Duration::from_secs(30);

/// Silent choke waits tolerated before dropping the peer
const MAX_CHOKE_WAITS: u32 = 4;

/// Torrent-wide handles shared by every peer session
pub struct PeerContext {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub lengths: Lengths,
    pub scheduler: Arc<Scheduler>,
    pub stats: Arc<Stats>,
    pub blocks: mpsc::Sender<PieceBlock>,
    /// Block requests kept in flight at once
    pub pipeline_depth: usize,
}

enum Wait {
    Message(PeerMessage),
    Idle,
    Cancelled,
}

/// One connection to a remote peer, driven by a single task.
///
/// The session owns its socket. Pieces are claimed from the shared
/// scheduler, requested block by block, and received blocks are forwarded
/// to the writer. Whatever is still outstanding when the session ends goes
/// back to the scheduler's failed queue.
pub struct PeerSession<S> {
    addr: SocketAddr,
    stream: TimeoutStream<S>,
    ctx: Arc<PeerContext>,
    state: PeerState,
    /// Pieces the remote has
    bitset: Bitset,
    last_sent: Instant,
    /// Piece being requested and its next block index
    current: Option<(u32, u32)>,
    in_flight: Vec<BlockInfo>,
    choke_waits: u32,
}

impl PeerSession<TcpStream> {
    /// Dial a peer and exchange handshakes.
    pub async fn connect(
        addr: SocketAddr,
        ctx: Arc<PeerContext>,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> Result<Self, PeerError> {
        debug!("Connecting to peer: {}", addr);
        let stream = TimeoutStream::connect(addr, connect_timeout, io_timeout).await?;
        Self::handshake(addr, stream, ctx).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> PeerSession<S> {
    /// Send our handshake on an open stream and validate the reply.
    pub async fn handshake(
        addr: SocketAddr,
        mut stream: TimeoutStream<S>,
        ctx: Arc<PeerContext>,
    ) -> Result<Self, PeerError> {
        let ours = Handshake::new(ctx.info_hash, ctx.peer_id);
        stream.write(&ours.to_bytes()).await?;
        debug!("Sent handshake to {}", addr);

        let reply = stream.read_peer_handshake().await?;
        let theirs = Handshake::from_bytes(&reply)?;
        ours.verify_reply(&theirs)?;

        info!("Connected to peer {} ({})", addr, String::from_utf8_lossy(&theirs.peer_id[..8]));

        let piece_count = ctx.lengths.piece_count() as usize;
        Ok(Self {
            addr,
            stream,
            ctx,
            state: PeerState::default(),
            bitset: Bitset::new(piece_count),
            last_sent: Instant::now(),
            current: None,
            in_flight: Vec::new(),
            choke_waits: 0,
        })
    }

    /// Download until cancelled or the connection fails.
    ///
    /// Cancellation is a clean exit. Outstanding requests are handed back
    /// to the scheduler either way.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), PeerError> {
        let result = self.drive(&cancel).await;
        self.abandon();
        let _ = self.stream.shutdown().await;
        match &result {
            Ok(()) => debug!("Session with {} ended", self.addr),
            Err(e) => debug!("Session with {} failed: {}", self.addr, e),
        }
        result
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> Result<(), PeerError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            if self.last_sent.elapsed() >= KEEP_ALIVE_INTERVAL {
                self.send(&PeerMessage::KeepAlive).await?;
            }

            let wait = if self.state.peer_choking {
                if !self.state.am_interested {
                    self.send(&PeerMessage::Interested).await?;
                }
                self.poll(cancel, CHOKE_WAIT).await?
            } else {
                self.fill_pipeline().await?;
                if self.in_flight.is_empty() {
                    self.poll(cancel, IDLE_WAIT).await?
                } else {
                    self.recv(cancel).await?
                }
            };

            match wait {
                Wait::Message(message) => self.handle(message).await?,
                Wait::Cancelled => return Ok(()),
                Wait::Idle if self.state.peer_choking => {
                    self.choke_waits += 1;
                    if self.choke_waits >= MAX_CHOKE_WAITS {
                        return Err(PeerError::Choked);
                    }
                }
                Wait::Idle => {}
            }
        }
    }

    async fn send(&mut self, message: &PeerMessage) -> Result<(), PeerError> {
        self.stream.write(&message.to_bytes()).await?;
        self.last_sent = Instant::now();

        match message {
            PeerMessage::Interested => self.state.am_interested = true,
            PeerMessage::NotInterested => self.state.am_interested = false,
            _ => {}
        }
        debug!("Sent message to {}: {:?}", self.addr, message);
        Ok(())
    }

    /// Read one message within the per-operation deadline.
    async fn recv(&mut self, cancel: &CancellationToken) -> Result<Wait, PeerError> {
        tokio::select! {
            _ = cancel.cancelled() => Ok(Wait::Cancelled),
            body = self.stream.read_peer_message() => Ok(Wait::Message(PeerMessage::parse(body?)?)),
        }
    }

    /// Wait up to `wait` for a message; silence is not an error.
    async fn poll(&mut self, cancel: &CancellationToken, wait: Duration) -> Result<Wait, PeerError> {
        tokio::select! {
            _ = cancel.cancelled() => Ok(Wait::Cancelled),
            body = self.stream.poll_peer_message(wait) => match body? {
                Some(body) => Ok(Wait::Message(PeerMessage::parse(body)?)),
                None => Ok(Wait::Idle),
            },
        }
    }

    /// Next block to request: the current piece first, then requests other
    /// peers abandoned, then a fresh piece.
    fn next_block(&mut self) -> Option<BlockInfo> {
        if let Some((piece, next)) = self.current {
            if let Some(block) = self.ctx.lengths.block(piece, next) {
                self.current = Some((piece, next + 1));
                return Some(block);
            }
            self.current = None;
        }

        let failed = if self.bitset.all() {
            self.ctx.scheduler.take_failed()
        } else {
            self.ctx.scheduler.take_failed_for(&self.bitset)
        };
        if failed.is_some() {
            return failed;
        }

        let piece = self.ctx.scheduler.next(&self.bitset)?;
        self.current = Some((piece, 1));
        self.ctx.lengths.block(piece, 0)
    }

    async fn fill_pipeline(&mut self) -> Result<(), PeerError> {
        while self.in_flight.len() < self.ctx.pipeline_depth {
            let Some(block) = self.next_block() else {
                break;
            };
            self.in_flight.push(block);
            self.send(&PeerMessage::Request { block }).await?;
        }
        Ok(())
    }

    async fn handle(&mut self, message: PeerMessage) -> Result<(), PeerError> {
        match message {
            PeerMessage::KeepAlive => {}
            PeerMessage::Choke => {
                debug!("Choked by {}", self.addr);
                self.state.peer_choking = true;
                // Choked peers discard pending requests.
                for block in self.in_flight.drain(..) {
                    self.ctx.scheduler.report_failed(block);
                }
            }
            PeerMessage::Unchoke => {
                debug!("Unchoked by {}", self.addr);
                self.state.peer_choking = false;
                self.choke_waits = 0;
            }
            PeerMessage::Interested => self.state.peer_interested = true,
            PeerMessage::NotInterested => self.state.peer_interested = false,
            PeerMessage::Have { piece_index } => {
                if (piece_index as usize) < self.bitset.len() {
                    self.bitset.set(piece_index as usize);
                }
            }
            PeerMessage::Bitfield { bitfield } => {
                self.bitset = Bitset::from_bytes(&bitfield, self.bitset.len());
                debug!("{} has {} of {} pieces", self.addr, self.bitset.count(), self.bitset.len());
            }
            PeerMessage::Request { .. } | PeerMessage::Cancel { .. } => {
                debug!(
                    "Ignoring upload request from {} (choking: {}, interested: {})",
                    self.addr, self.state.am_choking, self.state.peer_interested
                );
            }
            PeerMessage::Piece {
                piece_index,
                offset,
                data,
            } => self.on_block(piece_index, offset, data).await?,
            PeerMessage::Unknown { id } => {
                debug!("Skipping unknown message type {} from {}", id, self.addr);
            }
        }
        Ok(())
    }

    async fn on_block(&mut self, piece_index: u32, offset: u32, data: bytes::Bytes) -> Result<(), PeerError> {
        let Some(position) = self
            .in_flight
            .iter()
            .position(|b| b.piece_index == piece_index && b.offset == offset)
        else {
            debug!("Dropping unrequested block {}:{} from {}", piece_index, offset, self.addr);
            return Ok(());
        };

        let block = self.in_flight.swap_remove(position);
        if data.len() != block.length as usize {
            self.ctx.scheduler.report_failed(block);
            return Err(PeerError::BlockLength {
                piece_index,
                offset,
                want: block.length,
                got: data.len(),
            });
        }

        self.ctx.stats.add_downloaded(data.len() as u64);
        self.ctx
            .blocks
            .send(PieceBlock {
                piece_index,
                offset,
                data,
            })
            .await
            .map_err(|_| PeerError::WriterClosed)
    }

    /// Return every block this session still owes to the scheduler.
    fn abandon(&mut self) {
        let scheduler = &self.ctx.scheduler;
        let requeued = self.in_flight.len();
        for block in self.in_flight.drain(..) {
            scheduler.report_failed(block);
        }
        if let Some((piece, next)) = self.current.take() {
            for block in self.ctx.lengths.blocks_from(piece, next) {
                scheduler.report_failed(block);
            }
        }
        if requeued > 0 {
            warn!("Re-queued {} in-flight requests from {}", requeued, self.addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::piece::BLOCK_SIZE;
    use tokio::io::{duplex, DuplexStream};

    const T: Duration = Duration::from_secs(2);

    fn context(total: u64, piece_length: u64) -> (Arc<PeerContext>, mpsc::Receiver<PieceBlock>) {
        let lengths = Lengths::new(total, piece_length);
        let (tx, rx) = mpsc::channel(64);
        let ctx = PeerContext {
            info_hash: [7; 20],
            peer_id: *b"-LE0100-aaaaaaaaaaaa",
            lengths,
            scheduler: Arc::new(Scheduler::new(lengths.piece_count() as usize)),
            stats: Arc::new(Stats::new(total)),
            blocks: tx,
            pipeline_depth: 5,
        };
        (Arc::new(ctx), rx)
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:6881".parse().unwrap()
    }

    /// Remote end of a session, speaking raw frames.
    struct FakePeer {
        stream: TimeoutStream<DuplexStream>,
    }

    impl FakePeer {
        async fn accept_handshake(&mut self, info_hash: [u8; 20], peer_id: [u8; 20]) {
            let theirs = self.stream.read_peer_handshake().await.unwrap();
            assert_eq!(theirs[0], 19);
            self.stream
                .write(&Handshake::new(info_hash, peer_id).to_bytes())
                .await
                .unwrap();
        }

        async fn send(&mut self, message: PeerMessage) {
            self.stream.write(&message.to_bytes()).await.unwrap();
        }

        async fn recv(&mut self) -> PeerMessage {
            PeerMessage::parse(self.stream.read_peer_message().await.unwrap()).unwrap()
        }
    }

    fn pair() -> (TimeoutStream<DuplexStream>, FakePeer) {
        pair_with(T)
    }

    /// Paused-clock tests give the remote a long deadline so it outlives the
    /// session's own waits.
    fn pair_with(remote_timeout: Duration) -> (TimeoutStream<DuplexStream>, FakePeer) {
        let (a, b) = duplex(1 << 20);
        (
            TimeoutStream::new(a, T),
            FakePeer {
                stream: TimeoutStream::new(b, remote_timeout),
            },
        )
    }

    const LONG: Duration = Duration::from_secs(1000);

    #[tokio::test]
    async fn test_handshake_rejects_wrong_info_hash() {
        let (ctx, _rx) = context(10, 4);
        let (ours, mut remote) = pair();

        let fake = tokio::spawn(async move { remote.accept_handshake([8; 20], [1; 20]).await });
        let result = PeerSession::handshake(addr(), ours, ctx).await;
        fake.await.unwrap();
        assert!(matches!(result, Err(PeerError::HandshakeInvalid(_))));
    }

    #[tokio::test]
    async fn test_handshake_rejects_self_connection() {
        let (ctx, _rx) = context(10, 4);
        let (ours, mut remote) = pair();
        let own_id = ctx.peer_id;

        let fake = tokio::spawn(async move { remote.accept_handshake([7; 20], own_id).await });
        let result = PeerSession::handshake(addr(), ours, ctx).await;
        fake.await.unwrap();
        assert!(matches!(result, Err(PeerError::HandshakeInvalid("connected to ourselves"))));
    }

    #[tokio::test]
    async fn test_downloads_blocks_from_seeder() {
        // Two pieces: 20 KiB and 4 KiB, so piece 0 spans two blocks.
        let total = 24 * 1024;
        let (ctx, mut rx) = context(total, 20 * 1024);
        let (ours, mut remote) = pair();
        let cancel = CancellationToken::new();

        let seeder = tokio::spawn(async move {
            remote.accept_handshake([7; 20], [1; 20]).await;
            remote
                .send(PeerMessage::Bitfield {
                    bitfield: bytes::Bytes::from_static(&[0b1100_0000]),
                })
                .await;
            assert_eq!(remote.recv().await, PeerMessage::Interested);
            remote.send(PeerMessage::Unchoke).await;

            let mut served = Vec::new();
            while served.len() < 3 {
                match remote.recv().await {
                    PeerMessage::Request { block } => {
                        remote
                            .send(PeerMessage::Piece {
                                piece_index: block.piece_index,
                                offset: block.offset,
                                data: bytes::Bytes::from(vec![block.piece_index as u8; block.length as usize]),
                            })
                            .await;
                        served.push(block);
                    }
                    PeerMessage::KeepAlive => {}
                    other => panic!("unexpected {:?}", other),
                }
            }
            // Keep the connection open until the session is cancelled.
            (served, remote)
        });

        let session = PeerSession::handshake(addr(), ours, ctx.clone()).await.unwrap();
        let runner = tokio::spawn(session.run(cancel.clone()));

        let mut received = Vec::new();
        while received.len() < 3 {
            received.push(tokio::time::timeout(T, rx.recv()).await.unwrap().unwrap());
        }
        cancel.cancel();
        assert!(runner.await.unwrap().is_ok());

        let (served, _remote) = seeder.await.unwrap();
        assert_eq!(
            served,
            vec![
                BlockInfo::new(0, 0, BLOCK_SIZE),
                BlockInfo::new(0, BLOCK_SIZE, 4 * 1024),
                BlockInfo::new(1, 0, 4 * 1024),
            ]
        );
        assert_eq!(received[2].piece_index, 1);
        assert_eq!(received[2].data.len(), 4 * 1024);
        assert_eq!(ctx.stats.downloaded(), total);
        assert_eq!(ctx.scheduler.failed_len(), 0);
    }

    #[tokio::test]
    async fn test_dead_peer_requeues_outstanding_blocks() {
        let (ctx, _rx) = context(40 * 1024, 40 * 1024);
        let (ours, mut remote) = pair();

        let seeder = tokio::spawn(async move {
            remote.accept_handshake([7; 20], [1; 20]).await;
            remote.send(PeerMessage::Have { piece_index: 0 }).await;
            assert_eq!(remote.recv().await, PeerMessage::Interested);
            remote.send(PeerMessage::Unchoke).await;
            // Take the first request, then hang up.
            assert!(matches!(remote.recv().await, PeerMessage::Request { .. }));
        });

        let session = PeerSession::handshake(addr(), ours, ctx.clone()).await.unwrap();
        let result = session.run(CancellationToken::new()).await;
        seeder.await.unwrap();

        assert!(result.is_err());
        // Three blocks of the 40 KiB piece all go back.
        assert_eq!(ctx.scheduler.failed_len(), 3);
        assert!(!ctx.scheduler.is_downloaded(0));
    }

    #[tokio::test]
    async fn test_skips_unknown_messages() {
        let (ctx, _rx) = context(10, 4);
        let (ours, mut remote) = pair();
        let cancel = CancellationToken::new();

        let fake_cancel = cancel.clone();
        let fake = tokio::spawn(async move {
            remote.accept_handshake([7; 20], [1; 20]).await;
            remote.stream.write(&[0, 0, 0, 3, 20, 1, 2]).await.unwrap();
            remote.send(PeerMessage::Have { piece_index: 2 }).await;
            assert_eq!(remote.recv().await, PeerMessage::Interested);
            fake_cancel.cancel();
            remote
        });

        let session = PeerSession::handshake(addr(), ours, ctx).await.unwrap();
        assert!(session.run(cancel).await.is_ok());
        drop(fake.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_choke_requeues_in_flight_requests() {
        let (ctx, _rx) = context(40 * 1024, 40 * 1024);
        let (ours, mut remote) = pair_with(LONG);
        let cancel = CancellationToken::new();

        let fake = tokio::spawn(async move {
            remote.accept_handshake([7; 20], [1; 20]).await;
            remote.send(PeerMessage::Have { piece_index: 0 }).await;
            assert_eq!(remote.recv().await, PeerMessage::Interested);
            remote.send(PeerMessage::Unchoke).await;
            for _ in 0..3 {
                assert!(matches!(remote.recv().await, PeerMessage::Request { .. }));
            }
            remote.send(PeerMessage::Choke).await;
            remote
        });

        let session = PeerSession::handshake(addr(), ours, ctx.clone()).await.unwrap();
        let runner = tokio::spawn(session.run(cancel.clone()));
        let _remote = fake.await.unwrap();

        tokio::time::timeout(Duration::from_secs(10), async {
            while ctx.scheduler.failed_len() < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(!ctx.scheduler.is_downloaded(0));

        cancel.cancel();
        assert!(runner.await.unwrap().is_ok());
        assert_eq!(ctx.scheduler.failed_len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drops_peer_that_never_unchokes() {
        let (ctx, _rx) = context(10, 4);
        let (ours, mut remote) = pair_with(LONG);

        let fake = tokio::spawn(async move {
            remote.accept_handshake([7; 20], [1; 20]).await;
            remote.send(PeerMessage::Have { piece_index: 0 }).await;
            assert_eq!(remote.recv().await, PeerMessage::Interested);
            remote
        });

        let session = PeerSession::handshake(addr(), ours, ctx).await.unwrap();
        let started = tokio::time::Instant::now();
        let runner = tokio::spawn(session.run(CancellationToken::new()));
        let _remote = fake.await.unwrap();

        let result = runner.await.unwrap();
        assert!(matches!(result, Err(PeerError::Choked)));
        assert!(started.elapsed() >= CHOKE_WAIT * MAX_CHOKE_WAITS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sends_keep_alive_after_silence() {
        let (ctx, _rx) = context(10, 4);
        let (ours, mut remote) = pair_with(LONG);
        let cancel = CancellationToken::new();

        let fake = tokio::spawn(async move {
            remote.accept_handshake([7; 20], [1; 20]).await;
            assert_eq!(remote.recv().await, PeerMessage::Interested);
            // Unchoked but holding no pieces, so the session has nothing to ask for.
            remote.send(PeerMessage::Unchoke).await;
            let quiet = tokio::time::Instant::now();
            assert_eq!(remote.recv().await, PeerMessage::KeepAlive);
            (quiet.elapsed(), remote)
        });

        let session = PeerSession::handshake(addr(), ours, ctx).await.unwrap();
        let runner = tokio::spawn(session.run(cancel.clone()));

        let (silence, _remote) = fake.await.unwrap();
        assert!(silence >= KEEP_ALIVE_INTERVAL - IDLE_WAIT);
        assert!(silence <= KEEP_ALIVE_INTERVAL + IDLE_WAIT);

        cancel.cancel();
        assert!(runner.await.unwrap().is_ok());
    }
}
