use super::FileLayout;
use crate::client::Stats;
use crate::error::Result;
use crate::piece::{BlockOutcome, PieceManager, Scheduler};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A block received from a peer, on its way to disk
#[derive(Debug, Clone)]
pub struct PieceBlock {
    pub piece_index: u32,
    pub offset: u32,
    pub data: Bytes,
}

/// Single consumer of the block channel and sole owner of the output files.
pub struct PieceWriter {
    layout: FileLayout,
    pieces: PieceManager,
    scheduler: Arc<Scheduler>,
    stats: Arc<Stats>,
}

impl PieceWriter {
    pub fn new(layout: FileLayout, pieces: PieceManager, scheduler: Arc<Scheduler>, stats: Arc<Stats>) -> Self {
        Self {
            layout,
            pieces,
            scheduler,
            stats,
        }
    }

    /// Drain `blocks` until `stop` fires or every sender is gone, then flush.
    ///
    /// `done` is cancelled once every piece is on disk, or on a filesystem
    /// error, which ends the download.
    pub async fn run(
        mut self,
        mut blocks: mpsc::Receiver<PieceBlock>,
        done: CancellationToken,
        stop: CancellationToken,
    ) -> Result<()> {
        let result = self.drain(&mut blocks, &done, &stop).await;
        if let Err(e) = &result {
            error!("Writer failed: {}", e);
            done.cancel();
            return result;
        }
        self.layout.sync_all().await?;
        debug!("Writer flushed {:?}", self.layout.root());
        Ok(())
    }

    async fn drain(
        &mut self,
        blocks: &mut mpsc::Receiver<PieceBlock>,
        done: &CancellationToken,
        stop: &CancellationToken,
    ) -> Result<()> {
        loop {
            let block = tokio::select! {
                block = blocks.recv() => block,
                _ = stop.cancelled() => break,
            };
            let Some(block) = block else {
                break;
            };
            self.accept(block, done).await?;
        }

        blocks.close();
        while let Ok(block) = blocks.try_recv() {
            self.accept(block, done).await?;
        }
        Ok(())
    }

    async fn accept(&mut self, block: PieceBlock, done: &CancellationToken) -> Result<()> {
        let index = block.piece_index;
        if self.scheduler.is_downloaded(index) {
            return Ok(());
        }

        match self.pieces.add_block(index, block.offset, &block.data) {
            Err(e) => warn!("Discarding block: {}", e),
            Ok(BlockOutcome::Pending) | Ok(BlockOutcome::Duplicate) => {}
            Ok(BlockOutcome::Corrupt) => {
                self.scheduler.release(index);
                debug!("Piece {} requeued, {} pieces partially buffered", index, self.pieces.in_progress());
            }
            Ok(BlockOutcome::Verified(data)) => {
                self.layout.write_piece(index, &data).await?;
                if self.scheduler.mark_downloaded(index) {
                    self.stats.sub_left(data.len() as u64);
                }
                if self.scheduler.is_complete() {
                    info!("All {} pieces written", self.scheduler.piece_count());
                    done.cancel();
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::piece::Lengths;
    use crate::storage::layout::tests::temp_dir;
    use crate::torrent::{FileInfo, PieceHash, Pieces, TorrentInfo};
    use std::time::Duration;

    fn single_file(name: &str, payload: &[u8], piece_length: u64) -> TorrentInfo {
        let hashes: Vec<u8> = payload
            .chunks(piece_length as usize)
            .flat_map(|chunk| PieceHash::of(chunk).as_bytes().to_vec())
            .collect();
        TorrentInfo {
            name: name.to_string(),
            piece_length,
            pieces: Pieces::from_bytes(&hashes).unwrap(),
            files: vec![FileInfo {
                path: vec![name.to_string()],
                length: payload.len() as u64,
            }],
            total_length: payload.len() as u64,
            multi_file: false,
            private: false,
        }
    }

    fn writer(dir: &std::path::Path, info: &TorrentInfo) -> (PieceWriter, Arc<Scheduler>, Arc<Stats>) {
        let lengths = Lengths::from_info(info);
        let scheduler = Arc::new(Scheduler::new(lengths.piece_count() as usize));
        let stats = Arc::new(Stats::new(info.total_length));
        let writer = PieceWriter::new(
            FileLayout::new(dir, info).unwrap(),
            PieceManager::new(lengths, info.pieces.clone()),
            scheduler.clone(),
            stats.clone(),
        );
        (writer, scheduler, stats)
    }

    fn block(piece_index: u32, data: &[u8]) -> PieceBlock {
        PieceBlock {
            piece_index,
            offset: 0,
            data: Bytes::copy_from_slice(data),
        }
    }

    #[tokio::test]
    async fn test_writes_single_file_and_completes() {
        let dir = temp_dir();
        let payload = b"AAAABBBBCC";
        let info = single_file("out.bin", payload, 4);
        let (writer, scheduler, stats) = writer(&dir, &info);

        let (tx, rx) = mpsc::channel(8);
        let done = CancellationToken::new();
        let stop = CancellationToken::new();
        let handle = tokio::spawn(writer.run(rx, done.clone(), stop.clone()));

        tx.send(block(0, b"AAAA")).await.unwrap();
        tx.send(block(1, b"BBBB")).await.unwrap();
        tx.send(block(2, b"CC")).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), done.cancelled())
            .await
            .unwrap();
        stop.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(std::fs::read(dir.join("out.bin")).unwrap(), payload);
        assert!(scheduler.downloaded().all());
        assert_eq!(stats.left(), 0);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_piece_is_released() {
        let dir = temp_dir();
        let info = single_file("bad.bin", b"AAAABBBB", 4);
        let (writer, scheduler, stats) = writer(&dir, &info);

        let all = crate::piece::Bitset::full(2);
        assert_eq!(scheduler.next(&all), Some(0));

        let (tx, rx) = mpsc::channel(8);
        let done = CancellationToken::new();
        let stop = CancellationToken::new();
        tx.send(block(0, b"XXXX")).await.unwrap();
        tx.send(block(1, b"BBBB")).await.unwrap();
        drop(tx);

        writer.run(rx, done.clone(), stop).await.unwrap();

        assert!(!done.is_cancelled());
        assert!(!scheduler.is_downloaded(0));
        assert!(scheduler.is_downloaded(1));
        assert_eq!(stats.left(), 4);
        // Released, so piece 0 is handed out again.
        assert_eq!(scheduler.next(&all), Some(0));
        std::fs::remove_dir_all(dir).unwrap();
    }
}
