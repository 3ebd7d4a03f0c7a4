use super::Bitset;
use crate::peer::BlockInfo;
use parking_lot::Mutex;
use tracing::debug;

/// Decides which piece each peer works on next.
///
/// `requested` holds every piece handed out to some peer, `downloaded` every
/// piece written and verified. Requests whose peer went away wait in a LIFO
/// and are served before fresh pieces. No lock is held across I/O.
pub struct Scheduler {
    piece_count: usize,
    requested: Mutex<Bitset>,
    downloaded: Mutex<Bitset>,
    failed: Mutex<Vec<BlockInfo>>,
}

impl Scheduler {
    pub fn new(piece_count: usize) -> Self {
        Self {
            piece_count,
            requested: Mutex::new(Bitset::new(piece_count)),
            downloaded: Mutex::new(Bitset::new(piece_count)),
            failed: Mutex::new(Vec::new()),
        }
    }

    pub fn piece_count(&self) -> usize {
        self.piece_count
    }

    /// Claim the lowest-indexed piece the peer has that nobody requested yet.
    pub fn next(&self, peer_has: &Bitset) -> Option<u32> {
        let mut requested = self.requested.lock();
        let index = requested.next_clear_in(peer_has, 0)?;
        requested.set(index);
        debug!("Scheduled piece {}", index);
        Some(index as u32)
    }

    /// Queue a request whose delivery failed so another peer can take it over.
    pub fn report_failed(&self, request: BlockInfo) {
        self.failed.lock().push(request);
    }

    /// Most recently failed request, if any
    pub fn take_failed(&self) -> Option<BlockInfo> {
        self.failed.lock().pop()
    }

    /// Most recently failed request for a piece the peer has.
    pub fn take_failed_for(&self, peer_has: &Bitset) -> Option<BlockInfo> {
        let mut failed = self.failed.lock();
        let position = failed
            .iter()
            .rposition(|block| peer_has.test(block.piece_index as usize))?;
        Some(failed.remove(position))
    }

    /// Record a verified piece. Returns false if it was already marked.
    pub fn mark_downloaded(&self, index: u32) -> bool {
        let index = index as usize;
        self.requested.lock().set(index);
        let mut downloaded = self.downloaded.lock();
        if downloaded.test(index) {
            return false;
        }
        downloaded.set(index);
        true
    }

    /// Put a piece back up for grabs after it failed verification.
    ///
    /// Queued block requests for it are dropped since the whole piece will
    /// be scheduled again.
    pub fn release(&self, index: u32) {
        if self.is_downloaded(index) {
            return;
        }
        self.failed.lock().retain(|block| block.piece_index != index);
        self.requested.lock().clear(index as usize);
    }

    pub fn is_downloaded(&self, index: u32) -> bool {
        self.downloaded.lock().test(index as usize)
    }

    pub fn downloaded_count(&self) -> usize {
        self.downloaded.lock().count()
    }

    pub fn is_complete(&self) -> bool {
        self.downloaded_count() == self.piece_count
    }

    /// Snapshot of the downloaded set
    #[cfg(test)]
    pub fn downloaded(&self) -> Bitset {
        self.downloaded.lock().clone()
    }

    #[cfg(test)]
    pub fn failed_len(&self) -> usize {
        self.failed.lock().len()
    }
}
