use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;

/// Addresses waiting for a free slot, as a multiple of the slot count
const BACKLOG_FACTOR: usize = 4;

struct PoolInner {
    active: HashSet<SocketAddr>,
    backlog: VecDeque<SocketAddr>,
}

/// Caps the number of simultaneous peer sessions.
///
/// Addresses offered while the pool is full wait in a bounded backlog and
/// take over slots as sessions end.
pub struct PeerPool {
    max_peers: usize,
    inner: Mutex<PoolInner>,
}

impl PeerPool {
    pub fn new(max_peers: usize) -> Self {
        Self {
            max_peers,
            inner: Mutex::new(PoolInner {
                active: HashSet::new(),
                backlog: VecDeque::new(),
            }),
        }
    }

    /// Claim a slot for `addr`. False if it is already known or the pool is full.
    pub fn offer(&self, addr: SocketAddr) -> bool {
        let mut inner = self.inner.lock();
        if inner.active.contains(&addr) || inner.backlog.contains(&addr) {
            return false;
        }
        if inner.active.len() < self.max_peers {
            inner.active.insert(addr);
            return true;
        }
        if inner.backlog.len() < self.max_peers * BACKLOG_FACTOR {
            inner.backlog.push_back(addr);
        }
        false
    }

    /// Free the slot of `addr` and hand it to the next waiting address, if any.
    pub fn release(&self, addr: SocketAddr) -> Option<SocketAddr> {
        let mut inner = self.inner.lock();
        inner.active.remove(&addr);
        while let Some(next) = inner.backlog.pop_front() {
            if inner.active.len() >= self.max_peers {
                inner.backlog.push_front(next);
                return None;
            }
            if inner.active.insert(next) {
                return Some(next);
            }
        }
        None
    }

    /// Free the slot of `addr` without promoting a replacement.
    pub fn remove(&self, addr: SocketAddr) {
        self.inner.lock().active.remove(&addr);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().active.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn backlog_len(&self) -> usize {
        self.inner.lock().backlog.len()
    }
}
