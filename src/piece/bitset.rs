/// Fixed-length bit array, MSB-first within each byte as on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitset {
    bytes: Vec<u8>,
    len: usize,
}

impl Bitset {
    pub fn new(len: usize) -> Self {
        Self {
            bytes: vec![0; len.div_ceil(8)],
            len,
        }
    }

    /// Every bit set
    #[cfg(test)]
    pub fn full(len: usize) -> Self {
        let mut bitset = Self {
            bytes: vec![0xff; len.div_ceil(8)],
            len,
        };
        bitset.clear_spare_bits();
        bitset
    }

    /// Build from a peer's advertised bitfield, trimmed to exactly `len` bits.
    pub fn from_bytes(data: &[u8], len: usize) -> Self {
        let mut bytes = data.to_vec();
        bytes.resize(len.div_ceil(8), 0);
        let mut bitset = Self { bytes, len };
        bitset.clear_spare_bits();
        bitset
    }

    fn clear_spare_bits(&mut self) {
        let spare = self.bytes.len() * 8 - self.len;
        if let Some(last) = self.bytes.last_mut() {
            *last &= 0xffu8.checked_shl(spare as u32).unwrap_or(0);
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn test(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        (self.bytes[index / 8] >> (7 - index % 8)) & 1 == 1
    }

    pub fn set(&mut self, index: usize) {
        if index < self.len {
            self.bytes[index / 8] |= 1 << (7 - index % 8);
        }
    }

    pub fn clear(&mut self, index: usize) {
        if index < self.len {
            self.bytes[index / 8] &= !(1 << (7 - index % 8));
        }
    }

    /// Smallest clear index at or after `from`
    #[cfg(test)]
    pub fn next_clear(&self, from: usize) -> Option<usize> {
        (from..self.len).find(|&i| !self.test(i))
    }

    /// Smallest index at or after `from` that is set in `other` and clear here
    pub fn next_clear_in(&self, other: &Bitset, from: usize) -> Option<usize> {
        (from..self.len.min(other.len)).find(|&i| !self.test(i) && other.test(i))
    }

    pub fn count(&self) -> usize {
        self.bytes.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn all(&self) -> bool {
        self.count() == self.len
    }
}
