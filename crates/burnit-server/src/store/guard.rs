/// Payload ceiling used when none is configured.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeCheck {
    Allowed,
    Rejected { limit: usize },
}

/// Byte-size ceiling applied before a key is minted.
#[derive(Debug, Clone, Copy)]
pub struct SizeGuard {
    limit: usize,
}

impl SizeGuard {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn check(&self, payload_size: usize) -> SizeCheck {
        if payload_size > self.limit {
            SizeCheck::Rejected { limit: self.limit }
        } else {
            SizeCheck::Allowed
        }
    }
}

impl Default for SizeGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD_BYTES)
    }
}
