use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A secret as held by a storage backend.
///
/// Payloads are stored as plaintext; the store is a blind relay. The payload
/// buffer is wiped when the record is dropped, so callers that hand the
/// content onwards must `take_contents` rather than clone it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SecretRecord {
    /// Retrieval key. Unique across live records.
    pub key: String,
    /// Caller-supplied content (text or file bytes).
    pub payload: Vec<u8>,
    /// Optional filename, carried as opaque metadata.
    pub filename: Option<String>,
    /// Unix timestamp (seconds) when the record was created.
    pub created_at: i64,
    /// Optional Unix timestamp (seconds) after which the record reads as gone.
    pub expires_at: Option<i64>,
}

impl SecretRecord {
    pub fn new(
        key: String,
        payload: Vec<u8>,
        filename: Option<String>,
        created_at: i64,
        expires_at: Option<i64>,
    ) -> Self {
        Self {
            key,
            payload,
            filename,
            created_at,
            expires_at,
        }
    }

    /// Returns true if the record carries a TTL that has elapsed at `now`.
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(exp) if now >= exp)
    }

    /// Move the payload and filename out, leaving the record empty.
    pub fn take_contents(&mut self) -> ConsumedSecret {
        ConsumedSecret {
            payload: std::mem::take(&mut self.payload),
            filename: self.filename.take(),
        }
    }
}

/// What a successful read hands back to exactly one caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedSecret {
    pub payload: Vec<u8>,
    pub filename: Option<String>,
}

/// Input to a create: everything the caller chooses.
#[derive(Debug, Clone, Default)]
pub struct NewSecret {
    pub payload: Vec<u8>,
    pub filename: Option<String>,
    /// Time-to-live in seconds. `None` means consume-only.
    pub ttl_seconds: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record(expires_at: Option<i64>) -> SecretRecord {
        SecretRecord::new(
            "k".into(),
            b"payload".to_vec(),
            Some("note.txt".into()),
            1000,
            expires_at,
        )
    }

    #[test]
    fn no_ttl_never_expires() {
        let r = make_record(None);
        assert!(!r.is_expired(i64::MAX));
    }

    #[test]
    fn expires_at_boundary() {
        let r = make_record(Some(2000));
        assert!(!r.is_expired(1999));
        assert!(r.is_expired(2000));
    }

    #[test]
    fn take_contents_empties_record() {
        let mut r = make_record(None);
        let out = r.take_contents();
        assert_eq!(out.payload, b"payload");
        assert_eq!(out.filename.as_deref(), Some("note.txt"));
        assert!(r.payload.is_empty());
        assert!(r.filename.is_none());
    }
}
