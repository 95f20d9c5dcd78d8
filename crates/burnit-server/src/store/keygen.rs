use uuid::Uuid;

/// Length of keys produced by [`TimeOrderedKeys`].
pub const KEY_LEN: usize = 32;

/// Source of retrieval keys.
///
/// Implementations must not perform I/O and must not fail. The store does not
/// look a key up before inserting it, so collision-freedom of the generator is
/// the first line of defence; the backend's duplicate-key check is the second.
pub trait KeyGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// UUIDv7 keys rendered as 32 lowercase hex characters.
///
/// 48 bits of millisecond timestamp followed by a per-process monotonic
/// counter and random bits (74 bits that are not the timestamp), so keys sort
/// by creation time and need no escaping in a URL path.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimeOrderedKeys;

impl KeyGenerator for TimeOrderedKeys {
    fn generate(&self) -> String {
        Uuid::now_v7().simple().to_string()
    }
}
