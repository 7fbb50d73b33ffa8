/// Seen-ID cache — message-id deduplication ring
///
/// A fixed-capacity ring of recently-seen message ids, held as an instance
/// field so each engine has its own independent dedup window.

/// Default ring capacity.
pub const ID_CACHE_SIZE: usize = 30;

/// A 4-byte message id.
pub type MsgId = [u8; 4];

/// The outcome of observing a message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observed {
    /// Not seen within the ring's current window.
    New,
    /// Already present in the ring.
    Duplicate,
}

/// Fixed-capacity ring of recently observed message ids.
///
/// Any id inserted within the last `capacity` inserts is reported as
/// `Duplicate` on re-observation; older ids may or may not be, since the
/// ring silently overwrites its oldest slot on insert.
#[derive(Debug, Clone)]
pub struct SeenIdCache {
    slots: Vec<Option<MsgId>>,
    next: usize,
}

impl SeenIdCache {
    /// Create a cache with the given ring capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
            next: 0,
        }
    }

    /// Ring capacity.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Observe a message id: report whether it was already present, then
    /// insert it (overwriting the oldest slot if it was new).
    pub fn observe(&mut self, id: MsgId) -> Observed {
        if self.slots.iter().any(|slot| *slot == Some(id)) {
            return Observed::Duplicate;
        }

        self.slots[self.next] = Some(id);
        self.next = (self.next + 1) % self.slots.len();
        Observed::New
    }
}

impl Default for SeenIdCache {
    fn default() -> Self {
        Self::new(ID_CACHE_SIZE)
    }
}
