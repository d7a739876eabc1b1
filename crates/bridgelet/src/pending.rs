//! Pending-response table: the correlation engine.
//!
//! Turns the one-way fire-and-forget channel into a request/response
//! abstraction: every outbound request allocates a monotonically increasing
//! id here, and the matching inbound `responseID` consumes the stored
//! callback. There is no timeout, retry, or acknowledgement layer beneath
//! this; an entry whose response never arrives is reclaimed only by a
//! reset.

use std::collections::BTreeMap;

use serde_json::Value;

/// One-shot callback awaiting a response payload.
pub type ResponseCallback = Box<dyn FnOnce(Value) + Send + 'static>;

pub struct PendingResponses {
    next_id: u64,
    generation: u64,
    limit: Option<usize>,
    // Ids are monotonic, so the first key is always the oldest entry.
    entries: BTreeMap<u64, ResponseCallback>,
}

impl PendingResponses {
    /// Unbounded table.
    pub fn new() -> Self {
        Self::with_limit(None)
    }

    /// Bounded table: `allocate` evicts the oldest entry once `limit` is
    /// reached. Used host-side against a guest that never signals reset.
    /// A limit of 0 is clamped to 1; every allocation must be able to hold
    /// its own entry.
    pub fn bounded(limit: usize) -> Self {
        Self::with_limit(Some(limit.max(1)))
    }

    fn with_limit(limit: Option<usize>) -> Self {
        Self {
            next_id: 0,
            generation: 0,
            limit,
            entries: BTreeMap::new(),
        }
    }

    /// Store a callback under the next unused id and return that id.
    ///
    /// Called exactly once per outbound request-style envelope; the returned
    /// id becomes the envelope's `id`. Ids are never reused within a bridge
    /// instance's lifetime, even across resets.
    pub fn allocate(&mut self, callback: ResponseCallback) -> u64 {
        if let Some(limit) = self.limit {
            while self.entries.len() >= limit {
                if let Some((evicted, _)) = self.entries.pop_first() {
                    tracing::warn!(id = evicted, limit, "pending table full, evicting oldest entry");
                }
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, callback);
        id
    }

    /// Remove and return the callback for `id`.
    ///
    /// `None` marks a protocol anomaly (a defunct or forged id); callers log
    /// and drop. The callback is handed back rather than invoked here so the
    /// caller can release its own lock first: response callbacks may
    /// re-enter the bridge.
    pub fn resolve(&mut self, id: u64) -> Option<ResponseCallback> {
        self.entries.remove(&id)
    }

    /// Discard every pending entry without invoking it.
    ///
    /// A generation bump invalidating all outstanding ids at once, triggered
    /// when the remote context is known to have been recreated. Idempotent:
    /// a second call in succession observes an empty table and does nothing.
    pub fn reset_all(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        tracing::debug!(
            discarded = self.entries.len(),
            generation = self.generation,
            "flushing pending response callbacks"
        );
        self.entries.clear();
        self.generation += 1;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of flushes this table has seen.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Default for PendingResponses {
    fn default() -> Self {
        Self::new()
    }
}
