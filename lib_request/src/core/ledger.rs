//! # Retry Ledger
//!
//! Per-identity bookkeeping of how many times a request has been re-submitted.
//! An entry lives exactly as long as its request has a queued or in-flight
//! task; the dispatcher discards it on terminal success or failure.

use std::collections::HashMap;

use super::error::LedgerError;
use super::request::{RequestDescriptor, RequestId, RequestParams};

#[derive(Debug, Clone)]
struct LedgerEntry {
    retry_count: u32,
    params: RequestParams,
}

/// Tracks attempts made per [`RequestId`].
#[derive(Debug, Default)]
pub struct RetryLedger {
    entries: HashMap<RequestId, LedgerEntry>,
}

impl RetryLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a freshly submitted request with a retry count of zero.
    ///
    /// Registering an identity twice resets its entry.
    pub fn register(&mut self, id: RequestId, params: RequestParams) {
        self.entries.insert(
            id,
            LedgerEntry {
                retry_count: 0,
                params,
            },
        );
    }

    /// True iff `id` is tracked and has been retried fewer than `max_retry` times.
    pub fn should_retry(&self, id: RequestId, max_retry: u32) -> bool {
        self.entries
            .get(&id)
            .is_some_and(|entry| entry.retry_count < max_retry)
    }

    /// Increments the retry count of `id` and returns the descriptor of the
    /// next attempt: same identity, original parameters, new count.
    ///
    /// # Errors
    /// Returns [`LedgerError::NotFound`] if `id` was never registered or has
    /// already been discarded.
    pub fn bump(&mut self, id: RequestId) -> Result<RequestDescriptor, LedgerError> {
        let entry = self.entries.get_mut(&id).ok_or(LedgerError::NotFound(id))?;
        entry.retry_count += 1;
        Ok(RequestDescriptor {
            id,
            retry_count: entry.retry_count,
            params: entry.params.clone(),
        })
    }

    /// Forgets `id`. Unknown identities are ignored.
    pub fn discard(&mut self, id: RequestId) {
        self.entries.remove(&id);
    }

    /// True if `id` has an outstanding task.
    pub fn contains(&self, id: RequestId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Current retry count of `id`, if tracked.
    pub fn retry_count(&self, id: RequestId) -> Option<u32> {
        self.entries.get(&id).map(|entry| entry.retry_count)
    }

    /// Number of tracked identities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u64) -> RequestId {
        RequestId::new(raw)
    }

    #[test]
    fn register_starts_at_zero() {
        let mut ledger = RetryLedger::new();
        ledger.register(id(1), RequestParams::get("/a"));

        assert!(ledger.contains(id(1)));
        assert_eq!(ledger.retry_count(id(1)), Some(0));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn should_retry_respects_the_limit() {
        let mut ledger = RetryLedger::new();
        ledger.register(id(1), RequestParams::get("/a"));

        assert!(ledger.should_retry(id(1), 2));
        ledger.bump(id(1)).unwrap();
        assert!(ledger.should_retry(id(1), 2));
        ledger.bump(id(1)).unwrap();
        assert!(!ledger.should_retry(id(1), 2));
    }

    #[test]
    fn zero_limit_never_retries() {
        let mut ledger = RetryLedger::new();
        ledger.register(id(1), RequestParams::get("/a"));
        assert!(!ledger.should_retry(id(1), 0));
    }

    #[test]
    fn unknown_identity_never_retries() {
        let ledger = RetryLedger::new();
        assert!(!ledger.should_retry(id(9), 5));
    }

    #[test]
    fn bump_keeps_identity_and_params() {
        let mut ledger = RetryLedger::new();
        let params = RequestParams::post("/orders", serde_json::json!({"qty": 3}));
        ledger.register(id(4), params.clone());

        let first = ledger.bump(id(4)).unwrap();
        let second = ledger.bump(id(4)).unwrap();

        assert_eq!(first.id, id(4));
        assert_eq!(first.retry_count, 1);
        assert_eq!(second.retry_count, 2);
        assert_eq!(second.params, params);
    }

    #[test]
    fn bump_unknown_identity_fails() {
        let mut ledger = RetryLedger::new();
        assert_eq!(ledger.bump(id(3)), Err(LedgerError::NotFound(id(3))));
    }

    #[test]
    fn discard_removes_the_entry() {
        let mut ledger = RetryLedger::new();
        ledger.register(id(1), RequestParams::get("/a"));
        ledger.discard(id(1));
        ledger.discard(id(1));

        assert!(ledger.is_empty());
        assert!(ledger.bump(id(1)).is_err());
    }
}
