//! Process-local cache store.
//!
//! Used when Redis is disabled and by tests. Supports outage simulation so
//! fail-open behaviour can be exercised without a network store.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

use super::store::{CacheError, CacheStore, ConnectionState, transition};

const MODE: &str = "local";

/// DashMap-backed cache store. Connected from construction.
pub struct MemoryCacheStore {
    entries: DashMap<String, Vec<u8>>,
    state: watch::Sender<ConnectionState>,
    failing: AtomicBool,
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Connected);
        Self {
            entries: DashMap::new(),
            state,
            failing: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent operation fail while the reported state stays
    /// `Connected`, i.e. a store that accepts connections but errors on use.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Forces a connection state, as a network store's supervisor would.
    pub fn set_state(&self, state: ConnectionState) {
        transition(&self.state, state, MODE);
    }

    /// Reads an entry without going through the trait (no failure injection).
    pub fn peek(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Writes an entry without going through the trait (no failure injection).
    pub fn insert_raw(&self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::Backend("simulated cache failure".into()));
        }
        if !self.state().is_available() {
            return Err(CacheError::Unavailable(self.state().to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.check()?;
        Ok(self.peek(key))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        self.check()?;
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.check()?;
        self.entries.remove(key);
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn mode(&self) -> &'static str {
        MODE
    }
}
