//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::cache::keys::pattern_matches;
use crate::cache::{Cache, CacheError, CacheResult};
use crate::domain::{Book, BookFilter, Entity, User, UserFilter};
use crate::lifecycle::Closable;
use crate::messaging::{Broker, BrokerError, BrokerMessage};
use crate::repository::{Repository, StoreError, StoreResult};

/// Shared record of `close()` calls, in call order.
#[derive(Clone, Default)]
pub struct CloseLog(Arc<Mutex<Vec<&'static str>>>);

impl CloseLog {
    pub fn record(&self, name: &'static str) {
        self.0.lock().unwrap().push(name);
    }

    pub fn entries(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().clone()
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
    close_log: Option<CloseLog>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_close_log(close_log: CloseLog) -> Self {
        Self {
            close_log: Some(close_log),
            ..Self::default()
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.live(key).is_some()
    }

    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.live(key)
    }

    pub fn put_raw(&self, key: &str, value: &[u8]) {
        self.entries.lock().unwrap().insert(
            key.to_string(),
            (value.to_vec(), Instant::now() + Duration::from_secs(3600)),
        );
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .unwrap()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    fn live(&self, key: &str) -> Option<Vec<u8>> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some((_, deadline)) if *deadline <= Instant::now() => {
                entries.remove(key);
                None
            }
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        Ok(self.live(key))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_vec(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.live(key).is_some())
    }

    async fn delete_pattern(&self, pattern: &str) -> CacheResult<()> {
        self.entries
            .lock()
            .unwrap()
            .retain(|key, _| !pattern_matches(pattern, key));
        Ok(())
    }
}

#[async_trait]
impl Closable for MemoryCache {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn close(&self) -> anyhow::Result<()> {
        if let Some(log) = &self.close_log {
            log.record(self.name());
        }
        Ok(())
    }
}

/// A cache that is down: every call fails.
#[derive(Default)]
pub struct FailingCache {
    close_log: Option<CloseLog>,
}

impl FailingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_close_log(close_log: CloseLog) -> Self {
        Self {
            close_log: Some(close_log),
        }
    }

    fn down<T>() -> CacheResult<T> {
        Err(CacheError::Connection("connection refused".to_string()))
    }
}

#[async_trait]
impl Cache for FailingCache {
    async fn get(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
        Self::down()
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> CacheResult<()> {
        Self::down()
    }

    async fn delete(&self, _key: &str) -> CacheResult<()> {
        Self::down()
    }

    async fn exists(&self, _key: &str) -> CacheResult<bool> {
        Self::down()
    }

    async fn delete_pattern(&self, _pattern: &str) -> CacheResult<()> {
        Self::down()
    }
}

#[async_trait]
impl Closable for FailingCache {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn close(&self) -> anyhow::Result<()> {
        if let Some(log) = &self.close_log {
            log.record(self.name());
        }
        anyhow::bail!("connection refused")
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

type Matcher<E> = fn(&E, &<E as Entity>::Filter) -> bool;

/// Store over a `HashMap`, counting calls per operation.
pub struct MemoryStore<E: Entity> {
    rows: Mutex<HashMap<Uuid, E>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    matcher: Matcher<E>,
    unavailable: AtomicBool,
    failing: Mutex<HashSet<&'static str>>,
    close_log: Option<CloseLog>,
}

impl<E: Entity> MemoryStore<E> {
    fn with_matcher(matcher: Matcher<E>) -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            matcher,
            unavailable: AtomicBool::new(false),
            failing: Mutex::new(HashSet::new()),
            close_log: None,
        }
    }

    pub fn close_log(mut self, close_log: CloseLog) -> Self {
        self.close_log = Some(close_log);
        self
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.calls.lock().unwrap().get(operation).copied().unwrap_or(0)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail only `operation`, leaving the others working
    pub fn fail_operation(&self, operation: &'static str, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(operation);
        } else {
            set.remove(operation);
        }
    }

    fn enter(&self, operation: &'static str) -> StoreResult<()> {
        *self.calls.lock().unwrap().entry(operation).or_default() += 1;
        if self.unavailable.load(Ordering::SeqCst)
            || self.failing.lock().unwrap().contains(operation)
        {
            return Err(StoreError::Unavailable("store is down".to_string()));
        }
        Ok(())
    }
}

impl MemoryStore<Book> {
    pub fn books() -> Self {
        Self::with_matcher(|book: &Book, filter: &BookFilter| {
            filter.author().map_or(true, |author| book.author == author)
                && filter.genre().map_or(true, |genre| book.genre == genre)
        })
    }
}

impl MemoryStore<User> {
    pub fn users() -> Self {
        Self::with_matcher(|user: &User, filter: &UserFilter| {
            filter.is_admin.map_or(true, |is_admin| user.is_admin == is_admin)
        })
    }
}

#[async_trait]
impl<E: Entity> Repository<E> for MemoryStore<E> {
    async fn create(&self, mut entity: E) -> StoreResult<E> {
        self.enter("create")?;
        entity.ensure_id();
        self.rows.lock().unwrap().insert(entity.id(), entity.clone());
        Ok(entity)
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<E> {
        self.enter("get_by_id")?;
        self.rows
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(E::KIND, id))
    }

    async fn get_by_field(&self, field: E::Field, value: &str) -> StoreResult<E> {
        self.enter("get_by_field")?;
        self.rows
            .lock()
            .unwrap()
            .values()
            .find(|entity| entity.field_value(field) == value)
            .cloned()
            .ok_or_else(|| StoreError::not_found(E::KIND, value))
    }

    async fn update(&self, entity: E) -> StoreResult<E> {
        self.enter("update")?;
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&entity.id()) {
            Some(row) => {
                *row = entity.clone();
                Ok(entity)
            }
            None => Err(StoreError::not_found(E::KIND, entity.id())),
        }
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        self.enter("delete")?;
        self.rows
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(E::KIND, id))
    }

    async fn list(&self, filter: &E::Filter) -> StoreResult<Vec<E>> {
        self.enter("list")?;
        let mut found: Vec<E> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|entity| (self.matcher)(entity, filter))
            .cloned()
            .collect();
        found.sort_by_key(|entity| entity.id());
        Ok(found)
    }
}

#[async_trait]
impl<E: Entity> Closable for MemoryStore<E> {
    fn name(&self) -> &'static str {
        "store"
    }

    async fn close(&self) -> anyhow::Result<()> {
        if let Some(log) = &self.close_log {
            log.record(self.name());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

/// Single-partition broker over an unbounded channel.
pub struct MemoryBroker {
    tx: Mutex<Option<mpsc::UnboundedSender<BrokerMessage>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<BrokerMessage>>,
    next_offset: AtomicI64,
    fail_publishes: AtomicBool,
    fail_next_receive: AtomicBool,
    closed: AtomicBool,
    close_log: Option<CloseLog>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            next_offset: AtomicI64::new(0),
            fail_publishes: AtomicBool::new(false),
            fail_next_receive: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_log: None,
        }
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_close_log(close_log: CloseLog) -> Self {
        Self {
            close_log: Some(close_log),
            ..Self::default()
        }
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// The next `receive` returns a transport error
    pub fn fail_next_receive(&self) {
        self.fail_next_receive.store(true, Ordering::SeqCst);
    }

    /// Enqueue bytes as if another producer had sent them
    pub fn inject_raw(&self, key: &str, payload: Vec<u8>) {
        self.push(key, payload);
    }

    /// Drop the sending side; pending and future receives fail once the
    /// queue is drained
    pub fn disconnect(&self) {
        self.tx.lock().unwrap().take();
    }

    /// Messages accepted so far, injected ones included
    pub fn sent_count(&self) -> i64 {
        self.next_offset.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn push(&self, key: &str, payload: Vec<u8>) -> bool {
        let message = BrokerMessage {
            key: Some(key.to_string()),
            payload,
            partition: 0,
            offset: self.next_offset.fetch_add(1, Ordering::SeqCst),
        };
        match self.tx.lock().unwrap().as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, key: &str, payload: &[u8]) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(BrokerError::Publish("broker unreachable".to_string()));
        }
        if self.push(key, payload.to_vec()) {
            Ok(())
        } else {
            Err(BrokerError::Closed)
        }
    }

    async fn receive(&self) -> Result<BrokerMessage, BrokerError> {
        if self.fail_next_receive.swap(false, Ordering::SeqCst) {
            return Err(BrokerError::Receive("connection reset".to_string()));
        }
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(BrokerError::Closed)
    }
}

#[async_trait]
impl Closable for MemoryBroker {
    fn name(&self) -> &'static str {
        "broker"
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(log) = &self.close_log {
            log.record(self.name());
        }
        Ok(())
    }
}
