//! Cloud tier (L3): optional remote key/value store
//!
//! The storage medium is an external collaborator behind the
//! [`RemoteStore`] trait. When no store is attached the tier answers
//! every probe with a miss; it is never an error. All remote calls run
//! on a dedicated worker thread and the caller waits with a deadline,
//! so a stalled backend degrades to a miss/timeout instead of hanging
//! the foreground operation.

use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Sender, bounded};
use dashmap::DashMap;
use log::{debug, warn};

use crate::cache::entry::{CacheEntry, now_ns};
use crate::cache::traits::CacheOperationError;

/// Byte-addressable remote store contract
pub trait RemoteStore: Send + Sync + 'static {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CacheOperationError>;
    fn write(&self, key: &str, data: &[u8]) -> Result<(), CacheOperationError>;
    fn delete(&self, key: &str) -> Result<(), CacheOperationError>;
    fn list(&self) -> Result<Vec<String>, CacheOperationError>;
    fn clear(&self) -> Result<(), CacheOperationError>;
}

/// In-memory remote store used in tests and as a reference backend
#[derive(Debug, Default)]
pub struct InMemoryRemoteStore {
    objects: DashMap<String, Vec<u8>>,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

impl RemoteStore for InMemoryRemoteStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CacheOperationError> {
        Ok(self.objects.get(key).map(|data| data.clone()))
    }

    fn write(&self, key: &str, data: &[u8]) -> Result<(), CacheOperationError> {
        self.objects.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CacheOperationError> {
        self.objects.remove(key);
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, CacheOperationError> {
        Ok(self.objects.iter().map(|o| o.key().clone()).collect())
    }

    fn clear(&self) -> Result<(), CacheOperationError> {
        self.objects.clear();
        Ok(())
    }
}

type RemoteResult = Result<Option<Vec<u8>>, CacheOperationError>;

enum RemoteOp {
    Read {
        key: String,
        response: Sender<RemoteResult>,
    },
    Write {
        key: String,
        data: Vec<u8>,
        response: Sender<Result<(), CacheOperationError>>,
    },
    Delete {
        key: String,
        response: Sender<Result<(), CacheOperationError>>,
    },
    Clear {
        response: Sender<Result<(), CacheOperationError>>,
    },
    Shutdown,
}

/// Locally tracked access metadata for remote entries
#[derive(Debug, Clone, Copy, Default)]
struct RemoteAccess {
    access_count: u64,
    last_access_ns: u64,
}

pub struct CloudTier {
    ops: Option<Sender<RemoteOp>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    /// Access metadata observed by this instance; the remote copy stays
    /// as stored
    access: DashMap<String, RemoteAccess>,
    op_timeout: Duration,
}

impl CloudTier {
    /// Build the tier; `store` of `None` yields an always-miss tier
    pub fn new(store: Option<Arc<dyn RemoteStore>>, op_timeout: Duration) -> Self {
        let (ops, worker) = match store {
            Some(store) => {
                let (tx, rx) = bounded::<RemoteOp>(64);
                let handle = thread::spawn(move || {
                    while let Ok(op) = rx.recv() {
                        match op {
                            RemoteOp::Read { key, response } => {
                                let _ = response.send(store.read(&key));
                            }
                            RemoteOp::Write {
                                key,
                                data,
                                response,
                            } => {
                                let _ = response.send(store.write(&key, &data));
                            }
                            RemoteOp::Delete { key, response } => {
                                let _ = response.send(store.delete(&key));
                            }
                            RemoteOp::Clear { response } => {
                                let _ = response.send(store.clear());
                            }
                            RemoteOp::Shutdown => break,
                        }
                    }
                });
                (Some(tx), Some(handle))
            }
            None => (None, None),
        };
        Self {
            ops,
            worker: Mutex::new(worker),
            access: DashMap::new(),
            op_timeout,
        }
    }

    /// Whether a remote store is attached
    pub fn is_attached(&self) -> bool {
        self.ops.is_some()
    }

    fn send_and_wait<T>(
        &self,
        build: impl FnOnce(Sender<T>) -> RemoteOp,
        rx_of: Sender<T>,
        rx: crossbeam_channel::Receiver<T>,
    ) -> Result<Option<T>, CacheOperationError>
    where
        T: Send + 'static,
    {
        let Some(ops) = &self.ops else {
            return Ok(None);
        };
        ops.send(build(rx_of))
            .map_err(|_| CacheOperationError::storage_failed("cloud worker is gone"))?;
        match rx.recv_timeout(self.op_timeout) {
            Ok(result) => Ok(Some(result)),
            Err(_) => {
                warn!("cloud tier: operation timed out after {:?}", self.op_timeout);
                Err(CacheOperationError::TimeoutError)
            }
        }
    }

    /// Ship an entry to the remote store
    pub fn store(&self, entry: &CacheEntry) -> Result<(), CacheOperationError> {
        if self.ops.is_none() {
            return Ok(());
        }
        let data = bincode::encode_to_vec(entry, bincode::config::standard())
            .map_err(|e| CacheOperationError::serialization_failed(e.to_string()))?;
        let (tx, rx) = bounded(1);
        let key = entry.key.clone();
        match self.send_and_wait(
            |response| RemoteOp::Write {
                key,
                data,
                response,
            },
            tx,
            rx,
        )? {
            Some(result) => result,
            None => Ok(()),
        }
    }

    /// Fetch an entry; absence of a store or a timeout is a miss
    pub fn retrieve(&self, key: &str) -> Result<Option<CacheEntry>, CacheOperationError> {
        if self.ops.is_none() {
            return Ok(None);
        }
        let (tx, rx) = bounded(1);
        let owned_key = key.to_string();
        let fetched = match self.send_and_wait(
            |response| RemoteOp::Read {
                key: owned_key,
                response,
            },
            tx,
            rx,
        ) {
            Ok(Some(result)) => result?,
            Ok(None) => None,
            // Stalled remote degrades to a miss on the read path
            Err(CacheOperationError::TimeoutError) => return Ok(None),
            Err(e) => return Err(e),
        };

        let Some(data) = fetched else {
            return Ok(None);
        };
        let (mut entry, _): (CacheEntry, usize) =
            bincode::decode_from_slice(&data, bincode::config::standard())
                .map_err(|e| CacheOperationError::corruption(e.to_string()))?;

        let now = now_ns();
        if entry.is_expired(now) {
            let _ = self.remove(key);
            return Ok(None);
        }

        // Merge locally observed access history into the returned copy.
        // The returned last-access is the access before this one, so
        // promotion decisions see the entry's real idle time instead of
        // the bump this retrieve just made.
        let mut slot = self.access.entry(key.to_string()).or_default();
        let previous_access_ns = slot.last_access_ns.max(entry.last_access_ns);
        slot.access_count = slot.access_count.max(entry.access_count) + 1;
        slot.last_access_ns = now;
        entry.access_count = slot.access_count;
        entry.last_access_ns = previous_access_ns;
        debug!("cloud tier: hit for {:?}", key);
        Ok(Some(entry))
    }

    /// Record an access without fetching (used after promotions)
    pub fn update_access(&self, key: &str) {
        if self.ops.is_none() {
            return;
        }
        let mut slot = self.access.entry(key.to_string()).or_default();
        slot.access_count += 1;
        slot.last_access_ns = now_ns();
    }

    pub fn remove(&self, key: &str) -> Result<(), CacheOperationError> {
        self.access.remove(key);
        let (tx, rx) = bounded(1);
        let owned_key = key.to_string();
        match self.send_and_wait(
            |response| RemoteOp::Delete {
                key: owned_key,
                response,
            },
            tx,
            rx,
        )? {
            Some(result) => result,
            None => Ok(()),
        }
    }

    pub fn clear(&self) -> Result<(), CacheOperationError> {
        self.access.clear();
        let (tx, rx) = bounded(1);
        match self.send_and_wait(|response| RemoteOp::Clear { response }, tx, rx)? {
            Some(result) => result,
            None => Ok(()),
        }
    }
}

impl Drop for CloudTier {
    fn drop(&mut self) {
        if let Some(ops) = &self.ops {
            let _ = ops.send(RemoteOp::Shutdown);
        }
        if let Ok(mut guard) = self.worker.lock()
            && let Some(handle) = guard.take()
        {
            let _ = handle.join();
        }
    }
}
