use crate::{KeyValueStore, ReadTransaction, WriteTransaction};
use kvfs_lib::FsResult;
use log::warn;
use std::collections::HashMap;

/// Unbuffered store contract: plain `get`/`put`/`del` with no transactional
/// semantics of its own. Wrap with [`SimpleTransactionStore`] to get the
/// transactional surface.
pub trait SimpleKeyValueStore: Send + Sync {
    fn name(&self) -> String;

    fn clear(&self) -> FsResult<()>;

    fn get(&self, key: &str) -> FsResult<Option<Vec<u8>>>;

    /// Returns whether the write landed. `overwrite` false on an existing
    /// key returns `Ok(false)` without touching the store.
    fn put(&self, key: &str, value: &[u8], overwrite: bool) -> FsResult<bool>;

    fn del(&self, key: &str) -> FsResult<()>;
}

/// Write-through transaction over a simple store. Every mutation hits the
/// store immediately; the original value of each touched key (or its
/// absence) is stashed once so `abort` can walk the keys back.
///
/// Single-threaded use per transaction; concurrent transactions over the
/// same keys are not supported.
pub struct SimpleStoreTransaction<'a, S: SimpleKeyValueStore> {
    store: &'a S,
    /// Keys in first-touch order.
    touched: Vec<String>,
    /// Value observed at first touch; `None` marks a key that was absent.
    originals: HashMap<String, Option<Vec<u8>>>,
}

impl<'a, S: SimpleKeyValueStore> SimpleStoreTransaction<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            touched: Vec::new(),
            originals: HashMap::new(),
        }
    }

    fn stash_original(&mut self, key: &str, value: Option<Vec<u8>>) {
        if !self.originals.contains_key(key) {
            self.touched.push(key.to_string());
            self.originals.insert(key.to_string(), value);
        }
    }

    /// Capture the key's current store value if this is its first touch.
    fn capture(&mut self, key: &str) -> FsResult<()> {
        if self.originals.contains_key(key) {
            return Ok(());
        }
        let current = self.store.get(key)?;
        self.stash_original(key, current);
        Ok(())
    }
}

impl<S: SimpleKeyValueStore> ReadTransaction for SimpleStoreTransaction<'_, S> {
    fn get(&mut self, key: &str) -> FsResult<Option<Vec<u8>>> {
        let value = self.store.get(key)?;
        self.stash_original(key, value.clone());
        Ok(value)
    }
}

impl<S: SimpleKeyValueStore> WriteTransaction for SimpleStoreTransaction<'_, S> {
    fn put(&mut self, key: &str, value: &[u8], overwrite: bool) -> FsResult<bool> {
        self.capture(key)?;
        self.store.put(key, value, overwrite)
    }

    fn del(&mut self, key: &str) -> FsResult<()> {
        self.capture(key)?;
        self.store.del(key)
    }

    fn commit(&mut self) -> FsResult<()> {
        // Writes already landed; nothing staged.
        Ok(())
    }

    fn abort(&mut self) -> FsResult<()> {
        // Reverse first-touch order, restoring each key exactly once.
        for key in self.touched.drain(..).rev() {
            let original = self.originals.remove(&key).flatten();
            let result = match original {
                Some(value) => self.store.put(&key, &value, true).map(|_| ()),
                None => self.store.del(&key),
            };
            if let Err(e) = result {
                warn!("abort: failed to restore key {}: {}", key, e);
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Adapts any [`SimpleKeyValueStore`] to the transactional [`KeyValueStore`]
/// contract via [`SimpleStoreTransaction`].
pub struct SimpleTransactionStore<S: SimpleKeyValueStore> {
    inner: S,
}

impl<S: SimpleKeyValueStore> SimpleTransactionStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: SimpleKeyValueStore> KeyValueStore for SimpleTransactionStore<S> {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn clear(&self) -> FsResult<()> {
        self.inner.clear()
    }

    fn begin_read(&self) -> FsResult<Box<dyn ReadTransaction + '_>> {
        Ok(Box::new(SimpleStoreTransaction::new(&self.inner)))
    }

    fn begin_write(&self) -> FsResult<Box<dyn WriteTransaction + '_>> {
        Ok(Box::new(SimpleStoreTransaction::new(&self.inner)))
    }
}
