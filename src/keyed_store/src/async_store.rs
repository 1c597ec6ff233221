use async_trait::async_trait;
use kvfs_lib::{FsError, FsResult};
use log::warn;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Async twin of [`crate::ReadTransaction`].
#[async_trait]
pub trait AsyncReadTransaction: Send {
    async fn get(&mut self, key: &str) -> FsResult<Option<Vec<u8>>>;
}

/// Async twin of [`crate::WriteTransaction`]. `commit` and `abort` are
/// themselves async; `put` reports whether the write landed.
#[async_trait]
pub trait AsyncWriteTransaction: AsyncReadTransaction {
    async fn put(&mut self, key: &str, value: &[u8], overwrite: bool) -> FsResult<bool>;

    async fn del(&mut self, key: &str) -> FsResult<()>;

    async fn commit(&mut self) -> FsResult<()>;

    async fn abort(&mut self) -> FsResult<()>;
}

/// A named blob store whose every operation suspends.
#[async_trait]
pub trait AsyncKeyValueStore: Send + Sync {
    fn name(&self) -> String;

    async fn clear(&self) -> FsResult<()>;

    async fn begin_read(&self) -> FsResult<Box<dyn AsyncReadTransaction>>;

    async fn begin_write(&self) -> FsResult<Box<dyn AsyncWriteTransaction>>;
}

/// Async unbuffered store contract; see [`crate::SimpleKeyValueStore`].
#[async_trait]
pub trait AsyncSimpleKeyValueStore: Send + Sync + 'static {
    fn name(&self) -> String;

    async fn clear(&self) -> FsResult<()>;

    async fn get(&self, key: &str) -> FsResult<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: &[u8], overwrite: bool) -> FsResult<bool>;

    async fn del(&self, key: &str) -> FsResult<()>;
}

/// Write-through transaction with an undo log over an async simple store.
/// Same discipline as the sync adapter: originals are stashed at first
/// touch, `commit` is a no-op, `abort` restores in reverse first-touch
/// order.
pub struct AsyncSimpleStoreTransaction<S: AsyncSimpleKeyValueStore> {
    store: Arc<S>,
    touched: Vec<String>,
    originals: HashMap<String, Option<Vec<u8>>>,
}

impl<S: AsyncSimpleKeyValueStore> AsyncSimpleStoreTransaction<S> {
    pub fn new(store: Arc<S>) -> Self {
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

    async fn capture(&mut self, key: &str) -> FsResult<()> {
        if self.originals.contains_key(key) {
            return Ok(());
        }
        let current = self.store.get(key).await?;
        self.stash_original(key, current);
        Ok(())
    }
}

#[async_trait]
impl<S: AsyncSimpleKeyValueStore> AsyncReadTransaction for AsyncSimpleStoreTransaction<S> {
    async fn get(&mut self, key: &str) -> FsResult<Option<Vec<u8>>> {
        let value = self.store.get(key).await?;
        self.stash_original(key, value.clone());
        Ok(value)
    }
}

#[async_trait]
impl<S: AsyncSimpleKeyValueStore> AsyncWriteTransaction for AsyncSimpleStoreTransaction<S> {
    async fn put(&mut self, key: &str, value: &[u8], overwrite: bool) -> FsResult<bool> {
        self.capture(key).await?;
        self.store.put(key, value, overwrite).await
    }

    async fn del(&mut self, key: &str) -> FsResult<()> {
        self.capture(key).await?;
        self.store.del(key).await
    }

    async fn commit(&mut self) -> FsResult<()> {
        Ok(())
    }

    async fn abort(&mut self) -> FsResult<()> {
        let keys: Vec<String> = self.touched.drain(..).rev().collect();
        for key in keys {
            let original = self.originals.remove(&key).flatten();
            let result = match original {
                Some(value) => self.store.put(&key, &value, true).await.map(|_| ()),
                None => self.store.del(&key).await,
            };
            if let Err(e) = result {
                warn!("abort: failed to restore key {}: {}", key, e);
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Adapts an [`AsyncSimpleKeyValueStore`] to [`AsyncKeyValueStore`].
pub struct AsyncSimpleTransactionStore<S: AsyncSimpleKeyValueStore> {
    inner: Arc<S>,
}

impl<S: AsyncSimpleKeyValueStore> AsyncSimpleTransactionStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: AsyncSimpleKeyValueStore> AsyncKeyValueStore for AsyncSimpleTransactionStore<S> {
    fn name(&self) -> String {
        self.inner.name()
    }

    async fn clear(&self) -> FsResult<()> {
        self.inner.clear().await
    }

    async fn begin_read(&self) -> FsResult<Box<dyn AsyncReadTransaction>> {
        Ok(Box::new(AsyncSimpleStoreTransaction::new(
            self.inner.clone(),
        )))
    }

    async fn begin_write(&self) -> FsResult<Box<dyn AsyncWriteTransaction>> {
        Ok(Box::new(AsyncSimpleStoreTransaction::new(
            self.inner.clone(),
        )))
    }
}

/// In-memory async simple store. The lock is never held across an await.
pub struct AsyncMemoryStore {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl AsyncMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn key_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn snapshot(&self) -> HashMap<String, Vec<u8>> {
        self.entries.lock().unwrap().clone()
    }

    fn lock_entries(&self) -> FsResult<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.entries
            .lock()
            .map_err(|e| FsError::DbError(format!("store lock poisoned: {}", e)))
    }
}

impl Default for AsyncMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AsyncSimpleKeyValueStore for AsyncMemoryStore {
    fn name(&self) -> String {
        "async-memory".to_string()
    }

    async fn clear(&self) -> FsResult<()> {
        self.lock_entries()?.clear();
        Ok(())
    }

    async fn get(&self, key: &str) -> FsResult<Option<Vec<u8>>> {
        Ok(self.lock_entries()?.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8], overwrite: bool) -> FsResult<bool> {
        let mut entries = self.lock_entries()?;
        if !overwrite && entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), value.to_vec());
        Ok(true)
    }

    async fn del(&self, key: &str) -> FsResult<()> {
        self.lock_entries()?.remove(key);
        Ok(())
    }
}
