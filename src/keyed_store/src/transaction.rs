use kvfs_lib::FsResult;

/// Read-only view over a store. `get` takes `&mut self` so adapters that
/// record observed values on first touch can do so without interior
/// mutability.
pub trait ReadTransaction {
    /// Absent (`None`) is distinct from an empty blob.
    fn get(&mut self, key: &str) -> FsResult<Option<Vec<u8>>>;
}

/// Read-write transaction. Everything staged between `begin_write` and
/// `commit` either lands atomically or, after `abort`, leaves the store
/// observably unchanged.
pub trait WriteTransaction: ReadTransaction {
    /// Store `value` under `key`. With `overwrite` false an existing key is
    /// left untouched and `Ok(false)` is returned; with `overwrite` true the
    /// write always lands barring a store error.
    fn put(&mut self, key: &str, value: &[u8], overwrite: bool) -> FsResult<bool>;

    fn del(&mut self, key: &str) -> FsResult<()>;

    fn commit(&mut self) -> FsResult<()>;

    fn abort(&mut self) -> FsResult<()>;
}

/// A named blob store with transactional access.
pub trait KeyValueStore: Send + Sync {
    fn name(&self) -> String;

    /// Drop every key in the store.
    fn clear(&self) -> FsResult<()>;

    fn begin_read(&self) -> FsResult<Box<dyn ReadTransaction + '_>>;

    fn begin_write(&self) -> FsResult<Box<dyn WriteTransaction + '_>>;
}
