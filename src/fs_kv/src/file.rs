use crate::{AsyncKvFileSystem, KvFileSystem};
use keyed_store::{AsyncKeyValueStore, KeyValueStore};
use kvfs_lib::{now_millis, FileFlag, FileStats, FsError, FsResult};

/// Shared buffered-file state: the whole payload lives in memory and is
/// written back through the owning filesystem only on flush.
struct PreloadBuffer {
    path: String,
    flag: FileFlag,
    stats: FileStats,
    data: Vec<u8>,
    dirty: bool,
}

impl PreloadBuffer {
    fn new(path: String, flag: FileFlag, stats: FileStats, data: Vec<u8>) -> Self {
        Self {
            path,
            flag,
            stats,
            data,
            dirty: false,
        }
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> usize {
        let offset = offset as usize;
        if offset >= self.data.len() {
            return 0;
        }
        let n = std::cmp::min(buf.len(), self.data.len() - offset);
        buf[..n].copy_from_slice(&self.data[offset..offset + n]);
        n
    }

    fn write_at(&mut self, data: &[u8], offset: u64) -> FsResult<usize> {
        if !self.flag.is_writable() {
            return Err(FsError::PermissionDenied(self.path.clone()));
        }
        let end = offset as usize + data.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[offset as usize..end].copy_from_slice(data);
        self.stats.size = self.data.len() as u64;
        self.stats.mtime = now_millis();
        self.dirty = true;
        Ok(data.len())
    }

    fn truncate(&mut self, size: u64) -> FsResult<()> {
        if !self.flag.is_writable() {
            return Err(FsError::PermissionDenied(self.path.clone()));
        }
        self.data.resize(size as usize, 0);
        self.stats.size = size;
        self.stats.mtime = now_millis();
        self.dirty = true;
        Ok(())
    }
}

/// File handle over [`KvFileSystem`]. Reads and writes hit the in-memory
/// buffer; `flush` (or `close`) pushes the buffer and stats back through the
/// filesystem in one transaction.
pub struct KvFile<'fs, S: KeyValueStore> {
    fs: &'fs KvFileSystem<S>,
    inner: PreloadBuffer,
}

impl<'fs, S: KeyValueStore> KvFile<'fs, S> {
    pub(crate) fn new(
        fs: &'fs KvFileSystem<S>,
        path: String,
        flag: FileFlag,
        stats: FileStats,
        data: Vec<u8>,
    ) -> Self {
        Self {
            fs,
            inner: PreloadBuffer::new(path, flag, stats, data),
        }
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn flag(&self) -> FileFlag {
        self.inner.flag
    }

    pub fn stats(&self) -> &FileStats {
        &self.inner.stats
    }

    pub fn buffer(&self) -> &[u8] {
        &self.inner.data
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.dirty
    }

    pub fn reset_dirty(&mut self) {
        self.inner.dirty = false;
    }

    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> usize {
        self.inner.read_at(buf, offset)
    }

    pub fn write_at(&mut self, data: &[u8], offset: u64) -> FsResult<usize> {
        self.inner.write_at(data, offset)
    }

    pub fn truncate(&mut self, size: u64) -> FsResult<()> {
        self.inner.truncate(size)
    }

    pub fn flush(&mut self) -> FsResult<()> {
        if !self.inner.dirty {
            return Ok(());
        }
        self.fs
            .sync(&self.inner.path, &self.inner.data, &self.inner.stats)?;
        self.inner.dirty = false;
        Ok(())
    }

    pub fn close(&mut self) -> FsResult<()> {
        self.flush()
    }
}

/// Async twin of [`KvFile`], flushing through [`AsyncKvFileSystem`].
pub struct AsyncKvFile<'fs, S: AsyncKeyValueStore> {
    fs: &'fs AsyncKvFileSystem<S>,
    inner: PreloadBuffer,
}

impl<'fs, S: AsyncKeyValueStore> AsyncKvFile<'fs, S> {
    pub(crate) fn new(
        fs: &'fs AsyncKvFileSystem<S>,
        path: String,
        flag: FileFlag,
        stats: FileStats,
        data: Vec<u8>,
    ) -> Self {
        Self {
            fs,
            inner: PreloadBuffer::new(path, flag, stats, data),
        }
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn flag(&self) -> FileFlag {
        self.inner.flag
    }

    pub fn stats(&self) -> &FileStats {
        &self.inner.stats
    }

    pub fn buffer(&self) -> &[u8] {
        &self.inner.data
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.dirty
    }

    pub fn reset_dirty(&mut self) {
        self.inner.dirty = false;
    }

    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> usize {
        self.inner.read_at(buf, offset)
    }

    pub fn write_at(&mut self, data: &[u8], offset: u64) -> FsResult<usize> {
        self.inner.write_at(data, offset)
    }

    pub fn truncate(&mut self, size: u64) -> FsResult<()> {
        self.inner.truncate(size)
    }

    pub async fn flush(&mut self) -> FsResult<()> {
        if !self.inner.dirty {
            return Ok(());
        }
        self.fs
            .sync(&self.inner.path, &self.inner.data, &self.inner.stats)
            .await?;
        self.inner.dirty = false;
        Ok(())
    }

    pub async fn close(&mut self) -> FsResult<()> {
        self.flush().await
    }
}
