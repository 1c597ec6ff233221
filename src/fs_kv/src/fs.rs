use crate::file::KvFile;
use keyed_store::{KeyValueStore, ReadTransaction, WriteTransaction};
use kvfs_lib::path::{basename, dirname, is_ancestor_path, join};
use kvfs_lib::{
    DirListing, FileFlag, FileKind, FileStats, FsError, FsResult, Inode, NodeId, ROOT_NODE_ID,
};
use log::{debug, warn};

const MAX_ID_ALLOC_ATTEMPTS: usize = 5;

/// Filesystem whose entire persistent state lives as keyed blobs in a
/// transactional store. One inode blob plus one payload blob per object;
/// directory payloads are encoded name listings; the root inode sits under
/// the reserved key `/`.
///
/// Paths must be normalized absolute `/`-separated strings (no trailing
/// slash, no `.`/`..`).
pub struct KvFileSystem<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> KvFileSystem<S> {
    /// Wrap a store, creating the root directory if the store is fresh.
    pub fn new(store: S) -> FsResult<Self> {
        let fs = Self { store };
        fs.make_root_directory()?;
        Ok(fs)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn name(&self) -> String {
        self.store.name()
    }

    pub fn is_read_only(&self) -> bool {
        false
    }

    pub fn supports_symlinks(&self) -> bool {
        false
    }

    pub fn supports_props(&self) -> bool {
        false
    }

    pub fn supports_synch(&self) -> bool {
        true
    }

    /// Drop every key in the store and re-create the root directory.
    pub fn empty(&self) -> FsResult<()> {
        self.store.clear()?;
        self.make_root_directory()
    }

    pub fn stat(&self, path: &str) -> FsResult<FileStats> {
        let mut tx = self.store.begin_read()?;
        let inode = self.resolve_inode(&mut *tx, path)?;
        Ok(FileStats::from(&inode))
    }

    /// No symlinks exist, so `lstat` and `stat` agree.
    pub fn lstat(&self, path: &str) -> FsResult<FileStats> {
        self.stat(path)
    }

    pub fn readdir(&self, path: &str) -> FsResult<Vec<String>> {
        let mut tx = self.store.begin_read()?;
        let inode = self.resolve_inode(&mut *tx, path)?;
        let listing = self.read_dir_listing(&mut *tx, &inode, path)?;
        Ok(listing.names())
    }

    pub fn create_file(&self, path: &str, flag: FileFlag, mode: u32) -> FsResult<KvFile<'_, S>> {
        let inode = self.commit_new_node(path, FileKind::File, mode, &[])?;
        Ok(KvFile::new(
            self,
            path.to_string(),
            flag,
            FileStats::from(&inode),
            Vec::new(),
        ))
    }

    pub fn open_file(&self, path: &str, flag: FileFlag) -> FsResult<KvFile<'_, S>> {
        let mut tx = self.store.begin_read()?;
        let inode = self.resolve_inode(&mut *tx, path)?;
        let data = tx
            .get(inode.data_id.as_str())?
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        Ok(KvFile::new(
            self,
            path.to_string(),
            flag,
            FileStats::from(&inode),
            data,
        ))
    }

    pub fn mkdir(&self, path: &str, mode: u32) -> FsResult<()> {
        let payload = DirListing::new().encode()?;
        self.commit_new_node(path, FileKind::Dir, mode, &payload)?;
        Ok(())
    }

    pub fn unlink(&self, path: &str) -> FsResult<()> {
        self.remove_entry(path, false)
    }

    pub fn rmdir(&self, path: &str) -> FsResult<()> {
        if !self.readdir(path)?.is_empty() {
            return Err(FsError::NotEmpty(path.to_string()));
        }
        self.remove_entry(path, true)
    }

    pub fn rename(&self, old_path: &str, new_path: &str) -> FsResult<()> {
        let old_parent = dirname(old_path);
        let old_name = basename(old_path);
        let new_parent = dirname(new_path);
        let new_name = basename(new_path);

        // Refuse to move a directory into itself or a descendant. Checked
        // before any store I/O; correct only because paths are normalized.
        if is_ancestor_path(old_path, new_parent) {
            return Err(FsError::Busy(old_parent.to_string()));
        }

        let mut tx = self.store.begin_write()?;
        let result = self.rename_in_tx(
            &mut *tx, old_parent, old_name, new_parent, new_name, old_path, new_path,
        );
        Self::finish(tx, result)
    }

    /// Flush handle state back into the store: the data blob is always
    /// rewritten, the inode blob only when some stat actually changed.
    pub fn sync(&self, path: &str, data: &[u8], stats: &FileStats) -> FsResult<()> {
        let mut tx = self.store.begin_write()?;
        let result = self.sync_in_tx(&mut *tx, path, data, stats);
        Self::finish(tx, result)
    }

    // ---- transaction plumbing ----

    /// Drive a write transaction to its terminal state: commit on success,
    /// abort (and surface the original error) on failure.
    fn finish<T>(mut tx: Box<dyn WriteTransaction + '_>, result: FsResult<T>) -> FsResult<T> {
        match result {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort_err) = tx.abort() {
                    warn!("transaction abort failed: {}", abort_err);
                }
                Err(e)
            }
        }
    }

    fn make_root_directory(&self) -> FsResult<()> {
        let mut tx = self.store.begin_write()?;
        let result = self.make_root_directory_in_tx(&mut *tx);
        Self::finish(tx, result)
    }

    fn make_root_directory_in_tx(&self, tx: &mut dyn WriteTransaction) -> FsResult<()> {
        if tx.get(ROOT_NODE_ID)?.is_some() {
            return Ok(());
        }
        debug!("store {} is fresh, creating root directory", self.name());
        let listing_id = NodeId::random();
        tx.put(listing_id.as_str(), &DirListing::new().encode()?, false)?;
        let inode = Inode::new(listing_id, 4096, 0o777, FileKind::Dir);
        tx.put(ROOT_NODE_ID, &inode.encode()?, false)?;
        Ok(())
    }

    // ---- path resolution ----

    /// Node id of `name` inside the directory at `parent`, by recursive
    /// descent from the root listing.
    fn resolve_node_id<R: ReadTransaction + ?Sized>(
        &self,
        tx: &mut R,
        parent: &str,
        name: &str,
    ) -> FsResult<NodeId> {
        if parent == "/" && name.is_empty() {
            return Ok(NodeId::root());
        }
        let parent_id = if parent == "/" {
            NodeId::root()
        } else {
            self.resolve_node_id(tx, dirname(parent), basename(parent))?
        };
        let parent_inode = self.read_inode(tx, &parent_id, parent)?;
        let listing = self.read_dir_listing(tx, &parent_inode, parent)?;
        listing
            .get(name)
            .cloned()
            .ok_or_else(|| FsError::NotFound(join(parent, name)))
    }

    fn resolve_inode<R: ReadTransaction + ?Sized>(&self, tx: &mut R, path: &str) -> FsResult<Inode> {
        let id = self.resolve_node_id(tx, dirname(path), basename(path))?;
        self.read_inode(tx, &id, path)
    }

    fn read_inode<R: ReadTransaction + ?Sized>(
        &self,
        tx: &mut R,
        id: &NodeId,
        path: &str,
    ) -> FsResult<Inode> {
        let blob = tx
            .get(id.as_str())?
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        Inode::decode(&blob)
    }

    fn read_dir_listing<R: ReadTransaction + ?Sized>(
        &self,
        tx: &mut R,
        inode: &Inode,
        path: &str,
    ) -> FsResult<DirListing> {
        if !inode.is_dir() {
            return Err(FsError::NotADirectory(path.to_string()));
        }
        // A directory inode whose payload is gone means the store is
        // corrupt, surfaced as a missing path.
        let blob = tx
            .get(inode.data_id.as_str())?
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        DirListing::decode(&blob)
    }

    // ---- mutation internals ----

    /// Put `data` under a fresh random id, retrying on the (vanishingly
    /// unlikely) id collision so a broken random source cannot loop forever.
    fn alloc_new_node(
        &self,
        tx: &mut dyn WriteTransaction,
        path: &str,
        data: &[u8],
    ) -> FsResult<NodeId> {
        for _ in 0..MAX_ID_ALLOC_ATTEMPTS {
            let id = NodeId::random();
            if tx.put(id.as_str(), data, false)? {
                return Ok(id);
            }
        }
        warn!(
            "failed to allocate a fresh node id after {} attempts",
            MAX_ID_ALLOC_ATTEMPTS
        );
        Err(FsError::IoError(format!(
            "unable to allocate a fresh id for {}",
            path
        )))
    }

    fn commit_new_node(
        &self,
        path: &str,
        kind: FileKind,
        mode: u32,
        payload: &[u8],
    ) -> FsResult<Inode> {
        if path == "/" {
            return Err(FsError::AlreadyExists(path.to_string()));
        }
        let mut tx = self.store.begin_write()?;
        let result = self.commit_new_node_in_tx(&mut *tx, path, kind, mode, payload);
        Self::finish(tx, result)
    }

    fn commit_new_node_in_tx(
        &self,
        tx: &mut dyn WriteTransaction,
        path: &str,
        kind: FileKind,
        mode: u32,
        payload: &[u8],
    ) -> FsResult<Inode> {
        let parent = dirname(path);
        let name = basename(path);
        let parent_inode = self.resolve_inode(tx, parent)?;
        let mut listing = self.read_dir_listing(tx, &parent_inode, parent)?;
        if listing.contains(name) {
            return Err(FsError::AlreadyExists(path.to_string()));
        }

        let data_id = self.alloc_new_node(tx, path, payload)?;
        let inode = Inode::new(data_id, payload.len() as u64, mode, kind);
        let inode_id = self.alloc_new_node(tx, path, &inode.encode()?)?;

        listing.insert(name.to_string(), inode_id);
        tx.put(parent_inode.data_id.as_str(), &listing.encode()?, true)?;
        Ok(inode)
    }

    fn remove_entry(&self, path: &str, is_dir: bool) -> FsResult<()> {
        let mut tx = self.store.begin_write()?;
        let result = self.remove_entry_in_tx(&mut *tx, path, is_dir);
        Self::finish(tx, result)
    }

    fn remove_entry_in_tx(
        &self,
        tx: &mut dyn WriteTransaction,
        path: &str,
        is_dir: bool,
    ) -> FsResult<()> {
        let parent = dirname(path);
        let name = basename(path);
        let parent_inode = self.resolve_inode(tx, parent)?;
        let mut listing = self.read_dir_listing(tx, &parent_inode, parent)?;
        let child_id = listing
            .remove(name)
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        let child_inode = self.read_inode(tx, &child_id, path)?;

        if !is_dir && child_inode.is_dir() {
            return Err(FsError::IsADirectory(path.to_string()));
        }
        if is_dir && !child_inode.is_dir() {
            return Err(FsError::NotADirectory(path.to_string()));
        }

        tx.del(child_inode.data_id.as_str())?;
        tx.del(child_id.as_str())?;
        tx.put(parent_inode.data_id.as_str(), &listing.encode()?, true)?;
        Ok(())
    }

    /// Drop an existing entry named `name` so a rename can take its place.
    /// Directories are never overwritten; a plain file loses both blobs.
    fn unlink_rename_target(
        &self,
        tx: &mut dyn WriteTransaction,
        listing: &DirListing,
        name: &str,
        new_path: &str,
    ) -> FsResult<()> {
        if let Some(existing_id) = listing.get(name).cloned() {
            let existing = self.read_inode(tx, &existing_id, new_path)?;
            if existing.is_dir() {
                return Err(FsError::PermissionDenied(new_path.to_string()));
            }
            tx.del(existing.data_id.as_str())?;
            tx.del(existing_id.as_str())?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn rename_in_tx(
        &self,
        tx: &mut dyn WriteTransaction,
        old_parent: &str,
        old_name: &str,
        new_parent: &str,
        new_name: &str,
        old_path: &str,
        new_path: &str,
    ) -> FsResult<()> {
        let old_parent_inode = self.resolve_inode(tx, old_parent)?;
        let mut old_listing = self.read_dir_listing(tx, &old_parent_inode, old_parent)?;

        let node_id = old_listing
            .remove(old_name)
            .ok_or_else(|| FsError::NotFound(old_path.to_string()))?;

        if old_parent == new_parent {
            self.unlink_rename_target(tx, &old_listing, new_name, new_path)?;
            old_listing.insert(new_name.to_string(), node_id);
            tx.put(old_parent_inode.data_id.as_str(), &old_listing.encode()?, true)?;
        } else {
            let new_parent_inode = self.resolve_inode(tx, new_parent)?;
            let mut new_listing = self.read_dir_listing(tx, &new_parent_inode, new_parent)?;
            self.unlink_rename_target(tx, &new_listing, new_name, new_path)?;
            new_listing.insert(new_name.to_string(), node_id);
            tx.put(old_parent_inode.data_id.as_str(), &old_listing.encode()?, true)?;
            tx.put(new_parent_inode.data_id.as_str(), &new_listing.encode()?, true)?;
        }
        Ok(())
    }

    fn sync_in_tx(
        &self,
        tx: &mut dyn WriteTransaction,
        path: &str,
        data: &[u8],
        stats: &FileStats,
    ) -> FsResult<()> {
        let inode_id = self.resolve_node_id(tx, dirname(path), basename(path))?;
        let mut inode = self.read_inode(tx, &inode_id, path)?;
        let changed = inode.update_from_stats(stats);
        // TODO: skip the data write when only metadata changed; needs the
        // handle to report whether its buffer is what went stale.
        tx.put(inode.data_id.as_str(), data, true)?;
        if changed {
            tx.put(inode_id.as_str(), &inode.encode()?, true)?;
        }
        Ok(())
    }
}
