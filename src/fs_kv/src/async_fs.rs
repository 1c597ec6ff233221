use crate::file::AsyncKvFile;
use keyed_store::{AsyncKeyValueStore, AsyncReadTransaction, AsyncWriteTransaction};
use kvfs_lib::path::{basename, dirname, is_ancestor_path, join};
use kvfs_lib::{
    DirListing, FileFlag, FileKind, FileStats, FsError, FsResult, Inode, NodeId, ROOT_NODE_ID,
};
use log::{debug, warn};

const MAX_ID_ALLOC_ATTEMPTS: usize = 5;

/// Async flavor of [`crate::KvFileSystem`]: same on-store layout and the
/// same operation semantics, with a suspension point at every store call.
///
/// Each mutation runs inside a single write transaction that always reaches
/// commit or abort; the first error aborts once and is surfaced exactly
/// once.
pub struct AsyncKvFileSystem<S: AsyncKeyValueStore> {
    store: S,
}

impl<S: AsyncKeyValueStore> AsyncKvFileSystem<S> {
    pub async fn new(store: S) -> FsResult<Self> {
        let fs = Self { store };
        fs.make_root_directory().await?;
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
        false
    }

    pub async fn empty(&self) -> FsResult<()> {
        self.store.clear().await?;
        self.make_root_directory().await
    }

    pub async fn stat(&self, path: &str) -> FsResult<FileStats> {
        let mut tx = self.store.begin_read().await?;
        let (_, inode) = self.resolve_entry(&mut *tx, path).await?;
        Ok(FileStats::from(&inode))
    }

    pub async fn lstat(&self, path: &str) -> FsResult<FileStats> {
        self.stat(path).await
    }

    pub async fn readdir(&self, path: &str) -> FsResult<Vec<String>> {
        let mut tx = self.store.begin_read().await?;
        let (_, inode) = self.resolve_entry(&mut *tx, path).await?;
        let listing = self.read_dir_listing(&mut *tx, &inode, path).await?;
        Ok(listing.names())
    }

    pub async fn create_file(
        &self,
        path: &str,
        flag: FileFlag,
        mode: u32,
    ) -> FsResult<AsyncKvFile<'_, S>> {
        let inode = self
            .commit_new_node(path, FileKind::File, mode, &[])
            .await?;
        Ok(AsyncKvFile::new(
            self,
            path.to_string(),
            flag,
            FileStats::from(&inode),
            Vec::new(),
        ))
    }

    pub async fn open_file(&self, path: &str, flag: FileFlag) -> FsResult<AsyncKvFile<'_, S>> {
        let mut tx = self.store.begin_read().await?;
        let (_, inode) = self.resolve_entry(&mut *tx, path).await?;
        let data = tx
            .get(inode.data_id.as_str())
            .await?
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        Ok(AsyncKvFile::new(
            self,
            path.to_string(),
            flag,
            FileStats::from(&inode),
            data,
        ))
    }

    pub async fn mkdir(&self, path: &str, mode: u32) -> FsResult<()> {
        let payload = DirListing::new().encode()?;
        self.commit_new_node(path, FileKind::Dir, mode, &payload)
            .await?;
        Ok(())
    }

    pub async fn unlink(&self, path: &str) -> FsResult<()> {
        self.remove_entry(path, false).await
    }

    pub async fn rmdir(&self, path: &str) -> FsResult<()> {
        if !self.readdir(path).await?.is_empty() {
            return Err(FsError::NotEmpty(path.to_string()));
        }
        self.remove_entry(path, true).await
    }

    pub async fn rename(&self, old_path: &str, new_path: &str) -> FsResult<()> {
        let old_parent = dirname(old_path);
        let new_parent = dirname(new_path);

        // Same pre-I/O guard as the sync engine; normalized paths only.
        if is_ancestor_path(old_path, new_parent) {
            return Err(FsError::Busy(old_parent.to_string()));
        }

        let mut tx = self.store.begin_write().await?;
        let result = self
            .rename_in_tx(
                &mut *tx,
                old_parent,
                basename(old_path),
                new_parent,
                basename(new_path),
                old_path,
                new_path,
            )
            .await;
        Self::finish(tx, result).await
    }

    pub async fn sync(&self, path: &str, data: &[u8], stats: &FileStats) -> FsResult<()> {
        let mut tx = self.store.begin_write().await?;
        let result = self.sync_in_tx(&mut *tx, path, data, stats).await;
        Self::finish(tx, result).await
    }

    // ---- transaction plumbing ----

    async fn finish<T>(
        mut tx: Box<dyn AsyncWriteTransaction>,
        result: FsResult<T>,
    ) -> FsResult<T> {
        match result {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort_err) = tx.abort().await {
                    warn!("transaction abort failed: {}", abort_err);
                }
                Err(e)
            }
        }
    }

    async fn make_root_directory(&self) -> FsResult<()> {
        let mut tx = self.store.begin_write().await?;
        let result = self.make_root_directory_in_tx(&mut *tx).await;
        Self::finish(tx, result).await
    }

    async fn make_root_directory_in_tx(
        &self,
        tx: &mut dyn AsyncWriteTransaction,
    ) -> FsResult<()> {
        if tx.get(ROOT_NODE_ID).await?.is_some() {
            return Ok(());
        }
        debug!("store {} is fresh, creating root directory", self.name());
        let listing_id = NodeId::random();
        tx.put(listing_id.as_str(), &DirListing::new().encode()?, false)
            .await?;
        let inode = Inode::new(listing_id, 4096, 0o777, FileKind::Dir);
        tx.put(ROOT_NODE_ID, &inode.encode()?, false).await?;
        Ok(())
    }

    // ---- path resolution ----

    /// Walk the listing chain from the root down to `path`, returning the
    /// node id and inode of the final component. Iterative where the sync
    /// engine recurses; the reads happen in the same root-first order.
    async fn resolve_entry<R: AsyncReadTransaction + ?Sized>(
        &self,
        tx: &mut R,
        path: &str,
    ) -> FsResult<(NodeId, Inode)> {
        let mut id = NodeId::root();
        let mut inode = self.read_inode(tx, &id, "/").await?;
        if path == "/" {
            return Ok((id, inode));
        }

        let mut walked = String::from("/");
        for name in path.trim_start_matches('/').split('/') {
            let listing = self.read_dir_listing(tx, &inode, &walked).await?;
            let child_id = listing
                .get(name)
                .cloned()
                .ok_or_else(|| FsError::NotFound(join(&walked, name)))?;
            walked = join(&walked, name);
            inode = self.read_inode(tx, &child_id, &walked).await?;
            id = child_id;
        }
        Ok((id, inode))
    }

    async fn read_inode<R: AsyncReadTransaction + ?Sized>(
        &self,
        tx: &mut R,
        id: &NodeId,
        path: &str,
    ) -> FsResult<Inode> {
        let blob = tx
            .get(id.as_str())
            .await?
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        Inode::decode(&blob)
    }

    async fn read_dir_listing<R: AsyncReadTransaction + ?Sized>(
        &self,
        tx: &mut R,
        inode: &Inode,
        path: &str,
    ) -> FsResult<DirListing> {
        if !inode.is_dir() {
            return Err(FsError::NotADirectory(path.to_string()));
        }
        let blob = tx
            .get(inode.data_id.as_str())
            .await?
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        DirListing::decode(&blob)
    }

    // ---- mutation internals ----

    async fn alloc_new_node(
        &self,
        tx: &mut dyn AsyncWriteTransaction,
        path: &str,
        data: &[u8],
    ) -> FsResult<NodeId> {
        for _ in 0..MAX_ID_ALLOC_ATTEMPTS {
            let id = NodeId::random();
            if tx.put(id.as_str(), data, false).await? {
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

    async fn commit_new_node(
        &self,
        path: &str,
        kind: FileKind,
        mode: u32,
        payload: &[u8],
    ) -> FsResult<Inode> {
        if path == "/" {
            return Err(FsError::AlreadyExists(path.to_string()));
        }
        let mut tx = self.store.begin_write().await?;
        let result = self
            .commit_new_node_in_tx(&mut *tx, path, kind, mode, payload)
            .await;
        Self::finish(tx, result).await
    }

    async fn commit_new_node_in_tx(
        &self,
        tx: &mut dyn AsyncWriteTransaction,
        path: &str,
        kind: FileKind,
        mode: u32,
        payload: &[u8],
    ) -> FsResult<Inode> {
        let parent = dirname(path);
        let name = basename(path);
        let (_, parent_inode) = self.resolve_entry(tx, parent).await?;
        let mut listing = self.read_dir_listing(tx, &parent_inode, parent).await?;
        if listing.contains(name) {
            return Err(FsError::AlreadyExists(path.to_string()));
        }

        let data_id = self.alloc_new_node(tx, path, payload).await?;
        let inode = Inode::new(data_id, payload.len() as u64, mode, kind);
        let inode_id = self.alloc_new_node(tx, path, &inode.encode()?).await?;

        listing.insert(name.to_string(), inode_id);
        tx.put(parent_inode.data_id.as_str(), &listing.encode()?, true)
            .await?;
        Ok(inode)
    }

    async fn remove_entry(&self, path: &str, is_dir: bool) -> FsResult<()> {
        let mut tx = self.store.begin_write().await?;
        let result = self.remove_entry_in_tx(&mut *tx, path, is_dir).await;
        Self::finish(tx, result).await
    }

    async fn remove_entry_in_tx(
        &self,
        tx: &mut dyn AsyncWriteTransaction,
        path: &str,
        is_dir: bool,
    ) -> FsResult<()> {
        let parent = dirname(path);
        let name = basename(path);
        let (_, parent_inode) = self.resolve_entry(tx, parent).await?;
        let mut listing = self.read_dir_listing(tx, &parent_inode, parent).await?;
        let child_id = listing
            .remove(name)
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        let child_inode = self.read_inode(tx, &child_id, path).await?;

        if !is_dir && child_inode.is_dir() {
            return Err(FsError::IsADirectory(path.to_string()));
        }
        if is_dir && !child_inode.is_dir() {
            return Err(FsError::NotADirectory(path.to_string()));
        }

        tx.del(child_inode.data_id.as_str()).await?;
        tx.del(child_id.as_str()).await?;
        tx.put(parent_inode.data_id.as_str(), &listing.encode()?, true)
            .await?;
        Ok(())
    }

    async fn unlink_rename_target(
        &self,
        tx: &mut dyn AsyncWriteTransaction,
        listing: &DirListing,
        name: &str,
        new_path: &str,
    ) -> FsResult<()> {
        if let Some(existing_id) = listing.get(name).cloned() {
            let existing = self.read_inode(tx, &existing_id, new_path).await?;
            if existing.is_dir() {
                return Err(FsError::PermissionDenied(new_path.to_string()));
            }
            tx.del(existing.data_id.as_str()).await?;
            tx.del(existing_id.as_str()).await?;
        }
        Ok(())
    }

    /// The two parent directories are fetched one after the other through
    /// the single open transaction, so at most one abort can ever fire and
    /// the first error is the one reported.
    #[allow(clippy::too_many_arguments)]
    async fn rename_in_tx(
        &self,
        tx: &mut dyn AsyncWriteTransaction,
        old_parent: &str,
        old_name: &str,
        new_parent: &str,
        new_name: &str,
        old_path: &str,
        new_path: &str,
    ) -> FsResult<()> {
        let (_, old_parent_inode) = self.resolve_entry(tx, old_parent).await?;
        let mut old_listing = self
            .read_dir_listing(tx, &old_parent_inode, old_parent)
            .await?;

        let node_id = old_listing
            .remove(old_name)
            .ok_or_else(|| FsError::NotFound(old_path.to_string()))?;

        if old_parent == new_parent {
            self.unlink_rename_target(tx, &old_listing, new_name, new_path)
                .await?;
            old_listing.insert(new_name.to_string(), node_id);
            tx.put(old_parent_inode.data_id.as_str(), &old_listing.encode()?, true)
                .await?;
        } else {
            let (_, new_parent_inode) = self.resolve_entry(tx, new_parent).await?;
            let mut new_listing = self
                .read_dir_listing(tx, &new_parent_inode, new_parent)
                .await?;
            self.unlink_rename_target(tx, &new_listing, new_name, new_path)
                .await?;
            new_listing.insert(new_name.to_string(), node_id);
            tx.put(old_parent_inode.data_id.as_str(), &old_listing.encode()?, true)
                .await?;
            tx.put(new_parent_inode.data_id.as_str(), &new_listing.encode()?, true)
                .await?;
        }
        Ok(())
    }

    async fn sync_in_tx(
        &self,
        tx: &mut dyn AsyncWriteTransaction,
        path: &str,
        data: &[u8],
        stats: &FileStats,
    ) -> FsResult<()> {
        let (inode_id, mut inode) = self.resolve_entry(tx, path).await?;
        let changed = inode.update_from_stats(stats);
        tx.put(inode.data_id.as_str(), data, true).await?;
        if changed {
            tx.put(inode_id.as_str(), &inode.encode()?, true).await?;
        }
        Ok(())
    }
}
