#[cfg(test)]
mod tests {
    use crate::{AsyncKvFileSystem, KvFileSystem};
    use keyed_store::{
        AsyncMemoryStore, AsyncSimpleTransactionStore, MemoryStore, SimpleKeyValueStore,
        SimpleTransactionStore, SqliteStore,
    };
    use kvfs_lib::{FileFlag, FsError};
    use std::sync::atomic::{AtomicI64, Ordering};
    use tempfile::TempDir;

    fn create_test_fs() -> KvFileSystem<SimpleTransactionStore<MemoryStore>> {
        KvFileSystem::new(SimpleTransactionStore::new(MemoryStore::new())).unwrap()
    }

    async fn create_async_test_fs() -> AsyncKvFileSystem<AsyncSimpleTransactionStore<AsyncMemoryStore>>
    {
        AsyncKvFileSystem::new(AsyncSimpleTransactionStore::new(AsyncMemoryStore::new()))
            .await
            .unwrap()
    }

    /// Simple store that reports a store error on exactly one operation:
    /// the `fail_at`-th get/put/del after arming. The failure fires once,
    /// so rollback traffic after it goes through untouched.
    struct FaultStore {
        inner: MemoryStore,
        fail_at: AtomicI64,
    }

    impl FaultStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                fail_at: AtomicI64::new(i64::MIN / 2),
            }
        }

        fn arm(&self, nth_op: i64) {
            self.fail_at.store(nth_op, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), FsError> {
            if self.fail_at.fetch_sub(1, Ordering::SeqCst) == 0 {
                return Err(FsError::DbError("injected fault".to_string()));
            }
            Ok(())
        }
    }

    impl SimpleKeyValueStore for FaultStore {
        fn name(&self) -> String {
            "faulty-memory".to_string()
        }

        fn clear(&self) -> Result<(), FsError> {
            self.inner.clear()
        }

        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, FsError> {
            self.check()?;
            self.inner.get(key)
        }

        fn put(&self, key: &str, value: &[u8], overwrite: bool) -> Result<bool, FsError> {
            self.check()?;
            self.inner.put(key, value, overwrite)
        }

        fn del(&self, key: &str) -> Result<(), FsError> {
            self.check()?;
            self.inner.del(key)
        }
    }

    // ==================== Fresh filesystem ====================

    #[test]
    fn test_fresh_fs_has_empty_root() {
        let fs = create_test_fs();
        assert_eq!(fs.readdir("/").unwrap(), Vec::<String>::new());
        let stats = fs.stat("/").unwrap();
        assert!(stats.is_dir());
        assert_eq!(stats.size, 4096);
        assert_eq!(stats.perms(), 0o777);
        // root inode plus root listing blob
        assert_eq!(fs.store().inner().key_count(), 2);
    }

    #[test]
    fn test_stat_missing_path() {
        let fs = create_test_fs();
        assert!(matches!(fs.stat("/nope"), Err(FsError::NotFound(_))));
        assert!(matches!(fs.stat("/a/b/c"), Err(FsError::NotFound(_))));
    }

    #[test]
    fn test_lstat_matches_stat() {
        let fs = create_test_fs();
        fs.mkdir("/d", 0o755).unwrap();
        assert_eq!(fs.lstat("/d").unwrap(), fs.stat("/d").unwrap());
    }

    // ==================== Create / open / write ====================

    #[test]
    fn test_create_write_reopen() {
        let fs = create_test_fs();
        let mut f = fs.create_file("/a", FileFlag::ReadWrite, 0o666).unwrap();
        assert_eq!(f.stats().size, 0);
        f.write_at(b"hello", 0).unwrap();
        assert!(f.is_dirty());
        f.close().unwrap();
        assert!(!f.is_dirty());

        let f2 = fs.open_file("/a", FileFlag::ReadOnly).unwrap();
        assert_eq!(f2.buffer(), b"hello");
        assert_eq!(f2.stats().size, 5);
        assert!(f2.stats().is_file());

        let mut buf = [0u8; 3];
        assert_eq!(f2.read_at(&mut buf, 1), 3);
        assert_eq!(&buf, b"ell");
    }

    #[test]
    fn test_create_at_root_fails() {
        let fs = create_test_fs();
        assert!(matches!(
            fs.create_file("/", FileFlag::ReadWrite, 0o666),
            Err(FsError::AlreadyExists(_))
        ));
        assert!(matches!(fs.mkdir("/", 0o777), Err(FsError::AlreadyExists(_))));
    }

    #[test]
    fn test_create_existing_fails() {
        let fs = create_test_fs();
        fs.create_file("/a", FileFlag::ReadWrite, 0o666).unwrap();
        assert!(matches!(
            fs.create_file("/a", FileFlag::ReadWrite, 0o666),
            Err(FsError::AlreadyExists(_))
        ));
        assert!(matches!(fs.mkdir("/a", 0o777), Err(FsError::AlreadyExists(_))));
    }

    #[test]
    fn test_write_through_readonly_handle_fails() {
        let fs = create_test_fs();
        fs.create_file("/a", FileFlag::ReadWrite, 0o666).unwrap();
        let mut f = fs.open_file("/a", FileFlag::ReadOnly).unwrap();
        assert!(matches!(
            f.write_at(b"x", 0),
            Err(FsError::PermissionDenied(_))
        ));
        assert!(matches!(f.truncate(0), Err(FsError::PermissionDenied(_))));
    }

    #[test]
    fn test_open_missing_file() {
        let fs = create_test_fs();
        assert!(matches!(
            fs.open_file("/a", FileFlag::ReadOnly),
            Err(FsError::NotFound(_))
        ));
    }

    #[test]
    fn test_sparse_write_zero_fills() {
        let fs = create_test_fs();
        let mut f = fs.create_file("/a", FileFlag::ReadWrite, 0o666).unwrap();
        f.write_at(b"x", 4).unwrap();
        f.close().unwrap();
        let f2 = fs.open_file("/a", FileFlag::ReadOnly).unwrap();
        assert_eq!(f2.buffer(), &[0, 0, 0, 0, b'x']);
        assert_eq!(f2.stats().size, 5);
    }

    // ==================== Directories ====================

    #[test]
    fn test_mkdir_and_nested_create() {
        let fs = create_test_fs();
        fs.mkdir("/d", 0o777).unwrap();
        fs.create_file("/d/f", FileFlag::ReadWrite, 0o666).unwrap();

        assert_eq!(fs.readdir("/d").unwrap(), vec!["f".to_string()]);
        assert_eq!(fs.readdir("/").unwrap(), vec!["d".to_string()]);
        assert!(fs.stat("/d").unwrap().is_dir());
        assert!(fs.stat("/d/f").unwrap().is_file());
    }

    #[test]
    fn test_readdir_on_file_fails() {
        let fs = create_test_fs();
        fs.create_file("/a", FileFlag::ReadWrite, 0o666).unwrap();
        assert!(matches!(fs.readdir("/a"), Err(FsError::NotADirectory(_))));
    }

    #[test]
    fn test_resolution_through_file_component_fails() {
        let fs = create_test_fs();
        fs.create_file("/a", FileFlag::ReadWrite, 0o666).unwrap();
        assert!(matches!(fs.stat("/a/b"), Err(FsError::NotADirectory(_))));
    }

    // ==================== Unlink / rmdir ====================

    #[test]
    fn test_create_unlink_roundtrip() {
        let fs = create_test_fs();
        let baseline = fs.store().inner().key_count();
        fs.create_file("/a", FileFlag::ReadWrite, 0o666).unwrap();
        fs.unlink("/a").unwrap();

        assert!(fs.stat("/a").unwrap_err().is_not_found());
        assert_eq!(fs.readdir("/").unwrap(), Vec::<String>::new());
        assert_eq!(fs.store().inner().key_count(), baseline);
    }

    #[test]
    fn test_mkdir_rmdir_roundtrip() {
        let fs = create_test_fs();
        let baseline = fs.store().inner().key_count();
        fs.mkdir("/d", 0o777).unwrap();
        fs.rmdir("/d").unwrap();

        assert!(fs.stat("/d").unwrap_err().is_not_found());
        assert_eq!(fs.readdir("/").unwrap(), Vec::<String>::new());
        assert_eq!(fs.store().inner().key_count(), baseline);
    }

    #[test]
    fn test_unlink_directory_fails() {
        let fs = create_test_fs();
        fs.mkdir("/d", 0o777).unwrap();
        assert!(matches!(fs.unlink("/d"), Err(FsError::IsADirectory(_))));
    }

    #[test]
    fn test_rmdir_file_fails() {
        let fs = create_test_fs();
        fs.create_file("/a", FileFlag::ReadWrite, 0o666).unwrap();
        assert!(matches!(fs.rmdir("/a"), Err(FsError::NotADirectory(_))));
    }

    #[test]
    fn test_rmdir_nonempty_fails() {
        let fs = create_test_fs();
        fs.mkdir("/d", 0o777).unwrap();
        fs.create_file("/d/f", FileFlag::ReadWrite, 0o666).unwrap();
        assert!(matches!(fs.rmdir("/d"), Err(FsError::NotEmpty(_))));
        // still intact
        assert_eq!(fs.readdir("/d").unwrap(), vec!["f".to_string()]);
    }

    #[test]
    fn test_unlink_missing_fails() {
        let fs = create_test_fs();
        assert!(matches!(fs.unlink("/a"), Err(FsError::NotFound(_))));
    }

    // ==================== Rename ====================

    #[test]
    fn test_rename_file() {
        let fs = create_test_fs();
        let mut f = fs.create_file("/a", FileFlag::ReadWrite, 0o666).unwrap();
        f.write_at(b"data", 0).unwrap();
        f.close().unwrap();

        fs.rename("/a", "/b").unwrap();
        assert!(fs.stat("/a").unwrap_err().is_not_found());
        assert_eq!(fs.open_file("/b", FileFlag::ReadOnly).unwrap().buffer(), b"data");
    }

    #[test]
    fn test_rename_and_back_is_identity() {
        let fs = create_test_fs();
        fs.mkdir("/d", 0o777).unwrap();
        let mut f = fs.create_file("/a", FileFlag::ReadWrite, 0o666).unwrap();
        f.write_at(b"data", 0).unwrap();
        f.close().unwrap();

        let before = fs.store().inner().snapshot();
        fs.rename("/a", "/d/a").unwrap();
        fs.rename("/d/a", "/a").unwrap();
        assert_eq!(fs.store().inner().snapshot(), before);
    }

    #[test]
    fn test_rename_across_directories() {
        let fs = create_test_fs();
        fs.mkdir("/src", 0o777).unwrap();
        fs.mkdir("/dst", 0o777).unwrap();
        fs.create_file("/src/f", FileFlag::ReadWrite, 0o666).unwrap();

        fs.rename("/src/f", "/dst/g").unwrap();
        assert_eq!(fs.readdir("/src").unwrap(), Vec::<String>::new());
        assert_eq!(fs.readdir("/dst").unwrap(), vec!["g".to_string()]);
    }

    #[test]
    fn test_rename_into_own_subtree_fails() {
        let fs = create_test_fs();
        fs.mkdir("/d", 0o777).unwrap();
        let before = fs.store().inner().snapshot();
        assert!(matches!(fs.rename("/d", "/d/sub"), Err(FsError::Busy(_))));
        assert_eq!(fs.store().inner().snapshot(), before);
    }

    #[test]
    fn test_rename_sibling_name_prefix_is_allowed() {
        let fs = create_test_fs();
        fs.mkdir("/ab", 0o777).unwrap();
        fs.rename("/ab", "/abc").unwrap();
        assert!(fs.stat("/abc").unwrap().is_dir());
        assert!(fs.stat("/ab").unwrap_err().is_not_found());
    }

    #[test]
    fn test_rename_overwrites_existing_file_and_frees_blobs() {
        let fs = create_test_fs();
        let mut f = fs.create_file("/a", FileFlag::ReadWrite, 0o666).unwrap();
        f.write_at(b"keep", 0).unwrap();
        f.close().unwrap();
        fs.create_file("/b", FileFlag::ReadWrite, 0o666).unwrap();

        fs.rename("/a", "/b").unwrap();
        assert!(fs.stat("/a").unwrap_err().is_not_found());
        assert_eq!(fs.open_file("/b", FileFlag::ReadOnly).unwrap().buffer(), b"keep");
        // 1 root inode + 1 root listing + 2 blobs for the single survivor
        assert_eq!(fs.store().inner().key_count(), 4);
    }

    #[test]
    fn test_rename_onto_directory_fails() {
        let fs = create_test_fs();
        fs.create_file("/a", FileFlag::ReadWrite, 0o666).unwrap();
        fs.mkdir("/d", 0o777).unwrap();
        let before = fs.store().inner().snapshot();
        assert!(matches!(
            fs.rename("/a", "/d"),
            Err(FsError::PermissionDenied(_))
        ));
        assert_eq!(fs.store().inner().snapshot(), before);
    }

    #[test]
    fn test_rename_missing_source_fails() {
        let fs = create_test_fs();
        assert!(matches!(fs.rename("/a", "/b"), Err(FsError::NotFound(_))));
    }

    // ==================== Sync ====================

    #[test]
    fn test_sync_updates_data_and_stats() {
        let fs = create_test_fs();
        let mut f = fs.create_file("/a", FileFlag::ReadWrite, 0o666).unwrap();
        f.write_at(b"hello", 0).unwrap();
        let written_stats = f.stats().clone();
        f.flush().unwrap();

        let reread = fs.stat("/a").unwrap();
        assert_eq!(reread.size, 5);
        assert_eq!(reread.mtime, written_stats.mtime);

        let f2 = fs.open_file("/a", FileFlag::ReadOnly).unwrap();
        assert_eq!(f2.buffer(), b"hello");
    }

    #[test]
    fn test_flush_without_writes_is_noop() {
        let fs = create_test_fs();
        let mut f = fs.create_file("/a", FileFlag::ReadWrite, 0o666).unwrap();
        let before = fs.store().inner().snapshot();
        f.flush().unwrap();
        assert_eq!(fs.store().inner().snapshot(), before);
    }

    #[test]
    fn test_truncate_shrinks_file() {
        let fs = create_test_fs();
        let mut f = fs.create_file("/a", FileFlag::ReadWrite, 0o666).unwrap();
        f.write_at(b"hello world", 0).unwrap();
        f.truncate(5).unwrap();
        f.close().unwrap();
        let f2 = fs.open_file("/a", FileFlag::ReadOnly).unwrap();
        assert_eq!(f2.buffer(), b"hello");
    }

    // ==================== Key accounting / empty ====================

    #[test]
    fn test_store_key_accounting() {
        let fs = create_test_fs();
        // 1 root inode + 1 root listing
        assert_eq!(fs.store().inner().key_count(), 2);

        fs.create_file("/a", FileFlag::ReadWrite, 0o666).unwrap();
        assert_eq!(fs.store().inner().key_count(), 4);

        fs.mkdir("/d", 0o777).unwrap();
        fs.create_file("/d/f", FileFlag::ReadWrite, 0o666).unwrap();
        assert_eq!(fs.store().inner().key_count(), 8);

        fs.unlink("/d/f").unwrap();
        fs.rmdir("/d").unwrap();
        fs.unlink("/a").unwrap();
        assert_eq!(fs.store().inner().key_count(), 2);
    }

    #[test]
    fn test_empty_resets_filesystem() {
        let fs = create_test_fs();
        fs.mkdir("/d", 0o777).unwrap();
        fs.create_file("/d/f", FileFlag::ReadWrite, 0o666).unwrap();

        fs.empty().unwrap();
        assert_eq!(fs.readdir("/").unwrap(), Vec::<String>::new());
        assert_eq!(fs.store().inner().key_count(), 2);
    }

    // ==================== Rollback on store failure ====================

    #[test]
    fn test_create_rolls_back_cleanly_at_every_fault_point() {
        let mut succeeded = false;
        for nth_op in 0..16 {
            let store = SimpleTransactionStore::new(FaultStore::new());
            let fs = KvFileSystem::new(store).unwrap();
            fs.create_file("/a", FileFlag::ReadWrite, 0o666).unwrap();
            let before = fs.store().inner().inner.snapshot();

            fs.store().inner().arm(nth_op);
            match fs.create_file("/b", FileFlag::ReadWrite, 0o666) {
                Ok(_) => {
                    // fault point lies beyond the op sequence
                    succeeded = true;
                    break;
                }
                Err(_) => {
                    assert_eq!(fs.store().inner().inner.snapshot(), before);
                    assert_eq!(fs.readdir("/").unwrap(), vec!["a".to_string()]);
                }
            }
        }
        assert!(succeeded);
    }

    #[test]
    fn test_remove_rolls_back_cleanly_at_every_fault_point() {
        let mut succeeded = false;
        for nth_op in 0..16 {
            let store = SimpleTransactionStore::new(FaultStore::new());
            let fs = KvFileSystem::new(store).unwrap();
            fs.create_file("/a", FileFlag::ReadWrite, 0o666).unwrap();
            let before = fs.store().inner().inner.snapshot();

            fs.store().inner().arm(nth_op);
            match fs.unlink("/a") {
                Ok(_) => {
                    succeeded = true;
                    break;
                }
                Err(_) => {
                    assert_eq!(fs.store().inner().inner.snapshot(), before);
                    assert_eq!(fs.readdir("/").unwrap(), vec!["a".to_string()]);
                }
            }
        }
        assert!(succeeded);
    }

    // ==================== SQLite-backed filesystem ====================

    #[test]
    fn test_sqlite_backed_fs_roundtrip() {
        let tmp_dir = TempDir::new().unwrap();
        let db_path = tmp_dir.path().join("fs.db");
        let store =
            SimpleTransactionStore::new(SqliteStore::new(db_path.to_str().unwrap()).unwrap());
        let fs = KvFileSystem::new(store).unwrap();

        fs.mkdir("/d", 0o755).unwrap();
        let mut f = fs.create_file("/d/f", FileFlag::ReadWrite, 0o644).unwrap();
        f.write_at(b"durable", 0).unwrap();
        f.close().unwrap();
        drop(fs);

        // a second mount over the same database sees the same tree
        let store =
            SimpleTransactionStore::new(SqliteStore::new(db_path.to_str().unwrap()).unwrap());
        let fs = KvFileSystem::new(store).unwrap();
        assert_eq!(fs.readdir("/d").unwrap(), vec!["f".to_string()]);
        assert_eq!(
            fs.open_file("/d/f", FileFlag::ReadOnly).unwrap().buffer(),
            b"durable"
        );
    }

    // ==================== Async filesystem ====================

    #[tokio::test]
    async fn test_async_fresh_fs() {
        let fs = create_async_test_fs().await;
        assert_eq!(fs.readdir("/").await.unwrap(), Vec::<String>::new());
        let stats = fs.stat("/").await.unwrap();
        assert!(stats.is_dir());
        assert_eq!(stats.size, 4096);
        assert_eq!(fs.store().inner().key_count(), 2);
    }

    #[tokio::test]
    async fn test_async_create_write_reopen() {
        let fs = create_async_test_fs().await;
        let mut f = fs
            .create_file("/a", FileFlag::ReadWrite, 0o666)
            .await
            .unwrap();
        f.write_at(b"hello", 0).unwrap();
        f.close().await.unwrap();

        let f2 = fs.open_file("/a", FileFlag::ReadOnly).await.unwrap();
        assert_eq!(f2.buffer(), b"hello");
        assert_eq!(f2.stats().size, 5);
    }

    #[tokio::test]
    async fn test_async_mkdir_unlink_rmdir() {
        let fs = create_async_test_fs().await;
        fs.mkdir("/d", 0o777).await.unwrap();
        fs.create_file("/d/f", FileFlag::ReadWrite, 0o666)
            .await
            .unwrap();

        assert!(matches!(
            fs.rmdir("/d").await,
            Err(FsError::NotEmpty(_))
        ));
        fs.unlink("/d/f").await.unwrap();
        fs.rmdir("/d").await.unwrap();
        assert_eq!(fs.readdir("/").await.unwrap(), Vec::<String>::new());
        assert_eq!(fs.store().inner().key_count(), 2);
    }

    #[tokio::test]
    async fn test_async_rename_semantics() {
        let fs = create_async_test_fs().await;
        fs.mkdir("/d", 0o777).await.unwrap();
        let mut f = fs
            .create_file("/a", FileFlag::ReadWrite, 0o666)
            .await
            .unwrap();
        f.write_at(b"data", 0).unwrap();
        f.close().await.unwrap();

        assert!(matches!(
            fs.rename("/d", "/d/sub").await,
            Err(FsError::Busy(_))
        ));
        fs.rename("/a", "/d/a").await.unwrap();
        assert!(fs.stat("/a").await.unwrap_err().is_not_found());
        assert_eq!(
            fs.open_file("/d/a", FileFlag::ReadOnly).await.unwrap().buffer(),
            b"data"
        );
    }

    #[tokio::test]
    async fn test_async_rename_onto_directory_fails() {
        let fs = create_async_test_fs().await;
        fs.create_file("/a", FileFlag::ReadWrite, 0o666)
            .await
            .unwrap();
        fs.mkdir("/d", 0o777).await.unwrap();
        assert!(matches!(
            fs.rename("/a", "/d").await,
            Err(FsError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_async_empty_resets() {
        let fs = create_async_test_fs().await;
        fs.create_file("/a", FileFlag::ReadWrite, 0o666)
            .await
            .unwrap();
        fs.empty().await.unwrap();
        assert_eq!(fs.readdir("/").await.unwrap(), Vec::<String>::new());
        assert_eq!(fs.store().inner().key_count(), 2);
    }
}
