mod async_fs;
mod file;
mod fs;

#[cfg(test)]
mod fs_kv_tests;

pub use async_fs::AsyncKvFileSystem;
pub use file::{AsyncKvFile, KvFile};
pub use fs::KvFileSystem;
