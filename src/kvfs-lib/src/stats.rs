use crate::{FileKind, Inode, S_IFMT};
use serde::{Deserialize, Serialize};

/// Snapshot of an inode as seen by callers and by buffered file handles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStats {
    pub size: u64,
    pub mode: u32,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
}

impl FileStats {
    pub fn kind(&self) -> Option<FileKind> {
        FileKind::from_mode(self.mode).ok()
    }

    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == crate::S_IFDIR
    }

    pub fn is_file(&self) -> bool {
        self.mode & S_IFMT == crate::S_IFREG
    }

    pub fn perms(&self) -> u32 {
        self.mode & 0o777
    }
}

impl From<&Inode> for FileStats {
    fn from(inode: &Inode) -> Self {
        Self {
            size: inode.size,
            mode: inode.mode,
            atime: inode.atime,
            mtime: inode.mtime,
            ctime: inode.ctime,
        }
    }
}

/// How a file handle was opened. Writes through a read-only handle are
/// rejected before they reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFlag {
    ReadOnly,
    ReadWrite,
}

impl FileFlag {
    pub fn is_writable(&self) -> bool {
        matches!(self, FileFlag::ReadWrite)
    }
}
