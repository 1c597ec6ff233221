use crate::{FsError, FsResult, NodeId};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub const S_IFMT: u32 = 0o170000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFDIR: u32 = 0o040000;

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    File,
    Dir,
}

impl FileKind {
    pub fn mode_bits(&self) -> u32 {
        match self {
            FileKind::File => S_IFREG,
            FileKind::Dir => S_IFDIR,
        }
    }

    pub fn from_mode(mode: u32) -> FsResult<Self> {
        match mode & S_IFMT {
            S_IFREG => Ok(FileKind::File),
            S_IFDIR => Ok(FileKind::Dir),
            other => Err(FsError::DecodeError(format!(
                "unknown file kind bits in mode: {:o}",
                other
            ))),
        }
    }
}

/// Metadata record of one filesystem object, stored under its node id.
/// `data_id` points at the payload blob: raw bytes for a file, the encoded
/// name listing for a directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inode {
    pub data_id: NodeId,
    pub size: u64,
    pub mode: u32,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
}

impl Inode {
    pub fn new(data_id: NodeId, size: u64, mode: u32, kind: FileKind) -> Self {
        let now = now_millis();
        Self {
            data_id,
            size,
            mode: (mode & !S_IFMT) | kind.mode_bits(),
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    pub fn kind(&self) -> FsResult<FileKind> {
        FileKind::from_mode(self.mode)
    }

    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    pub fn is_file(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    /// Merge handle-side stats back into the record. Returns whether any
    /// field actually changed, so callers can skip rewriting the blob.
    pub fn update_from_stats(&mut self, stats: &crate::FileStats) -> bool {
        let mut changed = false;
        if self.size != stats.size {
            self.size = stats.size;
            changed = true;
        }
        if self.mode != stats.mode {
            self.mode = stats.mode;
            changed = true;
        }
        if self.atime != stats.atime {
            self.atime = stats.atime;
            changed = true;
        }
        if self.mtime != stats.mtime {
            self.mtime = stats.mtime;
            changed = true;
        }
        if self.ctime != stats.ctime {
            self.ctime = stats.ctime;
            changed = true;
        }
        changed
    }

    pub fn encode(&self) -> FsResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| FsError::DecodeError(e.to_string()))
    }

    pub fn decode(data: &[u8]) -> FsResult<Self> {
        serde_json::from_slice(data).map_err(|e| FsError::DecodeError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FileStats;

    #[test]
    fn test_inode_roundtrip() {
        let inode = Inode::new(NodeId::random(), 42, 0o644, FileKind::File);
        let blob = inode.encode().unwrap();
        let back = Inode::decode(&blob).unwrap();
        assert_eq!(back, inode);
    }

    #[test]
    fn test_kind_bits() {
        let file = Inode::new(NodeId::random(), 0, 0o666, FileKind::File);
        assert!(file.is_file());
        assert!(!file.is_dir());
        assert_eq!(file.kind().unwrap(), FileKind::File);
        assert_eq!(file.mode & 0o777, 0o666);

        let dir = Inode::new(NodeId::random(), 4096, 0o777, FileKind::Dir);
        assert!(dir.is_dir());
        assert_eq!(dir.kind().unwrap(), FileKind::Dir);
    }

    #[test]
    fn test_update_from_stats() {
        let mut inode = Inode::new(NodeId::random(), 0, 0o666, FileKind::File);
        let unchanged = FileStats::from(&inode);
        assert!(!inode.update_from_stats(&unchanged));

        let mut stats = FileStats::from(&inode);
        stats.size = 5;
        stats.mtime += 10;
        assert!(inode.update_from_stats(&stats));
        assert_eq!(inode.size, 5);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            Inode::decode(b"not json"),
            Err(FsError::DecodeError(_))
        ));
    }
}
