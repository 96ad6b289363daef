//! Directory streams and entries

use std::fs::{self, ReadDir};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::trace;

use crate::error::{NodeError, NodeResult};
use crate::runtime::bridge::{self, Pending};
use crate::runtime::handle::{HandleTable, NativeHandle, WeakHandle};

lazy_static! {
    static ref DIRS: HandleTable<DirStream> = HandleTable::new("Dir");
}

/// Kind of a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    File,
    Directory,
    Symlink,
    Fifo,
    Socket,
    BlockDevice,
    CharDevice,
    Unknown,
}

impl From<fs::FileType> for FileType {
    fn from(ft: fs::FileType) -> Self {
        if ft.is_file() {
            FileType::File
        } else if ft.is_dir() {
            FileType::Directory
        } else if ft.is_symlink() {
            FileType::Symlink
        } else if ft.is_fifo() {
            FileType::Fifo
        } else if ft.is_socket() {
            FileType::Socket
        } else if ft.is_block_device() {
            FileType::BlockDevice
        } else if ft.is_char_device() {
            FileType::CharDevice
        } else {
            FileType::Unknown
        }
    }
}

/// One directory entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dirent {
    pub name: String,
    pub parent_path: PathBuf,
    pub file_type: FileType,
}

impl Dirent {
    pub(crate) fn from_entry(entry: &fs::DirEntry, parent: &Path) -> Self {
        Self {
            name: entry.file_name().to_string_lossy().into_owned(),
            parent_path: parent.to_path_buf(),
            file_type: entry
                .file_type()
                .map(FileType::from)
                .unwrap_or(FileType::Unknown),
        }
    }

    /// Full path of the entry
    pub fn path(&self) -> PathBuf {
        self.parent_path.join(&self.name)
    }

    pub fn is_file(&self) -> bool {
        self.file_type == FileType::File
    }

    pub fn is_directory(&self) -> bool {
        self.file_type == FileType::Directory
    }

    pub fn is_symbolic_link(&self) -> bool {
        self.file_type == FileType::Symlink
    }

    pub fn is_fifo(&self) -> bool {
        self.file_type == FileType::Fifo
    }

    pub fn is_socket(&self) -> bool {
        self.file_type == FileType::Socket
    }

    pub fn is_block_device(&self) -> bool {
        self.file_type == FileType::BlockDevice
    }

    pub fn is_character_device(&self) -> bool {
        self.file_type == FileType::CharDevice
    }
}

pub struct DirStream {
    path: PathBuf,
    entries: Mutex<ReadDir>,
}

impl DirStream {
    fn next_entry(&self) -> NodeResult<Option<Dirent>> {
        let mut entries = self.entries.lock();
        match entries.next() {
            None => Ok(None),
            Some(Ok(entry)) => Ok(Some(Dirent::from_entry(&entry, &self.path))),
            Some(Err(e)) => Err(NodeError::io(e, "readdir", Some(self.path.display().to_string()))),
        }
    }
}

fn read_through(handle: WeakHandle<DirStream>) -> NodeResult<Option<Dirent>> {
    let stream = handle.resource().map_err(|_| NodeError::Closed("Dir"))?;
    stream.next_entry()
}

/// Open directory stream returned by `opendir`
pub struct Dir {
    handle: NativeHandle<DirStream>,
    path: PathBuf,
}

impl Dir {
    pub(crate) fn open(path: &Path) -> NodeResult<Self> {
        let entries = fs::read_dir(path)
            .map_err(|e| NodeError::io(e, "opendir", Some(path.display().to_string())))?;
        let handle = DIRS.insert(DirStream {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        });
        trace!(dir = %handle.id(), path = %path.display(), "directory opened");
        Ok(Self {
            handle,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_released()
    }

    /// Next entry, or `None` once the stream is exhausted
    pub fn read(&self) -> NodeResult<Option<Dirent>> {
        if self.is_closed() {
            return Err(NodeError::Closed("Dir"));
        }
        read_through(self.handle.downgrade())
    }

    pub fn read_async(&self) -> NodeResult<Pending<Option<Dirent>>> {
        if self.is_closed() {
            return Err(NodeError::Closed("Dir"));
        }
        let handle = self.handle.downgrade();
        bridge::spawn("dir.read", move || read_through(handle))
    }

    /// Close the stream. Closing twice is a no-op.
    pub fn close(&self) -> NodeResult<()> {
        if self.handle.release().is_some() {
            trace!(dir = %self.handle.id(), "directory closed");
        }
        Ok(())
    }

    pub fn close_async(&self) -> NodeResult<Pending<()>> {
        self.close()?;
        let (token, pending) = bridge::register("dir.close");
        token.on_success(())?;
        Ok(pending)
    }
}

impl std::fmt::Debug for Dir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dir")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_all_entries() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let stream = Dir::open(dir.path()).unwrap();
        let mut entries = Vec::new();
        while let Some(entry) = stream.read().unwrap() {
            entries.push(entry);
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_file());
        assert_eq!(entries[0].path(), dir.path().join("a.txt"));
        assert!(entries[1].is_directory());
    }

    #[test]
    fn test_read_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let stream = Dir::open(dir.path()).unwrap();
        stream.close().unwrap();
        stream.close().unwrap();
        assert!(matches!(stream.read(), Err(NodeError::Closed("Dir"))));
        assert!(stream.read_async().is_err());
    }

    #[test]
    fn test_read_async() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("only"), b"").unwrap();

        let stream = Dir::open(dir.path()).unwrap();
        let first = stream.read_async().unwrap().wait().unwrap();
        assert_eq!(first.map(|e| e.name), Some("only".to_string()));
        assert_eq!(stream.read_async().unwrap().wait().unwrap(), None);
        stream.close_async().unwrap().wait().unwrap();
    }

    #[test]
    fn test_open_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = Dir::open(&dir.path().join("missing")).unwrap_err();
        assert_eq!(err.code(), "ENOENT");
    }
}
