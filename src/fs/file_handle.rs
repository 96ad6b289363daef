//! Owned file descriptors
//!
//! A [`FileHandle`] owns one open descriptor through a slot in the file
//! handle table. Operations resolve the slot on every call, so once the
//! handle is closed every operation fails with [`NodeError::Closed`] without
//! touching the descriptor. Async variants capture a non-owning alias of the
//! slot; closing the handle while one is queued fails that operation the
//! same way.

use std::fs::File;
use std::os::unix::io::{AsRawFd, IntoRawFd, RawFd};
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use libc::c_int;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::constants::open_options;
use super::sync::{self, check_window, read_at, read_to_end, write_all, write_at};
use super::stat::Stats;
use super::{FileData, FsResult, OwnedData, StatOptions, TimeLike};
use crate::buffer::{Buffer, BufferView, StringEncoding};
use crate::error::NodeError;
use crate::runtime::bridge::{self, Pending};
use crate::runtime::handle::{HandleTable, NativeHandle, WeakHandle};

lazy_static! {
    static ref FILES: HandleTable<OpenFile> = HandleTable::new("FileHandle");
}

/// Number of open file handles
pub fn open_handles() -> usize {
    FILES.len()
}

/// Table entry: the descriptor, present until closed or given up
pub struct OpenFile {
    file: Mutex<Option<File>>,
    path: PathBuf,
}

fn with_open<R>(
    handle: WeakHandle<OpenFile>,
    f: impl FnOnce(&File, &Path) -> FsResult<R>,
) -> FsResult<R> {
    let open = handle
        .resource()
        .map_err(|_| NodeError::Closed("FileHandle"))?;
    let guard = open.file.lock();
    match guard.as_ref() {
        Some(file) => f(file, &open.path),
        None => Err(NodeError::Closed("FileHandle")),
    }
}

fn shown(path: &Path) -> Option<String> {
    Some(path.display().to_string())
}

/// Owning wrapper around an open descriptor returned by `open`
pub struct FileHandle {
    handle: NativeHandle<OpenFile>,
    fd: RawFd,
    path: PathBuf,
}

impl FileHandle {
    pub(crate) fn open(path: &Path, bits: c_int, mode: u32) -> FsResult<Self> {
        let file = open_options(bits, mode)
            .open(path)
            .map_err(|e| NodeError::io(e, "open", shown(path)))?;
        let fd = file.as_raw_fd();
        let handle = FILES.insert(OpenFile {
            file: Mutex::new(Some(file)),
            path: path.to_path_buf(),
        });
        trace!(handle = %handle.id(), fd, path = %path.display(), "file opened");
        Ok(Self {
            handle,
            fd,
            path: path.to_path_buf(),
        })
    }

    /// The descriptor, while the handle is open
    pub fn fd(&self) -> FsResult<RawFd> {
        self.ensure_open()?;
        Ok(self.fd)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_released()
    }

    fn ensure_open(&self) -> FsResult<()> {
        if self.is_closed() {
            return Err(NodeError::Closed("FileHandle"));
        }
        Ok(())
    }

    fn run<R>(&self, f: impl FnOnce(&File, &Path) -> FsResult<R>) -> FsResult<R> {
        self.ensure_open()?;
        with_open(self.handle.downgrade(), f)
    }

    fn spawn<T, F>(&self, name: &'static str, f: F) -> FsResult<Pending<T>>
    where
        T: Send + 'static,
        F: FnOnce(&File, &Path) -> FsResult<T> + Send + 'static,
    {
        self.ensure_open()?;
        let handle = self.handle.downgrade();
        bridge::spawn(name, move || with_open(handle, f))
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Read up to `length` bytes into `buffer[offset..]`
    pub fn read(
        &self,
        buffer: &Buffer,
        offset: usize,
        length: usize,
        position: Option<u64>,
    ) -> FsResult<usize> {
        check_window(buffer.len(), offset, length)?;
        self.run(|file, path| {
            buffer
                .with_bytes_mut(|bytes| read_at(file, &mut bytes[offset..offset + length], position))
                .map_err(|e| NodeError::io(e, "read", shown(path)))
        })
    }

    pub fn read_async(
        &self,
        buffer: &Buffer,
        offset: usize,
        length: usize,
        position: Option<u64>,
    ) -> FsResult<Pending<usize>> {
        check_window(buffer.len(), offset, length)?;
        let view = buffer.view();
        self.spawn("filehandle.read", move |file, path| {
            let mut staging = vec![0; length];
            let count = read_at(file, &mut staging, position)
                .map_err(|e| NodeError::io(e, "read", shown(path)))?;
            view.store_range(offset, &staging[..count])?;
            Ok(count)
        })
    }

    /// Rest of the file from the current position
    pub fn read_file(&self) -> FsResult<Buffer> {
        let bytes = self.run(|file, path| {
            read_to_end(file).map_err(|e| NodeError::io(e, "read", shown(path)))
        })?;
        Buffer::from_vec(bytes)
    }

    pub fn read_file_async(&self) -> FsResult<Pending<Buffer>> {
        self.spawn("filehandle.readFile", |file, path| {
            let bytes = read_to_end(file).map_err(|e| NodeError::io(e, "read", shown(path)))?;
            Buffer::from_vec(bytes)
        })
    }

    pub fn readv(&self, buffers: &[&Buffer], position: Option<u64>) -> FsResult<usize> {
        let views: Vec<BufferView> = buffers.iter().map(|b| b.view()).collect();
        self.run(|file, _| sync::readv_views(file.as_raw_fd(), &views, position))
    }

    pub fn readv_async(&self, buffers: &[&Buffer], position: Option<u64>) -> FsResult<Pending<usize>> {
        let views: Vec<BufferView> = buffers.iter().map(|b| b.view()).collect();
        self.spawn("filehandle.readv", move |file, _| {
            sync::readv_views(file.as_raw_fd(), &views, position)
        })
    }

    // =========================================================================
    // Writing
    // =========================================================================

    /// Write `buffer[offset..offset + length]`; the count may be short
    pub fn write(
        &self,
        buffer: &Buffer,
        offset: usize,
        length: usize,
        position: Option<u64>,
    ) -> FsResult<usize> {
        check_window(buffer.len(), offset, length)?;
        self.run(|file, path| {
            buffer
                .with_bytes(|bytes| write_at(file, &bytes[offset..offset + length], position))
                .map_err(|e| NodeError::io(e, "write", shown(path)))
        })
    }

    pub fn write_async(
        &self,
        buffer: &Buffer,
        offset: usize,
        length: usize,
        position: Option<u64>,
    ) -> FsResult<Pending<usize>> {
        check_window(buffer.len(), offset, length)?;
        let view = buffer.view();
        self.spawn("filehandle.write", move |file, path| {
            let staging = view.copy_range(offset, length)?;
            write_at(file, &staging, position).map_err(|e| NodeError::io(e, "write", shown(path)))
        })
    }

    pub fn write_string(
        &self,
        text: &str,
        position: Option<u64>,
        encoding: StringEncoding,
    ) -> FsResult<usize> {
        let bytes = encoding.decode(text)?;
        self.run(|file, path| {
            write_at(file, &bytes, position).map_err(|e| NodeError::io(e, "write", shown(path)))
        })
    }

    pub fn write_string_async(
        &self,
        text: &str,
        position: Option<u64>,
        encoding: StringEncoding,
    ) -> FsResult<Pending<usize>> {
        let bytes = encoding.decode(text)?;
        self.spawn("filehandle.write", move |file, path| {
            write_at(file, &bytes, position).map_err(|e| NodeError::io(e, "write", shown(path)))
        })
    }

    /// Write all of `data` at the current position
    pub fn write_file<'a>(&self, data: impl Into<FileData<'a>>, encoding: StringEncoding) -> FsResult<()> {
        let bytes = data.into().to_bytes(encoding)?;
        self.run(|file, path| {
            write_all(file, &bytes).map_err(|e| NodeError::io(e, "write", shown(path)))
        })
    }

    pub fn write_file_async<'a>(
        &self,
        data: impl Into<FileData<'a>>,
        encoding: StringEncoding,
    ) -> FsResult<Pending<()>> {
        let data = data.into().to_owned_data(encoding)?;
        self.spawn("filehandle.writeFile", move |file, path| write_owned(file, path, &data))
    }

    /// Same as `write_file`; a handle opened with an append flag appends
    pub fn append_file<'a>(
        &self,
        data: impl Into<FileData<'a>>,
        encoding: StringEncoding,
    ) -> FsResult<()> {
        self.write_file(data, encoding)
    }

    pub fn append_file_async<'a>(
        &self,
        data: impl Into<FileData<'a>>,
        encoding: StringEncoding,
    ) -> FsResult<Pending<()>> {
        let data = data.into().to_owned_data(encoding)?;
        self.spawn("filehandle.appendFile", move |file, path| write_owned(file, path, &data))
    }

    pub fn writev(&self, buffers: &[&Buffer], position: Option<u64>) -> FsResult<usize> {
        let views: Vec<BufferView> = buffers.iter().map(|b| b.view()).collect();
        self.run(|file, _| sync::writev_views(file.as_raw_fd(), &views, position))
    }

    pub fn writev_async(
        &self,
        buffers: &[&Buffer],
        position: Option<u64>,
    ) -> FsResult<Pending<usize>> {
        let views: Vec<BufferView> = buffers.iter().map(|b| b.view()).collect();
        self.spawn("filehandle.writev", move |file, _| {
            sync::writev_views(file.as_raw_fd(), &views, position)
        })
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    pub fn stat(&self, options: StatOptions) -> FsResult<Stats> {
        self.run(|file, path| stat_file(file, path, options))
    }

    pub fn stat_async(&self, options: StatOptions) -> FsResult<Pending<Stats>> {
        self.spawn("filehandle.stat", move |file, path| stat_file(file, path, options))
    }

    pub fn truncate(&self, len: u64) -> FsResult<()> {
        self.run(|file, path| {
            file.set_len(len)
                .map_err(|e| NodeError::io(e, "ftruncate", shown(path)))
        })
    }

    pub fn truncate_async(&self, len: u64) -> FsResult<Pending<()>> {
        self.spawn("filehandle.truncate", move |file, path| {
            file.set_len(len)
                .map_err(|e| NodeError::io(e, "ftruncate", shown(path)))
        })
    }

    pub fn sync(&self) -> FsResult<()> {
        self.run(|file, path| file.sync_all().map_err(|e| NodeError::io(e, "fsync", shown(path))))
    }

    pub fn sync_async(&self) -> FsResult<Pending<()>> {
        self.spawn("filehandle.sync", |file, path| {
            file.sync_all().map_err(|e| NodeError::io(e, "fsync", shown(path)))
        })
    }

    pub fn datasync(&self) -> FsResult<()> {
        self.run(|file, path| {
            file.sync_data()
                .map_err(|e| NodeError::io(e, "fdatasync", shown(path)))
        })
    }

    pub fn datasync_async(&self) -> FsResult<Pending<()>> {
        self.spawn("filehandle.datasync", |file, path| {
            file.sync_data()
                .map_err(|e| NodeError::io(e, "fdatasync", shown(path)))
        })
    }

    pub fn chmod(&self, mode: u32) -> FsResult<()> {
        self.run(|file, _| sync::fchmod(file.as_raw_fd(), mode))
    }

    pub fn chmod_async(&self, mode: u32) -> FsResult<Pending<()>> {
        self.spawn("filehandle.chmod", move |file, _| sync::fchmod(file.as_raw_fd(), mode))
    }

    pub fn chown(&self, uid: u32, gid: u32) -> FsResult<()> {
        self.run(|file, _| sync::fchown(file.as_raw_fd(), uid, gid))
    }

    pub fn chown_async(&self, uid: u32, gid: u32) -> FsResult<Pending<()>> {
        self.spawn("filehandle.chown", move |file, _| {
            sync::fchown(file.as_raw_fd(), uid, gid)
        })
    }

    pub fn utimes(&self, atime: impl Into<TimeLike>, mtime: impl Into<TimeLike>) -> FsResult<()> {
        let (atime, mtime) = (atime.into(), mtime.into());
        self.run(|file, _| sync::futimes(file.as_raw_fd(), atime, mtime))
    }

    pub fn utimes_async(
        &self,
        atime: impl Into<TimeLike>,
        mtime: impl Into<TimeLike>,
    ) -> FsResult<Pending<()>> {
        let (atime, mtime) = (atime.into(), mtime.into());
        atime.to_file_time()?;
        mtime.to_file_time()?;
        self.spawn("filehandle.utimes", move |file, _| {
            sync::futimes(file.as_raw_fd(), atime, mtime)
        })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Close the descriptor. Closing twice is a no-op.
    pub fn close(&self) -> FsResult<()> {
        let Some(open) = self.handle.release() else {
            return Ok(());
        };
        let file = open.file.lock().take();
        trace!(handle = %self.handle.id(), fd = self.fd, "file closed");
        match file {
            Some(file) => sync::close(file.into_raw_fd()),
            None => Ok(()),
        }
    }

    /// Mark the handle closed now and close the descriptor on a worker
    pub fn close_async(&self) -> FsResult<Pending<()>> {
        let Some(open) = self.handle.release() else {
            let (token, pending) = bridge::register("filehandle.close");
            token.on_success(())?;
            return Ok(pending);
        };
        trace!(handle = %self.handle.id(), fd = self.fd, "file closing");
        bridge::spawn("filehandle.close", move || match open.file.lock().take() {
            Some(file) => sync::close(file.into_raw_fd()),
            None => Ok(()),
        })
    }

    /// Give up ownership of the descriptor. The handle is closed afterwards
    /// but the descriptor stays open.
    pub fn into_raw_fd(self) -> FsResult<RawFd> {
        let open = self
            .handle
            .release()
            .ok_or(NodeError::Closed("FileHandle"))?;
        let file = open
            .file
            .lock()
            .take()
            .ok_or(NodeError::Closed("FileHandle"))?;
        Ok(file.into_raw_fd())
    }
}

fn write_owned(file: &File, path: &Path, data: &OwnedData) -> FsResult<()> {
    data.with_bytes(|bytes| write_all(file, bytes))?
        .map_err(|e| NodeError::io(e, "write", shown(path)))
}

fn stat_file(file: &File, path: &Path, options: StatOptions) -> FsResult<Stats> {
    file.metadata()
        .map(|m| Stats::from_metadata(&m, options.bigint))
        .map_err(|e| NodeError::io(e, "fstat", shown(path)))
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if !self.is_closed() {
            debug!(fd = self.fd, path = %self.path.display(), "closing file handle on drop");
            let _ = self.close();
        }
    }
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("fd", &self.fd)
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::constants::string_to_flags;

    fn open_rw(path: &Path) -> FileHandle {
        FileHandle::open(path, string_to_flags("w+").unwrap(), 0o644).unwrap()
    }

    #[test]
    fn test_write_then_read_at_position() {
        let dir = tempfile::tempdir().unwrap();
        let handle = open_rw(&dir.path().join("f"));

        let data = Buffer::from_slice(b"hello").unwrap();
        assert_eq!(handle.write(&data, 0, 5, Some(0)).unwrap(), 5);
        assert_eq!(
            handle
                .write_string("4a", Some(0), StringEncoding::Hex)
                .unwrap(),
            1
        );

        let out = Buffer::alloc(5).unwrap();
        assert_eq!(handle.read(&out, 0, 5, Some(0)).unwrap(), 5);
        assert_eq!(out.to_vec(), b"Jello");
        assert_eq!(handle.stat(StatOptions::default()).unwrap().size(), 5);
        handle.close().unwrap();
    }

    #[test]
    fn test_window_validated_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let handle = open_rw(&dir.path().join("f"));
        let buffer = Buffer::alloc(4).unwrap();

        let err = handle.read(&buffer, 2, 3, None).unwrap_err();
        assert_eq!(err.code(), "ERR_OUT_OF_RANGE");
        assert!(handle.write_async(&buffer, 5, 0, None).is_err());
    }

    #[test]
    fn test_operations_after_close_fail() {
        let dir = tempfile::tempdir().unwrap();
        let handle = open_rw(&dir.path().join("f"));
        let id = handle.handle.id();

        handle.close().unwrap();
        handle.close().unwrap();
        assert!(handle.is_closed());
        assert!(!FILES.contains(id));

        let buffer = Buffer::alloc(1).unwrap();
        assert!(matches!(
            handle.read(&buffer, 0, 1, None),
            Err(NodeError::Closed("FileHandle"))
        ));
        assert!(matches!(handle.fd(), Err(NodeError::Closed(_))));
        assert!(handle.stat_async(StatOptions::default()).is_err());
        handle.close_async().unwrap().wait().unwrap();
    }

    #[test]
    fn test_async_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let handle = open_rw(&dir.path().join("f"));

        handle
            .write_file_async("async data", StringEncoding::Utf8)
            .unwrap()
            .wait()
            .unwrap();
        handle.sync_async().unwrap().wait().unwrap();

        let out = Buffer::alloc(5).unwrap();
        let read = handle.read_async(&out, 0, 5, Some(6)).unwrap().wait().unwrap();
        assert_eq!(read, 4);
        assert_eq!(&out.to_vec()[..4], b"data");

        let stats = handle
            .stat_async(StatOptions { bigint: true })
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(stats.as_bigint().unwrap().size, 10);
        handle.close_async().unwrap().wait().unwrap();
        assert!(handle.is_closed());
    }

    #[test]
    fn test_released_buffer_fails_queued_write() {
        let dir = tempfile::tempdir().unwrap();
        let handle = open_rw(&dir.path().join("f"));

        let buffer = Buffer::from_slice(b"abc").unwrap();
        let data = FileData::from(&buffer)
            .to_owned_data(StringEncoding::Utf8)
            .unwrap();
        drop(buffer);

        let err = handle
            .run(|file, path| write_owned(file, path, &data))
            .unwrap_err();
        assert!(err.is_state_error());
        assert_eq!(handle.stat(StatOptions::default()).unwrap().size(), 0);
    }

    #[test]
    fn test_into_raw_fd_keeps_descriptor_open() {
        let dir = tempfile::tempdir().unwrap();
        let handle = open_rw(&dir.path().join("f"));
        handle.write_string("xyz", None, StringEncoding::Utf8).unwrap();

        let fd = handle.into_raw_fd().unwrap();
        assert_eq!(sync::fstat(fd, StatOptions::default()).unwrap().size(), 3);
        sync::close(fd).unwrap();
    }

    #[test]
    fn test_truncate_and_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"0123456789").unwrap();
        let handle = FileHandle::open(&path, string_to_flags("r+").unwrap(), 0).unwrap();

        handle.truncate(3).unwrap();
        assert_eq!(handle.read_file().unwrap().to_vec(), b"012");
        handle.truncate_async(1).unwrap().wait().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"0");
    }

    #[test]
    fn test_drop_closes() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let handle = open_rw(&dir.path().join("f"));
            assert!(FILES.contains(handle.handle.id()));
            handle.handle.id()
        };
        assert!(!FILES.contains(id));
    }
}
