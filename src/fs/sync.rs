//! Blocking file-system operations
//!
//! Everything here runs on the calling thread. The async variants in
//! `promises` run these same functions on a worker after validating their
//! arguments.
//!
//! Descriptor-level functions (`fstat`, `read`, `write`, ...) borrow the
//! descriptor for the duration of the call and never close it; only
//! [`close`] does.

use std::fs::{self, DirBuilder, File, OpenOptions};
use std::io::{self, Read, Write};
use std::mem::ManuallyDrop;
use std::os::unix::fs::{DirBuilderExt, FileExt, OpenOptionsExt, PermissionsExt};
use std::os::unix::io::{FromRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::thread;

use filetime::FileTime;
use libc::c_int;
use nix::sys::stat::{fchmodat, FchmodatFlags, Mode};
use nix::unistd::AccessFlags;
use tracing::debug;

use super::constants::{
    open_options, OpenFlags, COPYFILE_EXCL, COPYFILE_FICLONE_FORCE, DEFAULT_FILE_MODE, O_APPEND,
    O_TRUNC,
};
use super::dir::{Dir, Dirent};
use super::file_handle::FileHandle;
use super::path::{check_fd, PathLike, Target};
use super::stat::{StatFs, Stats};
use super::{
    fs_config, CpOptions, FileData, FsResult, MkdirOptions, ReadFileOptions, RmOptions,
    RmdirOptions, StatOptions, TimeLike, WriteFileOptions,
};
use crate::buffer::{Buffer, BufferView, StringEncoding};
use crate::error::NodeError;

fn shown(path: &Path) -> Option<String> {
    Some(path.display().to_string())
}

fn os_error(code: c_int) -> io::Error {
    io::Error::from_raw_os_error(code)
}

/// Borrow an open descriptor as a `File` without taking ownership
pub(crate) fn with_fd<R>(fd: RawFd, f: impl FnOnce(&File) -> io::Result<R>) -> io::Result<R> {
    if fd < 0 {
        return Err(os_error(libc::EBADF));
    }
    // The descriptor stays owned by the caller; never run File's drop
    let file = ManuallyDrop::new(unsafe { File::from_raw_fd(fd) });
    f(&file)
}

pub(crate) fn read_at(file: &File, bytes: &mut [u8], position: Option<u64>) -> io::Result<usize> {
    match position {
        Some(position) => file.read_at(bytes, position),
        None => {
            let mut file = file;
            file.read(bytes)
        }
    }
}

pub(crate) fn write_at(file: &File, bytes: &[u8], position: Option<u64>) -> io::Result<usize> {
    match position {
        Some(position) => file.write_at(bytes, position),
        None => {
            let mut file = file;
            file.write(bytes)
        }
    }
}

pub(crate) fn read_to_end(file: &File) -> io::Result<Vec<u8>> {
    let mut file = file;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

pub(crate) fn write_all(file: &File, bytes: &[u8]) -> io::Result<()> {
    let mut file = file;
    file.write_all(bytes)
}

/// Validate a `[offset, offset + length)` window into a buffer
pub(crate) fn check_window(buffer_len: usize, offset: usize, length: usize) -> FsResult<()> {
    if offset > buffer_len {
        return Err(NodeError::out_of_range(
            "offset",
            format!(">= 0 && <= {}", buffer_len),
            offset,
        ));
    }
    if length > buffer_len - offset {
        return Err(NodeError::out_of_range(
            "length",
            format!(">= 0 && <= {}", buffer_len - offset),
            length,
        ));
    }
    Ok(())
}

// =============================================================================
// Access and Attributes
// =============================================================================

/// Check the caller's permissions for `path` (`F_OK`, `R_OK`, `W_OK`, `X_OK`)
pub fn access(path: impl Into<PathLike>, mode: c_int) -> FsResult<()> {
    let path = path.into().to_path()?;
    nix::unistd::access(&path, AccessFlags::from_bits_truncate(mode))
        .map_err(|errno| NodeError::io(io::Error::from(errno), "access", shown(&path)))
}

/// True if `path` resolves. Never fails; invalid arguments yield `false`.
pub fn exists(path: impl Into<PathLike>) -> bool {
    match path.into().resolve() {
        Ok(Target::Path(path)) => path.exists(),
        Ok(Target::Fd(fd)) => with_fd(fd, |file| file.metadata()).is_ok(),
        Err(_) => false,
    }
}

pub fn chmod(path: impl Into<PathLike>, mode: u32) -> FsResult<()> {
    let path = path.into().to_path()?;
    fs::set_permissions(&path, fs::Permissions::from_mode(mode))
        .map_err(|e| NodeError::io(e, "chmod", shown(&path)))
}

pub fn fchmod(fd: RawFd, mode: u32) -> FsResult<()> {
    check_fd(fd)?;
    with_fd(fd, |file| file.set_permissions(fs::Permissions::from_mode(mode)))
        .map_err(|e| NodeError::io(e, "fchmod", None))
}

/// Change the mode of a symbolic link itself. Unsupported (`ENOTSUP`) on
/// platforms without link modes, Linux included.
pub fn lchmod(path: impl Into<PathLike>, mode: u32) -> FsResult<()> {
    let path = path.into().to_path()?;
    fchmodat(
        None,
        &path,
        Mode::from_bits_truncate(mode as libc::mode_t),
        FchmodatFlags::NoFollowSymlink,
    )
    .map_err(|errno| NodeError::io(io::Error::from(errno), "lchmod", shown(&path)))
}

pub fn chown(path: impl Into<PathLike>, uid: u32, gid: u32) -> FsResult<()> {
    let path = path.into().to_path()?;
    std::os::unix::fs::chown(&path, Some(uid), Some(gid))
        .map_err(|e| NodeError::io(e, "chown", shown(&path)))
}

pub fn fchown(fd: RawFd, uid: u32, gid: u32) -> FsResult<()> {
    check_fd(fd)?;
    with_fd(fd, |file| std::os::unix::fs::fchown(file, Some(uid), Some(gid)))
        .map_err(|e| NodeError::io(e, "fchown", None))
}

pub fn lchown(path: impl Into<PathLike>, uid: u32, gid: u32) -> FsResult<()> {
    let path = path.into().to_path()?;
    std::os::unix::fs::lchown(&path, Some(uid), Some(gid))
        .map_err(|e| NodeError::io(e, "lchown", shown(&path)))
}

pub fn utimes(
    path: impl Into<PathLike>,
    atime: impl Into<TimeLike>,
    mtime: impl Into<TimeLike>,
) -> FsResult<()> {
    let path = path.into().to_path()?;
    let (atime, mtime) = (atime.into().to_file_time()?, mtime.into().to_file_time()?);
    filetime::set_file_times(&path, atime, mtime)
        .map_err(|e| NodeError::io(e, "utime", shown(&path)))
}

pub fn futimes(fd: RawFd, atime: impl Into<TimeLike>, mtime: impl Into<TimeLike>) -> FsResult<()> {
    check_fd(fd)?;
    let (atime, mtime) = (atime.into().to_file_time()?, mtime.into().to_file_time()?);
    with_fd(fd, |file| filetime::set_file_handle_times(file, Some(atime), Some(mtime)))
        .map_err(|e| NodeError::io(e, "futime", None))
}

/// `utimes` on a symbolic link itself
pub fn lutimes(
    path: impl Into<PathLike>,
    atime: impl Into<TimeLike>,
    mtime: impl Into<TimeLike>,
) -> FsResult<()> {
    let path = path.into().to_path()?;
    let (atime, mtime) = (atime.into().to_file_time()?, mtime.into().to_file_time()?);
    filetime::set_symlink_file_times(&path, atime, mtime)
        .map_err(|e| NodeError::io(e, "lutime", shown(&path)))
}

// =============================================================================
// Status
// =============================================================================

/// Stats of a path (following links) or of an open descriptor
pub fn stat(path: impl Into<PathLike>, options: StatOptions) -> FsResult<Stats> {
    match path.into().resolve()? {
        Target::Path(path) => fs::metadata(&path)
            .map(|m| Stats::from_metadata(&m, options.bigint))
            .map_err(|e| NodeError::io(e, "stat", shown(&path))),
        Target::Fd(fd) => fstat(fd, options),
    }
}

/// Stats of a path without following a final symbolic link
pub fn lstat(path: impl Into<PathLike>, options: StatOptions) -> FsResult<Stats> {
    let path = path.into().to_path()?;
    fs::symlink_metadata(&path)
        .map(|m| Stats::from_metadata(&m, options.bigint))
        .map_err(|e| NodeError::io(e, "lstat", shown(&path)))
}

pub fn fstat(fd: RawFd, options: StatOptions) -> FsResult<Stats> {
    check_fd(fd)?;
    with_fd(fd, |file| file.metadata())
        .map(|m| Stats::from_metadata(&m, options.bigint))
        .map_err(|e| NodeError::io(e, "fstat", None))
}

pub fn statfs(path: impl Into<PathLike>) -> FsResult<StatFs> {
    let path = path.into().to_path()?;
    StatFs::from_path(&path).map_err(|e| NodeError::io(e, "statfs", shown(&path)))
}

// =============================================================================
// Links and Names
// =============================================================================

pub fn link(existing: impl Into<PathLike>, new_path: impl Into<PathLike>) -> FsResult<()> {
    let existing = existing.into().to_path()?;
    let new_path = new_path.into().to_path()?;
    fs::hard_link(&existing, &new_path).map_err(|e| {
        NodeError::io2(
            e,
            "link",
            existing.display().to_string(),
            new_path.display().to_string(),
        )
    })
}

/// Create `path` as a symbolic link pointing at `target`
pub fn symlink(target: impl Into<PathLike>, path: impl Into<PathLike>) -> FsResult<()> {
    let target = target.into().to_path()?;
    let path = path.into().to_path()?;
    std::os::unix::fs::symlink(&target, &path).map_err(|e| {
        NodeError::io2(
            e,
            "symlink",
            target.display().to_string(),
            path.display().to_string(),
        )
    })
}

pub fn readlink(path: impl Into<PathLike>) -> FsResult<PathBuf> {
    let path = path.into().to_path()?;
    fs::read_link(&path).map_err(|e| NodeError::io(e, "readlink", shown(&path)))
}

pub fn realpath(path: impl Into<PathLike>) -> FsResult<PathBuf> {
    let path = path.into().to_path()?;
    fs::canonicalize(&path).map_err(|e| NodeError::io(e, "realpath", shown(&path)))
}

pub fn rename(old_path: impl Into<PathLike>, new_path: impl Into<PathLike>) -> FsResult<()> {
    let old_path = old_path.into().to_path()?;
    let new_path = new_path.into().to_path()?;
    fs::rename(&old_path, &new_path).map_err(|e| {
        NodeError::io2(
            e,
            "rename",
            old_path.display().to_string(),
            new_path.display().to_string(),
        )
    })
}

pub fn unlink(path: impl Into<PathLike>) -> FsResult<()> {
    let path = path.into().to_path()?;
    fs::remove_file(&path).map_err(|e| NodeError::io(e, "unlink", shown(&path)))
}

/// Truncate (or extend with zeros) a file to `len` bytes
pub fn truncate(path: impl Into<PathLike>, len: u64) -> FsResult<()> {
    match path.into().resolve()? {
        Target::Path(path) => {
            let file = OpenOptions::new()
                .write(true)
                .open(&path)
                .map_err(|e| NodeError::io(e, "open", shown(&path)))?;
            file.set_len(len)
                .map_err(|e| NodeError::io(e, "ftruncate", shown(&path)))
        }
        Target::Fd(fd) => ftruncate(fd, len),
    }
}

pub fn ftruncate(fd: RawFd, len: u64) -> FsResult<()> {
    check_fd(fd)?;
    with_fd(fd, |file| file.set_len(len)).map_err(|e| NodeError::io(e, "ftruncate", None))
}

// =============================================================================
// Directories
// =============================================================================

/// Create a directory. With `recursive`, returns the first directory that
/// had to be created (`None` if it already existed).
pub fn mkdir(path: impl Into<PathLike>, options: MkdirOptions) -> FsResult<Option<PathBuf>> {
    let path = path.into().to_path()?;
    let mut builder = DirBuilder::new();
    builder.mode(options.mode);

    if !options.recursive {
        builder
            .create(&path)
            .map_err(|e| NodeError::io(e, "mkdir", shown(&path)))?;
        return Ok(None);
    }

    let first_created = path
        .ancestors()
        .take_while(|p| !p.as_os_str().is_empty() && fs::symlink_metadata(p).is_err())
        .last()
        .map(Path::to_path_buf);
    builder
        .recursive(true)
        .create(&path)
        .map_err(|e| NodeError::io(e, "mkdir", shown(&path)))?;
    Ok(first_created)
}

/// Create a unique directory named `prefix` plus six random characters
pub fn mkdtemp(prefix: &str) -> FsResult<PathBuf> {
    let template = PathBuf::from(format!("{}XXXXXX", prefix));
    PathLike::from(&template).resolve()?;
    nix::unistd::mkdtemp(&template)
        .map_err(|errno| NodeError::io(io::Error::from(errno), "mkdtemp", shown(&template)))
}

pub fn rmdir(path: impl Into<PathLike>, options: RmdirOptions) -> FsResult<()> {
    let path = path.into().to_path()?;
    let result = if options.recursive {
        fs::remove_dir_all(&path)
    } else {
        fs::remove_dir(&path)
    };
    result.map_err(|e| NodeError::io(e, "rmdir", shown(&path)))
}

fn is_retryable(error: &io::Error) -> bool {
    matches!(
        error.raw_os_error(),
        Some(libc::EBUSY | libc::EMFILE | libc::ENFILE | libc::ENOTEMPTY | libc::EPERM)
    )
}

/// Remove a file or (with `recursive`) a directory tree
pub fn rm(path: impl Into<PathLike>, options: RmOptions) -> FsResult<()> {
    let path = path.into().to_path()?;
    let metadata = match fs::symlink_metadata(&path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound && options.force => return Ok(()),
        Err(e) => return Err(NodeError::io(e, "lstat", shown(&path))),
    };
    let is_dir = metadata.is_dir();
    if is_dir && !options.recursive {
        return Err(NodeError::io(os_error(libc::EISDIR), "rm", shown(&path)));
    }

    let delay = options
        .retry_delay
        .unwrap_or_else(|| fs_config().rm_retry_delay());
    let mut attempt = 0;
    loop {
        let result = if is_dir {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound && options.force => return Ok(()),
            Err(e) if attempt < options.max_retries && is_retryable(&e) => {
                attempt += 1;
                debug!(path = %path.display(), attempt, error = %e, "retrying rm");
                thread::sleep(delay * attempt);
            }
            Err(e) => return Err(NodeError::io(e, "rm", shown(&path))),
        }
    }
}

/// Entry names of a directory
pub fn readdir(path: impl Into<PathLike>) -> FsResult<Vec<String>> {
    Ok(readdir_with_file_types(path)?
        .into_iter()
        .map(|entry| entry.name)
        .collect())
}

pub fn readdir_with_file_types(path: impl Into<PathLike>) -> FsResult<Vec<Dirent>> {
    let path = path.into().to_path()?;
    let scandir = |e| NodeError::io(e, "scandir", shown(&path));
    let mut entries = Vec::new();
    for entry in fs::read_dir(&path).map_err(scandir)? {
        let entry = entry.map_err(scandir)?;
        entries.push(Dirent::from_entry(&entry, &path));
    }
    Ok(entries)
}

pub fn opendir(path: impl Into<PathLike>) -> FsResult<Dir> {
    let path = path.into().to_path()?;
    Dir::open(&path)
}

// =============================================================================
// Copying
// =============================================================================

/// Copy a single file. `mode` is a combination of the `COPYFILE_*` bits.
pub fn copy_file(src: impl Into<PathLike>, dest: impl Into<PathLike>, mode: u32) -> FsResult<()> {
    let src = src.into().to_path()?;
    let dest = dest.into().to_path()?;
    let fail = |e: io::Error| {
        NodeError::io2(e, "copyfile", src.display().to_string(), dest.display().to_string())
    };

    if mode & COPYFILE_FICLONE_FORCE != 0 {
        return Err(fail(os_error(libc::ENOTSUP)));
    }
    if mode & COPYFILE_EXCL != 0 {
        let mut from = File::open(&src).map_err(fail)?;
        let permissions = from.metadata().map_err(fail)?.permissions();
        let mut to = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(permissions.mode())
            .open(&dest)
            .map_err(fail)?;
        io::copy(&mut from, &mut to).map_err(fail)?;
        return Ok(());
    }
    fs::copy(&src, &dest).map(|_| ()).map_err(fail)
}

/// Copy a file, symbolic link or (with `recursive`) a directory tree
pub fn cp(src: impl Into<PathLike>, dest: impl Into<PathLike>, options: CpOptions) -> FsResult<()> {
    let src = src.into().to_path()?;
    let dest = dest.into().to_path()?;
    if src == dest || (options.recursive && dest.starts_with(&src)) {
        return Err(NodeError::io2(
            os_error(libc::EINVAL),
            "cp",
            src.display().to_string(),
            dest.display().to_string(),
        ));
    }
    copy_entry(&src, &dest, &options)
}

fn copy_entry(src: &Path, dest: &Path, options: &CpOptions) -> FsResult<()> {
    let fail = |e: io::Error| {
        NodeError::io2(e, "cp", src.display().to_string(), dest.display().to_string())
    };
    let metadata = fs::symlink_metadata(src).map_err(fail)?;
    let file_type = metadata.file_type();

    if file_type.is_dir() {
        if !options.recursive {
            return Err(fail(os_error(libc::EISDIR)));
        }
        match fs::symlink_metadata(dest) {
            Ok(existing) if !existing.is_dir() => return Err(fail(os_error(libc::ENOTDIR))),
            Ok(_) => {}
            Err(_) => {
                DirBuilder::new()
                    .mode(metadata.permissions().mode())
                    .create(dest)
                    .map_err(fail)?;
            }
        }
        for entry in fs::read_dir(src).map_err(fail)? {
            let entry = entry.map_err(fail)?;
            copy_entry(&entry.path(), &dest.join(entry.file_name()), options)?;
        }
    } else {
        if let Ok(existing) = fs::symlink_metadata(dest) {
            if !options.force {
                if options.error_on_exist {
                    return Err(fail(os_error(libc::EEXIST)));
                }
                return Ok(());
            }
            if file_type.is_symlink() || existing.file_type().is_symlink() {
                fs::remove_file(dest).map_err(fail)?;
            }
        }
        if file_type.is_symlink() {
            let target = fs::read_link(src).map_err(fail)?;
            std::os::unix::fs::symlink(target, dest).map_err(fail)?;
        } else {
            fs::copy(src, dest).map_err(fail)?;
        }
    }

    if options.preserve_timestamps && !file_type.is_symlink() {
        let atime = FileTime::from_last_access_time(&metadata);
        let mtime = FileTime::from_last_modification_time(&metadata);
        filetime::set_file_times(dest, atime, mtime).map_err(fail)?;
    }
    Ok(())
}

// =============================================================================
// Whole-file I/O
// =============================================================================

/// Open `path` and return an owning [`FileHandle`]
pub fn open(
    path: impl Into<PathLike>,
    flags: impl Into<OpenFlags>,
    mode: u32,
) -> FsResult<FileHandle> {
    let path = path.into().to_path()?;
    let bits = flags.into().bits()?;
    FileHandle::open(&path, bits, mode)
}

fn open_file(path: &Path, bits: c_int, mode: u32) -> FsResult<File> {
    open_options(bits, mode)
        .open(path)
        .map_err(|e| NodeError::io(e, "open", shown(path)))
}

/// Entire contents of a file (or the rest of an open descriptor)
pub fn read_file(path: impl Into<PathLike>, options: &ReadFileOptions) -> FsResult<Buffer> {
    let bits = options.flag.bits()?;
    let bytes = match path.into().resolve()? {
        Target::Path(path) => {
            let file = open_file(&path, bits, DEFAULT_FILE_MODE)?;
            read_to_end(&file).map_err(|e| NodeError::io(e, "read", shown(&path)))?
        }
        Target::Fd(fd) => with_fd(fd, read_to_end).map_err(|e| NodeError::io(e, "read", None))?,
    };
    Buffer::from_vec(bytes)
}

/// Entire contents of a file as text
pub fn read_file_to_string(
    path: impl Into<PathLike>,
    encoding: StringEncoding,
) -> FsResult<String> {
    let buffer = read_file(path, &ReadFileOptions::default())?;
    Ok(buffer.to_string_with(encoding))
}

/// Replace the contents of a file, creating it if needed
pub fn write_file<'a>(
    path: impl Into<PathLike>,
    data: impl Into<FileData<'a>>,
    options: &WriteFileOptions,
) -> FsResult<()> {
    let target = path.into().resolve()?;
    let bits = options.flag.bits()?;
    let bytes = data.into().to_bytes(options.encoding)?;
    write_bytes_to(&target, &bytes, bits, options.mode)
}

/// Append to a file, creating it if needed. The flag is always opened in
/// append mode.
pub fn append_file<'a>(
    path: impl Into<PathLike>,
    data: impl Into<FileData<'a>>,
    options: &WriteFileOptions,
) -> FsResult<()> {
    let target = path.into().resolve()?;
    let bits = (options.flag.bits()? | O_APPEND) & !O_TRUNC;
    let bytes = data.into().to_bytes(options.encoding)?;
    write_bytes_to(&target, &bytes, bits, options.mode)
}

pub(crate) fn write_bytes_to(target: &Target, bytes: &[u8], bits: c_int, mode: u32) -> FsResult<()> {
    match target {
        Target::Path(path) => {
            let file = open_file(path, bits, mode)?;
            write_all(&file, bytes).map_err(|e| NodeError::io(e, "write", shown(path)))
        }
        Target::Fd(fd) => {
            with_fd(*fd, |file| write_all(file, bytes)).map_err(|e| NodeError::io(e, "write", None))
        }
    }
}

// =============================================================================
// Descriptors
// =============================================================================

/// Close a raw descriptor
pub fn close(fd: RawFd) -> FsResult<()> {
    check_fd(fd)?;
    nix::unistd::close(fd).map_err(|errno| NodeError::io(io::Error::from(errno), "close", None))
}

pub fn fsync(fd: RawFd) -> FsResult<()> {
    check_fd(fd)?;
    with_fd(fd, |file| file.sync_all()).map_err(|e| NodeError::io(e, "fsync", None))
}

pub fn fdatasync(fd: RawFd) -> FsResult<()> {
    check_fd(fd)?;
    with_fd(fd, |file| file.sync_data()).map_err(|e| NodeError::io(e, "fdatasync", None))
}

/// Read up to `length` bytes into `buffer[offset..]`. Reads at `position`
/// without moving the file offset when given. Returns the count read.
pub fn read(
    fd: RawFd,
    buffer: &Buffer,
    offset: usize,
    length: usize,
    position: Option<u64>,
) -> FsResult<usize> {
    check_fd(fd)?;
    check_window(buffer.len(), offset, length)?;
    buffer.with_bytes_mut(|bytes| read_slice(fd, &mut bytes[offset..offset + length], position))
}

pub(crate) fn read_slice(fd: RawFd, bytes: &mut [u8], position: Option<u64>) -> FsResult<usize> {
    with_fd(fd, |file| read_at(file, bytes, position)).map_err(|e| NodeError::io(e, "read", None))
}

/// Write `buffer[offset..offset + length]`. Returns the count written,
/// which may be short.
pub fn write(
    fd: RawFd,
    buffer: &Buffer,
    offset: usize,
    length: usize,
    position: Option<u64>,
) -> FsResult<usize> {
    check_fd(fd)?;
    check_window(buffer.len(), offset, length)?;
    buffer.with_bytes(|bytes| write_slice(fd, &bytes[offset..offset + length], position))
}

pub(crate) fn write_slice(fd: RawFd, bytes: &[u8], position: Option<u64>) -> FsResult<usize> {
    with_fd(fd, |file| write_at(file, bytes, position)).map_err(|e| NodeError::io(e, "write", None))
}

/// Write `text` encoded with `encoding`
pub fn write_string(
    fd: RawFd,
    text: &str,
    position: Option<u64>,
    encoding: StringEncoding,
) -> FsResult<usize> {
    check_fd(fd)?;
    let bytes = encoding.decode(text)?;
    write_slice(fd, &bytes, position)
}

/// Scatter read into `buffers` in order, stopping at the first short read
pub fn readv(fd: RawFd, buffers: &[&Buffer], position: Option<u64>) -> FsResult<usize> {
    check_fd(fd)?;
    let views: Vec<BufferView> = buffers.iter().map(|b| b.view()).collect();
    readv_views(fd, &views, position)
}

pub(crate) fn readv_views(
    fd: RawFd,
    views: &[BufferView],
    mut position: Option<u64>,
) -> FsResult<usize> {
    let mut total = 0;
    for view in views {
        let mut staging = vec![0; view.len()];
        let count = read_slice(fd, &mut staging, position)?;
        view.store_range(0, &staging[..count])?;
        total += count;
        if let Some(position) = position.as_mut() {
            *position += count as u64;
        }
        if count < view.len() {
            break;
        }
    }
    Ok(total)
}

/// Gather write of `buffers` in order, stopping at the first short write
pub fn writev(fd: RawFd, buffers: &[&Buffer], position: Option<u64>) -> FsResult<usize> {
    check_fd(fd)?;
    let views: Vec<BufferView> = buffers.iter().map(|b| b.view()).collect();
    writev_views(fd, &views, position)
}

pub(crate) fn writev_views(
    fd: RawFd,
    views: &[BufferView],
    mut position: Option<u64>,
) -> FsResult<usize> {
    let mut total = 0;
    for view in views {
        let staging = view.copy_range(0, view.len())?;
        let count = write_slice(fd, &staging, position)?;
        total += count;
        if let Some(position) = position.as_mut() {
            *position += count as u64;
        }
        if count < view.len() {
            break;
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::constants::{F_OK, O_RDWR};
    use crate::fs::stat::StatMode;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn test_write_and_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");

        write_file(&path, "hello", &WriteFileOptions::default()).unwrap();
        append_file(&path, " world", &WriteFileOptions::default()).unwrap();

        let buffer = read_file(&path, &ReadFileOptions::default()).unwrap();
        assert_eq!(buffer.to_vec(), b"hello world");
        assert_eq!(
            read_file_to_string(&path, StringEncoding::Hex).unwrap(),
            hex::encode("hello world")
        );
    }

    #[test]
    fn test_read_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_file(dir.path().join("nope"), &ReadFileOptions::default()).unwrap_err();
        assert_eq!(err.code(), "ENOENT");
        assert_eq!(err.class(), "Error");
    }

    #[test]
    fn test_invalid_flag_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let options = WriteFileOptions {
            flag: OpenFlags::from("bogus"),
            ..WriteFileOptions::default()
        };
        let err = write_file(dir.path().join("x"), "x", &options).unwrap_err();
        assert!(matches!(err, NodeError::InvalidFlags(_)));
        assert!(!exists(dir.path().join("x")));
    }

    #[test]
    fn test_exists_and_access() {
        let dir = tempfile::tempdir().unwrap();
        assert!(exists(dir.path()));
        assert!(!exists(dir.path().join("missing")));
        assert!(!exists("bad\0path"));
        assert!(access(dir.path(), F_OK).is_ok());
        assert_eq!(
            access(dir.path().join("missing"), F_OK).unwrap_err().code(),
            "ENOENT"
        );
    }

    #[test]
    fn test_mkdir_recursive_returns_first_created() {
        let dir = tempfile::tempdir().unwrap();
        let deep = dir.path().join("a/b/c");
        let options = MkdirOptions {
            recursive: true,
            ..MkdirOptions::default()
        };

        assert_eq!(mkdir(&deep, options).unwrap(), Some(dir.path().join("a")));
        assert_eq!(mkdir(&deep, options).unwrap(), None);
        assert!(mkdir(&deep, MkdirOptions::default()).is_err());
    }

    #[test]
    fn test_mkdtemp() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("tmp-");
        let created = mkdtemp(prefix.to_str().unwrap()).unwrap();
        assert!(created.is_dir());
        let name = created.file_name().unwrap().to_str().unwrap();
        assert_eq!(name.len(), "tmp-".len() + 6);
    }

    #[test]
    fn test_rm() {
        let dir = tempfile::tempdir().unwrap();
        let tree = dir.path().join("tree");
        fs::create_dir_all(tree.join("nested")).unwrap();
        fs::write(tree.join("nested/file"), b"x").unwrap();

        let err = rm(&tree, RmOptions::default()).unwrap_err();
        assert_eq!(err.code(), "EISDIR");

        rm(
            &tree,
            RmOptions {
                recursive: true,
                ..RmOptions::default()
            },
        )
        .unwrap();
        assert!(!tree.exists());

        assert!(rm(&tree, RmOptions::default()).is_err());
        rm(
            &tree,
            RmOptions {
                force: true,
                ..RmOptions::default()
            },
        )
        .unwrap();
    }

    #[test]
    fn test_copy_file_modes() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dest = dir.path().join("dest");
        fs::write(&src, b"payload").unwrap();

        copy_file(&src, &dest, 0).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"payload");

        let err = copy_file(&src, &dest, COPYFILE_EXCL).unwrap_err();
        assert_eq!(err.code(), "EEXIST");

        let err = copy_file(&src, dir.path().join("clone"), COPYFILE_FICLONE_FORCE).unwrap_err();
        assert_eq!(err.code(), "ENOTSUP");
    }

    #[test]
    fn test_cp_recursive() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("inner")).unwrap();
        fs::write(src.join("inner/file.txt"), b"deep").unwrap();
        std::os::unix::fs::symlink("inner/file.txt", src.join("link")).unwrap();

        let dest = dir.path().join("dest");
        assert!(cp(&src, &dest, CpOptions::default()).is_err());

        let options = CpOptions {
            recursive: true,
            ..CpOptions::default()
        };
        cp(&src, &dest, options).unwrap();
        assert_eq!(fs::read(dest.join("inner/file.txt")).unwrap(), b"deep");
        assert_eq!(
            fs::read_link(dest.join("link")).unwrap(),
            PathBuf::from("inner/file.txt")
        );

        assert!(cp(&src, src.join("inner/copy"), options).is_err());
    }

    #[test]
    fn test_cp_error_on_exist() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a");
        let dest = dir.path().join("b");
        fs::write(&src, b"new").unwrap();
        fs::write(&dest, b"old").unwrap();

        let keep = CpOptions {
            force: false,
            ..CpOptions::default()
        };
        cp(&src, &dest, keep).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"old");

        let strict = CpOptions {
            force: false,
            error_on_exist: true,
            ..CpOptions::default()
        };
        assert_eq!(cp(&src, &dest, strict).unwrap_err().code(), "EEXIST");
    }

    #[test]
    fn test_links_and_rename() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, b"x").unwrap();

        symlink(&file, dir.path().join("sym")).unwrap();
        assert_eq!(readlink(dir.path().join("sym")).unwrap(), file);
        assert!(lstat(dir.path().join("sym"), StatOptions::default())
            .unwrap()
            .is_symbolic_link());

        link(&file, dir.path().join("hard")).unwrap();
        let stats = stat(&file, StatOptions { bigint: true }).unwrap();
        assert_eq!(stats.as_bigint().unwrap().nlink, 2);

        rename(dir.path().join("hard"), dir.path().join("moved")).unwrap();
        unlink(dir.path().join("moved")).unwrap();
        assert_eq!(
            realpath(dir.path().join("sym")).unwrap(),
            fs::canonicalize(&file).unwrap()
        );
    }

    #[test]
    fn test_truncate_and_utimes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, b"0123456789").unwrap();

        truncate(&file, 4).unwrap();
        assert_eq!(fs::read(&file).unwrap(), b"0123");

        utimes(&file, 1_000.0, 2_000.5).unwrap();
        let stats = stat(&file, StatOptions::default()).unwrap();
        assert_eq!(stats.mtime_ms(), 2_000_500.0);
    }

    #[test]
    fn test_chmod() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, b"").unwrap();

        chmod(&file, 0o600).unwrap();
        let stats = stat(&file, StatOptions::default()).unwrap();
        assert_eq!(stats.as_number().unwrap().mode as u32 & 0o777, 0o600);
    }

    #[test]
    fn test_readdir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("one"), b"").unwrap();
        fs::create_dir(dir.path().join("two")).unwrap();

        let mut names = readdir(dir.path()).unwrap();
        names.sort();
        assert_eq!(names, vec!["one", "two"]);

        let typed = readdir_with_file_types(dir.path()).unwrap();
        assert_eq!(typed.iter().filter(|d| d.is_directory()).count(), 1);
    }

    #[test]
    fn test_descriptor_read_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fd");
        fs::write(&path, b"").unwrap();
        let file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        let fd = file.as_raw_fd();

        let data = Buffer::from_slice(b"abcdef").unwrap();
        assert_eq!(write(fd, &data, 1, 4, Some(0)).unwrap(), 4);
        assert_eq!(write_string(fd, "XY", Some(4), StringEncoding::Utf8).unwrap(), 2);

        let out = Buffer::alloc(8).unwrap();
        assert_eq!(read(fd, &out, 2, 6, Some(0)).unwrap(), 6);
        assert_eq!(out.to_vec(), b"\0\0bcdeXY");

        assert!(read(fd, &out, 4, 5, None).is_err());
        fsync(fd).unwrap();
        fdatasync(fd).unwrap();
        assert_eq!(fstat(fd, StatOptions::default()).unwrap().size(), 6);

        // Descriptor still open after borrowing calls
        ftruncate(fd, 2).unwrap();
        drop(file);
        assert_eq!(fs::read(&path).unwrap(), b"bc");
    }

    #[test]
    fn test_readv_writev() {
        let dir = tempfile::tempdir().unwrap();
        let handle = open(dir.path().join("vec"), O_RDWR | libc::O_CREAT, 0o644).unwrap();
        let fd = handle.fd().unwrap();

        let a = Buffer::from_slice(b"ab").unwrap();
        let b = Buffer::from_slice(b"cde").unwrap();
        assert_eq!(writev(fd, &[&a, &b], Some(0)).unwrap(), 5);

        let x = Buffer::alloc(3).unwrap();
        let y = Buffer::alloc(3).unwrap();
        assert_eq!(readv(fd, &[&x, &y], Some(0)).unwrap(), 5);
        assert_eq!(x.to_vec(), b"abc");
        assert_eq!(y.to_vec(), vec![b'd', b'e', 0]);
        handle.close().unwrap();
    }

    #[test]
    fn test_close_raw_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw");
        let handle = open(&path, "w", 0o644).unwrap();
        let fd = handle.into_raw_fd().unwrap();
        close(fd).unwrap();
        assert_eq!(close(-1).unwrap_err().code(), "ERR_OUT_OF_RANGE");
        assert!(matches!(fstat(-3, StatOptions::default()), Err(NodeError::OutOfRange { .. })));
    }

    #[test]
    fn test_statfs() {
        let dir = tempfile::tempdir().unwrap();
        assert!(statfs(dir.path()).unwrap().bsize > 0);
    }

    #[test]
    fn test_truncate_reports_failing_step() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t");

        let missing = truncate(&path, 0).unwrap_err();
        assert!(matches!(missing, NodeError::Io { syscall: "open", .. }));

        fs::write(&path, b"abc").unwrap();
        let too_long = truncate(&path, u64::MAX).unwrap_err();
        assert!(matches!(too_long, NodeError::Io { syscall: "ftruncate", .. }));
        assert_eq!(fs::read(&path).unwrap(), b"abc");
    }

    #[test]
    fn test_lchmod_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = lchmod(dir.path().join("absent"), 0o600).unwrap_err();
        assert_eq!(err.code(), "ENOENT");
        assert!(matches!(err, NodeError::Io { syscall: "lchmod", .. }));
    }

    #[test]
    fn test_readv_does_not_hold_buffer_during_io() {
        let (read_end, mut write_end) = std::os::unix::net::UnixStream::pair().unwrap();
        let fd = read_end.as_raw_fd();
        let buffer = Buffer::alloc(4).unwrap();
        let view = buffer.view();

        let reader = thread::spawn(move || readv_views(fd, &[view], None));
        thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(buffer.get(0), Some(0));
        assert!(buffer.set(3, b'!'));

        std::io::Write::write_all(&mut write_end, b"ab").unwrap();
        assert_eq!(reader.join().unwrap().unwrap(), 2);
        assert_eq!(buffer.to_vec(), b"ab\0!");
    }
}
