//! Worker-dispatched file-system operations
//!
//! Each function takes the same arguments as its counterpart in `sync`.
//! Argument errors (bad paths, unknown flags, undecodable text, buffer
//! windows out of range) are returned immediately; only the system call
//! runs on the worker pool, and its outcome arrives through the returned
//! [`Pending`].

use std::os::unix::io::RawFd;
use std::path::PathBuf;

use libc::c_int;

use super::constants::OpenFlags;
use super::dir::{Dir, Dirent};
use super::file_handle::FileHandle;
use super::path::{check_fd, PathLike};
use super::stat::{StatFs, Stats};
use super::sync::{self, check_window};
use super::{
    CpOptions, FileData, FsResult, MkdirOptions, ReadFileOptions, RmOptions, RmdirOptions,
    StatOptions, TimeLike, WriteFileOptions,
};
use crate::buffer::{Buffer, BufferView, StringEncoding};
use crate::runtime::bridge::{self, Pending};

/// Normalise on the caller's thread; the worker gets the canonical form
fn checked(path: impl Into<PathLike>) -> FsResult<PathLike> {
    Ok(path.into().resolve()?.into())
}

fn checked_path(path: impl Into<PathLike>) -> FsResult<PathBuf> {
    path.into().to_path()
}

fn checked_times(
    atime: impl Into<TimeLike>,
    mtime: impl Into<TimeLike>,
) -> FsResult<(TimeLike, TimeLike)> {
    let (atime, mtime) = (atime.into(), mtime.into());
    atime.to_file_time()?;
    mtime.to_file_time()?;
    Ok((atime, mtime))
}

// =============================================================================
// Access and Attributes
// =============================================================================

pub fn access(path: impl Into<PathLike>, mode: c_int) -> FsResult<Pending<()>> {
    let path = checked_path(path)?;
    bridge::spawn("access", move || sync::access(path, mode))
}

/// Settles with `false` for anything that does not resolve
pub fn exists(path: impl Into<PathLike>) -> FsResult<Pending<bool>> {
    let path = path.into();
    bridge::spawn("exists", move || Ok(sync::exists(path)))
}

pub fn chmod(path: impl Into<PathLike>, mode: u32) -> FsResult<Pending<()>> {
    let path = checked_path(path)?;
    bridge::spawn("chmod", move || sync::chmod(path, mode))
}

pub fn lchmod(path: impl Into<PathLike>, mode: u32) -> FsResult<Pending<()>> {
    let path = checked_path(path)?;
    bridge::spawn("lchmod", move || sync::lchmod(path, mode))
}

pub fn chown(path: impl Into<PathLike>, uid: u32, gid: u32) -> FsResult<Pending<()>> {
    let path = checked_path(path)?;
    bridge::spawn("chown", move || sync::chown(path, uid, gid))
}

pub fn lchown(path: impl Into<PathLike>, uid: u32, gid: u32) -> FsResult<Pending<()>> {
    let path = checked_path(path)?;
    bridge::spawn("lchown", move || sync::lchown(path, uid, gid))
}

pub fn utimes(
    path: impl Into<PathLike>,
    atime: impl Into<TimeLike>,
    mtime: impl Into<TimeLike>,
) -> FsResult<Pending<()>> {
    let path = checked_path(path)?;
    let (atime, mtime) = checked_times(atime, mtime)?;
    bridge::spawn("utimes", move || sync::utimes(path, atime, mtime))
}

pub fn lutimes(
    path: impl Into<PathLike>,
    atime: impl Into<TimeLike>,
    mtime: impl Into<TimeLike>,
) -> FsResult<Pending<()>> {
    let path = checked_path(path)?;
    let (atime, mtime) = checked_times(atime, mtime)?;
    bridge::spawn("lutimes", move || sync::lutimes(path, atime, mtime))
}

pub fn stat(path: impl Into<PathLike>, options: StatOptions) -> FsResult<Pending<Stats>> {
    let path = checked(path)?;
    bridge::spawn("stat", move || sync::stat(path, options))
}

pub fn lstat(path: impl Into<PathLike>, options: StatOptions) -> FsResult<Pending<Stats>> {
    let path = checked_path(path)?;
    bridge::spawn("lstat", move || sync::lstat(path, options))
}

pub fn statfs(path: impl Into<PathLike>) -> FsResult<Pending<StatFs>> {
    let path = checked_path(path)?;
    bridge::spawn("statfs", move || sync::statfs(path))
}

// =============================================================================
// Links and Names
// =============================================================================

pub fn link(existing: impl Into<PathLike>, new_path: impl Into<PathLike>) -> FsResult<Pending<()>> {
    let (existing, new_path) = (checked_path(existing)?, checked_path(new_path)?);
    bridge::spawn("link", move || sync::link(existing, new_path))
}

pub fn symlink(target: impl Into<PathLike>, path: impl Into<PathLike>) -> FsResult<Pending<()>> {
    let (target, path) = (checked_path(target)?, checked_path(path)?);
    bridge::spawn("symlink", move || sync::symlink(target, path))
}

pub fn readlink(path: impl Into<PathLike>) -> FsResult<Pending<PathBuf>> {
    let path = checked_path(path)?;
    bridge::spawn("readlink", move || sync::readlink(path))
}

pub fn realpath(path: impl Into<PathLike>) -> FsResult<Pending<PathBuf>> {
    let path = checked_path(path)?;
    bridge::spawn("realpath", move || sync::realpath(path))
}

pub fn rename(old_path: impl Into<PathLike>, new_path: impl Into<PathLike>) -> FsResult<Pending<()>> {
    let (old_path, new_path) = (checked_path(old_path)?, checked_path(new_path)?);
    bridge::spawn("rename", move || sync::rename(old_path, new_path))
}

pub fn unlink(path: impl Into<PathLike>) -> FsResult<Pending<()>> {
    let path = checked_path(path)?;
    bridge::spawn("unlink", move || sync::unlink(path))
}

pub fn truncate(path: impl Into<PathLike>, len: u64) -> FsResult<Pending<()>> {
    let path = checked(path)?;
    bridge::spawn("truncate", move || sync::truncate(path, len))
}

// =============================================================================
// Directories and Copies
// =============================================================================

pub fn mkdir(path: impl Into<PathLike>, options: MkdirOptions) -> FsResult<Pending<Option<PathBuf>>> {
    let path = checked_path(path)?;
    bridge::spawn("mkdir", move || sync::mkdir(path, options))
}

pub fn mkdtemp(prefix: &str) -> FsResult<Pending<PathBuf>> {
    checked_path(prefix)?;
    let prefix = prefix.to_string();
    bridge::spawn("mkdtemp", move || sync::mkdtemp(&prefix))
}

pub fn rmdir(path: impl Into<PathLike>, options: RmdirOptions) -> FsResult<Pending<()>> {
    let path = checked_path(path)?;
    bridge::spawn("rmdir", move || sync::rmdir(path, options))
}

pub fn rm(path: impl Into<PathLike>, options: RmOptions) -> FsResult<Pending<()>> {
    let path = checked_path(path)?;
    bridge::spawn("rm", move || sync::rm(path, options))
}

pub fn readdir(path: impl Into<PathLike>) -> FsResult<Pending<Vec<String>>> {
    let path = checked_path(path)?;
    bridge::spawn("readdir", move || sync::readdir(path))
}

pub fn readdir_with_file_types(path: impl Into<PathLike>) -> FsResult<Pending<Vec<Dirent>>> {
    let path = checked_path(path)?;
    bridge::spawn("readdir", move || sync::readdir_with_file_types(path))
}

pub fn opendir(path: impl Into<PathLike>) -> FsResult<Pending<Dir>> {
    let path = checked_path(path)?;
    bridge::spawn("opendir", move || sync::opendir(path))
}

pub fn copy_file(
    src: impl Into<PathLike>,
    dest: impl Into<PathLike>,
    mode: u32,
) -> FsResult<Pending<()>> {
    let (src, dest) = (checked_path(src)?, checked_path(dest)?);
    bridge::spawn("copyFile", move || sync::copy_file(src, dest, mode))
}

pub fn cp(
    src: impl Into<PathLike>,
    dest: impl Into<PathLike>,
    options: CpOptions,
) -> FsResult<Pending<()>> {
    let (src, dest) = (checked_path(src)?, checked_path(dest)?);
    bridge::spawn("cp", move || sync::cp(src, dest, options))
}

// =============================================================================
// Whole-file I/O
// =============================================================================

pub fn open(
    path: impl Into<PathLike>,
    flags: impl Into<OpenFlags>,
    mode: u32,
) -> FsResult<Pending<FileHandle>> {
    let path = checked_path(path)?;
    let bits = flags.into().bits()?;
    bridge::spawn("open", move || FileHandle::open(&path, bits, mode))
}

pub fn read_file(path: impl Into<PathLike>, options: &ReadFileOptions) -> FsResult<Pending<Buffer>> {
    let path = checked(path)?;
    options.flag.bits()?;
    let options = options.clone();
    bridge::spawn("readFile", move || sync::read_file(path, &options))
}

pub fn read_file_to_string(
    path: impl Into<PathLike>,
    encoding: StringEncoding,
) -> FsResult<Pending<String>> {
    let path = checked(path)?;
    bridge::spawn("readFile", move || sync::read_file_to_string(path, encoding))
}

pub fn write_file<'a>(
    path: impl Into<PathLike>,
    data: impl Into<FileData<'a>>,
    options: &WriteFileOptions,
) -> FsResult<Pending<()>> {
    let path = checked(path)?;
    options.flag.bits()?;
    let data = data.into().to_owned_data(options.encoding)?;
    let options = options.clone();
    bridge::spawn("writeFile", move || {
        data.with_bytes(|bytes| sync::write_file(path, bytes, &options))?
    })
}

pub fn append_file<'a>(
    path: impl Into<PathLike>,
    data: impl Into<FileData<'a>>,
    options: &WriteFileOptions,
) -> FsResult<Pending<()>> {
    let path = checked(path)?;
    options.flag.bits()?;
    let data = data.into().to_owned_data(options.encoding)?;
    let options = options.clone();
    bridge::spawn("appendFile", move || {
        data.with_bytes(|bytes| sync::append_file(path, bytes, &options))?
    })
}

// =============================================================================
// Descriptors
// =============================================================================

pub fn close(fd: RawFd) -> FsResult<Pending<()>> {
    check_fd(fd)?;
    bridge::spawn("close", move || sync::close(fd))
}

pub fn fstat(fd: RawFd, options: StatOptions) -> FsResult<Pending<Stats>> {
    check_fd(fd)?;
    bridge::spawn("fstat", move || sync::fstat(fd, options))
}

pub fn fsync(fd: RawFd) -> FsResult<Pending<()>> {
    check_fd(fd)?;
    bridge::spawn("fsync", move || sync::fsync(fd))
}

pub fn fdatasync(fd: RawFd) -> FsResult<Pending<()>> {
    check_fd(fd)?;
    bridge::spawn("fdatasync", move || sync::fdatasync(fd))
}

pub fn ftruncate(fd: RawFd, len: u64) -> FsResult<Pending<()>> {
    check_fd(fd)?;
    bridge::spawn("ftruncate", move || sync::ftruncate(fd, len))
}

pub fn futimes(
    fd: RawFd,
    atime: impl Into<TimeLike>,
    mtime: impl Into<TimeLike>,
) -> FsResult<Pending<()>> {
    check_fd(fd)?;
    let (atime, mtime) = checked_times(atime, mtime)?;
    bridge::spawn("futimes", move || sync::futimes(fd, atime, mtime))
}

pub fn fchmod(fd: RawFd, mode: u32) -> FsResult<Pending<()>> {
    check_fd(fd)?;
    bridge::spawn("fchmod", move || sync::fchmod(fd, mode))
}

pub fn fchown(fd: RawFd, uid: u32, gid: u32) -> FsResult<Pending<()>> {
    check_fd(fd)?;
    bridge::spawn("fchown", move || sync::fchown(fd, uid, gid))
}

pub fn read(
    fd: RawFd,
    buffer: &Buffer,
    offset: usize,
    length: usize,
    position: Option<u64>,
) -> FsResult<Pending<usize>> {
    check_fd(fd)?;
    check_window(buffer.len(), offset, length)?;
    let view = buffer.view();
    bridge::spawn("read", move || {
        let mut staging = vec![0; length];
        let count = sync::read_slice(fd, &mut staging, position)?;
        view.store_range(offset, &staging[..count])?;
        Ok(count)
    })
}

pub fn write(
    fd: RawFd,
    buffer: &Buffer,
    offset: usize,
    length: usize,
    position: Option<u64>,
) -> FsResult<Pending<usize>> {
    check_fd(fd)?;
    check_window(buffer.len(), offset, length)?;
    let view = buffer.view();
    bridge::spawn("write", move || {
        let staging = view.copy_range(offset, length)?;
        sync::write_slice(fd, &staging, position)
    })
}

pub fn write_string(
    fd: RawFd,
    text: &str,
    position: Option<u64>,
    encoding: StringEncoding,
) -> FsResult<Pending<usize>> {
    check_fd(fd)?;
    let bytes = encoding.decode(text)?;
    bridge::spawn("write", move || sync::write_slice(fd, &bytes, position))
}

pub fn readv(fd: RawFd, buffers: &[&Buffer], position: Option<u64>) -> FsResult<Pending<usize>> {
    check_fd(fd)?;
    let views: Vec<BufferView> = buffers.iter().map(|b| b.view()).collect();
    bridge::spawn("readv", move || sync::readv_views(fd, &views, position))
}

pub fn writev(fd: RawFd, buffers: &[&Buffer], position: Option<u64>) -> FsResult<Pending<usize>> {
    check_fd(fd)?;
    let views: Vec<BufferView> = buffers.iter().map(|b| b.view()).collect();
    bridge::spawn("writev", move || sync::writev_views(fd, &views, position))
}
