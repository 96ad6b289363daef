//! File-system façade
//!
//! Every operation family comes in two forms with identical arguments:
//!
//! - [`sync`]: runs on the calling thread and returns the result directly
//! - [`promises`]: validates arguments on the calling thread, then runs the
//!   same work on the worker pool and returns a [`Pending`] that settles
//!   exactly once
//!
//! Path arguments go through [`PathLike`] and are normalised once before
//! any system call. Buffers handed to async operations cross to the worker
//! as [`BufferView`]s, so releasing the owning buffer mid-flight fails the
//! operation instead of touching freed storage.
//!
//! [`Pending`]: crate::runtime::Pending
//! [`BufferView`]: crate::buffer::BufferView

pub mod constants;
pub mod dir;
pub mod file_handle;
pub mod path;
pub mod promises;
pub mod stat;
pub mod sync;
pub mod watch;

pub use constants::OpenFlags;
pub use dir::{Dir, Dirent, FileType};
pub use file_handle::FileHandle;
pub use path::{PathLike, Target};
pub use stat::{BigIntStats, FileStat, StatFs, StatMode, Stats};
pub use sync::*;
pub use watch::{
    unwatch_file, watch, watch_file, FsWatcher, StatWatcher, WatchEvent, WatchEventType,
    WatchFileOptions, WatchOptions,
};

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use filetime::FileTime;

use crate::buffer::{Buffer, BufferView, StringEncoding};
use crate::config::FsConfig;
use crate::error::{NodeError, NodeResult};
use crate::runtime;

/// Result type of file-system operations
pub type FsResult<T> = NodeResult<T>;

/// File-system settings of the running runtime, or defaults
pub(crate) fn fs_config() -> FsConfig {
    runtime::try_current()
        .map(|rt| rt.config().fs.clone())
        .unwrap_or_default()
}

// =============================================================================
// Data Arguments
// =============================================================================

/// Data accepted by write operations
#[derive(Debug, Clone, Copy)]
pub enum FileData<'a> {
    Bytes(&'a [u8]),
    /// Text, decoded with the operation's encoding
    Text(&'a str),
    Buffer(&'a Buffer),
}

impl FileData<'_> {
    pub(crate) fn to_bytes(&self, encoding: StringEncoding) -> NodeResult<Vec<u8>> {
        match self {
            FileData::Bytes(bytes) => Ok(bytes.to_vec()),
            FileData::Text(text) => encoding.decode(text),
            FileData::Buffer(buffer) => Ok(buffer.to_vec()),
        }
    }

    /// Owned form that can move to a worker. Text is decoded here so that
    /// encoding errors surface before dispatch.
    pub(crate) fn to_owned_data(&self, encoding: StringEncoding) -> NodeResult<OwnedData> {
        match self {
            FileData::Buffer(buffer) => Ok(OwnedData::View(buffer.view())),
            other => other.to_bytes(encoding).map(OwnedData::Bytes),
        }
    }
}

impl<'a> From<&'a [u8]> for FileData<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        FileData::Bytes(bytes)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for FileData<'a> {
    fn from(bytes: &'a [u8; N]) -> Self {
        FileData::Bytes(bytes)
    }
}

impl<'a> From<&'a Vec<u8>> for FileData<'a> {
    fn from(bytes: &'a Vec<u8>) -> Self {
        FileData::Bytes(bytes)
    }
}

impl<'a> From<&'a str> for FileData<'a> {
    fn from(text: &'a str) -> Self {
        FileData::Text(text)
    }
}

impl<'a> From<&'a String> for FileData<'a> {
    fn from(text: &'a String) -> Self {
        FileData::Text(text)
    }
}

impl<'a> From<&'a Buffer> for FileData<'a> {
    fn from(buffer: &'a Buffer) -> Self {
        FileData::Buffer(buffer)
    }
}

/// Write payload after it left the caller's thread
pub(crate) enum OwnedData {
    Bytes(Vec<u8>),
    View(BufferView),
}

impl OwnedData {
    /// Run `f` over the bytes. A view is copied out first so the buffer is
    /// not locked while `f` does I/O.
    pub(crate) fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> NodeResult<R> {
        match self {
            OwnedData::Bytes(bytes) => Ok(f(bytes)),
            OwnedData::View(view) => Ok(f(&view.to_vec()?)),
        }
    }
}

/// Timestamp argument for `utimes` and friends
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeLike {
    /// Seconds since the Unix epoch, fractional part kept
    Seconds(f64),
    Date(DateTime<Utc>),
}

impl TimeLike {
    pub(crate) fn to_file_time(self) -> NodeResult<FileTime> {
        match self {
            TimeLike::Seconds(secs) if secs.is_finite() => {
                let whole = secs.floor();
                let nanos = ((secs - whole) * 1e9) as u32;
                Ok(FileTime::from_unix_time(whole as i64, nanos))
            }
            TimeLike::Seconds(secs) => Err(NodeError::arg_value("time", secs)),
            TimeLike::Date(date) => Ok(FileTime::from_unix_time(
                date.timestamp(),
                date.timestamp_subsec_nanos(),
            )),
        }
    }
}

impl From<f64> for TimeLike {
    fn from(secs: f64) -> Self {
        TimeLike::Seconds(secs)
    }
}

impl From<DateTime<Utc>> for TimeLike {
    fn from(date: DateTime<Utc>) -> Self {
        TimeLike::Date(date)
    }
}

impl From<SystemTime> for TimeLike {
    fn from(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(d) => TimeLike::Seconds(d.as_secs_f64()),
            Err(e) => TimeLike::Seconds(-e.duration().as_secs_f64()),
        }
    }
}

// =============================================================================
// Options
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MkdirOptions {
    /// Create missing parents; the result is the first directory created
    pub recursive: bool,
    pub mode: u32,
}

impl Default for MkdirOptions {
    fn default() -> Self {
        Self {
            recursive: false,
            mode: constants::DEFAULT_DIR_MODE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RmOptions {
    pub recursive: bool,
    /// Ignore a missing path
    pub force: bool,
    /// Retries on EBUSY, EMFILE, ENFILE, ENOTEMPTY and EPERM
    pub max_retries: u32,
    /// Base delay between retries, growing linearly. Defaults to the
    /// configured `fs.rm_retry_delay_ms`.
    pub retry_delay: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RmdirOptions {
    pub recursive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpOptions {
    pub recursive: bool,
    /// Overwrite existing destinations
    pub force: bool,
    /// With `force` off, fail instead of skipping existing destinations
    pub error_on_exist: bool,
    pub preserve_timestamps: bool,
}

impl Default for CpOptions {
    fn default() -> Self {
        Self {
            recursive: false,
            force: true,
            error_on_exist: false,
            preserve_timestamps: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatOptions {
    pub bigint: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReadFileOptions {
    pub flag: OpenFlags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFileOptions {
    pub encoding: StringEncoding,
    pub mode: u32,
    pub flag: OpenFlags,
}

impl Default for WriteFileOptions {
    fn default() -> Self {
        Self {
            encoding: StringEncoding::Utf8,
            mode: constants::DEFAULT_FILE_MODE,
            flag: OpenFlags::from("w"),
        }
    }
}

impl WriteFileOptions {
    /// Defaults used by `append_file`
    pub fn append() -> Self {
        Self {
            flag: OpenFlags::from("a"),
            ..Self::default()
        }
    }
}
