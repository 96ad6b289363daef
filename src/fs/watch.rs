//! Change notification
//!
//! Two watcher kinds:
//!
//! - [`watch`] subscribes to OS notifications (inotify, FSEvents, ...) via
//!   `notify` and reports `rename` / `change` events with the affected name
//! - [`watch_file`] polls `stat` on an interval and reports
//!   `(current, previous)` whenever the two differ
//!
//! Both own a slot in a handle table that `close` releases. A watcher holds
//! a runtime keep-alive reference while it is ref'd; `persistent: false`
//! starts it unref'd. Listeners run on the notifying thread unless a
//! [`CallerContext`] is supplied, in which case they are posted to it.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use lazy_static::lazy_static;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use super::path::PathLike;
use super::stat::Stats;
use super::sync;
use super::{fs_config, FsResult, StatOptions};
use crate::error::NodeError;
use crate::runtime::handle::{HandleTable, NativeHandle};
use crate::runtime::{self, CallerContext};

lazy_static! {
    static ref PATH_WATCHERS: HandleTable<PathWatch> = HandleTable::new("FSWatcher");
    static ref STAT_POLLS: HandleTable<StatPoll> = HandleTable::new("StatWatcher");
    static ref STAT_REGISTRY: Mutex<HashMap<PathBuf, Vec<Arc<StatShared>>>> =
        Mutex::new(HashMap::new());
}

// =============================================================================
// Shared Plumbing
// =============================================================================

/// Keep-alive flag shared by both watcher kinds
struct KeepAlive {
    refed: AtomicBool,
}

impl KeepAlive {
    fn new(persistent: bool) -> Self {
        if persistent {
            runtime::acquire_ref();
        }
        Self {
            refed: AtomicBool::new(persistent),
        }
    }

    fn hold(&self) {
        if !self.refed.swap(true, Ordering::AcqRel) {
            runtime::acquire_ref();
        }
    }

    fn drop_ref(&self) {
        if self.refed.swap(false, Ordering::AcqRel) {
            runtime::release_ref();
        }
    }

    fn is_held(&self) -> bool {
        self.refed.load(Ordering::Acquire)
    }
}

type Listener<E> = Arc<dyn Fn(E) + Send + Sync + 'static>;

/// Routes events to the listener, directly or through a caller context
struct Delivery<E> {
    listener: Listener<E>,
    context: Option<CallerContext>,
    closed: Arc<AtomicBool>,
}

impl<E: Send + 'static> Delivery<E> {
    fn send(&self, event: E) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        match &self.context {
            Some(context) => {
                let listener = Arc::clone(&self.listener);
                let closed = Arc::clone(&self.closed);
                context.post(move || {
                    if !closed.load(Ordering::Acquire) {
                        listener(event)
                    }
                });
            }
            None => (self.listener)(event),
        }
    }
}

fn watch_error(error: notify::Error, path: &Path) -> NodeError {
    let source = match error.kind {
        notify::ErrorKind::Io(e) => e,
        notify::ErrorKind::PathNotFound => io::Error::from_raw_os_error(libc::ENOENT),
        notify::ErrorKind::MaxFilesWatch => io::Error::from_raw_os_error(libc::ENOSPC),
        other => io::Error::new(io::ErrorKind::Other, format!("{:?}", other)),
    };
    NodeError::io(source, "watch", Some(path.display().to_string()))
}

// =============================================================================
// Path Watchers
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchEventType {
    /// Entry created, removed or renamed
    Rename,
    /// Contents or metadata changed
    Change,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchEvent {
    pub event_type: WatchEventType,
    /// Name relative to the watched directory, or the file's own name
    pub filename: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Hold a keep-alive reference while watching
    pub persistent: bool,
    pub recursive: bool,
    pub context: Option<CallerContext>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            persistent: true,
            recursive: false,
            context: None,
        }
    }
}

pub struct PathWatch {
    watcher: Mutex<Option<RecommendedWatcher>>,
}

fn event_type(kind: &EventKind) -> Option<WatchEventType> {
    match kind {
        EventKind::Access(_) => None,
        EventKind::Create(_) | EventKind::Remove(_) => Some(WatchEventType::Rename),
        EventKind::Modify(ModifyKind::Name(_)) => Some(WatchEventType::Rename),
        _ => Some(WatchEventType::Change),
    }
}

fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path
        .strip_prefix(root)
        .ok()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .or_else(|| path.file_name().map(PathBuf::from))?;
    Some(relative.to_string_lossy().into_owned())
}

fn translate(root: &Path, event: &Event) -> Vec<WatchEvent> {
    let Some(event_type) = event_type(&event.kind) else {
        return Vec::new();
    };
    if event.paths.is_empty() {
        return vec![WatchEvent {
            event_type,
            filename: None,
        }];
    }
    event
        .paths
        .iter()
        .map(|path| WatchEvent {
            event_type,
            filename: relative_name(root, path),
        })
        .collect()
}

/// Watcher returned by [`watch`]
pub struct FsWatcher {
    handle: NativeHandle<PathWatch>,
    keep_alive: KeepAlive,
    closed: Arc<AtomicBool>,
    path: PathBuf,
}

/// Watch `path` (a file or directory) for changes
pub fn watch<F>(path: impl Into<PathLike>, options: WatchOptions, listener: F) -> FsResult<FsWatcher>
where
    F: Fn(WatchEvent) + Send + Sync + 'static,
{
    let path = path.into().to_path()?;
    let metadata =
        fs::metadata(&path).map_err(|e| NodeError::io(e, "watch", Some(path.display().to_string())))?;

    // Events on a watched file are named after the file itself
    let root = if metadata.is_dir() {
        path.clone()
    } else {
        path.parent().map(Path::to_path_buf).unwrap_or_default()
    };
    let closed = Arc::new(AtomicBool::new(false));
    let delivery = Delivery {
        listener: Arc::new(listener) as Listener<WatchEvent>,
        context: options.context.clone(),
        closed: Arc::clone(&closed),
    };

    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| match result {
        Ok(event) => {
            for change in translate(&root, &event) {
                delivery.send(change);
            }
        }
        Err(e) => warn!(error = %e, "watch notification failed"),
    })
    .map_err(|e| watch_error(e, &path))?;

    let mode = if options.recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    watcher.watch(&path, mode).map_err(|e| watch_error(e, &path))?;

    let handle = PATH_WATCHERS.insert(PathWatch {
        watcher: Mutex::new(Some(watcher)),
    });
    debug!(watcher = %handle.id(), path = %path.display(), recursive = options.recursive, "watcher opened");
    Ok(FsWatcher {
        handle,
        keep_alive: KeepAlive::new(options.persistent),
        closed,
        path,
    })
}

impl FsWatcher {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hold the process open while this watcher is active
    pub fn ref_(&self) -> &Self {
        if !self.is_closed() {
            self.keep_alive.hold();
        }
        self
    }

    pub fn unref(&self) -> &Self {
        self.keep_alive.drop_ref();
        self
    }

    pub fn has_ref(&self) -> bool {
        self.keep_alive.is_held()
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_released()
    }

    /// Stop watching. Closing twice is a no-op.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.keep_alive.drop_ref();
        if let Some(state) = self.handle.release() {
            // Dropping the notify watcher unsubscribes it
            state.watcher.lock().take();
            debug!(watcher = %self.handle.id(), path = %self.path.display(), "watcher closed");
        }
    }
}

impl Drop for FsWatcher {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for FsWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsWatcher")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .field("ref", &self.has_ref())
            .finish()
    }
}

// =============================================================================
// Stat Watchers
// =============================================================================

#[derive(Debug, Clone)]
pub struct WatchFileOptions {
    pub persistent: bool,
    /// Poll interval; defaults to the configured `fs.watch_interval_ms`
    pub interval: Option<Duration>,
    pub bigint: bool,
    pub context: Option<CallerContext>,
}

impl Default for WatchFileOptions {
    fn default() -> Self {
        Self {
            persistent: true,
            interval: None,
            bigint: false,
            context: None,
        }
    }
}

pub struct StatPoll {
    stop: Sender<()>,
}

struct StatShared {
    handle: NativeHandle<StatPoll>,
    keep_alive: KeepAlive,
    closed: Arc<AtomicBool>,
    path: PathBuf,
}

impl StatShared {
    fn close(&self) -> bool {
        self.closed.store(true, Ordering::Release);
        self.keep_alive.drop_ref();
        match self.handle.release() {
            Some(poll) => {
                let _ = poll.stop.try_send(());
                debug!(watcher = %self.handle.id(), path = %self.path.display(), "stat watcher closed");
                true
            }
            None => false,
        }
    }
}

/// Fields whose change counts as a modification (access time excluded)
fn fingerprint(stats: &Stats) -> (u64, u64, u64, u64, u64, u64, i64, i64) {
    match stats {
        Stats::Number(s) => (
            s.dev as u64,
            s.ino as u64,
            s.mode as u64,
            s.uid as u64,
            s.gid as u64,
            s.size as u64,
            (s.mtime_ms * 1_000_000.0) as i64,
            (s.ctime_ms * 1_000_000.0) as i64,
        ),
        Stats::BigInt(s) => (
            s.dev, s.ino, s.mode, s.uid, s.gid, s.size, s.mtime_ns, s.ctime_ns,
        ),
    }
}

fn poll_stat(path: &Path, bigint: bool) -> Stats {
    sync::stat(path, StatOptions { bigint }).unwrap_or_else(|_| Stats::zeroed(bigint))
}

/// Watcher returned by [`watch_file`]
pub struct StatWatcher {
    shared: Arc<StatShared>,
}

/// Poll `path` and call `listener(current, previous)` whenever it changes.
/// A missing file reports zeroed stats.
pub fn watch_file<F>(
    path: impl Into<PathLike>,
    options: WatchFileOptions,
    listener: F,
) -> FsResult<StatWatcher>
where
    F: Fn(Stats, Stats) + Send + Sync + 'static,
{
    let path = path.into().to_path()?;
    let interval = options
        .interval
        .unwrap_or_else(|| fs_config().watch_interval());
    let bigint = options.bigint;
    let closed = Arc::new(AtomicBool::new(false));
    let delivery = Delivery {
        listener: Arc::new(move |(current, previous): (Stats, Stats)| listener(current, previous))
            as Listener<(Stats, Stats)>,
        context: options.context.clone(),
        closed: Arc::clone(&closed),
    };

    let (stop, stopped) = bounded::<()>(1);
    let polled = path.clone();
    let mut previous = poll_stat(&polled, bigint);
    thread::Builder::new()
        .name("stat-watcher".to_string())
        .spawn(move || loop {
            match stopped.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
            let current = poll_stat(&polled, bigint);
            if fingerprint(&current) != fingerprint(&previous) {
                delivery.send((current, previous));
                previous = current;
            }
        })
        .map_err(|e| NodeError::io(e, "watch", Some(path.display().to_string())))?;

    let handle = STAT_POLLS.insert(StatPoll { stop });
    debug!(watcher = %handle.id(), path = %path.display(), ?interval, "stat watcher opened");
    let shared = Arc::new(StatShared {
        handle,
        keep_alive: KeepAlive::new(options.persistent),
        closed,
        path: path.clone(),
    });
    STAT_REGISTRY
        .lock()
        .entry(path)
        .or_default()
        .push(Arc::clone(&shared));
    Ok(StatWatcher { shared })
}

/// Stop every stat watcher on `path`. Returns how many were stopped.
pub fn unwatch_file(path: impl Into<PathLike>) -> FsResult<usize> {
    let path = path.into().to_path()?;
    let watchers = STAT_REGISTRY.lock().remove(&path).unwrap_or_default();
    Ok(watchers.iter().filter(|w| w.close()).count())
}

impl StatWatcher {
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn ref_(&self) -> &Self {
        if !self.is_closed() {
            self.shared.keep_alive.hold();
        }
        self
    }

    pub fn unref(&self) -> &Self {
        self.shared.keep_alive.drop_ref();
        self
    }

    pub fn has_ref(&self) -> bool {
        self.shared.keep_alive.is_held()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.handle.is_released()
    }

    /// Stop polling. Closing twice is a no-op.
    pub fn close(&self) {
        if self.shared.close() {
            let mut registry = STAT_REGISTRY.lock();
            if let Some(list) = registry.get_mut(&self.shared.path) {
                list.retain(|w| !Arc::ptr_eq(w, &self.shared));
                if list.is_empty() {
                    registry.remove(&self.shared.path);
                }
            }
        }
    }
}

impl Drop for StatWatcher {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for StatWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatWatcher")
            .field("path", &self.shared.path)
            .field("closed", &self.is_closed())
            .field("ref", &self.has_ref())
            .finish()
    }
}
