//! Runtime module
//!
//! Process-wide state shared by the buffer and file-system layers:
//!
//! - `handle`: generational slot tables owning native resources
//! - `pool`: worker threads executing blocking operations
//! - `bridge`: completion tokens delivering results exactly once
//! - `context`: caller-side queues for re-marshalling callbacks
//!
//! The runtime is initialised once per process. [`init`] with an explicit
//! configuration must run before the first asynchronous operation; later
//! calls return the existing runtime unchanged. Operations that need the
//! runtime before anyone initialised it fall back to [`init_default`].

pub mod bridge;
pub mod context;
pub mod handle;
pub mod pool;

pub use bridge::{dispatch, register, spawn, CallbackToken, Pending};
pub use context::CallerContext;
pub use handle::{HandleId, HandleTable, NativeHandle, WeakHandle};
pub use pool::WorkerPool;

use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::OnceCell;
use tracing::{debug, info};

use crate::config::RuntimeConfig;
use crate::error::{NodeError, NodeResult};

static RUNTIME: OnceCell<Runtime> = OnceCell::new();

/// Outstanding keep-alive references (in-flight operations, ref'd watchers)
static ACTIVE_REFS: AtomicUsize = AtomicUsize::new(0);

/// Initialised runtime state
pub struct Runtime {
    config: RuntimeConfig,
    pool: WorkerPool,
}

impl Runtime {
    fn start(config: RuntimeConfig) -> NodeResult<Self> {
        let pool = WorkerPool::new(config.runtime.worker_threads, &config.runtime.thread_name)
            .map_err(|e| NodeError::io(e, "spawn", None))?;
        info!(
            workers = pool.size(),
            pool_slots = config.buffer.pool_slots,
            "runtime initialised"
        );
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }
}

/// Initialise the runtime. Idempotent: only the first call's configuration
/// takes effect.
pub fn init(config: RuntimeConfig) -> NodeResult<&'static Runtime> {
    if let Some(runtime) = RUNTIME.get() {
        debug!("runtime already initialised; ignoring new configuration");
        return Ok(runtime);
    }
    RUNTIME.get_or_try_init(|| Runtime::start(config))
}

/// Initialise with configuration discovered from the working directory,
/// falling back to defaults.
pub fn init_default() -> NodeResult<&'static Runtime> {
    if let Some(runtime) = RUNTIME.get() {
        return Ok(runtime);
    }
    let config = RuntimeConfig::load_from_cwd().unwrap_or_else(|e| {
        debug!(error = %e, "using default runtime configuration");
        RuntimeConfig::default()
    });
    init(config)
}

/// The runtime, initialising it with defaults if needed
pub fn current() -> NodeResult<&'static Runtime> {
    init_default()
}

/// The runtime only if something already initialised it
pub fn try_current() -> Option<&'static Runtime> {
    RUNTIME.get()
}

pub fn is_initialized() -> bool {
    RUNTIME.get().is_some()
}

// =============================================================================
// Keep-alive References
// =============================================================================

pub(crate) fn acquire_ref() {
    ACTIVE_REFS.fetch_add(1, Ordering::AcqRel);
}

pub(crate) fn release_ref() {
    let _ = ACTIVE_REFS.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
}

/// Number of outstanding keep-alive references
pub fn active_refs() -> usize {
    ACTIVE_REFS.load(Ordering::Acquire)
}

/// True while in-flight operations or ref'd watchers should keep the host
/// process alive
pub fn has_refs() -> bool {
    active_refs() > 0
}
