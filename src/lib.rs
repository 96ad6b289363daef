//! node-compat - Node.js-compatible Buffer and file-system bridge
//!
//! Native building blocks for hosts that expose Node's `Buffer` and `fs`
//! contracts to a managed caller.
//!
//! # Features
//!
//! - **Buffer**: fixed-length byte container with utf8, utf16le, latin1,
//!   ascii, hex, base64 and base64url codecs plus bounds-checked
//!   fixed-width numeric reads and writes
//! - **Native handles**: generational slot tables that give every native
//!   resource exactly one owner and make release idempotent
//! - **Async bridge**: single-fire completion tokens dispatched on a worker
//!   pool, with results delivered exactly once
//! - **File system**: blocking and worker-dispatched variants of every
//!   operation, owned `FileHandle`s, directory streams and watchers
//!
//! # Example
//!
//! ```rust
//! use node_compat::buffer::{Buffer, StringEncoding};
//!
//! let buffer = Buffer::from_string("hello", StringEncoding::Utf8).unwrap();
//! assert_eq!(buffer.to_string_with(StringEncoding::Hex), "68656c6c6f");
//! assert_eq!(buffer.read_uint16_be(0).unwrap(), 0x6865);
//! ```
//!
//! # Architecture
//!
//! ```text
//! caller ──► fs façade ──► PathLike::resolve ──┬──► sync::* (caller thread)
//!                                              │
//!                                              └──► bridge::spawn
//!                                                     │
//!                                    worker pool ◄────┘
//!                                          │
//!                         CallbackToken::settle ──► Pending<T> (once)
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod config;
pub mod error;
pub mod fs;
pub mod runtime;

pub use buffer::{atob, btoa, Buffer, BufferView, StringEncoding};
pub use config::{ConfigError, RuntimeConfig};
pub use error::{NodeError, NodeResult};
pub use fs::{FileHandle, PathLike, Stats};
pub use runtime::{CallerContext, Pending};
