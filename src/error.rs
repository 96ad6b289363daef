//! Error taxonomy
//!
//! Every fallible operation in the crate returns [`NodeError`]. Each variant
//! carries the JavaScript error class and code it would surface as, so a host
//! binding can rebuild the exact error object callers expect.

use std::borrow::Cow;
use std::io;

use thiserror::Error;

/// Error type shared by the buffer, runtime and file-system layers.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Argument of the wrong type
    #[error("The \"{name}\" argument must be {expected}")]
    InvalidArgType {
        name: &'static str,
        expected: Cow<'static, str>,
    },

    /// Argument of the right type but an unusable value
    #[error("The argument '{name}' is invalid. Received {received}")]
    InvalidArgValue {
        name: &'static str,
        received: String,
    },

    /// Offset, length or numeric value outside the accepted range
    #[error("The value of \"{name}\" is out of range. It must be {range}. Received {received}")]
    OutOfRange {
        name: &'static str,
        range: String,
        received: String,
    },

    /// Requested allocation exceeds `K_MAX_LENGTH`
    #[error("Cannot create a Buffer larger than {max} bytes (requested {requested})")]
    BufferTooLarge { requested: usize, max: usize },

    #[error("Unknown encoding: {0}")]
    UnknownEncoding(String),

    #[error("The URL must be of scheme file. Received {0}")]
    InvalidUrlScheme(String),

    #[error("Invalid open flags: '{0}'")]
    InvalidFlags(String),

    /// Malformed input to a decode operation
    #[error("Invalid {encoding} input: {message}")]
    Decode {
        encoding: &'static str,
        message: String,
    },

    /// `atob`/`btoa` input outside the Latin1 / base64 alphabet
    #[error("Invalid character: {0}")]
    InvalidCharacter(String),

    /// Error reported by the operating system
    #[error("{code}: {source}, {syscall}{}", describe_paths(.path, .dest))]
    Io {
        #[source]
        source: io::Error,
        code: &'static str,
        syscall: &'static str,
        path: Option<String>,
        dest: Option<String>,
    },

    /// Operation attempted on a closed handle
    #[error("{0} is closed")]
    Closed(&'static str),

    /// Operation attempted through a handle whose slot was released
    #[error("{0} handle has been released")]
    Released(&'static str),

    /// Second delivery attempted on a completion token
    #[error("callback token {0} has already settled")]
    AlreadySettled(u64),

    /// Worker dropped the operation without settling it
    #[error("operation '{0}' was abandoned before completing")]
    Abandoned(&'static str),
}

fn describe_paths(path: &Option<String>, dest: &Option<String>) -> String {
    match (path, dest) {
        (Some(p), Some(d)) => format!(" '{}' -> '{}'", p, d),
        (Some(p), None) => format!(" '{}'", p),
        _ => String::new(),
    }
}

impl NodeError {
    /// JavaScript error class this error surfaces as.
    pub fn class(&self) -> &'static str {
        match self {
            NodeError::InvalidArgType { .. }
            | NodeError::InvalidArgValue { .. }
            | NodeError::UnknownEncoding(_)
            | NodeError::InvalidUrlScheme(_)
            | NodeError::InvalidFlags(_) => "TypeError",
            NodeError::OutOfRange { .. } | NodeError::BufferTooLarge { .. } => "RangeError",
            NodeError::InvalidCharacter(_) => "InvalidCharacterError",
            _ => "Error",
        }
    }

    /// Node-style error code (`ERR_*` or an errno name).
    pub fn code(&self) -> &'static str {
        match self {
            NodeError::InvalidArgType { .. } => "ERR_INVALID_ARG_TYPE",
            NodeError::InvalidArgValue { .. } | NodeError::InvalidFlags(_) => {
                "ERR_INVALID_ARG_VALUE"
            }
            NodeError::OutOfRange { .. } => "ERR_OUT_OF_RANGE",
            NodeError::BufferTooLarge { .. } => "ERR_BUFFER_TOO_LARGE",
            NodeError::UnknownEncoding(_) => "ERR_UNKNOWN_ENCODING",
            NodeError::InvalidUrlScheme(_) => "ERR_INVALID_URL_SCHEME",
            NodeError::Decode { .. } => "ERR_DECODE",
            NodeError::InvalidCharacter(_) => "ERR_INVALID_CHARACTER",
            NodeError::Io { code, .. } => code,
            NodeError::Closed(_) | NodeError::Released(_) => "ERR_INVALID_STATE",
            NodeError::AlreadySettled(_) => "ERR_ALREADY_SETTLED",
            NodeError::Abandoned(_) => "ERR_ABANDONED",
        }
    }

    /// True for resource-state failures (closed or released handles).
    pub fn is_state_error(&self) -> bool {
        matches!(self, NodeError::Closed(_) | NodeError::Released(_))
    }

    /// The underlying OS error, if any.
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            NodeError::Io { source, .. } => Some(source),
            _ => None,
        }
    }

    pub(crate) fn out_of_range(
        name: &'static str,
        range: impl Into<String>,
        received: impl ToString,
    ) -> Self {
        NodeError::OutOfRange {
            name,
            range: range.into(),
            received: received.to_string(),
        }
    }

    pub(crate) fn arg_type(name: &'static str, expected: impl Into<Cow<'static, str>>) -> Self {
        NodeError::InvalidArgType {
            name,
            expected: expected.into(),
        }
    }

    pub(crate) fn arg_value(name: &'static str, received: impl ToString) -> Self {
        NodeError::InvalidArgValue {
            name,
            received: received.to_string(),
        }
    }

    pub(crate) fn decode(encoding: &'static str, message: impl ToString) -> Self {
        NodeError::Decode {
            encoding,
            message: message.to_string(),
        }
    }

    /// Wrap an OS error with the syscall and path that produced it.
    pub(crate) fn io(source: io::Error, syscall: &'static str, path: Option<String>) -> Self {
        NodeError::Io {
            code: errno_name(&source),
            source,
            syscall,
            path,
            dest: None,
        }
    }

    pub(crate) fn io2(source: io::Error, syscall: &'static str, path: String, dest: String) -> Self {
        NodeError::Io {
            code: errno_name(&source),
            source,
            syscall,
            path: Some(path),
            dest: Some(dest),
        }
    }
}

/// Result type used across the crate
pub type NodeResult<T> = Result<T, NodeError>;

/// Map an OS error to its errno name.
pub fn errno_name(error: &io::Error) -> &'static str {
    let Some(code) = error.raw_os_error() else {
        return match error.kind() {
            io::ErrorKind::NotFound => "ENOENT",
            io::ErrorKind::PermissionDenied => "EACCES",
            io::ErrorKind::AlreadyExists => "EEXIST",
            io::ErrorKind::InvalidInput => "EINVAL",
            io::ErrorKind::Unsupported => "ENOTSUP",
            io::ErrorKind::UnexpectedEof => "EOF",
            _ => "UNKNOWN",
        };
    };

    match code {
        libc::ENOENT => "ENOENT",
        libc::EEXIST => "EEXIST",
        libc::EACCES => "EACCES",
        libc::EPERM => "EPERM",
        libc::ENOTDIR => "ENOTDIR",
        libc::EISDIR => "EISDIR",
        libc::ENOTEMPTY => "ENOTEMPTY",
        libc::EBADF => "EBADF",
        libc::EINVAL => "EINVAL",
        libc::EMFILE => "EMFILE",
        libc::ENFILE => "ENFILE",
        libc::ELOOP => "ELOOP",
        libc::EXDEV => "EXDEV",
        libc::ENOSPC => "ENOSPC",
        libc::EROFS => "EROFS",
        libc::EBUSY => "EBUSY",
        libc::ENAMETOOLONG => "ENAMETOOLONG",
        libc::ENOTSUP => "ENOTSUP",
        libc::EAGAIN => "EAGAIN",
        libc::EIO => "EIO",
        libc::ESPIPE => "ESPIPE",
        libc::EFBIG => "EFBIG",
        _ => "UNKNOWN",
    }
}
