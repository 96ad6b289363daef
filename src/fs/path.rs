//! Path-like arguments
//!
//! File-system entry points accept a path string, raw path bytes (from a
//! `Buffer`), a `file:` URL, or an open descriptor. [`PathLike`] carries
//! which one it was; [`PathLike::resolve`] turns it into a [`Target`] once,
//! at the façade boundary, so the operations themselves only ever see a
//! `PathBuf` or a raw descriptor.

use std::ffi::OsStr;
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

use url::Url;

use crate::buffer::Buffer;
use crate::error::{NodeError, NodeResult};

/// Path argument as supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathLike {
    Path(PathBuf),
    Bytes(Vec<u8>),
    Url(Url),
    Fd(RawFd),
}

/// Canonical form handed to the operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Path(PathBuf),
    Fd(RawFd),
}

impl PathLike {
    /// Validate and normalise
    pub fn resolve(&self) -> NodeResult<Target> {
        match self {
            PathLike::Path(path) => {
                check_nul(path.as_os_str().as_bytes(), path)?;
                Ok(Target::Path(path.clone()))
            }
            PathLike::Bytes(bytes) => {
                let path = Path::new(OsStr::from_bytes(bytes));
                check_nul(bytes, path)?;
                Ok(Target::Path(path.to_path_buf()))
            }
            PathLike::Url(url) => url_to_path(url).map(Target::Path),
            PathLike::Fd(fd) => check_fd(*fd).map(Target::Fd),
        }
    }

    /// Normalise to a path, rejecting descriptors
    pub fn to_path(&self) -> NodeResult<PathBuf> {
        match self.resolve()? {
            Target::Path(path) => Ok(path),
            Target::Fd(_) => Err(NodeError::arg_type(
                "path",
                "of type string or an instance of Buffer or URL",
            )),
        }
    }

    pub fn is_fd(&self) -> bool {
        matches!(self, PathLike::Fd(_))
    }
}

/// Reject negative descriptors before any I/O is attempted
pub(crate) fn check_fd(fd: RawFd) -> NodeResult<RawFd> {
    if fd < 0 {
        return Err(NodeError::out_of_range(
            "fd",
            format!(">= 0 && <= {}", i32::MAX),
            fd,
        ));
    }
    Ok(fd)
}

fn check_nul(bytes: &[u8], path: &Path) -> NodeResult<()> {
    if bytes.contains(&0) {
        return Err(NodeError::arg_value(
            "path",
            format!(
                "'{}' (must be a string, Uint8Array, or URL without null bytes)",
                path.display()
            ),
        ));
    }
    Ok(())
}

fn url_to_path(url: &Url) -> NodeResult<PathBuf> {
    if url.scheme() != "file" {
        return Err(NodeError::InvalidUrlScheme(url.scheme().to_string()));
    }
    let raw = url.path().to_ascii_lowercase();
    if raw.contains("%2f") {
        return Err(NodeError::arg_value(
            "path",
            "File URL path must not include encoded / characters",
        ));
    }
    if raw.contains("%00") {
        return Err(NodeError::arg_value(
            "path",
            "File URL path must not include null bytes",
        ));
    }
    url.to_file_path()
        .map_err(|_| NodeError::arg_value("path", format!("File URL host must be \"localhost\" or empty: {}", url)))
}

impl fmt::Display for PathLike {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathLike::Path(path) => write!(f, "{}", path.display()),
            PathLike::Bytes(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
            PathLike::Url(url) => write!(f, "{}", url),
            PathLike::Fd(fd) => write!(f, "fd {}", fd),
        }
    }
}

impl From<&str> for PathLike {
    fn from(path: &str) -> Self {
        PathLike::Path(PathBuf::from(path))
    }
}

impl From<String> for PathLike {
    fn from(path: String) -> Self {
        PathLike::Path(PathBuf::from(path))
    }
}

impl From<&Path> for PathLike {
    fn from(path: &Path) -> Self {
        PathLike::Path(path.to_path_buf())
    }
}

impl From<PathBuf> for PathLike {
    fn from(path: PathBuf) -> Self {
        PathLike::Path(path)
    }
}

impl From<&PathBuf> for PathLike {
    fn from(path: &PathBuf) -> Self {
        PathLike::Path(path.clone())
    }
}

impl From<&Buffer> for PathLike {
    fn from(buffer: &Buffer) -> Self {
        PathLike::Bytes(buffer.to_vec())
    }
}

impl From<Url> for PathLike {
    fn from(url: Url) -> Self {
        PathLike::Url(url)
    }
}

impl From<RawFd> for PathLike {
    fn from(fd: RawFd) -> Self {
        PathLike::Fd(fd)
    }
}

impl From<Target> for PathLike {
    fn from(target: Target) -> Self {
        match target {
            Target::Path(path) => PathLike::Path(path),
            Target::Fd(fd) => PathLike::Fd(fd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::StringEncoding;

    #[test]
    fn test_string_path() {
        let target = PathLike::from("/tmp/file.txt").resolve().unwrap();
        assert_eq!(target, Target::Path(PathBuf::from("/tmp/file.txt")));
    }

    #[test]
    fn test_buffer_path() {
        let buf = Buffer::from_string("/tmp/bytes", StringEncoding::Utf8).unwrap();
        let path = PathLike::from(&buf).to_path().unwrap();
        assert_eq!(path, PathBuf::from("/tmp/bytes"));
    }

    #[test]
    fn test_file_url() {
        let url = Url::parse("file:///tmp/with%20space").unwrap();
        let path = PathLike::from(url).to_path().unwrap();
        assert_eq!(path, PathBuf::from("/tmp/with space"));
    }

    #[test]
    fn test_non_file_url_rejected() {
        let url = Url::parse("https://example.com/a").unwrap();
        let err = PathLike::from(url).resolve().unwrap_err();
        assert!(matches!(err, NodeError::InvalidUrlScheme(ref s) if s == "https"));
        assert_eq!(err.code(), "ERR_INVALID_URL_SCHEME");
    }

    #[test]
    fn test_encoded_slash_rejected() {
        let url = Url::parse("file:///tmp/a%2Fb").unwrap();
        assert!(PathLike::from(url).resolve().is_err());
    }

    #[test]
    fn test_nul_byte_rejected() {
        let err = PathLike::from("/tmp/a\0b").resolve().unwrap_err();
        assert_eq!(err.code(), "ERR_INVALID_ARG_VALUE");
    }

    #[test]
    fn test_descriptor() {
        assert_eq!(PathLike::from(3).resolve().unwrap(), Target::Fd(3));
        assert!(PathLike::from(3).to_path().is_err());
        assert!(PathLike::Fd(-1).resolve().is_err());
    }
}
