//! File-system constants
//!
//! Open flags, access modes, copy modes and file-type bits, plus the fixed
//! table mapping Node flag strings (`"r"`, `"wx+"`, ...) to `O_*` bits.

use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;

use libc::c_int;

use crate::error::{NodeError, NodeResult};

// Open flags
pub const O_RDONLY: c_int = libc::O_RDONLY;
pub const O_WRONLY: c_int = libc::O_WRONLY;
pub const O_RDWR: c_int = libc::O_RDWR;
pub const O_CREAT: c_int = libc::O_CREAT;
pub const O_EXCL: c_int = libc::O_EXCL;
pub const O_NOCTTY: c_int = libc::O_NOCTTY;
pub const O_TRUNC: c_int = libc::O_TRUNC;
pub const O_APPEND: c_int = libc::O_APPEND;
pub const O_DIRECTORY: c_int = libc::O_DIRECTORY;
pub const O_NOFOLLOW: c_int = libc::O_NOFOLLOW;
pub const O_SYNC: c_int = libc::O_SYNC;
pub const O_DSYNC: c_int = libc::O_DSYNC;
pub const O_NONBLOCK: c_int = libc::O_NONBLOCK;

// Access modes
pub const F_OK: c_int = libc::F_OK;
pub const R_OK: c_int = libc::R_OK;
pub const W_OK: c_int = libc::W_OK;
pub const X_OK: c_int = libc::X_OK;

// copy_file modes
pub const COPYFILE_EXCL: u32 = 1;
pub const COPYFILE_FICLONE: u32 = 2;
pub const COPYFILE_FICLONE_FORCE: u32 = 4;

// File type bits
pub const S_IFMT: u32 = libc::S_IFMT as u32;
pub const S_IFREG: u32 = libc::S_IFREG as u32;
pub const S_IFDIR: u32 = libc::S_IFDIR as u32;
pub const S_IFCHR: u32 = libc::S_IFCHR as u32;
pub const S_IFBLK: u32 = libc::S_IFBLK as u32;
pub const S_IFIFO: u32 = libc::S_IFIFO as u32;
pub const S_IFLNK: u32 = libc::S_IFLNK as u32;
pub const S_IFSOCK: u32 = libc::S_IFSOCK as u32;

/// Default mode for created files
pub const DEFAULT_FILE_MODE: u32 = 0o666;

/// Default mode for created directories
pub const DEFAULT_DIR_MODE: u32 = 0o777;

/// Map a flag string to `O_*` bits. Unknown strings are rejected.
pub fn string_to_flags(flags: &str) -> NodeResult<c_int> {
    let bits = match flags {
        "r" => O_RDONLY,
        "rs" | "sr" => O_RDONLY | O_DSYNC,
        "r+" => O_RDWR,
        "rs+" | "sr+" => O_RDWR | O_DSYNC,

        "w" => O_TRUNC | O_CREAT | O_WRONLY,
        "wx" | "xw" => O_TRUNC | O_CREAT | O_WRONLY | O_EXCL,
        "w+" => O_TRUNC | O_CREAT | O_RDWR,
        "wx+" | "xw+" => O_TRUNC | O_CREAT | O_RDWR | O_EXCL,

        "a" => O_APPEND | O_CREAT | O_WRONLY,
        "ax" | "xa" => O_APPEND | O_CREAT | O_WRONLY | O_EXCL,
        "as" | "sa" => O_APPEND | O_CREAT | O_WRONLY | O_DSYNC,
        "a+" => O_APPEND | O_CREAT | O_RDWR,
        "ax+" | "xa+" => O_APPEND | O_CREAT | O_RDWR | O_EXCL,
        "as+" | "sa+" => O_APPEND | O_CREAT | O_RDWR | O_DSYNC,

        _ => return Err(NodeError::InvalidFlags(flags.to_string())),
    };
    Ok(bits)
}

/// Flags argument: a Node flag string or raw `O_*` bits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenFlags {
    Named(String),
    Raw(c_int),
}

impl OpenFlags {
    pub fn bits(&self) -> NodeResult<c_int> {
        match self {
            OpenFlags::Named(name) => string_to_flags(name),
            OpenFlags::Raw(bits) => Ok(*bits),
        }
    }
}

impl Default for OpenFlags {
    fn default() -> Self {
        OpenFlags::Named("r".to_string())
    }
}

impl From<&str> for OpenFlags {
    fn from(flags: &str) -> Self {
        OpenFlags::Named(flags.to_string())
    }
}

impl From<c_int> for OpenFlags {
    fn from(bits: c_int) -> Self {
        OpenFlags::Raw(bits)
    }
}

/// Translate `O_*` bits and a creation mode into `OpenOptions`
pub fn open_options(bits: c_int, mode: u32) -> OpenOptions {
    let mut options = OpenOptions::new();
    match bits & libc::O_ACCMODE {
        O_WRONLY => options.write(true),
        O_RDWR => options.read(true).write(true),
        _ => options.read(true),
    };

    if bits & O_APPEND != 0 {
        options.append(true);
    }
    if bits & O_TRUNC != 0 {
        options.truncate(true);
    }
    if bits & O_CREAT != 0 {
        if bits & O_EXCL != 0 {
            options.create_new(true);
        } else {
            options.create(true);
        }
    }

    let handled = libc::O_ACCMODE | O_APPEND | O_TRUNC | O_CREAT | O_EXCL;
    options.custom_flags(bits & !handled);
    options.mode(mode);
    options
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_table() {
        assert_eq!(string_to_flags("r").unwrap(), O_RDONLY);
        assert_eq!(string_to_flags("rs+").unwrap(), O_RDWR | O_DSYNC);
        assert_eq!(string_to_flags("w").unwrap(), O_TRUNC | O_CREAT | O_WRONLY);
        assert_eq!(
            string_to_flags("xw+").unwrap(),
            string_to_flags("wx+").unwrap()
        );
        assert_eq!(string_to_flags("a").unwrap(), O_APPEND | O_CREAT | O_WRONLY);
        assert_eq!(
            string_to_flags("as+").unwrap(),
            O_APPEND | O_CREAT | O_RDWR | O_DSYNC
        );
        assert_eq!(
            string_to_flags("as").unwrap(),
            O_APPEND | O_CREAT | O_WRONLY | O_DSYNC
        );
    }

    #[test]
    fn test_unknown_flags_rejected() {
        for bad in ["", "rw", "x", "R", "w++"] {
            assert!(matches!(
                string_to_flags(bad),
                Err(NodeError::InvalidFlags(_))
            ));
        }
    }

    #[test]
    fn test_open_flags_default() {
        assert_eq!(OpenFlags::default().bits().unwrap(), O_RDONLY);
        assert_eq!(OpenFlags::from(O_RDWR).bits().unwrap(), O_RDWR);
    }

    #[test]
    fn test_exclusive_create() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("excl");
        let bits = string_to_flags("wx").unwrap();

        assert!(open_options(bits, DEFAULT_FILE_MODE).open(&path).is_ok());
        let err = open_options(bits, DEFAULT_FILE_MODE).open(&path).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
    }
}
