//! File status snapshots
//!
//! [`FileStat`] carries every numeric field as `f64` with millisecond
//! timestamps, matching the default `fs.Stats` shape. [`BigIntStats`] keeps
//! the same field names in 64-bit integers and adds nanosecond timestamps.
//! Both are immutable values taken from one `stat` call.

use std::fs::Metadata;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::time::UNIX_EPOCH;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use super::constants::{S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO, S_IFLNK, S_IFMT, S_IFREG, S_IFSOCK};

/// Type predicates shared by both stat shapes
pub trait StatMode {
    fn mode_bits(&self) -> u32;

    fn is_file(&self) -> bool {
        self.mode_bits() & S_IFMT == S_IFREG
    }

    fn is_directory(&self) -> bool {
        self.mode_bits() & S_IFMT == S_IFDIR
    }

    fn is_symbolic_link(&self) -> bool {
        self.mode_bits() & S_IFMT == S_IFLNK
    }

    fn is_fifo(&self) -> bool {
        self.mode_bits() & S_IFMT == S_IFIFO
    }

    fn is_socket(&self) -> bool {
        self.mode_bits() & S_IFMT == S_IFSOCK
    }

    fn is_block_device(&self) -> bool {
        self.mode_bits() & S_IFMT == S_IFBLK
    }

    fn is_character_device(&self) -> bool {
        self.mode_bits() & S_IFMT == S_IFCHR
    }
}

fn time_ns(secs: i64, nsec: i64) -> i64 {
    secs.saturating_mul(1_000_000_000).saturating_add(nsec)
}

fn birthtime_ns(metadata: &Metadata) -> i64 {
    metadata
        .created()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

fn ms_to_date(ms: f64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms.floor() as i64)
        .single()
        .unwrap_or_default()
}

// =============================================================================
// Number stats
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStat {
    pub dev: f64,
    pub ino: f64,
    pub mode: f64,
    pub nlink: f64,
    pub uid: f64,
    pub gid: f64,
    pub rdev: f64,
    pub size: f64,
    pub blksize: f64,
    pub blocks: f64,
    pub atime_ms: f64,
    pub mtime_ms: f64,
    pub ctime_ms: f64,
    pub birthtime_ms: f64,
}

impl FileStat {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let ms = |ns: i64| ns as f64 / 1_000_000.0;
        Self {
            dev: metadata.dev() as f64,
            ino: metadata.ino() as f64,
            mode: metadata.mode() as f64,
            nlink: metadata.nlink() as f64,
            uid: metadata.uid() as f64,
            gid: metadata.gid() as f64,
            rdev: metadata.rdev() as f64,
            size: metadata.size() as f64,
            blksize: metadata.blksize() as f64,
            blocks: metadata.blocks() as f64,
            atime_ms: ms(time_ns(metadata.atime(), metadata.atime_nsec())),
            mtime_ms: ms(time_ns(metadata.mtime(), metadata.mtime_nsec())),
            ctime_ms: ms(time_ns(metadata.ctime(), metadata.ctime_nsec())),
            birthtime_ms: ms(birthtime_ns(metadata)),
        }
    }

    pub fn atime(&self) -> DateTime<Utc> {
        ms_to_date(self.atime_ms)
    }

    pub fn mtime(&self) -> DateTime<Utc> {
        ms_to_date(self.mtime_ms)
    }

    pub fn ctime(&self) -> DateTime<Utc> {
        ms_to_date(self.ctime_ms)
    }

    pub fn birthtime(&self) -> DateTime<Utc> {
        ms_to_date(self.birthtime_ms)
    }
}

impl StatMode for FileStat {
    fn mode_bits(&self) -> u32 {
        self.mode as u32
    }
}

// =============================================================================
// BigInt stats
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BigIntStats {
    pub dev: u64,
    pub ino: u64,
    pub mode: u64,
    pub nlink: u64,
    pub uid: u64,
    pub gid: u64,
    pub rdev: u64,
    pub size: u64,
    pub blksize: u64,
    pub blocks: u64,
    pub atime_ms: i64,
    pub mtime_ms: i64,
    pub ctime_ms: i64,
    pub birthtime_ms: i64,
    pub atime_ns: i64,
    pub mtime_ns: i64,
    pub ctime_ns: i64,
    pub birthtime_ns: i64,
}

impl BigIntStats {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let atime_ns = time_ns(metadata.atime(), metadata.atime_nsec());
        let mtime_ns = time_ns(metadata.mtime(), metadata.mtime_nsec());
        let ctime_ns = time_ns(metadata.ctime(), metadata.ctime_nsec());
        let birthtime_ns = birthtime_ns(metadata);
        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
            mode: metadata.mode() as u64,
            nlink: metadata.nlink(),
            uid: metadata.uid() as u64,
            gid: metadata.gid() as u64,
            rdev: metadata.rdev(),
            size: metadata.size(),
            blksize: metadata.blksize(),
            blocks: metadata.blocks(),
            atime_ms: atime_ns.div_euclid(1_000_000),
            mtime_ms: mtime_ns.div_euclid(1_000_000),
            ctime_ms: ctime_ns.div_euclid(1_000_000),
            birthtime_ms: birthtime_ns.div_euclid(1_000_000),
            atime_ns,
            mtime_ns,
            ctime_ns,
            birthtime_ns,
        }
    }

    pub fn atime(&self) -> DateTime<Utc> {
        Utc.timestamp_nanos(self.atime_ns)
    }

    pub fn mtime(&self) -> DateTime<Utc> {
        Utc.timestamp_nanos(self.mtime_ns)
    }

    pub fn ctime(&self) -> DateTime<Utc> {
        Utc.timestamp_nanos(self.ctime_ns)
    }

    pub fn birthtime(&self) -> DateTime<Utc> {
        Utc.timestamp_nanos(self.birthtime_ns)
    }
}

impl StatMode for BigIntStats {
    fn mode_bits(&self) -> u32 {
        self.mode as u32
    }
}

/// Either stat shape, selected by `StatOptions::bigint`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Stats {
    Number(FileStat),
    BigInt(BigIntStats),
}

impl Stats {
    pub fn from_metadata(metadata: &Metadata, bigint: bool) -> Self {
        if bigint {
            Stats::BigInt(BigIntStats::from_metadata(metadata))
        } else {
            Stats::Number(FileStat::from_metadata(metadata))
        }
    }

    /// All-zero stats of the requested shape, reported for missing files
    pub fn zeroed(bigint: bool) -> Self {
        if bigint {
            Stats::BigInt(BigIntStats::default())
        } else {
            Stats::Number(FileStat::default())
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            Stats::Number(s) => s.size as u64,
            Stats::BigInt(s) => s.size,
        }
    }

    pub fn mtime_ms(&self) -> f64 {
        match self {
            Stats::Number(s) => s.mtime_ms,
            Stats::BigInt(s) => s.mtime_ms as f64,
        }
    }

    pub fn mtime(&self) -> DateTime<Utc> {
        match self {
            Stats::Number(s) => s.mtime(),
            Stats::BigInt(s) => s.mtime(),
        }
    }

    pub fn as_number(&self) -> Option<&FileStat> {
        match self {
            Stats::Number(s) => Some(s),
            Stats::BigInt(_) => None,
        }
    }

    pub fn as_bigint(&self) -> Option<&BigIntStats> {
        match self {
            Stats::BigInt(s) => Some(s),
            Stats::Number(_) => None,
        }
    }
}

impl StatMode for Stats {
    fn mode_bits(&self) -> u32 {
        match self {
            Stats::Number(s) => s.mode_bits(),
            Stats::BigInt(s) => s.mode_bits(),
        }
    }
}

// =============================================================================
// File-system stats
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatFs {
    #[serde(rename = "type")]
    pub fs_type: i64,
    pub bsize: i64,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
}

impl StatFs {
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let raw = nix::sys::statfs::statfs(path)?;
        Ok(Self {
            fs_type: raw.filesystem_type().0 as i64,
            bsize: raw.block_size() as i64,
            blocks: raw.blocks() as u64,
            bfree: raw.blocks_free() as u64,
            bavail: raw.blocks_available() as u64,
            files: raw.files() as u64,
            ffree: raw.files_free() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_file_stat_from_metadata() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"12345").unwrap();
        let metadata = std::fs::metadata(file.path()).unwrap();

        let stat = FileStat::from_metadata(&metadata);
        assert_eq!(stat.size, 5.0);
        assert!(stat.is_file());
        assert!(!stat.is_directory());
        assert!(stat.mtime_ms > 0.0);
        assert_eq!(stat.mtime().timestamp_millis(), stat.mtime_ms.floor() as i64);
    }

    #[test]
    fn test_bigint_stats_match() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = std::fs::metadata(dir.path()).unwrap();

        let number = FileStat::from_metadata(&metadata);
        let big = BigIntStats::from_metadata(&metadata);
        assert!(big.is_directory());
        assert_eq!(big.ino as f64, number.ino);
        assert_eq!(big.mtime_ms, big.mtime_ns / 1_000_000);
    }

    #[test]
    fn test_zeroed_stats() {
        let stats = Stats::zeroed(false);
        assert_eq!(stats.size(), 0);
        assert_eq!(stats.mtime_ms(), 0.0);
        assert!(!stats.is_file());
    }

    #[test]
    fn test_stats_json_field_names() {
        let json = serde_json::to_value(Stats::zeroed(false)).unwrap();
        assert!(json.get("mtimeMs").is_some());
        assert!(json.get("blksize").is_some());
    }

    #[test]
    fn test_statfs() {
        let dir = tempfile::tempdir().unwrap();
        let stats = StatFs::from_path(dir.path()).unwrap();
        assert!(stats.bsize > 0);
        assert!(stats.blocks >= stats.bfree);
    }
}
