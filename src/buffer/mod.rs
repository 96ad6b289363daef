//! Node-compatible Buffer
//!
//! A [`Buffer`] is a fixed-length byte container whose storage lives in the
//! process-wide buffer handle table. The length is fixed at construction;
//! the contents are mutable in place through `&self` (storage sits behind a
//! lock so a [`BufferView`] can reach it from a worker thread).
//!
//! Dropping a `Buffer` (or calling [`Buffer::dispose`]) releases its slot.
//! Any `BufferView` taken from it fails with a resource-state error after
//! that point.

pub mod encoding;
pub mod numeric;
pub mod pool;
pub mod typed;

pub use encoding::{atob, btoa, StringEncoding};
pub use typed::TypedElement;

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{NodeError, NodeResult};
use crate::runtime::handle::{HandleId, HandleTable, NativeHandle, WeakHandle};

/// Largest buffer that can be allocated (2^31 - 1 bytes)
pub const K_MAX_LENGTH: usize = 0x7fff_ffff;

/// Bytes shown by `Display` before eliding the rest
pub const INSPECT_MAX_BYTES: usize = 50;

lazy_static! {
    static ref BUFFERS: HandleTable<BufferStorage> = HandleTable::new("Buffer");
}

/// Number of live buffers
pub fn live_buffers() -> usize {
    BUFFERS.len()
}

/// Backing storage of one buffer. Returned to the allocation pool when the
/// last reference goes away.
pub struct BufferStorage {
    bytes: RwLock<Vec<u8>>,
}

impl Drop for BufferStorage {
    fn drop(&mut self) {
        pool::global().release(std::mem::take(self.bytes.get_mut()));
    }
}

// =============================================================================
// Buffer
// =============================================================================

/// Fixed-length byte container
pub struct Buffer {
    handle: NativeHandle<BufferStorage>,
    storage: Arc<BufferStorage>,
    length: usize,
}

impl Buffer {
    fn check_size(size: usize) -> NodeResult<()> {
        if size > K_MAX_LENGTH {
            return Err(NodeError::BufferTooLarge {
                requested: size,
                max: K_MAX_LENGTH,
            });
        }
        Ok(())
    }

    fn from_storage(bytes: Vec<u8>) -> Self {
        let length = bytes.len();
        let (handle, storage) = BUFFERS.insert_shared(BufferStorage {
            bytes: RwLock::new(bytes),
        });
        Self {
            handle,
            storage,
            length,
        }
    }

    /// Zero-filled buffer of `size` bytes
    pub fn alloc(size: usize) -> NodeResult<Self> {
        Self::check_size(size)?;
        Ok(Self::from_storage(vec![0; size]))
    }

    /// Buffer of `size` bytes whose contents are unspecified until written.
    ///
    /// Storage may be recycled from buffers released earlier.
    pub fn alloc_unsafe(size: usize) -> NodeResult<Self> {
        Self::check_size(size)?;
        Ok(Self::from_storage(pool::global().acquire(size)))
    }

    /// Take ownership of `bytes`
    pub fn from_vec(bytes: Vec<u8>) -> NodeResult<Self> {
        Self::check_size(bytes.len())?;
        Ok(Self::from_storage(bytes))
    }

    pub fn from_slice(bytes: &[u8]) -> NodeResult<Self> {
        Self::from_vec(bytes.to_vec())
    }

    /// Decode `text` with `encoding`
    pub fn from_string(text: &str, encoding: StringEncoding) -> NodeResult<Self> {
        Self::from_vec(encoding.decode(text)?)
    }

    /// Copy integers into a new buffer, each truncated to its low 8 bits
    pub fn from_values(values: &[i64]) -> NodeResult<Self> {
        Self::from_vec(values.iter().map(|&v| v as u8).collect())
    }

    /// Build a buffer from a dynamically typed value.
    ///
    /// Accepts a string (decoded with `encoding`), an array of numbers, or a
    /// serialised buffer (`{"type": "Buffer", "data": [...]}`).
    pub fn from_value(value: &Value, encoding: StringEncoding) -> NodeResult<Self> {
        match value {
            Value::String(text) => Self::from_string(text, encoding),
            Value::Array(items) => Self::from_vec(items.iter().map(value_to_byte).collect()),
            Value::Object(map) if map.get("type").and_then(Value::as_str) == Some("Buffer") => {
                match map.get("data") {
                    Some(Value::Array(items)) => {
                        Self::from_vec(items.iter().map(value_to_byte).collect())
                    }
                    _ => Err(invalid_source()),
                }
            }
            _ => Err(invalid_source()),
        }
    }

    /// Deep-copy `length` elements (default: the rest) starting at element
    /// `offset` of a typed view. Later changes to `view` are not observed.
    pub fn copy_bytes_from<T: TypedElement>(
        view: &[T],
        offset: usize,
        length: Option<usize>,
    ) -> NodeResult<Self> {
        Self::from_vec(typed::element_bytes(view, offset, length))
    }

    /// Concatenate `list` in order.
    ///
    /// With `total_length` the result is truncated or zero-padded to exactly
    /// that many bytes.
    pub fn concat(list: &[&Buffer], total_length: Option<usize>) -> NodeResult<Self> {
        let total = total_length.unwrap_or_else(|| list.iter().map(|b| b.len()).sum());
        Self::check_size(total)?;

        let mut bytes = Vec::with_capacity(total);
        for buffer in list {
            if bytes.len() >= total {
                break;
            }
            let take = (total - bytes.len()).min(buffer.len());
            buffer.with_bytes(|src| bytes.extend_from_slice(&src[..take]));
        }
        bytes.resize(total, 0);
        Ok(Self::from_storage(bytes))
    }

    /// Bytes `text` occupies once decoded with `encoding`
    pub fn byte_length(text: &str, encoding: StringEncoding) -> usize {
        encoding::byte_length(text, encoding)
    }

    pub fn is_encoding(name: &str) -> bool {
        StringEncoding::parse(name).is_some()
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn id(&self) -> HandleId {
        self.handle.id()
    }

    /// Non-owning alias to this buffer's storage
    pub fn view(&self) -> BufferView {
        BufferView {
            handle: self.handle.downgrade(),
            length: self.length,
        }
    }

    /// Release the storage now instead of at scope exit
    pub fn dispose(self) {
        self.handle.release();
    }

    pub(crate) fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.storage.bytes.read())
    }

    pub(crate) fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.storage.bytes.write())
    }

    /// Byte at `index`, or `None` past the end
    pub fn get(&self, index: usize) -> Option<u8> {
        self.with_bytes(|bytes| bytes.get(index).copied())
    }

    /// Store `value` at `index`. Past the end nothing is written and `false`
    /// is returned.
    pub fn set(&self, index: usize, value: u8) -> bool {
        self.with_bytes_mut(|bytes| match bytes.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        })
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.with_bytes(|bytes| bytes.to_vec())
    }

    /// Independent copy with its own storage
    pub fn copy(&self) -> Self {
        Self::from_storage(self.to_vec())
    }

    // -------------------------------------------------------------------------
    // Text
    // -------------------------------------------------------------------------

    /// Encode `[start, end)` as text. Bounds are clamped to the buffer and
    /// an empty or inverted range yields an empty string.
    pub fn as_string(
        &self,
        encoding: StringEncoding,
        start: Option<usize>,
        end: Option<usize>,
    ) -> String {
        let end = end.unwrap_or(self.length).min(self.length);
        let start = start.unwrap_or(0);
        if start >= end {
            return String::new();
        }
        self.with_bytes(|bytes| encoding.encode(&bytes[start..end]))
    }

    /// Whole buffer as text
    pub fn to_string_with(&self, encoding: StringEncoding) -> String {
        self.as_string(encoding, None, None)
    }

    /// Write `text` at `offset`. Only whole characters are written; returns
    /// the number of bytes written.
    pub fn write_string(
        &self,
        text: &str,
        offset: usize,
        encoding: StringEncoding,
    ) -> NodeResult<usize> {
        if offset > self.length {
            return Err(NodeError::out_of_range(
                "offset",
                format!(">= 0 && <= {}", self.length),
                offset,
            ));
        }
        let encoded = encoding.decode(text)?;
        let available = self.length - offset;
        let mut count = encoded.len().min(available);
        match encoding {
            StringEncoding::Utf8 => {
                while count > 0 && !text.is_char_boundary(count) {
                    count -= 1;
                }
            }
            StringEncoding::Utf16le => count -= count % 2,
            _ => {}
        }
        self.with_bytes_mut(|bytes| bytes[offset..offset + count].copy_from_slice(&encoded[..count]));
        Ok(count)
    }

    /// Fill the whole buffer by repeating `value` decoded with `encoding`.
    /// An empty pattern leaves the contents unchanged.
    pub fn fill(&self, value: &str, encoding: StringEncoding) -> NodeResult<&Self> {
        let pattern = encoding.decode(value)?;
        if pattern.is_empty() {
            return Ok(self);
        }
        self.with_bytes_mut(|bytes| {
            for (dst, src) in bytes.iter_mut().zip(pattern.iter().cycle()) {
                *dst = *src;
            }
        });
        Ok(self)
    }

    pub fn fill_byte(&self, value: u8) -> &Self {
        self.with_bytes_mut(|bytes| bytes.fill(value));
        self
    }

    // -------------------------------------------------------------------------
    // Comparison
    // -------------------------------------------------------------------------

    pub fn equals(&self, other: &Buffer) -> bool {
        self.compare(other) == Ordering::Equal
    }

    /// Lexicographic byte comparison
    pub fn compare(&self, other: &Buffer) -> Ordering {
        if Arc::ptr_eq(&self.storage, &other.storage) {
            return Ordering::Equal;
        }
        self.with_bytes(|a| other.with_bytes(|b| a.cmp(b)))
    }
}

impl Clone for Buffer {
    fn clone(&self) -> Self {
        self.copy()
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl Eq for Buffer {}

impl fmt::Display for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.with_bytes(|bytes| {
            f.write_str("<Buffer")?;
            for byte in bytes.iter().take(INSPECT_MAX_BYTES) {
                write!(f, " {:02x}", byte)?;
            }
            if bytes.len() > INSPECT_MAX_BYTES {
                write!(f, " ... {} more bytes", bytes.len() - INSPECT_MAX_BYTES)?;
            }
            f.write_str(">")
        })
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self, self.id())
    }
}

fn value_to_byte(value: &Value) -> u8 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|u| u as i64))
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0) as u8,
        Value::String(s) => s.trim().parse::<f64>().map(|f| f as i64 as u8).unwrap_or(0),
        Value::Bool(b) => *b as u8,
        _ => 0,
    }
}

fn invalid_source() -> NodeError {
    NodeError::arg_type(
        "value",
        "of type string or an instance of Buffer or Array or an Array-like Object",
    )
}

// =============================================================================
// Non-owning view
// =============================================================================

/// Weak alias to a buffer's storage, safe to move to a worker thread.
///
/// Never releases the storage. Every access fails once the owning buffer is
/// gone.
#[derive(Clone, Copy)]
pub struct BufferView {
    handle: WeakHandle<BufferStorage>,
    length: usize,
}

impl BufferView {
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn is_live(&self) -> bool {
        self.handle.is_live()
    }

    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> NodeResult<R> {
        let storage = self.handle.resource()?;
        let bytes = storage.bytes.read();
        Ok(f(&bytes))
    }

    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> NodeResult<R> {
        let storage = self.handle.resource()?;
        let mut bytes = storage.bytes.write();
        Ok(f(&mut bytes))
    }

    pub fn to_vec(&self) -> NodeResult<Vec<u8>> {
        self.with_bytes(|bytes| bytes.to_vec())
    }

    /// Copy of `[offset, offset + length)`, taken under a short read lock
    pub fn copy_range(&self, offset: usize, length: usize) -> NodeResult<Vec<u8>> {
        self.check_range(offset, length)?;
        self.with_bytes(|bytes| bytes[offset..offset + length].to_vec())
    }

    /// Overwrite the bytes starting at `offset` with `data`
    pub fn store_range(&self, offset: usize, data: &[u8]) -> NodeResult<()> {
        self.check_range(offset, data.len())?;
        self.with_bytes_mut(|bytes| bytes[offset..offset + data.len()].copy_from_slice(data))
    }

    fn check_range(&self, offset: usize, length: usize) -> NodeResult<()> {
        match offset.checked_add(length) {
            Some(end) if end <= self.length => Ok(()),
            _ => Err(NodeError::out_of_range(
                "offset",
                format!(">= 0 && <= {}", self.length.saturating_sub(length)),
                offset,
            )),
        }
    }
}

impl fmt::Debug for BufferView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferView")
            .field("id", &self.handle.id())
            .field("length", &self.length)
            .finish()
    }
}

impl From<&Buffer> for BufferView {
    fn from(buffer: &Buffer) -> Self {
        buffer.view()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_alloc_zeroed() {
        let buf = Buffer::alloc(16).unwrap();
        assert_eq!(buf.len(), 16);
        assert!(buf.to_vec().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_alloc_too_large() {
        let err = Buffer::alloc(K_MAX_LENGTH + 1).unwrap_err();
        assert_eq!(err.class(), "RangeError");
        assert!(matches!(err, NodeError::BufferTooLarge { .. }));
        assert!(Buffer::alloc_unsafe(K_MAX_LENGTH + 1).is_err());
    }

    #[test]
    fn test_alloc_unsafe_length() {
        let buf = Buffer::alloc_unsafe(33).unwrap();
        assert_eq!(buf.len(), 33);
    }

    #[test]
    fn test_from_values_truncates() {
        let buf = Buffer::from_values(&[1, 256, 257, -1]).unwrap();
        assert_eq!(buf.to_vec(), vec![1, 0, 1, 255]);
    }

    #[test]
    fn test_from_value() {
        let buf = Buffer::from_value(&json!("aGk="), StringEncoding::Base64).unwrap();
        assert_eq!(buf.to_vec(), b"hi");

        let buf = Buffer::from_value(&json!([104, 105, 300]), StringEncoding::Utf8).unwrap();
        assert_eq!(buf.to_vec(), vec![104, 105, 44]);

        let buf = Buffer::from_value(&json!({"type": "Buffer", "data": [1, 2]}), StringEncoding::Utf8)
            .unwrap();
        assert_eq!(buf.to_vec(), vec![1, 2]);

        let err = Buffer::from_value(&json!(42), StringEncoding::Utf8).unwrap_err();
        assert_eq!(err.class(), "TypeError");
    }

    #[test]
    fn test_indexed_access() {
        let buf = Buffer::alloc(2).unwrap();
        assert!(buf.set(1, 0xab));
        assert_eq!(buf.get(1), Some(0xab));
        assert_eq!(buf.get(2), None);
        assert!(!buf.set(2, 1));
        assert_eq!(buf.to_vec(), vec![0, 0xab]);
    }

    #[test]
    fn test_concat_lengths() {
        let a = Buffer::from_slice(b"ab").unwrap();
        let b = Buffer::from_slice(b"cde").unwrap();

        assert_eq!(Buffer::concat(&[&a, &b], None).unwrap().to_vec(), b"abcde");
        assert_eq!(Buffer::concat(&[&a, &b], Some(3)).unwrap().to_vec(), b"abc");
        assert_eq!(
            Buffer::concat(&[&a, &b], Some(7)).unwrap().to_vec(),
            vec![b'a', b'b', b'c', b'd', b'e', 0, 0]
        );
        assert!(Buffer::concat(&[], None).unwrap().is_empty());
    }

    #[test]
    fn test_as_string_clamps() {
        let buf = Buffer::from_string("hello", StringEncoding::Utf8).unwrap();
        assert_eq!(buf.as_string(StringEncoding::Utf8, Some(1), Some(3)), "el");
        assert_eq!(buf.as_string(StringEncoding::Utf8, Some(3), Some(100)), "lo");
        assert_eq!(buf.as_string(StringEncoding::Utf8, Some(4), Some(2)), "");
        assert_eq!(buf.as_string(StringEncoding::Hex, None, None), "68656c6c6f");
    }

    #[test]
    fn test_display() {
        let buf = Buffer::from_slice(b"hi").unwrap();
        assert_eq!(buf.to_string(), "<Buffer 68 69>");

        let big = Buffer::alloc(52).unwrap();
        assert!(big.to_string().ends_with(" ... 2 more bytes>"));
    }

    #[test]
    fn test_write_string_partial() {
        let buf = Buffer::alloc(4).unwrap();
        assert_eq!(buf.write_string("héllo", 1, StringEncoding::Utf8).unwrap(), 3);
        assert_eq!(buf.to_vec(), vec![0, b'h', 0xc3, 0xa9]);

        let buf = Buffer::alloc(3).unwrap();
        assert_eq!(buf.write_string("hé", 1, StringEncoding::Utf8).unwrap(), 1);

        let buf = Buffer::alloc(3).unwrap();
        assert_eq!(buf.write_string("ab", 0, StringEncoding::Utf16le).unwrap(), 2);

        assert!(buf.write_string("x", 4, StringEncoding::Utf8).is_err());
    }

    #[test]
    fn test_fill() {
        let buf = Buffer::alloc(5).unwrap();
        buf.fill("ab", StringEncoding::Utf8).unwrap();
        assert_eq!(buf.to_vec(), b"ababa");

        buf.fill("", StringEncoding::Utf8).unwrap();
        assert_eq!(buf.to_vec(), b"ababa");

        buf.fill_byte(0);
        assert_eq!(buf.to_vec(), vec![0; 5]);
    }

    #[test]
    fn test_equals_and_compare() {
        let a = Buffer::from_slice(b"abc").unwrap();
        let b = Buffer::from_slice(b"abd").unwrap();
        assert!(a.equals(&a.copy()));
        assert_eq!(a.compare(&b), Ordering::Less);
        assert_eq!(b.compare(&a), Ordering::Greater);
        assert_ne!(a, b);
    }

    #[test]
    fn test_copy_is_independent() {
        let a = Buffer::from_slice(b"abc").unwrap();
        let b = a.clone();
        a.set(0, b'z');
        assert_eq!(b.to_vec(), b"abc");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_view_after_dispose() {
        let buf = Buffer::from_slice(b"data").unwrap();
        let view = buf.view();
        assert_eq!(view.to_vec().unwrap(), b"data");
        view.with_bytes_mut(|bytes| bytes[0] = b'D').unwrap();
        assert_eq!(buf.get(0), Some(b'D'));

        buf.dispose();
        assert!(!view.is_live());
        assert!(view.to_vec().unwrap_err().is_state_error());
    }

    #[test]
    fn test_view_ranges() {
        let buf = Buffer::from_slice(b"abcdef").unwrap();
        let view = buf.view();
        assert_eq!(view.copy_range(2, 3).unwrap(), b"cde");
        view.store_range(4, b"XY").unwrap();
        assert_eq!(buf.to_vec(), b"abcdXY");

        assert_eq!(view.copy_range(5, 2).unwrap_err().code(), "ERR_OUT_OF_RANGE");
        assert!(view.store_range(usize::MAX, b"z").is_err());
        assert_eq!(buf.to_vec(), b"abcdXY");
    }

    #[test]
    fn test_is_encoding() {
        assert!(Buffer::is_encoding("UCS-2"));
        assert!(!Buffer::is_encoding("utf32"));
        assert_eq!(Buffer::byte_length("€", StringEncoding::Utf8), 3);
    }
}
