//! Fixed-width numeric access
//!
//! `read_*` / `write_*` for every integer and float width in both byte
//! orders. Offsets are bounds-checked against the buffer length: an access
//! that would cross the end fails with `ERR_OUT_OF_RANGE` and touches
//! nothing. Writes return `offset + width`.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use super::Buffer;
use crate::error::{NodeError, NodeResult};

impl Buffer {
    /// Validate that `width` bytes fit at `offset`
    fn check_access(&self, offset: usize, width: usize) -> NodeResult<()> {
        let fits = offset
            .checked_add(width)
            .is_some_and(|end| end <= self.len());
        if fits {
            return Ok(());
        }
        let range = match self.len().checked_sub(width) {
            Some(last) => format!(">= 0 and <= {}", last),
            None => format!("a buffer of at least {} bytes", width),
        };
        Err(NodeError::out_of_range("offset", range, offset))
    }

    pub fn read_uint8(&self, offset: usize) -> NodeResult<u8> {
        self.check_access(offset, 1)?;
        Ok(self.with_bytes(|bytes| bytes[offset]))
    }

    pub fn read_int8(&self, offset: usize) -> NodeResult<i8> {
        self.read_uint8(offset).map(|b| b as i8)
    }

    pub fn write_uint8(&self, value: u8, offset: usize) -> NodeResult<usize> {
        self.check_access(offset, 1)?;
        self.with_bytes_mut(|bytes| bytes[offset] = value);
        Ok(offset + 1)
    }

    pub fn write_int8(&self, value: i8, offset: usize) -> NodeResult<usize> {
        self.write_uint8(value as u8, offset)
    }
}

macro_rules! fixed_width {
    ($($read:ident, $write:ident, $ty:ty, $order:ty, $get:ident, $put:ident;)*) => {
        impl Buffer {
            $(
                pub fn $read(&self, offset: usize) -> NodeResult<$ty> {
                    const WIDTH: usize = std::mem::size_of::<$ty>();
                    self.check_access(offset, WIDTH)?;
                    Ok(self.with_bytes(|bytes| <$order>::$get(&bytes[offset..offset + WIDTH])))
                }

                pub fn $write(&self, value: $ty, offset: usize) -> NodeResult<usize> {
                    const WIDTH: usize = std::mem::size_of::<$ty>();
                    self.check_access(offset, WIDTH)?;
                    self.with_bytes_mut(|bytes| {
                        <$order>::$put(&mut bytes[offset..offset + WIDTH], value)
                    });
                    Ok(offset + WIDTH)
                }
            )*
        }
    };
}

fixed_width! {
    read_uint16_le, write_uint16_le, u16, LittleEndian, read_u16, write_u16;
    read_uint16_be, write_uint16_be, u16, BigEndian, read_u16, write_u16;
    read_int16_le, write_int16_le, i16, LittleEndian, read_i16, write_i16;
    read_int16_be, write_int16_be, i16, BigEndian, read_i16, write_i16;
    read_uint32_le, write_uint32_le, u32, LittleEndian, read_u32, write_u32;
    read_uint32_be, write_uint32_be, u32, BigEndian, read_u32, write_u32;
    read_int32_le, write_int32_le, i32, LittleEndian, read_i32, write_i32;
    read_int32_be, write_int32_be, i32, BigEndian, read_i32, write_i32;
    read_float_le, write_float_le, f32, LittleEndian, read_f32, write_f32;
    read_float_be, write_float_be, f32, BigEndian, read_f32, write_f32;
    read_double_le, write_double_le, f64, LittleEndian, read_f64, write_f64;
    read_double_be, write_double_be, f64, BigEndian, read_f64, write_f64;
    read_big_int64_le, write_big_int64_le, i64, LittleEndian, read_i64, write_i64;
    read_big_int64_be, write_big_int64_be, i64, BigEndian, read_i64, write_i64;
    read_big_uint64_le, write_big_uint64_le, u64, LittleEndian, read_u64, write_u64;
    read_big_uint64_be, write_big_uint64_be, u64, BigEndian, read_u64, write_u64;
}
