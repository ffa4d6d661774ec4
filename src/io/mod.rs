//! Bounds-checked little-endian reading and writing for method bodies and signature blobs.
//!
//! Everything the engine reads or patches is a little-endian byte buffer: method body headers,
//! exception handler sections, instruction operands and signature blobs. This module provides the
//! primitive accessors used by all of them, plus the [`Parser`] cursor for sequential decoding of
//! ECMA-335 compressed integers.
//!
//! # Key Components
//!
//! - [`CilIO`] - Trait implemented by the primitive integer types the CIL formats use
//! - [`read_le`] / [`read_le_at`] - Reading with optional auto-advancing offset
//! - [`write_le_at`] - Writing in place into an already sized buffer
//! - [`write_compressed_uint`] - Appending an ECMA-335 II.23.2 compressed unsigned integer
//! - [`Parser`] - Cursor-based parser over a byte slice
//!
//! # Examples
//!
//! ```rust
//! use cilweave::io::{read_le_at, write_le_at};
//!
//! let mut data = [0u8; 6];
//! let mut offset = 0;
//! write_le_at(&mut data, &mut offset, 0x1234_u16)?;
//! write_le_at(&mut data, &mut offset, 0xDEAD_BEEF_u32)?;
//!
//! let mut offset = 0;
//! assert_eq!(read_le_at::<u16>(&data, &mut offset)?, 0x1234);
//! assert_eq!(read_le_at::<u32>(&data, &mut offset)?, 0xDEAD_BEEF);
//! # Ok::<(), cilweave::Error>(())
//! ```

mod parser;

pub use parser::Parser;

use crate::{Error::OutOfBounds, Result};

/// Trait for the primitive types that can be read from and written to CIL byte buffers.
///
/// # Thread Safety
///
/// All implementations are pure conversions without shared state.
pub trait CilIO: Sized + Copy {
    /// Fixed-size byte array holding the little-endian representation.
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Decode from little-endian bytes
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Encode to little-endian bytes
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cil_io {
    ($($ty:ty => $len:literal),* $(,)?) => {
        $(
            impl CilIO for $ty {
                type Bytes = [u8; $len];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_cil_io! {
    u8 => 1,
    i8 => 1,
    u16 => 2,
    i16 => 2,
    u32 => 4,
    i32 => 4,
    u64 => 8,
    i64 => 8,
    f32 => 4,
    f64 => 8,
}

/// Reads a value of type `T` in little-endian byte order from the start of `data`.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le<T: CilIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Reads a value of type `T` in little-endian byte order at `offset` and advances the offset.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
///
/// # Examples
///
/// ```rust
/// use cilweave::io::read_le_at;
///
/// let data = [0x01, 0x00, 0x02, 0x00];
/// let mut offset = 0;
/// assert_eq!(read_le_at::<u16>(&data, &mut offset)?, 1);
/// assert_eq!(read_le_at::<u16>(&data, &mut offset)?, 2);
/// assert_eq!(offset, 4);
/// # Ok::<(), cilweave::Error>(())
/// ```
pub fn read_le_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let end = offset.checked_add(type_len).ok_or(OutOfBounds)?;
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;

    Ok(T::from_le_bytes(read))
}

/// Writes `value` in little-endian byte order at `offset` and advances the offset.
///
/// The buffer is not grown; use this to patch already emitted bytes (operands, header fields).
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn write_le_at<T: CilIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let type_len = std::mem::size_of::<T>();
    let end = offset.checked_add(type_len).ok_or(OutOfBounds)?;
    if end > data.len() {
        return Err(OutOfBounds);
    }

    data[*offset..end].copy_from_slice(value.to_le_bytes().as_ref());
    *offset = end;

    Ok(())
}

/// Appends `value` as an ECMA-335 II.23.2 compressed unsigned integer.
///
/// # Errors
///
/// Returns [`crate::Error::MetadataCorrupt`] for values above `0x1FFF_FFFF`, which have no
/// compressed representation.
///
/// # Examples
///
/// ```rust
/// use cilweave::io::write_compressed_uint;
///
/// let mut out = Vec::new();
/// write_compressed_uint(0x03, &mut out)?;
/// write_compressed_uint(0x80, &mut out)?;
/// write_compressed_uint(0x4000, &mut out)?;
/// assert_eq!(out, [0x03, 0x80, 0x80, 0xC0, 0x00, 0x40, 0x00]);
/// # Ok::<(), cilweave::Error>(())
/// ```
pub fn write_compressed_uint(value: u32, out: &mut Vec<u8>) -> Result<()> {
    match value {
        0..=0x7F => out.push(value as u8),
        0x80..=0x3FFF => {
            out.push(((value >> 8) as u8) | 0x80);
            out.push(value as u8);
        }
        0x4000..=0x1FFF_FFFF => {
            out.push(((value >> 24) as u8) | 0xC0);
            out.push((value >> 16) as u8);
            out.push((value >> 8) as u8);
            out.push(value as u8);
        }
        _ => {
            return Err(malformed_error!(
                "Value 0x{:X} cannot be compressed",
                value
            ))
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_BUFFER: [u8; 8] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];

    #[test]
    fn read_le_primitives() {
        assert_eq!(read_le::<u8>(&TEST_BUFFER).unwrap(), 0x01);
        assert_eq!(read_le::<i8>(&TEST_BUFFER).unwrap(), 0x01);
        assert_eq!(read_le::<u16>(&TEST_BUFFER).unwrap(), 0x0201);
        assert_eq!(read_le::<u32>(&TEST_BUFFER).unwrap(), 0x0403_0201);
        assert_eq!(read_le::<u64>(&TEST_BUFFER).unwrap(), 0x0807_0605_0403_0201);
        assert_eq!(read_le::<i32>(&[0xFF, 0xFF, 0xFF, 0xFF]).unwrap(), -1);
    }

    #[test]
    fn read_le_at_advances() {
        let mut offset = 2;
        assert_eq!(read_le_at::<u16>(&TEST_BUFFER, &mut offset).unwrap(), 0x0403);
        assert_eq!(offset, 4);
        assert_eq!(read_le_at::<u32>(&TEST_BUFFER, &mut offset).unwrap(), 0x0807_0605);
        assert_eq!(offset, 8);
    }

    #[test]
    fn read_errors() {
        let mut offset = 6;
        assert!(matches!(
            read_le_at::<u32>(&TEST_BUFFER, &mut offset),
            Err(OutOfBounds)
        ));
        assert_eq!(offset, 6);

        let mut offset = usize::MAX;
        assert!(matches!(
            read_le_at::<u8>(&TEST_BUFFER, &mut offset),
            Err(OutOfBounds)
        ));
    }

    #[test]
    fn write_le_at_patches_in_place() {
        let mut data = vec![0xAA; 6];
        let mut offset = 1;
        write_le_at(&mut data, &mut offset, -2_i32).unwrap();
        assert_eq!(data, [0xAA, 0xFE, 0xFF, 0xFF, 0xFF, 0xAA]);
        assert_eq!(offset, 5);

        assert!(matches!(
            write_le_at(&mut data, &mut offset, 0_u16),
            Err(OutOfBounds)
        ));
    }

    #[test]
    fn compressed_uint_boundaries() {
        let cases: [(u32, &[u8]); 6] = [
            (0x00, &[0x00]),
            (0x7F, &[0x7F]),
            (0x80, &[0x80, 0x80]),
            (0x3FFF, &[0xBF, 0xFF]),
            (0x4000, &[0xC0, 0x00, 0x40, 0x00]),
            (0x1FFF_FFFF, &[0xDF, 0xFF, 0xFF, 0xFF]),
        ];

        for (value, expected) in cases {
            let mut out = Vec::new();
            write_compressed_uint(value, &mut out).unwrap();
            assert_eq!(out, expected, "value 0x{value:X}");

            let mut parser = Parser::new(&out);
            assert_eq!(parser.read_compressed_uint().unwrap(), value);
        }

        assert!(write_compressed_uint(0x2000_0000, &mut Vec::new()).is_err());
    }
}
