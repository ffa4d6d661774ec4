//! Cursor-based byte parser for method bodies and signature blobs.
//!
//! [`Parser`] keeps a position inside a borrowed byte slice and offers bounds-checked reads for
//! fixed-size little-endian values and ECMA-335 compressed integers and tokens. All reads either
//! succeed and advance, or fail with [`crate::Error::OutOfBounds`] /
//! [`crate::Error::MetadataCorrupt`].
//!
//! # Examples
//!
//! ```rust
//! use cilweave::io::Parser;
//!
//! let data = [0x20, 0x01, 0x01, 0x0E];
//! let mut parser = Parser::new(&data);
//!
//! assert_eq!(parser.read_le::<u8>()?, 0x20);
//! assert_eq!(parser.read_compressed_uint()?, 1);
//! assert_eq!(parser.peek_byte()?, 0x01);
//! parser.advance()?;
//! assert_eq!(parser.read_le::<u8>()?, 0x0E);
//! assert!(!parser.has_more_data());
//! # Ok::<(), cilweave::Error>(())
//! ```

use crate::{
    io::{read_le_at, CilIO},
    metadata::token::Token,
    Error::OutOfBounds,
    Result,
};

/// A generic parser over a byte slice.
///
/// # Thread Safety
///
/// `Parser` is not thread-safe for concurrent use because it keeps a mutable position, but it is
/// cheap to construct one per thread over the same borrowed data.
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new parser positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Total length of the underlying data
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the underlying data is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` while unread bytes remain
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Number of unread bytes
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Current position
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Move the cursor to an absolute position.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if `pos` lies past the end of the data.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(OutOfBounds);
        }

        self.position = pos;
        Ok(())
    }

    /// Skip one byte.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] at the end of the data.
    pub fn advance(&mut self) -> Result<()> {
        self.advance_by(1)
    }

    /// Skip `step` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `step` bytes remain.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        if step > self.remaining() {
            return Err(OutOfBounds);
        }

        self.position += step;
        Ok(())
    }

    /// Look at the next byte without consuming it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] at the end of the data.
    pub fn peek_byte(&self) -> Result<u8> {
        self.data.get(self.position).copied().ok_or(OutOfBounds)
    }

    /// Read a fixed-size little-endian value.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if not enough bytes remain.
    pub fn read_le<T: CilIO>(&mut self) -> Result<T> {
        read_le_at(self.data, &mut self.position)
    }

    /// Borrow the next `length` bytes and advance past them.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if not enough bytes remain.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        if length > self.remaining() {
            return Err(OutOfBounds);
        }

        let start = self.position;
        self.position += length;
        Ok(&self.data[start..self.position])
    }

    /// Read a compressed unsigned integer as defined in ECMA-335 II.23.2.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] on truncated input or
    /// [`crate::Error::MetadataCorrupt`] for an invalid leading byte.
    pub fn read_compressed_uint(&mut self) -> Result<u32> {
        let first_byte = self.read_le::<u8>()?;

        // 0xxxxxxx
        if (first_byte & 0x80) == 0 {
            return Ok(u32::from(first_byte));
        }

        // 10xxxxxx xxxxxxxx
        if (first_byte & 0xC0) == 0x80 {
            let second_byte = self.read_le::<u8>()?;
            return Ok(((u32::from(first_byte) & 0x3F) << 8) | u32::from(second_byte));
        }

        // 110xxxxx xxxxxxxx xxxxxxxx xxxxxxxx
        if (first_byte & 0xE0) == 0xC0 {
            let b1 = u32::from(self.read_le::<u8>()?);
            let b2 = u32::from(self.read_le::<u8>()?);
            let b3 = u32::from(self.read_le::<u8>()?);
            return Ok(((u32::from(first_byte) & 0x1F) << 24) | (b1 << 16) | (b2 << 8) | b3);
        }

        Err(malformed_error!("Invalid compressed uint - {}", first_byte))
    }

    /// Read a compressed `TypeDefOrRefOrSpec` coded index and expand it to a full token.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MetadataCorrupt`] for the reserved tag value `3`.
    pub fn read_compressed_token(&mut self) -> Result<Token> {
        let compressed_token = self.read_compressed_uint()?;

        let table: u32 = match compressed_token & 0x3 {
            0x0 => 0x0200_0000,
            0x1 => 0x0100_0000,
            0x2 => 0x1B00_0000,
            _ => {
                return Err(malformed_error!(
                    "Invalid compressed token - {}",
                    compressed_token
                ))
            }
        };

        Ok(Token::new(table + (compressed_token >> 2)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_read_compressed_uint() {
        let test_cases = vec![
            (vec![0x03], 3),
            (vec![0x7F], 0x7F),
            (vec![0x80, 0x80], 0x80),
            (vec![0xBF, 0xFF], 0x3FFF),
            (vec![0xC0, 0x00, 0x00, 0x00], 0x00),
            (vec![0xDF, 0xFF, 0xFF, 0xFF], 0x1FFF_FFFF),
        ];

        for (input, expected) in test_cases {
            let mut parser = Parser::new(&input);
            assert_eq!(parser.read_compressed_uint().unwrap(), expected);
            assert!(!parser.has_more_data());
        }

        let mut parser = Parser::new(&[]);
        assert!(matches!(
            parser.read_compressed_uint(),
            Err(Error::OutOfBounds)
        ));

        let mut parser = Parser::new(&[0xE0]);
        assert!(matches!(
            parser.read_compressed_uint(),
            Err(Error::MetadataCorrupt { .. })
        ));
    }

    #[test]
    fn test_read_compressed_token() {
        // TypeRef row 1: (1 << 2) | 1
        let mut parser = Parser::new(&[0x05]);
        assert_eq!(parser.read_compressed_token().unwrap().value(), 0x0100_0001);

        // TypeSpec row 2: (2 << 2) | 2
        let mut parser = Parser::new(&[0x0A]);
        assert_eq!(parser.read_compressed_token().unwrap().value(), 0x1B00_0002);

        let mut parser = Parser::new(&[0x07]);
        assert!(parser.read_compressed_token().is_err());
    }

    #[test]
    fn test_cursor_movement() {
        let data = [1, 2, 3, 4];
        let mut parser = Parser::new(&data);

        parser.advance_by(2).unwrap();
        assert_eq!(parser.peek_byte().unwrap(), 3);
        assert_eq!(parser.remaining(), 2);
        assert_eq!(parser.read_bytes(2).unwrap(), &[3, 4]);
        assert!(parser.advance().is_err());
        assert!(parser.peek_byte().is_err());

        parser.seek(1).unwrap();
        assert_eq!(parser.read_le::<u8>().unwrap(), 2);
        assert!(parser.seek(5).is_err());
        assert!(parser.read_bytes(3).is_err());
    }
}
