//! Low-level byte stream parser for module image decoding.
//!
//! This module provides the [`Parser`] type, a cursor-based binary data parser used by the
//! [`crate::image`] codec to read module images back into the [`crate::metadata`] model. It
//! offers bounds-checked access with little-endian primitives, ECMA-335 compressed integers,
//! 7-bit encoded lengths and length-prefixed UTF-8 strings.
//!
//! # Usage Examples
//!
//! ```rust
//! use dotrepack::Parser;
//!
//! let data = [0x01, 0x02, 0x03, 0x04];
//! let mut parser = Parser::new(&data);
//!
//! let value = parser.read_le::<u16>()?;
//! assert_eq!(value, 0x0201);
//! assert_eq!(parser.pos(), 2);
//! # Ok::<(), dotrepack::Error>(())
//! ```

use crate::{
    file::io::{read_le_at, CilIO},
    metadata::token::Token,
    Result,
};

/// A cursor over a byte slice with bounds-checked reads.
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Creates a new parser positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Total length of the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the underlying data is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` while unread bytes remain.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Advances the cursor by `step` bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the step crosses the end of the data.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        if self.position + step > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.position += step;
        Ok(())
    }

    /// Current cursor position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// The complete underlying data.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data
    }

    /// Reads a little-endian primitive and advances.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if not enough data remains.
    pub fn read_le<T: CilIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Reads a single byte as a boolean; any non-zero value is `true`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] at the end of the data.
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_le::<u8>()? != 0)
    }

    /// Reads a metadata token stored as a raw little-endian `u32`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than four bytes remain.
    pub fn read_token(&mut self) -> Result<Token> {
        Ok(Token::new(self.read_le::<u32>()?))
    }

    /// Reads an ECMA-335 compressed unsigned integer (II.23.2).
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an invalid lead byte, or
    /// [`crate::Error::OutOfBounds`] if the encoding is truncated.
    pub fn read_compressed_uint(&mut self) -> Result<u32> {
        let first_byte = self.read_le::<u8>()?;

        // 1-byte encoding: 0xxxxxxx
        if (first_byte & 0x80) == 0 {
            return Ok(u32::from(first_byte));
        }

        // 2-byte encoding: 10xxxxxx xxxxxxxx
        if (first_byte & 0xC0) == 0x80 {
            let second_byte = self.read_le::<u8>()?;
            let value = ((u32::from(first_byte) & 0x3F) << 8) | u32::from(second_byte);
            return Ok(value);
        }

        // 4-byte encoding: 11xxxxxx xxxxxxxx xxxxxxxx xxxxxxxx
        if (first_byte & 0xE0) == 0xC0 {
            let b1 = u32::from(self.read_le::<u8>()?);
            let b2 = u32::from(self.read_le::<u8>()?);
            let b3 = u32::from(self.read_le::<u8>()?);
            let value = ((u32::from(first_byte) & 0x1F) << 24) | (b1 << 16) | (b2 << 8) | b3;
            return Ok(value);
        }

        Err(malformed_error!("Invalid compressed uint - {}", first_byte))
    }

    /// Reads a 7-bit encoded integer.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the value overflows a `u32`, or
    /// [`crate::Error::OutOfBounds`] if the encoding is truncated.
    pub fn read_7bit_encoded_int(&mut self) -> Result<u32> {
        let mut value = 0u32;
        let mut shift = 0;

        loop {
            if self.position >= self.data.len() {
                return Err(out_of_bounds_error!());
            }

            let byte = self.data[self.position];
            self.position += 1;

            value |= u32::from(byte & 0x7F) << shift;
            shift += 7;

            if (byte & 0x80) == 0 {
                break;
            }

            if shift >= 32 {
                return Err(malformed_error!(
                    "7-bit encoded integer overflow: value exceeds u32 capacity after {} bits",
                    shift
                ));
            }
        }

        Ok(value)
    }

    /// Reads a 7-bit length prefixed UTF-8 string.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the string is truncated, or
    /// [`crate::Error::Malformed`] if it is not valid UTF-8.
    pub fn read_prefixed_string_utf8(&mut self) -> Result<String> {
        let length = self.read_7bit_encoded_int()? as usize;
        let bytes = self.read_bytes(length)?;

        String::from_utf8(bytes.to_vec()).map_err(|e| {
            malformed_error!(
                "Invalid UTF-8 string at offset {}-{}: {}",
                self.position - length,
                self.position,
                e.utf8_error()
            )
        })
    }

    /// Reads `length` raw bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `length` bytes remain.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        if self.position + length > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        let bytes = &self.data[self.position..self.position + length];
        self.position += length;
        Ok(bytes)
    }

    /// Reads a 7-bit length prefixed byte blob.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the blob is truncated.
    pub fn read_prefixed_blob(&mut self) -> Result<Vec<u8>> {
        let length = self.read_7bit_encoded_int()? as usize;
        Ok(self.read_bytes(length)?.to_vec())
    }

    /// Reads a compressed element count, refusing counts that could not possibly fit in the
    /// remaining data (every element occupies at least one byte).
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for impossible counts.
    pub fn read_count(&mut self) -> Result<usize> {
        let count = self.read_compressed_uint()? as usize;
        if count > self.data.len() - self.position {
            return Err(malformed_error!(
                "Element count {} exceeds remaining {} bytes at offset {}",
                count,
                self.data.len() - self.position,
                self.position
            ));
        }
        Ok(count)
    }
}
