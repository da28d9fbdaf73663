//! Low-level byte order and safe reading/writing utilities for module images.
//!
//! This module provides endian-aware reading and writing of primitive values from and to byte
//! buffers. Reading is bounds checked against the source slice; writing either targets a fixed
//! buffer (bounds checked) or appends to a growable `Vec<u8>`, which is what the image writer
//! uses while serializing a merged module.
//!
//! # Key Components
//!
//! - [`CilIO`] - Trait describing how a primitive converts from and to its byte representation
//! - [`read_le`] / [`read_le_at`] - Little-endian reads with optional offset tracking
//! - [`write_le_at`] - Little-endian write into a fixed buffer
//! - [`push_le`] - Little-endian append onto a `Vec<u8>`
//! - [`push_compressed_uint`] / [`push_7bit_encoded_int`] - Variable length encodings matching
//!   [`crate::file::parser::Parser::read_compressed_uint`] and
//!   [`crate::file::parser::Parser::read_7bit_encoded_int`]
//!
//! # Examples
//!
//! ```rust
//! use dotrepack::file::io::{push_le, read_le_at};
//!
//! let mut buffer = Vec::new();
//! push_le(&mut buffer, 0x0201u16);
//! push_le(&mut buffer, 3u32);
//!
//! let mut offset = 0;
//! assert_eq!(read_le_at::<u16>(&buffer, &mut offset)?, 0x0201);
//! assert_eq!(read_le_at::<u32>(&buffer, &mut offset)?, 3);
//! # Ok::<(), dotrepack::Error>(())
//! ```
//!
//! # Error Handling
//!
//! All reading functions return [`crate::Error::OutOfBounds`] if there are insufficient bytes in
//! the buffer to complete the operation.

use crate::{Error::OutOfBounds, Result};

/// Trait for primitives that can be read from and written to little-endian bytes.
pub trait CilIO: Sized {
    /// Fixed size byte array backing this type
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Builds the value from little-endian bytes
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Converts the value into little-endian bytes
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cil_io {
    ($($ty:ty),*) => {
        $(
            impl CilIO for $ty {
                type Bytes = [u8; std::mem::size_of::<$ty>()];

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

impl_cil_io!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// Reads a little-endian value from the start of `data`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than `T`.
pub fn read_le<T: CilIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Reads a little-endian value at `offset` and advances the offset past it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the read would cross the end of `data`.
pub fn read_le_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    if (type_len + *offset) > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..*offset + type_len].try_into() else {
        return Err(OutOfBounds);
    };

    *offset += type_len;

    Ok(T::from_le_bytes(read))
}

/// Writes a little-endian value into `data` at `offset` and advances the offset.
///
/// Used to patch fixed-size slots (such as the strong-name signature and MVID) after an image
/// has been laid out.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the write would cross the end of `data`.
pub fn write_le_at<T: CilIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let type_len = std::mem::size_of::<T>();
    if (type_len + *offset) > data.len() {
        return Err(OutOfBounds);
    }

    let bytes = value.to_le_bytes();
    data[*offset..*offset + type_len].copy_from_slice(bytes.as_ref());
    *offset += type_len;

    Ok(())
}

/// Appends a little-endian value to `buffer`.
pub fn push_le<T: CilIO>(buffer: &mut Vec<u8>, value: T) {
    buffer.extend_from_slice(value.to_le_bytes().as_ref());
}

/// Appends an ECMA-335 compressed unsigned integer (II.23.2) to `buffer`.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for values above `0x1FFF_FFFF`, which the encoding
/// cannot represent.
pub fn push_compressed_uint(buffer: &mut Vec<u8>, value: u32) -> Result<()> {
    match value {
        0..=0x7F => buffer.push(value as u8),
        0x80..=0x3FFF => {
            buffer.push(((value >> 8) as u8) | 0x80);
            buffer.push(value as u8);
        }
        0x4000..=0x1FFF_FFFF => {
            buffer.push(((value >> 24) as u8) | 0xC0);
            buffer.push((value >> 16) as u8);
            buffer.push((value >> 8) as u8);
            buffer.push(value as u8);
        }
        _ => {
            return Err(malformed_error!(
                "Value 0x{:08x} too large for compressed encoding",
                value
            ))
        }
    }

    Ok(())
}

/// Appends a 7-bit encoded integer (LEB128 style, as used by .NET `BinaryWriter`) to `buffer`.
pub fn push_7bit_encoded_int(buffer: &mut Vec<u8>, mut value: u32) {
    while value >= 0x80 {
        buffer.push((value as u8) | 0x80);
        value >>= 7;
    }
    buffer.push(value as u8);
}

/// Appends a 7-bit length prefixed UTF-8 string to `buffer`.
pub fn push_prefixed_string_utf8(buffer: &mut Vec<u8>, value: &str) {
    push_7bit_encoded_int(buffer, value.len() as u32);
    buffer.extend_from_slice(value.as_bytes());
}
