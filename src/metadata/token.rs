//! Metadata tokens.
//!
//! A [`Token`] addresses one row of one metadata table. Module local before a merge, the
//! rewriter maps every token into the output module's token space.

use std::fmt;

/// A metadata token representing a reference to a metadata table entry.
///
/// Tokens in .NET metadata consist of a 32-bit value where:
/// - The high byte (bits 24-31) indicates the table type
/// - The low 24 bits (bits 0-23) indicate the row index within that table
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Token(pub u32);

impl Token {
    /// `TypeRef` table
    pub const TYPE_REF: u8 = 0x01;
    /// `TypeDef` table
    pub const TYPE_DEF: u8 = 0x02;
    /// `Field` table
    pub const FIELD: u8 = 0x04;
    /// `MethodDef` table
    pub const METHOD_DEF: u8 = 0x06;
    /// `MemberRef` table
    pub const MEMBER_REF: u8 = 0x0A;
    /// `Event` table
    pub const EVENT: u8 = 0x14;
    /// `Property` table
    pub const PROPERTY: u8 = 0x17;
    /// `AssemblyRef` table
    pub const ASSEMBLY_REF: u8 = 0x23;
    /// User string heap (`ldstr` operands)
    pub const USER_STRING: u8 = 0x70;
    /// Largest row index a token can address
    pub const MAX_ROW: u32 = 0x00FF_FFFF;

    /// Creates a new token from a raw 32-bit value
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Creates a token from a table id and a 1-based row index
    #[must_use]
    pub fn from_parts(table: u8, row: u32) -> Self {
        Token((u32::from(table) << 24) | (row & Self::MAX_ROW))
    }

    /// Returns the raw token value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Extracts the table type from the token (high byte)
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Extracts the row index from the token (low 24 bits)
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns true if this is a null token (value 0)
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Returns true if the token addresses a table that describes a type
    /// (`TypeDef` or `TypeRef`)
    #[must_use]
    pub fn is_type(&self) -> bool {
        matches!(self.table(), Self::TYPE_DEF | Self::TYPE_REF)
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}
