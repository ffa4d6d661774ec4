//! Metadata tokens and the tables the engine references.
//!
//! A token is a 32-bit value: the high byte selects the metadata table (or heap, for user
//! strings) and the low 24 bits select the row. The engine only ever reads or mints tokens for a
//! handful of tables, which [`TableId`] enumerates.

use std::fmt;

use strum::{EnumCount, EnumIter};

/// Highest row index a token can address.
pub const MAX_ROW: u32 = 0x00FF_FFFF;

/// The metadata tables (and the user string heap) the engine reads tokens from or mints tokens in.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, EnumIter, EnumCount)]
#[repr(u8)]
pub enum TableId {
    /// `TypeRef` table (0x01)
    TypeRef = 0x01,
    /// `TypeDef` table (0x02)
    TypeDef = 0x02,
    /// `MethodDef` table (0x06)
    MethodDef = 0x06,
    /// `MemberRef` table (0x0A), probe entry point references
    MemberRef = 0x0A,
    /// `StandAloneSig` table (0x11), local variable signatures
    StandAloneSig = 0x11,
    /// `TypeSpec` table (0x1B), boxing targets
    TypeSpec = 0x1B,
    /// `MethodSpec` table (0x2B)
    MethodSpec = 0x2B,
    /// User string heap (0x70), `ldstr` operands
    UserString = 0x70,
}

impl TableId {
    /// Map a raw table byte to a known table.
    #[must_use]
    pub fn from_raw(raw: u8) -> Option<TableId> {
        match raw {
            0x01 => Some(TableId::TypeRef),
            0x02 => Some(TableId::TypeDef),
            0x06 => Some(TableId::MethodDef),
            0x0A => Some(TableId::MemberRef),
            0x11 => Some(TableId::StandAloneSig),
            0x1B => Some(TableId::TypeSpec),
            0x2B => Some(TableId::MethodSpec),
            0x70 => Some(TableId::UserString),
            _ => None,
        }
    }

    /// The raw table byte
    #[must_use]
    pub fn raw(self) -> u8 {
        self as u8
    }
}

/// A metadata token representing a reference to a metadata table entry.
///
/// Tokens in .NET metadata consist of a 32-bit value where:
/// - The high byte (bits 24-31) indicates the table type
/// - The low 24 bits (bits 0-23) indicate the row index within that table
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub u32);

impl Token {
    /// Creates a new token from a raw 32-bit value
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Builds a token from a table and a row, truncating the row to 24 bits.
    #[must_use]
    pub fn from_parts(table: TableId, row: u32) -> Self {
        Token((u32::from(table.raw()) << 24) | (row & MAX_ROW))
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

    /// The table as a [`TableId`], if it is one the engine knows
    #[must_use]
    pub fn table_id(&self) -> Option<TableId> {
        TableId::from_raw(self.table())
    }

    /// Returns `true` if the token points into `table`
    #[must_use]
    pub fn is_table(&self, table: TableId) -> bool {
        self.table() == table.raw()
    }

    /// Extracts the row index from the token (low 24 bits)
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & MAX_ROW
    }

    /// Returns true if this is a null token (value 0)
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
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

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_token_parts() {
        let token = Token::new(0x0600_0001);
        assert_eq!(token.table(), 0x06);
        assert_eq!(token.row(), 1);
        assert_eq!(token.table_id(), Some(TableId::MethodDef));
        assert!(token.is_table(TableId::MethodDef));
        assert!(!token.is_table(TableId::MemberRef));
        assert!(!token.is_null());
        assert!(Token::new(0).is_null());
    }

    #[test]
    fn test_from_parts() {
        let token = Token::from_parts(TableId::StandAloneSig, 3);
        assert_eq!(token.value(), 0x1100_0003);

        let truncated = Token::from_parts(TableId::MemberRef, 0x0100_0002);
        assert_eq!(truncated.value(), 0x0A00_0002);

        let max = Token::from_parts(TableId::UserString, MAX_ROW);
        assert_eq!(max.value(), 0x70FF_FFFF);
    }

    #[test]
    fn test_table_ids_round_trip() {
        assert_eq!(TableId::iter().count(), TableId::COUNT);
        for table in TableId::iter() {
            assert_eq!(TableId::from_raw(table.raw()), Some(table));
        }
        assert_eq!(TableId::from_raw(0x04), None);
    }

    #[test]
    fn test_token_formatting() {
        let token = Token(0x0A00_0010);
        assert_eq!(format!("{token}"), "0x0a000010");

        let debug_str = format!("{token:?}");
        assert!(debug_str.contains("table: 0x0a"));
        assert!(debug_str.contains("row: 16"));
    }

    #[test]
    fn test_token_ordering_follows_value() {
        let mut tokens = vec![Token(0x0A00_0002), Token(0x0600_0009), Token(0x0A00_0001)];
        tokens.sort();
        assert_eq!(
            tokens,
            vec![Token(0x0600_0009), Token(0x0A00_0001), Token(0x0A00_0002)]
        );
    }
}
