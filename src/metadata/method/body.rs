//! Parsing and encoding of CIL method bodies.
//!
//! A method body is a tiny (one byte) or fat (twelve byte) header, the code, and for fat headers
//! optional extra data sections holding exception handler clauses. Parsing is strict: anything the
//! reader cannot account for is reported instead of being skipped, because a handler clause that
//! goes missing here would be silently dropped from the rewritten body.
//!
//! # Examples
//!
//! ```rust
//! use cilweave::metadata::method::MethodBody;
//!
//! // tiny header: 2 bytes of code (ldarg.0; ret)
//! let body = MethodBody::from(&[0x0A, 0x02, 0x2A])?;
//! assert!(!body.is_fat);
//! assert_eq!(body.size_code, 2);
//! assert_eq!(body.max_stack, 8);
//! assert_eq!(body.code(&[0x0A, 0x02, 0x2A]), &[0x02, 0x2A]);
//! # Ok::<(), cilweave::Error>(())
//! ```
//!
//! # References
//! - ECMA-335 6th Edition, Partition II, Section 25.4 - Common Intermediate Language Physical Layout

use crate::{
    io::{read_le, read_le_at},
    metadata::{
        method::{ExceptionHandler, ExceptionHandlerFlags, MethodBodyFlags, SectionFlags},
        token::{TableId, Token},
    },
    Result,
};

/// Size of a fat header in bytes
pub const FAT_HEADER_SIZE: usize = 12;
/// Max stack implied by a tiny header
pub const TINY_MAX_STACK: usize = 8;
/// Largest code size a tiny header can describe
pub const TINY_MAX_CODE_SIZE: usize = 63;

const SMALL_CLAUSE_SIZE: usize = 12;
const FAT_CLAUSE_SIZE: usize = 24;
const SECTION_HEADER_SIZE: usize = 4;
const MAX_FAT_SECTION_SIZE: usize = 0x00FF_FFFF;

/// Parsed method body header and exception handler clauses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodBody {
    /// Size of the code in bytes
    pub size_code: usize,
    /// Size of the header in bytes (1 or 12)
    pub size_header: usize,
    /// Size of all extra data sections, including alignment padding before the first one
    pub size_sections: usize,
    /// `StandAloneSig` token of the local variable signature, 0 if none
    pub local_var_sig_token: u32,
    /// Maximum evaluation stack depth
    pub max_stack: usize,
    /// Fat header
    pub is_fat: bool,
    /// Locals are zero-initialized
    pub is_init_local: bool,
    /// Exception handler clauses, in table order
    pub exception_handlers: Vec<ExceptionHandler>,
}

impl MethodBody {
    /// Parse a method body from `data`, which starts at the header.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MetadataCorrupt`] when the header, code or any extra data section
    /// is inconsistent or truncated.
    pub fn from(data: &[u8]) -> Result<MethodBody> {
        if data.is_empty() {
            return Err(malformed_error!("Provided data for body parsing is empty"));
        }

        let first_byte = read_le::<u8>(data)?;
        match MethodBodyFlags::from_bits_truncate(u16::from(first_byte & 0b_0000_0011_u8)) {
            MethodBodyFlags::TINY_FORMAT => {
                let size_code = (first_byte >> 2) as usize;
                if size_code + 1 > data.len() {
                    return Err(malformed_error!(
                        "Tiny body declares {} bytes of code, {} available",
                        size_code,
                        data.len() - 1
                    ));
                }

                Ok(MethodBody {
                    size_code,
                    size_header: 1,
                    size_sections: 0,
                    local_var_sig_token: 0,
                    max_stack: TINY_MAX_STACK,
                    is_fat: false,
                    is_init_local: false,
                    exception_handlers: Vec::new(),
                })
            }
            MethodBodyFlags::FAT_FORMAT => Self::parse_fat(data),
            _ => Err(malformed_error!(
                "MethodHeader is neither FAT nor TINY - {}",
                first_byte
            )),
        }
    }

    fn parse_fat(data: &[u8]) -> Result<MethodBody> {
        if data.len() < FAT_HEADER_SIZE {
            return Err(malformed_error!("Fat header truncated - {} bytes", data.len()));
        }

        let first_duo = read_le::<u16>(data)?;
        let size_header = ((first_duo >> 12) * 4) as usize;
        if size_header != FAT_HEADER_SIZE {
            return Err(malformed_error!("Fat header size is {}", size_header));
        }

        let flags_header = MethodBodyFlags::from_bits_truncate(first_duo & 0x0FFF);
        let max_stack = read_le::<u16>(&data[2..])? as usize;
        let size_code = read_le::<u32>(&data[4..])? as usize;
        let local_var_sig_token = read_le::<u32>(&data[8..])?;

        let code_end = size_header
            .checked_add(size_code)
            .ok_or_else(|| malformed_error!("Code size overflow"))?;
        if code_end > data.len() {
            return Err(malformed_error!(
                "Fat body declares {} bytes of code, {} available",
                size_code,
                data.len() - size_header
            ));
        }

        if local_var_sig_token != 0 && !Token::new(local_var_sig_token).is_table(TableId::StandAloneSig)
        {
            return Err(malformed_error!(
                "Local signature token 0x{:08X} is not a StandAloneSig",
                local_var_sig_token
            ));
        }

        let mut exception_handlers = Vec::new();
        let mut cursor = code_end;
        if flags_header.contains(MethodBodyFlags::MORE_SECTS) {
            cursor = (cursor + 3) & !3;
            loop {
                let more = parse_section(data, &mut cursor, &mut exception_handlers)?;
                if !more {
                    break;
                }
                cursor = (cursor + 3) & !3;
            }
        }

        for handler in &exception_handlers {
            validate_clause(handler, size_code)?;
        }

        Ok(MethodBody {
            size_code,
            size_header,
            size_sections: cursor - code_end,
            local_var_sig_token,
            max_stack,
            is_fat: true,
            is_init_local: flags_header.contains(MethodBodyFlags::INIT_LOCALS),
            exception_handlers,
        })
    }

    /// Total size of header and code
    #[must_use]
    pub fn size(&self) -> usize {
        self.size_code + self.size_header
    }

    /// Borrow the code bytes out of the buffer this body was parsed from
    #[must_use]
    pub fn code<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        let end = self.size().min(data.len());
        &data[self.size_header.min(end)..end]
    }

    /// The local variable signature token, if the method has locals
    #[must_use]
    pub fn local_var_sig(&self) -> Option<Token> {
        (self.local_var_sig_token != 0).then(|| Token::new(self.local_var_sig_token))
    }
}

/// Parses one extra data section at `cursor`; returns whether another section follows.
fn parse_section(
    data: &[u8],
    cursor: &mut usize,
    handlers: &mut Vec<ExceptionHandler>,
) -> Result<bool> {
    if *cursor + SECTION_HEADER_SIZE > data.len() {
        return Err(malformed_error!(
            "Extra data section header at {} truncated",
            *cursor
        ));
    }

    let section_flags = SectionFlags::from_bits_retain(data[*cursor]);
    if !section_flags.contains(SectionFlags::EHTABLE)
        || section_flags.contains(SectionFlags::OPT_ILTABLE)
    {
        return Err(malformed_error!(
            "Extra data section at {} is not an EH table - 0x{:02X}",
            *cursor,
            section_flags.bits()
        ));
    }

    let is_fat = section_flags.contains(SectionFlags::FAT_FORMAT);
    let (section_size, clause_size) = if is_fat {
        (
            (read_le::<u32>(&data[*cursor..])? >> 8) as usize,
            FAT_CLAUSE_SIZE,
        )
    } else {
        (data[*cursor + 1] as usize, SMALL_CLAUSE_SIZE)
    };

    if section_size < SECTION_HEADER_SIZE
        || (section_size - SECTION_HEADER_SIZE) % clause_size != 0
    {
        return Err(malformed_error!(
            "EH section at {} has size {} which is not a whole number of clauses",
            *cursor,
            section_size
        ));
    }

    if *cursor + section_size > data.len() {
        return Err(malformed_error!(
            "EH section at {} of size {} truncated",
            *cursor,
            section_size
        ));
    }

    let mut offset = *cursor + SECTION_HEADER_SIZE;
    for _ in 0..(section_size - SECTION_HEADER_SIZE) / clause_size {
        let handler = if is_fat {
            ExceptionHandler {
                #[allow(clippy::cast_possible_truncation)]
                flags: ExceptionHandlerFlags::from_bits_retain(
                    match read_le_at::<u32>(data, &mut offset)? {
                        raw if raw > u32::from(u16::MAX) => {
                            return Err(malformed_error!("Clause flags 0x{:08X} out of range", raw))
                        }
                        raw => raw as u16,
                    },
                ),
                try_offset: read_le_at::<u32>(data, &mut offset)?,
                try_length: read_le_at::<u32>(data, &mut offset)?,
                handler_offset: read_le_at::<u32>(data, &mut offset)?,
                handler_length: read_le_at::<u32>(data, &mut offset)?,
                filter_offset: read_le_at::<u32>(data, &mut offset)?,
            }
        } else {
            ExceptionHandler {
                flags: ExceptionHandlerFlags::from_bits_retain(read_le_at::<u16>(
                    data,
                    &mut offset,
                )?),
                try_offset: u32::from(read_le_at::<u16>(data, &mut offset)?),
                try_length: u32::from(read_le_at::<u8>(data, &mut offset)?),
                handler_offset: u32::from(read_le_at::<u16>(data, &mut offset)?),
                handler_length: u32::from(read_le_at::<u8>(data, &mut offset)?),
                filter_offset: read_le_at::<u32>(data, &mut offset)?,
            }
        };
        handlers.push(handler);
    }

    *cursor += section_size;
    Ok(section_flags.contains(SectionFlags::MORE_SECTS))
}

fn validate_clause(handler: &ExceptionHandler, size_code: usize) -> Result<()> {
    let size_code = size_code as u64;
    if handler.try_length == 0 || handler.handler_length == 0 {
        return Err(malformed_error!("Empty region in clause {:?}", handler));
    }

    if handler.try_end() > size_code || handler.handler_end() > size_code {
        return Err(malformed_error!(
            "Clause {:?} extends past the code end {}",
            handler,
            size_code
        ));
    }

    if handler.flags == ExceptionHandlerFlags::FILTER
        && u64::from(handler.filter_offset) >= size_code
    {
        return Err(malformed_error!(
            "Filter offset {} past the code end {}",
            handler.filter_offset,
            size_code
        ));
    }

    Ok(())
}

/// Encode a method body header.
///
/// A tiny header is produced when the code is small enough, `max_stack` does not exceed 8, and
/// there are no locals and no extra sections; otherwise a fat header.
///
/// # Errors
///
/// Returns [`crate::Error::MetadataCorrupt`] if `code_size` or `max_stack` exceed what a fat
/// header can represent.
pub fn encode_method_body_header(
    code_size: usize,
    max_stack: usize,
    local_var_sig_token: u32,
    init_locals: bool,
    has_sections: bool,
) -> Result<Vec<u8>> {
    let fits_tiny = code_size <= TINY_MAX_CODE_SIZE
        && max_stack <= TINY_MAX_STACK
        && local_var_sig_token == 0
        && !has_sections;

    if fits_tiny {
        #[allow(clippy::cast_possible_truncation)]
        return Ok(vec![((code_size as u8) << 2) | 0x2]);
    }

    let max_stack = u16::try_from(max_stack)
        .map_err(|_| malformed_error!("Max stack {} does not fit a fat header", max_stack))?;
    let code_size = u32::try_from(code_size)
        .map_err(|_| malformed_error!("Code size {} does not fit a fat header", code_size))?;

    let mut flags = MethodBodyFlags::FAT_FORMAT;
    if has_sections {
        flags |= MethodBodyFlags::MORE_SECTS;
    }
    if init_locals {
        flags |= MethodBodyFlags::INIT_LOCALS;
    }

    let first_duo = flags.bits() | ((FAT_HEADER_SIZE as u16 / 4) << 12);

    let mut header = Vec::with_capacity(FAT_HEADER_SIZE);
    header.extend_from_slice(&first_duo.to_le_bytes());
    header.extend_from_slice(&max_stack.to_le_bytes());
    header.extend_from_slice(&code_size.to_le_bytes());
    header.extend_from_slice(&local_var_sig_token.to_le_bytes());
    Ok(header)
}

/// Encode exception handler clauses as a single fat EH section.
///
/// The caller aligns the section to a 4-byte boundary after the code.
///
/// # Errors
///
/// Returns [`crate::Error::MetadataCorrupt`] if the clauses do not fit a single section.
pub fn encode_exception_handlers(handlers: &[ExceptionHandler]) -> Result<Vec<u8>> {
    let section_size = SECTION_HEADER_SIZE + handlers.len() * FAT_CLAUSE_SIZE;
    if section_size > MAX_FAT_SECTION_SIZE {
        return Err(malformed_error!(
            "{} exception handlers do not fit one section",
            handlers.len()
        ));
    }

    let mut section = Vec::with_capacity(section_size);
    let kind = (SectionFlags::EHTABLE | SectionFlags::FAT_FORMAT).bits();
    #[allow(clippy::cast_possible_truncation)]
    section.extend_from_slice(&(u32::from(kind) | ((section_size as u32) << 8)).to_le_bytes());

    for handler in handlers {
        section.extend_from_slice(&u32::from(handler.flags.bits()).to_le_bytes());
        section.extend_from_slice(&handler.try_offset.to_le_bytes());
        section.extend_from_slice(&handler.try_length.to_le_bytes());
        section.extend_from_slice(&handler.handler_offset.to_le_bytes());
        section.extend_from_slice(&handler.handler_length.to_le_bytes());
        section.extend_from_slice(&handler.filter_offset.to_le_bytes());
    }

    Ok(section)
}

/// Assemble a complete method body from code, header fields and clauses.
///
/// # Errors
///
/// Propagates header and section encoding errors.
pub fn encode_method_body(
    code: &[u8],
    max_stack: usize,
    local_var_sig_token: u32,
    init_locals: bool,
    handlers: &[ExceptionHandler],
) -> Result<Vec<u8>> {
    let mut body = encode_method_body_header(
        code.len(),
        max_stack,
        local_var_sig_token,
        init_locals,
        !handlers.is_empty(),
    )?;
    body.extend_from_slice(code);

    if !handlers.is_empty() {
        while body.len() % 4 != 0 {
            body.push(0);
        }
        body.extend_from_slice(&encode_exception_handlers(handlers)?);
    }

    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    /// try { nop; leave.s +2 } catch(TypeRef#1) { pop; leave.s 0 } ret, with a small EH section
    fn fat_with_small_section() -> Vec<u8> {
        let mut data = vec![
            0x1B, 0x30, // fat, more sects, init locals, header size 3
            0x02, 0x00, // max stack
            0x08, 0x00, 0x00, 0x00, // code size
            0x01, 0x00, 0x00, 0x11, // local sig token
        ];
        data.extend_from_slice(&[0x00, 0xDE, 0x03, 0x26, 0xDE, 0x00, 0x2A, 0x00]);
        // small EH section, one clause
        data.extend_from_slice(&[0x01, 0x10, 0x00, 0x00]);
        data.extend_from_slice(&[
            0x00, 0x00, // flags
            0x00, 0x00, 0x03, // try 0..3
            0x03, 0x00, 0x03, // handler 3..6
            0x01, 0x00, 0x00, 0x01, // TypeRef#1
        ]);
        data
    }

    #[test]
    fn tiny() {
        let data = [0x12, 0x00, 0x00, 0x02, 0x2A, 0xFF];
        let body = MethodBody::from(&data).unwrap();

        assert!(!body.is_fat);
        assert_eq!(body.size_code, 4);
        assert_eq!(body.size_header, 1);
        assert_eq!(body.max_stack, TINY_MAX_STACK);
        assert_eq!(body.local_var_sig(), None);
        assert_eq!(body.code(&data), &[0x00, 0x00, 0x02, 0x2A]);
    }

    #[test]
    fn fat_small_section() {
        let data = fat_with_small_section();
        let body = MethodBody::from(&data).unwrap();

        assert!(body.is_fat);
        assert!(body.is_init_local);
        assert_eq!(body.max_stack, 2);
        assert_eq!(body.size_code, 8);
        assert_eq!(body.size_sections, 16);
        assert_eq!(body.local_var_sig(), Some(Token::new(0x1100_0001)));
        assert_eq!(body.exception_handlers.len(), 1);

        let clause = &body.exception_handlers[0];
        assert_eq!(clause.flags, ExceptionHandlerFlags::EXCEPTION);
        assert_eq!((clause.try_offset, clause.try_length), (0, 3));
        assert_eq!((clause.handler_offset, clause.handler_length), (3, 3));
        assert_eq!(clause.filter_offset, 0x0100_0001);
    }

    #[test]
    fn truncated_or_inconsistent_sections_are_corrupt() {
        // section cut short
        let mut data = fat_with_small_section();
        data.truncate(data.len() - 2);
        assert!(matches!(
            MethodBody::from(&data),
            Err(Error::MetadataCorrupt { .. })
        ));

        // size not a multiple of the clause size
        let mut data = fat_with_small_section();
        data[21] = 0x11;
        data.push(0);
        assert!(matches!(
            MethodBody::from(&data),
            Err(Error::MetadataCorrupt { .. })
        ));

        // not an EH table
        let mut data = fat_with_small_section();
        data[20] = 0x02;
        assert!(matches!(
            MethodBody::from(&data),
            Err(Error::MetadataCorrupt { .. })
        ));

        // handler runs past the code
        let mut data = fat_with_small_section();
        data[31] = 0x09;
        assert!(matches!(
            MethodBody::from(&data),
            Err(Error::MetadataCorrupt { .. })
        ));

        // MORE_SECTS set but nothing follows
        let mut data = fat_with_small_section();
        data.truncate(20);
        assert!(matches!(
            MethodBody::from(&data),
            Err(Error::MetadataCorrupt { .. })
        ));
    }

    #[test]
    fn unknown_clause_kind_is_kept() {
        let mut data = fat_with_small_section();
        data[24] = 0x03;
        let body = MethodBody::from(&data).unwrap();
        assert_eq!(body.exception_handlers[0].kind(), None);
    }

    #[test]
    fn bad_headers() {
        assert!(MethodBody::from(&[]).is_err());
        assert!(MethodBody::from(&[0x01, 0x00]).is_err());
        assert!(MethodBody::from(&[0x0E, 0x2A]).is_err());

        // header size nibble of 2
        let data = [0x03, 0x20, 0x08, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x2A];
        assert!(MethodBody::from(&data).is_err());

        // local token from the wrong table
        let data = [0x03, 0x30, 0x08, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x02, 0x2A];
        assert!(MethodBody::from(&data).is_err());
    }

    #[test]
    fn encode_picks_header_format() {
        let tiny = encode_method_body(&[0x2A], 1, 0, false, &[]).unwrap();
        assert_eq!(tiny, [0x06, 0x2A]);

        let fat = encode_method_body(&[0x2A], 9, 0, true, &[]).unwrap();
        assert_eq!(fat.len(), FAT_HEADER_SIZE + 1);
        let parsed = MethodBody::from(&fat).unwrap();
        assert!(parsed.is_fat);
        assert!(parsed.is_init_local);
        assert_eq!(parsed.max_stack, 9);
    }

    #[test]
    fn encode_with_handlers_is_parseable() {
        let code = [0x00, 0xDD, 0x06, 0x00, 0x00, 0x00, 0x26, 0xDD, 0x00, 0x00, 0x00, 0x00, 0x2A];
        let handlers = [ExceptionHandler::catch(0, 6, 6, 6, Token::new(0x1B00_0001))];
        let body = encode_method_body(&code, 2, 0x1100_0004, true, &handlers).unwrap();

        // 12 header + 13 code + 3 padding + 28 section
        assert_eq!(body.len(), 56);
        let parsed = MethodBody::from(&body).unwrap();
        assert_eq!(parsed.exception_handlers, handlers);
        assert_eq!(parsed.code(&body), &code);
        assert_eq!(parsed.local_var_sig_token, 0x1100_0004);
    }
}
