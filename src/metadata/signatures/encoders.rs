//! Signature blob encoders used when minting probe references and extending local signatures.
//!
//! - [`encode_method_signature`] - `MemberRef` signatures of the probe entry points
//! - [`encode_type_signature`] - a single type, as stored in a `TypeSpec` blob
//! - [`encode_local_var_signature_appended`] - an existing `LOCAL_SIG` blob with extra locals
//!   added after the original slots

use crate::{
    io::{write_compressed_uint, Parser},
    metadata::{
        signatures::{
            SignatureMethod, SignatureParameter, TypeSignature, CALLING_CONVENTION, ELEMENT_TYPE,
            SIGNATURE_HEADER,
        },
        token::{TableId, Token},
    },
    Result,
};

/// Number of local slots a method can address (`ldloc`/`stloc` take a 16-bit index, 0xFFFF is
/// reserved).
pub const MAX_LOCALS: u32 = 0xFFFE;

fn encode_type_def_or_ref_coded_index(token: Token) -> Result<u32> {
    let tag = match token.table_id() {
        Some(TableId::TypeDef) => 0,
        Some(TableId::TypeRef) => 1,
        Some(TableId::TypeSpec) => 2,
        _ => {
            return Err(malformed_error!(
                "Token {} cannot be used as TypeDefOrRef coded index",
                token
            ))
        }
    };

    Ok((token.row() << 2) | tag)
}

/// Append the encoding of `signature` to `buffer`.
///
/// General arrays and function pointers are not produced by the engine and are rejected.
///
/// # Errors
///
/// Returns [`crate::Error::MetadataCorrupt`] for types that cannot be encoded.
pub fn encode_type_signature(signature: &TypeSignature, buffer: &mut Vec<u8>) -> Result<()> {
    match signature {
        TypeSignature::Void => buffer.push(ELEMENT_TYPE::VOID),
        TypeSignature::Boolean => buffer.push(ELEMENT_TYPE::BOOLEAN),
        TypeSignature::Char => buffer.push(ELEMENT_TYPE::CHAR),
        TypeSignature::I1 => buffer.push(ELEMENT_TYPE::I1),
        TypeSignature::U1 => buffer.push(ELEMENT_TYPE::U1),
        TypeSignature::I2 => buffer.push(ELEMENT_TYPE::I2),
        TypeSignature::U2 => buffer.push(ELEMENT_TYPE::U2),
        TypeSignature::I4 => buffer.push(ELEMENT_TYPE::I4),
        TypeSignature::U4 => buffer.push(ELEMENT_TYPE::U4),
        TypeSignature::I8 => buffer.push(ELEMENT_TYPE::I8),
        TypeSignature::U8 => buffer.push(ELEMENT_TYPE::U8),
        TypeSignature::R4 => buffer.push(ELEMENT_TYPE::R4),
        TypeSignature::R8 => buffer.push(ELEMENT_TYPE::R8),
        TypeSignature::String => buffer.push(ELEMENT_TYPE::STRING),
        TypeSignature::Object => buffer.push(ELEMENT_TYPE::OBJECT),
        TypeSignature::I => buffer.push(ELEMENT_TYPE::I),
        TypeSignature::U => buffer.push(ELEMENT_TYPE::U),
        TypeSignature::TypedByRef => buffer.push(ELEMENT_TYPE::TYPEDBYREF),
        TypeSignature::Ptr(base) => {
            buffer.push(ELEMENT_TYPE::PTR);
            encode_type_signature(base, buffer)?;
        }
        TypeSignature::ByRef(base) => {
            buffer.push(ELEMENT_TYPE::BYREF);
            encode_type_signature(base, buffer)?;
        }
        TypeSignature::Pinned(base) => {
            buffer.push(ELEMENT_TYPE::PINNED);
            encode_type_signature(base, buffer)?;
        }
        TypeSignature::SzArray(base) => {
            buffer.push(ELEMENT_TYPE::SZARRAY);
            encode_type_signature(base, buffer)?;
        }
        TypeSignature::ValueType(token) => {
            buffer.push(ELEMENT_TYPE::VALUETYPE);
            write_compressed_uint(encode_type_def_or_ref_coded_index(*token)?, buffer)?;
        }
        TypeSignature::Class(token) => {
            buffer.push(ELEMENT_TYPE::CLASS);
            write_compressed_uint(encode_type_def_or_ref_coded_index(*token)?, buffer)?;
        }
        TypeSignature::GenericParamType(index) => {
            buffer.push(ELEMENT_TYPE::VAR);
            write_compressed_uint(*index, buffer)?;
        }
        TypeSignature::GenericParamMethod(index) => {
            buffer.push(ELEMENT_TYPE::MVAR);
            write_compressed_uint(*index, buffer)?;
        }
        TypeSignature::GenericInst(base, args) => {
            buffer.push(ELEMENT_TYPE::GENERICINST);
            encode_type_signature(base, buffer)?;
            write_compressed_uint(u32::try_from(args.len()).unwrap_or(u32::MAX), buffer)?;
            for arg in args {
                encode_type_signature(arg, buffer)?;
            }
        }
        TypeSignature::Unknown | TypeSignature::Array(_) | TypeSignature::FnPtr(_) => {
            return Err(malformed_error!(
                "Type {:?} cannot be encoded",
                signature
            ))
        }
    }

    Ok(())
}

fn encode_parameter(parameter: &SignatureParameter, buffer: &mut Vec<u8>) -> Result<()> {
    for modifier in &parameter.modifiers {
        buffer.push(ELEMENT_TYPE::CMOD_OPT);
        write_compressed_uint(encode_type_def_or_ref_coded_index(*modifier)?, buffer)?;
    }

    if parameter.by_ref {
        buffer.push(ELEMENT_TYPE::BYREF);
    }

    encode_type_signature(&parameter.base, buffer)
}

/// Encode a method signature blob.
///
/// # Errors
///
/// Returns [`crate::Error::MetadataCorrupt`] if a parameter type cannot be encoded.
///
/// # Examples
///
/// ```rust
/// use cilweave::metadata::signatures::{
///     encode_method_signature, SignatureMethod, SignatureParameter, TypeSignature,
/// };
///
/// let exit = SignatureMethod {
///     return_type: SignatureParameter { base: TypeSignature::Void, ..Default::default() },
///     params: vec![
///         SignatureParameter { base: TypeSignature::Object, ..Default::default() },
///         SignatureParameter { base: TypeSignature::Object, ..Default::default() },
///     ],
///     ..Default::default()
/// };
/// assert_eq!(encode_method_signature(&exit)?, [0x00, 0x02, 0x01, 0x1C, 0x1C]);
/// # Ok::<(), cilweave::Error>(())
/// ```
pub fn encode_method_signature(signature: &SignatureMethod) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();

    let mut calling_convention = if signature.vararg {
        CALLING_CONVENTION::VARARG
    } else {
        CALLING_CONVENTION::DEFAULT
    };
    if signature.has_this {
        calling_convention |= CALLING_CONVENTION::HASTHIS;
    }
    if signature.explicit_this {
        calling_convention |= CALLING_CONVENTION::EXPLICITTHIS;
    }
    if signature.param_count_generic > 0 {
        calling_convention |= CALLING_CONVENTION::GENERIC;
    }
    buffer.push(calling_convention);

    if signature.param_count_generic > 0 {
        write_compressed_uint(signature.param_count_generic, &mut buffer)?;
    }

    let param_count = u32::try_from(signature.params.len() + signature.varargs.len())
        .map_err(|_| malformed_error!("Too many parameters in method signature"))?;
    write_compressed_uint(param_count, &mut buffer)?;

    encode_parameter(&signature.return_type, &mut buffer)?;
    for param in &signature.params {
        encode_parameter(param, &mut buffer)?;
    }
    if !signature.varargs.is_empty() {
        buffer.push(ELEMENT_TYPE::SENTINEL);
        for param in &signature.varargs {
            encode_parameter(param, &mut buffer)?;
        }
    }

    Ok(buffer)
}

/// Build a `LOCAL_SIG` blob that keeps every original slot and appends `appended` after them.
///
/// Each appended entry is the raw encoding of one local (optionally prefixed by `BYREF`). The
/// original type bytes are copied verbatim, so slot numbers of existing locals never change.
/// Returns the blob and the index of the first appended slot.
///
/// # Errors
///
/// Returns [`crate::Error::MetadataCorrupt`] if `original` is not a local signature, and
/// [`crate::Error::UnsupportedConstruct`] if the result would exceed [`MAX_LOCALS`].
pub fn encode_local_var_signature_appended(
    original: Option<&[u8]>,
    appended: &[Vec<u8>],
) -> Result<(Vec<u8>, u16)> {
    let (existing, body) = match original {
        Some(blob) => {
            let mut parser = Parser::new(blob);
            let head = parser.read_le::<u8>()?;
            if head != SIGNATURE_HEADER::LOCAL_SIG {
                return Err(malformed_error!(
                    "SignatureLocalVar - invalid start - {}",
                    head
                ));
            }
            let count = parser.read_compressed_uint()?;
            (count, &blob[parser.pos()..])
        }
        None => (0, &[][..]),
    };

    let appended_count = u32::try_from(appended.len()).unwrap_or(u32::MAX);
    let total = existing.saturating_add(appended_count);
    if total > MAX_LOCALS {
        return Err(unsupported_error!(
            "{} locals exceed the addressable slot range",
            total
        ));
    }

    let mut buffer = Vec::with_capacity(body.len() + appended.iter().map(Vec::len).sum::<usize>() + 5);
    buffer.push(SIGNATURE_HEADER::LOCAL_SIG);
    write_compressed_uint(total, &mut buffer)?;
    buffer.extend_from_slice(body);
    for local in appended {
        buffer.extend_from_slice(local);
    }

    Ok((buffer, existing as u16))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::signatures::parse_local_var_signature;
    use crate::Error;

    fn param(base: TypeSignature) -> SignatureParameter {
        SignatureParameter {
            base,
            ..Default::default()
        }
    }

    #[test]
    fn test_encode_probe_enter_signature() {
        let enter = SignatureMethod {
            return_type: param(TypeSignature::Object),
            params: vec![
                param(TypeSignature::String),
                param(TypeSignature::String),
                param(TypeSignature::String),
                param(TypeSignature::Object),
                param(TypeSignature::SzArray(Box::new(TypeSignature::Object))),
                param(TypeSignature::U4),
            ],
            ..Default::default()
        };

        assert_eq!(
            encode_method_signature(&enter).unwrap(),
            [0x00, 0x06, 0x1C, 0x0E, 0x0E, 0x0E, 0x1C, 0x1D, 0x1C, 0x09]
        );
    }

    #[test]
    fn test_encode_tokens_and_generics() {
        let mut buffer = Vec::new();
        encode_type_signature(
            &TypeSignature::GenericInst(
                Box::new(TypeSignature::ValueType(Token::new(0x0100_0004))),
                vec![TypeSignature::GenericParamMethod(1)],
            ),
            &mut buffer,
        )
        .unwrap();
        assert_eq!(buffer, [0x15, 0x11, 0x11, 0x01, 0x1E, 0x01]);

        let mut buffer = Vec::new();
        assert!(encode_type_signature(
            &TypeSignature::Class(Token::new(0x0600_0001)),
            &mut buffer
        )
        .is_err());
    }

    #[test]
    fn test_append_locals_keeps_original_slots() {
        let original = [0x07, 0x02, 0x08, 0x0E];
        let (blob, first) =
            encode_local_var_signature_appended(Some(&original), &[vec![0x1C], vec![0x10, 0x08]])
                .unwrap();

        assert_eq!(first, 2);
        assert_eq!(blob, [0x07, 0x04, 0x08, 0x0E, 0x1C, 0x10, 0x08]);

        let parsed = parse_local_var_signature(&blob).unwrap();
        assert_eq!(parsed.locals.len(), 4);
        assert_eq!(parsed.locals[0].base, TypeSignature::I4);
        assert!(parsed.locals[3].is_byref);
    }

    #[test]
    fn test_append_locals_without_original() {
        let (blob, first) = encode_local_var_signature_appended(None, &[vec![0x1C]]).unwrap();
        assert_eq!(first, 0);
        assert_eq!(blob, [0x07, 0x01, 0x1C]);
    }

    #[test]
    fn test_append_locals_limits() {
        // 0xFFFE locals already in use
        let original = [0x07, 0xC0, 0x00, 0xFF, 0xFE];
        assert!(matches!(
            encode_local_var_signature_appended(Some(&original), &[vec![0x1C]]),
            Err(Error::UnsupportedConstruct(_))
        ));

        assert!(matches!(
            encode_local_var_signature_appended(Some(&[0x06, 0x00]), &[vec![0x1C]]),
            Err(Error::MetadataCorrupt { .. })
        ));
    }
}
