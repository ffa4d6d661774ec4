use std::ops::Range;

use crate::metadata::token::Token;

#[allow(non_snake_case, dead_code, missing_docs)]
/// Possible bytes that represent the element types of a signature - ECMA-335 II.23.1.16
pub mod ELEMENT_TYPE {
    pub const END: u8 = 0x00;
    pub const VOID: u8 = 0x01;
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0a;
    pub const U8: u8 = 0x0b;
    pub const R4: u8 = 0x0c;
    pub const R8: u8 = 0x0d;
    pub const STRING: u8 = 0x0e;
    pub const PTR: u8 = 0x0f;
    pub const BYREF: u8 = 0x10;
    pub const VALUETYPE: u8 = 0x11;
    pub const CLASS: u8 = 0x12;
    pub const VAR: u8 = 0x13;
    pub const ARRAY: u8 = 0x14;
    pub const GENERICINST: u8 = 0x15;
    pub const TYPEDBYREF: u8 = 0x16;
    pub const I: u8 = 0x18;
    pub const U: u8 = 0x19;
    pub const FNPTR: u8 = 0x1b;
    pub const OBJECT: u8 = 0x1c;
    pub const SZARRAY: u8 = 0x1d;
    pub const MVAR: u8 = 0x1e;
    pub const CMOD_REQD: u8 = 0x1f;
    pub const CMOD_OPT: u8 = 0x20;
    pub const INTERNAL: u8 = 0x21;
    pub const SENTINEL: u8 = 0x41;
    pub const PINNED: u8 = 0x45;
}

#[allow(non_snake_case, dead_code, missing_docs)]
/// Calling convention bits of a method signature's leading byte - ECMA-335 II.23.2.1
pub mod CALLING_CONVENTION {
    pub const DEFAULT: u8 = 0x00;
    pub const VARARG: u8 = 0x05;
    pub const KIND_MASK: u8 = 0x0F;
    pub const GENERIC: u8 = 0x10;
    pub const HASTHIS: u8 = 0x20;
    pub const EXPLICITTHIS: u8 = 0x40;
}

#[allow(non_snake_case, dead_code, missing_docs)]
/// Leading bytes of non-method signatures
pub mod SIGNATURE_HEADER {
    pub const FIELD: u8 = 0x06;
    pub const LOCAL_SIG: u8 = 0x07;
}

/// A type as it appears inside a signature blob.
///
/// Custom modifiers nested inside a type are consumed by the parser but not kept; the byte spans
/// on [`SignatureParameter`] still cover them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TypeSignature {
    /// Placeholder for an unparsed type
    #[default]
    Unknown,
    /// `void`
    Void,
    /// `bool`
    Boolean,
    /// `char`
    Char,
    /// `sbyte`
    I1,
    /// `byte`
    U1,
    /// `short`
    I2,
    /// `ushort`
    U2,
    /// `int`
    I4,
    /// `uint`
    U4,
    /// `long`
    I8,
    /// `ulong`
    U8,
    /// `float`
    R4,
    /// `double`
    R8,
    /// `string`
    String,
    /// Unmanaged pointer
    Ptr(Box<TypeSignature>),
    /// Managed pointer
    ByRef(Box<TypeSignature>),
    /// Value type, `TypeDefOrRefOrSpec` token
    ValueType(Token),
    /// Reference type, `TypeDefOrRefOrSpec` token
    Class(Token),
    /// Generic parameter of the declaring type (`!n`)
    GenericParamType(u32),
    /// General array with rank
    Array(SignatureArray),
    /// Instantiated generic type
    GenericInst(Box<TypeSignature>, Vec<TypeSignature>),
    /// `TypedReference`
    TypedByRef,
    /// `nint`
    I,
    /// `nuint`
    U,
    /// Function pointer
    FnPtr(Box<SignatureMethod>),
    /// `object`
    Object,
    /// Single-dimensional zero based array
    SzArray(Box<TypeSignature>),
    /// Generic parameter of the method (`!!n`)
    GenericParamMethod(u32),
    /// Pinned local
    Pinned(Box<TypeSignature>),
}

/// How a value of a given type is turned into an `object` for a probe call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boxing {
    /// Already an object reference, pass as-is
    Reference,
    /// Needs a `box` instruction with the type's token
    Value,
    /// Cannot be represented as an object (pointers, typed references, void)
    Unsupported,
}

impl TypeSignature {
    /// Returns `true` for `void`
    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self, TypeSignature::Void)
    }

    /// Decide how a value of this type reaches a probe as `object`.
    ///
    /// Generic parameters are boxed; `box` on a reference-typed instantiation is a no-op.
    #[must_use]
    pub fn boxing(&self) -> Boxing {
        match self {
            TypeSignature::String
            | TypeSignature::Object
            | TypeSignature::Class(_)
            | TypeSignature::SzArray(_)
            | TypeSignature::Array(_) => Boxing::Reference,
            TypeSignature::GenericInst(base, _) => match base.as_ref() {
                TypeSignature::ValueType(_) => Boxing::Value,
                _ => Boxing::Reference,
            },
            TypeSignature::Boolean
            | TypeSignature::Char
            | TypeSignature::I1
            | TypeSignature::U1
            | TypeSignature::I2
            | TypeSignature::U2
            | TypeSignature::I4
            | TypeSignature::U4
            | TypeSignature::I8
            | TypeSignature::U8
            | TypeSignature::R4
            | TypeSignature::R8
            | TypeSignature::I
            | TypeSignature::U
            | TypeSignature::ValueType(_)
            | TypeSignature::GenericParamType(_)
            | TypeSignature::GenericParamMethod(_) => Boxing::Value,
            TypeSignature::Unknown
            | TypeSignature::Void
            | TypeSignature::Ptr(_)
            | TypeSignature::ByRef(_)
            | TypeSignature::TypedByRef
            | TypeSignature::FnPtr(_)
            | TypeSignature::Pinned(_) => Boxing::Unsupported,
        }
    }
}

/// General array type (`ELEMENT_TYPE_ARRAY`); sizes and bounds are skipped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignatureArray {
    /// Element type
    pub base: Box<TypeSignature>,
    /// Number of dimensions
    pub rank: u32,
}

/// A parameter or return type of a method signature.
///
/// `span` covers the whole entry in the blob (modifiers, by-ref marker and type); `type_span`
/// covers only the type after the by-ref marker. The rewriter copies these byte ranges verbatim
/// into local and type specification blobs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignatureParameter {
    /// Leading custom modifiers
    pub modifiers: Vec<Token>,
    /// `true` when the parameter is passed by reference
    pub by_ref: bool,
    /// The parameter type
    pub base: TypeSignature,
    /// Byte range of the whole entry inside the signature blob
    pub span: Range<usize>,
    /// Byte range of `base` inside the signature blob
    pub type_span: Range<usize>,
}

/// A parsed method signature
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignatureMethod {
    /// Instance method, `this` is argument 0
    pub has_this: bool,
    /// `this` is spelled out as the first parameter
    pub explicit_this: bool,
    /// Variable argument calling convention
    pub vararg: bool,
    /// Number of method generic parameters
    pub param_count_generic: u32,
    /// The return type
    pub return_type: SignatureParameter,
    /// The fixed parameters
    pub params: Vec<SignatureParameter>,
    /// Parameters following a sentinel (call-site signatures only)
    pub varargs: Vec<SignatureParameter>,
}

/// One entry of a local variable signature
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignatureLocalVariable {
    /// Custom modifiers
    pub modifiers: Vec<Token>,
    /// Local holds a managed pointer
    pub is_byref: bool,
    /// Local is pinned
    pub is_pinned: bool,
    /// The local's type
    pub base: TypeSignature,
}

/// A parsed `LOCAL_SIG` blob
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignatureLocalVariables {
    /// Locals in slot order
    pub locals: Vec<SignatureLocalVariable>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boxing_classes() {
        assert_eq!(TypeSignature::I4.boxing(), Boxing::Value);
        assert_eq!(TypeSignature::GenericParamMethod(0).boxing(), Boxing::Value);
        assert_eq!(
            TypeSignature::ValueType(Token::new(0x0200_0002)).boxing(),
            Boxing::Value
        );
        assert_eq!(TypeSignature::String.boxing(), Boxing::Reference);
        assert_eq!(
            TypeSignature::SzArray(Box::new(TypeSignature::I4)).boxing(),
            Boxing::Reference
        );
        assert_eq!(
            TypeSignature::Ptr(Box::new(TypeSignature::Void)).boxing(),
            Boxing::Unsupported
        );
        assert_eq!(TypeSignature::TypedByRef.boxing(), Boxing::Unsupported);
    }

    #[test]
    fn test_generic_inst_boxing_follows_base() {
        let list = TypeSignature::GenericInst(
            Box::new(TypeSignature::Class(Token::new(0x0100_0005))),
            vec![TypeSignature::I4],
        );
        assert_eq!(list.boxing(), Boxing::Reference);

        let nullable = TypeSignature::GenericInst(
            Box::new(TypeSignature::ValueType(Token::new(0x0100_0006))),
            vec![TypeSignature::I4],
        );
        assert_eq!(nullable.boxing(), Boxing::Value);
    }
}
