//! Methods as the engine sees them: metadata rows, parsed bodies and rewrite-ready descriptors.
//!
//! - [`MethodDef`] is what a module enumerates: token, declaring type, name, attributes and the
//!   raw signature blob.
//! - [`MethodBody`] is the parsed header and exception handler table of a body.
//! - [`MethodDescriptor`] is the immutable snapshot the rewriter works on, produced by
//!   [`crate::metadata::reader::MetadataReader::read_method`].

mod body;
mod exceptions;
mod types;

pub use body::*;
pub use exceptions::*;
pub use types::*;

use std::fmt;

use crate::metadata::{
    signatures::{SignatureLocalVariables, SignatureMethod},
    token::Token,
};

/// A `MethodDef` row as enumerated from a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDef {
    /// The `MethodDef` token
    pub token: Token,
    /// Full name of the declaring type, nested types joined with `+`
    pub declaring_type: String,
    /// Method name
    pub name: String,
    /// Method attributes
    pub flags: MethodAttributes,
    /// Raw `MethodImplAttributes`
    pub impl_flags: u32,
    /// Declaring type is a value type
    pub declaring_type_is_value: bool,
    /// Raw method signature blob
    pub signature: Vec<u8>,
}

impl MethodDef {
    /// Returns `true` if the row describes a CIL body the engine could read
    #[must_use]
    pub fn has_il_body(&self) -> bool {
        !self.flags.contains(MethodAttributes::ABSTRACT)
            && !self.flags.contains(MethodAttributes::PINVOKE_IMPL)
            && MethodImplCodeType::from_impl_flags(self.impl_flags) == MethodImplCodeType::IL
    }

    /// Returns `true` for instance and static constructors
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.flags.contains(MethodAttributes::RTSPECIAL_NAME)
            && (self.name == ".ctor" || self.name == ".cctor")
    }
}

/// Identity of a method: declaring type, name and parsed signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodIdentity {
    /// Full name of the declaring type
    pub declaring_type: String,
    /// Method name
    pub name: String,
    /// Parsed signature
    pub signature: SignatureMethod,
}

impl fmt::Display for MethodIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.declaring_type, self.name)
    }
}

/// The local variable signature of a method, as read from its `StandAloneSig` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariables {
    /// The `StandAloneSig` token
    pub token: Token,
    /// Raw `LOCAL_SIG` blob
    pub blob: Vec<u8>,
    /// Parsed locals
    pub signature: SignatureLocalVariables,
}

/// Immutable snapshot of one method, captured for a single rewrite decision.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    /// The `MethodDef` token
    pub token: Token,
    /// Declaring type, name and signature
    pub identity: MethodIdentity,
    /// Method attributes
    pub flags: MethodAttributes,
    /// Declaring type is a value type
    pub declaring_type_is_value: bool,
    /// Raw signature blob, the byte spans in `identity.signature` point into it
    pub signature_blob: Vec<u8>,
    /// Complete original body bytes (header, code and sections)
    pub raw_body: Vec<u8>,
    /// Parsed header and exception handler table
    pub body: MethodBody,
    /// Local variables, if the method declares any
    pub locals: Option<LocalVariables>,
}

impl MethodDescriptor {
    /// The original code bytes
    #[must_use]
    pub fn code(&self) -> &[u8] {
        self.body.code(&self.raw_body)
    }

    /// Exception handler clauses of the original body
    #[must_use]
    pub fn exception_handlers(&self) -> &[ExceptionHandler] {
        &self.body.exception_handlers
    }

    /// Number of local slots the original body uses
    #[must_use]
    pub fn local_count(&self) -> usize {
        self.locals
            .as_ref()
            .map_or(0, |locals| locals.signature.locals.len())
    }

    /// Returns `true` for instance constructors, whose `this` is not initialized on entry
    #[must_use]
    pub fn is_instance_constructor(&self) -> bool {
        self.flags.contains(MethodAttributes::RTSPECIAL_NAME) && self.identity.name == ".ctor"
    }

    /// Returns `true` when the method takes a `this` argument
    #[must_use]
    pub fn has_this(&self) -> bool {
        self.identity.signature.has_this && !self.flags.contains(MethodAttributes::STATIC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str, flags: MethodAttributes, impl_flags: u32) -> MethodDef {
        MethodDef {
            token: Token::new(0x0600_0001),
            declaring_type: "Shop.Cart".into(),
            name: name.into(),
            flags,
            impl_flags,
            declaring_type_is_value: false,
            signature: vec![0x20, 0x00, 0x01],
        }
    }

    #[test]
    fn test_has_il_body() {
        assert!(def("Add", MethodAttributes::empty(), 0).has_il_body());
        assert!(!def("Add", MethodAttributes::ABSTRACT, 0).has_il_body());
        assert!(!def("Add", MethodAttributes::PINVOKE_IMPL, 0).has_il_body());
        assert!(!def("Add", MethodAttributes::empty(), 0x0003).has_il_body());
    }

    #[test]
    fn test_constructors() {
        let ctor = def(
            ".ctor",
            MethodAttributes::SPECIAL_NAME | MethodAttributes::RTSPECIAL_NAME,
            0,
        );
        assert!(ctor.is_constructor());
        assert!(!def(".ctor", MethodAttributes::empty(), 0).is_constructor());
    }

    #[test]
    fn test_identity_display() {
        let identity = MethodIdentity {
            declaring_type: "Shop.Cart+Line".into(),
            name: "Total".into(),
            signature: SignatureMethod::default(),
        };
        assert_eq!(identity.to_string(), "Shop.Cart+Line::Total");
    }
}
