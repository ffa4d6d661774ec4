//! Method, local variable and type specification signatures (ECMA-335 II.23.2).
//!
//! The rewriter needs three things from signatures: the shape of a method (instance or static,
//! parameter and return types), the byte ranges of each parameter inside the blob so it can reuse
//! them verbatim, and a way to extend a method's local variable signature without disturbing the
//! existing slots.
//!
//! # Examples
//!
//! ```rust
//! use cilweave::metadata::signatures::{parse_method_signature, TypeSignature};
//!
//! // instance string Method(int32)
//! let signature = parse_method_signature(&[0x20, 0x01, 0x0E, 0x08])?;
//! assert!(signature.has_this);
//! assert_eq!(signature.return_type.base, TypeSignature::String);
//! assert_eq!(signature.params[0].base, TypeSignature::I4);
//! # Ok::<(), cilweave::Error>(())
//! ```

mod encoders;
mod parser;
mod types;

pub use encoders::*;
pub use parser::*;
pub use types::*;

use crate::Result;

/// Parse a method signature blob.
///
/// # Errors
///
/// Returns an error if the blob is truncated or malformed.
pub fn parse_method_signature(data: &[u8]) -> Result<SignatureMethod> {
    let mut parser = SignatureParser::new(data);
    parser.parse_method_signature()
}

/// Parse a local variable signature blob.
///
/// # Errors
///
/// Returns an error if the blob is truncated or malformed.
pub fn parse_local_var_signature(data: &[u8]) -> Result<SignatureLocalVariables> {
    let mut parser = SignatureParser::new(data);
    parser.parse_local_var_signature()
}

/// Parse a type specification blob.
///
/// # Errors
///
/// Returns an error if the blob is truncated or malformed.
pub fn parse_type_spec_signature(data: &[u8]) -> Result<TypeSignature> {
    let mut parser = SignatureParser::new(data);
    parser.parse_type_spec_signature()
}
