//! The Metadata Reader: resolve a method token into an immutable [`MethodDescriptor`].
//!
//! Reading a method pulls together its `MethodDef` row, the parsed method signature, the body
//! header with the complete exception handler table, and the local variable signature. Any part
//! that cannot be parsed completely fails the read; the reader never hands out a partial handler
//! list.
//!
//! # Examples
//!
//! ```rust
//! use cilweave::metadata::method::{MethodAttributes, MethodDef};
//! use cilweave::metadata::reader::MetadataReader;
//! use cilweave::metadata::token::Token;
//! use cilweave::module::{InMemoryModule, ModuleId};
//!
//! let token = Token::new(0x0600_0001);
//! let module = InMemoryModule::new(ModuleId(1), "Shop").with_method(
//!     MethodDef {
//!         token,
//!         declaring_type: "Shop.Cart".into(),
//!         name: "Count".into(),
//!         flags: MethodAttributes::STATIC,
//!         impl_flags: 0,
//!         declaring_type_is_value: false,
//!         signature: vec![0x00, 0x00, 0x08],
//!     },
//!     vec![(2 << 2) | 0x2, 0x16, 0x2A],
//! );
//!
//! let method = MetadataReader::new().read_method(&module, token)?;
//! assert_eq!(method.identity.to_string(), "Shop.Cart::Count");
//! assert_eq!(method.code(), &[0x16, 0x2A]);
//! # Ok::<(), cilweave::Error>(())
//! ```

use crate::{
    metadata::{
        method::{LocalVariables, MethodBody, MethodDef, MethodDescriptor, MethodIdentity},
        signatures::{parse_local_var_signature, parse_method_signature},
        token::{TableId, Token},
    },
    module::Module,
    Error, Result,
};

/// Default upper bound for the code size of a method the reader accepts
pub const DEFAULT_MAX_CODE_SIZE: usize = 1024 * 1024;

/// Reads rewrite-ready method snapshots from a [`Module`].
#[derive(Debug, Clone, Copy)]
pub struct MetadataReader {
    max_code_size: usize,
}

impl Default for MetadataReader {
    fn default() -> Self {
        MetadataReader {
            max_code_size: DEFAULT_MAX_CODE_SIZE,
        }
    }
}

impl MetadataReader {
    /// Create a reader with the default code size limit
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the largest code size the reader accepts
    #[must_use]
    pub fn with_max_code_size(mut self, max_code_size: usize) -> Self {
        self.max_code_size = max_code_size;
        self
    }

    /// Read the method `token` of `module`.
    ///
    /// # Errors
    ///
    /// - [`Error::TokenNotFound`] if the token is not a known `MethodDef`, or its local signature
    ///   token does not resolve
    /// - [`Error::MetadataCorrupt`] if the signature, body header, exception handler table or
    ///   local signature cannot be parsed completely
    /// - [`Error::UnsupportedConstruct`] for methods without an IL body or with code larger than
    ///   the configured limit
    pub fn read_method(&self, module: &dyn Module, token: Token) -> Result<MethodDescriptor> {
        if !token.is_table(TableId::MethodDef) || token.is_null() {
            return Err(Error::TokenNotFound(token));
        }

        let def = module.method_def(token)?;
        self.read_def(module, &def)
    }

    /// Read a method from a row already enumerated from `module`.
    ///
    /// # Errors
    ///
    /// See [`Self::read_method`].
    pub fn read_def(&self, module: &dyn Module, def: &MethodDef) -> Result<MethodDescriptor> {
        if !def.has_il_body() {
            return Err(unsupported_error!("{} has no IL body", def.token));
        }

        let signature = parse_method_signature(&def.signature)?;

        let mut raw_body = module.method_body(def.token)?;
        let body = MethodBody::from(&raw_body)?;
        if body.size_code > self.max_code_size {
            return Err(unsupported_error!(
                "{} has {} bytes of code, limit is {}",
                def.token,
                body.size_code,
                self.max_code_size
            ));
        }
        raw_body.truncate(body.size() + body.size_sections);

        let locals = match body.local_var_sig() {
            Some(locals_token) => {
                let blob = module.signature_blob(locals_token)?;
                let parsed = parse_local_var_signature(&blob)?;
                Some(LocalVariables {
                    token: locals_token,
                    blob,
                    signature: parsed,
                })
            }
            None => None,
        };

        log::debug!(
            "Read {}::{} ({}): {} bytes of code, {} clauses, {} locals",
            def.declaring_type,
            def.name,
            def.token,
            body.size_code,
            body.exception_handlers.len(),
            locals
                .as_ref()
                .map_or(0, |locals| locals.signature.locals.len())
        );

        Ok(MethodDescriptor {
            token: def.token,
            identity: MethodIdentity {
                declaring_type: def.declaring_type.clone(),
                name: def.name.clone(),
                signature,
            },
            flags: def.flags,
            declaring_type_is_value: def.declaring_type_is_value,
            signature_blob: def.signature.clone(),
            raw_body,
            body,
            locals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::MethodBodyBuilder,
        metadata::method::{HandlerKind, MethodAttributes},
        module::{InMemoryModule, ModuleId},
    };

    const TOKEN: Token = Token(0x0600_0001);
    const LOCALS: Token = Token(0x1100_0001);

    fn def(signature: Vec<u8>) -> MethodDef {
        MethodDef {
            token: TOKEN,
            declaring_type: "Shop.Cart".into(),
            name: "Add".into(),
            flags: MethodAttributes::empty(),
            impl_flags: 0,
            declaring_type_is_value: false,
            signature,
        }
    }

    fn body_with_locals_and_finally() -> Result<Vec<u8>> {
        MethodBodyBuilder::new()
            .local_var_sig(LOCALS)
            .finally_handler("try", "try_end", "finally", "finally_end")
            .implementation(|asm| {
                asm.define_label("try")?;
                asm.emit_ldarg(1)?;
                asm.emit_stloc(0)?;
                asm.emit_branch("leave.s", "done")?;
                asm.define_label("try_end")?;
                asm.define_label("finally")?;
                asm.emit_instruction("endfinally", None)?;
                asm.define_label("finally_end")?;
                asm.define_label("done")?;
                asm.emit_ldloc(0)?;
                asm.emit_instruction("ret", None)
            })
            .build()
    }

    #[test]
    fn test_read_complete_method() -> Result<()> {
        let module = InMemoryModule::new(ModuleId(1), "Shop")
            .with_method(def(vec![0x20, 0x01, 0x08, 0x08]), body_with_locals_and_finally()?)
            .with_signature(LOCALS, vec![0x07, 0x01, 0x08]);

        let method = MetadataReader::new().read_method(&module, TOKEN)?;
        assert!(method.identity.signature.has_this);
        assert_eq!(method.identity.signature.params.len(), 1);
        assert_eq!(method.local_count(), 1);
        assert_eq!(method.exception_handlers().len(), 1);
        assert_eq!(method.exception_handlers()[0].kind(), Some(HandlerKind::Finally));
        assert_eq!(method.code().len(), method.body.size_code);
        Ok(())
    }

    #[test]
    fn test_trailing_bytes_are_dropped() -> Result<()> {
        let mut body = vec![(2 << 2) | 0x2, 0x16, 0x2A];
        body.extend_from_slice(&[0xCC; 8]);
        let module = InMemoryModule::new(ModuleId(1), "Shop").with_method(def(vec![0x00, 0x00, 0x08]), body);

        let method = MetadataReader::new().read_method(&module, TOKEN)?;
        assert_eq!(method.raw_body.len(), 3);
        Ok(())
    }

    #[test]
    fn test_unresolved_locals() -> Result<()> {
        let module = InMemoryModule::new(ModuleId(1), "Shop")
            .with_method(def(vec![0x20, 0x01, 0x08, 0x08]), body_with_locals_and_finally()?);

        assert!(matches!(
            MetadataReader::new().read_method(&module, TOKEN),
            Err(Error::TokenNotFound(token)) if token == LOCALS
        ));
        Ok(())
    }

    #[test]
    fn test_locals_blob_is_not_a_local_signature() -> Result<()> {
        let module = InMemoryModule::new(ModuleId(1), "Shop")
            .with_method(def(vec![0x20, 0x01, 0x08, 0x08]), body_with_locals_and_finally()?)
            .with_signature(LOCALS, vec![0x06, 0x08]);

        assert!(matches!(
            MetadataReader::new().read_method(&module, TOKEN),
            Err(Error::MetadataCorrupt { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_truncated_eh_section() -> Result<()> {
        let mut body = body_with_locals_and_finally()?;
        body.truncate(body.len() - 4);
        let module = InMemoryModule::new(ModuleId(1), "Shop")
            .with_method(def(vec![0x20, 0x01, 0x08, 0x08]), body)
            .with_signature(LOCALS, vec![0x07, 0x01, 0x08]);

        assert!(matches!(
            MetadataReader::new().read_method(&module, TOKEN),
            Err(Error::MetadataCorrupt { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_no_il_body() {
        let mut abstract_def = def(vec![0x20, 0x00, 0x01]);
        abstract_def.flags = MethodAttributes::ABSTRACT | MethodAttributes::VIRTUAL;
        let module = InMemoryModule::new(ModuleId(1), "Shop").with_method(abstract_def, Vec::new());

        assert!(matches!(
            MetadataReader::new().read_method(&module, TOKEN),
            Err(Error::UnsupportedConstruct(_))
        ));
    }

    #[test]
    fn test_unknown_tokens() {
        let module = InMemoryModule::new(ModuleId(1), "Shop");
        let reader = MetadataReader::new();

        assert!(matches!(
            reader.read_method(&module, Token::new(0x0200_0001)),
            Err(Error::TokenNotFound(_))
        ));
        assert!(matches!(
            reader.read_method(&module, TOKEN),
            Err(Error::TokenNotFound(_))
        ));
    }

    #[test]
    fn test_code_size_limit() {
        let module = InMemoryModule::new(ModuleId(1), "Shop")
            .with_method(def(vec![0x00, 0x00, 0x08]), vec![(2 << 2) | 0x2, 0x16, 0x2A]);

        assert!(matches!(
            MetadataReader::new()
                .with_max_code_size(1)
                .read_method(&module, TOKEN),
            Err(Error::UnsupportedConstruct(_))
        ));
    }
}
