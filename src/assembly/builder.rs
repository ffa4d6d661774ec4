//! Method body assembly from an encoder closure.
//!
//! [`MethodBodyBuilder`] wraps [`InstructionEncoder`] and adds the method body header and the
//! exception handler section. Handler regions are given as label names and resolved after the
//! code is emitted, so bodies can be written without computing offsets by hand.
//!
//! # Examples
//!
//! ```rust
//! use cilweave::assembly::MethodBodyBuilder;
//! use cilweave::metadata::method::MethodBody;
//!
//! let body = MethodBodyBuilder::new()
//!     .finally_handler("try", "try_end", "finally", "finally_end")
//!     .implementation(|asm| {
//!         asm.define_label("try")?;
//!         asm.emit_instruction("nop", None)?;
//!         asm.emit_branch("leave.s", "done")?;
//!         asm.define_label("try_end")?;
//!         asm.define_label("finally")?;
//!         asm.emit_instruction("endfinally", None)?;
//!         asm.define_label("finally_end")?;
//!         asm.define_label("done")?;
//!         asm.emit_instruction("ret", None)
//!     })
//!     .build()?;
//!
//! let parsed = MethodBody::from(&body)?;
//! assert_eq!(parsed.exception_handlers.len(), 1);
//! assert_eq!(parsed.exception_handlers[0].handler_offset, 3);
//! # Ok::<(), cilweave::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    assembly::encoder::InstructionEncoder,
    metadata::{
        method::{encode_method_body, ExceptionHandler, ExceptionHandlerFlags},
        token::Token,
    },
    Error, Result,
};

type ImplementationFn = Box<dyn FnOnce(&mut InstructionEncoder) -> Result<()>>;

#[derive(Debug, Clone)]
struct HandlerLabels {
    flags: ExceptionHandlerFlags,
    try_start: String,
    try_end: String,
    handler_start: String,
    handler_end: String,
    class: Token,
    filter: Option<String>,
}

/// Builds complete method bodies (header, code and EH section).
#[derive(Default)]
pub struct MethodBodyBuilder {
    max_stack: Option<u16>,
    init_locals: bool,
    local_var_sig: Option<Token>,
    handlers: Vec<HandlerLabels>,
    implementation: Option<ImplementationFn>,
}

impl MethodBodyBuilder {
    /// Create a builder with no locals, no handlers and a computed max stack
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the computed max stack
    #[must_use]
    pub fn max_stack(mut self, max_stack: u16) -> Self {
        self.max_stack = Some(max_stack);
        self
    }

    /// Set the `InitLocals` flag
    #[must_use]
    pub fn init_locals(mut self, init: bool) -> Self {
        self.init_locals = init;
        self
    }

    /// Reference a `StandAloneSig` token for the locals
    #[must_use]
    pub fn local_var_sig(mut self, token: Token) -> Self {
        self.local_var_sig = Some(token);
        self
    }

    /// Add a typed catch clause
    #[must_use]
    pub fn catch_handler(
        mut self,
        try_start: &str,
        try_end: &str,
        handler_start: &str,
        handler_end: &str,
        class: Token,
    ) -> Self {
        self.handlers.push(HandlerLabels {
            flags: ExceptionHandlerFlags::EXCEPTION,
            try_start: try_start.to_string(),
            try_end: try_end.to_string(),
            handler_start: handler_start.to_string(),
            handler_end: handler_end.to_string(),
            class,
            filter: None,
        });
        self
    }

    /// Add a finally clause
    #[must_use]
    pub fn finally_handler(
        self,
        try_start: &str,
        try_end: &str,
        handler_start: &str,
        handler_end: &str,
    ) -> Self {
        self.untyped_handler(
            ExceptionHandlerFlags::FINALLY,
            [try_start, try_end, handler_start, handler_end],
        )
    }

    /// Add a fault clause
    #[must_use]
    pub fn fault_handler(
        self,
        try_start: &str,
        try_end: &str,
        handler_start: &str,
        handler_end: &str,
    ) -> Self {
        self.untyped_handler(
            ExceptionHandlerFlags::FAULT,
            [try_start, try_end, handler_start, handler_end],
        )
    }

    /// Add a filter clause whose filter block starts at `filter_start`
    #[must_use]
    pub fn filter_handler(
        mut self,
        try_start: &str,
        try_end: &str,
        filter_start: &str,
        handler_start: &str,
        handler_end: &str,
    ) -> Self {
        self.handlers.push(HandlerLabels {
            flags: ExceptionHandlerFlags::FILTER,
            try_start: try_start.to_string(),
            try_end: try_end.to_string(),
            handler_start: handler_start.to_string(),
            handler_end: handler_end.to_string(),
            class: Token::new(0),
            filter: Some(filter_start.to_string()),
        });
        self
    }

    /// Set the code generator
    #[must_use]
    pub fn implementation<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut InstructionEncoder) -> Result<()> + 'static,
    {
        self.implementation = Some(Box::new(f));
        self
    }

    /// Emit the code and encode the complete body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBranch`] if no implementation was set or a handler label is not
    /// defined, and propagates encoder and body encoding errors.
    pub fn build(self) -> Result<Vec<u8>> {
        let implementation = self
            .implementation
            .ok_or_else(|| Error::InvalidBranch("method body has no implementation".into()))?;

        let mut encoder = InstructionEncoder::new();
        implementation(&mut encoder)?;
        let (code, computed_max_stack, labels) = encoder.finalize()?;

        let handlers = self
            .handlers
            .iter()
            .map(|handler| resolve_handler(handler, &labels))
            .collect::<Result<Vec<ExceptionHandler>>>()?;

        encode_method_body(
            &code,
            usize::from(self.max_stack.unwrap_or(computed_max_stack)),
            self.local_var_sig.map_or(0, |token| token.value()),
            self.init_locals,
            &handlers,
        )
    }

    fn untyped_handler(mut self, flags: ExceptionHandlerFlags, labels: [&str; 4]) -> Self {
        let [try_start, try_end, handler_start, handler_end] = labels;
        self.handlers.push(HandlerLabels {
            flags,
            try_start: try_start.to_string(),
            try_end: try_end.to_string(),
            handler_start: handler_start.to_string(),
            handler_end: handler_end.to_string(),
            class: Token::new(0),
            filter: None,
        });
        self
    }
}

fn resolve_handler(
    handler: &HandlerLabels,
    labels: &HashMap<String, u32>,
) -> Result<ExceptionHandler> {
    let position = |name: &str| {
        labels
            .get(name)
            .copied()
            .ok_or_else(|| Error::InvalidBranch(format!("undefined handler label '{name}'")))
    };

    let try_offset = position(&handler.try_start)?;
    let handler_offset = position(&handler.handler_start)?;
    let try_end = position(&handler.try_end)?;
    let handler_end = position(&handler.handler_end)?;

    let filter_offset = match &handler.filter {
        Some(filter) => position(filter)?,
        None => handler.class.value(),
    };

    Ok(ExceptionHandler {
        flags: handler.flags,
        try_offset,
        try_length: try_end.saturating_sub(try_offset),
        handler_offset,
        handler_length: handler_end.saturating_sub(handler_offset),
        filter_offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::method::{HandlerKind, MethodBody};

    #[test]
    fn test_tiny_body() -> Result<()> {
        let body = MethodBodyBuilder::new()
            .implementation(|asm| {
                asm.emit_ldc_i4(1)?;
                asm.emit_instruction("ret", None)
            })
            .build()?;

        assert_eq!(body, vec![(2 << 2) | 0x2, 0x17, 0x2A]);
        Ok(())
    }

    #[test]
    fn test_fat_body_with_catch() -> Result<()> {
        let class = Token::new(0x0100_0005);
        let body = MethodBodyBuilder::new()
            .local_var_sig(Token::new(0x1100_0001))
            .init_locals(true)
            .catch_handler("try", "try_end", "catch", "catch_end", class)
            .implementation(|asm| {
                asm.define_label("try")?;
                asm.emit_ldarg(0)?;
                asm.emit_stloc(0)?;
                asm.emit_branch("leave.s", "done")?;
                asm.define_label("try_end")?;
                asm.define_label("catch")?;
                asm.set_stack_depth(1);
                asm.emit_instruction("pop", None)?;
                asm.emit_branch("leave.s", "done")?;
                asm.define_label("catch_end")?;
                asm.define_label("done")?;
                asm.emit_ldloc(0)?;
                asm.emit_instruction("ret", None)
            })
            .build()?;

        let parsed = MethodBody::from(&body)?;
        assert!(parsed.is_fat);
        assert!(parsed.is_init_local);
        assert_eq!(parsed.local_var_sig_token, 0x1100_0001);
        assert_eq!(parsed.exception_handlers.len(), 1);

        let clause = &parsed.exception_handlers[0];
        assert_eq!(clause.kind(), Some(HandlerKind::Catch(class)));
        assert_eq!((clause.try_offset, clause.try_length), (0, 4));
        assert_eq!((clause.handler_offset, clause.handler_length), (4, 3));
        Ok(())
    }

    #[test]
    fn test_missing_label() {
        let result = MethodBodyBuilder::new()
            .finally_handler("a", "b", "c", "d")
            .implementation(|asm| asm.emit_instruction("ret", None))
            .build();
        assert!(matches!(result, Err(Error::InvalidBranch(_))));
    }

    #[test]
    fn test_missing_implementation() {
        assert!(MethodBodyBuilder::new().build().is_err());
    }
}
