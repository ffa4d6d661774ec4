//! The instruction sequences a rewrite inserts around the original code.
//!
//! Sequences are emitted twice: once while planning, with placeholder tokens, to learn their
//! sizes, and once with the allocated tokens. Token operands are always four bytes, so both
//! passes produce sequences of the same length.

use crate::{
    assembly::{opcodes, InstructionEncoder},
    metadata::{signatures::ELEMENT_TYPE, token::Token},
    rewriter::probes::{ProbeSet, ENTER_ARG_COUNT, EXIT_ARG_COUNT},
    tokens::TokenRequest,
    Result,
};

/// Resolves the token of a request
pub(crate) type Resolve<'a> = dyn Fn(&TokenRequest) -> Result<Token> + 'a;

/// The `object` type specification used for the args array and the catch-all clause
pub(crate) fn object_type_spec() -> TokenRequest {
    TokenRequest::TypeSpec(vec![ELEMENT_TYPE::OBJECT])
}

/// Invocation target handed to the entry probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Target {
    This,
    Null,
}

/// How one argument reaches the captured `object[]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ArgLoad {
    /// `ldarg`
    Direct,
    /// `ldarg; ldobj spec`
    Dereference(Vec<u8>),
    /// `ldarg; ldind.ref`
    DereferenceRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ArgCapture {
    pub(crate) element: i32,
    pub(crate) argument: u16,
    pub(crate) load: ArgLoad,
    pub(crate) boxed: Option<Vec<u8>>,
}

/// How the return value reaches the exit probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReturnValue {
    Boxed(Vec<u8>),
    Reference,
    Null,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResultLocal {
    pub(crate) slot: u16,
    pub(crate) value: ReturnValue,
}

/// What the inserted sequences of one method need to know about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProbeFrame {
    pub(crate) type_name: String,
    pub(crate) method_name: String,
    pub(crate) method_token: Token,
    pub(crate) target: Target,
    /// `None` passes `null` instead of an args array
    pub(crate) arguments: Option<Vec<ArgCapture>>,
    pub(crate) parameter_count: i32,
    pub(crate) tracer_slot: u16,
    pub(crate) result: Option<ResultLocal>,
    pub(crate) locals_blob: Vec<u8>,
}

impl ProbeFrame {
    /// Every request the sequences of this frame use, entry probe first
    pub(crate) fn requests(&self, probes: &ProbeSet, probe_id: &str, returns: bool) -> Vec<TokenRequest> {
        let mut requests = vec![
            probes.enter(),
            probes.exit_with_exception(),
        ];
        if returns {
            requests.push(probes.exit());
        }

        requests.push(TokenRequest::UserString(probe_id.to_string()));
        requests.push(TokenRequest::UserString(self.type_name.clone()));
        requests.push(TokenRequest::UserString(self.method_name.clone()));
        requests.push(object_type_spec());

        for capture in self.arguments.iter().flatten() {
            if let ArgLoad::Dereference(spec) = &capture.load {
                requests.push(TokenRequest::TypeSpec(spec.clone()));
            }
            if let Some(spec) = &capture.boxed {
                requests.push(TokenRequest::TypeSpec(spec.clone()));
            }
        }
        if let Some(ResultLocal {
            value: ReturnValue::Boxed(spec),
            ..
        }) = &self.result
        {
            requests.push(TokenRequest::TypeSpec(spec.clone()));
        }

        requests.push(TokenRequest::StandAloneSig(self.locals_blob.clone()));

        let mut unique = Vec::with_capacity(requests.len());
        for request in requests {
            if !unique.contains(&request) {
                unique.push(request);
            }
        }
        unique
    }
}

/// A placeholder resolver for sizing
pub(crate) fn placeholder(_: &TokenRequest) -> Result<Token> {
    Ok(Token::new(0))
}

/// `ldstr probeId; ldstr type; ldstr method; target; args; ldc.i4 token; call Enter; stloc tracer`
pub(crate) fn prologue(
    frame: &ProbeFrame,
    probes: &ProbeSet,
    probe_id: &str,
    resolve: &Resolve<'_>,
) -> Result<(Vec<u8>, u16)> {
    let mut asm = InstructionEncoder::new();

    asm.emit_token(
        "ldstr",
        resolve(&TokenRequest::UserString(probe_id.to_string()))?,
    )?;
    asm.emit_token(
        "ldstr",
        resolve(&TokenRequest::UserString(frame.type_name.clone()))?,
    )?;
    asm.emit_token(
        "ldstr",
        resolve(&TokenRequest::UserString(frame.method_name.clone()))?,
    )?;

    match frame.target {
        Target::This => asm.emit_ldarg(0)?,
        Target::Null => asm.emit_instruction("ldnull", None)?,
    }

    match &frame.arguments {
        None => asm.emit_instruction("ldnull", None)?,
        Some(captures) => {
            asm.emit_ldc_i4(frame.parameter_count)?;
            asm.emit_token("newarr", resolve(&object_type_spec())?)?;
            for capture in captures {
                asm.emit_instruction("dup", None)?;
                asm.emit_ldc_i4(capture.element)?;
                asm.emit_ldarg(capture.argument)?;
                match &capture.load {
                    ArgLoad::Direct => {}
                    ArgLoad::Dereference(spec) => {
                        asm.emit_token("ldobj", resolve(&TokenRequest::TypeSpec(spec.clone()))?)?;
                    }
                    ArgLoad::DereferenceRef => asm.emit_instruction("ldind.ref", None)?,
                }
                if let Some(spec) = &capture.boxed {
                    asm.emit_token("box", resolve(&TokenRequest::TypeSpec(spec.clone()))?)?;
                }
                asm.emit_instruction("stelem.ref", None)?;
            }
        }
    }

    #[allow(clippy::cast_possible_wrap)]
    asm.emit_ldc_i4(frame.method_token.value() as i32)?;
    asm.emit_call("call", resolve(&probes.enter())?, ENTER_ARG_COUNT, true)?;
    asm.emit_stloc(frame.tracer_slot)?;

    let (code, max_stack, _) = asm.finalize()?;
    Ok((code, max_stack))
}

/// The store in front of the `leave` of an exit transfer; empty for `void` methods
pub(crate) fn exit_store(frame: &ProbeFrame) -> Result<Vec<u8>> {
    let Some(result) = &frame.result else {
        return Ok(Vec::new());
    };

    let mut asm = InstructionEncoder::new();
    asm.set_stack_depth(1);
    asm.emit_stloc(result.slot)?;
    let (code, _, _) = asm.finalize()?;
    Ok(code)
}

/// Append `leave` with a displacement that makes it land on `target`
pub(crate) fn push_leave(code: &mut Vec<u8>, target: u32) {
    let end = i64::try_from(code.len()).unwrap_or(i64::MAX) + 5;
    #[allow(clippy::cast_possible_truncation)]
    let displacement = (i64::from(target) - end) as i32;
    code.push(opcodes::LEAVE);
    code.extend_from_slice(&displacement.to_le_bytes());
}

/// `ldloc tracer; call ExitWithException; rethrow`, entered with the exception on the stack
pub(crate) fn exception_handler(
    frame: &ProbeFrame,
    probes: &ProbeSet,
    resolve: &Resolve<'_>,
) -> Result<Vec<u8>> {
    let mut asm = InstructionEncoder::new();
    asm.set_stack_depth(1);
    asm.emit_ldloc(frame.tracer_slot)?;
    asm.emit_call(
        "call",
        resolve(&probes.exit_with_exception())?,
        EXIT_ARG_COUNT,
        false,
    )?;
    asm.emit_instruction("rethrow", None)?;

    let (code, _, _) = asm.finalize()?;
    Ok(code)
}

/// `ldloc tracer; <return value>; call Exit; [ldloc result]; ret`
pub(crate) fn epilogue(
    frame: &ProbeFrame,
    probes: &ProbeSet,
    resolve: &Resolve<'_>,
) -> Result<Vec<u8>> {
    let mut asm = InstructionEncoder::new();
    asm.emit_ldloc(frame.tracer_slot)?;

    match &frame.result {
        None => asm.emit_instruction("ldnull", None)?,
        Some(result) => match &result.value {
            ReturnValue::Boxed(spec) => {
                asm.emit_ldloc(result.slot)?;
                asm.emit_token("box", resolve(&TokenRequest::TypeSpec(spec.clone()))?)?;
            }
            ReturnValue::Reference => asm.emit_ldloc(result.slot)?,
            ReturnValue::Null => asm.emit_instruction("ldnull", None)?,
        },
    }

    asm.emit_call("call", resolve(&probes.exit())?, EXIT_ARG_COUNT, false)?;
    if let Some(result) = &frame.result {
        asm.emit_ldloc(result.slot)?;
    }
    asm.emit_instruction("ret", None)?;

    let (code, _, _) = asm.finalize()?;
    Ok(code)
}
