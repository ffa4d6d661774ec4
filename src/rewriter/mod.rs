//! The Bytecode Rewriter: wraps a method body with probe calls.
//!
//! A rewritten body has this shape:
//!
//! ```text
//!           prologue        ldstr probeId; ldstr type; ldstr method; target; args;
//!                           ldc.i4 token; call Enter; stloc tracer
//! .try {    original code   every ret becomes [stloc result] leave EPILOGUE
//! }
//! catch object {            ldloc tracer; call ExitWithException; rethrow
//! }
//! EPILOGUE:                 ldloc tracer; [ldloc result; box]|ldnull; call Exit;
//!                           [ldloc result]; ret
//! ```
//!
//! The exit probe therefore runs exactly once per normal return, the exception probe exactly once
//! per exception leaving the method, and the original exception handlers keep their nesting
//! inside the appended clause. Rewriting is split in two steps so that token allocation can
//! happen in between:
//!
//! 1. [`Rewriter::plan`] validates the body, computes the edits and the offset map, and lists
//!    the metadata the new body needs. Planning only reads the method and can run in parallel.
//! 2. [`Rewriter::emit`] produces the new body bytes from a plan and the allocated tokens.
//!
//! # Examples
//!
//! ```rust
//! use cilweave::metadata::method::{MethodAttributes, MethodDef};
//! use cilweave::metadata::reader::MetadataReader;
//! use cilweave::metadata::token::Token;
//! use cilweave::module::{InMemoryModule, ModuleId};
//! use cilweave::rewriter::{verify_rewrite, Rewriter};
//! use cilweave::tokens::TokenAllocator;
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
//! let rewriter = Rewriter::default();
//! let plan = rewriter.plan(&method, "CountTracer", false)?;
//! assert_eq!(plan.exit_count(), 1);
//!
//! let mut allocator = TokenAllocator::scan(&module)?;
//! let allocation = allocator.allocate_all(&module, &plan.requests)?;
//! let rewritten = rewriter.emit(&plan, &allocation)?;
//! verify_rewrite(&plan, &rewritten)?;
//! assert_eq!(rewritten.handlers.len(), 1);
//! # Ok::<(), cilweave::Error>(())
//! ```

mod plan;
mod probes;
mod sequences;
mod verify;

pub use plan::{Edit, EditKind, OffsetMap, Placement, RewritePlan};
pub use probes::{ProbeSet, ENTER_SIGNATURE, EXIT_SIGNATURE};
pub use verify::verify_rewrite;

use crate::{
    assembly::{decode_stream, opcodes, FlowType, Instruction, Operand},
    metadata::{
        method::{encode_method_body, ExceptionHandler, HandlerKind, MethodDescriptor},
        signatures::{
            encode_local_var_signature_appended, Boxing, SignatureParameter, ELEMENT_TYPE,
            MAX_LOCALS,
        },
        token::Token,
    },
    policy::InstrumentationDecision,
    tokens::{TokenAllocation, TokenRequest},
    Result,
};

use sequences::{ArgCapture, ArgLoad, ProbeFrame, ResultLocal, ReturnValue, Target};

/// Evaluation stack the inserted sequences need when arguments are captured
pub const PROBE_STACK_WITH_ARGS: u16 = 8;

/// Evaluation stack the inserted sequences need without argument capture
pub const PROBE_STACK: u16 = 6;

/// The new body of one method, ready to commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenBody {
    /// The rewritten method
    pub method: Token,
    /// Complete body: fat header, code and a fat exception handler section
    pub body: Vec<u8>,
    /// `StandAloneSig` token of the extended local signature
    pub locals: Token,
    /// Size of the code
    pub code_size: u32,
    /// Max stack written to the header
    pub max_stack: u16,
    /// Exception clauses: the remapped originals, then the appended catch-all
    pub handlers: Vec<ExceptionHandler>,
}

/// Plans and emits probe-wrapped method bodies.
#[derive(Debug, Clone, Default)]
pub struct Rewriter {
    probes: ProbeSet,
}

impl Rewriter {
    /// Create a rewriter calling the given probes
    #[must_use]
    pub fn new(probes: ProbeSet) -> Self {
        Rewriter { probes }
    }

    /// The probes this rewriter targets
    #[must_use]
    pub fn probes(&self) -> &ProbeSet {
        &self.probes
    }

    /// Plan according to a policy decision; `Ok(None)` for [`InstrumentationDecision::Skip`].
    ///
    /// # Errors
    ///
    /// See [`Self::plan`].
    pub fn plan_decision(
        &self,
        method: &MethodDescriptor,
        decision: &InstrumentationDecision,
    ) -> Result<Option<RewritePlan>> {
        match decision {
            InstrumentationDecision::Skip => Ok(None),
            InstrumentationDecision::WrapWithProbe {
                probe_id,
                capture_args,
            } => self.plan(method, probe_id, *capture_args).map(Some),
        }
    }

    /// Compute the rewrite of `method`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnsupportedConstruct`] for bodies the rewriter cannot re-target safely:
    /// `jmp`, a `ret` inside a finally, fault or filter block, an undecodable instruction, a
    /// branch or region boundary that is not an instruction boundary, an unknown clause kind, a
    /// body whose last instruction falls through, and methods that already use all local slots.
    pub fn plan(
        &self,
        method: &MethodDescriptor,
        probe_id: &str,
        capture_args: bool,
    ) -> Result<RewritePlan> {
        let signature = &method.identity.signature;
        if signature.explicit_this {
            return Err(unsupported_error!(
                "{} uses an explicit this parameter",
                method.token
            ));
        }

        let code = method.code();
        let code_len = u32::try_from(code.len())
            .map_err(|_| unsupported_error!("{} code too large", method.token))?;
        let instructions = decode_stream(code)
            .map_err(|error| unsupported_error!("{} does not decode: {}", method.token, error))?;

        let Some(last) = instructions.last() else {
            return Err(unsupported_error!("{} has no code", method.token));
        };
        if !last.is_terminal() {
            return Err(unsupported_error!(
                "{} falls through its last instruction {}",
                method.token,
                last
            ));
        }

        check_regions(method, &instructions, code_len)?;

        let returns = instructions
            .iter()
            .any(|instruction| instruction.flow_type == FlowType::Return);
        let frame = build_frame(method, capture_args, returns)?;

        let (prologue, prologue_stack) =
            sequences::prologue(&frame, &self.probes, probe_id, &sequences::placeholder)?;
        let exit_store = sequences::exit_store(&frame)?;
        let handler = sequences::exception_handler(&frame, &self.probes, &sequences::placeholder)?;
        let epilogue = if returns {
            Some(sequences::epilogue(
                &frame,
                &self.probes,
                &sequences::placeholder,
            )?)
        } else {
            None
        };

        let exit_store_size = len_u32(&exit_store);
        let mut edits = vec![Edit {
            offset: 0,
            placement: Placement::Before,
            kind: EditKind::Prologue,
            original_size: 0,
            new_size: len_u32(&prologue),
        }];

        for instruction in &instructions {
            if instruction.is(0, opcodes::JMP) {
                return Err(unsupported_error!(
                    "{} uses jmp at IL_{:04x}",
                    method.token,
                    instruction.offset
                ));
            }

            let kind = if instruction.flow_type == FlowType::Return {
                check_return(method, instruction)?;
                Some((EditKind::ExitTransfer, exit_store_size + 5))
            } else if instruction.is_short_branch() {
                Some((EditKind::WidenBranch, 5))
            } else if instruction.is(opcodes::FE_PREFIX, opcodes::FE_TAIL) {
                Some((EditKind::DropTailPrefix, 0))
            } else {
                None
            };

            if let Some((kind, new_size)) = kind {
                edits.push(Edit {
                    offset: instruction.offset,
                    placement: Placement::Replace,
                    kind,
                    original_size: instruction.size,
                    new_size,
                });
            }
        }

        let offsets = OffsetMap::new(&edits, code_len);
        let original_stack = u16::try_from(method.body.max_stack).unwrap_or(u16::MAX);
        let probe_stack = if capture_args {
            PROBE_STACK_WITH_ARGS
        } else {
            PROBE_STACK
        };
        let requests = frame.requests(&self.probes, probe_id, returns);

        log::debug!(
            "Planned {} ({}): {} edits, {} exits, {} bytes of code grow to {}",
            method.identity,
            method.token,
            edits.len(),
            edits
                .iter()
                .filter(|edit| edit.kind == EditKind::ExitTransfer)
                .count(),
            code_len,
            offsets.mapped_len()
        );

        Ok(RewritePlan {
            method: method.token,
            probe_id: probe_id.to_string(),
            capture_args,
            edits,
            offsets,
            requests,
            max_stack: original_stack.max(probe_stack).max(prologue_stack),
            instructions,
            code: code.to_vec(),
            handlers: method.exception_handlers().to_vec(),
            init_locals: method.body.is_init_local || method.locals.is_none(),
            frame,
            prologue_size: len_u32(&prologue),
            exit_store_size,
            handler_size: len_u32(&handler),
            epilogue_size: epilogue.as_deref().map(len_u32),
        })
    }

    /// Produce the rewritten body of a plan.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnsupportedConstruct`] if a request of the plan has no token in
    /// `allocation`, and [`crate::Error::MetadataCorrupt`] if the emitted layout does not match the plan.
    pub fn emit(&self, plan: &RewritePlan, allocation: &TokenAllocation) -> Result<RewrittenBody> {
        let resolve = |request: &TokenRequest| allocation.require(request);

        let (prologue, _) = sequences::prologue(&plan.frame, &self.probes, &plan.probe_id, &resolve)?;
        let exit_store = sequences::exit_store(&plan.frame)?;
        let handler = sequences::exception_handler(&plan.frame, &self.probes, &resolve)?;
        let epilogue = match plan.epilogue_size {
            Some(_) => Some(sequences::epilogue(&plan.frame, &self.probes, &resolve)?),
            None => None,
        };
        if len_u32(&prologue) != plan.prologue_size || len_u32(&handler) != plan.handler_size {
            return Err(malformed_error!(
                "Probe sequences of {} changed size after allocation",
                plan.method
            ));
        }

        let epilogue_offset = plan.epilogue_offset().unwrap_or(0);
        let mut code = Vec::with_capacity(plan.code_size() as usize);
        code.extend_from_slice(&prologue);

        for instruction in &plan.instructions {
            if len_u32(&code) != plan.offsets.map(instruction.offset) {
                return Err(malformed_error!(
                    "{}: IL_{:04x} emitted at {}, planned at {}",
                    plan.method,
                    instruction.offset,
                    code.len(),
                    plan.offsets.map(instruction.offset)
                ));
            }

            match plan.edit_at(instruction.offset).map(|edit| edit.kind) {
                Some(EditKind::ExitTransfer) => {
                    code.extend_from_slice(&exit_store);
                    sequences::push_leave(&mut code, epilogue_offset);
                }
                Some(EditKind::DropTailPrefix) => {}
                Some(EditKind::WidenBranch) => {
                    let long = opcodes::long_branch_form(instruction.opcode).ok_or_else(|| {
                        malformed_error!("{} has no long form", instruction.mnemonic)
                    })?;
                    code.push(long);
                    let target = first_target(instruction)?;
                    let displacement = relative(plan, target, instruction.offset, 5);
                    code.extend_from_slice(&displacement.to_le_bytes());
                }
                Some(EditKind::Prologue) | None => {
                    reencode(plan, instruction, &mut code)?;
                }
            }
        }

        if len_u32(&code) != plan.handler_offset() {
            return Err(malformed_error!(
                "{}: protected code ends at {}, planned at {}",
                plan.method,
                code.len(),
                plan.handler_offset()
            ));
        }
        code.extend_from_slice(&handler);
        if let Some(epilogue) = &epilogue {
            code.extend_from_slice(epilogue);
        }

        let object = allocation.require(&sequences::object_type_spec())?;
        let handlers = remap_handlers(plan, object);
        let locals = allocation.require(&TokenRequest::StandAloneSig(
            plan.frame.locals_blob.clone(),
        ))?;

        let body = encode_method_body(
            &code,
            usize::from(plan.max_stack),
            locals.value(),
            plan.init_locals,
            &handlers,
        )?;

        Ok(RewrittenBody {
            method: plan.method,
            body,
            locals,
            code_size: len_u32(&code),
            max_stack: plan.max_stack,
            handlers,
        })
    }

    /// Plan and emit in one step, allocating through `allocate`.
    ///
    /// # Errors
    ///
    /// Propagates planning, allocation and emission errors.
    pub fn rewrite<F>(
        &self,
        method: &MethodDescriptor,
        probe_id: &str,
        capture_args: bool,
        allocate: F,
    ) -> Result<RewrittenBody>
    where
        F: FnOnce(&[TokenRequest]) -> Result<TokenAllocation>,
    {
        let plan = self.plan(method, probe_id, capture_args)?;
        let allocation = allocate(&plan.requests)?;
        self.emit(&plan, &allocation)
    }
}

fn len_u32(bytes: &[u8]) -> u32 {
    u32::try_from(bytes.len()).unwrap_or(u32::MAX)
}

fn first_target(instruction: &Instruction) -> Result<u32> {
    instruction.branch_targets.first().copied().ok_or_else(|| {
        malformed_error!(
            "{} at IL_{:04x} has no target",
            instruction.mnemonic,
            instruction.offset
        )
    })
}

/// Displacement of a transfer at original `offset`, `new_size` bytes long, to original `target`
fn relative(plan: &RewritePlan, target: u32, offset: u32, new_size: u32) -> i32 {
    let end = i64::from(plan.offsets.map(offset)) + i64::from(new_size);
    #[allow(clippy::cast_possible_truncation)]
    let displacement = (i64::from(plan.offsets.map(target)) - end) as i32;
    displacement
}

/// Copy an unedited instruction, recomputing branch and switch displacements
fn reencode(plan: &RewritePlan, instruction: &Instruction, code: &mut Vec<u8>) -> Result<()> {
    let start = instruction.offset as usize;
    let original = &plan.code[start..start + instruction.size as usize];

    match &instruction.operand {
        Operand::Branch(_) => {
            let operand_at = original.len() - 4;
            code.extend_from_slice(&original[..operand_at]);
            let displacement = relative(
                plan,
                first_target(instruction)?,
                instruction.offset,
                instruction.size,
            );
            code.extend_from_slice(&displacement.to_le_bytes());
        }
        Operand::Switch(_) => {
            let header = 1 + 4;
            code.extend_from_slice(&original[..header]);
            for &target in &instruction.branch_targets {
                let displacement = relative(plan, target, instruction.offset, instruction.size);
                code.extend_from_slice(&displacement.to_le_bytes());
            }
        }
        _ => code.extend_from_slice(original),
    }

    Ok(())
}

fn remap_handlers(plan: &RewritePlan, object: Token) -> Vec<ExceptionHandler> {
    let map = |offset: u64| plan.offsets.map(u32::try_from(offset).unwrap_or(u32::MAX));

    let mut handlers: Vec<ExceptionHandler> = plan
        .handlers
        .iter()
        .map(|handler| {
            let try_offset = map(u64::from(handler.try_offset));
            let handler_offset = map(u64::from(handler.handler_offset));
            let filter_offset = match handler.kind() {
                Some(HandlerKind::Filter(filter)) => map(u64::from(filter)),
                _ => handler.filter_offset,
            };

            ExceptionHandler {
                flags: handler.flags,
                try_offset,
                try_length: map(handler.try_end()) - try_offset,
                handler_offset,
                handler_length: map(handler.handler_end()) - handler_offset,
                filter_offset,
            }
        })
        .collect();

    let (try_start, try_end) = plan.try_range();
    handlers.push(ExceptionHandler::catch(
        try_start,
        try_end - try_start,
        plan.handler_offset(),
        plan.handler_size,
        object,
    ));
    handlers
}

/// Every clause must have a known kind and start and end on instruction boundaries
fn check_regions(
    method: &MethodDescriptor,
    instructions: &[Instruction],
    code_len: u32,
) -> Result<()> {
    let mut boundaries = vec![false; code_len as usize + 1];
    for instruction in instructions {
        boundaries[instruction.offset as usize] = true;
    }
    boundaries[code_len as usize] = true;
    let is_boundary =
        |offset: u64| usize::try_from(offset).is_ok_and(|at| boundaries.get(at) == Some(&true));

    for (index, handler) in method.exception_handlers().iter().enumerate() {
        let Some(kind) = handler.kind() else {
            return Err(unsupported_error!(
                "{} clause {} has unknown kind 0x{:04x}",
                method.token,
                index,
                handler.flags.bits()
            ));
        };

        let mut edges = vec![
            u64::from(handler.try_offset),
            handler.try_end(),
            u64::from(handler.handler_offset),
            handler.handler_end(),
        ];
        if let HandlerKind::Filter(filter) = kind {
            edges.push(u64::from(filter));
        }

        if let Some(edge) = edges.into_iter().find(|edge| !is_boundary(*edge)) {
            return Err(unsupported_error!(
                "{} clause {} has a boundary at {} inside an instruction",
                method.token,
                index,
                edge
            ));
        }
    }

    Ok(())
}

/// A `ret` may leave a try or catch body but not a finally, fault or filter block
fn check_return(method: &MethodDescriptor, instruction: &Instruction) -> Result<()> {
    let offset = u64::from(instruction.offset);
    for handler in method.exception_handlers() {
        let in_handler =
            offset >= u64::from(handler.handler_offset) && offset < handler.handler_end();
        let forbidden = match handler.kind() {
            Some(HandlerKind::Finally | HandlerKind::Fault) => in_handler,
            Some(HandlerKind::Filter(filter)) => {
                offset >= u64::from(filter) && offset < u64::from(handler.handler_offset)
            }
            Some(HandlerKind::Catch(_)) | None => false,
        };

        if forbidden {
            return Err(unsupported_error!(
                "{} returns from inside a handler block at IL_{:04x}",
                method.token,
                instruction.offset
            ));
        }
    }

    Ok(())
}

/// Decide target, captures and the appended locals of `method`
fn build_frame(method: &MethodDescriptor, capture_args: bool, returns: bool) -> Result<ProbeFrame> {
    let signature = &method.identity.signature;
    if method.local_count() >= MAX_LOCALS as usize {
        return Err(unsupported_error!(
            "{} already uses {} locals",
            method.token,
            method.local_count()
        ));
    }

    let has_this = method.has_this();
    let target = if has_this && !method.is_instance_constructor() && !method.declaring_type_is_value
    {
        Target::This
    } else {
        Target::Null
    };

    let arguments = if capture_args {
        let mut captures = Vec::with_capacity(signature.params.len());
        for (index, param) in signature.params.iter().enumerate() {
            let argument = u16::try_from(index + usize::from(has_this))
                .map_err(|_| unsupported_error!("{} has too many parameters", method.token))?;
            if let Some(capture) = capture_for(method, param, index, argument)? {
                captures.push(capture);
            }
        }
        Some(captures)
    } else {
        None
    };

    let return_type = &signature.return_type;
    let returns_value = returns && !(return_type.base.is_void() && !return_type.by_ref);

    let mut appended = vec![vec![ELEMENT_TYPE::OBJECT]];
    let result_value = if returns_value {
        appended.push(blob_slice(method, &return_type.span)?.to_vec());
        Some(if return_type.by_ref {
            ReturnValue::Null
        } else {
            match return_type.base.boxing() {
                Boxing::Value => ReturnValue::Boxed(blob_slice(method, &return_type.type_span)?.to_vec()),
                Boxing::Reference => ReturnValue::Reference,
                Boxing::Unsupported => ReturnValue::Null,
            }
        })
    } else {
        None
    };

    let (locals_blob, first_slot) = encode_local_var_signature_appended(
        method.locals.as_ref().map(|locals| locals.blob.as_slice()),
        &appended,
    )?;

    Ok(ProbeFrame {
        type_name: method.identity.declaring_type.clone(),
        method_name: method.identity.name.clone(),
        method_token: method.token,
        target,
        arguments,
        parameter_count: i32::try_from(signature.params.len()).unwrap_or(i32::MAX),
        tracer_slot: first_slot,
        result: result_value.map(|value| ResultLocal {
            slot: first_slot + 1,
            value,
        }),
        locals_blob,
    })
}

fn capture_for(
    method: &MethodDescriptor,
    param: &SignatureParameter,
    index: usize,
    argument: u16,
) -> Result<Option<ArgCapture>> {
    let element = i32::try_from(index).unwrap_or(i32::MAX);
    let spec = || blob_slice(method, &param.type_span).map(<[u8]>::to_vec);

    let (load, boxed) = match (param.by_ref, param.base.boxing()) {
        (_, Boxing::Unsupported) => return Ok(None),
        (false, Boxing::Reference) => (ArgLoad::Direct, None),
        (false, Boxing::Value) => (ArgLoad::Direct, Some(spec()?)),
        (true, Boxing::Reference) => (ArgLoad::DereferenceRef, None),
        (true, Boxing::Value) => (ArgLoad::Dereference(spec()?), Some(spec()?)),
    };

    Ok(Some(ArgCapture {
        element,
        argument,
        load,
        boxed,
    }))
}

fn blob_slice<'a>(method: &'a MethodDescriptor, span: &std::ops::Range<usize>) -> Result<&'a [u8]> {
    method.signature_blob.get(span.clone()).ok_or_else(|| {
        malformed_error!(
            "{} signature span {:?} outside a {} byte blob",
            method.token,
            span,
            method.signature_blob.len()
        )
    })
}
