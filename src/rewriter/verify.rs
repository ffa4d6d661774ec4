//! Structural verification of a rewritten body against its plan.
//!
//! The check re-parses the emitted bytes the way the runtime would see them and compares them
//! with the original instruction stream through the plan's offset map.

use std::collections::HashMap;

use crate::{
    assembly::{decode_stream, FlowType, Instruction},
    metadata::method::{HandlerKind, MethodBody},
    rewriter::{EditKind, RewritePlan, RewrittenBody},
    Error, Result,
};

fn failure(plan: &RewritePlan, message: impl std::fmt::Display) -> Error {
    unsupported_error!("verification failed for {}: {}", plan.method, message)
}

/// Check that `rewritten` is a faithful emission of `plan`.
///
/// - the body header and EH section parse, and every instruction decodes
/// - every original instruction sits at its mapped offset with the same opcode
/// - every branch and switch lands on the mapped image of its original target
/// - every `ret` became a `leave` to the epilogue, which holds the only `ret`
/// - every clause boundary is an instruction boundary, and the last clause is the catch-all over
///   exactly the original code
///
/// # Errors
///
/// Returns [`Error::UnsupportedConstruct`] describing the first mismatch.
pub fn verify_rewrite(plan: &RewritePlan, rewritten: &RewrittenBody) -> Result<()> {
    let body = MethodBody::from(&rewritten.body)
        .map_err(|error| failure(plan, format!("body does not parse: {error}")))?;
    let code = body.code(&rewritten.body);
    if u32::try_from(code.len()).ok() != Some(plan.code_size()) {
        return Err(failure(
            plan,
            format!("code is {} bytes, planned {}", code.len(), plan.code_size()),
        ));
    }
    if body.max_stack != usize::from(plan.max_stack) {
        return Err(failure(plan, "max stack differs from the plan"));
    }

    let decoded = decode_stream(code)
        .map_err(|error| failure(plan, format!("code does not decode: {error}")))?;
    let at: HashMap<u32, &Instruction> = decoded
        .iter()
        .map(|instruction| (instruction.offset, instruction))
        .collect();

    for original in &plan.instructions {
        check_instruction(plan, &at, original)?;
    }

    let rets = decoded
        .iter()
        .filter(|instruction| instruction.flow_type == FlowType::Return)
        .count();
    let expected_rets = usize::from(plan.epilogue_offset().is_some());
    if rets != expected_rets {
        return Err(failure(
            plan,
            format!("{rets} ret instructions, expected {expected_rets}"),
        ));
    }

    check_handlers(plan, rewritten, &body, &at)
}

fn check_instruction(
    plan: &RewritePlan,
    at: &HashMap<u32, &Instruction>,
    original: &Instruction,
) -> Result<()> {
    let offset = plan.offsets.map(original.offset);
    let kind = plan.edit_at(original.offset).map(|edit| edit.kind);
    if kind == Some(EditKind::DropTailPrefix) {
        return Ok(());
    }

    let Some(emitted) = at.get(&offset) else {
        return Err(failure(
            plan,
            format!("{original} has no instruction at IL_{offset:04x}"),
        ));
    };

    match kind {
        Some(EditKind::ExitTransfer) => {
            let leave_at = offset + plan.exit_store_size;
            let leave = at
                .get(&leave_at)
                .filter(|leave| leave.flow_type == FlowType::Leave)
                .ok_or_else(|| failure(plan, format!("{original} is not followed by a leave")))?;
            let epilogue = plan.epilogue_offset();
            if leave.branch_targets.first().copied() != epilogue {
                return Err(failure(
                    plan,
                    format!("{original} does not leave to the epilogue"),
                ));
            }
        }
        _ => {
            if emitted.flow_type != original.flow_type {
                return Err(failure(
                    plan,
                    format!("{original} became {emitted}"),
                ));
            }

            let expected: Vec<u32> = original
                .branch_targets
                .iter()
                .map(|target| plan.offsets.map(*target))
                .collect();
            if emitted.branch_targets != expected {
                return Err(failure(
                    plan,
                    format!("{original} became {emitted}, expected targets {expected:?}"),
                ));
            }

            if kind.is_none() && emitted.mnemonic != original.mnemonic {
                return Err(failure(plan, format!("{original} became {emitted}")));
            }
        }
    }

    Ok(())
}

fn check_handlers(
    plan: &RewritePlan,
    rewritten: &RewrittenBody,
    body: &MethodBody,
    at: &HashMap<u32, &Instruction>,
) -> Result<()> {
    if body.exception_handlers != rewritten.handlers {
        return Err(failure(plan, "EH section does not match the emitted clauses"));
    }
    if body.exception_handlers.len() != plan.handlers.len() + 1 {
        return Err(failure(
            plan,
            format!(
                "{} clauses, expected {}",
                body.exception_handlers.len(),
                plan.handlers.len() + 1
            ),
        ));
    }

    let code_size = u64::from(plan.code_size());
    let is_boundary = |offset: u64| {
        offset == code_size || u32::try_from(offset).is_ok_and(|offset| at.contains_key(&offset))
    };

    for (index, handler) in body.exception_handlers.iter().enumerate() {
        let mut edges = vec![
            u64::from(handler.try_offset),
            handler.try_end(),
            u64::from(handler.handler_offset),
            handler.handler_end(),
        ];
        if let Some(HandlerKind::Filter(filter)) = handler.kind() {
            edges.push(u64::from(filter));
        }
        if let Some(edge) = edges.into_iter().find(|edge| !is_boundary(*edge)) {
            return Err(failure(
                plan,
                format!("clause {index} has a boundary at {edge} inside an instruction"),
            ));
        }
    }

    let (try_start, try_end) = plan.try_range();
    let appended = body
        .exception_handlers
        .last()
        .ok_or_else(|| failure(plan, "missing catch-all clause"))?;
    let covers = appended.try_offset == try_start
        && appended.try_end() == u64::from(try_end)
        && appended.handler_offset == plan.handler_offset()
        && appended.handler_length == plan.handler_size();
    if !covers || !matches!(appended.kind(), Some(HandlerKind::Catch(_))) {
        return Err(failure(
            plan,
            "catch-all clause does not cover the original code",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::{
            method::{MethodAttributes, MethodDef, FAT_HEADER_SIZE},
            reader::MetadataReader,
            token::Token,
        },
        module::{InMemoryModule, ModuleId},
        rewriter::Rewriter,
        tokens::TokenAllocator,
    };

    fn rewrite() -> Result<(RewritePlan, RewrittenBody)> {
        let token = Token::new(0x0600_0001);
        // ldarg.0; brfalse.s +1; nop; ldc.i4.7; ret
        let module = InMemoryModule::new(ModuleId(1), "Shop").with_method(
            MethodDef {
                token,
                declaring_type: "Shop.Cart".into(),
                name: "Seven".into(),
                flags: MethodAttributes::STATIC,
                impl_flags: 0,
                declaring_type_is_value: false,
                signature: vec![0x00, 0x01, 0x08, 0x02],
            },
            vec![(6 << 2) | 0x2, 0x02, 0x2C, 0x01, 0x00, 0x1D, 0x2A],
        );

        let method = MetadataReader::new().read_method(&module, token)?;
        let rewriter = Rewriter::default();
        let plan = rewriter.plan(&method, "Probe", true)?;
        let mut allocator = TokenAllocator::scan(&module)?;
        let allocation = allocator.allocate_all(&module, &plan.requests)?;
        let rewritten = rewriter.emit(&plan, &allocation)?;
        Ok((plan, rewritten))
    }

    #[test]
    fn test_emitted_body_verifies() -> Result<()> {
        let (plan, rewritten) = rewrite()?;
        verify_rewrite(&plan, &rewritten)
    }

    #[test]
    fn test_corrupted_branch_is_caught() -> Result<()> {
        let (plan, mut rewritten) = rewrite()?;
        let branch_at = FAT_HEADER_SIZE + plan.offsets.map(1) as usize;
        assert_eq!(rewritten.body[branch_at], 0x39);
        rewritten.body[branch_at + 1] = rewritten.body[branch_at + 1].wrapping_add(1);

        assert!(matches!(
            verify_rewrite(&plan, &rewritten),
            Err(Error::UnsupportedConstruct(message)) if message.contains("verification failed")
        ));
        Ok(())
    }

    #[test]
    fn test_clause_mismatch_is_caught() -> Result<()> {
        let (plan, mut rewritten) = rewrite()?;
        rewritten.handlers[0].handler_length += 1;
        assert!(verify_rewrite(&plan, &rewritten).is_err());
        Ok(())
    }

    #[test]
    fn test_truncated_body_is_caught() -> Result<()> {
        let (plan, mut rewritten) = rewrite()?;
        rewritten.body.truncate(20);
        assert!(matches!(
            verify_rewrite(&plan, &rewritten),
            Err(Error::UnsupportedConstruct(_))
        ));
        Ok(())
    }
}
