//! Rewrite plans: the byte level edits of one method and the offset map they induce.
//!
//! Every edit either inserts bytes before an original instruction ([`Placement::Before`]) or
//! replaces one original instruction ([`Placement::Replace`]). An original offset `t` maps to
//!
//! ```text
//! map(t) = t + sum(delta of every edit at an offset < t, or at t and placed Before)
//! ```
//!
//! so a branch to the first instruction lands after the prologue, and a branch to a replaced
//! `ret` lands on the first byte of its exit transfer.

use std::fmt;

use crate::{
    assembly::Instruction,
    metadata::{method::ExceptionHandler, token::Token},
    rewriter::sequences::ProbeFrame,
    tokens::TokenRequest,
};

/// Where an edit goes relative to the original instruction at its offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Placement {
    /// Inserted in front of the instruction, which is kept
    Before,
    /// Takes the place of the instruction
    Replace,
}

/// What an edit does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditKind {
    /// Entry probe call, inserted before the first instruction
    Prologue,
    /// `ret` replaced by `[stloc result] leave epilogue`
    ExitTransfer,
    /// Short branch or `leave.s` re-encoded in its 32-bit form
    WidenBranch,
    /// `tail.` prefix removed
    DropTailPrefix,
}

/// One byte level edit of the original code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    /// Original offset of the instruction the edit is anchored at
    pub offset: u32,
    /// Insert before or replace
    pub placement: Placement,
    /// What the edit does
    pub kind: EditKind,
    /// Bytes of original code the edit removes
    pub original_size: u32,
    /// Bytes the edit emits
    pub new_size: u32,
}

impl Edit {
    /// Growth of the code caused by this edit
    #[must_use]
    pub fn delta(&self) -> i64 {
        i64::from(self.new_size) - i64::from(self.original_size)
    }
}

impl fmt::Display for Edit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IL_{:04x}: {:?} {:?} ({} -> {} bytes)",
            self.offset, self.placement, self.kind, self.original_size, self.new_size
        )
    }
}

/// Maps original code offsets to offsets in the rewritten code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetMap {
    steps: Vec<(u32, Placement, i64)>,
    original_len: u32,
}

impl OffsetMap {
    /// Build the map of `edits` over code of `original_len` bytes
    #[must_use]
    pub fn new(edits: &[Edit], original_len: u32) -> Self {
        let mut ordered: Vec<&Edit> = edits.iter().collect();
        ordered.sort_by_key(|edit| (edit.offset, edit.placement));

        let mut total = 0_i64;
        let steps = ordered
            .into_iter()
            .map(|edit| {
                total += edit.delta();
                (edit.offset, edit.placement, total)
            })
            .collect();

        OffsetMap {
            steps,
            original_len,
        }
    }

    /// New offset of the original offset `offset`
    #[must_use]
    pub fn map(&self, offset: u32) -> u32 {
        let applied = self.steps.partition_point(|(at, placement, _)| {
            *at < offset || (*at == offset && *placement == Placement::Before)
        });
        let delta = match applied {
            0 => 0,
            count => self.steps[count - 1].2,
        };

        u32::try_from(i64::from(offset) + delta).unwrap_or(u32::MAX)
    }

    /// Length of the original code
    #[must_use]
    pub fn original_len(&self) -> u32 {
        self.original_len
    }

    /// Length of the rewritten original code, prologue included
    #[must_use]
    pub fn mapped_len(&self) -> u32 {
        self.map(self.original_len)
    }
}

/// Everything needed to emit the rewritten body of one method once tokens are allocated.
#[derive(Debug, Clone)]
pub struct RewritePlan {
    /// The method being rewritten
    pub method: Token,
    /// Probe identifier passed to the entry probe
    pub probe_id: String,
    /// Arguments are captured for the entry probe
    pub capture_args: bool,
    /// Edits in original offset order, prologue first
    pub edits: Vec<Edit>,
    /// Offset map induced by `edits`
    pub offsets: OffsetMap,
    /// Metadata the rewritten body references, in first-use order
    pub requests: Vec<TokenRequest>,
    /// Max stack of the rewritten body
    pub max_stack: u16,
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) code: Vec<u8>,
    pub(crate) handlers: Vec<ExceptionHandler>,
    pub(crate) init_locals: bool,
    pub(crate) frame: ProbeFrame,
    pub(crate) prologue_size: u32,
    pub(crate) exit_store_size: u32,
    pub(crate) handler_size: u32,
    pub(crate) epilogue_size: Option<u32>,
}

impl RewritePlan {
    /// Number of `ret` instructions turned into exit transfers
    #[must_use]
    pub fn exit_count(&self) -> usize {
        self.edits
            .iter()
            .filter(|edit| edit.kind == EditKind::ExitTransfer)
            .count()
    }

    /// The protected range of the appended catch-all clause in the rewritten code
    #[must_use]
    pub fn try_range(&self) -> (u32, u32) {
        (self.offsets.map(0), self.offsets.mapped_len())
    }

    /// Offset of the appended exception handler in the rewritten code
    #[must_use]
    pub fn handler_offset(&self) -> u32 {
        self.offsets.mapped_len()
    }

    /// Size of the appended exception handler
    #[must_use]
    pub fn handler_size(&self) -> u32 {
        self.handler_size
    }

    /// Offset of the epilogue, `None` if the method never returns normally
    #[must_use]
    pub fn epilogue_offset(&self) -> Option<u32> {
        self.epilogue_size
            .map(|_| self.handler_offset() + self.handler_size)
    }

    /// Size of the rewritten code
    #[must_use]
    pub fn code_size(&self) -> u32 {
        self.handler_offset() + self.handler_size + self.epilogue_size.unwrap_or(0)
    }

    /// Slot of the appended tracer local
    #[must_use]
    pub fn tracer_slot(&self) -> u16 {
        self.frame.tracer_slot
    }

    /// Slot of the appended return value local, if the method returns a value
    #[must_use]
    pub fn result_slot(&self) -> Option<u16> {
        self.frame.result.as_ref().map(|result| result.slot)
    }

    /// The extended local variable signature
    #[must_use]
    pub fn locals_blob(&self) -> &[u8] {
        &self.frame.locals_blob
    }

    pub(crate) fn edit_at(&self, offset: u32) -> Option<&Edit> {
        self.edits
            .binary_search_by_key(&(offset, Placement::Replace), |edit| {
                (edit.offset, edit.placement)
            })
            .ok()
            .map(|index| &self.edits[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edit(offset: u32, placement: Placement, kind: EditKind, from: u32, to: u32) -> Edit {
        Edit {
            offset,
            placement,
            kind,
            original_size: from,
            new_size: to,
        }
    }

    #[test]
    fn test_prologue_shifts_everything() {
        let map = OffsetMap::new(&[edit(0, Placement::Before, EditKind::Prologue, 0, 20)], 10);
        assert_eq!(map.map(0), 20);
        assert_eq!(map.map(5), 25);
        assert_eq!(map.mapped_len(), 30);
    }

    #[test]
    fn test_replace_keeps_its_own_start() {
        // prologue 10, br.s at 2 widened, ret at 6 grows by 5, tail. at 7 dropped
        let edits = [
            edit(0, Placement::Before, EditKind::Prologue, 0, 10),
            edit(2, Placement::Replace, EditKind::WidenBranch, 2, 5),
            edit(6, Placement::Replace, EditKind::ExitTransfer, 1, 6),
            edit(7, Placement::Replace, EditKind::DropTailPrefix, 2, 0),
        ];
        let map = OffsetMap::new(&edits, 20);

        assert_eq!(map.map(2), 12);
        assert_eq!(map.map(4), 17);
        assert_eq!(map.map(6), 19);
        assert_eq!(map.map(7), 25);
        assert_eq!(map.map(9), 25);
        assert_eq!(map.mapped_len(), 36);
    }

    #[test]
    fn test_unsorted_edits() {
        let edits = [
            edit(6, Placement::Replace, EditKind::ExitTransfer, 1, 5),
            edit(0, Placement::Before, EditKind::Prologue, 0, 4),
        ];
        let map = OffsetMap::new(&edits, 7);
        assert_eq!(map.map(6), 10);
        assert_eq!(map.map(7), 15);
    }
}
