//! Pass-scoped state of one module.
//!
//! A [`PassContext`] is created when a module-load pass starts and dropped when it ends (for the
//! deferred phase: when the module is unloaded). It is the only mutable state the pass touches,
//! and it is never shared between modules.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crossbeam_skiplist::SkipSet;

use crate::{
    injector::{InjectionReport, MethodOutcome, ModuleState},
    metadata::token::Token,
    module::Module,
    tokens::TokenAllocator,
    Result,
};

/// State threaded through the reader, rewriter, allocator and commits of one module pass.
pub struct PassContext {
    module: Arc<dyn Module>,
    allocator: TokenAllocator,
    rewritten: SkipSet<Token>,
    outcomes: boxcar::Vec<(Token, MethodOutcome)>,
    started: Instant,
}

impl PassContext {
    /// Start a pass over `module`, scanning its token ranges once.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Module::token_ranges`].
    pub fn new(module: Arc<dyn Module>) -> Result<Self> {
        let allocator = TokenAllocator::scan(module.as_ref())?;
        Ok(PassContext {
            module,
            allocator,
            rewritten: SkipSet::new(),
            outcomes: boxcar::Vec::new(),
            started: Instant::now(),
        })
    }

    /// The module of this pass
    #[must_use]
    pub fn module(&self) -> &Arc<dyn Module> {
        &self.module
    }

    /// The pass-wide token allocator
    pub fn allocator_mut(&mut self) -> &mut TokenAllocator {
        &mut self.allocator
    }

    /// The pass-wide token allocator
    #[must_use]
    pub fn allocator(&self) -> &TokenAllocator {
        &self.allocator
    }

    /// Returns `true` if `token` was rewritten and committed in this pass
    #[must_use]
    pub fn is_rewritten(&self, token: Token) -> bool {
        self.rewritten.contains(&token)
    }

    /// Mark `token` as committed; returns `false` if it already was.
    pub fn mark_rewritten(&self, token: Token) -> bool {
        if self.rewritten.contains(&token) {
            return false;
        }
        self.rewritten.insert(token);
        true
    }

    /// Committed methods in token order
    pub fn rewritten(&self) -> impl Iterator<Item = Token> + '_ {
        self.rewritten.iter().map(|entry| *entry.value())
    }

    /// Record the outcome of a method
    pub fn record(&self, token: Token, outcome: MethodOutcome) {
        self.outcomes.push((token, outcome));
    }

    /// Time since the pass started
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Summarize the outcomes recorded so far, sorted by token
    #[must_use]
    pub fn report(&self, state: ModuleState, aborted: Option<String>) -> InjectionReport {
        let mut outcomes: Vec<(Token, MethodOutcome)> = self
            .outcomes
            .iter()
            .map(|(_, outcome)| outcome.clone())
            .collect();
        outcomes.sort_by_key(|(token, _)| *token);

        InjectionReport {
            module: self.module.id(),
            state,
            outcomes,
            aborted,
            elapsed: self.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        injector::SkipReason,
        module::{InMemoryModule, ModuleId},
    };

    #[test]
    fn test_rewritten_set_and_report_order() -> Result<()> {
        let context = PassContext::new(Arc::new(InMemoryModule::new(ModuleId(4), "Shop")))?;

        assert!(context.mark_rewritten(Token::new(0x0600_0002)));
        assert!(!context.mark_rewritten(Token::new(0x0600_0002)));
        assert!(context.is_rewritten(Token::new(0x0600_0002)));
        assert!(!context.is_rewritten(Token::new(0x0600_0001)));

        context.record(
            Token::new(0x0600_0002),
            MethodOutcome::Skipped(SkipReason::NoBody),
        );
        context.record(
            Token::new(0x0600_0001),
            MethodOutcome::Skipped(SkipReason::NotSelected),
        );

        let report = context.report(ModuleState::Committed, None);
        assert_eq!(report.module, ModuleId(4));
        assert_eq!(report.outcomes[0].0, Token::new(0x0600_0001));
        assert_eq!(report.outcomes[1].0, Token::new(0x0600_0002));
        Ok(())
    }
}
