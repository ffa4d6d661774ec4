//! What a module pass did to each method.

use std::{fmt, time::Duration};

use crate::{injector::ModuleState, metadata::token::Token, module::ModuleId};

/// Why a method was left with its original body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No rule selected the method
    NotSelected,
    /// Abstract, runtime, native or P/Invoke method
    NoBody,
    /// Constructor, and constructor instrumentation is off
    Constructor,
    /// Reading, planning, emitting or verifying the method failed
    Failed(String),
    /// An earlier method aborted the pass
    Aborted,
}

impl SkipReason {
    /// Returns `true` if the method was selected but could not be rewritten
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, SkipReason::Failed(_) | SkipReason::Aborted)
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotSelected => write!(f, "not selected"),
            SkipReason::NoBody => write!(f, "no IL body"),
            SkipReason::Constructor => write!(f, "constructor"),
            SkipReason::Failed(message) => write!(f, "failed: {message}"),
            SkipReason::Aborted => write!(f, "pass aborted"),
        }
    }
}

/// The fate of one method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodOutcome {
    /// The rewritten body was committed
    Rewritten {
        /// Probe identifier passed to the entry probe
        probe_id: String,
        /// Code size of the committed body
        code_size: u32,
        /// Number of original `ret` instructions routed through the epilogue
        exits: usize,
    },
    /// The original body was left in place
    Skipped(SkipReason),
}

impl MethodOutcome {
    /// Returns `true` for committed rewrites
    #[must_use]
    pub fn is_rewritten(&self) -> bool {
        matches!(self, MethodOutcome::Rewritten { .. })
    }
}

/// Summary of one module pass.
#[derive(Debug, Clone)]
pub struct InjectionReport {
    /// The module
    pub module: ModuleId,
    /// State the module ended the pass in
    pub state: ModuleState,
    /// Outcome of every method, in token order
    pub outcomes: Vec<(Token, MethodOutcome)>,
    /// Error that ended the pass early
    pub aborted: Option<String>,
    /// Wall time of the pass
    pub elapsed: Duration,
}

impl InjectionReport {
    pub(crate) fn empty(module: ModuleId, state: ModuleState) -> Self {
        InjectionReport {
            module,
            state,
            outcomes: Vec::new(),
            aborted: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Tokens of the rewritten methods
    pub fn rewritten(&self) -> impl Iterator<Item = Token> + '_ {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_rewritten())
            .map(|(token, _)| *token)
    }

    /// Skipped methods with their reason
    pub fn skipped(&self) -> impl Iterator<Item = (Token, &SkipReason)> + '_ {
        self.outcomes.iter().filter_map(|(token, outcome)| match outcome {
            MethodOutcome::Skipped(reason) => Some((*token, reason)),
            MethodOutcome::Rewritten { .. } => None,
        })
    }

    /// Outcome recorded for `token`
    #[must_use]
    pub fn outcome(&self, token: Token) -> Option<&MethodOutcome> {
        self.outcomes
            .binary_search_by_key(&token, |(token, _)| *token)
            .ok()
            .map(|index| &self.outcomes[index].1)
    }

    /// Number of rewritten methods
    #[must_use]
    pub fn rewritten_count(&self) -> usize {
        self.rewritten().count()
    }

    /// Number of methods that were selected but could not be rewritten
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.skipped()
            .filter(|(_, reason)| reason.is_failure())
            .count()
    }
}

impl fmt::Display for InjectionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {:?}, {} rewritten, {} failed, {} methods in {:?}",
            self.module,
            self.state,
            self.rewritten_count(),
            self.failed_count(),
            self.outcomes.len(),
            self.elapsed
        )?;
        if let Some(cause) = &self.aborted {
            write!(f, ", aborted: {cause}")?;
        }
        Ok(())
    }
}
