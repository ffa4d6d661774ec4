//! The Module Injector: one rewrite pass per module-load notification.
//!
//! For every module the injector walks a small state machine:
//!
//! ```text
//! NotSeen -> MetadataReady -> Rewriting -> Committed
//!                                      \-> Failed
//! ```
//!
//! A pass reads every `MethodDef` of the module, asks the [`crate::policy`] whether to wrap it,
//! and plans the rewrite of the selected methods (on the rayon pool when
//! [`InjectorConfig::parallel`] is set). Token allocation, emission, verification and commit then
//! run on the calling thread in method token order, so token numbering does not depend on
//! scheduling. Failures stay local to their method; only an exhausted token table or a rejected
//! commit ends the pass, and methods committed before that stay committed.
//!
//! Modules are tracked in a [`DashMap`]; notifications for distinct modules proceed in parallel
//! without a shared lock. A second load notification for a module that is still tracked is
//! rejected with [`Error::DuplicateInjection`].
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use cilweave::injector::{InjectorConfig, ModuleInjector, ModuleState};
//! use cilweave::metadata::method::{MethodAttributes, MethodDef};
//! use cilweave::metadata::token::Token;
//! use cilweave::module::{InMemoryModule, ModuleId};
//! use cilweave::policy::{Rule, RuleSet};
//!
//! let module = Arc::new(InMemoryModule::new(ModuleId(1), "Shop").with_method(
//!     MethodDef {
//!         token: Token::new(0x0600_0001),
//!         declaring_type: "Shop.Cart".into(),
//!         name: "Count".into(),
//!         flags: MethodAttributes::STATIC,
//!         impl_flags: 0,
//!         declaring_type_is_value: false,
//!         signature: vec![0x00, 0x00, 0x08],
//!     },
//!     vec![(2 << 2) | 0x2, 0x16, 0x2A],
//! ));
//!
//! let rules = RuleSet::new().with_rule(Rule::new("Shop.*", "*", "ShopTracer"));
//! let injector = ModuleInjector::new(InjectorConfig::default(), rules);
//!
//! let report = injector.on_module_load(module.clone())?;
//! assert_eq!(report.rewritten_count(), 1);
//! assert_eq!(injector.state(ModuleId(1)), ModuleState::Committed);
//! assert!(injector.on_module_load(module).is_err());
//! # Ok::<(), cilweave::Error>(())
//! ```

mod config;
mod context;
mod report;

pub use config::{InjectionPhase, InjectorConfig};
pub use context::PassContext;
pub use report::{InjectionReport, MethodOutcome, SkipReason};

use std::{
    sync::{Arc, Mutex},
    thread,
};

use dashmap::{mapref::entry::Entry, DashMap};
use rayon::prelude::*;

use crate::{
    metadata::{
        method::{MethodDef, MethodIdentity},
        reader::MetadataReader,
        signatures::parse_method_signature,
        token::Token,
    },
    module::{Module, ModuleId},
    policy::{decide, InstrumentationDecision, QualifiedMethod, RuleSet},
    rewriter::{verify_rewrite, RewritePlan, Rewriter},
    Error, Result,
};

/// Where a module is in its injection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// No load notification seen, or the module was unloaded
    NotSeen,
    /// Load notification handled, metadata queryable, nothing rewritten yet
    MetadataReady,
    /// A pass (or, in the deferred phase, the per-method session) is running
    Rewriting,
    /// Every selected method was rewritten or skipped by policy
    Committed,
    /// At least one selected method failed, or the pass was aborted
    Failed,
}

/// Marks a module `Failed` when the work it spans unwinds.
struct FailOnUnwind<'a> {
    injector: &'a ModuleInjector,
    module: ModuleId,
}

impl Drop for FailOnUnwind<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            log::error!("Rewriting {} panicked, marking it failed", self.module);
            let mut report = InjectionReport::empty(self.module, ModuleState::Failed);
            report.aborted = Some("rewrite panicked".to_string());
            self.injector.mark_failed(report);
        }
    }
}

struct ModuleEntry {
    state: ModuleState,
    session: Option<Arc<Mutex<PassContext>>>,
    report: Option<InjectionReport>,
}

/// Result of planning one method.
enum Planned {
    Rewrite(Box<RewritePlan>),
    Skip(SkipReason),
}

/// Drives rewrite passes for module-load and JIT notifications.
pub struct ModuleInjector {
    config: InjectorConfig,
    rules: Arc<RuleSet>,
    reader: MetadataReader,
    rewriter: Rewriter,
    modules: DashMap<ModuleId, ModuleEntry>,
}

impl ModuleInjector {
    /// Create an injector with an immutable rule set
    #[must_use]
    pub fn new(config: InjectorConfig, rules: RuleSet) -> Self {
        Self::with_shared_rules(config, Arc::new(rules))
    }

    /// Create an injector sharing a rule set with other components
    #[must_use]
    pub fn with_shared_rules(config: InjectorConfig, rules: Arc<RuleSet>) -> Self {
        let reader = MetadataReader::new().with_max_code_size(config.max_code_size);
        let rewriter = Rewriter::new(config.probes.clone());
        ModuleInjector {
            config,
            rules,
            reader,
            rewriter,
            modules: DashMap::new(),
        }
    }

    /// The configuration
    #[must_use]
    pub fn config(&self) -> &InjectorConfig {
        &self.config
    }

    /// The rule set
    #[must_use]
    pub fn rules(&self) -> &Arc<RuleSet> {
        &self.rules
    }

    /// Lifecycle state of a module
    #[must_use]
    pub fn state(&self, module: ModuleId) -> ModuleState {
        self.modules
            .get(&module)
            .map_or(ModuleState::NotSeen, |entry| entry.state)
    }

    /// Report of the last completed pass over a module
    #[must_use]
    pub fn report(&self, module: ModuleId) -> Option<InjectionReport> {
        self.modules
            .get(&module)
            .and_then(|entry| entry.report.clone())
    }

    /// Number of modules currently tracked
    #[must_use]
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Handle a module-load notification.
    ///
    /// Runs to completion before returning: when it returns, every selected method is either
    /// committed with its rewritten body or still has its original body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateInjection`] if the module is already tracked. Every other
    /// failure is reported in the returned [`InjectionReport`].
    pub fn on_module_load(&self, module: Arc<dyn Module>) -> Result<InjectionReport> {
        let id = module.id();
        match self.modules.entry(id) {
            Entry::Occupied(_) => {
                log::error!("Rejected second load notification for {}", id);
                return Err(Error::DuplicateInjection {
                    module: id,
                    method: None,
                });
            }
            Entry::Vacant(vacant) => {
                vacant.insert(ModuleEntry {
                    state: ModuleState::MetadataReady,
                    session: None,
                    report: None,
                });
            }
        }

        match self.config.phase {
            InjectionPhase::Disabled => {
                log::debug!("Injection disabled, recorded {} ({})", id, module.name());
                Ok(InjectionReport::empty(id, ModuleState::MetadataReady))
            }
            InjectionPhase::Deferred => Ok(self.open_session(module)),
            InjectionPhase::ModuleLoad => {
                self.set_state(id, ModuleState::Rewriting);
                let _unwind = FailOnUnwind {
                    injector: self,
                    module: id,
                };
                let report = self.run_pass(module);
                if let Some(mut entry) = self.modules.get_mut(&id) {
                    entry.state = report.state;
                    entry.report = Some(report.clone());
                }
                Ok(report)
            }
        }
    }

    /// Handle a module-unload notification; returns `false` for modules never seen.
    pub fn on_module_unload(&self, module: ModuleId) -> bool {
        let removed = self.modules.remove(&module).is_some();
        if removed {
            log::debug!("Released {}", module);
        }
        removed
    }

    /// Handle a JIT-compilation notification for the deferred phase.
    ///
    /// Returns `Ok(None)` when the module has no deferred session (other phases, unknown or
    /// failed modules).
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateInjection`] if the method was already rewritten in this session.
    pub fn on_jit_compilation_started(
        &self,
        module: ModuleId,
        method: Token,
    ) -> Result<Option<MethodOutcome>> {
        let Some(session) = self
            .modules
            .get(&module)
            .and_then(|entry| entry.session.clone())
        else {
            return Ok(None);
        };

        let _unwind = FailOnUnwind {
            injector: self,
            module,
        };
        let mut context = match session.lock() {
            Ok(context) => context,
            Err(poisoned) => {
                log::error!("Deferred session for {} is poisoned, dropping it", module);
                let report = poisoned
                    .into_inner()
                    .report(ModuleState::Failed, Some("deferred session poisoned".to_string()));
                self.mark_failed(report);
                return Ok(None);
            }
        };
        if context.is_rewritten(method) {
            log::error!("Rejected second JIT notification for {} in {}", method, module);
            return Err(Error::DuplicateInjection {
                module,
                method: Some(method),
            });
        }

        self.set_state(module, ModuleState::Rewriting);
        let def = match context.module().method_def(method) {
            Ok(def) => def,
            Err(error) => {
                log::warn!("Cannot resolve {} in {}: {}", method, module, error);
                let outcome = MethodOutcome::Skipped(SkipReason::Failed(error.to_string()));
                context.record(method, outcome.clone());
                return Ok(Some(outcome));
            }
        };

        let planned = self.plan_method(context.module().as_ref(), &def);
        let outcome = match self.finish_method(&mut context, planned) {
            Ok(outcome) => outcome,
            Err(error) => {
                log::error!("Deferred session for {} aborted: {}", module, error);
                let outcome = MethodOutcome::Skipped(SkipReason::Failed(error.to_string()));
                context.record(method, outcome.clone());
                let report = context.report(ModuleState::Failed, Some(error.to_string()));
                drop(context);
                self.mark_failed(report);
                return Ok(Some(outcome));
            }
        };
        context.record(method, outcome.clone());
        Ok(Some(outcome))
    }

    /// Park a module in `Failed`, ending its deferred session
    fn mark_failed(&self, report: InjectionReport) {
        if let Some(mut entry) = self.modules.get_mut(&report.module) {
            entry.state = ModuleState::Failed;
            entry.session = None;
            entry.report = Some(report);
        }
    }

    fn set_state(&self, module: ModuleId, state: ModuleState) {
        if let Some(mut entry) = self.modules.get_mut(&module) {
            entry.state = state;
        }
    }

    fn open_session(&self, module: Arc<dyn Module>) -> InjectionReport {
        let id = module.id();
        match PassContext::new(module) {
            Ok(context) => {
                if let Some(mut entry) = self.modules.get_mut(&id) {
                    entry.session = Some(Arc::new(Mutex::new(context)));
                }
                log::debug!("Opened deferred session for {}", id);
                InjectionReport::empty(id, ModuleState::MetadataReady)
            }
            Err(error) => {
                log::error!("Cannot open deferred session for {}: {}", id, error);
                let mut report = InjectionReport::empty(id, ModuleState::Failed);
                report.aborted = Some(error.to_string());
                if let Some(mut entry) = self.modules.get_mut(&id) {
                    entry.state = ModuleState::Failed;
                    entry.report = Some(report.clone());
                }
                report
            }
        }
    }

    /// Rewrite every selected method of `module`
    fn run_pass(&self, module: Arc<dyn Module>) -> InjectionReport {
        let id = module.id();
        let aborted = |error: Error| {
            log::error!("Pass over {} aborted: {}", id, error);
            let mut report = InjectionReport::empty(id, ModuleState::Failed);
            report.aborted = Some(error.to_string());
            report
        };

        let mut context = match PassContext::new(module.clone()) {
            Ok(context) => context,
            Err(error) => return aborted(error),
        };
        let mut methods = match module.enumerate_methods() {
            Ok(methods) => methods,
            Err(error) => return aborted(error),
        };
        methods.sort_by_key(|def| def.token);

        let planned: Vec<(Token, Planned)> = if self.config.parallel {
            methods
                .par_iter()
                .map(|def| (def.token, self.plan_method(module.as_ref(), def)))
                .collect()
        } else {
            methods
                .iter()
                .map(|def| (def.token, self.plan_method(module.as_ref(), def)))
                .collect()
        };

        let mut abort_cause: Option<String> = None;
        for (token, planned) in planned {
            if abort_cause.is_some() {
                let outcome = match planned {
                    Planned::Rewrite(_) => MethodOutcome::Skipped(SkipReason::Aborted),
                    Planned::Skip(reason) => MethodOutcome::Skipped(reason),
                };
                context.record(token, outcome);
                continue;
            }

            match self.finish_method(&mut context, planned) {
                Ok(outcome) => context.record(token, outcome),
                Err(error) => {
                    log::error!("Pass over {} aborted at {}: {}", id, token, error);
                    context.record(
                        token,
                        MethodOutcome::Skipped(SkipReason::Failed(error.to_string())),
                    );
                    abort_cause = Some(error.to_string());
                }
            }
        }

        let mut report = context.report(ModuleState::Committed, abort_cause);
        if report.aborted.is_some() || report.failed_count() > 0 {
            report.state = ModuleState::Failed;
        }

        log::info!("Injected {}", report);
        report
    }

    /// Decide and plan one method; never fails, failures become skip reasons
    fn plan_method(&self, module: &dyn Module, def: &MethodDef) -> Planned {
        if !def.has_il_body() {
            return Planned::Skip(SkipReason::NoBody);
        }
        if def.is_constructor() && !self.config.instrument_constructors {
            return Planned::Skip(SkipReason::Constructor);
        }

        let signature = match parse_method_signature(&def.signature) {
            Ok(signature) => signature,
            Err(error) => return self.contained(def.token, &error),
        };
        let identity = MethodIdentity {
            declaring_type: def.declaring_type.clone(),
            name: def.name.clone(),
            signature,
        };
        let qualified =
            QualifiedMethod::from_identity(module.name(), &identity, |token| module.type_name(token));

        let decision = decide(&qualified, &self.rules);
        if decision == InstrumentationDecision::Skip {
            return Planned::Skip(SkipReason::NotSelected);
        }

        let planned = self
            .reader
            .read_def(module, def)
            .and_then(|method| self.rewriter.plan_decision(&method, &decision));
        match planned {
            Ok(Some(plan)) => Planned::Rewrite(Box::new(plan)),
            Ok(None) => Planned::Skip(SkipReason::NotSelected),
            Err(error) => self.contained(def.token, &error),
        }
    }

    fn contained(&self, token: Token, error: &Error) -> Planned {
        log::warn!("Leaving {} unmodified: {}", token, error);
        Planned::Skip(SkipReason::Failed(error.to_string()))
    }

    /// Allocate, emit, verify and commit a planned method.
    ///
    /// Method-local errors become a skip outcome; errors that end the pass are returned.
    fn finish_method(&self, context: &mut PassContext, planned: Planned) -> Result<MethodOutcome> {
        let plan = match planned {
            Planned::Skip(reason) => return Ok(MethodOutcome::Skipped(reason)),
            Planned::Rewrite(plan) => plan,
        };

        match self.commit(context, &plan) {
            Ok(outcome) => Ok(outcome),
            Err(error) if error.aborts_pass() => Err(error),
            Err(error) => {
                log::warn!("Leaving {} unmodified: {}", plan.method, error);
                Ok(MethodOutcome::Skipped(SkipReason::Failed(error.to_string())))
            }
        }
    }

    fn commit(&self, context: &mut PassContext, plan: &RewritePlan) -> Result<MethodOutcome> {
        let module = context.module().clone();
        let allocation = context
            .allocator_mut()
            .allocate_all(module.as_ref(), &plan.requests)?;
        let rewritten = self.rewriter.emit(plan, &allocation)?;
        if self.config.verify {
            verify_rewrite(plan, &rewritten)?;
        }

        module.commit_method_body(plan.method, &rewritten.body, Some(rewritten.locals))?;
        context.mark_rewritten(plan.method);

        log::debug!(
            "Committed {} with probe '{}': {} bytes of code, {} exits",
            plan.method,
            plan.probe_id,
            rewritten.code_size,
            plan.exit_count()
        );

        Ok(MethodOutcome::Rewritten {
            probe_id: plan.probe_id.clone(),
            code_size: rewritten.code_size,
            exits: plan.exit_count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        panic::{catch_unwind, AssertUnwindSafe},
        thread,
    };

    use crate::{
        metadata::method::MethodAttributes,
        module::{InMemoryModule, TokenRange},
        policy::Rule,
        tokens::TokenRequest,
    };

    /// An in-memory module whose body reads panic for one method
    struct PanicsOnBody {
        inner: InMemoryModule,
        broken: Token,
    }

    impl Module for PanicsOnBody {
        fn id(&self) -> ModuleId {
            self.inner.id()
        }

        fn name(&self) -> &str {
            self.inner.name()
        }

        fn enumerate_methods(&self) -> Result<Vec<MethodDef>> {
            self.inner.enumerate_methods()
        }

        fn method_body(&self, token: Token) -> Result<Vec<u8>> {
            if token == self.broken {
                panic!("body of {token} is unreadable");
            }
            self.inner.method_body(token)
        }

        fn signature_blob(&self, token: Token) -> Result<Vec<u8>> {
            self.inner.signature_blob(token)
        }

        fn token_ranges(&self) -> Result<Vec<TokenRange>> {
            self.inner.token_ranges()
        }

        fn allocate_token(&self, request: &TokenRequest) -> Result<Token> {
            self.inner.allocate_token(request)
        }

        fn commit_method_body(&self, token: Token, body: &[u8], locals: Option<Token>) -> Result<()> {
            self.inner.commit_method_body(token, body, locals)
        }
    }

    fn panics_on_first(id: u64) -> Arc<PanicsOnBody> {
        Arc::new(PanicsOnBody {
            inner: InMemoryModule::new(ModuleId(id), "Shop")
                .with_method(def(1, "A"), vec![(2 << 2) | 0x2, 0x16, 0x2A])
                .with_method(def(3, "C"), vec![(2 << 2) | 0x2, 0x17, 0x2A]),
            broken: Token::new(0x0600_0001),
        })
    }

    fn def(row: u32, name: &str) -> MethodDef {
        MethodDef {
            token: Token::new(0x0600_0000 | row),
            declaring_type: "Shop.Cart".into(),
            name: name.into(),
            flags: MethodAttributes::STATIC,
            impl_flags: 0,
            declaring_type_is_value: false,
            signature: vec![0x00, 0x00, 0x08],
        }
    }

    fn module(id: u64) -> Arc<InMemoryModule> {
        Arc::new(
            InMemoryModule::new(ModuleId(id), "Shop")
                .with_method(def(1, "A"), vec![(2 << 2) | 0x2, 0x16, 0x2A])
                .with_method(def(2, "B"), vec![(5 << 2) | 0x2, 0x27, 0x01, 0x00, 0x00, 0x06])
                .with_method(def(3, "C"), vec![(2 << 2) | 0x2, 0x17, 0x2A])
                .with_method(def(4, "Other"), vec![(2 << 2) | 0x2, 0x17, 0x2A]),
        )
    }

    fn rules() -> RuleSet {
        RuleSet::new()
            .with_rule(Rule::new("Shop.Cart", "?", "CartTracer"))
    }

    #[test]
    fn test_partial_failure_is_contained() -> Result<()> {
        let module = module(1);
        let injector = ModuleInjector::new(InjectorConfig::default(), rules());

        let report = injector.on_module_load(module.clone())?;
        assert_eq!(report.rewritten_count(), 2);
        assert!(matches!(
            report.outcome(Token::new(0x0600_0002)),
            Some(MethodOutcome::Skipped(SkipReason::Failed(_)))
        ));
        assert_eq!(
            report.outcome(Token::new(0x0600_0004)),
            Some(&MethodOutcome::Skipped(SkipReason::NotSelected))
        );
        assert_eq!(report.state, ModuleState::Failed);
        assert_eq!(injector.state(ModuleId(1)), ModuleState::Failed);

        let committed: Vec<Token> = module.commits().iter().map(|commit| commit.token).collect();
        assert_eq!(committed, vec![Token::new(0x0600_0001), Token::new(0x0600_0003)]);
        Ok(())
    }

    #[test]
    fn test_duplicate_load_is_rejected() -> Result<()> {
        let module = module(2);
        let injector = ModuleInjector::new(InjectorConfig::default(), rules());
        injector.on_module_load(module.clone())?;
        let commits = module.commits().len();

        assert!(matches!(
            injector.on_module_load(module.clone()),
            Err(Error::DuplicateInjection { module: ModuleId(2), method: None })
        ));
        assert_eq!(module.commits().len(), commits);

        assert!(injector.on_module_unload(ModuleId(2)));
        assert_eq!(injector.state(ModuleId(2)), ModuleState::NotSeen);
        assert!(!injector.on_module_unload(ModuleId(2)));
        Ok(())
    }

    #[test]
    fn test_sequential_and_parallel_agree() -> Result<()> {
        let parallel = module(3);
        let sequential = module(4);

        ModuleInjector::new(InjectorConfig::default(), rules()).on_module_load(parallel.clone())?;
        ModuleInjector::new(InjectorConfig::default().with_parallel(false), rules())
            .on_module_load(sequential.clone())?;

        let bodies = |module: &InMemoryModule| -> Vec<Vec<u8>> {
            module.commits().into_iter().map(|commit| commit.body).collect()
        };
        assert_eq!(bodies(&parallel), bodies(&sequential));
        Ok(())
    }

    #[test]
    fn test_disabled_phase_records_only() -> Result<()> {
        let module = module(5);
        let injector = ModuleInjector::new(InjectorConfig::disabled(), rules());

        let report = injector.on_module_load(module.clone())?;
        assert!(report.outcomes.is_empty());
        assert_eq!(injector.state(ModuleId(5)), ModuleState::MetadataReady);
        assert!(module.commits().is_empty());
        assert!(injector.on_module_load(module).is_err());
        Ok(())
    }

    #[test]
    fn test_deferred_phase_rewrites_on_jit() -> Result<()> {
        let module = module(6);
        let injector = ModuleInjector::new(
            InjectorConfig::default().with_phase(InjectionPhase::Deferred),
            rules(),
        );

        injector.on_module_load(module.clone())?;
        assert!(module.commits().is_empty());
        assert_eq!(injector.state(ModuleId(6)), ModuleState::MetadataReady);

        let outcome = injector.on_jit_compilation_started(ModuleId(6), Token::new(0x0600_0003))?;
        assert!(outcome.is_some_and(|outcome| outcome.is_rewritten()));
        assert_eq!(module.commits().len(), 1);
        assert_eq!(injector.state(ModuleId(6)), ModuleState::Rewriting);

        assert!(matches!(
            injector.on_jit_compilation_started(ModuleId(6), Token::new(0x0600_0003)),
            Err(Error::DuplicateInjection { method: Some(_), .. })
        ));

        let skipped = injector.on_jit_compilation_started(ModuleId(6), Token::new(0x0600_0004))?;
        assert_eq!(skipped, Some(MethodOutcome::Skipped(SkipReason::NotSelected)));

        assert_eq!(
            injector.on_jit_compilation_started(ModuleId(99), Token::new(0x0600_0001))?,
            None
        );
        Ok(())
    }

    #[test]
    fn test_constructors_can_be_excluded() -> Result<()> {
        let mut ctor = def(1, ".ctor");
        ctor.flags = MethodAttributes::RTSPECIAL_NAME | MethodAttributes::SPECIAL_NAME;
        ctor.signature = vec![0x20, 0x00, 0x01];
        let module = Arc::new(
            InMemoryModule::new(ModuleId(7), "Shop").with_method(ctor, vec![(1 << 2) | 0x2, 0x2A]),
        );

        let rules = RuleSet::new().with_rule(Rule::new("Shop.Cart", "*", "Ctor"));
        let injector =
            ModuleInjector::new(InjectorConfig::default().with_constructors(false), rules);
        let report = injector.on_module_load(module)?;
        assert_eq!(
            report.outcome(Token::new(0x0600_0001)),
            Some(&MethodOutcome::Skipped(SkipReason::Constructor))
        );
        assert_eq!(report.state, ModuleState::Committed);
        Ok(())
    }

    #[test]
    fn test_panicking_pass_leaves_module_failed() {
        let injector = ModuleInjector::new(InjectorConfig::default(), rules());

        let result = catch_unwind(AssertUnwindSafe(|| {
            injector.on_module_load(panics_on_first(8))
        }));
        assert!(result.is_err());

        assert_eq!(injector.state(ModuleId(8)), ModuleState::Failed);
        let report = injector.report(ModuleId(8)).expect("failed pass leaves a report");
        assert_eq!(report.state, ModuleState::Failed);
        assert!(report.aborted.is_some());
    }

    #[test]
    fn test_panicking_jit_ends_the_session() -> Result<()> {
        let injector = ModuleInjector::new(
            InjectorConfig::default().with_phase(InjectionPhase::Deferred),
            rules(),
        );
        let module = panics_on_first(9);
        injector.on_module_load(module.clone())?;

        let result = catch_unwind(AssertUnwindSafe(|| {
            injector.on_jit_compilation_started(ModuleId(9), Token::new(0x0600_0001))
        }));
        assert!(result.is_err());
        assert_eq!(injector.state(ModuleId(9)), ModuleState::Failed);

        // healthy methods are no longer rewritten, and nothing panics
        assert_eq!(
            injector.on_jit_compilation_started(ModuleId(9), Token::new(0x0600_0003))?,
            None
        );
        assert!(module.inner.commits().is_empty());
        Ok(())
    }

    #[test]
    fn test_poisoned_session_is_dropped() -> Result<()> {
        let injector = ModuleInjector::new(
            InjectorConfig::default().with_phase(InjectionPhase::Deferred),
            rules(),
        );
        injector.on_module_load(module(10))?;
        injector.on_jit_compilation_started(ModuleId(10), Token::new(0x0600_0001))?;

        let session = injector
            .modules
            .get(&ModuleId(10))
            .and_then(|entry| entry.session.clone())
            .expect("deferred session is open");
        let poisoner = session.clone();
        let _ = thread::spawn(move || {
            let _context = poisoner.lock();
            panic!("session holder died");
        })
        .join();
        assert!(session.is_poisoned());

        assert_eq!(
            injector.on_jit_compilation_started(ModuleId(10), Token::new(0x0600_0003))?,
            None
        );
        assert_eq!(injector.state(ModuleId(10)), ModuleState::Failed);

        let report = injector.report(ModuleId(10)).expect("poisoned session leaves a report");
        assert!(report.aborted.is_some());
        assert_eq!(report.rewritten_count(), 1);
        assert_eq!(
            injector.on_jit_compilation_started(ModuleId(10), Token::new(0x0600_0003))?,
            None
        );
        Ok(())
    }

    #[test]
    fn test_unresolved_jit_method_is_recorded() -> Result<()> {
        let injector = ModuleInjector::new(
            InjectorConfig::default().with_phase(InjectionPhase::Deferred),
            rules(),
        );
        injector.on_module_load(module(11))?;

        let missing = Token::new(0x0600_0042);
        let outcome = injector.on_jit_compilation_started(ModuleId(11), missing)?;
        assert!(matches!(
            outcome,
            Some(MethodOutcome::Skipped(SkipReason::Failed(_)))
        ));

        let session = injector
            .modules
            .get(&ModuleId(11))
            .and_then(|entry| entry.session.clone())
            .expect("deferred session is open");
        let report = lock!(session).report(ModuleState::Rewriting, None);
        assert_eq!(report.outcome(missing), outcome.as_ref());
        Ok(())
    }
}
