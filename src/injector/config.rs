//! Configuration for the module injector.

use crate::{metadata::reader::DEFAULT_MAX_CODE_SIZE, rewriter::ProbeSet};

/// When the injector rewrites the methods of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InjectionPhase {
    /// Rewrite every selected method while the module-load notification is being handled
    #[default]
    ModuleLoad,
    /// Record the module at load time and rewrite each method when it is about to be compiled
    Deferred,
    /// Acknowledge notifications without rewriting anything
    Disabled,
}

/// Configuration for the [`crate::injector::ModuleInjector`].
///
/// # Examples
///
/// ```rust
/// use cilweave::injector::{InjectionPhase, InjectorConfig};
///
/// let config = InjectorConfig::new()
///     .with_phase(InjectionPhase::Deferred)
///     .with_parallel(false);
/// assert!(config.verify);
/// assert_eq!(config.phase, InjectionPhase::Deferred);
/// ```
#[derive(Debug, Clone)]
pub struct InjectorConfig {
    /// Probe entry points inserted calls target.
    pub probes: ProbeSet,

    /// When methods are rewritten (default: at module load).
    pub phase: InjectionPhase,

    /// Plan methods on the rayon pool (default: true).
    ///
    /// Token allocation and commits always run in method token order on the calling thread.
    pub parallel: bool,

    /// Re-decode every rewritten body before committing it (default: true).
    pub verify: bool,

    /// Rewrite instance and static constructors when a rule selects them (default: true).
    pub instrument_constructors: bool,

    /// Methods with more code than this are skipped (default: 1 MiB).
    pub max_code_size: usize,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            probes: ProbeSet::default(),
            phase: InjectionPhase::ModuleLoad,
            parallel: true,
            verify: true,
            instrument_constructors: true,
            max_code_size: DEFAULT_MAX_CODE_SIZE,
        }
    }
}

impl InjectorConfig {
    /// Creates a new configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration that records modules but never rewrites.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            phase: InjectionPhase::Disabled,
            ..Self::default()
        }
    }

    /// Sets the probe entry points.
    #[must_use]
    pub fn with_probes(mut self, probes: ProbeSet) -> Self {
        self.probes = probes;
        self
    }

    /// Sets the injection phase.
    #[must_use]
    pub fn with_phase(mut self, phase: InjectionPhase) -> Self {
        self.phase = phase;
        self
    }

    /// Enables or disables parallel planning.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Enables or disables verification of rewritten bodies.
    #[must_use]
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Enables or disables constructor instrumentation.
    #[must_use]
    pub fn with_constructors(mut self, instrument: bool) -> Self {
        self.instrument_constructors = instrument;
        self
    }

    /// Sets the largest code size that is still rewritten.
    #[must_use]
    pub fn with_max_code_size(mut self, max_code_size: usize) -> Self {
        self.max_code_size = max_code_size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = InjectorConfig::default();
        assert_eq!(config.phase, InjectionPhase::ModuleLoad);
        assert!(config.parallel);
        assert!(config.verify);
        assert!(config.instrument_constructors);
        assert_eq!(config.max_code_size, DEFAULT_MAX_CODE_SIZE);
    }

    #[test]
    fn test_builders() {
        let config = InjectorConfig::disabled()
            .with_verify(false)
            .with_constructors(false)
            .with_max_code_size(64)
            .with_probes(ProbeSet::default().with_type("Agent.Hooks"));
        assert_eq!(config.phase, InjectionPhase::Disabled);
        assert!(!config.verify);
        assert!(!config.instrument_constructors);
        assert_eq!(config.max_code_size, 64);
        assert_eq!(config.probes.type_name, "Agent.Hooks");
    }
}
