//! The Runtime Event Bridge: the callback surface the host runtime calls into.
//!
//! The host delivers notifications on its own threads and expects a status back; nothing may
//! unwind across that boundary. The bridge forwards each notification to the
//! [`ModuleInjector`], contains panics with [`std::panic::catch_unwind`], and turns every
//! outcome into a [`CallbackStatus`].
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use cilweave::injector::{InjectorConfig, ModuleInjector};
//! use cilweave::module::{InMemoryModule, ModuleId};
//! use cilweave::policy::RuleSet;
//! use cilweave::runtime::{CallbackStatus, RuntimeEventBridge};
//!
//! let injector = Arc::new(ModuleInjector::new(InjectorConfig::default(), RuleSet::new()));
//! let bridge = RuntimeEventBridge::new(injector);
//!
//! let module = Arc::new(InMemoryModule::new(ModuleId(9), "Empty"));
//! assert_eq!(bridge.on_module_load(module.clone()), CallbackStatus::Ok);
//! assert_eq!(bridge.on_module_load(module), CallbackStatus::Rejected);
//! assert_eq!(bridge.on_module_unload(ModuleId(9)), CallbackStatus::Ok);
//! ```

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use crate::{
    injector::{MethodOutcome, ModuleInjector, ModuleState},
    metadata::token::Token,
    module::{LoadState, Module, ModuleId},
    Error, Result,
};

/// `S_OK`
const S_OK: i32 = 0;
/// `S_FALSE`
const S_FALSE: i32 = 1;
/// `E_FAIL`
#[allow(clippy::cast_possible_wrap)]
const E_FAIL: i32 = 0x8000_4005_u32 as i32;
/// `E_UNEXPECTED`
#[allow(clippy::cast_possible_wrap)]
const E_UNEXPECTED: i32 = 0x8000_FFFF_u32 as i32;

/// What a callback reports back to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStatus {
    /// Notification handled
    Ok,
    /// Notification not relevant (unknown module, no deferred session, module unloading)
    Ignored,
    /// Notification handled, but methods were left unmodified or the pass was aborted
    Degraded,
    /// Caller contract violated: duplicate notification
    Rejected,
    /// The handler panicked; the module keeps whatever was committed before
    Panicked,
}

impl CallbackStatus {
    /// `HRESULT` equivalent for hosts speaking COM
    #[must_use]
    pub fn hresult(self) -> i32 {
        match self {
            CallbackStatus::Ok | CallbackStatus::Degraded => S_OK,
            CallbackStatus::Ignored => S_FALSE,
            CallbackStatus::Rejected => E_UNEXPECTED,
            CallbackStatus::Panicked => E_FAIL,
        }
    }

    /// Returns `true` unless the call was rejected or panicked
    #[must_use]
    pub fn is_success(self) -> bool {
        self.hresult() >= 0
    }
}

/// Forwards host notifications to a [`ModuleInjector`].
#[derive(Clone)]
pub struct RuntimeEventBridge {
    injector: Arc<ModuleInjector>,
}

impl RuntimeEventBridge {
    /// Create a bridge around `injector`
    #[must_use]
    pub fn new(injector: Arc<ModuleInjector>) -> Self {
        RuntimeEventBridge { injector }
    }

    /// The injector behind the bridge
    #[must_use]
    pub fn injector(&self) -> &Arc<ModuleInjector> {
        &self.injector
    }

    /// A module finished loading
    pub fn on_module_load(&self, module: Arc<dyn Module>) -> CallbackStatus {
        if module.load_state() == LoadState::Unloading {
            log::warn!("Ignoring load notification for unloading {}", module.id());
            return CallbackStatus::Ignored;
        }

        let id = module.id();
        guarded("module load", || self.injector.on_module_load(module)).map_or_else(
            |status| status,
            |report| match report.state {
                ModuleState::Committed | ModuleState::MetadataReady => CallbackStatus::Ok,
                _ => {
                    log::warn!("Module {} loaded with degraded instrumentation", id);
                    CallbackStatus::Degraded
                }
            },
        )
    }

    /// A module is being unloaded
    pub fn on_module_unload(&self, module: ModuleId) -> CallbackStatus {
        guarded("module unload", || Ok(self.injector.on_module_unload(module))).map_or_else(
            |status| status,
            |released| {
                if released {
                    CallbackStatus::Ok
                } else {
                    CallbackStatus::Ignored
                }
            },
        )
    }

    /// A method of a module is about to be compiled
    pub fn on_jit_compilation_started(&self, module: ModuleId, method: Token) -> CallbackStatus {
        guarded("JIT compilation", || {
            self.injector.on_jit_compilation_started(module, method)
        })
        .map_or_else(
            |status| status,
            |outcome| match outcome {
                None => CallbackStatus::Ignored,
                Some(MethodOutcome::Rewritten { .. }) => CallbackStatus::Ok,
                Some(MethodOutcome::Skipped(reason)) if reason.is_failure() => {
                    CallbackStatus::Degraded
                }
                Some(MethodOutcome::Skipped(_)) => CallbackStatus::Ok,
            },
        )
    }
}

/// Run a handler, mapping contract violations and panics to a status
fn guarded<T, F>(callback: &str, handler: F) -> std::result::Result<T, CallbackStatus>
where
    F: FnOnce() -> Result<T>,
{
    match catch_unwind(AssertUnwindSafe(handler)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error @ Error::DuplicateInjection { .. })) => {
            log::error!("{} callback rejected: {}", callback, error);
            Err(CallbackStatus::Rejected)
        }
        Ok(Err(error)) => {
            log::error!("{} callback failed: {}", callback, error);
            Err(CallbackStatus::Degraded)
        }
        Err(_) => {
            log::error!("{} callback panicked", callback);
            Err(CallbackStatus::Panicked)
        }
    }
}
