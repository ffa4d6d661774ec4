//! The probe entry points inserted calls target.
//!
//! All three probes are static methods on one host type in an agent assembly the target module
//! can load:
//!
//! ```text
//! object Enter(string probeId, string typeName, string methodName,
//!              object target, object[] args, uint32 methodToken)
//! void   Exit(object tracer, object returnValue)
//! void   ExitWithException(object exception, object tracer)
//! ```

use crate::{
    metadata::signatures::{CALLING_CONVENTION, ELEMENT_TYPE},
    tokens::TokenRequest,
};

/// `object Enter(string, string, string, object, object[], uint32)`
pub const ENTER_SIGNATURE: [u8; 10] = [
    CALLING_CONVENTION::DEFAULT,
    0x06,
    ELEMENT_TYPE::OBJECT,
    ELEMENT_TYPE::STRING,
    ELEMENT_TYPE::STRING,
    ELEMENT_TYPE::STRING,
    ELEMENT_TYPE::OBJECT,
    ELEMENT_TYPE::SZARRAY,
    ELEMENT_TYPE::OBJECT,
    ELEMENT_TYPE::U4,
];

/// `void Exit(object, object)`, also used for `ExitWithException`
pub const EXIT_SIGNATURE: [u8; 5] = [
    CALLING_CONVENTION::DEFAULT,
    0x02,
    ELEMENT_TYPE::VOID,
    ELEMENT_TYPE::OBJECT,
    ELEMENT_TYPE::OBJECT,
];

/// Arguments `Enter` takes
pub const ENTER_ARG_COUNT: u16 = 6;

/// Arguments `Exit` and `ExitWithException` take
pub const EXIT_ARG_COUNT: u16 = 2;

/// Where the probes live.
///
/// # Examples
///
/// ```rust
/// use cilweave::rewriter::ProbeSet;
/// use cilweave::tokens::TokenRequest;
///
/// let probes = ProbeSet::default().with_type("Agent.Hooks");
/// match probes.enter() {
///     TokenRequest::MemberRef { type_name, name, .. } => {
///         assert_eq!(type_name, "Agent.Hooks");
///         assert_eq!(name, "Enter");
///     }
///     _ => unreachable!(),
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSet {
    /// Assembly defining the probe host type
    pub assembly: String,
    /// Full name of the probe host type
    pub type_name: String,
    /// Entry probe method name
    pub enter: String,
    /// Exit probe method name
    pub exit: String,
    /// Exception probe method name
    pub exit_with_exception: String,
}

impl Default for ProbeSet {
    fn default() -> Self {
        ProbeSet {
            assembly: "CilWeave.Agent".to_string(),
            type_name: "CilWeave.Agent.Probes".to_string(),
            enter: "Enter".to_string(),
            exit: "Exit".to_string(),
            exit_with_exception: "ExitWithException".to_string(),
        }
    }
}

impl ProbeSet {
    /// Set the probe assembly
    #[must_use]
    pub fn with_assembly(mut self, assembly: &str) -> Self {
        self.assembly = assembly.to_string();
        self
    }

    /// Set the probe host type
    #[must_use]
    pub fn with_type(mut self, type_name: &str) -> Self {
        self.type_name = type_name.to_string();
        self
    }

    /// Set the three probe method names
    #[must_use]
    pub fn with_methods(mut self, enter: &str, exit: &str, exit_with_exception: &str) -> Self {
        self.enter = enter.to_string();
        self.exit = exit.to_string();
        self.exit_with_exception = exit_with_exception.to_string();
        self
    }

    /// Member reference request for the entry probe
    #[must_use]
    pub fn enter(&self) -> TokenRequest {
        self.member(&self.enter, &ENTER_SIGNATURE)
    }

    /// Member reference request for the exit probe
    #[must_use]
    pub fn exit(&self) -> TokenRequest {
        self.member(&self.exit, &EXIT_SIGNATURE)
    }

    /// Member reference request for the exception probe
    #[must_use]
    pub fn exit_with_exception(&self) -> TokenRequest {
        self.member(&self.exit_with_exception, &EXIT_SIGNATURE)
    }

    fn member(&self, name: &str, signature: &[u8]) -> TokenRequest {
        TokenRequest::MemberRef {
            assembly: self.assembly.clone(),
            type_name: self.type_name.clone(),
            name: name.to_string(),
            signature: signature.to_vec(),
        }
    }
}
