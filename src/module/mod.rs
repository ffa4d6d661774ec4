//! The module abstraction the engine rewrites through.
//!
//! The host runtime owns modules; the engine only sees them through the [`Module`] capability
//! trait: enumerate method rows, read bodies and signature blobs, mint tokens, and replace method
//! bodies. [`InMemoryModule`] is a complete in-process implementation used by the tests,
//! benchmarks and embedders without a live runtime.

mod memory;

pub use memory::{CommitRecord, InMemoryModule};

use std::fmt;

use crate::{
    metadata::{
        method::MethodDef,
        token::{TableId, Token},
    },
    tokens::TokenRequest,
    Result,
};

/// Identity of a loaded module, as assigned by the host runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleId(pub u64);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module#{:x}", self.0)
    }
}

/// Load state of a module as the host reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// Load notification received, metadata may not be queryable yet
    Loading,
    /// Metadata is queryable
    Loaded,
    /// Unload in progress
    Unloading,
}

/// Number of rows (or heap size, for user strings) a table held when scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenRange {
    /// The table
    pub table: TableId,
    /// Rows in use; valid rows are `1..=rows`
    pub rows: u32,
}

/// Capabilities the engine needs from a loaded module.
///
/// Implementations must be usable from several threads: the injector reads method bodies and
/// signatures in parallel while planning. Token allocation and commits are only ever issued from
/// one thread per module at a time.
pub trait Module: Send + Sync {
    /// Identity of the module
    fn id(&self) -> ModuleId;

    /// Simple assembly name, used for rule matching
    fn name(&self) -> &str;

    /// Current load state
    fn load_state(&self) -> LoadState {
        LoadState::Loaded
    }

    /// Every `MethodDef` row of the module, in token order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MetadataCorrupt`] if the method table cannot be read.
    fn enumerate_methods(&self) -> Result<Vec<MethodDef>>;

    /// The `MethodDef` row of `token`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::TokenNotFound`] for unknown tokens.
    fn method_def(&self, token: Token) -> Result<MethodDef> {
        self.enumerate_methods()?
            .into_iter()
            .find(|method| method.token == token)
            .ok_or(crate::Error::TokenNotFound(token))
    }

    /// The current body of a method: header, code and extra sections.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::TokenNotFound`] if the method has no body.
    fn method_body(&self, token: Token) -> Result<Vec<u8>>;

    /// The blob behind a `StandAloneSig` or `TypeSpec` token.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::TokenNotFound`] for unknown tokens.
    fn signature_blob(&self, token: Token) -> Result<Vec<u8>>;

    /// Row counts of the tables the engine mints tokens in.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MetadataCorrupt`] if the table headers cannot be read.
    fn token_ranges(&self) -> Result<Vec<TokenRange>>;

    /// Create the metadata a request describes and return its token.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::TokenSpaceExhausted`] if the table is full.
    fn allocate_token(&self, request: &TokenRequest) -> Result<Token>;

    /// Replace a method body, together with its new local signature token.
    ///
    /// The replacement must become visible to the runtime as a whole.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::CommitRejected`] if the body cannot be replaced.
    fn commit_method_body(&self, token: Token, body: &[u8], locals: Option<Token>) -> Result<()>;

    /// Full name of a `TypeDef` or `TypeRef`, used to render parameter lists
    fn type_name(&self, _token: Token) -> Option<String> {
        None
    }
}
