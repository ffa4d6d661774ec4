//! # cilweave Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the cilweave library. Import this module to get quick access to the types needed to
//! wire the engine into a host.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all cilweave operations
pub use crate::Error;

/// The result type used throughout cilweave
pub use crate::Result;

/// Low-level parsing utilities
pub use crate::Parser;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// Host callback surface
pub use crate::runtime::{CallbackStatus, RuntimeEventBridge};

/// Module state machine and pass configuration
pub use crate::injector::{
    InjectionPhase, InjectionReport, InjectorConfig, MethodOutcome, ModuleInjector, ModuleState,
    SkipReason,
};

// ================================================================================================
// Host Abstraction
// ================================================================================================

/// Modules as seen through the host runtime
pub use crate::module::{CommitRecord, InMemoryModule, LoadState, Module, ModuleId, TokenRange};

// ================================================================================================
// Metadata
// ================================================================================================

/// Metadata token type for referencing table entries
pub use crate::metadata::token::{TableId, Token};

/// Method rows, bodies and descriptors
pub use crate::metadata::method::{
    ExceptionHandler, HandlerKind, MethodAttributes, MethodBody, MethodDef, MethodDescriptor,
};

/// Signatures
pub use crate::metadata::signatures::{SignatureMethod, TypeSignature};

/// Method token resolution
pub use crate::metadata::reader::MetadataReader;

// ================================================================================================
// Policy, Rewriting and Tokens
// ================================================================================================

/// Instrumentation rules
pub use crate::policy::{decide, InstrumentationDecision, QualifiedMethod, Rule, RuleSet};

/// Rewrite planning and emission
pub use crate::rewriter::{verify_rewrite, ProbeSet, RewritePlan, RewrittenBody, Rewriter};

/// Token minting
pub use crate::tokens::{TokenAllocation, TokenAllocator, TokenRequest};

// ================================================================================================
// Instruction Layer
// ================================================================================================

/// Instruction decoding and encoding
pub use crate::assembly::{
    decode_stream, FlowType, Instruction, InstructionEncoder, MethodBodyBuilder, Operand,
};
