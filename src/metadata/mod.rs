//! Metadata needed to rewrite methods safely.
//!
//! - [`token`] - metadata tokens and table identifiers
//! - [`signatures`] - method, local and type specification signature blobs
//! - [`method`] - method rows, body headers, exception handler tables and descriptors
//! - [`reader`] - the Metadata Reader, resolving a method token into a [`method::MethodDescriptor`]

pub mod method;
pub mod reader;
pub mod signatures;
pub mod token;
