use thiserror::Error;

use crate::metadata::token::Token;
use crate::module::ModuleId;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::MetadataCorrupt {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::MetadataCorrupt {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! unsupported_error {
    ($msg:expr) => {
        crate::Error::UnsupportedConstruct($msg.to_string())
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::UnsupportedConstruct(format!($fmt, $($arg)*))
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants fall into two groups. The first six form the injection taxonomy that the
/// [`crate::injector::ModuleInjector`] reacts to:
///
/// - [`Error::MetadataCorrupt`], [`Error::TokenNotFound`] and [`Error::UnsupportedConstruct`] are
///   contained to the method that caused them; the method is left untouched and skipped.
/// - [`Error::TokenSpaceExhausted`] and [`Error::CommitRejected`] abort the remaining methods of
///   the current module pass. Commits that already happened stay in place.
/// - [`Error::DuplicateInjection`] is a contract violation of the caller and is returned to it.
///
/// The remaining variants come from the byte level parsers, the instruction encoder and the rule
/// set loader.
///
/// # Examples
///
/// ```rust
/// use cilweave::Error;
///
/// fn contained(error: &Error) -> bool {
///     matches!(
///         error,
///         Error::MetadataCorrupt { .. } | Error::TokenNotFound(_) | Error::UnsupportedConstruct(_)
///     )
/// }
///
/// assert!(contained(&Error::UnsupportedConstruct("jmp".into())));
/// assert!(!contained(&Error::TokenSpaceExhausted(0x0A)));
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// Metadata or a method body could not be parsed completely.
    ///
    /// The reader never hands out a partial exception handler list; any structural inconsistency
    /// ends up here. The error includes the source location where the problem was detected.
    #[error("Metadata corrupt - {file}:{line}: {message}")]
    MetadataCorrupt {
        /// The message to be printed for the MetadataCorrupt error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A token could not be resolved by the module.
    #[error("Token not found - {0}")]
    TokenNotFound(Token),

    /// The method body contains something the rewriter cannot re-target safely.
    #[error("Unsupported construct - {0}")]
    UnsupportedConstruct(String),

    /// No free row is left in the given metadata table (the raw table id).
    #[error("Token space exhausted for table 0x{0:02X}")]
    TokenSpaceExhausted(u8),

    /// The module abstraction refused to replace a method body.
    #[error("Commit rejected for {token} - {reason}")]
    CommitRejected {
        /// The method whose body was refused
        token: Token,
        /// Reason reported by the module
        reason: String,
    },

    /// A module, or a method of it, was handed to the injector a second time.
    #[error("Duplicate injection into {module}{}", .method.map(|m| format!(" ({m})")).unwrap_or_default())]
    DuplicateInjection {
        /// The module that was already processed
        module: ModuleId,
        /// The method, when the duplicate was a JIT notification
        method: Option<Token>,
    },

    /// An out of bound access was attempted while parsing.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// Recursion limit reached while parsing a signature.
    #[error("Reached the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),

    /// The instruction encoder was given an unknown mnemonic.
    #[error("Invalid instruction mnemonic - {0}")]
    InvalidMnemonic(String),

    /// The instruction encoder was given an operand of the wrong shape.
    #[error("Invalid operand for {mnemonic} - expected {expected}")]
    InvalidOperand {
        /// The instruction being encoded
        mnemonic: &'static str,
        /// Operand kind the instruction requires
        expected: String,
    },

    /// A branch could not be encoded (unknown label or out of range).
    #[error("Invalid branch - {0}")]
    InvalidBranch(String),

    /// A rule set was rejected while loading.
    #[error("Invalid rule set - {0}")]
    RuleSet(String),

    /// The rule set XML was not well formed.
    #[error("{0}")]
    Xml(#[from] quick_xml::Error),

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` for errors that only affect the method they were raised for.
    ///
    /// The injector downgrades such methods to Skip and continues with the rest of the module.
    #[must_use]
    pub fn is_method_local(&self) -> bool {
        matches!(
            self,
            Error::MetadataCorrupt { .. }
                | Error::TokenNotFound(_)
                | Error::UnsupportedConstruct(_)
                | Error::OutOfBounds
                | Error::RecursionLimit(_)
                | Error::InvalidOperand { .. }
                | Error::InvalidBranch(_)
                | Error::InvalidMnemonic(_)
        )
    }

    /// Returns `true` for errors that end the current module pass.
    #[must_use]
    pub fn aborts_pass(&self) -> bool {
        matches!(
            self,
            Error::TokenSpaceExhausted(_) | Error::CommitRejected { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_error_captures_location() {
        let error = malformed_error!("bad section at {}", 12);
        match error {
            Error::MetadataCorrupt {
                message,
                file,
                line,
            } => {
                assert_eq!(message, "bad section at 12");
                assert!(file.ends_with("error.rs"));
                assert!(line > 0);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_error_classes() {
        assert!(Error::TokenNotFound(Token::new(0x1100_0001)).is_method_local());
        assert!(unsupported_error!("jmp at {}", 4).is_method_local());
        assert!(Error::TokenSpaceExhausted(0x0A).aborts_pass());
        assert!(Error::CommitRejected {
            token: Token::new(0x0600_0001),
            reason: "locked".into()
        }
        .aborts_pass());

        let duplicate = Error::DuplicateInjection {
            module: ModuleId(7),
            method: None,
        };
        assert!(!duplicate.is_method_local());
        assert!(!duplicate.aborts_pass());
    }

    #[test]
    fn test_duplicate_display() {
        let with_method = Error::DuplicateInjection {
            module: ModuleId(3),
            method: Some(Token::new(0x0600_0002)),
        };
        let text = with_method.to_string();
        assert!(text.contains("0x06000002"), "{text}");

        let without = Error::DuplicateInjection {
            module: ModuleId(3),
            method: None,
        };
        assert!(!without.to_string().contains('('));
    }
}
