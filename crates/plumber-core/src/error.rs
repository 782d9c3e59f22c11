//! Crate-wide error envelope.
//!
//! Mirrors the teacher's `CoreError` shape: a stable `&'static str` code plus
//! a human-readable message plus an optional boxed cause, with a structured
//! [`ErrorCategory`] attached so callers can match on disposition instead of
//! parsing the code string. See spec.md §7 for the error-kind taxonomy this
//! type carries.

use std::borrow::Cow;
use std::fmt;

/// Stable, dotted error codes. Follows the `<domain>.<reason>` convention.
pub mod codes {
    pub const PIPE_IO_ERROR: &str = "pipe.io_error";
    pub const PIPE_OWNERSHIP_TRANSFERRED: &str = "pipe.ownership_transferred";
    pub const PIPE_WOULD_BLOCK: &str = "pipe.would_block";
    pub const SCOPE_TOKEN_INVALID: &str = "scope.token_invalid";
    pub const SCOPE_COPY_UNSUPPORTED: &str = "scope.copy_unsupported";
    pub const GRAPH_CYCLE: &str = "graph.cycle";
    pub const GRAPH_UNREACHABLE: &str = "graph.unreachable";
    pub const GRAPH_TYPE_MISMATCH: &str = "graph.type_mismatch";
    pub const GRAPH_DANGLING_INPUT: &str = "graph.dangling_input";
    pub const GRAPH_DANGLING_SHADOW: &str = "graph.dangling_shadow";
    pub const SERVLET_ERROR: &str = "servlet.error";
    pub const RESOURCE_EXHAUSTED: &str = "resource.exhausted";
    pub const MODULE_NOT_FOUND: &str = "module.not_found";
    pub const MODULE_DUPLICATE: &str = "module.duplicate";
    pub const USAGE_INVALID_ARGUMENT: &str = "usage.invalid_argument";
    pub const RUNTIME_FATAL: &str = "runtime.fatal";
}

/// Disposition attached to a [`PlumberError`], matching spec.md §7's kinds.
#[derive(Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// Invalid arguments from a caller; reported to that caller, no cascade.
    Usage,
    /// Transport failure; the owning pipe is marked faulty, owning task fails.
    ModuleIo,
    /// A module write failed but consumed its argument; caller must not
    /// touch the argument again (spec.md §4.5, §7).
    OwnershipTransfer,
    /// Queue full / pool empty; producer is back-pressured or request aborted.
    ResourceExhausted,
    /// A servlet returned non-zero; the request aborts, others unaffected.
    Servlet,
    /// Invariant violated; the process should log and exit.
    Fatal,
}

#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct PlumberError {
    code: &'static str,
    message: Cow<'static, str>,
    category: ErrorCategory,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl PlumberError {
    pub fn new(
        code: &'static str,
        category: ErrorCategory,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            category,
            cause: None,
        }
    }

    pub fn with_cause(
        mut self,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn usage(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::USAGE_INVALID_ARGUMENT, ErrorCategory::Usage, message)
    }

    pub fn module_io(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::PIPE_IO_ERROR, ErrorCategory::ModuleIo, message)
    }

    pub fn ownership_transferred(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(
            codes::PIPE_OWNERSHIP_TRANSFERRED,
            ErrorCategory::OwnershipTransfer,
            message,
        )
    }

    pub fn resource_exhausted(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(
            codes::RESOURCE_EXHAUSTED,
            ErrorCategory::ResourceExhausted,
            message,
        )
    }

    pub fn servlet(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::SERVLET_ERROR, ErrorCategory::Servlet, message)
    }

    pub fn fatal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::RUNTIME_FATAL, ErrorCategory::Fatal, message)
    }
}

impl fmt::Debug for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Usage => "usage",
            ErrorCategory::ModuleIo => "module_io",
            ErrorCategory::OwnershipTransfer => "ownership_transfer",
            ErrorCategory::ResourceExhausted => "resource_exhausted",
            ErrorCategory::Servlet => "servlet",
            ErrorCategory::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

pub type Result<T, E = PlumberError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_and_category_round_trip() {
        let err = PlumberError::module_io("write failed");
        assert_eq!(err.code(), codes::PIPE_IO_ERROR);
        assert_eq!(err.category(), ErrorCategory::ModuleIo);
        assert_eq!(err.message(), "write failed");
    }

    #[test]
    fn cause_chain_is_reachable() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = PlumberError::module_io("wrapped").with_cause(io_err);
        assert!(std::error::Error::source(&err).is_some());
    }
}
