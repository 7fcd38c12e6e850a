//! Error types and error handling strategy for twinpool.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Errors raised while posting are returned synchronously, before the
//!   task is enqueued
//! - Errors raised during task execution resolve the task's future and,
//!   for chains, flow to the next error-handling link

use core::fmt;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Illegal queue id or sentinel combination, or an out-of-range id.
    InvalidArgument,
    /// Operation not legal in the current state: chaining a sealed or
    /// non-chainable context, posting after terminate or during drain,
    /// draining from within a task.
    InvalidState,
    /// Allocation failed in both the slab and the heap.
    ResourceExhausted,
    /// The task was abandoned by `terminate` before it could finish.
    Terminated,
    /// The task finished successfully without ever fulfilling its promise.
    BrokenPromise,
    /// The task returned a non-zero status code.
    User(i32),
}

/// The error type for all twinpool operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Creates an error carrying a user status code.
    #[must_use]
    pub const fn user(code: i32) -> Self {
        Self::new(ErrorKind::User(code))
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the user status code, if this is a user error.
    #[must_use]
    pub const fn user_code(&self) -> Option<i32> {
        match self.kind {
            ErrorKind::User(code) => Some(code),
            _ => None,
        }
    }

    /// Returns true if the task was abandoned by `terminate`.
    #[must_use]
    pub const fn is_terminated(&self) -> bool {
        matches!(self.kind, ErrorKind::Terminated)
    }

    /// Adds context text to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::User(code) => write!(f, "User({code})")?,
            kind => write!(f, "{kind:?}")?,
        }
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
