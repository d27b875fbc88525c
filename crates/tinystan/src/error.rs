//! Error taxonomy for the binding layer.
//!
//! Failures inside the interop layer itself (resolving, compiling, loading)
//! carry a stable `tinystan:` prefix. Messages that originate in the native
//! library are passed through verbatim so they can be matched on.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::options::Algorithm;

pub type Result<T> = std::result::Result<T, TinyStanError>;

/// Category reported by `tinystan_get_error_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeErrorKind {
    /// A generic runtime failure inside Stan.
    Runtime,
    /// Invalid input detected by Stan (bad data, bad inits, bad arguments).
    Value,
    /// The native algorithm was interrupted.
    Interrupt,
}

impl NativeErrorKind {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => NativeErrorKind::Value,
            2 => NativeErrorKind::Interrupt,
            _ => NativeErrorKind::Runtime,
        }
    }
}

impl fmt::Display for NativeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NativeErrorKind::Runtime => "runtime",
            NativeErrorKind::Value => "value",
            NativeErrorKind::Interrupt => "interrupt",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum TinyStanError {
    /// Host-side validation failed; the native library was never called.
    #[error("invalid argument '{option}': {message}")]
    Argument {
        option: &'static str,
        message: String,
    },

    #[error("tinystan: no model source or compiled library found at '{}'", .0.display())]
    NotFound(PathBuf),

    #[error("could not open '{}': {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("tinystan: compilation of '{}' failed ({status})\nstdout:\n{stdout}\nstderr:\n{stderr}", .path.display())]
    Compilation {
        path: PathBuf,
        status: String,
        stdout: String,
        stderr: String,
    },

    #[error("tinystan: failed to load library '{}': {source}", .path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("tinystan: library '{}' is missing entry point '{symbol}': {source}", .path.display())]
    Symbol {
        path: PathBuf,
        symbol: &'static str,
        #[source]
        source: libloading::Error,
    },

    /// The native constructor rejected the data payload.
    #[error("{message}")]
    Construction {
        kind: NativeErrorKind,
        message: String,
    },

    /// The algorithm call itself reported failure.
    #[error("{message}")]
    Invocation {
        algorithm: Algorithm,
        kind: NativeErrorKind,
        message: String,
    },

    /// Non-zero return code without an error object.
    #[error("Unknown error, function returned code {code}")]
    Unknown { code: i32 },

    #[error("Model has no parameters to run {algorithm}.")]
    NoParameters { algorithm: Algorithm },

    #[error("tinystan: session is {state}, expected {expected}")]
    SessionState {
        state: &'static str,
        expected: &'static str,
    },

    #[error("tinystan: configuration error: {0}")]
    Config(String),

    #[error("tinystan: {0}")]
    Io(#[from] std::io::Error),
}

impl TinyStanError {
    pub(crate) fn argument(option: &'static str, message: impl Into<String>) -> Self {
        TinyStanError::Argument {
            option,
            message: message.into(),
        }
    }

    /// Name of the offending option for argument errors.
    pub fn option(&self) -> Option<&'static str> {
        match self {
            TinyStanError::Argument { option, .. } => Some(option),
            _ => None,
        }
    }

    /// Native error category, when the failure came from the native side.
    pub fn native_kind(&self) -> Option<NativeErrorKind> {
        match self {
            TinyStanError::Construction { kind, .. } | TinyStanError::Invocation { kind, .. } => {
                Some(*kind)
            }
            _ => None,
        }
    }

    /// True for failures inside the interop layer rather than inside Stan.
    pub fn is_boundary_error(&self) -> bool {
        matches!(
            self,
            TinyStanError::NotFound(_)
                | TinyStanError::Compilation { .. }
                | TinyStanError::Load { .. }
                | TinyStanError::Symbol { .. }
                | TinyStanError::SessionState { .. }
                | TinyStanError::Config(_)
                | TinyStanError::Io(_)
        )
    }
}
