use std::fmt;
use std::io;

/// Symbolic error kinds surfaced by the reactor and its handle types.
///
/// These mirror the taxonomy of the C library this crate's design is
/// grounded in: callers branch on `Kind`, never on the textual
/// description carried alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// No error; used internally, never returned from a fallible call.
    None,
    /// A system call failed; the wrapped `io::Error` carries the OS detail.
    Os,
    /// An internal library invariant was violated.
    Lib,
    /// A third-party dependency reported failure.
    ThirdParty,
    /// The operation referenced an object that does not exist (e.g. a
    /// `SocketCache` send while disconnected).
    NoObject,
    /// A runtime precondition was not met.
    Runtime,
    /// Not a failure: signals that the wait loop should stop.
    Continue,
    /// A parser encountered malformed input.
    Parser,
    /// The requested item could not be found.
    NotFound,
    /// A required parameter was missing.
    MissingParam,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::None => "none",
            Kind::Os => "os",
            Kind::Lib => "lib",
            Kind::ThirdParty => "third-party",
            Kind::NoObject => "no-object",
            Kind::Runtime => "runtime",
            Kind::Continue => "continue",
            Kind::Parser => "parser",
            Kind::NotFound => "not-found",
            Kind::MissingParam => "missing-param",
        };
        f.write_str(s)
    }
}

/// An error produced by the reactor or one of its handle types.
///
/// Carries a symbolic [`Kind`] plus a human-readable description sourced
/// from the OS or the call site. The description is for display only;
/// do not parse it.
#[derive(Debug, thiserror::Error)]
pub struct Error {
    kind: Kind,
    message: String,
    #[source]
    source: Option<io::Error>,
}

impl Error {
    pub fn new(kind: Kind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Build an [`Kind::Os`] error from the calling thread's `errno`
    /// (`std::io::Error::last_os_error`), matching `cape_err_lastOSError`.
    pub fn last_os_error() -> Self {
        Self::from_io(io::Error::last_os_error())
    }

    pub fn from_io(err: io::Error) -> Self {
        Error {
            kind: Kind::Os,
            message: err.to_string(),
            source: Some(err),
        }
    }

    pub fn continue_stop() -> Self {
        Error::new(Kind::Continue, "wait loop stopped")
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn is_continue(&self) -> bool {
        self.kind == Kind::Continue
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::from_io(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let err = Error::new(Kind::NoObject, "socket is not connected");
        assert_eq!(err.to_string(), "[no-object] socket is not connected");
    }

    #[test]
    fn continue_is_recognised() {
        let err = Error::continue_stop();
        assert!(err.is_continue());
        assert_eq!(err.kind(), Kind::Continue);
    }

    #[test]
    fn from_io_preserves_os_kind() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        let err: Error = io_err.into();
        assert_eq!(err.kind(), Kind::Os);
    }
}
