// This file is part of Cinedex, a movie catalog service.
// Copyright (C) 2026 The Cinedex Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-3.0-or-later

use std::borrow::Cow;
use std::fmt;

/// Fallback message when an [`Error`] carries neither a message nor a source.
pub const UNKNOWN_ERROR: &str = "unknown error";

/// Recoverability class of an [`Error`].
///
/// Every failure in the system reduces to one of these three classes; they
/// decide whether the caller retries, reports to the client, or tears down
/// the worker that hit the error.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Transient condition (busy/locked engine, transient I/O, out of
    /// memory); the operation is safe to retry.
    Runtime,

    /// Invalid input (constraint violation, missing id, malformed request);
    /// retrying the same request will fail the same way. Reported to the
    /// client, never retried.
    User,

    /// The owning connection is no longer usable (corruption, permission,
    /// engine misuse). The worker that sees this must stop.
    Hard,
}

impl ErrorKind {
    #[inline]
    pub fn is_hard(self) -> bool {
        self == ErrorKind::Hard
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Runtime => "runtime error",
            ErrorKind::User => "user error",
            ErrorKind::Hard => "hard error",
        })
    }
}

/// An error with a recoverability class, an optional message, and an
/// optional underlying cause.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    msg: Option<Box<str>>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Error {
            kind,
            msg: Some(msg.into().into_boxed_str()),
            source: None,
        }
    }

    /// Wraps a foreign error, keeping it as the source.
    pub fn wrap<E>(kind: ErrorKind, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error {
            kind,
            msg: None,
            source: Some(Box::new(source)),
        }
    }

    /// Wraps a foreign error with an explicit message.
    pub fn wrap_msg<E>(kind: ErrorKind, msg: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error {
            kind,
            msg: Some(msg.into().into_boxed_str()),
            source: Some(Box::new(source)),
        }
    }

    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[inline]
    pub fn msg(&self) -> Option<&str> {
        self.msg.as_deref()
    }

    /// The single-line message reported to clients: the explicit message if
    /// any, the source's otherwise, and the [`UNKNOWN_ERROR`] sentinel when
    /// neither is available.
    pub fn message(&self) -> Cow<'_, str> {
        if let Some(m) = self.msg.as_deref() {
            return Cow::Borrowed(m);
        }
        if let Some(s) = self.source.as_deref() {
            return Cow::Owned(s.to_string());
        }
        Cow::Borrowed(UNKNOWN_ERROR)
    }

    /// Returns an adapter that displays the error with its full cause chain,
    /// for logging.
    pub fn chain(&self) -> Chain<'_> {
        Chain(self)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Displays an [`Error`] as `<kind>: <msg>` followed by each cause.
pub struct Chain<'a>(&'a Error);

impl fmt::Display for Chain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.0.kind, self.0.message())?;
        if self.0.msg.is_some() {
            // `message()` already covered the no-msg case with the source.
            let mut cause = self.0.source.as_deref().map(|e| e as &dyn std::error::Error);
            while let Some(e) = cause {
                write!(f, ": caused by: {e}")?;
                cause = e.source();
            }
        }
        Ok(())
    }
}

impl From<crate::alloc::AllocError> for Error {
    fn from(e: crate::alloc::AllocError) -> Error {
        Error::wrap(ErrorKind::Runtime, e)
    }
}

/// Extension methods for `Result`.
pub trait ResultExt<T> {
    /// Annotates an error with the given kind.
    ///
    /// Example:
    /// ```
    /// use cinedex_base::{ErrorKind, ResultExt};
    /// use std::io::Read;
    /// let mut buf = [0u8; 1];
    /// let r = std::io::Cursor::new("").read_exact(&mut buf[..]).err_kind(ErrorKind::Hard);
    /// assert_eq!(r.unwrap_err().kind(), ErrorKind::Hard);
    /// ```
    fn err_kind(self, k: ErrorKind) -> Result<T, Error>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn err_kind(self, k: ErrorKind) -> Result<T, Error> {
        self.map_err(|e| Error::wrap(k, e))
    }
}

/// Constructs an [`Error`] of the given kind with a formatted message.
///
/// Example:
/// ```
/// let e = cinedex_base::err!(User, "no movie with id = {}", 42);
/// assert_eq!(e.kind(), cinedex_base::ErrorKind::User);
/// assert_eq!(e.to_string(), "no movie with id = 42");
/// ```
#[macro_export]
macro_rules! err {
    ($k:ident, $($arg:tt)+) => {
        $crate::Error::new($crate::ErrorKind::$k, format!($($arg)+))
    };
}

/// Like [`err!`], but returns the error from the enclosing function.
///
/// Example:
/// ```
/// use cinedex_base::bail;
/// let e = || -> Result<(), cinedex_base::Error> {
///     bail!(Hard, "statement left in unusable state");
/// }()
/// .unwrap_err();
/// assert_eq!(e.kind(), cinedex_base::ErrorKind::Hard);
/// ```
#[macro_export]
macro_rules! bail {
    ($k:ident, $($arg:tt)+) => {
        return Err($crate::err!($k, $($arg)+))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_prefers_explicit_msg() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let e = Error::wrap_msg(ErrorKind::Runtime, "flush failed", io);
        assert_eq!(e.message(), "flush failed");
        assert_eq!(e.chain().to_string(), "runtime error: flush failed: caused by: disk on fire");
    }

    #[test]
    fn message_falls_back_to_source_then_sentinel() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let e = Error::wrap(ErrorKind::Hard, io);
        assert_eq!(e.message(), "disk on fire");

        let bare = Error {
            kind: ErrorKind::User,
            msg: None,
            source: None,
        };
        assert_eq!(bare.message(), UNKNOWN_ERROR);
    }

    #[test]
    fn macros_set_kind() {
        let e = err!(Runtime, "busy after {} tries", 3);
        assert_eq!(e.kind(), ErrorKind::Runtime);
        assert!(!e.kind().is_hard());
        assert_eq!(e.msg(), Some("busy after 3 tries"));
        assert!(ErrorKind::Hard.is_hard());
    }
}
