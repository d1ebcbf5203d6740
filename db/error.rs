// This file is part of Cinedex, a movie catalog service.
// Copyright (C) 2026 The Cinedex Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Reduction of SQLite result codes to recoverability classes.
//!
//! Connections are opened with extended result codes enabled, so every
//! engine failure reaches us with its most specific code. Extended-code
//! exceptions are matched first, then the primary-code family decides, and
//! anything unrecognized lands in the report-to-client bucket.

use base::{Error, ErrorKind};
use std::os::raw::c_int;

/// Maps one SQLite result code (extended where available) to a class.
pub(crate) fn kind_of(code: c_int) -> ErrorKind {
    use rusqlite::ffi::*;

    // Extended codes that deviate from their family default.
    match code {
        // I/O failures that a fresh attempt can survive.
        SQLITE_IOERR_ACCESS | SQLITE_IOERR_DELETE | SQLITE_IOERR_DELETE_NOENT
        | SQLITE_IOERR_NOMEM | SQLITE_IOERR_RDLOCK | SQLITE_IOERR_SEEK | SQLITE_IOERR_SHMLOCK
        | SQLITE_IOERR_SHMMAP | SQLITE_IOERR_SHMOPEN | SQLITE_IOERR_SHMSIZE
        | SQLITE_IOERR_TRUNCATE => return ErrorKind::Runtime,
        SQLITE_ERROR_RETRY | SQLITE_ERROR_SNAPSHOT => return ErrorKind::Runtime,
        // The bare code usually means a transient open failure; the extended
        // CANTOPEN_* variants below mean the path itself is bad.
        SQLITE_CANTOPEN => return ErrorKind::Runtime,
        _ => {}
    }

    match code & 0xff {
        SQLITE_ABORT | SQLITE_BUSY | SQLITE_FULL | SQLITE_IOERR | SQLITE_LOCKED | SQLITE_NOLFS
        | SQLITE_NOMEM | SQLITE_PROTOCOL | SQLITE_ROW | SQLITE_SCHEMA => ErrorKind::Runtime,
        SQLITE_CANTOPEN | SQLITE_CORRUPT | SQLITE_INTERNAL | SQLITE_INTERRUPT | SQLITE_MISUSE
        | SQLITE_NOTADB | SQLITE_NOTFOUND | SQLITE_PERM | SQLITE_READONLY => ErrorKind::Hard,
        // Constraint violations, auth denials, generic errors, range/type
        // mismatches, notices, and anything unknown.
        _ => ErrorKind::User,
    }
}

/// Converts a raw engine error into a classified [`Error`] carrying the
/// engine's message.
pub(crate) fn classify(e: rusqlite::Error) -> Error {
    let kind = match &e {
        rusqlite::Error::SqliteFailure(f, _) => kind_of(f.extended_code),
        // Anything that is not an engine result code means the statement or
        // its bindings are not in a usable state.
        _ => ErrorKind::Hard,
    };
    Error::wrap(kind, e)
}

/// Extension methods for `rusqlite::Result`.
pub(crate) trait DbResultExt<T> {
    /// Classifies the engine error per the code tables above.
    fn classify(self) -> Result<T, Error>;
}

impl<T> DbResultExt<T> for rusqlite::Result<T> {
    fn classify(self) -> Result<T, Error> {
        self.map_err(classify)
    }
}
