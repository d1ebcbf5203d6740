// This file is part of Cinedex, a movie catalog service.
// Copyright (C) 2026 The Cinedex Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Owned movie record types.

/// A full movie record.
///
/// `id == 0` means "not yet assigned" and only appears on records built from
/// client input; [`crate::Connection::register_movie`] replaces it with the
/// database-assigned id, which is positive and immutable from then on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Movie {
    pub id: i64,
    pub title: String,
    pub director: String,
    pub release_year: i32,
    pub genres: Vec<String>,
}

/// Lightweight `{id, title}` listing entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MovieSummary {
    pub id: i64,
    pub title: String,
}
