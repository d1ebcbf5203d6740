// This file is part of Cinedex, a movie catalog service.
// Copyright (C) 2026 The Cinedex Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Reusable arena for assembling movie records out of row data.
//!
//! Row streaming writes string slices into one packed byte buffer and records
//! fixed-size descriptors of offsets into it, so building a listing costs a
//! handful of page-sized allocations rather than one per field. Owned
//! [`Movie`]/[`MovieSummary`] values are materialized on demand; descriptors
//! hold offsets, never pointers, so buffer growth cannot invalidate them.

use crate::movie::{Movie, MovieSummary};
use base::alloc::{self, AllocError};

/// Descriptor-list growth step.
const SLOT_STEP: usize = 128;

const HAS_ID: u8 = 1 << 0;
const HAS_TITLE: u8 = 1 << 1;
const HAS_DIRECTOR: u8 = 1 << 2;
const HAS_YEAR: u8 = 1 << 3;
const HAS_GENRES: u8 = 1 << 4;
const HAS_MOVIE: u8 = HAS_ID | HAS_TITLE | HAS_DIRECTOR | HAS_YEAR | HAS_GENRES;
const HAS_SUMMARY: u8 = HAS_ID | HAS_TITLE;

/// A string slice in `str_data`, addressed by offset and byte length.
#[derive(Clone, Copy, Debug, Default)]
struct StrRef {
    off: u32,
    len: u32,
}

/// Fixed-size descriptor of one in-progress or committed record.
#[derive(Clone, Copy, Debug, Default)]
struct Slot {
    id: i64,
    title: StrRef,
    director: StrRef,
    release_year: i32,
    /// First index in `genre_refs`; `genres_len` entries follow.
    genres_start: u32,
    genres_len: u32,
    has: u8,
}

pub struct MovieBuilder {
    /// Concatenated UTF-8 payloads of every string appended since the last
    /// reset. Grows a page at a time.
    str_data: Vec<u8>,
    /// Genre slice table shared by all descriptors.
    genre_refs: Vec<StrRef>,
    current: Slot,
    slots: Vec<Slot>,
}

impl MovieBuilder {
    /// Creates a builder with one page of string storage pre-reserved.
    pub fn create() -> Result<Self, AllocError> {
        let mut str_data = Vec::new();
        alloc::reserve_pages(&mut str_data, 1)?;
        Ok(MovieBuilder {
            str_data,
            genre_refs: Vec::new(),
            current: Slot::default(),
            slots: Vec::new(),
        })
    }

    /// Forgets all appended strings and committed descriptors. Capacity is
    /// retained for reuse.
    pub fn reset(&mut self) {
        self.str_data.clear();
        self.genre_refs.clear();
        self.slots.clear();
        self.current = Slot::default();
    }

    fn append_str(&mut self, s: &str) -> Result<StrRef, AllocError> {
        let off = u32::try_from(self.str_data.len()).map_err(|_| AllocError)?;
        let len = u32::try_from(s.len()).map_err(|_| AllocError)?;
        off.checked_add(len).ok_or(AllocError)?;
        alloc::reserve_pages(&mut self.str_data, s.len())?;
        self.str_data.extend_from_slice(s.as_bytes());
        Ok(StrRef { off, len })
    }

    fn str_at(&self, r: StrRef) -> &str {
        let bytes = &self.str_data[r.off as usize..(r.off + r.len) as usize];
        // SAFETY: `append_str` only ever copies whole `&str` payloads and the
        // returned refs address exactly those byte ranges.
        unsafe { std::str::from_utf8_unchecked(bytes) }
    }

    pub fn set_id(&mut self, id: i64) {
        debug_assert_eq!(self.current.has & HAS_ID, 0);
        self.current.id = id;
        self.current.has |= HAS_ID;
    }

    pub fn set_title(&mut self, title: &str) -> Result<(), AllocError> {
        debug_assert_eq!(self.current.has & HAS_TITLE, 0);
        self.current.title = self.append_str(title)?;
        self.current.has |= HAS_TITLE;
        Ok(())
    }

    pub fn set_director(&mut self, director: &str) -> Result<(), AllocError> {
        debug_assert_eq!(self.current.has & HAS_DIRECTOR, 0);
        self.current.director = self.append_str(director)?;
        self.current.has |= HAS_DIRECTOR;
        Ok(())
    }

    pub fn set_release_year(&mut self, year: i32) {
        debug_assert_eq!(self.current.has & HAS_YEAR, 0);
        self.current.release_year = year;
        self.current.has |= HAS_YEAR;
    }

    pub fn start_genres(&mut self) {
        debug_assert_eq!(self.current.has & HAS_GENRES, 0);
        self.current.genres_start = self.genre_refs.len() as u32;
        self.current.genres_len = 0;
        self.current.has |= HAS_GENRES;
    }

    /// Appends one genre to the current record. `start_genres` must have been
    /// called first.
    pub fn add_genre(&mut self, genre: &str) -> Result<(), AllocError> {
        debug_assert_ne!(self.current.has & HAS_GENRES, 0);
        let r = self.append_str(genre)?;
        alloc::reserve_step(&mut self.genre_refs, SLOT_STEP)?;
        self.genre_refs.push(r);
        self.current.genres_len += 1;
        Ok(())
    }

    fn movie_from(&self, slot: &Slot) -> Movie {
        debug_assert_eq!(slot.has, HAS_MOVIE);
        let start = slot.genres_start as usize;
        let genres = self.genre_refs[start..start + slot.genres_len as usize]
            .iter()
            .map(|&r| self.str_at(r).to_owned())
            .collect();
        Movie {
            id: slot.id,
            title: self.str_at(slot.title).to_owned(),
            director: self.str_at(slot.director).to_owned(),
            release_year: slot.release_year,
            genres,
        }
    }

    fn summary_from(&self, slot: &Slot) -> MovieSummary {
        debug_assert_eq!(slot.has & HAS_SUMMARY, HAS_SUMMARY);
        MovieSummary {
            id: slot.id,
            title: self.str_at(slot.title).to_owned(),
        }
    }

    /// Materializes the current record as an owned [`Movie`]. All five fields
    /// must have been set.
    pub fn take_current_movie(&self) -> Movie {
        self.movie_from(&self.current)
    }

    /// Materializes the current record as an owned [`MovieSummary`]. Id and
    /// title must have been set.
    pub fn take_current_summary(&self) -> MovieSummary {
        self.summary_from(&self.current)
    }

    /// Pushes the current record onto the committed list and starts a fresh
    /// one. String storage is untouched.
    pub fn commit_current_as_movie(&mut self) -> Result<(), AllocError> {
        debug_assert_eq!(self.current.has, HAS_MOVIE);
        alloc::reserve_step(&mut self.slots, SLOT_STEP)?;
        self.slots.push(self.current);
        self.current = Slot::default();
        Ok(())
    }

    /// Like `commit_current_as_movie` but only id and title are required; the
    /// remaining descriptor fields keep their zero sentinels.
    pub fn commit_current_as_summary(&mut self) -> Result<(), AllocError> {
        debug_assert_eq!(self.current.has, HAS_SUMMARY);
        alloc::reserve_step(&mut self.slots, SLOT_STEP)?;
        self.slots.push(self.current);
        self.current = Slot::default();
        Ok(())
    }

    /// Materializes every committed descriptor as an owned [`Movie`].
    pub fn take_movie_list(&self) -> Vec<Movie> {
        self.slots.iter().map(|s| self.movie_from(s)).collect()
    }

    /// Materializes every committed descriptor as an owned [`MovieSummary`].
    pub fn take_summary_list(&self) -> Vec<MovieSummary> {
        self.slots.iter().map(|s| self.summary_from(s)).collect()
    }

    /// Number of committed descriptors.
    pub fn committed(&self) -> usize {
        self.slots.len()
    }

    pub fn str_in_use(&self) -> usize {
        self.str_data.len()
    }

    pub fn str_capacity(&self) -> usize {
        self.str_data.capacity()
    }
}
