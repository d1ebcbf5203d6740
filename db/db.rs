// This file is part of Cinedex, a movie catalog service.
// Copyright (C) 2026 The Cinedex Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Data-access logic for the Cinedex SQLite schema.
//!
//! Each worker thread owns one [`Connection`]; nothing here is shared across
//! threads, so the engine is opened with `NO_MUTEX` and a private cache.
//! Multi-statement operations run inside a deferred transaction; an error
//! return unwinds the envelope by dropping the transaction, which rolls it
//! back while preserving the body's classification.

use crate::builder::MovieBuilder;
use crate::error::{classify, DbResultExt as _};
use crate::movie::{Movie, MovieSummary};
use crate::raw;
use base::{bail, err, Error};
use rusqlite::{ffi, named_params};
use std::path::Path;
use tracing::{info, trace, warn};

/// The default database file name.
pub const DATABASE: &str = "movies.db";

/// Pragmas applied to every connection.
static CONN_PRAGMAS: [&str; 1] = [
    // The schema declares cascading foreign keys; SQLite only enforces them
    // with this on.
    "pragma foreign_keys = on",
];

pub(crate) fn check_sqlite_version() -> Result<(), Error> {
    // SQLite version 3.35.0 introduced the `returning` clause used by the
    // movie insert. https://www.sqlite.org/lang_returning.html
    if rusqlite::version_number() < 3_035_000 {
        bail!(
            Hard,
            "SQLite version {} is too old; need at least 3.35.0",
            rusqlite::version()
        );
    }
    Ok(())
}

fn base_flags() -> rusqlite::OpenFlags {
    rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
        | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX
        | rusqlite::OpenFlags::SQLITE_OPEN_PRIVATE_CACHE
        | rusqlite::OpenFlags::SQLITE_OPEN_EXRESCODE
}

fn apply_pragmas(conn: &rusqlite::Connection) -> Result<(), Error> {
    for pragma in CONN_PRAGMAS {
        conn.execute(pragma, []).classify()?;
    }
    Ok(())
}

/// Creates or migrates the database at `path`. Idempotent.
pub fn setup(path: impl AsRef<Path>) -> Result<(), Error> {
    check_sqlite_version()?;
    let conn = rusqlite::Connection::open_with_flags(
        path.as_ref(),
        base_flags() | rusqlite::OpenFlags::SQLITE_OPEN_CREATE,
    )
    .classify()?;
    apply_pragmas(&conn)?;
    conn.execute_batch(include_str!("schema.sql"))
        .map_err(|e| err!(Hard, "unable to create database schema: {e}"))?;
    info!(
        "database at {} ready, SQLite version {}",
        path.as_ref().display(),
        rusqlite::version()
    );
    conn.close().map_err(|(_, e)| classify(e))
}

/// A worker's private database connection: an engine handle, the fixed
/// prepared-statement set, and the scratch arena rows are streamed through.
pub struct Connection {
    conn: rusqlite::Connection,
    builder: MovieBuilder,
}

impl Connection {
    /// Connects to the existing database at `path` and prepares the
    /// statement set. Preparation stops at the first failure; statements
    /// already prepared are finalized when the handle drops.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self, Error> {
        check_sqlite_version()?;
        let conn = rusqlite::Connection::open_with_flags(path.as_ref(), base_flags()).classify()?;
        Self::with_conn(conn)
    }

    /// Connects to a fresh in-memory database with the schema applied. Test
    /// use only.
    pub fn connect_in_memory() -> Result<Self, Error> {
        check_sqlite_version()?;
        let conn = rusqlite::Connection::open_in_memory_with_flags(
            base_flags() | rusqlite::OpenFlags::SQLITE_OPEN_CREATE,
        )
        .classify()?;
        conn.execute_batch(include_str!("schema.sql")).classify()?;
        Self::with_conn(conn)
    }

    fn with_conn(conn: rusqlite::Connection) -> Result<Self, Error> {
        apply_pragmas(&conn)?;
        conn.set_prepared_statement_cache_capacity(raw::PREPARED_STATEMENTS.len() + 4);
        for sql in raw::PREPARED_STATEMENTS {
            conn.prepare_cached(sql).classify()?;
        }
        Ok(Connection {
            conn,
            builder: MovieBuilder::create()?,
        })
    }

    /// Closes the connection: statements first (the cache flushes), then the
    /// handle.
    pub fn close(self) -> Result<(), Error> {
        self.conn.close().map_err(|(_, e)| classify(e))
    }

    /// Registers a new movie and fills in its database-assigned id. The
    /// genres table picks up any names it does not already have.
    pub fn register_movie(&mut self, movie: &mut Movie) -> Result<(), Error> {
        debug_assert_eq!(movie.id, 0);
        let tx = self.conn.transaction().classify()?;
        let id = {
            let mut insert_genre = tx.prepare_cached(raw::INSERT_GENRE_SQL).classify()?;
            for genre in &movie.genres {
                insert_genre
                    .execute(named_params! {":genre": genre})
                    .classify()?;
            }

            let mut insert_movie = tx.prepare_cached(raw::INSERT_MOVIE_SQL).classify()?;
            let id: i64 = insert_movie
                .query_row(
                    named_params! {
                        ":title": &movie.title,
                        ":director": &movie.director,
                        ":release_year": movie.release_year,
                    },
                    |row| row.get(0),
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => {
                        err!(Hard, "movie insert returned no id")
                    }
                    e => classify(e),
                })?;

            let mut link = tx.prepare_cached(raw::INSERT_GENRE_LINK_SQL).classify()?;
            for genre in &movie.genres {
                link.execute(named_params! {":movie": id, ":genre": genre})
                    .classify()?;
            }
            id
        };
        tx.commit().classify()?;
        movie.id = id;
        Ok(())
    }

    /// Adds a single genre to an existing movie, creating the genre row if
    /// needed.
    pub fn add_genre(&mut self, movie_id: i64, genre: &str) -> Result<(), Error> {
        let tx = self.conn.transaction().classify()?;
        {
            let mut insert_genre = tx.prepare_cached(raw::INSERT_GENRE_SQL).classify()?;
            insert_genre
                .execute(named_params! {":genre": genre})
                .classify()?;

            let mut link = tx.prepare_cached(raw::INSERT_GENRE_LINK_SQL).classify()?;
            match link.execute(named_params! {":movie": movie_id, ":genre": genre}) {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(f, _))
                    if f.extended_code == ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
                {
                    bail!(User, "no movie with id = {movie_id} found in the database");
                }
                Err(rusqlite::Error::SqliteFailure(f, _))
                    if f.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
                {
                    bail!(
                        User,
                        "movie with id = {movie_id} already has the provided genre"
                    );
                }
                Err(e) => return Err(classify(e)),
            }
        }
        tx.commit().classify()
    }

    /// Deletes a movie. Genres left without any movie are swept afterwards;
    /// sweep failures are logged, not surfaced.
    pub fn delete_movie(&mut self, movie_id: i64) -> Result<(), Error> {
        let affected = {
            let mut stmt = self.conn.prepare_cached(raw::DELETE_MOVIE_SQL).classify()?;
            stmt.execute(named_params! {":movie": movie_id}).classify()?
        };
        if affected < 1 {
            bail!(
                User,
                "no movie with id = {movie_id} to be deleted from the database"
            );
        }

        match self
            .conn
            .prepare_cached(raw::DELETE_UNUSED_GENRES_SQL)
            .and_then(|mut stmt| stmt.execute([]))
        {
            Ok(n) if n > 0 => trace!("swept {n} unused genres"),
            Ok(_) => {}
            Err(e) => warn!(err = %e, "unused-genre sweep failed"),
        }
        Ok(())
    }

    /// Fetches one movie with its genres.
    pub fn get_movie(&mut self, movie_id: i64) -> Result<Movie, Error> {
        self.builder.reset();
        let tx = self.conn.transaction().classify()?;
        let n = {
            let mut stmt = tx.prepare_cached(raw::SELECT_MOVIE_SQL).classify()?;
            let rows = stmt.query(named_params! {":movie": movie_id}).classify()?;
            raw::stream_movies(&tx, rows, &mut self.builder)?
        };
        tx.commit().classify()?;
        if n == 0 {
            bail!(User, "no movie with id = {movie_id} found in the database");
        }
        self.builder
            .take_movie_list()
            .pop()
            .ok_or_else(|| err!(Hard, "streamed row did not materialize"))
    }

    /// Lists every movie with its genres.
    pub fn list_movies(&mut self) -> Result<Vec<Movie>, Error> {
        self.builder.reset();
        let tx = self.conn.transaction().classify()?;
        {
            let mut stmt = tx.prepare_cached(raw::SELECT_ALL_MOVIES_SQL).classify()?;
            let rows = stmt.query([]).classify()?;
            raw::stream_movies(&tx, rows, &mut self.builder)?;
        }
        tx.commit().classify()?;
        Ok(self.builder.take_movie_list())
    }

    /// Lists every movie carrying the given genre.
    pub fn search_by_genre(&mut self, genre: &str) -> Result<Vec<Movie>, Error> {
        self.builder.reset();
        let tx = self.conn.transaction().classify()?;
        {
            let mut stmt = tx
                .prepare_cached(raw::SELECT_MOVIES_BY_GENRE_SQL)
                .classify()?;
            let rows = stmt.query(named_params! {":genre": genre}).classify()?;
            raw::stream_movies(&tx, rows, &mut self.builder)?;
        }
        tx.commit().classify()?;
        Ok(self.builder.take_movie_list())
    }

    /// Lists `{id, title}` summaries of every movie.
    pub fn list_summaries(&mut self) -> Result<Vec<MovieSummary>, Error> {
        self.builder.reset();
        let tx = self.conn.transaction().classify()?;
        {
            let mut stmt = tx.prepare_cached(raw::SELECT_ALL_TITLES_SQL).classify()?;
            let rows = stmt.query([]).classify()?;
            raw::stream_summaries(rows, &mut self.builder)?;
        }
        tx.commit().classify()?;
        Ok(self.builder.take_summary_list())
    }

    /// Rebuilds every index. Run by `init` after schema setup.
    pub fn reindex(&mut self) -> Result<(), Error> {
        self.conn.execute_batch(raw::REINDEX_SQL).classify()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use base::ErrorKind;

    fn sample(title: &str, genres: &[&str]) -> Movie {
        Movie {
            id: 0,
            title: title.to_owned(),
            director: "Jane Doe".to_owned(),
            release_year: 1999,
            genres: genres.iter().map(|g| (*g).to_owned()).collect(),
        }
    }

    #[test]
    fn register_then_get_round_trips() {
        let mut conn = testutil::new_conn();
        let mut m = sample("Star Wars", &["Sci-Fi", "Thriller"]);
        conn.register_movie(&mut m).unwrap();
        assert!(m.id > 0);

        let mut got = conn.get_movie(m.id).unwrap();
        got.genres.sort();
        let mut expected = m.clone();
        expected.genres.sort();
        assert_eq!(got, expected);
    }

    #[test]
    fn register_assigns_distinct_ids_and_dedups_genre_names() {
        let mut conn = testutil::new_conn();
        let mut a = sample("First", &["Drama"]);
        let mut b = sample("Second", &["Drama"]);
        conn.register_movie(&mut a).unwrap();
        conn.register_movie(&mut b).unwrap();
        assert_ne!(a.id, b.id);

        let genre_rows: i64 = conn
            .conn
            .query_row("select count(*) from genre where name = 'Drama'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(genre_rows, 1);

        let links: i64 = conn
            .conn
            .query_row("select count(*) from movie_genre", [], |r| r.get(0))
            .unwrap();
        assert_eq!(links, 2);
    }

    #[test]
    fn get_missing_movie_is_a_user_error() {
        let mut conn = testutil::new_conn();
        let e = conn.get_movie(9999).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::User);
        assert_eq!(
            e.message(),
            "no movie with id = 9999 found in the database"
        );
    }

    #[test]
    fn delete_then_get_misses() {
        let mut conn = testutil::new_conn();
        let mut m = sample("Ephemeral", &["Drama"]);
        conn.register_movie(&mut m).unwrap();
        conn.delete_movie(m.id).unwrap();
        assert_eq!(conn.get_movie(m.id).unwrap_err().kind(), ErrorKind::User);

        // The cascade removed the link and the sweep removed the orphan
        // genre.
        let links: i64 = conn
            .conn
            .query_row("select count(*) from movie_genre", [], |r| r.get(0))
            .unwrap();
        assert_eq!(links, 0);
        let genres: i64 = conn
            .conn
            .query_row("select count(*) from genre", [], |r| r.get(0))
            .unwrap();
        assert_eq!(genres, 0);
    }

    #[test]
    fn delete_missing_movie_wording() {
        let mut conn = testutil::new_conn();
        let e = conn.delete_movie(9999).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::User);
        assert_eq!(
            e.message(),
            "no movie with id = 9999 to be deleted from the database"
        );
    }

    #[test]
    fn add_genre_to_missing_movie_wording() {
        let mut conn = testutil::new_conn();
        let e = conn.add_genre(123, "Sci-Fi").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::User);
        assert_eq!(e.message(), "no movie with id = 123 found in the database");

        // The envelope rolled back the genre insert too.
        let genres: i64 = conn
            .conn
            .query_row("select count(*) from genre", [], |r| r.get(0))
            .unwrap();
        assert_eq!(genres, 0);
    }

    #[test]
    fn duplicate_genre_wording() {
        let mut conn = testutil::new_conn();
        let mut m = sample("Star Wars", &["Sci-Fi"]);
        conn.register_movie(&mut m).unwrap();
        let e = conn.add_genre(m.id, "Sci-Fi").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::User);
        assert_eq!(
            e.message(),
            format!("movie with id = {} already has the provided genre", m.id)
        );
    }

    #[test]
    fn add_genre_extends_search() {
        let mut conn = testutil::new_conn();
        let mut m = sample("Alien", &["Horror"]);
        conn.register_movie(&mut m).unwrap();
        conn.add_genre(m.id, "Sci-Fi").unwrap();
        let found = conn.search_by_genre("Sci-Fi").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, m.id);
        let mut genres = found[0].genres.clone();
        genres.sort();
        assert_eq!(genres, vec!["Horror".to_owned(), "Sci-Fi".to_owned()]);
    }

    #[test]
    fn list_length_matches_table() {
        let mut conn = testutil::new_conn();
        for i in 0..5 {
            conn.register_movie(&mut sample(&format!("Movie {i}"), &[]))
                .unwrap();
        }
        let movies = conn.list_movies().unwrap();
        assert_eq!(movies.len(), 5);
        let count: i64 = conn
            .conn
            .query_row("select count(*) from movie", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count as usize, movies.len());
    }

    #[test]
    fn summaries_cover_listed_ids() {
        let mut conn = testutil::new_conn();
        let mut a = sample("First", &["A"]);
        let mut b = sample("Second", &[]);
        conn.register_movie(&mut a).unwrap();
        conn.register_movie(&mut b).unwrap();

        let movie_ids: Vec<i64> = conn.list_movies().unwrap().iter().map(|m| m.id).collect();
        let summary_ids: Vec<i64> = conn
            .list_summaries()
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        for id in movie_ids {
            assert!(summary_ids.contains(&id));
        }
    }

    #[test]
    fn search_misses_return_empty_list() {
        let mut conn = testutil::new_conn();
        conn.register_movie(&mut sample("Alien", &["Horror"]))
            .unwrap();
        assert!(conn.search_by_genre("Romance").unwrap().is_empty());
    }

    #[test]
    fn reindex_succeeds() {
        let mut conn = testutil::new_conn();
        conn.register_movie(&mut sample("Alien", &["Horror"]))
            .unwrap();
        conn.reindex().unwrap();
    }

    #[test]
    fn close_reports_cleanly() {
        let conn = testutil::new_conn();
        conn.close().unwrap();
    }
}
