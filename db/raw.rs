// This file is part of Cinedex, a movie catalog service.
// Copyright (C) 2026 The Cinedex Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Raw database access: the fixed SQL set and row→builder streaming.

use crate::builder::MovieBuilder;
use crate::error::DbResultExt as _;
use base::{Error, ErrorKind, ResultExt as _};
use rusqlite::named_params;

pub(crate) const INSERT_MOVIE_SQL: &str = r#"
    insert into movie (title,  director,  release_year)
               values (:title, :director, :release_year)
    returning id
"#;

pub(crate) const INSERT_GENRE_SQL: &str = r#"
    insert or ignore into genre (name) values (:genre)
"#;

pub(crate) const INSERT_GENRE_LINK_SQL: &str = r#"
    insert into movie_genre (movie_id, genre_id)
    select :movie, genre.id from genre where genre.name = :genre
"#;

pub(crate) const DELETE_MOVIE_SQL: &str = r#"
    delete from movie where id = :movie
"#;

pub(crate) const DELETE_UNUSED_GENRES_SQL: &str = r#"
    delete from genre where id not in (select distinct genre_id from movie_genre)
"#;

pub(crate) const SELECT_ALL_TITLES_SQL: &str = r#"
    select id, title from movie
"#;

pub(crate) const SELECT_ALL_MOVIES_SQL: &str = r#"
    select id, title, director, release_year from movie
"#;

pub(crate) const SELECT_MOVIE_SQL: &str = r#"
    select id, title, director, release_year from movie where id = :movie
"#;

pub(crate) const SELECT_MOVIE_GENRES_SQL: &str = r#"
    select genre.name from genre
    inner join movie_genre on genre.id = movie_genre.genre_id
    where movie_genre.movie_id = :movie
"#;

pub(crate) const SELECT_MOVIES_BY_GENRE_SQL: &str = r#"
    select m.id, m.title, m.director, m.release_year
    from movie_genre
    inner join movie m on m.id = movie_genre.movie_id
    inner join genre g on g.id = movie_genre.genre_id
    where g.name = :genre
"#;

pub(crate) const REINDEX_SQL: &str = "reindex";

/// The statements prepared at `connect`, so a broken schema is caught up
/// front rather than mid-request.
pub(crate) const PREPARED_STATEMENTS: [&str; 10] = [
    INSERT_MOVIE_SQL,
    INSERT_GENRE_SQL,
    INSERT_GENRE_LINK_SQL,
    DELETE_MOVIE_SQL,
    DELETE_UNUSED_GENRES_SQL,
    SELECT_ALL_TITLES_SQL,
    SELECT_ALL_MOVIES_SQL,
    SELECT_MOVIE_SQL,
    SELECT_MOVIE_GENRES_SQL,
    SELECT_MOVIES_BY_GENRE_SQL,
];

/// Streams `(id, title, director, release_year)` rows into the builder,
/// running the genre statement for each and committing one descriptor per
/// row. Returns the number of rows streamed.
///
/// Column text flows into the arena straight from the engine's row buffer,
/// using the engine-reported byte length.
pub(crate) fn stream_movies(
    tx: &rusqlite::Transaction,
    mut rows: rusqlite::Rows,
    builder: &mut MovieBuilder,
) -> Result<usize, Error> {
    let mut n = 0;
    while let Some(row) = rows.next().classify()? {
        let id: i64 = row.get(0).classify()?;
        builder.set_id(id);
        builder.set_title(column_text(row, 1)?)?;
        builder.set_director(column_text(row, 2)?)?;
        builder.set_release_year(row.get(3).classify()?);

        let mut genres = tx.prepare_cached(SELECT_MOVIE_GENRES_SQL).classify()?;
        let mut genre_rows = genres.query(named_params! {":movie": id}).classify()?;
        builder.start_genres();
        while let Some(genre_row) = genre_rows.next().classify()? {
            builder.add_genre(column_text(genre_row, 0)?)?;
        }

        builder.commit_current_as_movie()?;
        n += 1;
    }
    Ok(n)
}

/// Streams `(id, title)` rows into the builder as summaries.
pub(crate) fn stream_summaries(
    mut rows: rusqlite::Rows,
    builder: &mut MovieBuilder,
) -> Result<usize, Error> {
    let mut n = 0;
    while let Some(row) = rows.next().classify()? {
        builder.set_id(row.get(0).classify()?);
        builder.set_title(column_text(row, 1)?)?;
        builder.commit_current_as_summary()?;
        n += 1;
    }
    Ok(n)
}

fn column_text<'a>(row: &'a rusqlite::Row, idx: usize) -> Result<&'a str, Error> {
    row.get_ref(idx)
        .classify()?
        .as_str()
        // A non-text value here means the schema itself is broken.
        .err_kind(ErrorKind::Hard)
}
