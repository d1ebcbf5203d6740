// This file is part of Cinedex, a movie catalog service.
// Copyright (C) 2026 The Cinedex Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Per-connection request handling: parse one operation at a time, run it
//! against the worker's database connection, write the text response.

use crate::parser::{Operation, RequestParser};
use base::Error;
use db::{Movie, MovieSummary};
use std::io::{self, BufWriter, Write};
use std::net::TcpStream;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, warn};

/// Handles every operation on one client socket. Returns `false` when a
/// hard database error makes the worker's connection unusable; the pool
/// reacts by tearing the worker down.
pub fn handle_client(
    worker_id: u64,
    stream: &TcpStream,
    conn: &mut db::Connection,
    finished: &Arc<AtomicBool>,
) -> bool {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "<unknown>".to_owned());
    debug!("worker {worker_id}: handling connection from {peer}");

    let mut parser = RequestParser::new(stream, finished.clone());
    let mut out = BufWriter::new(stream);
    let mut hard = false;

    while !parser.is_finished() {
        let wrote = match parser.next_op() {
            Operation::Done => break,
            Operation::ParseError { message } => {
                write!(out, "server: parsing error: {message}\n\n")
            }
            Operation::AddMovie(mut movie) => match conn.register_movie(&mut movie) {
                Ok(()) => write!(out, "server: ok\nmovie[{}]: {}\n\n", movie.id, movie.title),
                Err(e) => write_db_error(&mut out, &e, &mut hard),
            },
            Operation::AddGenre { movie_id, genre } => {
                write_result(&mut out, conn.add_genre(movie_id, &genre), &mut hard)
            }
            Operation::RemoveMovie { movie_id } => {
                write_result(&mut out, conn.delete_movie(movie_id), &mut hard)
            }
            Operation::GetMovie { movie_id } => match conn.get_movie(movie_id) {
                Ok(movie) => write_movie_doc(&mut out, &movie),
                Err(e) => write_db_error(&mut out, &e, &mut hard),
            },
            Operation::SearchByGenre { genre } => match conn.search_by_genre(&genre) {
                Ok(movies) => write_movies_doc(&mut out, &movies),
                Err(e) => write_db_error(&mut out, &e, &mut hard),
            },
            Operation::ListMovies => match conn.list_movies() {
                Ok(movies) => write_movies_doc(&mut out, &movies),
                Err(e) => write_db_error(&mut out, &e, &mut hard),
            },
            Operation::ListSummaries => match conn.list_summaries() {
                Ok(summaries) => write_summaries_doc(&mut out, &summaries),
                Err(e) => write_db_error(&mut out, &e, &mut hard),
            },
        };

        let write_result = wrote.and_then(|()| out.flush());
        if hard {
            debug!("worker {worker_id}: hard error on {peer}");
            return false;
        }
        if let Err(e) = write_result {
            warn!("worker {worker_id}: write to {peer} failed: {e}");
            break;
        }
    }

    debug!("worker {worker_id}: done with {peer}");
    true
}

fn write_result(w: &mut impl Write, r: Result<(), Error>, hard: &mut bool) -> io::Result<()> {
    match r {
        Ok(()) => w.write_all(b"server: ok\n\n"),
        Err(e) => write_db_error(w, &e, hard),
    }
}

fn write_db_error(w: &mut impl Write, e: &Error, hard: &mut bool) -> io::Result<()> {
    *hard = e.kind().is_hard();
    write!(w, "server: {}\n\n", e.message())
}

/// One movie as a block of fields: `lead` prefixes the first line, `indent`
/// the rest. Field order is contractual.
fn write_movie_block(
    w: &mut impl Write,
    m: &Movie,
    lead: &str,
    indent: &str,
) -> io::Result<()> {
    writeln!(w, "{lead}id: {}", m.id)?;
    writeln!(w, "{indent}title: {}", m.title)?;
    writeln!(w, "{indent}release_year: {}", m.release_year)?;
    writeln!(w, "{indent}director: {}", m.director)?;
    if m.genres.is_empty() {
        writeln!(w, "{indent}genres: []")
    } else {
        writeln!(w, "{indent}genres:")?;
        for g in &m.genres {
            writeln!(w, "{indent}  - {g}")?;
        }
        Ok(())
    }
}

fn write_movie_doc(w: &mut impl Write, m: &Movie) -> io::Result<()> {
    w.write_all(b"---\n")?;
    write_movie_block(w, m, "", "")?;
    w.write_all(b"...\n")
}

fn write_movies_doc(w: &mut impl Write, movies: &[Movie]) -> io::Result<()> {
    w.write_all(b"---\nmovies:\n")?;
    for m in movies {
        write_movie_block(w, m, "  - ", "    ")?;
    }
    w.write_all(b"...\n")
}

fn write_summaries_doc(w: &mut impl Write, summaries: &[MovieSummary]) -> io::Result<()> {
    w.write_all(b"---\nsummaries:\n")?;
    for s in summaries {
        writeln!(w, "- {{id: {}, title: '{}'}}", s.id, yaml_squote(&s.title))?;
    }
    w.write_all(b"...\n")
}

/// Escapes a string for a single-quoted YAML scalar (quotes are doubled).
fn yaml_squote(s: &str) -> String {
    s.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movie(id: i64, genres: &[&str]) -> Movie {
        Movie {
            id,
            title: "Star Wars".to_owned(),
            director: "George Lucas".to_owned(),
            release_year: 1977,
            genres: genres.iter().map(|g| (*g).to_owned()).collect(),
        }
    }

    #[test]
    fn movie_document_shape() {
        let mut out = Vec::new();
        write_movie_doc(&mut out, &movie(42, &["Sci-Fi", "Thriller"])).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "---\n\
             id: 42\n\
             title: Star Wars\n\
             release_year: 1977\n\
             director: George Lucas\n\
             genres:\n\
             \x20\x20- Sci-Fi\n\
             \x20\x20- Thriller\n\
             ...\n"
        );
    }

    #[test]
    fn empty_genres_render_as_flow_list() {
        let mut out = Vec::new();
        write_movie_doc(&mut out, &movie(7, &[])).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("genres: []\n"), "got: {text}");
    }

    #[test]
    fn movies_document_shape() {
        let mut out = Vec::new();
        write_movies_doc(&mut out, &[movie(1, &["A"]), movie(2, &[])]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("---\nmovies:\n"), "got: {text}");
        assert!(text.ends_with("...\n"), "got: {text}");
        assert!(text.contains("  - id: 1\n    title: Star Wars\n"), "got: {text}");
        assert!(text.contains("    genres:\n      - A\n"), "got: {text}");
        assert!(text.contains("  - id: 2\n"), "got: {text}");
        assert!(text.contains("    genres: []\n"), "got: {text}");
    }

    #[test]
    fn summaries_document_quotes_titles() {
        let mut out = Vec::new();
        write_summaries_doc(
            &mut out,
            &[
                MovieSummary {
                    id: 1,
                    title: "Alien".to_owned(),
                },
                MovieSummary {
                    id: 2,
                    title: "It's a Wonderful Life".to_owned(),
                },
            ],
        )
        .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "---\nsummaries:\n\
             - {id: 1, title: 'Alien'}\n\
             - {id: 2, title: 'It''s a Wonderful Life'}\n\
             ...\n"
        );
    }

    #[test]
    fn error_response_carries_message_and_hardness() {
        let mut out = Vec::new();
        let mut hard = false;
        let e = base::err!(User, "no movie with id = 3 found in the database");
        write_db_error(&mut out, &e, &mut hard).unwrap();
        assert!(!hard);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "server: no movie with id = 3 found in the database\n\n"
        );

        let mut out = Vec::new();
        let e = base::err!(Hard, "database disk image is malformed");
        write_db_error(&mut out, &e, &mut hard).unwrap();
        assert!(hard);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "server: database disk image is malformed\n\n"
        );
    }
}
