// This file is part of Cinedex, a movie catalog service.
// Copyright (C) 2026 The Cinedex Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Incremental parser turning a client's YAML stream into [`Operation`]s.
//!
//! The socket is wrapped in a chunked UTF-8 char source feeding the YAML
//! tokenizer, so operations are dispatched one at a time as bytes arrive.
//! Structural problems (missing fields, wrong shapes, unknown names) are
//! recoverable: the offending construct is consumed, a `ParseError` is
//! returned, and `next_op` may be called again. Tokenizer failures and I/O
//! errors latch the parser; every call after that returns `Done`.

use db::Movie;
use std::cell::RefCell;
use std::io::{self, Read};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use yaml_rust2::parser::{Event, Parser};
use yaml_rust2::scanner::Marker;

/// One decoded client request, or a parser-level condition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    AddMovie(Movie),
    AddGenre { movie_id: i64, genre: String },
    RemoveMovie { movie_id: i64 },
    GetMovie { movie_id: i64 },
    SearchByGenre { genre: String },
    ListMovies,
    ListSummaries,
    /// Recoverable; the caller may keep reading operations.
    ParseError { message: String },
    /// Stream end; latched.
    Done,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum OpName {
    AddMovie,
    AddGenre,
    RemoveMovie,
    ListSummaries,
    ListMovies,
    GetMovie,
    SearchByGenre,
}

/// Recognizes an operation name or its numeric alias.
fn parse_op_name(s: &str) -> Option<OpName> {
    match s {
        "add_movie" | "1" => Some(OpName::AddMovie),
        "add_genre" | "2" => Some(OpName::AddGenre),
        "remove_movie" | "3" => Some(OpName::RemoveMovie),
        "list_summaries" | "4" => Some(OpName::ListSummaries),
        "list_movies" | "5" => Some(OpName::ListMovies),
        "get_movie" | "6" => Some(OpName::GetMovie),
        "search_by_genre" | "7" => Some(OpName::SearchByGenre),
        _ => None,
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Field {
    Id,
    Title,
    Genre,
    Director,
    Year,
    Other,
}

fn parse_field(s: &str) -> Field {
    match s {
        "id" => Field::Id,
        "title" => Field::Title,
        "genre" | "genres" => Field::Genre,
        "director" => Field::Director,
        "year" | "release_year" => Field::Year,
        _ => Field::Other,
    }
}

fn parse_i64(s: &str) -> Option<i64> {
    if s.is_empty() {
        return None;
    }
    s.parse().ok()
}

fn parse_year(s: &str) -> Option<i32> {
    parse_i64(s).and_then(|v| i32::try_from(v).ok())
}

const READ_CHUNK: usize = 4096;

/// Chunked, incrementally-decoded UTF-8 char source over a reader.
///
/// I/O failures cannot surface through the char iterator, so they are
/// recorded in a shared slot and the stream is ended; the parser checks the
/// slot when the tokenizer stops.
struct SourceChars<R: Read> {
    inner: R,
    /// The owning worker's finished flag; an interrupted read only ends the
    /// stream once this is set.
    finished: Arc<AtomicBool>,
    err: Rc<RefCell<Option<io::Error>>>,
    buf: Vec<u8>,
    pos: usize,
    eof: bool,
}

impl<R: Read> SourceChars<R> {
    fn fail(&mut self, e: io::Error) {
        *self.err.borrow_mut() = Some(e);
        self.eof = true;
    }

    fn refill(&mut self) {
        self.buf.drain(..self.pos);
        self.pos = 0;
        let start = self.buf.len();
        self.buf.resize(start + READ_CHUNK, 0);
        loop {
            match self.inner.read(&mut self.buf[start..]) {
                Ok(n) => {
                    self.buf.truncate(start + n);
                    if n == 0 {
                        self.eof = true;
                    }
                    return;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    if self.finished.load(Ordering::SeqCst) {
                        self.buf.truncate(start);
                        self.eof = true;
                        return;
                    }
                }
                Err(e) => {
                    self.buf.truncate(start);
                    self.fail(e);
                    return;
                }
            }
        }
    }
}

/// Expected total length of a UTF-8 sequence from its first byte.
fn utf8_len(b: u8) -> Option<usize> {
    match b {
        0x00..=0x7f => Some(1),
        0xc0..=0xdf => Some(2),
        0xe0..=0xef => Some(3),
        0xf0..=0xf7 => Some(4),
        _ => None,
    }
}

impl<R: Read> Iterator for SourceChars<R> {
    type Item = char;

    fn next(&mut self) -> Option<char> {
        loop {
            if let Some(&first) = self.buf.get(self.pos) {
                let Some(need) = utf8_len(first) else {
                    self.fail(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "request is not valid UTF-8",
                    ));
                    return None;
                };
                if self.buf.len() - self.pos >= need {
                    match std::str::from_utf8(&self.buf[self.pos..self.pos + need]) {
                        Ok(s) => {
                            let c = s.chars().next()?;
                            self.pos += need;
                            return Some(c);
                        }
                        Err(_) => {
                            self.fail(io::Error::new(
                                io::ErrorKind::InvalidData,
                                "request is not valid UTF-8",
                            ));
                            return None;
                        }
                    }
                }
                // Split multibyte sequence; hold back until complete.
            }
            if self.eof {
                if self.pos < self.buf.len() {
                    // Truncated multibyte sequence at end of stream.
                    self.fail(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "request is not valid UTF-8",
                    ));
                }
                return None;
            }
            self.refill();
        }
    }
}

pub struct RequestParser<R: Read> {
    parser: Parser<SourceChars<R>>,
    io_err: Rc<RefCell<Option<io::Error>>>,
    /// Whether the cursor is inside a top-level mapping whose keys are
    /// operation names. Persists across `next_op` calls.
    in_mapping: bool,
    finished: bool,
}

/// A sub-parser's verdict on one value position.
enum Value {
    Scalar(String, Marker),
    /// A container appeared where a scalar belonged; it was consumed whole.
    Consumed(Marker),
    /// The enclosing mapping ended.
    End(Marker),
    /// Tokenizer failure or stream end; the given op must be returned as-is.
    Fatal(Operation),
}

impl<R: Read> RequestParser<R> {
    pub fn new(reader: R, finished: Arc<AtomicBool>) -> Self {
        let io_err = Rc::new(RefCell::new(None));
        let source = SourceChars {
            inner: reader,
            finished,
            err: io_err.clone(),
            buf: Vec::new(),
            pos: 0,
            eof: false,
        };
        RequestParser {
            parser: Parser::new(source),
            io_err,
            in_mapping: false,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn latch(&mut self, message: String) -> Operation {
        self.finished = true;
        Operation::ParseError { message }
    }

    fn position(m: Marker) -> String {
        format!("{}:{}", m.line(), m.col() + 1)
    }

    fn error_at(message: &str, m: Marker) -> Operation {
        Operation::ParseError {
            message: format!("{message} at {}", Self::position(m)),
        }
    }

    /// Pulls one tokenizer event. `Err` carries the latched operation to
    /// return (`Done` or a final `ParseError`).
    fn next_event(&mut self) -> Result<(Event, Marker), Operation> {
        if self.finished {
            return Err(Operation::Done);
        }
        match self.parser.next_token() {
            Ok((Event::StreamEnd, _)) => {
                self.finished = true;
                if let Some(e) = self.io_err.borrow_mut().take() {
                    return Err(Operation::ParseError {
                        message: format!("read failed: {e}"),
                    });
                }
                Err(Operation::Done)
            }
            Ok(ev) => Ok(ev),
            Err(e) => {
                let ioe = self.io_err.borrow_mut().take();
                if let Some(ioe) = ioe {
                    return Err(self.latch(format!("read failed: {ioe}")));
                }
                Err(self.latch(e.to_string()))
            }
        }
    }

    /// Reads the next operation off the stream.
    pub fn next_op(&mut self) -> Operation {
        loop {
            let (ev, mark) = match self.next_event() {
                Ok(x) => x,
                Err(op) => return op,
            };
            match ev {
                Event::StreamStart
                | Event::DocumentStart
                | Event::DocumentEnd
                | Event::SequenceStart(..)
                | Event::SequenceEnd
                | Event::Alias(..)
                | Event::Nothing => continue,
                Event::StreamEnd => unreachable!("handled by next_event"),
                Event::MappingStart(..) => {
                    if self.in_mapping {
                        // An operation name was expected here.
                        if let Some(op) = self.skip_container() {
                            return op;
                        }
                        return Self::error_at("expected an operation name, found a mapping", mark);
                    }
                    self.in_mapping = true;
                }
                Event::MappingEnd => {
                    self.in_mapping = false;
                }
                Event::Scalar(name, ..) => {
                    let Some(op) = parse_op_name(&name) else {
                        if self.in_mapping {
                            // Skip the unknown operation's value node.
                            if let Some(op) = self.skip_value() {
                                return op;
                            }
                        }
                        return Self::error_at(&format!("unknown operation '{name}'"), mark);
                    };
                    if self.in_mapping {
                        return self.parse_op_body(op);
                    }
                    match op {
                        OpName::ListMovies => return Operation::ListMovies,
                        OpName::ListSummaries => return Operation::ListSummaries,
                        _ => {
                            return Self::error_at(
                                &format!("operation '{name}' requires a mapping"),
                                mark,
                            )
                        }
                    }
                }
            }
        }
    }

    fn parse_op_body(&mut self, op: OpName) -> Operation {
        match op {
            OpName::AddMovie => self.parse_movie(),
            OpName::AddGenre => self.parse_movie_key(op, true, true),
            OpName::RemoveMovie | OpName::GetMovie => self.parse_movie_key(op, true, false),
            OpName::SearchByGenre => self.parse_movie_key(op, false, true),
            OpName::ListMovies | OpName::ListSummaries => {
                // In-mapping nullary form, e.g. `list_movies:` with a null
                // value. Whatever the value is, consume it.
                if let Some(fatal) = self.skip_value() {
                    return fatal;
                }
                match op {
                    OpName::ListMovies => Operation::ListMovies,
                    _ => Operation::ListSummaries,
                }
            }
        }
    }

    /// Consumes one already-opened container to its matching end. Returns a
    /// latched op on tokenizer failure.
    fn skip_container(&mut self) -> Option<Operation> {
        let mut depth = 1u32;
        while depth > 0 {
            let (ev, _) = match self.next_event() {
                Ok(x) => x,
                Err(op) => return Some(op),
            };
            match ev {
                Event::MappingStart(..) | Event::SequenceStart(..) => depth += 1,
                Event::MappingEnd | Event::SequenceEnd => depth -= 1,
                Event::DocumentEnd => return None,
                _ => {}
            }
        }
        None
    }

    /// Consumes exactly one value node (scalar or whole container).
    fn skip_value(&mut self) -> Option<Operation> {
        let (ev, _) = match self.next_event() {
            Ok(x) => x,
            Err(op) => return Some(op),
        };
        match ev {
            Event::MappingStart(..) | Event::SequenceStart(..) => self.skip_container(),
            _ => None,
        }
    }

    /// Pulls one value-position event.
    fn next_value(&mut self) -> Value {
        let (ev, mark) = match self.next_event() {
            Ok(x) => x,
            Err(op) => return Value::Fatal(op),
        };
        match ev {
            Event::Scalar(s, ..) => Value::Scalar(s, mark),
            Event::MappingStart(..) | Event::SequenceStart(..) => {
                if let Some(op) = self.skip_container() {
                    return Value::Fatal(op);
                }
                Value::Consumed(mark)
            }
            Event::MappingEnd | Event::DocumentEnd => Value::End(mark),
            _ => Value::Consumed(mark),
        }
    }

    /// Parses the movie mapping of `add_movie`: `title`, `director`,
    /// `year`/`release_year`, and `genre`/`genres` (scalar or sequence) are
    /// all required. Unknown keys are consumed silently; a duplicate keeps
    /// the first value.
    fn parse_movie(&mut self) -> Operation {
        let mut title: Option<String> = None;
        let mut director: Option<String> = None;
        let mut year: Option<i32> = None;
        let mut genres: Option<Vec<String>> = None;
        let mut pending: Option<String> = None;
        let mut in_map = false;

        loop {
            let (ev, mark) = match self.next_event() {
                Ok(x) => x,
                Err(op) => return op,
            };
            match ev {
                Event::MappingStart(..) if !in_map => in_map = true,
                Event::MappingStart(..) | Event::SequenceStart(..) => {
                    if let Some(op) = self.skip_container() {
                        return op;
                    }
                    pending.get_or_insert_with(|| {
                        format!("unexpected nested value at {}", Self::position(mark))
                    });
                }
                Event::Scalar(key, ..) => {
                    if !in_map {
                        return Self::error_at("add_movie requires a mapping", mark);
                    }
                    match parse_field(&key) {
                        Field::Title => match self.next_value() {
                            Value::Scalar(s, _) => {
                                if title.is_none() {
                                    title = Some(s);
                                } else {
                                    debug!("duplicate title field; keeping the first");
                                }
                            }
                            Value::Consumed(m) => {
                                pending.get_or_insert_with(|| {
                                    format!("title must be a scalar at {}", Self::position(m))
                                });
                            }
                            Value::End(m) => {
                                return Self::error_at("missing value for title", m);
                            }
                            Value::Fatal(op) => return op,
                        },
                        Field::Director => match self.next_value() {
                            Value::Scalar(s, _) => {
                                if director.is_none() {
                                    director = Some(s);
                                } else {
                                    debug!("duplicate director field; keeping the first");
                                }
                            }
                            Value::Consumed(m) => {
                                pending.get_or_insert_with(|| {
                                    format!("director must be a scalar at {}", Self::position(m))
                                });
                            }
                            Value::End(m) => {
                                return Self::error_at("missing value for director", m);
                            }
                            Value::Fatal(op) => return op,
                        },
                        Field::Year => match self.next_value() {
                            Value::Scalar(s, m) => match parse_year(&s) {
                                Some(y) => {
                                    if year.is_none() {
                                        year = Some(y);
                                    } else {
                                        debug!("duplicate year field; keeping the first");
                                    }
                                }
                                None => {
                                    pending.get_or_insert_with(|| {
                                        format!(
                                            "invalid release year '{s}' at {}",
                                            Self::position(m)
                                        )
                                    });
                                }
                            },
                            Value::Consumed(m) => {
                                pending.get_or_insert_with(|| {
                                    format!("year must be a scalar at {}", Self::position(m))
                                });
                            }
                            Value::End(m) => return Self::error_at("missing value for year", m),
                            Value::Fatal(op) => return op,
                        },
                        Field::Genre => match self.parse_genre_list(&mut pending) {
                            Ok(list) => {
                                if genres.is_none() {
                                    genres = Some(list);
                                } else {
                                    debug!("duplicate genres field; keeping the first");
                                }
                            }
                            Err(op) => return op,
                        },
                        Field::Id | Field::Other => {
                            if let Some(op) = self.skip_value() {
                                return op;
                            }
                        }
                    }
                }
                Event::MappingEnd | Event::DocumentEnd => {
                    if let Some(message) = pending {
                        return Operation::ParseError { message };
                    }
                    return match (title, director, year, genres) {
                        (Some(title), Some(director), Some(release_year), Some(genres)) => {
                            Operation::AddMovie(Movie {
                                id: 0,
                                title,
                                director,
                                release_year,
                                genres,
                            })
                        }
                        (t, d, y, g) => {
                            let mut missing = Vec::new();
                            if t.is_none() {
                                missing.push("title");
                            }
                            if d.is_none() {
                                missing.push("director");
                            }
                            if y.is_none() {
                                missing.push("release_year");
                            }
                            if g.is_none() {
                                missing.push("genres");
                            }
                            Self::error_at(
                                &format!("add_movie is missing {}", missing.join(", ")),
                                mark,
                            )
                        }
                    };
                }
                Event::Alias(..) | Event::Nothing => {}
                Event::StreamStart | Event::DocumentStart | Event::SequenceEnd => {
                    return Self::error_at("malformed add_movie mapping", mark);
                }
                Event::StreamEnd => unreachable!("handled by next_event"),
            }
        }
    }

    /// Parses the `id`/`genre` mapping shared by `add_genre`,
    /// `remove_movie`, `get_movie`, and `search_by_genre`. Also accepts the
    /// abbreviated form where the operation name maps directly to a scalar,
    /// e.g. `remove_movie: 42`.
    fn parse_movie_key(&mut self, op: OpName, needs_id: bool, needs_genre: bool) -> Operation {
        let mut id: Option<i64> = None;
        let mut genre: Option<String> = None;
        let mut pending: Option<String> = None;
        let mut in_map = false;

        loop {
            let (ev, mark) = match self.next_event() {
                Ok(x) => x,
                Err(fatal) => return fatal,
            };
            match ev {
                Event::MappingStart(..) if !in_map => in_map = true,
                Event::MappingStart(..) | Event::SequenceStart(..) => {
                    if let Some(fatal) = self.skip_container() {
                        return fatal;
                    }
                    pending.get_or_insert_with(|| {
                        format!("unexpected nested value at {}", Self::position(mark))
                    });
                }
                Event::Scalar(s, ..) if !in_map => {
                    // Abbreviated form: the single required field.
                    return match (needs_id, needs_genre) {
                        (true, false) => match parse_i64(&s) {
                            Some(movie_id) => Self::build_key_op(op, movie_id, None),
                            None => Self::error_at(&format!("invalid movie id '{s}'"), mark),
                        },
                        (false, true) => Self::build_key_op(op, 0, Some(s)),
                        _ => Self::error_at("this operation requires a mapping", mark),
                    };
                }
                Event::Scalar(key, ..) => match parse_field(&key) {
                    Field::Id => match self.next_value() {
                        Value::Scalar(s, m) => match parse_i64(&s) {
                            Some(v) => {
                                if id.is_none() {
                                    id = Some(v);
                                } else {
                                    debug!("duplicate id field; keeping the first");
                                }
                            }
                            None => {
                                pending.get_or_insert_with(|| {
                                    format!("invalid movie id '{s}' at {}", Self::position(m))
                                });
                            }
                        },
                        Value::Consumed(m) => {
                            pending.get_or_insert_with(|| {
                                format!("id must be a scalar at {}", Self::position(m))
                            });
                        }
                        Value::End(m) => return Self::error_at("missing value for id", m),
                        Value::Fatal(fatal) => return fatal,
                    },
                    Field::Genre => match self.next_value() {
                        Value::Scalar(s, _) => {
                            if genre.is_none() {
                                genre = Some(s);
                            } else {
                                debug!("duplicate genre field; keeping the first");
                            }
                        }
                        Value::Consumed(m) => {
                            pending.get_or_insert_with(|| {
                                format!("genre must be a scalar at {}", Self::position(m))
                            });
                        }
                        Value::End(m) => return Self::error_at("missing value for genre", m),
                        Value::Fatal(fatal) => return fatal,
                    },
                    Field::Title | Field::Director | Field::Year | Field::Other => {
                        if let Some(fatal) = self.skip_value() {
                            return fatal;
                        }
                    }
                },
                Event::MappingEnd | Event::DocumentEnd => {
                    if let Some(message) = pending {
                        return Operation::ParseError { message };
                    }
                    if needs_id && id.is_none() {
                        return Self::error_at("missing id field", mark);
                    }
                    if needs_genre && genre.is_none() {
                        return Self::error_at("missing genre field", mark);
                    }
                    return Self::build_key_op(op, id.unwrap_or(0), genre);
                }
                Event::Alias(..) | Event::Nothing => {}
                Event::StreamStart | Event::DocumentStart | Event::SequenceEnd => {
                    return Self::error_at("malformed operation mapping", mark);
                }
                Event::StreamEnd => unreachable!("handled by next_event"),
            }
        }
    }

    fn build_key_op(op: OpName, movie_id: i64, genre: Option<String>) -> Operation {
        match op {
            OpName::AddGenre => Operation::AddGenre {
                movie_id,
                genre: genre.unwrap_or_default(),
            },
            OpName::RemoveMovie => Operation::RemoveMovie { movie_id },
            OpName::GetMovie => Operation::GetMovie { movie_id },
            OpName::SearchByGenre => Operation::SearchByGenre {
                genre: genre.unwrap_or_default(),
            },
            OpName::AddMovie | OpName::ListMovies | OpName::ListSummaries => {
                unreachable!("not a key operation")
            }
        }
    }

    /// Parses a genre value: a sequence of scalars, or a single scalar as a
    /// one-element list. A nested container inside the list is consumed and
    /// reported through `pending`.
    fn parse_genre_list(&mut self, pending: &mut Option<String>) -> Result<Vec<String>, Operation> {
        let (ev, mark) = match self.next_event() {
            Ok(x) => x,
            Err(fatal) => return Err(fatal),
        };
        match ev {
            Event::Scalar(s, ..) => Ok(vec![s]),
            Event::SequenceStart(..) => {
                let mut genres = Vec::new();
                loop {
                    let (ev, mark) = match self.next_event() {
                        Ok(x) => x,
                        Err(fatal) => return Err(fatal),
                    };
                    match ev {
                        Event::Scalar(s, ..) => genres.push(s),
                        Event::SequenceEnd => return Ok(genres),
                        Event::MappingStart(..) | Event::SequenceStart(..) => {
                            if let Some(fatal) = self.skip_container() {
                                return Err(fatal);
                            }
                            pending.get_or_insert_with(|| {
                                format!(
                                    "genres must be scalars at {}",
                                    Self::position(mark)
                                )
                            });
                        }
                        Event::Alias(..) | Event::Nothing => {}
                        _ => {
                            return Err(Self::error_at("malformed genre list", mark));
                        }
                    }
                }
            }
            Event::MappingStart(..) => {
                if let Some(fatal) = self.skip_container() {
                    return Err(fatal);
                }
                pending.get_or_insert_with(|| {
                    format!("genres must be a sequence at {}", Self::position(mark))
                });
                Ok(Vec::new())
            }
            _ => Err(Self::error_at("malformed genre list", mark)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser(input: &'static str) -> RequestParser<&'static [u8]> {
        RequestParser::new(input.as_bytes(), Arc::new(AtomicBool::new(false)))
    }

    fn movie(title: &str, director: &str, year: i32, genres: &[&str]) -> Movie {
        Movie {
            id: 0,
            title: title.to_owned(),
            director: director.to_owned(),
            release_year: year,
            genres: genres.iter().map(|g| (*g).to_owned()).collect(),
        }
    }

    #[test]
    fn empty_input_is_done_and_stays_done() {
        let mut p = parser("");
        assert_eq!(p.next_op(), Operation::Done);
        assert!(p.is_finished());
        assert_eq!(p.next_op(), Operation::Done);
    }

    #[test]
    fn add_movie_document() {
        let mut p = parser(
            "---\nadd_movie:\n  title: \"Star Wars\"\n  director: \"George Lucas\"\n  release_year: 1977\n  genres: [Sci-Fi, Thriller]\n",
        );
        assert_eq!(
            p.next_op(),
            Operation::AddMovie(movie(
                "Star Wars",
                "George Lucas",
                1977,
                &["Sci-Fi", "Thriller"]
            ))
        );
        assert_eq!(p.next_op(), Operation::Done);
    }

    #[test]
    fn genre_scalar_parses_as_one_element_list() {
        let mut p = parser(
            "add_movie:\n  title: Alien\n  director: Ridley Scott\n  year: 1979\n  genre: Horror\n",
        );
        assert_eq!(
            p.next_op(),
            Operation::AddMovie(movie("Alien", "Ridley Scott", 1979, &["Horror"]))
        );
    }

    #[test]
    fn unknown_keys_are_skipped() {
        let mut p = parser(
            "add_movie:\n  title: Alien\n  rating: 5\n  extra: {a: 1, b: [2, 3]}\n  director: Ridley Scott\n  year: 1979\n  genre: Horror\n",
        );
        assert_eq!(
            p.next_op(),
            Operation::AddMovie(movie("Alien", "Ridley Scott", 1979, &["Horror"]))
        );
    }

    #[test]
    fn bare_scalars_name_nullary_operations() {
        let mut p = parser("list_movies\n");
        assert_eq!(p.next_op(), Operation::ListMovies);

        let mut p = parser("---\nlist_summaries\n");
        assert_eq!(p.next_op(), Operation::ListSummaries);

        let mut p = parser("5\n");
        assert_eq!(p.next_op(), Operation::ListMovies);
    }

    #[test]
    fn abbreviated_forms() {
        let mut p = parser("remove_movie: 42\n");
        assert_eq!(p.next_op(), Operation::RemoveMovie { movie_id: 42 });

        let mut p = parser("get_movie: 7\n");
        assert_eq!(p.next_op(), Operation::GetMovie { movie_id: 7 });

        let mut p = parser("search_by_genre: Horror\n");
        assert_eq!(
            p.next_op(),
            Operation::SearchByGenre {
                genre: "Horror".to_owned()
            }
        );
    }

    #[test]
    fn numeric_aliases() {
        let mut p = parser("6: 7\n");
        assert_eq!(p.next_op(), Operation::GetMovie { movie_id: 7 });

        let mut p = parser("3: 9\n");
        assert_eq!(p.next_op(), Operation::RemoveMovie { movie_id: 9 });
    }

    #[test]
    fn add_genre_mapping() {
        let mut p = parser("add_genre:\n  id: 3\n  genre: Sci-Fi\n");
        assert_eq!(
            p.next_op(),
            Operation::AddGenre {
                movie_id: 3,
                genre: "Sci-Fi".to_owned()
            }
        );
    }

    #[test]
    fn several_operations_in_one_mapping() {
        let mut p = parser(
            "add_genre:\n  id: 3\n  genre: Sci-Fi\nremove_movie: 4\nlist_movies:\nget_movie: 5\n",
        );
        assert_eq!(
            p.next_op(),
            Operation::AddGenre {
                movie_id: 3,
                genre: "Sci-Fi".to_owned()
            }
        );
        assert_eq!(p.next_op(), Operation::RemoveMovie { movie_id: 4 });
        assert_eq!(p.next_op(), Operation::ListMovies);
        assert_eq!(p.next_op(), Operation::GetMovie { movie_id: 5 });
        assert_eq!(p.next_op(), Operation::Done);
    }

    #[test]
    fn missing_fields_are_recoverable() {
        let mut p = parser("add_movie:\n  title: X\nremove_movie: 3\n");
        match p.next_op() {
            Operation::ParseError { message } => {
                assert!(message.contains("missing"), "unexpected message: {message}");
                assert!(message.contains("director"), "unexpected message: {message}");
            }
            other => panic!("expected a parse error, got {other:?}"),
        }
        assert!(!p.is_finished());
        assert_eq!(p.next_op(), Operation::RemoveMovie { movie_id: 3 });
    }

    #[test]
    fn year_out_of_range_is_a_parse_error() {
        let mut p = parser(
            "add_movie:\n  title: X\n  director: Y\n  year: 99999999999\n  genre: Z\n",
        );
        match p.next_op() {
            Operation::ParseError { message } => {
                assert!(
                    message.contains("release year") || message.contains("year"),
                    "unexpected message: {message}"
                );
                assert!(message.contains(':'), "expected position in: {message}");
            }
            other => panic!("expected a parse error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_operation_reports_position_and_recovers() {
        let mut p = parser("frobnicate: 1\nlist_movies:\n");
        match p.next_op() {
            Operation::ParseError { message } => {
                assert!(message.contains("frobnicate"), "unexpected: {message}");
            }
            other => panic!("expected a parse error, got {other:?}"),
        }
        assert_eq!(p.next_op(), Operation::ListMovies);
    }

    #[test]
    fn duplicate_fields_keep_the_first_value() {
        let mut p = parser(
            "add_movie:\n  title: First\n  title: Second\n  director: D\n  year: 2001\n  genre: G\n",
        );
        match p.next_op() {
            Operation::AddMovie(m) => assert_eq!(m.title, "First"),
            other => panic!("expected add_movie, got {other:?}"),
        }
    }

    #[test]
    fn tokenizer_error_latches_the_parser() {
        // A second document without a separator is a tokenizer-level error.
        let mut p = parser("list_movies\nadd_movie:\n  title: X\n");
        assert_eq!(p.next_op(), Operation::ListMovies);
        match p.next_op() {
            Operation::ParseError { .. } | Operation::Done => {}
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(p.next_op(), Operation::Done);
        assert_eq!(p.next_op(), Operation::Done);
    }

    #[test]
    fn multiple_documents_in_one_stream() {
        let mut p = parser("---\nlist_movies\n---\nremove_movie: 8\n---\nlist_summaries\n");
        assert_eq!(p.next_op(), Operation::ListMovies);
        assert_eq!(p.next_op(), Operation::RemoveMovie { movie_id: 8 });
        assert_eq!(p.next_op(), Operation::ListSummaries);
        assert_eq!(p.next_op(), Operation::Done);
    }

    #[test]
    fn empty_movie_id_is_invalid() {
        let mut p = parser("remove_movie: ''\n");
        match p.next_op() {
            Operation::ParseError { message } => {
                assert!(message.contains("invalid movie id"), "unexpected: {message}");
            }
            other => panic!("expected a parse error, got {other:?}"),
        }
    }
}
