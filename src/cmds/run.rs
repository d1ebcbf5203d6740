// This file is part of Cinedex, a movie catalog service.
// Copyright (C) 2026 The Cinedex Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Subcommand to run the catalog server.

use crate::worker::WorkerPool;
use base::shutdown::{ShutdownFlag, SHUTDOWN_REGISTER_FAILED};
use base::{err, Error};
use bpaf::Bpaf;
use nix::sys::signal::{self, SigHandler, Signal};
use std::io;
use std::net::TcpListener;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

pub const DEFAULT_PORT: u16 = 12_345;
const BACKLOG: i32 = 32;

/// Accept timeout, so the loop polls the shutdown flag.
const ACCEPT_TICK: Duration = Duration::from_secs(1);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);
const PUSH_RETRIES: u32 = 16;

/// Runs the catalog server.
#[derive(Bpaf, Debug)]
#[bpaf(command("run"))]
pub struct Args {
    /// Path of the SQLite3 catalog database.
    #[bpaf(long, argument("PATH"), fallback(db::DATABASE.into()), debug_fallback)]
    db: PathBuf,

    /// TCP port to listen on.
    #[bpaf(long, argument("PORT"), fallback(DEFAULT_PORT), display_fallback)]
    port: u16,

    /// Number of worker threads.
    #[bpaf(long, argument("N"), fallback(8), display_fallback)]
    workers: usize,
}

pub fn run(args: Args) -> Result<i32, Error> {
    db::setup(&args.db)?;
    let shutdown = ShutdownFlag::new();
    install_signal_handlers(&shutdown)?;
    let mut pool = WorkerPool::start(args.workers, args.db.clone(), shutdown.clone())?;
    let listener = bind(args.port)?;
    info!("listening on port {}", args.port);

    serve(&listener, &mut pool, &shutdown);

    info!("shutting down");
    pool.stop();
    Ok(0)
}

fn install_signal_handlers(shutdown: &ShutdownFlag) -> Result<(), Error> {
    for sig in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(sig, shutdown.as_atomic().clone())
            .map_err(|e| err!(Hard, "{SHUTDOWN_REGISTER_FAILED}: {e}"))?;
    }
    // A client that disappears mid-response must surface as EPIPE, not kill
    // the process.
    unsafe { signal::signal(Signal::SIGPIPE, SigHandler::SigIgn) }
        .map_err(|e| err!(Hard, "{SHUTDOWN_REGISTER_FAILED}: {e}"))?;
    Ok(())
}

fn bind(port: u16) -> Result<TcpListener, Error> {
    let sock = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )
    .map_err(|e| err!(Hard, "unable to create socket: {e}"))?;
    sock.set_reuse_address(true)
        .map_err(|e| err!(Hard, "unable to set SO_REUSEADDR: {e}"))?;
    let addr: std::net::SocketAddr = (std::net::Ipv4Addr::UNSPECIFIED, port).into();
    sock.bind(&addr.into())
        .map_err(|e| err!(Hard, "unable to bind port {port}: {e}"))?;
    sock.listen(BACKLOG)
        .map_err(|e| err!(Hard, "unable to listen on port {port}: {e}"))?;
    sock.set_read_timeout(Some(ACCEPT_TICK))
        .map_err(|e| err!(Hard, "unable to set accept timeout: {e}"))?;
    Ok(sock.into())
}

/// Accepts connections until shutdown is requested, handing each socket to
/// the pool with its client timeouts already set.
fn serve(listener: &TcpListener, pool: &mut WorkerPool, shutdown: &ShutdownFlag) {
    while !shutdown.requested() {
        let (stream, peer) = match listener.accept() {
            Ok(x) => x,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(e) => {
                error!("accept failed: {e}");
                std::thread::sleep(Duration::from_millis(100));
                continue;
            }
        };
        let timeouts = stream
            .set_read_timeout(Some(CLIENT_TIMEOUT))
            .and_then(|()| stream.set_write_timeout(Some(CLIENT_TIMEOUT)));
        if let Err(e) = timeouts {
            warn!("unable to set timeouts for {peer}: {e}");
            continue;
        }
        if !pool.add_work(stream, PUSH_RETRIES) {
            warn!("dropping connection from {peer}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read as _, Write as _};
    use std::net::{Shutdown, SocketAddr, TcpStream};
    use std::path::Path;
    use std::thread;

    fn start_server(db_path: &Path) -> (SocketAddr, ShutdownFlag, thread::JoinHandle<()>) {
        db::testutil::init();
        db::setup(db_path).unwrap();
        let shutdown = ShutdownFlag::new();
        let mut pool =
            WorkerPool::start(2, db_path.to_path_buf(), shutdown.clone()).unwrap();
        let listener = bind(0).unwrap();
        let addr = listener.local_addr().unwrap();
        let sd = shutdown.clone();
        let handle = thread::spawn(move || {
            serve(&listener, &mut pool, &sd);
            pool.stop();
        });
        (addr, shutdown, handle)
    }

    fn roundtrip(addr: SocketAddr, request: &str) -> String {
        let mut s = TcpStream::connect(addr).unwrap();
        s.write_all(request.as_bytes()).unwrap();
        s.shutdown(Shutdown::Write).unwrap();
        let mut response = String::new();
        s.read_to_string(&mut response).unwrap();
        response
    }

    /// Extracts the id from a `movie[<id>]: <title>` echo line.
    fn echoed_id(response: &str) -> i64 {
        let start = response.find("movie[").expect("no echo line") + "movie[".len();
        let end = response[start..].find(']').unwrap() + start;
        response[start..end].parse().unwrap()
    }

    #[test]
    fn register_fetch_and_errors_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("movies.db");
        let (addr, shutdown, handle) = start_server(&db_path);

        // Register and fetch.
        let resp = roundtrip(
            addr,
            "---\n\
             add_movie:\n\
             \x20 title: \"Star Wars\"\n\
             \x20 director: \"George Lucas\"\n\
             \x20 release_year: 1977\n\
             \x20 genres: [Sci-Fi, Thriller]\n",
        );
        assert!(resp.contains("server: ok\n"), "got: {resp}");
        assert!(resp.contains("]: Star Wars\n"), "got: {resp}");
        let id = echoed_id(&resp);
        assert!(id > 0);

        let resp = roundtrip(addr, &format!("get_movie: {id}\n"));
        assert!(
            resp.contains(&format!("---\nid: {id}\ntitle: Star Wars\nrelease_year: 1977\ndirector: George Lucas\ngenres:\n")),
            "got: {resp}"
        );
        assert!(resp.contains("  - Sci-Fi\n"), "got: {resp}");
        assert!(resp.contains("  - Thriller\n"), "got: {resp}");
        assert!(resp.ends_with("...\n"), "got: {resp}");

        // Duplicate genre wording.
        let resp = roundtrip(addr, &format!("add_genre:\n  id: {id}\n  genre: Sci-Fi\n"));
        assert_eq!(
            resp,
            format!("server: movie with id = {id} already has the provided genre\n\n")
        );

        // Missing-movie delete wording.
        let resp = roundtrip(addr, "remove_movie: 9999\n");
        assert_eq!(
            resp,
            "server: no movie with id = 9999 to be deleted from the database\n\n"
        );

        // Listings.
        let resp = roundtrip(addr, "list_movies\n");
        assert!(resp.starts_with("---\nmovies:\n"), "got: {resp}");
        assert!(resp.contains("  - id: "), "got: {resp}");
        let resp = roundtrip(addr, "list_summaries\n");
        assert!(resp.contains("summaries:\n- {id: "), "got: {resp}");
        assert!(resp.contains("title: 'Star Wars'"), "got: {resp}");

        shutdown.request();
        handle.join().unwrap();
    }

    #[test]
    fn parse_error_recovers_on_same_connection() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("movies.db");
        let (addr, shutdown, handle) = start_server(&db_path);

        let resp = roundtrip(
            addr,
            "add_movie:\n  title: X\nremove_movie: 12345\n",
        );
        assert!(resp.contains("server: parsing error: "), "got: {resp}");
        // The parser stayed usable: the next operation ran and answered.
        assert!(
            resp.contains("server: no movie with id = 12345 to be deleted from the database"),
            "got: {resp}"
        );

        shutdown.request();
        handle.join().unwrap();
    }

    #[test]
    fn shutdown_with_idle_workers_joins_quickly() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("movies.db");
        let (_addr, shutdown, handle) = start_server(&db_path);
        shutdown.request();
        handle.join().unwrap();
    }

    #[test]
    fn enqueue_during_shutdown_drops_the_socket_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("movies.db");
        db::testutil::init();
        db::setup(&db_path).unwrap();
        let shutdown = ShutdownFlag::new();
        let mut pool = WorkerPool::start(1, db_path, shutdown.clone()).unwrap();

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server_side, _) = listener.accept().unwrap();

        shutdown.request();
        assert!(pool.add_work(server_side, 0));
        assert!(pool.queue().is_empty());

        // The dropped socket reads as closed from the client's side.
        let mut buf = [0u8; 1];
        let mut client = client;
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(client.read(&mut buf).unwrap(), 0);

        pool.stop();
    }
}
