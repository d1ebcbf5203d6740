// This file is part of Cinedex, a movie catalog service.
// Copyright (C) 2026 The Cinedex Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Fixed-size supervised worker pool.
//!
//! Each worker owns a private database connection and drains the shared
//! work queue. The accept loop supervises on every enqueue: finished
//! workers are joined and respawned with fresh ids. Shutdown sets the
//! per-worker finished flags, drains the queue, and sends SIGUSR1 to
//! interrupt any blocking `recv` or park.

use crate::handler;
use crate::queue::WorkQueue;
use base::shutdown::ShutdownFlag;
use base::{err, Error};
use nix::sys::pthread;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::net::TcpStream;
use std::os::fd::{FromRawFd, IntoRawFd};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};

pub const WORKERS_CAPACITY: usize = 128;

extern "C" fn unpark_handler(_: nix::libc::c_int) {}

struct WorkerSlot {
    id: u64,
    handle: thread::JoinHandle<bool>,
    finished: Arc<AtomicBool>,
    pthread: Arc<AtomicU64>,
}

pub struct WorkerPool {
    queue: Arc<WorkQueue>,
    workers: Vec<WorkerSlot>,
    next_id: u64,
    shutdown: ShutdownFlag,
    db_path: PathBuf,
}

impl WorkerPool {
    /// Spawns `count` workers (clamped to [`WORKERS_CAPACITY`]) and installs
    /// the SIGUSR1 unpark handler. No `SA_RESTART`: the signal must make a
    /// blocking `recv` return `EINTR`.
    pub fn start(count: usize, db_path: PathBuf, shutdown: ShutdownFlag) -> Result<Self, Error> {
        let count = count.clamp(1, WORKERS_CAPACITY);
        let action = SigAction::new(
            SigHandler::Handler(unpark_handler),
            SaFlags::empty(),
            SigSet::empty(),
        );
        unsafe { signal::sigaction(Signal::SIGUSR1, &action) }
            .map_err(|e| err!(Hard, "unable to install SIGUSR1 handler: {e}"))?;

        let mut pool = WorkerPool {
            queue: Arc::new(WorkQueue::new()),
            workers: Vec::with_capacity(count),
            next_id: 0,
            shutdown,
            db_path,
        };
        for _ in 0..count {
            let slot = pool.spawn_worker()?;
            pool.workers.push(slot);
        }
        Ok(pool)
    }

    fn spawn_worker(&mut self) -> Result<WorkerSlot, Error> {
        let id = self.next_id;
        self.next_id += 1;
        let finished = Arc::new(AtomicBool::new(false));
        let pthread = Arc::new(AtomicU64::new(0));
        let queue = self.queue.clone();
        let shutdown = self.shutdown.clone();
        let db_path = self.db_path.clone();
        let handle = {
            let finished = finished.clone();
            let pthread = pthread.clone();
            thread::Builder::new()
                .name(format!("worker-{id}"))
                .spawn(move || worker_main(id, queue, finished, pthread, shutdown, db_path))
                .map_err(|e| err!(Hard, "unable to spawn worker {id}: {e}"))?
        };
        info!("started worker {id}");
        Ok(WorkerSlot {
            id,
            handle,
            finished,
            pthread,
        })
    }

    /// Joins workers that have died and spawns replacements.
    fn supervise(&mut self) {
        for i in 0..self.workers.len() {
            if !self.workers[i].handle.is_finished() {
                continue;
            }
            match self.spawn_worker() {
                Ok(slot) => {
                    let old = std::mem::replace(&mut self.workers[i], slot);
                    join_worker(old);
                }
                Err(e) => error!(err = %e.chain(), "unable to respawn worker"),
            }
        }
    }

    /// Hands an accepted socket to the pool. During shutdown the socket is
    /// dropped cleanly and the call still succeeds. Returns `false` when the
    /// queue stayed full for `retries` attempts or no worker could be
    /// revived; the socket is closed in either case.
    pub fn add_work(&mut self, stream: TcpStream, retries: u32) -> bool {
        if self.shutdown.requested() {
            return true;
        }
        self.supervise();
        if self.workers.iter().all(|w| w.handle.is_finished()) {
            return false;
        }

        let fd = stream.into_raw_fd();
        let mut tries = 0;
        loop {
            if self.queue.push(fd) {
                return true;
            }
            if tries >= retries {
                // The fd was never published; reclaim it so it closes.
                // SAFETY: `push` refused the fd, so this is its only owner.
                drop(unsafe { TcpStream::from_raw_fd(fd) });
                return false;
            }
            tries += 1;
            std::hint::spin_loop();
        }
    }

    /// Stops every worker: flags, queue drain, condvar wake, SIGUSR1 to
    /// interrupt blocking reads, then join.
    pub fn stop(mut self) {
        self.shutdown.request();
        for w in &self.workers {
            w.finished.store(true, Ordering::SeqCst);
        }
        for fd in self.queue.clear() {
            // SAFETY: a drained fd was never adopted by any worker.
            drop(unsafe { TcpStream::from_raw_fd(fd) });
        }
        self.queue.notify_all();
        for w in &self.workers {
            let p = w.pthread.load(Ordering::SeqCst);
            if p != 0 {
                if let Err(e) = pthread::pthread_kill(p as pthread::Pthread, Signal::SIGUSR1) {
                    warn!("unable to signal worker {}: {e}", w.id);
                }
            }
        }
        for w in self.workers.drain(..) {
            join_worker(w);
        }
        info!("worker pool stopped");
    }

    #[cfg(test)]
    pub(crate) fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }
}

fn join_worker(slot: WorkerSlot) {
    match slot.handle.join() {
        Ok(true) => info!("worker {} exited cleanly", slot.id),
        Ok(false) => warn!("worker {} exited after a failure", slot.id),
        Err(_) => error!("worker {} panicked", slot.id),
    }
}

fn worker_main(
    id: u64,
    queue: Arc<WorkQueue>,
    finished: Arc<AtomicBool>,
    pthread_slot: Arc<AtomicU64>,
    shutdown: ShutdownFlag,
    db_path: PathBuf,
) -> bool {
    pthread_slot.store(pthread::pthread_self() as u64, Ordering::SeqCst);
    mask_signals();

    let mut conn = match db::Connection::connect(&db_path) {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e.chain(), "worker {id}: unable to open database");
            finished.store(true, Ordering::SeqCst);
            return false;
        }
    };

    let mut clean = true;
    while !finished.load(Ordering::SeqCst) && !shutdown.requested() {
        match queue.pop() {
            Some(fd) => {
                // SAFETY: ownership of the fd travels through the queue;
                // the winning pop is its only adopter.
                let stream = unsafe { TcpStream::from_raw_fd(fd) };
                if !handler::handle_client(id, &stream, &mut conn, &finished) {
                    clean = false;
                    break;
                }
            }
            None => {
                if !queue.wait_not_empty(&finished) {
                    break;
                }
            }
        }
    }

    if let Err(e) = conn.close() {
        warn!(err = %e.chain(), "worker {id}: close failed");
    }
    info!("worker {id}: exiting");
    clean
}

/// Workers block every signal except SIGUSR1, which is used to unpark them.
fn mask_signals() {
    let mut set = SigSet::all();
    set.remove(Signal::SIGUSR1);
    if let Err(e) = signal::pthread_sigmask(signal::SigmaskHow::SIG_SETMASK, Some(&set), None) {
        warn!("unable to set worker signal mask: {e}");
    }
}
