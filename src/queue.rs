// This file is part of Cinedex, a movie catalog service.
// Copyright (C) 2026 The Cinedex Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Bounded lock-free ring of accepted client sockets.
//!
//! Single producer (the accept loop), many consumers (the workers). The hot
//! path is atomics only; a mutex+condvar pair exists solely to park idle
//! consumers. `head` and `tail` are monotonic tickets, reduced mod capacity
//! for indexing, and deliberately share one cache line: they exhibit true
//! sharing anyway, and keeping them together is cheaper than ping-ponging a
//! second line.
//!
//! Ordering: `push` stores the cell and then release-CASes `tail`, so a
//! consumer that acquires `tail` (or wins the acquire-CAS on `head`) sees
//! the cell write. A consumer reads the cell before CASing `head`; if the
//! CAS fails another consumer won the ticket and the read is discarded. The
//! cells are atomics, so that stale read is harmless.

use base::{Condvar, Mutex};
use crossbeam_utils::CachePadded;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::time::Duration;

pub const WORK_QUEUE_CAPACITY: usize = 128;
const _: () = assert!(WORK_QUEUE_CAPACITY.is_power_of_two());

/// How long a parked consumer sleeps before re-checking its finished flag.
const PARK_TICK: Duration = Duration::from_millis(500);

struct Counters {
    /// Next ticket to pop.
    head: AtomicU64,
    /// Next ticket to push.
    tail: AtomicU64,
}

pub struct WorkQueue {
    counters: CachePadded<Counters>,
    buf: [AtomicI32; WORK_QUEUE_CAPACITY],
    park_mutex: Mutex<()>,
    item_added: Condvar,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        WorkQueue {
            counters: CachePadded::new(Counters {
                head: AtomicU64::new(0),
                tail: AtomicU64::new(0),
            }),
            buf: std::array::from_fn(|_| AtomicI32::new(-1)),
            park_mutex: Mutex::new(()),
            item_added: Condvar::new(),
        }
    }

    #[inline]
    fn index(ticket: u64) -> usize {
        (ticket as usize) & (WORK_QUEUE_CAPACITY - 1)
    }

    pub fn len(&self) -> usize {
        let head = self.counters.head.load(Ordering::Acquire);
        let tail = self.counters.tail.load(Ordering::Acquire);
        tail.wrapping_sub(head) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueues a socket fd. Single producer only. Returns `false` without
    /// mutating the queue when full.
    pub fn push(&self, fd: RawFd) -> bool {
        let tail = self.counters.tail.load(Ordering::Relaxed);
        let mut head = self.counters.head.load(Ordering::Relaxed);
        if tail.wrapping_sub(head) as usize >= WORK_QUEUE_CAPACITY {
            // Looks full; take the latest head before dropping the item.
            head = self.counters.head.load(Ordering::Acquire);
            if tail.wrapping_sub(head) as usize >= WORK_QUEUE_CAPACITY {
                return false;
            }
        }

        self.buf[Self::index(tail)].store(fd, Ordering::Relaxed);
        let ok = self
            .counters
            .tail
            .compare_exchange(tail, tail.wrapping_add(1), Ordering::Release, Ordering::Relaxed)
            .is_ok();
        // A failure here means a second producer raced us and a cell was
        // overwritten.
        debug_assert!(ok);

        let _guard = self.park_mutex.lock();
        self.item_added.notify_one();
        ok
    }

    /// Dequeues a socket fd. Safe from any number of consumers. Returns
    /// `None` when empty.
    pub fn pop(&self) -> Option<RawFd> {
        loop {
            let head = self.counters.head.load(Ordering::Relaxed);
            let mut tail = self.counters.tail.load(Ordering::Relaxed);
            if tail.wrapping_sub(head) == 0 {
                // Looks empty; take the latest tail before giving up.
                tail = self.counters.tail.load(Ordering::Acquire);
                if tail.wrapping_sub(head) == 0 {
                    return None;
                }
            }

            // The ticket at `head` was valid when read, but another consumer
            // may take it (and a push may then reuse the cell). The CAS below
            // detects that and discards this read.
            let fd = self.buf[Self::index(head)].load(Ordering::Acquire);
            if self
                .counters
                .head
                .compare_exchange_weak(head, head.wrapping_add(1), Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return Some(fd);
            }
            std::hint::spin_loop();
        }
    }

    /// Parks the calling consumer until an item is pushed or `finished` is
    /// set. Returns `false` on shutdown, `true` when there is likely work.
    pub fn wait_not_empty(&self, finished: &AtomicBool) -> bool {
        let mut guard = self.park_mutex.lock();
        while self.is_empty() {
            if finished.load(Ordering::SeqCst) {
                return false;
            }
            self.item_added.wait_for(&mut guard, PARK_TICK);
        }
        true
    }

    /// Wakes every parked consumer.
    pub fn notify_all(&self) {
        let _guard = self.park_mutex.lock();
        self.item_added.notify_all();
    }

    /// Drains the queue during teardown, returning the orphaned fds so the
    /// caller can close them.
    pub fn clear(&self) -> Vec<RawFd> {
        let mut orphans = Vec::new();
        while let Some(fd) = self.pop() {
            orphans.push(fd);
        }
        orphans
    }
}
