// This file is part of Cinedex, a movie catalog service.
// Copyright (C) 2026 The Cinedex Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Process-wide graceful-shutdown flag.
//!
//! A single atomic set from the signal handler and polled lock-free at every
//! suspension point. Workers additionally carry their own `finished` flag;
//! this one covers the whole process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Message used when wiring the flag to signal handlers fails at startup.
pub const SHUTDOWN_REGISTER_FAILED: &str = "could not register shutdown";

/// Cloneable handle to the process-wide shutdown flag.
#[derive(Clone, Debug, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown. Idempotent.
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// The underlying atomic, for handing to signal registration.
    pub fn as_atomic(&self) -> &Arc<AtomicBool> {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::ShutdownFlag;

    #[test]
    fn request_is_visible_through_clones() {
        let flag = ShutdownFlag::new();
        let other = flag.clone();
        assert!(!other.requested());
        flag.request();
        assert!(other.requested());
        flag.request();
        assert!(flag.requested());
    }
}
