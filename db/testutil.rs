// This file is part of Cinedex, a movie catalog service.
// Copyright (C) 2026 The Cinedex Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Test support.

use std::sync::Once;

static INIT: Once = Once::new();

/// Performs global initialization for tests: installs the tracing
/// subscriber. May be called multiple times.
pub fn init() {
    INIT.call_once(base::tracing_setup::install_for_tests);
}

/// A fresh in-memory database connection with the schema applied.
pub fn new_conn() -> crate::Connection {
    init();
    crate::Connection::connect_in_memory().expect("in-memory db should open")
}
