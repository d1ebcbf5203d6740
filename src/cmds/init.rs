// This file is part of Cinedex, a movie catalog service.
// Copyright (C) 2026 The Cinedex Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Subcommand to create or migrate the catalog database.

use base::Error;
use bpaf::Bpaf;
use std::path::PathBuf;
use tracing::info;

/// Initializes the catalog database.
#[derive(Bpaf, Debug)]
#[bpaf(command("init"))]
pub struct Args {
    /// Path of the SQLite3 catalog database.
    #[bpaf(long, argument("PATH"), fallback(db::DATABASE.into()), debug_fallback)]
    db: PathBuf,
}

pub fn run(args: Args) -> Result<i32, Error> {
    db::setup(&args.db)?;
    let mut conn = db::Connection::connect(&args.db)?;
    conn.reindex()?;
    conn.close()?;
    info!("database initialized at {}", args.db.display());
    Ok(0)
}
