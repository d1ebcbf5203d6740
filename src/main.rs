// This file is part of Cinedex, a movie catalog service.
// Copyright (C) 2026 The Cinedex Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-3.0-or-later

use base::Error;
use bpaf::Bpaf;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

mod cmds;
mod handler;
mod parser;
mod queue;
mod worker;

/// Cinedex: a networked movie catalog server.
#[derive(Bpaf, Debug)]
#[bpaf(options, version)]
enum Args {
    // See docstrings of `cmds::*::Args` structs for a description of the respective subcommands.
    Init(#[bpaf(external(cmds::init::args))] cmds::init::Args),
    Run(#[bpaf(external(cmds::run::args))] cmds::run::Args),
}

impl Args {
    fn run(self) -> Result<i32, Error> {
        match self {
            Args::Init(a) => cmds::init::run(a),
            Args::Run(a) => cmds::run::run(a),
        }
    }
}

fn main() {
    base::tracing_setup::install();

    // Get the program name from the OS (e.g. if invoked as `target/debug/cinedex`: `cinedex`),
    // falling back to the crate name if conversion to a path/UTF-8 string fails.
    let progname = std::env::args_os().next().map(PathBuf::from);
    let progname = progname
        .as_deref()
        .and_then(Path::file_name)
        .and_then(OsStr::to_str)
        .unwrap_or(env!("CARGO_PKG_NAME"));

    let args = match args()
        .fallback_to_usage()
        .run_inner(bpaf::Args::current_args().set_name(progname))
    {
        Ok(a) => a,
        Err(e) => std::process::exit(e.exit_code()),
    };
    tracing::trace!("parsed command-line arguments: {args:#?}");

    match args.run() {
        Err(e) => {
            error!(err = %e.chain(), "exiting due to error");
            std::process::exit(1);
        }
        Ok(rv) => {
            debug!("exiting with status {rv}");
            std::process::exit(rv)
        }
    }
}
