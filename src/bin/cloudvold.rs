// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{env, error::Error, str::FromStr};

use clap::Parser;
use env_logger::Builder;
use log::LevelFilter;

use cloudvold::daemon::{run, Args};

/// Configure and initialize the logger. An explicit log level applies to
/// this crate only; otherwise RUST_LOG is honored.
fn initialize_log(log_level: Option<&str>) {
    let mut builder = Builder::new();
    if let Some(log_level) = log_level {
        builder.filter(
            Some("cloudvold"),
            LevelFilter::from_str(log_level)
                .expect("argument parser only accepts valid log levels"),
        );
    } else if let Ok(s) = env::var("RUST_LOG") {
        builder.parse_filters(&s);
    }
    builder.init();
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    initialize_log(args.log_level.as_deref());
    run(&args)?;
    Ok(())
}
