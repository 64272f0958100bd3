// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{env, error::Error, process};

use clap::Parser;
use env_logger::Builder;
use serde_json::{json, Value};
use tokio::runtime::Builder as RuntimeBuilder;

use cloudvold::{
    driver::DEFAULT_ENDPOINT,
    jsonrpc::{CsiClient, CsiRequest, CsiResponse},
};

/// Send a single call to a running cloudvold and print its result.
#[derive(Debug, Parser)]
#[command(name = "cloudvolctl", version)]
struct Args {
    /// Endpoint of the daemon's socket.
    #[arg(long, env = "CSI_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Method name, such as Probe or NodeGetInfo.
    method: String,

    /// Parameters of the call as a JSON object.
    params: Option<String>,
}

fn request(args: &Args) -> Result<CsiRequest, Box<dyn Error>> {
    let mut envelope = json!({ "method": args.method });
    if let Some(ref params) = args.params {
        envelope["params"] = serde_json::from_str::<Value>(params)?;
    }
    Ok(serde_json::from_value(envelope)?)
}

fn main() -> Result<(), Box<dyn Error>> {
    let mut builder = Builder::new();
    if let Ok(s) = env::var("RUST_LOG") {
        builder.parse_filters(&s);
    }
    builder.init();

    let args = Args::parse();
    let request = request(&args)?;
    let client = CsiClient::from_endpoint(&args.endpoint)?;

    let runtime = RuntimeBuilder::new_current_thread().enable_all().build()?;
    match runtime.block_on(client.send(&request))? {
        CsiResponse::Result(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        CsiResponse::Error(status) => {
            eprintln!("{}: {}", status.code, status.message);
            process::exit(1);
        }
    }
}
