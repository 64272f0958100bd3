// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{path::PathBuf, time::Duration};

use clap::{builder::PossibleValue, Parser, ValueEnum};
use strum::VariantArray;

use crate::{
    daemon::VERSION,
    driver::{types::Mode, DriverConfig, PollPolicy, DEFAULT_ENDPOINT},
};

pub const DEFAULT_API_URL: &str = "https://api.cloudvol.io/api/service/";
pub const DEFAULT_METADATA_FILE: &str = "/etc/init.d/metadata.json";

impl ValueEnum for Mode {
    fn value_variants<'a>() -> &'a [Mode] {
        Mode::VARIANTS
    }

    fn to_possible_value(&self) -> Option<PossibleValue> {
        let value: &'static str = self.into();
        Some(PossibleValue::new(value))
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "cloudvold", version = VERSION, about = "Cloud block volume driver")]
pub struct Args {
    /// Address the RPC socket listens on.
    #[arg(long, env = "CSI_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Services to register.
    #[arg(long, env = "CLOUDVOL_MODE", default_value = "all")]
    pub mode: Mode,

    #[arg(long, env = "CLOUDVOL_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    #[arg(long, env = "CLOUDVOL_CLIENT_ID", default_value = "")]
    pub client_id: String,

    /// Cloud new volumes are created in.
    #[arg(long, env = "CLOUDVOL_CLOUD_ID", default_value = "")]
    pub cloud_id: String,

    #[arg(long, env = "CLOUDVOL_TOKEN", default_value = "", hide_env_values = true)]
    pub token: String,

    /// Rescan the SCSI bus before staging, unstaging and expanding.
    #[arg(long, env = "CLOUDVOL_RESCAN_ON_RESIZE")]
    pub rescan_on_resize: bool,

    /// Machine metadata consulted for the node identity.
    #[arg(long, env = "CLOUDVOL_METADATA_FILE", default_value = DEFAULT_METADATA_FILE)]
    pub metadata_file: PathBuf,

    /// Sets level for generation of log messages.
    #[arg(long, value_parser = ["trace", "debug", "info", "warn", "error"])]
    pub log_level: Option<String>,

    /// Use the in-memory cloud and mount simulators.
    #[arg(long)]
    pub sim: bool,

    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval_secs: u64,

    #[arg(long, default_value_t = 300, value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_timeout_secs: u64,
}

impl Args {
    pub fn to_config(&self) -> DriverConfig {
        DriverConfig {
            mode: self.mode,
            endpoint: self.endpoint.clone(),
            cloud_id: self.cloud_id.clone(),
            rescan_on_resize: self.rescan_on_resize,
            poll: PollPolicy {
                interval: Duration::from_secs(self.poll_interval_secs),
                timeout: Duration::from_secs(self.poll_timeout_secs),
            },
            ..Default::default()
        }
    }
}
