// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use crate::driver::{
    capacity::CapacityPolicy, poll::PollPolicy, types::Mode, DEFAULT_ENDPOINT,
    DEFAULT_MAX_VOLUMES_PER_NODE,
};

/// Settings fixed for the lifetime of the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    pub mode: Mode,
    pub endpoint: String,
    /// Cloud new volumes are created in.
    pub cloud_id: String,
    /// Rescan the SCSI bus around stage, unstage and expand.
    pub rescan_on_resize: bool,
    pub capacity: CapacityPolicy,
    pub poll: PollPolicy,
    pub max_volumes_per_node: i64,
}

impl Default for DriverConfig {
    fn default() -> DriverConfig {
        DriverConfig {
            mode: Mode::All,
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            cloud_id: String::new(),
            rescan_on_resize: false,
            capacity: CapacityPolicy::default(),
            poll: PollPolicy::default(),
            max_volumes_per_node: DEFAULT_MAX_VOLUMES_PER_NODE,
        }
    }
}
