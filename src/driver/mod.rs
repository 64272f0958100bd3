// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

pub use self::{
    capacity::{format_bytes, CapacityError, CapacityPolicy, GIB},
    config::DriverConfig,
    controller::ControllerService,
    driver::Driver,
    identity::IdentityService,
    metadata::{
        resolve_node_identity, default_providers, EnvProvider, IdentityProvider, KubeNodeProvider,
        MetadataFileProvider, NodeIdentity,
    },
    node::NodeService,
    poll::{poll_until, PollError, PollPolicy},
};

pub mod capacity;
mod config;
mod controller;
#[allow(clippy::module_inception)]
mod driver;
mod identity;
mod metadata;
mod node;
mod poll;
pub mod types;

/// Name the plugin registers under.
pub const DRIVER_NAME: &str = "csi.cloudvol.io";

/// Publish context key carrying the volume's device UUID.
pub const STORAGE_UUID_KEY: &str = "csi.cloudvol.io/storage-uuid";
/// Publish context key carrying the volume's name.
pub const STORAGE_NAME_KEY: &str = "csi.cloudvol.io/storage-name";

pub const DEFAULT_ENDPOINT: &str = "unix:///var/lib/kubelet/plugins/csi.cloudvol.io/csi.sock";
pub const DEFAULT_MAX_VOLUMES_PER_NODE: i64 = 15;
