// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Access to the cloud provider's block storage API.

pub use self::{
    client::{CloudClient, CloudError, CloudResult},
    http::HttpCloud,
    sim::SimCloud,
    types::{Cloud, CreateVolumeParams, Device, Tenant, Volume, VOLUME_TYPE_BLOCK},
};

mod client;
mod http;
mod sim;
mod types;
