// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Line-delimited JSON calls over a Unix domain socket.

pub use self::{
    client::CsiClient,
    handler::process,
    interface::{CsiRequest, CsiResponse, RpcStatus},
    server::{socket_path, CsiServer},
};

mod client;
mod handler;
mod interface;
mod server;

/// Requests longer than this are cut off and fail to parse.
pub const MAX_REQUEST_BYTES: u64 = 1 << 20;
