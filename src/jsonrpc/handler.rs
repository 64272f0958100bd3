// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use serde::Serialize;
use serde_json::Value;

use crate::{
    daemon::{CsiError, CsiResult},
    driver::Driver,
    jsonrpc::interface::{CsiRequest, CsiResponse, RpcStatus},
};

fn to_value<T: Serialize>(value: T) -> CsiResult<Value> {
    Ok(serde_json::to_value(value)?)
}

async fn route(driver: &Driver, request: CsiRequest) -> CsiResult<Value> {
    let method = request.method();
    match request {
        CsiRequest::GetPluginInfo => to_value(driver.identity().get_plugin_info()),
        CsiRequest::GetPluginCapabilities => {
            to_value(driver.identity().get_plugin_capabilities())
        }
        CsiRequest::Probe => to_value(driver.identity().probe()),

        CsiRequest::CreateVolume(req) => to_value(driver.controller()?.create_volume(&req).await?),
        CsiRequest::DeleteVolume(req) => to_value(driver.controller()?.delete_volume(&req).await?),
        CsiRequest::ControllerPublishVolume(req) => {
            to_value(driver.controller()?.publish_volume(&req).await?)
        }
        CsiRequest::ControllerUnpublishVolume(req) => {
            to_value(driver.controller()?.unpublish_volume(&req).await?)
        }
        CsiRequest::ValidateVolumeCapabilities(req) => {
            to_value(driver.controller()?.validate_volume_capabilities(&req).await?)
        }
        CsiRequest::ControllerExpandVolume(req) => {
            to_value(driver.controller()?.expand_volume(&req).await?)
        }
        CsiRequest::ControllerGetCapabilities => {
            to_value(driver.controller()?.get_capabilities())
        }

        CsiRequest::NodeStageVolume(req) => {
            to_value(driver.on_node(move |node| node.stage_volume(&req)).await?)
        }
        CsiRequest::NodeUnstageVolume(req) => {
            to_value(driver.on_node(move |node| node.unstage_volume(&req)).await?)
        }
        CsiRequest::NodePublishVolume(req) => {
            to_value(driver.on_node(move |node| node.publish_volume(&req)).await?)
        }
        CsiRequest::NodeUnpublishVolume(req) => {
            to_value(driver.on_node(move |node| node.unpublish_volume(&req)).await?)
        }
        CsiRequest::NodeExpandVolume(req) => {
            to_value(driver.on_node(move |node| node.expand_volume(&req)).await?)
        }
        CsiRequest::NodeGetCapabilities => to_value(driver.node()?.get_capabilities()),
        CsiRequest::NodeGetInfo => to_value(driver.node()?.get_info()),

        CsiRequest::ListVolumes
        | CsiRequest::GetCapacity
        | CsiRequest::CreateSnapshot
        | CsiRequest::DeleteSnapshot
        | CsiRequest::ListSnapshots
        | CsiRequest::ControllerGetVolume
        | CsiRequest::ControllerModifyVolume
        | CsiRequest::NodeGetVolumeStats => Err(CsiError::unimplemented(method)),
    }
}

/// Dispatch one request to the registered services and wrap the outcome.
pub async fn process(driver: &Driver, request: CsiRequest) -> CsiResponse {
    let method = request.method();
    debug!("Handling {} request", method);
    match route(driver, request).await {
        Ok(value) => CsiResponse::Result(value),
        Err(err) => {
            error!("{} failed: {}", method, err);
            CsiResponse::Error(RpcStatus::from(&err))
        }
    }
}
