// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use crate::{
    daemon::VERSION,
    driver::{
        types::{
            GetPluginCapabilitiesResponse, GetPluginInfoResponse, PluginCapability, ProbeResponse,
        },
        DRIVER_NAME,
    },
};

/// Plugin metadata and health. Registered in every mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityService {
    name: &'static str,
    vendor_version: &'static str,
}

impl Default for IdentityService {
    fn default() -> IdentityService {
        IdentityService {
            name: DRIVER_NAME,
            vendor_version: VERSION,
        }
    }
}

impl IdentityService {
    pub fn get_plugin_info(&self) -> GetPluginInfoResponse {
        GetPluginInfoResponse {
            name: self.name.to_owned(),
            vendor_version: self.vendor_version.to_owned(),
        }
    }

    pub fn get_plugin_capabilities(&self) -> GetPluginCapabilitiesResponse {
        GetPluginCapabilitiesResponse {
            capabilities: vec![PluginCapability::ControllerService],
        }
    }

    pub fn probe(&self) -> ProbeResponse {
        ProbeResponse { ready: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity() {
        let identity = IdentityService::default();
        let info = identity.get_plugin_info();
        assert_eq!(info.name, "csi.cloudvol.io");
        assert_eq!(info.vendor_version, VERSION);
        assert_eq!(
            identity.get_plugin_capabilities().capabilities,
            vec![PluginCapability::ControllerService]
        );
        assert!(identity.probe().ready);
    }
}
