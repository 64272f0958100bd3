// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use serde_derive::{Deserialize, Serialize};

/// Storage type requested for every volume the driver creates.
pub const VOLUME_TYPE_BLOCK: u32 = 2;

const GIB: i64 = 1 << 30;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    #[serde(rename = "tenantId")]
    pub tenant_id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cloud {
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

/// A virtual machine that volumes may be attached to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Device {
    pub local_id: String,
    pub display_name: String,
}

/// A persistent storage volume as reported by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    #[serde(rename = "localId")]
    pub local_id: String,
    #[serde(default)]
    pub uuid: String,
    pub name: String,
    /// Size in GiB.
    #[serde(default)]
    pub capacity: i64,
    #[serde(default)]
    pub formatted: u8,
}

impl Volume {
    /// A volume is usable once the provider has assigned a device UUID and
    /// finished formatting it.
    pub fn is_ready(&self) -> bool {
        !self.uuid.is_empty() && self.formatted != 0
    }

    pub fn capacity_bytes(&self) -> i64 {
        self.capacity.saturating_mul(GIB)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateVolumeParams {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: u32,
    #[serde(rename = "cloudId")]
    pub cloud_id: String,
    /// Size in GiB.
    pub size: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_needs_uuid_and_format() {
        let mut volume = Volume {
            local_id: "vol1".into(),
            name: "pvc-1".into(),
            capacity: 8,
            ..Default::default()
        };
        assert!(!volume.is_ready());

        volume.uuid = "U1".into();
        assert!(!volume.is_ready());

        volume.formatted = 1;
        assert!(volume.is_ready());
        assert_eq!(volume.capacity_bytes(), 8 * GIB);
    }

    #[test]
    fn volume_wire_names() {
        let volume: Volume = serde_json::from_str(
            r#"{"localId": "abc", "uuid": "U1", "name": "pvc-1", "capacity": 10, "formatted": 1}"#,
        )
        .unwrap();
        assert_eq!(volume.local_id, "abc");
        assert!(volume.is_ready());

        let params = serde_json::to_value(CreateVolumeParams {
            name: "pvc-1".into(),
            kind: VOLUME_TYPE_BLOCK,
            cloud_id: "7".into(),
            size: 10,
        })
        .unwrap();
        assert_eq!(params["type"], 2);
        assert_eq!(params["cloudId"], "7");
    }
}
