// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use uuid::Uuid;

use crate::cloud::{
    client::{CloudClient, CloudError, CloudResult},
    types::{Cloud, CreateVolumeParams, Device, Tenant, Volume},
};

const SIM_TENANT: &str = "sim-tenant";
const SIM_CLOUD: u64 = 1;

#[derive(Debug)]
struct SimVolume {
    volume: Volume,
    /// UUID the volume reports once provisioning completes.
    uuid: String,
    /// Reads remaining before the volume reports ready.
    pending_reads: u32,
    attached: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct SimState {
    volumes: BTreeMap<String, SimVolume>,
    devices: BTreeMap<String, Device>,
    next_id: u64,
    next_identity: Option<(String, String)>,
    provisioning_reads: u32,
    create_calls: usize,
    extend_calls: usize,
    detach_calls: usize,
}

/// An in-memory provider. Volumes become ready after a configurable number
/// of reads, so that provisioning is observable by pollers.
#[derive(Debug)]
pub struct SimCloud {
    tenant: Tenant,
    clouds: Vec<Cloud>,
    /// Whether unknown device ids are treated as existing machines.
    open_devices: bool,
    /// Whether the by-name lookup is served, or answers not-found so that
    /// callers fall back to listing.
    name_lookup: bool,
    state: Mutex<SimState>,
}

impl Default for SimCloud {
    fn default() -> SimCloud {
        let mut cloud = SimCloud::new(SIM_TENANT, &[SIM_CLOUD]);
        cloud.open_devices = true;
        cloud
    }
}

impl SimCloud {
    pub fn new(tenant_id: &str, cloud_ids: &[u64]) -> SimCloud {
        SimCloud {
            tenant: Tenant {
                tenant_id: tenant_id.to_owned(),
                name: format!("{tenant_id} (simulated)"),
            },
            clouds: cloud_ids
                .iter()
                .map(|id| Cloud {
                    id: *id,
                    name: format!("cloud-{id}"),
                })
                .collect(),
            open_devices: false,
            name_lookup: true,
            state: Mutex::new(SimState::default()),
        }
    }

    pub fn without_name_lookup(mut self) -> SimCloud {
        self.name_lookup = false;
        self
    }

    fn state(&self) -> CloudResult<MutexGuard<'_, SimState>> {
        self.state
            .lock()
            .map_err(|_| CloudError::new(Some(500), "simulator state is poisoned"))
    }

    fn check_tenant(&self, tenant_id: &str) -> CloudResult<()> {
        if tenant_id == self.tenant.tenant_id {
            Ok(())
        } else {
            Err(CloudError::not_found(format!("tenant {tenant_id} not found")))
        }
    }

    pub fn add_device(&self, local_id: &str, display_name: &str) -> CloudResult<()> {
        self.state()?.devices.insert(
            local_id.to_owned(),
            Device {
                local_id: local_id.to_owned(),
                display_name: display_name.to_owned(),
            },
        );
        Ok(())
    }

    /// Number of reads a new or extended volume stays in provisioning.
    pub fn set_provisioning_reads(&self, reads: u32) -> CloudResult<()> {
        self.state()?.provisioning_reads = reads;
        Ok(())
    }

    /// Fix the id and UUID handed to the next created volume.
    pub fn set_next_identity(&self, local_id: &str, uuid: &str) -> CloudResult<()> {
        self.state()?.next_identity = Some((local_id.to_owned(), uuid.to_owned()));
        Ok(())
    }

    /// Seed a volume directly, bypassing creation.
    pub fn insert_volume(&self, volume: Volume) -> CloudResult<()> {
        let uuid = volume.uuid.clone();
        self.state()?.volumes.insert(
            volume.local_id.clone(),
            SimVolume {
                volume,
                uuid,
                pending_reads: 0,
                attached: BTreeSet::new(),
            },
        );
        Ok(())
    }

    pub fn volume(&self, volume_id: &str) -> CloudResult<Option<Volume>> {
        Ok(self
            .state()?
            .volumes
            .get(volume_id)
            .map(|v| v.volume.clone()))
    }

    pub fn attachments(&self, volume_id: &str) -> CloudResult<Vec<String>> {
        Ok(self
            .state()?
            .volumes
            .get(volume_id)
            .map(|v| v.attached.iter().cloned().collect())
            .unwrap_or_default())
    }

    pub fn create_calls(&self) -> CloudResult<usize> {
        Ok(self.state()?.create_calls)
    }

    pub fn extend_calls(&self) -> CloudResult<usize> {
        Ok(self.state()?.extend_calls)
    }

    pub fn detach_calls(&self) -> CloudResult<usize> {
        Ok(self.state()?.detach_calls)
    }

    fn device_exists(&self, state: &SimState, device_id: &str) -> bool {
        self.open_devices || state.devices.contains_key(device_id)
    }
}

/// Advance provisioning by one read and return what the read observes.
fn observe(sim: &mut SimVolume) -> Volume {
    if sim.pending_reads > 0 {
        sim.pending_reads -= 1;
    } else {
        sim.volume.uuid.clone_from(&sim.uuid);
        sim.volume.formatted = 1;
    }
    sim.volume.clone()
}

fn volume_not_found(volume_id: &str) -> CloudError {
    CloudError::not_found(format!("persistent storage {volume_id} not found"))
}

#[async_trait]
impl CloudClient for SimCloud {
    async fn current_tenant(&self) -> CloudResult<Tenant> {
        Ok(self.tenant.clone())
    }

    async fn list_clouds(&self, tenant_id: &str) -> CloudResult<Vec<Cloud>> {
        self.check_tenant(tenant_id)?;
        Ok(self.clouds.clone())
    }

    async fn get_device(&self, tenant_id: &str, device_id: &str) -> CloudResult<Device> {
        self.check_tenant(tenant_id)?;
        let state = self.state()?;
        match state.devices.get(device_id) {
            Some(device) => Ok(device.clone()),
            None if self.open_devices => Ok(Device {
                local_id: device_id.to_owned(),
                display_name: device_id.to_owned(),
            }),
            None => Err(CloudError::not_found(format!(
                "device {device_id} not found"
            ))),
        }
    }

    async fn list_volumes(&self, tenant_id: &str) -> CloudResult<Vec<Volume>> {
        self.check_tenant(tenant_id)?;
        Ok(self
            .state()?
            .volumes
            .values_mut()
            .map(observe)
            .collect())
    }

    async fn get_volume(&self, tenant_id: &str, volume_id: &str) -> CloudResult<Volume> {
        self.check_tenant(tenant_id)?;
        self.state()?
            .volumes
            .get_mut(volume_id)
            .map(observe)
            .ok_or_else(|| volume_not_found(volume_id))
    }

    async fn get_volume_by_name(&self, tenant_id: &str, name: &str) -> CloudResult<Volume> {
        self.check_tenant(tenant_id)?;
        if !self.name_lookup {
            return Err(CloudError::not_found("lookup by name is not supported"));
        }
        self.state()?
            .volumes
            .values_mut()
            .find(|v| v.volume.name == name)
            .map(observe)
            .ok_or_else(|| volume_not_found(name))
    }

    async fn create_volume(
        &self,
        tenant_id: &str,
        params: &CreateVolumeParams,
    ) -> CloudResult<Volume> {
        self.check_tenant(tenant_id)?;
        if !self.clouds.iter().any(|c| c.id.to_string() == params.cloud_id) {
            return Err(CloudError::new(
                Some(422),
                format!("cloud {} does not exist", params.cloud_id),
            ));
        }

        let mut state = self.state()?;
        state.create_calls += 1;
        if state.volumes.values().any(|v| v.volume.name == params.name) {
            return Err(CloudError::new(
                Some(409),
                format!("persistent storage {} already exists", params.name),
            ));
        }

        let (local_id, uuid) = match state.next_identity.take() {
            Some(identity) => identity,
            None => {
                state.next_id += 1;
                (
                    format!("sim{:04}", state.next_id),
                    Uuid::new_v4().to_string(),
                )
            }
        };

        let volume = Volume {
            local_id: local_id.clone(),
            uuid: String::new(),
            name: params.name.clone(),
            capacity: params.size,
            formatted: 0,
        };
        let pending_reads = state.provisioning_reads;
        state.volumes.insert(
            local_id,
            SimVolume {
                volume: volume.clone(),
                uuid,
                pending_reads,
                attached: BTreeSet::new(),
            },
        );
        Ok(volume)
    }

    async fn delete_volume(&self, tenant_id: &str, volume_id: &str) -> CloudResult<()> {
        self.check_tenant(tenant_id)?;
        self.state()?
            .volumes
            .remove(volume_id)
            .map(|_| ())
            .ok_or_else(|| volume_not_found(volume_id))
    }

    async fn attach_volume(
        &self,
        tenant_id: &str,
        volume_id: &str,
        device_id: &str,
    ) -> CloudResult<()> {
        self.check_tenant(tenant_id)?;
        let mut state = self.state()?;
        if !self.device_exists(&state, device_id) {
            return Err(CloudError::not_found(format!(
                "device {device_id} not found"
            )));
        }
        let volume = state
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| volume_not_found(volume_id))?;
        volume.attached.insert(device_id.to_owned());
        Ok(())
    }

    async fn detach_volume(
        &self,
        tenant_id: &str,
        volume_id: &str,
        device_id: &str,
    ) -> CloudResult<()> {
        self.check_tenant(tenant_id)?;
        let mut state = self.state()?;
        state.detach_calls += 1;
        let volume = state
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| volume_not_found(volume_id))?;
        if volume.attached.remove(device_id) {
            Ok(())
        } else {
            Err(CloudError::not_found(format!(
                "persistent storage {volume_id} is not attached to {device_id}"
            )))
        }
    }

    async fn extend_volume(&self, volume_id: &str, size_gib: i64) -> CloudResult<()> {
        let mut state = self.state()?;
        state.extend_calls += 1;
        let pending_reads = state.provisioning_reads;
        let sim = state
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| volume_not_found(volume_id))?;
        if size_gib <= sim.volume.capacity {
            return Err(CloudError::new(
                Some(422),
                format!(
                    "new size {size_gib} must exceed current size {}",
                    sim.volume.capacity
                ),
            ));
        }
        sim.volume.capacity = size_gib;
        sim.volume.formatted = 0;
        sim.pending_reads = pending_reads;
        Ok(())
    }
}
