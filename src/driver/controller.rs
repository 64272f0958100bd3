// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{collections::HashMap, sync::Arc};

use crate::{
    cloud::{self, CloudClient, CloudError, CreateVolumeParams, VOLUME_TYPE_BLOCK},
    daemon::{CsiError, CsiResult, StatusCode},
    driver::{
        capacity::{format_bytes, CapacityPolicy, GIB},
        config::DriverConfig,
        poll::{poll_until, PollError, PollPolicy},
        types::{
            AccessMode, CapacityRange, ConfirmedCapabilities, ControllerCapability,
            ControllerExpandVolumeRequest, ControllerExpandVolumeResponse,
            ControllerGetCapabilitiesResponse, ControllerPublishVolumeRequest,
            ControllerPublishVolumeResponse, ControllerUnpublishVolumeRequest,
            CreateVolumeRequest, CreateVolumeResponse, DeleteVolumeRequest, Empty,
            ValidateVolumeCapabilitiesRequest, ValidateVolumeCapabilitiesResponse, Volume,
            VolumeCapability,
        },
        STORAGE_NAME_KEY, STORAGE_UUID_KEY,
    },
};

const CONTROLLER_CAPABILITIES: [ControllerCapability; 3] = [
    ControllerCapability::CreateDeleteVolume,
    ControllerCapability::PublishUnpublishVolume,
    ControllerCapability::ExpandVolume,
];

const SUPPORTED_ACCESS_MODE: AccessMode = AccessMode::SingleNodeWriter;

fn require(value: &str, what: &str) -> CsiResult<()> {
    if value.is_empty() {
        Err(CsiError::invalid_argument(format!("{what} not provided")))
    } else {
        Ok(())
    }
}

fn internal(err: CloudError) -> CsiError {
    CsiError::internal(err.to_string())
}

/// True if every capability asks for single node writer access.
pub fn is_valid_capabilities(capabilities: &[VolumeCapability]) -> bool {
    !capabilities.is_empty()
        && capabilities
            .iter()
            .all(|c| c.access_mode == Some(SUPPORTED_ACCESS_MODE))
}

fn publish_context(volume: &cloud::Volume) -> HashMap<String, String> {
    [
        (STORAGE_UUID_KEY.to_owned(), volume.uuid.clone()),
        (STORAGE_NAME_KEY.to_owned(), volume.name.clone()),
    ]
    .into_iter()
    .collect()
}

/// Provisioning and attachment of volumes through the provider API.
pub struct ControllerService {
    cloud: Arc<dyn CloudClient>,
    tenant_id: String,
    cloud_id: String,
    capacity: CapacityPolicy,
    poll: PollPolicy,
}

impl ControllerService {
    /// Resolve the tenant behind the API credentials and check that it may
    /// use the configured cloud.
    pub async fn initialize(
        cloud: Arc<dyn CloudClient>,
        config: &DriverConfig,
    ) -> CsiResult<ControllerService> {
        info!("Initializing controller service");
        require(&config.cloud_id, "cloud id")?;

        let tenant = cloud.current_tenant().await?;
        debug!("Fetched tenant {}", tenant.tenant_id);

        let clouds = cloud.list_clouds(&tenant.tenant_id).await?;
        if !clouds.iter().any(|c| c.id.to_string() == config.cloud_id) {
            return Err(CsiError::invalid_argument(format!(
                "tenant {} has no access to cloud {}",
                tenant.tenant_id, config.cloud_id
            )));
        }

        Ok(ControllerService {
            cloud,
            tenant_id: tenant.tenant_id,
            cloud_id: config.cloud_id.clone(),
            capacity: config.capacity,
            poll: config.poll,
        })
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    fn resolve_gib(&self, range: Option<&CapacityRange>) -> CsiResult<i64> {
        self.capacity.resolve_gib(range).map_err(|err| {
            CsiError::Status(
                StatusCode::OutOfRange,
                format!("invalid capacity range: {err}"),
            )
        })
    }

    /// Find a volume by name. A failed name lookup other than an HTTP error
    /// falls back to scanning the volume list.
    async fn find_by_name(&self, name: &str) -> CsiResult<Option<cloud::Volume>> {
        match self.cloud.get_volume_by_name(&self.tenant_id, name).await {
            Ok(volume) => return Ok(Some(volume)),
            Err(err) if err.is_not_found() || err.is_transport() => {
                debug!("Lookup of volume {} by name failed ({}), listing", name, err);
            }
            Err(err) => return Err(internal(err)),
        }

        let volumes = self
            .cloud
            .list_volumes(&self.tenant_id)
            .await
            .map_err(internal)?;
        Ok(volumes.into_iter().find(|v| v.name == name))
    }

    async fn get_volume(&self, volume_id: &str) -> CsiResult<cloud::Volume> {
        self.cloud
            .get_volume(&self.tenant_id, volume_id)
            .await
            .map_err(|err| {
                if err.is_not_found() {
                    CsiError::not_found(format!("volume {volume_id:?} doesn't exist"))
                } else {
                    internal(err)
                }
            })
    }

    async fn wait_until_ready(&self, volume_id: &str) -> CsiResult<cloud::Volume> {
        poll_until(
            self.poll,
            || self.cloud.get_volume(&self.tenant_id, volume_id),
            cloud::Volume::is_ready,
        )
        .await
        .map_err(|err| match err {
            PollError::TimedOut => CsiError::internal(format!(
                "volume {volume_id} is not ready after {}s",
                self.poll.timeout.as_secs()
            )),
            PollError::Failed(err) => internal(err),
        })
    }

    pub async fn create_volume(&self, req: &CreateVolumeRequest) -> CsiResult<CreateVolumeResponse> {
        require(&req.name, "volume name")?;
        if req.volume_capabilities.is_empty() {
            return Err(CsiError::invalid_argument(
                "volume capabilities not provided",
            ));
        }
        let size_gib = self.resolve_gib(req.capacity_range.as_ref())?;

        info!("Creating volume {} of {} GiB", req.name, size_gib);

        if let Some(existing) = self.find_by_name(&req.name).await? {
            if existing.is_ready() {
                info!(
                    "Volume {} already exists as {}",
                    req.name, existing.local_id
                );
                return Ok(CreateVolumeResponse {
                    volume: Volume {
                        capacity_bytes: existing.capacity_bytes(),
                        volume_id: existing.local_id,
                    },
                });
            }
            return Err(CsiError::Status(
                StatusCode::AlreadyExists,
                format!("volume {} is creating", existing.local_id),
            ));
        }

        let params = CreateVolumeParams {
            name: req.name.clone(),
            kind: VOLUME_TYPE_BLOCK,
            cloud_id: self.cloud_id.clone(),
            size: size_gib,
        };
        let created = self
            .cloud
            .create_volume(&self.tenant_id, &params)
            .await
            .map_err(internal)?;
        debug!(
            "Volume {} created as {}, waiting for it to become ready",
            req.name, created.local_id
        );

        let ready = self.wait_until_ready(&created.local_id).await?;
        info!("Volume {} is ready as {}", req.name, ready.local_id);

        Ok(CreateVolumeResponse {
            volume: Volume {
                volume_id: ready.local_id,
                capacity_bytes: size_gib * GIB,
            },
        })
    }

    pub async fn delete_volume(&self, req: &DeleteVolumeRequest) -> CsiResult<Empty> {
        require(&req.volume_id, "volume id")?;

        match self
            .cloud
            .delete_volume(&self.tenant_id, &req.volume_id)
            .await
        {
            Ok(()) => info!("Volume {} deleted", req.volume_id),
            Err(err) if err.is_not_found() => {
                info!("Volume {} is already gone; no action taken", req.volume_id);
            }
            Err(err) => return Err(internal(err)),
        }
        Ok(Empty {})
    }

    pub async fn publish_volume(
        &self,
        req: &ControllerPublishVolumeRequest,
    ) -> CsiResult<ControllerPublishVolumeResponse> {
        require(&req.volume_id, "volume id")?;
        require(&req.node_id, "node id")?;
        if req.volume_capability.is_none() {
            return Err(CsiError::invalid_argument(
                "volume capability not provided",
            ));
        }

        let volume = self.get_volume(&req.volume_id).await?;
        let device = self
            .cloud
            .get_device(&self.tenant_id, &req.node_id)
            .await
            .map_err(|err| {
                if err.is_not_found() {
                    CsiError::not_found(format!("device {:?} doesn't exist", req.node_id))
                } else {
                    internal(err)
                }
            })?;

        info!(
            "Attaching volume {} to device {} ({})",
            volume.local_id, device.local_id, device.display_name
        );
        self.cloud
            .attach_volume(&self.tenant_id, &volume.local_id, &req.node_id)
            .await
            .map_err(internal)?;

        Ok(ControllerPublishVolumeResponse {
            publish_context: publish_context(&volume),
        })
    }

    pub async fn unpublish_volume(&self, req: &ControllerUnpublishVolumeRequest) -> CsiResult<Empty> {
        require(&req.volume_id, "volume id")?;
        require(&req.node_id, "node id")?;

        match self.cloud.get_volume(&self.tenant_id, &req.volume_id).await {
            Ok(_) => (),
            Err(err) if err.is_not_found() => {
                info!(
                    "Volume {} does not exist; assuming it is detached",
                    req.volume_id
                );
                return Ok(Empty {});
            }
            Err(err) => return Err(internal(err)),
        }

        match self.cloud.get_device(&self.tenant_id, &req.node_id).await {
            Ok(_) => (),
            Err(err) if err.is_not_found() => {
                info!(
                    "Device {} does not exist; assuming volume {} is detached",
                    req.node_id, req.volume_id
                );
                return Ok(Empty {});
            }
            Err(err) => return Err(internal(err)),
        }

        match self
            .cloud
            .detach_volume(&self.tenant_id, &req.volume_id, &req.node_id)
            .await
        {
            Ok(()) => info!(
                "Volume {} detached from device {}",
                req.volume_id, req.node_id
            ),
            Err(err) if err.is_not_found() => info!(
                "Volume {} is not attached to device {}; no action taken",
                req.volume_id, req.node_id
            ),
            Err(err) => return Err(internal(err)),
        }
        Ok(Empty {})
    }

    pub async fn validate_volume_capabilities(
        &self,
        req: &ValidateVolumeCapabilitiesRequest,
    ) -> CsiResult<ValidateVolumeCapabilitiesResponse> {
        require(&req.volume_id, "volume id")?;
        if req.volume_capabilities.is_empty() {
            return Err(CsiError::invalid_argument(
                "volume capabilities not provided",
            ));
        }

        self.get_volume(&req.volume_id).await?;

        if is_valid_capabilities(&req.volume_capabilities) {
            Ok(ValidateVolumeCapabilitiesResponse {
                confirmed: Some(ConfirmedCapabilities {
                    volume_capabilities: vec![VolumeCapability::single_node_writer()],
                }),
                message: String::new(),
            })
        } else {
            Ok(ValidateVolumeCapabilitiesResponse {
                confirmed: None,
                message: format!("only {SUPPORTED_ACCESS_MODE} access is supported"),
            })
        }
    }

    pub async fn expand_volume(
        &self,
        req: &ControllerExpandVolumeRequest,
    ) -> CsiResult<ControllerExpandVolumeResponse> {
        require(&req.volume_id, "volume id")?;
        let size_gib = self.resolve_gib(req.capacity_range.as_ref())?;

        let volume = self
            .cloud
            .get_volume(&self.tenant_id, &req.volume_id)
            .await
            .map_err(|err| {
                if err.is_not_found() {
                    CsiError::not_found(format!("volume {:?} doesn't exist", req.volume_id))
                } else {
                    CsiError::internal(format!("could not fetch existing volume: {err}"))
                }
            })?;

        let current = volume.capacity_bytes();
        if size_gib * GIB <= current {
            info!(
                "Volume {} is already {}, no expansion needed",
                volume.local_id,
                format_bytes(current)
            );
            return Ok(ControllerExpandVolumeResponse {
                capacity_bytes: current,
                node_expansion_required: true,
            });
        }

        info!(
            "Expanding volume {} from {} to {} GiB",
            volume.local_id,
            format_bytes(current),
            size_gib
        );
        self.cloud
            .extend_volume(&volume.local_id, size_gib)
            .await
            .map_err(internal)?;
        self.wait_until_ready(&volume.local_id).await?;

        Ok(ControllerExpandVolumeResponse {
            capacity_bytes: size_gib * GIB,
            node_expansion_required: true,
        })
    }

    pub fn get_capabilities(&self) -> ControllerGetCapabilitiesResponse {
        ControllerGetCapabilitiesResponse {
            capabilities: CONTROLLER_CAPABILITIES.to_vec(),
        }
    }
}
