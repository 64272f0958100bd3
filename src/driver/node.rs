// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// The node service is synchronous: every call shells out or touches the
// mount table. Callers on the async runtime move it to a blocking thread.

use std::{
    fs::{self, DirBuilder},
    io,
    os::unix::fs::DirBuilderExt,
    path::Path,
    sync::Arc,
};

use crate::{
    daemon::{CsiError, CsiResult},
    driver::{
        config::DriverConfig,
        metadata::NodeIdentity,
        types::{
            Empty, NodeCapability, NodeExpandVolumeRequest, NodeGetCapabilitiesResponse,
            NodeGetInfoResponse, NodePublishVolumeRequest, NodeStageVolumeRequest,
            NodeUnpublishVolumeRequest, NodeUnstageVolumeRequest,
        },
        STORAGE_NAME_KEY, STORAGE_UUID_KEY,
    },
    mount::{DeviceLookupError, Mounter},
};

/// Filesystem put on every volume.
pub const FS_TYPE: &str = "ext4";

const MOUNT_POINT_MODE: u32 = 0o750;

const NODE_CAPABILITIES: [NodeCapability; 2] =
    [NodeCapability::StageUnstageVolume, NodeCapability::ExpandVolume];

fn require(value: &str, what: &str) -> CsiResult<()> {
    if value.is_empty() {
        Err(CsiError::invalid_argument(format!("{what} not provided")))
    } else {
        Ok(())
    }
}

fn is_not_found(err: &CsiError) -> bool {
    matches!(*err, CsiError::Io(ref err) if err.kind() == io::ErrorKind::NotFound)
}

fn internal(err: CsiError) -> CsiError {
    match err {
        CsiError::Status(..) => err,
        err => CsiError::internal(err.to_string()),
    }
}

pub struct NodeService {
    mounter: Arc<dyn Mounter>,
    identity: NodeIdentity,
    rescan_on_resize: bool,
    max_volumes_per_node: i64,
}

impl NodeService {
    pub fn new(mounter: Arc<dyn Mounter>, identity: NodeIdentity, config: &DriverConfig) -> NodeService {
        info!("Initializing node service for node {}", identity.local_id);
        NodeService {
            mounter,
            identity,
            rescan_on_resize: config.rescan_on_resize,
            max_volumes_per_node: config.max_volumes_per_node,
        }
    }

    fn rescan(&self) -> CsiResult<()> {
        if self.rescan_on_resize {
            self.mounter
                .rescan_devices()
                .map_err(|err| CsiError::internal(format!("failed to rescan volume: {err}")))?;
        }
        Ok(())
    }

    /// Whether `target` is already a mount point. A missing target is
    /// created and reported as not mounted.
    fn prepare_mount_point(&self, target: &Path) -> CsiResult<bool> {
        match self.mounter.is_mounted(target) {
            Ok(mounted) => Ok(mounted),
            Err(ref err) if is_not_found(err) => {
                debug!("Creating mount point {}", target.display());
                DirBuilder::new()
                    .recursive(true)
                    .mode(MOUNT_POINT_MODE)
                    .create(target)
                    .map_err(|err| {
                        CsiError::internal(format!(
                            "failed to create mount point {}: {}",
                            target.display(),
                            err
                        ))
                    })?;
                Ok(false)
            }
            Err(err) => Err(internal(err)),
        }
    }

    /// Unmount `target` if it is mounted and remove the directory. Paths
    /// that do not exist need nothing done.
    fn cleanup_mount_point(&self, target: &Path) -> CsiResult<()> {
        match self.mounter.is_mounted(target) {
            Ok(true) => self.mounter.unmount(target).map_err(internal)?,
            Ok(false) => debug!("{} is not mounted", target.display()),
            Err(ref err) if is_not_found(err) => {
                debug!("{} does not exist, nothing to clean up", target.display());
                return Ok(());
            }
            Err(err) => return Err(internal(err)),
        }

        match fs::remove_dir(target) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(CsiError::internal(format!(
                "failed to remove mount point {}: {}",
                target.display(),
                err
            ))),
        }
    }

    pub fn stage_volume(&self, req: &NodeStageVolumeRequest) -> CsiResult<Empty> {
        require(&req.volume_id, "volume id")?;
        require(&req.staging_target_path, "staging target path")?;
        let capability = req.volume_capability.as_ref().ok_or_else(|| {
            CsiError::invalid_argument("volume capability not provided")
        })?;

        let context_value = |key: &str| {
            req.publish_context
                .get(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    CsiError::invalid_argument(format!(
                        "{key} not found in publish context of volume {}",
                        req.volume_id
                    ))
                })
        };
        let name = context_value(STORAGE_NAME_KEY)?;
        let uuid = context_value(STORAGE_UUID_KEY)?;

        self.rescan()?;

        let device = self
            .mounter
            .device_path_by_uuid(uuid)
            .map_err(|err| match err {
                DeviceLookupError::NotFound(_) => CsiError::not_found(format!(
                    "volume {} is not mounted on node yet",
                    req.volume_id
                )),
                DeviceLookupError::InvalidUuid(_) => CsiError::invalid_argument(format!(
                    "{STORAGE_UUID_KEY} of volume {} is invalid: {err}",
                    req.volume_id
                )),
                err => CsiError::internal(format!(
                    "error getting device path for volume with ID {}: {}",
                    req.volume_id, err
                )),
            })?;

        let target = Path::new(&req.staging_target_path);
        if self.prepare_mount_point(target)? {
            info!(
                "Volume {} ({}) is already staged at {}",
                req.volume_id,
                name,
                target.display()
            );
            return Ok(Empty {});
        }

        if !self.mounter.is_formatted(&device).map_err(internal)? {
            self.mounter.format(&device, FS_TYPE).map_err(internal)?;
        }
        self.mounter
            .mount(&device, target, FS_TYPE, capability.mount_flags())
            .map_err(internal)?;

        info!(
            "Volume {} ({}) staged from {} at {}",
            req.volume_id,
            name,
            device.display(),
            target.display()
        );
        Ok(Empty {})
    }

    pub fn unstage_volume(&self, req: &NodeUnstageVolumeRequest) -> CsiResult<Empty> {
        require(&req.volume_id, "volume id")?;
        require(&req.staging_target_path, "staging target path")?;

        self.cleanup_mount_point(Path::new(&req.staging_target_path))?;
        self.rescan()?;

        info!(
            "Volume {} unstaged from {}",
            req.volume_id, req.staging_target_path
        );
        Ok(Empty {})
    }

    pub fn publish_volume(&self, req: &NodePublishVolumeRequest) -> CsiResult<Empty> {
        require(&req.volume_id, "volume id")?;
        require(&req.staging_target_path, "staging target path")?;
        require(&req.target_path, "target path")?;
        let capability = req.volume_capability.as_ref().ok_or_else(|| {
            CsiError::invalid_argument("volume capability not provided")
        })?;

        let target = Path::new(&req.target_path);
        if self.prepare_mount_point(target)? {
            info!(
                "Volume {} is already published at {}",
                req.volume_id,
                target.display()
            );
            return Ok(Empty {});
        }

        let mut options = vec!["bind".to_owned()];
        if req.readonly {
            options.push("ro".to_owned());
        }
        options.extend(capability.mount_flags().iter().cloned());

        self.mounter
            .mount(
                Path::new(&req.staging_target_path),
                target,
                FS_TYPE,
                &options,
            )
            .map_err(internal)?;

        info!(
            "Volume {} published at {}",
            req.volume_id,
            target.display()
        );
        Ok(Empty {})
    }

    pub fn unpublish_volume(&self, req: &NodeUnpublishVolumeRequest) -> CsiResult<Empty> {
        require(&req.volume_id, "volume id")?;
        require(&req.target_path, "target path")?;

        self.cleanup_mount_point(Path::new(&req.target_path))?;

        info!(
            "Volume {} unpublished from {}",
            req.volume_id, req.target_path
        );
        Ok(Empty {})
    }

    pub fn expand_volume(&self, req: &NodeExpandVolumeRequest) -> CsiResult<Empty> {
        require(&req.volume_id, "volume id")?;
        require(&req.volume_path, "volume path")?;

        let volume_path = Path::new(&req.volume_path);
        let device = self.mounter.device_from_mount(volume_path).map_err(|err| {
            CsiError::internal(format!(
                "failed to determine mount path for {}: {}",
                req.volume_path, err
            ))
        })?;

        self.rescan()?;

        self.mounter
            .resize_fs(&device, volume_path)
            .map_err(|err| CsiError::internal(format!("failed to resize volume: {err}")))?;

        info!(
            "Filesystem of volume {} on {} resized",
            req.volume_id,
            device.display()
        );
        Ok(Empty {})
    }

    pub fn get_capabilities(&self) -> NodeGetCapabilitiesResponse {
        NodeGetCapabilitiesResponse {
            capabilities: NODE_CAPABILITIES.to_vec(),
        }
    }

    pub fn get_info(&self) -> NodeGetInfoResponse {
        NodeGetInfoResponse {
            node_id: self.identity.local_id.clone(),
            max_volumes_per_node: self.max_volumes_per_node,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, path::PathBuf};

    use assert_matches::assert_matches;

    use super::*;
    use crate::{
        daemon::StatusCode,
        driver::types::VolumeCapability,
        mount::SimMounter,
    };

    struct Fixture {
        dir: tempfile::TempDir,
        mounter: Arc<SimMounter>,
        node: NodeService,
    }

    impl Fixture {
        fn new(rescan_on_resize: bool) -> Fixture {
            let mounter = Arc::new(SimMounter::default());
            mounter.add_device("U1", Path::new("/dev/sdb")).unwrap();
            let config = DriverConfig {
                rescan_on_resize,
                ..Default::default()
            };
            let node = NodeService::new(
                Arc::clone(&mounter) as Arc<dyn Mounter>,
                NodeIdentity {
                    local_id: "vm-1".to_owned(),
                    ..Default::default()
                },
                &config,
            );
            Fixture {
                dir: tempfile::tempdir().unwrap(),
                mounter,
                node,
            }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn stage_request(&self, uuid: &str) -> NodeStageVolumeRequest {
            NodeStageVolumeRequest {
                volume_id: "abc".to_owned(),
                staging_target_path: self.path("stage").display().to_string(),
                publish_context: HashMap::from([
                    (STORAGE_UUID_KEY.to_owned(), uuid.to_owned()),
                    (STORAGE_NAME_KEY.to_owned(), "pvc-1".to_owned()),
                ]),
                volume_capability: Some(VolumeCapability::single_node_writer()),
            }
        }

        fn publish_request(&self) -> NodePublishVolumeRequest {
            NodePublishVolumeRequest {
                volume_id: "abc".to_owned(),
                staging_target_path: self.path("stage").display().to_string(),
                target_path: self.path("pods/publish").display().to_string(),
                volume_capability: Some(VolumeCapability::single_node_writer()),
                ..Default::default()
            }
        }
    }

    #[test]
    fn stage_formats_mounts_and_is_idempotent() {
        let fixture = Fixture::new(false);
        let req = fixture.stage_request("U1");

        fixture.node.stage_volume(&req).unwrap();
        let staged = fixture
            .mounter
            .mounted_at(&fixture.path("stage"))
            .unwrap()
            .unwrap();
        assert_eq!(staged.source, Path::new("/dev/sdb"));
        assert_eq!(staged.fs_type, FS_TYPE);
        assert!(fixture.path("stage").is_dir());
        assert_eq!(fixture.mounter.format_calls().unwrap(), 1);

        fixture.node.stage_volume(&req).unwrap();
        assert_eq!(fixture.mounter.mount_calls().unwrap(), 1);
        assert_eq!(fixture.mounter.format_calls().unwrap(), 1);
    }

    #[test]
    fn stage_requires_publish_context() {
        let fixture = Fixture::new(false);

        let mut req = fixture.stage_request("U1");
        req.publish_context.remove(STORAGE_NAME_KEY);
        let err = fixture.node.stage_volume(&req).unwrap_err();
        assert_eq!(err.code(), StatusCode::InvalidArgument);
        assert_eq!(
            err.message(),
            format!("{STORAGE_NAME_KEY} not found in publish context of volume abc")
        );

        let mut req = fixture.stage_request("U1");
        req.publish_context.remove(STORAGE_UUID_KEY);
        assert_eq!(
            fixture.node.stage_volume(&req).unwrap_err().message(),
            format!("{STORAGE_UUID_KEY} not found in publish context of volume abc")
        );

        let mut req = fixture.stage_request("U1");
        req.volume_capability = None;
        assert_eq!(
            fixture.node.stage_volume(&req).unwrap_err().code(),
            StatusCode::InvalidArgument
        );
    }

    #[test]
    fn stage_of_unattached_volume_is_not_found() {
        let fixture = Fixture::new(true);
        let err = fixture
            .node
            .stage_volume(&fixture.stage_request("U9"))
            .unwrap_err();
        assert_eq!(err.code(), StatusCode::NotFound);
        assert_eq!(err.message(), "volume abc is not mounted on node yet");
        assert_eq!(fixture.mounter.rescan_calls().unwrap(), 1);
    }

    #[test]
    fn publish_bind_mounts_staging_path() {
        let fixture = Fixture::new(false);
        fixture
            .node
            .stage_volume(&fixture.stage_request("U1"))
            .unwrap();

        let mut req = fixture.publish_request();
        req.readonly = true;
        fixture.node.publish_volume(&req).unwrap();

        let published = fixture
            .mounter
            .mounted_at(&fixture.path("pods/publish"))
            .unwrap()
            .unwrap();
        assert_eq!(published.source, fixture.path("stage"));
        assert_eq!(published.options, vec!["bind", "ro"]);

        fixture.node.publish_volume(&req).unwrap();
        assert_eq!(fixture.mounter.mount_calls().unwrap(), 2);
    }

    #[test]
    fn unpublish_and_unstage_are_idempotent() {
        let fixture = Fixture::new(false);
        fixture
            .node
            .stage_volume(&fixture.stage_request("U1"))
            .unwrap();
        fixture.node.publish_volume(&fixture.publish_request()).unwrap();

        let unpublish = NodeUnpublishVolumeRequest {
            volume_id: "abc".to_owned(),
            target_path: fixture.path("pods/publish").display().to_string(),
        };
        fixture.node.unpublish_volume(&unpublish).unwrap();
        assert!(!fixture.path("pods/publish").exists());
        fixture.node.unpublish_volume(&unpublish).unwrap();

        let unstage = NodeUnstageVolumeRequest {
            volume_id: "abc".to_owned(),
            staging_target_path: fixture.path("stage").display().to_string(),
        };
        fixture.node.unstage_volume(&unstage).unwrap();
        assert_eq!(fixture.mounter.mounted_at(&fixture.path("stage")).unwrap(), None);
        fixture.node.unstage_volume(&unstage).unwrap();
    }

    #[test]
    fn unmounted_leftover_directory_is_removed() {
        let fixture = Fixture::new(false);
        fs::create_dir(fixture.path("stale")).unwrap();
        fixture
            .node
            .unstage_volume(&NodeUnstageVolumeRequest {
                volume_id: "abc".to_owned(),
                staging_target_path: fixture.path("stale").display().to_string(),
            })
            .unwrap();
        assert!(!fixture.path("stale").exists());
    }

    #[test]
    fn expand_resizes_mounted_filesystem() {
        let fixture = Fixture::new(true);
        fixture
            .node
            .stage_volume(&fixture.stage_request("U1"))
            .unwrap();

        fixture
            .node
            .expand_volume(&NodeExpandVolumeRequest {
                volume_id: "abc".to_owned(),
                volume_path: fixture.path("stage").display().to_string(),
                capacity_range: None,
            })
            .unwrap();
        assert_eq!(fixture.mounter.resize_calls().unwrap(), 1);
        assert_eq!(fixture.mounter.rescan_calls().unwrap(), 2);

        let err = fixture
            .node
            .expand_volume(&NodeExpandVolumeRequest {
                volume_id: "abc".to_owned(),
                volume_path: fixture.path("nowhere").display().to_string(),
                capacity_range: None,
            })
            .unwrap_err();
        assert_matches!(err, CsiError::Status(StatusCode::Internal, ref msg) if msg.starts_with("failed to determine mount path"));
    }

    #[test]
    fn node_info() {
        let fixture = Fixture::new(false);
        let info = fixture.node.get_info();
        assert_eq!(info.node_id, "vm-1");
        assert_eq!(info.max_volumes_per_node, 15);
        assert_eq!(fixture.node.get_capabilities().capabilities.len(), 2);
    }
}
