// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Host-side block device and filesystem handling.

use std::path::{Path, PathBuf};

use crate::daemon::CsiResult;

pub use self::{
    cmd::CommandMounter,
    device::{device_path_by_uuid, DeviceLookupError, DISK_BY_UUID_DIR},
    scsi::rescan_scsi_bus,
    sim::{SimMount, SimMounter},
};

mod cmd;
mod device;
mod scsi;
mod sim;

/// Mount table and filesystem operations performed on the node.
pub trait Mounter: Send + Sync {
    /// Resolve a volume's device UUID to the block device it names.
    fn device_path_by_uuid(&self, uuid: &str) -> Result<PathBuf, DeviceLookupError>;

    /// Whether the device already carries a filesystem.
    fn is_formatted(&self, device: &Path) -> CsiResult<bool>;

    fn format(&self, device: &Path, fs_type: &str) -> CsiResult<()>;

    /// Whether `target` is a mount point. An `Io` error of kind `NotFound`
    /// means the path does not exist.
    fn is_mounted(&self, target: &Path) -> CsiResult<bool>;

    fn mount(&self, source: &Path, target: &Path, fs_type: &str, options: &[String])
        -> CsiResult<()>;

    fn unmount(&self, target: &Path) -> CsiResult<()>;

    /// The source device of the filesystem mounted at or above `path`.
    fn device_from_mount(&self, path: &Path) -> CsiResult<PathBuf>;

    /// Grow the filesystem on `device`, mounted at `mount_path`, to fill the
    /// device.
    fn resize_fs(&self, device: &Path, mount_path: &Path) -> CsiResult<()>;

    /// Ask the kernel to pick up added or resized devices.
    fn rescan_devices(&self) -> CsiResult<()>;
}
