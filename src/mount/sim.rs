// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    collections::{HashMap, HashSet},
    fs, io,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use crate::{
    daemon::{CsiError, CsiResult},
    mount::{device::DeviceLookupError, Mounter},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimMount {
    pub source: PathBuf,
    pub fs_type: String,
    pub options: Vec<String>,
}

#[derive(Debug, Default)]
struct SimMountState {
    devices: HashMap<String, PathBuf>,
    formatted: HashSet<PathBuf>,
    mounts: HashMap<PathBuf, SimMount>,
    format_calls: usize,
    mount_calls: usize,
    resize_calls: usize,
    rescan_calls: usize,
}

/// A mounter that keeps its mount table in memory. Mount points are still
/// real directories, so path existence follows the host filesystem.
#[derive(Debug, Default)]
pub struct SimMounter {
    /// Whether unknown UUIDs resolve to a synthesized device path.
    open_devices: bool,
    state: Mutex<SimMountState>,
}

impl SimMounter {
    /// A mounter where every UUID names a device.
    pub fn open() -> SimMounter {
        SimMounter {
            open_devices: true,
            ..Default::default()
        }
    }

    fn state(&self) -> CsiResult<MutexGuard<'_, SimMountState>> {
        Ok(self.state.lock()?)
    }

    pub fn add_device(&self, uuid: &str, device: &Path) -> CsiResult<()> {
        self.state()?
            .devices
            .insert(uuid.to_owned(), device.to_owned());
        Ok(())
    }

    pub fn mounted_at(&self, target: &Path) -> CsiResult<Option<SimMount>> {
        Ok(self.state()?.mounts.get(target).cloned())
    }

    pub fn format_calls(&self) -> CsiResult<usize> {
        Ok(self.state()?.format_calls)
    }

    pub fn mount_calls(&self) -> CsiResult<usize> {
        Ok(self.state()?.mount_calls)
    }

    pub fn resize_calls(&self) -> CsiResult<usize> {
        Ok(self.state()?.resize_calls)
    }

    pub fn rescan_calls(&self) -> CsiResult<usize> {
        Ok(self.state()?.rescan_calls)
    }
}

impl Mounter for SimMounter {
    fn device_path_by_uuid(&self, uuid: &str) -> Result<PathBuf, DeviceLookupError> {
        let state = self
            .state()
            .map_err(|err| DeviceLookupError::Io(io::Error::other(err.to_string())))?;
        match state.devices.get(uuid) {
            Some(device) => Ok(device.clone()),
            None if self.open_devices => Ok(Path::new("/dev/sim").join(uuid)),
            None => Err(DeviceLookupError::NotFound(
                Path::new("/dev/disk/by-uuid").join(uuid),
            )),
        }
    }

    fn is_formatted(&self, device: &Path) -> CsiResult<bool> {
        Ok(self.state()?.formatted.contains(device))
    }

    fn format(&self, device: &Path, _fs_type: &str) -> CsiResult<()> {
        let mut state = self.state()?;
        state.format_calls += 1;
        state.formatted.insert(device.to_owned());
        Ok(())
    }

    fn is_mounted(&self, target: &Path) -> CsiResult<bool> {
        fs::metadata(target)?;
        Ok(self.state()?.mounts.contains_key(target))
    }

    fn mount(
        &self,
        source: &Path,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> CsiResult<()> {
        let mut state = self.state()?;
        state.mount_calls += 1;
        if state.mounts.contains_key(target) {
            return Err(CsiError::internal(format!(
                "{} is already a mount point",
                target.display()
            )));
        }
        state.mounts.insert(
            target.to_owned(),
            SimMount {
                source: source.to_owned(),
                fs_type: fs_type.to_owned(),
                options: options.to_vec(),
            },
        );
        Ok(())
    }

    fn unmount(&self, target: &Path) -> CsiResult<()> {
        self.state()?
            .mounts
            .remove(target)
            .map(|_| ())
            .ok_or_else(|| CsiError::internal(format!("{} is not mounted", target.display())))
    }

    fn device_from_mount(&self, path: &Path) -> CsiResult<PathBuf> {
        let state = self.state()?;
        let mut source = state.mounts.get(path).map(|m| m.source.clone());
        // a bind mount reports the device of the mount it was made from
        while let Some(inner) = source.as_ref().and_then(|s| state.mounts.get(s)) {
            source = Some(inner.source.clone());
        }
        source.ok_or_else(|| {
            CsiError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no mount found for {}", path.display()),
            ))
        })
    }

    fn resize_fs(&self, _device: &Path, _mount_path: &Path) -> CsiResult<()> {
        self.state()?.resize_calls += 1;
        Ok(())
    }

    fn rescan_devices(&self) -> CsiResult<()> {
        self.state()?.rescan_calls += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn mount_table() {
        let dir = tempfile::tempdir().unwrap();
        let stage = dir.path().join("stage");
        let publish = dir.path().join("publish");
        fs::create_dir(&stage).unwrap();
        fs::create_dir(&publish).unwrap();

        let mounter = SimMounter::default();
        assert!(!mounter.is_mounted(&stage).unwrap());
        mounter
            .mount(Path::new("/dev/sdb"), &stage, "ext4", &[])
            .unwrap();
        mounter
            .mount(&stage, &publish, "ext4", &["bind".to_owned()])
            .unwrap();

        assert!(mounter.is_mounted(&stage).unwrap());
        assert_eq!(
            mounter.device_from_mount(&publish).unwrap(),
            Path::new("/dev/sdb")
        );
        assert!(mounter
            .mount(Path::new("/dev/sdb"), &stage, "ext4", &[])
            .is_err());

        mounter.unmount(&publish).unwrap();
        assert!(mounter.unmount(&publish).is_err());
    }

    #[test]
    fn missing_target_is_io_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert_matches!(
            SimMounter::default().is_mounted(&dir.path().join("absent")),
            Err(CsiError::Io(err)) if err.kind() == io::ErrorKind::NotFound
        );
    }

    #[test]
    fn device_lookup() {
        let mounter = SimMounter::default();
        mounter.add_device("U1", Path::new("/dev/sdc")).unwrap();
        assert_eq!(
            mounter.device_path_by_uuid("U1").unwrap(),
            Path::new("/dev/sdc")
        );
        assert_matches!(
            mounter.device_path_by_uuid("U2"),
            Err(DeviceLookupError::NotFound(_))
        );
        assert_eq!(
            SimMounter::open().device_path_by_uuid("U2").unwrap(),
            Path::new("/dev/sim/U2")
        );
    }
}
