// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::daemon::{CsiError, CsiResult};

pub const SYS_CLASS_DIR: &str = "/sys/class";

const SCSI_HOST_DIR: &str = "scsi_host";
const SCSI_DEVICE_DIR: &str = "scsi_device";
const HOST_SCAN_ALL: &[u8] = b"- - -";
const DEVICE_RESCAN: &[u8] = b"1";

fn entries(dir: &Path) -> CsiResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(CsiError::internal(format!(
            "directory {} does not exist",
            dir.display()
        )));
    }
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort();
    Ok(entries)
}

/// Write `value` to `file` if it exists. Write failures are only logged,
/// one unresponsive host must not stop the others from being scanned.
fn poke(file: &Path, value: &[u8]) {
    if !file.is_file() {
        debug!("{} does not exist, skipping", file.display());
        return;
    }
    debug!("Rescan initiated for {}", file.display());
    if let Err(err) = fs::write(file, value) {
        error!("Could not write to {}: {}", file.display(), err);
    }
}

/// Rescan every SCSI host for new devices and every SCSI device for size
/// changes. `sys_class` is normally `/sys/class`.
pub fn rescan_scsi_bus(sys_class: &Path) -> CsiResult<()> {
    for host in entries(&sys_class.join(SCSI_HOST_DIR))? {
        poke(&host.join("scan"), HOST_SCAN_ALL);
    }
    for device in entries(&sys_class.join(SCSI_DEVICE_DIR))? {
        poke(&device.join("device").join("rescan"), DEVICE_RESCAN);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_scan_triggers() {
        let sys = tempfile::tempdir().unwrap();
        let host = sys.path().join("scsi_host/host0");
        let device = sys.path().join("scsi_device/0:0:0:0/device");
        let bare_host = sys.path().join("scsi_host/host1");
        fs::create_dir_all(&host).unwrap();
        fs::create_dir_all(&device).unwrap();
        fs::create_dir_all(&bare_host).unwrap();
        fs::write(host.join("scan"), b"").unwrap();
        fs::write(device.join("rescan"), b"").unwrap();

        rescan_scsi_bus(sys.path()).unwrap();

        assert_eq!(fs::read(host.join("scan")).unwrap(), b"- - -");
        assert_eq!(fs::read(device.join("rescan")).unwrap(), b"1");
        assert!(!bare_host.join("scan").exists());
    }

    #[test]
    fn missing_host_class_is_an_error() {
        let sys = tempfile::tempdir().unwrap();
        assert!(rescan_scsi_bus(sys.path()).is_err());
    }
}
