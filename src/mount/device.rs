// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    error::Error,
    fmt, fs, io,
    os::unix::fs::FileTypeExt,
    path::{Path, PathBuf},
};

pub const DISK_BY_UUID_DIR: &str = "/dev/disk/by-uuid";

#[derive(Debug)]
pub enum DeviceLookupError {
    /// The UUID can not name an entry of the by-uuid directory.
    InvalidUuid(String),
    /// No link for the UUID, or the link dangles.
    NotFound(PathBuf),
    /// The link resolves to something other than a block device.
    NotBlockDevice(PathBuf),
    Io(io::Error),
}

impl fmt::Display for DeviceLookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DeviceLookupError::InvalidUuid(ref uuid) => {
                write!(f, "{uuid:?} is not a valid device UUID")
            }
            DeviceLookupError::NotFound(ref path) => {
                write!(f, "device link {} does not exist", path.display())
            }
            DeviceLookupError::NotBlockDevice(ref path) => {
                write!(f, "device path {} is not a block device", path.display())
            }
            DeviceLookupError::Io(ref err) => write!(f, "IO error: {err}"),
        }
    }
}

impl Error for DeviceLookupError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            DeviceLookupError::Io(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for DeviceLookupError {
    fn from(err: io::Error) -> DeviceLookupError {
        DeviceLookupError::Io(err)
    }
}

/// Follow the `<dir>/<uuid>` link and check that it ends at a block device.
pub fn device_path_by_uuid(dir: &Path, uuid: &str) -> Result<PathBuf, DeviceLookupError> {
    if uuid.is_empty() || uuid.contains('/') || uuid == "." || uuid == ".." {
        return Err(DeviceLookupError::InvalidUuid(uuid.to_owned()));
    }

    let link = dir.join(uuid);
    let device = fs::canonicalize(&link).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            DeviceLookupError::NotFound(link.clone())
        } else {
            DeviceLookupError::Io(err)
        }
    })?;

    if fs::metadata(&device)?.file_type().is_block_device() {
        Ok(device)
    } else {
        Err(DeviceLookupError::NotBlockDevice(device))
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::symlink;

    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn character_device_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        symlink("/dev/null", dir.path().join("U1")).unwrap();
        assert_matches!(
            device_path_by_uuid(dir.path(), "U1"),
            Err(DeviceLookupError::NotBlockDevice(path)) if path == Path::new("/dev/null")
        );
    }

    #[test]
    fn regular_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        fs::write(&file, b"not a disk").unwrap();
        symlink(&file, dir.path().join("U2")).unwrap();
        assert_matches!(
            device_path_by_uuid(dir.path(), "U2"),
            Err(DeviceLookupError::NotBlockDevice(_))
        );
    }

    #[test]
    fn missing_and_dangling_links_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert_matches!(
            device_path_by_uuid(dir.path(), "absent"),
            Err(DeviceLookupError::NotFound(_))
        );

        symlink(dir.path().join("gone"), dir.path().join("U3")).unwrap();
        assert_matches!(
            device_path_by_uuid(dir.path(), "U3"),
            Err(DeviceLookupError::NotFound(_))
        );
    }

    #[test]
    fn path_like_uuids_are_invalid() {
        let dir = tempfile::tempdir().unwrap();
        for uuid in ["", "..", "../etc", "a/b"] {
            assert_matches!(
                device_path_by_uuid(dir.path(), uuid),
                Err(DeviceLookupError::InvalidUuid(_))
            );
        }
    }
}
