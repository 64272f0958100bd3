// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Mount table and filesystem handling through the host's own utilities.
// Binaries are located once, when the mounter is constructed, by searching
// a fixed list of directories rather than PATH; cloudvold may be started by
// a container runtime with no PATH set. A binary that disappears after
// startup surfaces as an execution failure of the command that needs it.

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    process::{Command, Output},
    str,
};

use nix::mount::umount;
use retry::{delay::Fixed, retry_with_index};
use serde_derive::Deserialize;

use crate::{
    daemon::{CsiError, CsiResult},
    mount::{
        device::{device_path_by_uuid, DeviceLookupError, DISK_BY_UUID_DIR},
        scsi::{rescan_scsi_bus, SYS_CLASS_DIR},
        Mounter,
    },
};

const BINARIES_PATHS: [&str; 4] = ["/usr/sbin", "/sbin", "/usr/bin", "/bin"];

const BLKID: &str = "blkid";
const FINDMNT: &str = "findmnt";
const MKFS_EXT4: &str = "mkfs.ext4";
const MOUNT: &str = "mount";
const PARTPROBE: &str = "partprobe";
const RESIZE2FS: &str = "resize2fs";
const XFS_GROWFS: &str = "xfs_growfs";

const REQUIRED_BINARIES: [&str; 5] = [BLKID, FINDMNT, MKFS_EXT4, MOUNT, RESIZE2FS];
const OPTIONAL_BINARIES: [&str; 2] = [PARTPROBE, XFS_GROWFS];

/// blkid exits with this code when it finds no filesystem signature.
const BLKID_NOT_FOUND: i32 = 2;

fn find_binary(name: &str) -> Option<PathBuf> {
    BINARIES_PATHS
        .iter()
        .map(|pre| [pre, name].iter().collect::<PathBuf>())
        .find(|path| path.exists())
}

fn command_failure(cmd: &Command, output: &Output) -> CsiError {
    CsiError::internal(format!(
        "command {:?} failed with {}: {}",
        cmd,
        output.status,
        String::from_utf8_lossy(&output.stderr).trim()
    ))
}

/// Run the command and return its output whatever its exit status.
fn run_cmd(cmd: &mut Command) -> CsiResult<Output> {
    debug!("Executing {:?}", cmd);
    cmd.output()
        .map_err(|err| CsiError::internal(format!("failed to execute {cmd:?}: {err}")))
}

/// Run the command and fail unless it exits successfully.
fn execute_cmd(cmd: &mut Command) -> CsiResult<Output> {
    let output = run_cmd(cmd)?;
    if output.status.success() {
        Ok(output)
    } else {
        Err(command_failure(cmd, &output))
    }
}

#[derive(Debug, Deserialize)]
struct FindmntOutput {
    filesystems: Vec<FindmntEntry>,
}

#[derive(Debug, Deserialize)]
struct FindmntEntry {
    target: String,
}

impl FindmntOutput {
    /// Whether some entry is mounted on `target`, a canonical path.
    fn lists(&self, target: &Path) -> bool {
        self.filesystems
            .iter()
            .any(|entry| Path::new(&entry.target) == target)
    }
}

/// A mounter backed by blkid, mkfs, mount, findmnt and the resize tools.
#[derive(Debug)]
pub struct CommandMounter {
    binaries: HashMap<&'static str, PathBuf>,
    by_uuid_dir: PathBuf,
    sys_class_dir: PathBuf,
}

impl CommandMounter {
    /// Locate every binary the node service might run. Fails if a required
    /// one is missing.
    pub fn new() -> CsiResult<CommandMounter> {
        let mut binaries = HashMap::new();
        let mut missing = Vec::new();
        for name in REQUIRED_BINARIES {
            match find_binary(name) {
                Some(path) => {
                    binaries.insert(name, path);
                }
                None => missing.push(name),
            }
        }
        if !missing.is_empty() {
            return Err(CsiError::internal(format!(
                "executables {} could not be found in {}",
                missing.join(", "),
                BINARIES_PATHS.join(", ")
            )));
        }
        for name in OPTIONAL_BINARIES {
            match find_binary(name) {
                Some(path) => {
                    binaries.insert(name, path);
                }
                None => info!("Optional executable {} not found", name),
            }
        }

        Ok(CommandMounter {
            binaries,
            by_uuid_dir: PathBuf::from(DISK_BY_UUID_DIR),
            sys_class_dir: PathBuf::from(SYS_CLASS_DIR),
        })
    }

    fn command(&self, name: &str) -> CsiResult<Command> {
        self.binaries
            .get(name)
            .map(Command::new)
            .ok_or_else(|| CsiError::internal(format!("executable {name} is not available")))
    }

    fn fs_type(&self, device: &Path) -> CsiResult<String> {
        let output = execute_cmd(
            self.command(BLKID)?
                .args(["-p", "-s", "TYPE", "-o", "value"])
                .arg(device),
        )?;
        Ok(str::from_utf8(&output.stdout)?.trim().to_string())
    }
}

impl Mounter for CommandMounter {
    fn device_path_by_uuid(&self, uuid: &str) -> Result<PathBuf, DeviceLookupError> {
        device_path_by_uuid(&self.by_uuid_dir, uuid)
    }

    fn is_formatted(&self, device: &Path) -> CsiResult<bool> {
        let mut cmd = self.command(BLKID)?;
        cmd.arg(device);
        let output = run_cmd(&mut cmd)?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(BLKID_NOT_FOUND) => Ok(false),
            _ => Err(command_failure(&cmd, &output)),
        }
    }

    fn format(&self, device: &Path, fs_type: &str) -> CsiResult<()> {
        if fs_type != "ext4" {
            return Err(CsiError::invalid_argument(format!(
                "filesystem type {fs_type} is not supported"
            )));
        }
        info!("Formatting {} as {}", device.display(), fs_type);
        execute_cmd(self.command(MKFS_EXT4)?.arg("-F").arg(device)).map(|_| ())
    }

    fn is_mounted(&self, target: &Path) -> CsiResult<bool> {
        // findmnt reports targets with symlinks resolved
        let target = fs::canonicalize(target)?;

        let mut cmd = self.command(FINDMNT)?;
        cmd.args(["-o", "TARGET,PROPAGATION,FSTYPE,OPTIONS", "-J", "-M"])
            .arg(&target);
        let output = run_cmd(&mut cmd)?;
        // findmnt exits 1 with no output when nothing is mounted there
        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return if output.status.code() == Some(1) {
                Ok(false)
            } else {
                Err(command_failure(&cmd, &output))
            };
        }

        let parsed: FindmntOutput = serde_json::from_slice(&output.stdout)?;
        Ok(parsed.lists(&target))
    }

    fn mount(
        &self,
        source: &Path,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> CsiResult<()> {
        let mut cmd = self.command(MOUNT)?;
        cmd.arg("-t").arg(fs_type);
        if !options.is_empty() {
            cmd.arg("-o").arg(options.join(","));
        }
        cmd.arg(source).arg(target);
        info!("Mounting {} on {}", source.display(), target.display());
        execute_cmd(&mut cmd).map(|_| ())
    }

    fn unmount(&self, target: &Path) -> CsiResult<()> {
        info!("Unmounting {}", target.display());
        retry_with_index(Fixed::from_millis(100).take(2), |i| {
            trace!("Unmount attempt {} for {}", i, target.display());
            umount(target)
        })
        .map_err(|err| {
            CsiError::internal(format!("failed to unmount {}: {}", target.display(), err))
        })
    }

    fn device_from_mount(&self, path: &Path) -> CsiResult<PathBuf> {
        let output = execute_cmd(
            self.command(FINDMNT)?
                .args(["-n", "-o", "SOURCE", "--target"])
                .arg(path),
        )?;
        let source = str::from_utf8(&output.stdout)?.trim();
        if source.is_empty() {
            return Err(CsiError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no mount found for {}", path.display()),
            )));
        }
        Ok(PathBuf::from(source))
    }

    fn resize_fs(&self, device: &Path, mount_path: &Path) -> CsiResult<()> {
        let fs_type = self.fs_type(device)?;
        info!(
            "Resizing {} filesystem on {} mounted at {}",
            fs_type,
            device.display(),
            mount_path.display()
        );
        match fs_type.as_str() {
            "ext2" | "ext3" | "ext4" => {
                execute_cmd(self.command(RESIZE2FS)?.arg(device)).map(|_| ())
            }
            "xfs" => execute_cmd(self.command(XFS_GROWFS)?.arg(mount_path).arg("-d")).map(|_| ()),
            other => Err(CsiError::internal(format!(
                "resizing a {other:?} filesystem is not supported"
            ))),
        }
    }

    fn rescan_devices(&self) -> CsiResult<()> {
        rescan_scsi_bus(&self.sys_class_dir)?;

        // partition table changes are announced last
        match self.binaries.get(PARTPROBE) {
            Some(partprobe) => {
                if let Err(err) = execute_cmd(Command::new(partprobe).arg("-s")) {
                    error!("Informing about partition table changes failed: {}", err);
                }
            }
            None => warn!(
                "{} not found, skipping notification of partition table changes",
                PARTPROBE
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn findmnt_json() {
        let parsed: FindmntOutput = serde_json::from_str(
            r#"{"filesystems": [{"target": "/mnt/a", "propagation": "shared", "fstype": "ext4", "options": "rw"}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.filesystems.len(), 1);
        assert_eq!(parsed.filesystems[0].target, "/mnt/a");
    }

    #[test]
    fn mount_targets_match_canonical_paths() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        fs::create_dir_all(real.join("stage")).unwrap();
        std::os::unix::fs::symlink(&real, dir.path().join("link")).unwrap();

        let mounted = fs::canonicalize(real.join("stage")).unwrap();
        let parsed = FindmntOutput {
            filesystems: vec![FindmntEntry {
                target: mounted.display().to_string(),
            }],
        };

        let through_link = dir.path().join("link").join("stage");
        assert!(!parsed.lists(&through_link));
        assert!(parsed.lists(&fs::canonicalize(&through_link).unwrap()));

        let trailing_slash = PathBuf::from(format!("{}/", through_link.display()));
        assert!(parsed.lists(&fs::canonicalize(trailing_slash).unwrap()));
    }

    #[test]
    fn binaries_are_searched_in_fixed_locations() {
        assert!(find_binary("no-such-binary-cloudvold").is_none());
        if let Some(sh) = find_binary("sh") {
            assert!(sh.is_absolute());
        }
    }
}
