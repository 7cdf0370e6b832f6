use super::{Inventory, MountGateway, run_command};
use crate::device::{DeviceId, DeviceSnapshot};
use crate::error::GatewayError;
use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const UDISKSCTL: &str = "udisksctl";

/// Helper to read a specific file from the /sys/block filesystem.
fn read_sys_file(device_name: &str, file: &str) -> io::Result<String> {
    let path = PathBuf::from("/sys/block").join(device_name).join(file);
    fs::read_to_string(path).map(|s| s.trim().to_string())
}

/// Returns the image backing a loop device, or `None` if the loop device is
/// unused.
fn loop_backing_file(device_name: &str) -> Option<PathBuf> {
    read_sys_file(device_name, "loop/backing_file")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

/// Finds the mount point of `device_name` (or one of its partitions).
fn mount_point_of(disks: &sysinfo::Disks, device_name: &str) -> Option<String> {
    disks.iter().find_map(|disk| {
        let name = Path::new(disk.name())
            .file_name()
            .map(|n| n.to_string_lossy().to_string())?;
        if name == device_name || name.starts_with(&format!("{device_name}p")) {
            let mp = disk.mount_point().to_string_lossy().to_string();
            (!mp.is_empty()).then_some(mp)
        } else {
            None
        }
    })
}

/// Lists the optical and attached loop devices found under `/sys/block`.
fn scan_block_devices() -> Result<DeviceSnapshot> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let block_dir = fs::read_dir("/sys/block").context("reading /sys/block")?;

    let mut devices = Vec::new();
    for entry in block_dir.flatten() {
        let device_name = entry.file_name().to_string_lossy().to_string();

        let is_optical = device_name.starts_with("sr");
        let is_attached_loop =
            device_name.starts_with("loop") && loop_backing_file(&device_name).is_some();
        if !is_optical && !is_attached_loop {
            continue;
        }

        let device_path = PathBuf::from("/dev/").join(&device_name);
        let mount_point = mount_point_of(&disks, &device_name);
        devices.push((
            DeviceId::new(device_path.to_string_lossy()),
            mount_point,
        ));
    }

    Ok(devices.into_iter().collect())
}

/// Optical device inventory backed by `/sys/block` and `sysinfo`.
///
/// Loop devices only count once they have a backing file, and a device's
/// access identifier is its mount point.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemInventory;

impl Inventory for SystemInventory {
    fn snapshot(&self) -> DeviceSnapshot {
        match scan_block_devices() {
            Ok(snapshot) => {
                debug!(devices = snapshot.len(), "device snapshot");
                snapshot
            }
            Err(e) => {
                warn!(error = %e, "device query failed; treating as empty");
                DeviceSnapshot::new()
            }
        }
    }
}

/// Extracts the loop device from `udisksctl loop-setup` output, which looks
/// like `Mapped file disc.iso as /dev/loop7.`
fn parse_loop_setup(stdout: &str) -> Option<String> {
    let (_, tail) = stdout.rsplit_once(" as ")?;
    let device = tail.trim().trim_end_matches('.');
    device.starts_with("/dev/").then(|| device.to_string())
}

/// Lists every loop device currently backed by `image`.
fn loops_backed_by(image: &Path) -> Result<Vec<String>> {
    let image = fs::canonicalize(image).unwrap_or_else(|_| image.to_path_buf());
    let mut loops = Vec::new();
    for entry in fs::read_dir("/sys/block")
        .context("reading /sys/block")?
        .flatten()
    {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with("loop") {
            continue;
        }
        if loop_backing_file(&name).is_some_and(|backing| backing == image) {
            loops.push(format!("/dev/{name}"));
        }
    }
    Ok(loops)
}

/// Picks the loop device `loop-setup` just created.
///
/// The device named in `stdout` wins. If the output can't be parsed, the loop
/// devices backed by the image are looked up instead, since the loop device
/// already exists once `loop-setup` has succeeded.
fn resolve_loop_device<F>(stdout: &str, backed_by: F) -> Option<String>
where
    F: FnOnce() -> Result<Vec<String>>,
{
    if let Some(device) = parse_loop_setup(stdout) {
        return Some(device);
    }
    warn!(
        output = stdout.trim(),
        "unrecognised loop-setup output; looking up backing file"
    );
    match backed_by() {
        // The newest loop device is the one just created.
        Ok(loops) => loops.into_iter().max_by_key(|d| loop_number(d)),
        Err(e) => {
            warn!(error = %e, "looking up loop devices failed");
            None
        }
    }
}

fn loop_number(device: &str) -> u32 {
    device
        .trim_start_matches("/dev/loop")
        .parse()
        .unwrap_or(0)
}

/// Attaches images as read-only loop devices through `udisksctl`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemGateway;

impl MountGateway for SystemGateway {
    fn attach(&self, image: &Path) -> Result<(), GatewayError> {
        let output = run_command(
            UDISKSCTL,
            [
                OsStr::new("loop-setup"),
                OsStr::new("--no-user-interaction"),
                OsStr::new("-r"),
                OsStr::new("-f"),
                image.as_os_str(),
            ],
        )?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let loop_device =
            resolve_loop_device(&stdout, || loops_backed_by(image)).ok_or_else(|| {
                GatewayError::Other(format!(
                    "loop-setup succeeded but no loop device backs {}: {}",
                    image.display(),
                    stdout.trim()
                ))
            })?;
        info!(image = %image.display(), device = %loop_device, "loop device created");

        // The loop device exists now; a failed mount only means the
        // correlator never sees an access path, and the cleanup pass removes
        // the loop device.
        if let Err(e) = run_command(
            UDISKSCTL,
            ["mount", "--no-user-interaction", "-b", loop_device.as_str()],
        ) {
            warn!(device = %loop_device, error = %e, "mounting loop device failed");
        }
        Ok(())
    }

    fn detach(&self, image: &Path) -> Result<(), GatewayError> {
        let loops = loops_backed_by(image).map_err(|e| GatewayError::Other(format!("{e:#}")))?;
        if loops.is_empty() {
            debug!(image = %image.display(), "no loop device backs image; nothing to detach");
            return Ok(());
        }

        for device in &loops {
            // Unmounting an unmounted device fails; only the loop-delete
            // result decides the outcome.
            if let Err(e) = run_command(
                UDISKSCTL,
                ["unmount", "--no-user-interaction", "-b", device.as_str()],
            ) {
                debug!(device, error = %e, "unmount failed");
            }
            run_command(
                UDISKSCTL,
                ["loop-delete", "--no-user-interaction", "-b", device.as_str()],
            )?;
        }

        if loops.len() > 1 {
            warn!(image = %image.display(), count = loops.len(), "image was attached more than once");
        }
        Ok(())
    }
}
