use super::{Inventory, MountGateway, run_command};
use crate::device::{DeviceId, DeviceSnapshot};
use crate::error::GatewayError;
use anyhow::{Result, anyhow};
use std::path::Path;
use tracing::{debug, warn};

const POWERSHELL: &str = "powershell";

/// Emits one `<SCSILogicalUnit>\t<Drive>` line per optical drive.
const CDROM_QUERY: &str = "Get-CimInstance -ClassName Win32_CDROMDrive | \
     ForEach-Object { \"$($_.SCSILogicalUnit)`t$($_.Drive)\" }";

fn powershell(command: &str) -> Result<String, GatewayError> {
    let output = run_command(
        POWERSHELL,
        ["-NoProfile", "-NonInteractive", "-Command", command],
    )?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Quotes a path for a single-quoted PowerShell string.
fn quote(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', "''"))
}

/// Parses the output of [`CDROM_QUERY`]. Drives without a logical unit are
/// skipped; an empty drive column means the drive letter is not assigned yet.
fn parse_cdrom_lines(stdout: &str) -> DeviceSnapshot {
    stdout
        .lines()
        .filter_map(|line| {
            let line = line.trim_end_matches('\r');
            let (lun, drive) = line.split_once('\t').unwrap_or((line, ""));
            let lun = lun.trim();
            if lun.is_empty() {
                return None;
            }
            let drive = drive.trim();
            Some((
                DeviceId::new(format!(r"\\.\CDROM{lun}")),
                (!drive.is_empty()).then(|| drive.to_string()),
            ))
        })
        .collect()
}

fn query_cdrom_drives() -> Result<DeviceSnapshot> {
    let stdout = powershell(CDROM_QUERY).map_err(|e| anyhow!(e))?;
    Ok(parse_cdrom_lines(&stdout))
}

/// Optical drive inventory backed by the `Win32_CDROMDrive` WMI class.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemInventory;

impl Inventory for SystemInventory {
    fn snapshot(&self) -> DeviceSnapshot {
        match query_cdrom_drives() {
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

/// Attaches images with the `Mount-DiskImage` cmdlet.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemGateway;

impl MountGateway for SystemGateway {
    fn attach(&self, image: &Path) -> Result<(), GatewayError> {
        powershell(&format!("Mount-DiskImage -ImagePath {}", quote(image))).map(|_| ())
    }

    fn detach(&self, image: &Path) -> Result<(), GatewayError> {
        powershell(&format!("Dismount-DiskImage -ImagePath {}", quote(image))).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cdrom_query_output() {
        let snapshot = parse_cdrom_lines("0\tD:\r\n1\t\r\n\tZ:\r\n");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.access(&DeviceId::new(r"\\.\CDROM0")), Some("D:"));
        assert!(snapshot.contains(&DeviceId::new(r"\\.\CDROM1")));
        assert_eq!(snapshot.access(&DeviceId::new(r"\\.\CDROM1")), None);
    }

    #[test]
    fn quotes_single_quotes_in_paths() {
        assert_eq!(quote(Path::new(r"C:\isos\Tony's.iso")), r"'C:\isos\Tony''s.iso'");
    }
}
