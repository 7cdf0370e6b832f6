use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// A stable OS handle for an optical or loop device.
///
/// On Windows this is the `\\.\CDROM<n>` path built from the drive's SCSI
/// logical unit; on Linux it is the block device path (e.g. `/dev/loop7`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A device that has been correlated with an attached image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Device {
    /// The OS handle of the device.
    pub id: DeviceId,
    /// The logical access identifier: a drive letter (`E:`) or a mount point.
    pub access: String,
}

impl Device {
    /// Returns the filesystem root of the mounted device.
    ///
    /// A bare drive letter such as `E:` is turned into `E:\` so that it names
    /// the root directory rather than the drive's current directory.
    pub fn root(&self) -> PathBuf {
        if self.access.len() == 2 && self.access.ends_with(':') {
            PathBuf::from(format!("{}\\", self.access))
        } else {
            PathBuf::from(&self.access)
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.access)
    }
}

/// A point-in-time view of the attached optical devices.
///
/// Maps each device to its logical access identifier, which is `None` (or
/// empty) while the OS is still bringing the device up. Iteration follows the
/// sorted order of device identifiers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceSnapshot {
    entries: BTreeMap<DeviceId, Option<String>>,
}

impl DeviceSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.entries.contains_key(id)
    }

    /// Returns the access identifier recorded for `id`, if the device is
    /// present and its identifier has been resolved.
    pub fn access(&self, id: &DeviceId) -> Option<&str> {
        self.entries.get(id).and_then(|a| a.as_deref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DeviceId, Option<&str>)> {
        self.entries.iter().map(|(id, access)| (id, access.as_deref()))
    }

    /// Devices present here but not in `before` whose access identifier is
    /// resolved and non-empty, in iteration order.
    pub fn new_since(&self, before: &DeviceSnapshot) -> Vec<Device> {
        self.iter()
            .filter(|(id, _)| !before.contains(id))
            .filter_map(|(id, access)| match access {
                Some(access) if !access.is_empty() => Some(Device {
                    id: id.clone(),
                    access: access.to_string(),
                }),
                _ => None,
            })
            .collect()
    }
}

impl FromIterator<(DeviceId, Option<String>)> for DeviceSnapshot {
    fn from_iter<I: IntoIterator<Item = (DeviceId, Option<String>)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<const N: usize> From<[(&str, Option<&str>); N]> for DeviceSnapshot {
    fn from(entries: [(&str, Option<&str>); N]) -> Self {
        entries
            .into_iter()
            .map(|(id, access)| (DeviceId::new(id), access.map(str::to_string)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_since_ignores_pre_existing_devices() {
        let before = DeviceSnapshot::from([(r"\\.\CDROM0", Some("D:"))]);
        let after = DeviceSnapshot::from([(r"\\.\CDROM0", Some("Q:")), (r"\\.\CDROM1", Some("E:"))]);

        let new = after.new_since(&before);
        assert_eq!(
            new,
            vec![Device {
                id: DeviceId::new(r"\\.\CDROM1"),
                access: "E:".to_string(),
            }]
        );
    }

    #[test]
    fn new_since_skips_unresolved_access() {
        let before = DeviceSnapshot::new();
        let after = DeviceSnapshot::from([("/dev/loop0", None), ("/dev/loop1", Some(""))]);
        assert!(after.new_since(&before).is_empty());
    }

    #[test]
    fn root_of_drive_letter_names_root_directory() {
        let device = Device {
            id: DeviceId::new(r"\\.\CDROM1"),
            access: "E:".to_string(),
        };
        assert_eq!(device.root(), PathBuf::from("E:\\"));

        let device = Device {
            id: DeviceId::new("/dev/loop3"),
            access: "/media/user/DISC".to_string(),
        };
        assert_eq!(device.root(), PathBuf::from("/media/user/DISC"));
    }
}
