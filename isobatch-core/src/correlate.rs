//! Matches an attach request with the device it produced.
//!
//! The OS attach operation gives no completion signal, so the only way to
//! find the new device is to diff the inventory against a snapshot taken
//! before the request was issued, polling until something shows up.
use crate::device::{Device, DeviceSnapshot};
use crate::platform::Inventory;
use std::time::Duration;
use tracing::{debug, warn};

/// Bounds on how long [`correlate`] waits for a device to appear.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    /// Number of snapshots taken before giving up.
    pub max_attempts: u32,
    /// Delay before each snapshot.
    pub interval: Duration,
}

impl PollPolicy {
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Worst-case time spent in [`correlate`].
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(10, Duration::from_millis(500))
    }
}

/// Polls `inventory` until a device absent from `before` appears with a
/// resolved access identifier.
///
/// Sleeps `policy.interval` before each of at most `policy.max_attempts`
/// snapshots and returns as soon as a candidate is found. When several new
/// devices show up in the same snapshot the first in iteration order wins;
/// there is nothing else to tell them apart with.
///
/// Returns `None` once every attempt has been used.
pub fn correlate<I>(inventory: &I, before: &DeviceSnapshot, policy: &PollPolicy) -> Option<Device>
where
    I: Inventory + ?Sized,
{
    for attempt in 1..=policy.max_attempts {
        std::thread::sleep(policy.interval);

        let after = inventory.snapshot();
        let mut candidates = after.new_since(before).into_iter();
        let Some(device) = candidates.next() else {
            debug!(attempt, devices = after.len(), "no new device yet");
            continue;
        };

        let others: Vec<String> = candidates.map(|d| d.id.to_string()).collect();
        if !others.is_empty() {
            warn!(
                chosen = %device.id,
                ignored = ?others,
                "several new devices appeared; picking the first"
            );
        }
        debug!(attempt, device = %device, "device correlated");
        return Some(device);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceId;
    use crate::mock::ScriptedInventory;

    fn fast(max_attempts: u32) -> PollPolicy {
        PollPolicy::new(max_attempts, Duration::ZERO)
    }

    #[test]
    fn returns_device_as_soon_as_it_appears() {
        let before = DeviceSnapshot::from([(r"\\.\CDROM0", Some("D:"))]);
        let inventory = ScriptedInventory::new([
            before.clone(),
            DeviceSnapshot::from([(r"\\.\CDROM0", Some("D:")), (r"\\.\CDROM1", None)]),
            DeviceSnapshot::from([(r"\\.\CDROM0", Some("D:")), (r"\\.\CDROM1", Some("E:"))]),
            DeviceSnapshot::from([(r"\\.\CDROM0", Some("D:")), (r"\\.\CDROM1", Some("E:"))]),
        ]);

        let device = correlate(&inventory, &before, &fast(10)).expect("device");
        assert_eq!(device.id, DeviceId::new(r"\\.\CDROM1"));
        assert_eq!(device.access, "E:");
        assert_eq!(inventory.polls(), 3);
    }

    #[test]
    fn gives_up_after_exactly_max_attempts() {
        let before = DeviceSnapshot::from([(r"\\.\CDROM0", Some("D:"))]);
        let inventory = ScriptedInventory::repeating(before.clone());

        assert_eq!(correlate(&inventory, &before, &fast(7)), None);
        assert_eq!(inventory.polls(), 7);
    }

    #[test]
    fn never_returns_a_device_from_before() {
        // The pre-existing drive gets a new letter, which must not look like
        // a fresh attach.
        let before = DeviceSnapshot::from([(r"\\.\CDROM0", None)]);
        let inventory = ScriptedInventory::repeating(DeviceSnapshot::from([(r"\\.\CDROM0", Some("D:"))]));

        assert_eq!(correlate(&inventory, &before, &fast(3)), None);
    }

    #[test]
    fn tolerates_empty_snapshots() {
        let before = DeviceSnapshot::new();
        let inventory = ScriptedInventory::new([
            DeviceSnapshot::new(),
            DeviceSnapshot::new(),
            DeviceSnapshot::from([("/dev/loop4", Some("/media/disc"))]),
        ]);

        let device = correlate(&inventory, &before, &fast(5)).expect("device");
        assert_eq!(device.access, "/media/disc");
    }

    #[test]
    fn several_new_devices_pick_first_in_order() {
        let before = DeviceSnapshot::new();
        let inventory = ScriptedInventory::repeating(DeviceSnapshot::from([
            (r"\\.\CDROM2", Some("G:")),
            (r"\\.\CDROM1", Some("F:")),
        ]));

        let device = correlate(&inventory, &before, &fast(1)).expect("device");
        assert_eq!(device.id, DeviceId::new(r"\\.\CDROM1"));
    }

    #[test]
    fn zero_attempts_never_polls() {
        let inventory = ScriptedInventory::repeating(DeviceSnapshot::from([("/dev/sr0", Some("/mnt"))]));
        assert_eq!(correlate(&inventory, &DeviceSnapshot::new(), &fast(0)), None);
        assert_eq!(inventory.polls(), 0);
    }

    #[test]
    fn budget_is_attempts_times_interval() {
        let policy = PollPolicy::default();
        assert_eq!(policy.budget(), Duration::from_secs(5));
    }
}
