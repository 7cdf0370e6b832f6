//! In-memory stand-ins for the OS and the dumper, for testing without
//! mounting anything.
//!
//! [`ScriptedInventory`] replays a fixed list of snapshots. [`SimulatedDrives`]
//! behaves like a machine with a virtual drive controller: attaching an
//! image makes a device appear (optionally after a delay measured in polls),
//! detaching makes it disappear, and every call is recorded for assertions.
//!
//! ```rust
//! use isobatch_core::mock::{Attach, Call, SimulatedDrives};
//! use isobatch_core::platform::{Inventory, MountGateway};
//! use std::path::Path;
//!
//! let drives = SimulatedDrives::new();
//! drives.set_behaviour("disc1.iso", Attach::Never);
//!
//! drives.attach(Path::new("disc1.iso")).unwrap();
//! assert!(drives.snapshot().is_empty());
//! assert_eq!(drives.calls(), vec![Call::Attach("disc1.iso".into()), Call::Snapshot]);
//! ```

use crate::device::{Device, DeviceId, DeviceSnapshot};
use crate::dump::Dumper;
use crate::error::{DumpError, GatewayError};
use crate::platform::{Inventory, MountGateway};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

/// Replays snapshots in order, repeating the last one once exhausted.
pub struct ScriptedInventory {
    snapshots: Vec<DeviceSnapshot>,
    polls: AtomicUsize,
}

impl ScriptedInventory {
    pub fn new(snapshots: impl IntoIterator<Item = DeviceSnapshot>) -> Self {
        Self {
            snapshots: snapshots.into_iter().collect(),
            polls: AtomicUsize::new(0),
        }
    }

    /// An inventory that always reports `snapshot`.
    pub fn repeating(snapshot: DeviceSnapshot) -> Self {
        Self::new([snapshot])
    }

    /// Number of snapshots taken so far.
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

impl Inventory for ScriptedInventory {
    fn snapshot(&self) -> DeviceSnapshot {
        let n = self.polls.fetch_add(1, Ordering::SeqCst);
        self.snapshots
            .get(n)
            .or_else(|| self.snapshots.last())
            .cloned()
            .unwrap_or_default()
    }
}

/// How the simulated controller reacts to attaching a given image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attach {
    /// The device shows up with a drive letter once `after_polls` snapshots
    /// have seen it without one.
    Appears { after_polls: u32 },
    /// The attach request succeeds but no device ever gets a drive letter.
    Never,
    /// The attach request itself fails.
    Fails,
}

impl Default for Attach {
    fn default() -> Self {
        Self::Appears { after_polls: 0 }
    }
}

/// A recorded call against [`SimulatedDrives`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Snapshot,
    Attach(PathBuf),
    Detach(PathBuf),
}

#[derive(Debug)]
struct Drive {
    image: PathBuf,
    letter: char,
    polls_left: Option<u32>,
}

#[derive(Debug, Default)]
struct State {
    drives: BTreeMap<u32, Drive>,
    preexisting: BTreeMap<DeviceId, Option<String>>,
    behaviours: HashMap<PathBuf, Attach>,
    failing_detach: HashSet<PathBuf>,
    calls: Vec<Call>,
    fresh_ids: bool,
    issued: u32,
}

impl State {
    fn free_unit(&self) -> u32 {
        if self.fresh_ids {
            return self.issued + 1;
        }
        (1..).find(|u| !self.drives.contains_key(u)).unwrap_or(u32::MAX)
    }

    fn free_letter(&self) -> char {
        if self.fresh_ids {
            return ('E'..='Z').nth(self.issued as usize).unwrap_or('Z');
        }
        let used: HashSet<char> = self.drives.values().map(|d| d.letter).collect();
        ('E'..='Z').find(|c| !used.contains(c)).unwrap_or('Z')
    }
}

/// A fake drive controller implementing both [`Inventory`] and
/// [`MountGateway`].
///
/// Devices are named `\\.\CDROM<n>` with the lowest free unit number, and get
/// the lowest free drive letter from `E:` upwards, so consecutive attaches
/// reuse identifiers the same way a real controller does.
/// [`SimulatedDrives::with_fresh_ids`] turns the reuse off.
#[derive(Debug, Default)]
pub struct SimulatedDrives {
    state: Mutex<State>,
}

impl SimulatedDrives {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a device that exists before the run starts (e.g. a physical drive).
    pub fn with_existing(self, id: &str, access: Option<&str>) -> Self {
        self.state
            .lock()
            .unwrap()
            .preexisting
            .insert(DeviceId::new(id), access.map(str::to_string));
        self
    }

    /// Gives every attach a unit number and drive letter never handed out
    /// before, instead of reusing the lowest free ones.
    pub fn with_fresh_ids(self) -> Self {
        self.state.lock().unwrap().fresh_ids = true;
        self
    }

    /// Sets how attaching `image` behaves. Images without a behaviour appear
    /// on the first poll.
    pub fn set_behaviour(&self, image: impl Into<PathBuf>, behaviour: Attach) {
        self.state
            .lock()
            .unwrap()
            .behaviours
            .insert(image.into(), behaviour);
    }

    /// Makes every detach of `image` fail (the drive stays attached).
    pub fn fail_detach(&self, image: impl Into<PathBuf>) {
        self.state.lock().unwrap().failing_detach.insert(image.into());
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Attach and detach calls only.
    pub fn gateway_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::Snapshot))
            .collect()
    }

    pub fn attach_count(&self, image: &Path) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Attach(p) if p == image))
            .count()
    }

    pub fn detach_count(&self, image: &Path) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Detach(p) if p == image))
            .count()
    }

    /// Images currently attached on the simulated controller.
    pub fn attached_images(&self) -> Vec<PathBuf> {
        self.state
            .lock()
            .unwrap()
            .drives
            .values()
            .map(|d| d.image.clone())
            .collect()
    }
}

impl Inventory for SimulatedDrives {
    fn snapshot(&self) -> DeviceSnapshot {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Snapshot);

        let mut entries = state.preexisting.clone();
        for (unit, drive) in state.drives.iter_mut() {
            let access = match drive.polls_left {
                None | Some(0) => {
                    drive.polls_left = None;
                    Some(format!("{}:", drive.letter))
                }
                Some(left) => {
                    drive.polls_left = Some(left - 1);
                    None
                }
            };
            entries.insert(DeviceId::new(format!(r"\\.\CDROM{unit}")), access);
        }
        trace!(devices = entries.len(), "simulated snapshot");
        entries.into_iter().collect()
    }
}

impl MountGateway for SimulatedDrives {
    fn attach(&self, image: &Path) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Attach(image.to_path_buf()));

        let behaviour = state.behaviours.get(image).copied().unwrap_or_default();
        let polls_left = match behaviour {
            Attach::Fails => {
                return Err(GatewayError::Other(format!(
                    "simulated attach failure for {}",
                    image.display()
                )));
            }
            Attach::Never => Some(u32::MAX),
            Attach::Appears { after_polls } => Some(after_polls),
        };

        let unit = state.free_unit();
        let letter = state.free_letter();
        state.issued += 1;
        state.drives.insert(
            unit,
            Drive {
                image: image.to_path_buf(),
                letter,
                polls_left,
            },
        );
        Ok(())
    }

    fn detach(&self, image: &Path) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Detach(image.to_path_buf()));

        if state.failing_detach.contains(image) {
            return Err(GatewayError::Other(format!(
                "simulated detach failure for {}",
                image.display()
            )));
        }
        // Detaching an image that is not attached is not an error.
        state.drives.retain(|_, d| d.image != image);
        Ok(())
    }
}

/// A dumper that records its calls and fails for selected outputs.
#[derive(Debug, Default)]
pub struct ScriptedDumper {
    failing: HashSet<PathBuf>,
    calls: Vec<(Device, PathBuf)>,
}

impl ScriptedDumper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the dump into `output` fail.
    pub fn fail_for(mut self, output: impl Into<PathBuf>) -> Self {
        self.failing.insert(output.into());
        self
    }

    /// Every `(device, output)` pair the dumper was handed, in order.
    pub fn calls(&self) -> &[(Device, PathBuf)] {
        &self.calls
    }
}

impl Dumper for ScriptedDumper {
    fn dump(&mut self, device: &Device, output: &Path) -> Result<(), DumpError> {
        self.calls.push((device.clone(), output.to_path_buf()));
        if self.failing.contains(output) {
            return Err(DumpError::Empty(device.root()));
        }
        Ok(())
    }
}
