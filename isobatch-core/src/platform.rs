//! Provides platform-specific functionality.
//!
//! This module defines the two OS seams the orchestrator depends on: the
//! [`Inventory`] of attached optical devices and the [`MountGateway`] that
//! attaches and detaches disc images.
//!
//! It uses conditional compilation (`#[cfg]`) to expose the correct
//! implementation for the target OS (e.g., Linux, Windows). Each submodule
//! exposes `SystemInventory` and `SystemGateway`, so that the rest of the
//! library and the front-end can use them without worrying about the
//! underlying platform.

use crate::device::DeviceSnapshot;
use crate::error::GatewayError;
use std::path::Path;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use self::linux::*;

#[cfg(target_os = "windows")]
mod windows;
#[cfg(target_os = "windows")]
pub use self::windows::*;

/// Read-only view of the optical devices currently attached.
pub trait Inventory {
    /// Takes a snapshot of the attached devices.
    ///
    /// A failed query yields an empty snapshot; implementations log the
    /// failure instead of returning it.
    fn snapshot(&self) -> DeviceSnapshot;
}

/// Issues OS-level attach and detach requests for disc images.
///
/// Detaching an image that is not attached must not be reported as a failure
/// that callers need to act on.
pub trait MountGateway {
    fn attach(&self, image: &Path) -> Result<(), GatewayError>;
    fn detach(&self, image: &Path) -> Result<(), GatewayError>;
}

impl<T: Inventory + ?Sized> Inventory for &T {
    fn snapshot(&self) -> DeviceSnapshot {
        (**self).snapshot()
    }
}

impl<T: MountGateway + ?Sized> MountGateway for &T {
    fn attach(&self, image: &Path) -> Result<(), GatewayError> {
        (**self).attach(image)
    }

    fn detach(&self, image: &Path) -> Result<(), GatewayError> {
        (**self).detach(image)
    }
}

/// Runs `program` with `args`, turning a spawn error or non-zero exit into a
/// [`GatewayError`].
///
/// Callers parse the output, so the command runs in the C locale.
#[cfg(any(target_os = "linux", target_os = "windows"))]
pub(crate) fn run_command<I, S>(
    program: &str,
    args: I,
) -> Result<std::process::Output, GatewayError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let output = std::process::Command::new(program)
        .args(args)
        .env("LC_ALL", "C")
        .stdin(std::process::Stdio::null())
        .output()
        .map_err(|source| GatewayError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(GatewayError::Failed {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    tracing::debug!(program, status = %output.status, "command finished");
    Ok(output)
}
