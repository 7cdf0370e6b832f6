//! The core, UI-agnostic library for the `isobatch` disc image dumper.
//!
//! `isobatch-core` takes a directory of optical disc images and, one image at
//! a time, attaches it as a virtual drive, works out which drive it landed
//! on, hands that drive to a dumper, and detaches it again. It can be driven
//! by any front-end, whether it's a command-line interface (like `isobatch`)
//! or something else.
//!
//! The library is structured into several key modules:
//! - [`device`]: Device identifiers and point-in-time device snapshots.
//! - [`platform`]: The [`platform::Inventory`] and [`platform::MountGateway`]
//!   seams, plus their OS-specific implementations.
//! - [`correlate`]: Finds the device an attach request produced by diffing
//!   snapshots with bounded polling.
//! - [`dump`]: The [`dump::Dumper`] capability and the adapters shipped with
//!   the crate.
//! - [`batch`]: The orchestrator that drives every image through the cycle
//!   and guarantees each attached image is detached.
//! - [`mock`]: Simulated drives and dumpers for tests.
//!
//! The primary entry point is [`batch::Orchestrator::run`], which reports its
//! progress via a callback, allowing the calling application to display it in
//! any way it chooses.
//!
//! ## Example: Dumping a Directory of Images
//!
//! ```rust,no_run
//! use isobatch_core::batch::{BatchEvent, BatchOptions, Orchestrator};
//! use isobatch_core::dump::CopyDumper;
//! use isobatch_core::platform::{SystemGateway, SystemInventory};
//! use anyhow::Result;
//!
//! fn main() -> Result<()> {
//!     let mut options = BatchOptions::new("path/to/isos", "path/to/dumps");
//!     options.delete = false;
//!
//!     let mut orchestrator = Orchestrator::new(
//!         options,
//!         SystemInventory,
//!         SystemGateway,
//!         CopyDumper::new(true), // Verify every copied file
//!     );
//!
//!     let report = orchestrator.run(|event| {
//!         if let BatchEvent::Attached { image, device } = event {
//!             println!("Mounted {} as {}", image.display(), device);
//!         }
//!     })?;
//!
//!     println!("{} images dumped", report.tally().dumped);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod correlate;
pub mod device;
pub mod dump;
pub mod error;
pub mod mock;
pub mod platform;
pub mod registry;
pub mod scan;
