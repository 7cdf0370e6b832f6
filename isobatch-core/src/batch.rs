//! Drives a directory of disc images through attach, correlate, dump and
//! detach, one image at a time.
//!
//! Every image moves through the same sequence:
//! 1.  A device snapshot is taken, then the image is attached.
//! 2.  The new device is found by diffing snapshots (see [`crate::correlate`]).
//! 3.  The dumper runs against the mounted device.
//! 4.  The image is detached, whatever the dump's result.
//! 5.  Optionally, the source image is deleted after a successful dump.
//!
//! A failure at any step is recorded in that image's [`ImageReport`] and the
//! batch moves on. Images whose attach request went through are tracked in an
//! [`AttachedImageRegistry`] until a detach has been issued for them; whatever
//! is left there when the loop ends (normally, by interruption, or by the
//! orchestrator being dropped) gets one best-effort detach.
use crate::correlate::{PollPolicy, correlate};
use crate::device::Device;
use crate::dump::Dumper;
use crate::error::{BatchError, DumpError, GatewayError};
use crate::platform::{Inventory, MountGateway};
use crate::registry::AttachedImageRegistry;
use crate::scan::{output_for, scan_images};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn};

/// What a batch run should do.
#[derive(Clone, Debug)]
pub struct BatchOptions {
    /// Directory holding the images.
    pub source: PathBuf,
    /// Root under which each image's dump is written.
    pub output: PathBuf,
    /// Only report what would be dumped.
    pub dry_run: bool,
    /// Include images in subdirectories of `source`.
    pub recurse: bool,
    /// Delete each source image after a successful dump.
    pub delete: bool,
    /// How long to wait for an attached image's device to appear.
    pub poll: PollPolicy,
}

impl BatchOptions {
    pub fn new(source: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            output: output.into(),
            dry_run: false,
            recurse: false,
            delete: false,
            poll: PollPolicy::default(),
        }
    }
}

/// The terminal result of processing one image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Dry run: nothing was attached or dumped.
    Skipped,
    /// The attach request failed.
    AttachFailed(String),
    /// The attach request succeeded but no new device appeared in time.
    CorrelationTimedOut,
    /// The dumper reported an error.
    DumpFailed(String),
    /// The dump completed.
    Dumped,
}

impl Outcome {
    pub const fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::AttachFailed(_) | Self::CorrelationTimedOut | Self::DumpFailed(_)
        )
    }
}

/// What happened to the source image after processing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Deletion {
    NotRequested,
    Deleted,
    Failed(String),
}

/// Everything recorded about one image.
#[derive(Clone, Debug)]
pub struct ImageReport {
    pub image: PathBuf,
    pub output: PathBuf,
    /// The device the image was correlated with, if any.
    pub device: Option<Device>,
    pub outcome: Outcome,
    /// Set when the post-dump detach failed. Does not change `outcome`.
    pub detach_warning: Option<String>,
    pub deletion: Deletion,
}

impl ImageReport {
    fn new(image: &Path, output: PathBuf, outcome: Outcome) -> Self {
        Self {
            image: image.to_path_buf(),
            output,
            device: None,
            outcome,
            detach_warning: None,
            deletion: Deletion::NotRequested,
        }
    }
}

/// Per-outcome counts for a finished batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tally {
    pub skipped: usize,
    pub attach_failed: usize,
    pub timed_out: usize,
    pub dump_failed: usize,
    pub dumped: usize,
    pub detach_warnings: usize,
    pub deleted: usize,
    pub delete_failed: usize,
}

impl Tally {
    pub fn from_reports<'a>(reports: impl IntoIterator<Item = &'a ImageReport>) -> Self {
        let mut tally = Self::default();
        for report in reports {
            match report.outcome {
                Outcome::Skipped => tally.skipped += 1,
                Outcome::AttachFailed(_) => tally.attach_failed += 1,
                Outcome::CorrelationTimedOut => tally.timed_out += 1,
                Outcome::DumpFailed(_) => tally.dump_failed += 1,
                Outcome::Dumped => tally.dumped += 1,
            }
            if report.detach_warning.is_some() {
                tally.detach_warnings += 1;
            }
            match report.deletion {
                Deletion::NotRequested => {}
                Deletion::Deleted => tally.deleted += 1,
                Deletion::Failed(_) => tally.delete_failed += 1,
            }
        }
        tally
    }

    /// Per-image failures: attach, correlation, dump and deletion.
    pub const fn failures(&self) -> usize {
        self.attach_failed + self.timed_out + self.dump_failed + self.delete_failed
    }
}

/// The result of a whole batch run.
#[derive(Clone, Debug, Default)]
pub struct BatchReport {
    /// One report per processed image, in processing order.
    pub images: Vec<ImageReport>,
    /// The run stopped early because the running flag was cleared.
    pub interrupted: bool,
    /// Images the final cleanup pass detached.
    pub cleaned_up: Vec<PathBuf>,
}

impl BatchReport {
    pub fn tally(&self) -> Tally {
        Tally::from_reports(&self.images)
    }

    /// True when nothing failed and the run was not interrupted.
    pub fn is_clean(&self) -> bool {
        !self.interrupted && self.tally().failures() == 0
    }
}

/// Progress notifications emitted while a batch runs.
#[derive(Debug)]
pub enum BatchEvent<'a> {
    Scanned { count: usize },
    DryRun { image: &'a Path, output: &'a Path },
    Attaching { image: &'a Path },
    AttachFailed { image: &'a Path, error: &'a GatewayError },
    CorrelationTimedOut { image: &'a Path, waited: Duration },
    Attached { image: &'a Path, device: &'a Device },
    Dumped { image: &'a Path, output: &'a Path },
    DumpFailed { image: &'a Path, error: &'a DumpError },
    DetachFailed { image: &'a Path, error: &'a GatewayError },
    Deleted { image: &'a Path },
    DeleteFailed { image: &'a Path, error: &'a io::Error },
    Interrupted { remaining: usize },
    CleanupDetached { image: &'a Path },
    CleanupFailed { image: &'a Path, error: &'a GatewayError },
}

/// Runs the per-image state machine and owns the attached-image registry.
pub struct Orchestrator<I, G, D>
where
    I: Inventory,
    G: MountGateway,
    D: Dumper,
{
    options: BatchOptions,
    inventory: I,
    gateway: G,
    dumper: D,
    registry: AttachedImageRegistry,
    running: Arc<AtomicBool>,
}

impl<I, G, D> Orchestrator<I, G, D>
where
    I: Inventory,
    G: MountGateway,
    D: Dumper,
{
    pub fn new(options: BatchOptions, inventory: I, gateway: G, dumper: D) -> Self {
        Self {
            options,
            inventory,
            gateway,
            dumper,
            registry: AttachedImageRegistry::new(),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Uses `running` to stop the batch between images once it is cleared.
    pub fn with_running_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = running;
        self
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    pub fn registry(&self) -> &AttachedImageRegistry {
        &self.registry
    }

    pub fn dumper(&self) -> &D {
        &self.dumper
    }

    /// Processes every image under the source directory.
    ///
    /// # Errors
    ///
    /// Only setup problems are returned: a missing or unreadable source
    /// directory, or an output directory that cannot be created. Per-image
    /// failures are recorded in the report.
    pub fn run<F>(&mut self, mut on_event: F) -> Result<BatchReport, BatchError>
    where
        F: FnMut(&BatchEvent<'_>),
    {
        let images = scan_images(&self.options.source, self.options.recurse)?;
        on_event(&BatchEvent::Scanned {
            count: images.len(),
        });

        if !self.options.dry_run {
            fs::create_dir_all(&self.options.output)
                .map_err(|e| BatchError::OutputDir(self.options.output.clone(), e))?;
        }

        let mut report = BatchReport::default();
        for (index, image) in images.iter().enumerate() {
            if !self.running.load(Ordering::SeqCst) {
                let remaining = images.len() - index;
                warn!(remaining, "interrupted; skipping remaining images");
                on_event(&BatchEvent::Interrupted { remaining });
                report.interrupted = true;
                break;
            }
            report.images.push(self.process_image(image, &mut on_event));
        }

        report.cleaned_up = self.cleanup(&mut on_event);

        let tally = report.tally();
        info!(
            dumped = tally.dumped,
            skipped = tally.skipped,
            failures = tally.failures(),
            "batch finished"
        );
        Ok(report)
    }

    /// Attaches, correlates, dumps and detaches a single image.
    pub fn process_image<F>(&mut self, image: &Path, on_event: &mut F) -> ImageReport
    where
        F: FnMut(&BatchEvent<'_>),
    {
        let _span = info_span!("image", image = %image.display()).entered();
        let output = output_for(image, &self.options.output);

        if self.options.dry_run {
            info!(output = %output.display(), "dry run; would dump");
            on_event(&BatchEvent::DryRun {
                image,
                output: &output,
            });
            return ImageReport::new(image, output, Outcome::Skipped);
        }

        // Must be taken before the attach request, or a fast attach could
        // already be part of it.
        let before = self.inventory.snapshot();
        on_event(&BatchEvent::Attaching { image });
        if let Err(e) = self.gateway.attach(image) {
            error!(error = %e, "attach failed");
            on_event(&BatchEvent::AttachFailed { image, error: &e });
            return ImageReport::new(image, output, Outcome::AttachFailed(e.to_string()));
        }

        // Whether the OS really attached it is unknown from here on, so the
        // image stays registered until a detach has been issued.
        self.registry.insert(image);

        // A timed-out image stays attached until the cleanup pass. If its
        // device resolves after the next image's pre-attach snapshot, it is
        // new to that correlation too and can win the tie-break there.
        let Some(device) = correlate(&self.inventory, &before, &self.options.poll) else {
            let waited = self.options.poll.budget();
            error!(?waited, "no new device appeared");
            on_event(&BatchEvent::CorrelationTimedOut { image, waited });
            return ImageReport::new(image, output, Outcome::CorrelationTimedOut);
        };
        info!(device = %device, "mounted");
        on_event(&BatchEvent::Attached {
            image,
            device: &device,
        });

        let outcome = match self.dumper.dump(&device, &output) {
            Ok(()) => {
                info!(output = %output.display(), "dump complete");
                on_event(&BatchEvent::Dumped {
                    image,
                    output: &output,
                });
                Outcome::Dumped
            }
            Err(e) => {
                error!(error = %e, "dump failed");
                on_event(&BatchEvent::DumpFailed { image, error: &e });
                Outcome::DumpFailed(e.to_string())
            }
        };

        // The one detach for this attach; the image leaves the registry
        // whether or not it succeeds.
        let detach_warning = match self.gateway.detach(image) {
            Ok(()) => {
                debug!("detached");
                None
            }
            Err(e) => {
                warn!(error = %e, "detach failed");
                on_event(&BatchEvent::DetachFailed { image, error: &e });
                Some(e.to_string())
            }
        };
        self.registry.remove(image);

        let deletion = if self.options.delete && outcome == Outcome::Dumped {
            match fs::remove_file(image) {
                Ok(()) => {
                    info!("deleted source image");
                    on_event(&BatchEvent::Deleted { image });
                    Deletion::Deleted
                }
                Err(e) => {
                    warn!(error = %e, "unable to delete source image");
                    on_event(&BatchEvent::DeleteFailed { image, error: &e });
                    Deletion::Failed(e.to_string())
                }
            }
        } else {
            Deletion::NotRequested
        };

        ImageReport {
            image: image.to_path_buf(),
            output,
            device: Some(device),
            outcome,
            detach_warning,
            deletion,
        }
    }

    /// Issues one best-effort detach for every image still registered and
    /// empties the registry. Failures are logged and otherwise ignored.
    pub fn cleanup<F>(&mut self, on_event: &mut F) -> Vec<PathBuf>
    where
        F: FnMut(&BatchEvent<'_>),
    {
        let pending = self.registry.drain();
        for image in &pending {
            match self.gateway.detach(image) {
                Ok(()) => {
                    info!(image = %image.display(), "cleanup detached image");
                    on_event(&BatchEvent::CleanupDetached { image });
                }
                Err(e) => {
                    warn!(image = %image.display(), error = %e, "cleanup detach failed");
                    on_event(&BatchEvent::CleanupFailed { image, error: &e });
                }
            }
        }
        pending
    }
}

impl<I, G, D> Drop for Orchestrator<I, G, D>
where
    I: Inventory,
    G: MountGateway,
    D: Dumper,
{
    fn drop(&mut self) {
        if !self.registry.is_empty() {
            self.cleanup(&mut |_: &BatchEvent<'_>| {});
        }
    }
}
