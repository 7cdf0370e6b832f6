//! Turns batch events into terminal output.
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use isobatch_core::batch::{BatchEvent, BatchReport};

/// The progress bar shown while the copy dumper runs.
///
/// It is created hidden and re-armed for every dump, so one bar serves the
/// whole batch.
pub fn dump_progress_bar() -> ProgressBar {
    let pb = ProgressBar::hidden();
    pb.set_prefix("Dumping");
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{prefix:12} [{elapsed_precise}] [{bar:40.green/black}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("■ "),
    );
    pb
}

/// Prints a line for every batch event.
pub struct Renderer {
    progress: ProgressBar,
}

impl Renderer {
    pub fn new(progress: ProgressBar) -> Self {
        Self { progress }
    }

    pub fn on_event(&mut self, event: &BatchEvent<'_>) {
        match event {
            BatchEvent::Scanned { count } => {
                println!("Found {count} image(s).");
            }
            BatchEvent::DryRun { image, output } => {
                println!(
                    "{} Would dump {} to {}",
                    style("[Dry Run]").yellow(),
                    image.display(),
                    output.display()
                );
            }
            BatchEvent::Attaching { image } => {
                println!("\nMounting {}", style(image.display()).cyan());
            }
            BatchEvent::AttachFailed { image, error } => {
                eprintln!(
                    "{} Failed to mount {}: {error}",
                    style("ERROR:").red().bold(),
                    image.display()
                );
            }
            BatchEvent::CorrelationTimedOut { image, waited } => {
                eprintln!(
                    "{} Failed to find mounted drive for {} after {:.1}s",
                    style("ERROR:").red().bold(),
                    image.display(),
                    waited.as_secs_f64()
                );
            }
            BatchEvent::Attached { image, device } => {
                println!(
                    "Mounted {} as {} ({})",
                    image.display(),
                    style(&device.id).cyan(),
                    style(&device.access).cyan()
                );
            }
            BatchEvent::Dumped { image, output } => {
                self.progress.finish_and_clear();
                println!(
                    "✨ Dumped {} to {}",
                    style(image.display()).cyan(),
                    style(output.display()).cyan()
                );
            }
            BatchEvent::DumpFailed { image, error } => {
                self.progress.finish_and_clear();
                eprintln!(
                    "{} Error dumping {}: {error}",
                    style("❌").red(),
                    image.display()
                );
            }
            BatchEvent::DetachFailed { image, error } => {
                eprintln!(
                    "{} Failed to dismount {}: {error}",
                    style("WARNING:").yellow().bold(),
                    image.display()
                );
            }
            BatchEvent::Deleted { image } => {
                println!("Deleted image at {}", image.display());
            }
            BatchEvent::DeleteFailed { image, error } => {
                eprintln!(
                    "{} Unable to delete {}: {error}",
                    style("ERROR:").red().bold(),
                    image.display()
                );
            }
            BatchEvent::Interrupted { remaining } => {
                eprintln!(
                    "\n{} Interrupted; skipping {remaining} remaining image(s).",
                    style("WARNING:").yellow().bold()
                );
            }
            BatchEvent::CleanupDetached { image } => {
                println!("Dismounted leftover image {}", image.display());
            }
            BatchEvent::CleanupFailed { image, error } => {
                eprintln!(
                    "{} Could not dismount leftover image {}: {error}",
                    style("WARNING:").yellow().bold(),
                    image.display()
                );
            }
        }
    }
}

/// Prints the per-outcome tally after a run.
pub fn print_summary(report: &BatchReport) {
    let tally = report.tally();
    let rows = [
        ("Dumped", tally.dumped),
        ("Skipped (dry run)", tally.skipped),
        ("Mount failed", tally.attach_failed),
        ("Drive not found", tally.timed_out),
        ("Dump failed", tally.dump_failed),
        ("Dismount warnings", tally.detach_warnings),
        ("Deleted", tally.deleted),
        ("Delete failed", tally.delete_failed),
    ];

    println!("\nSummary:");
    println!("  {:-<20} {:-<6}", "", "");
    for (label, count) in rows {
        if count == 0 && !matches!(label, "Dumped") {
            continue;
        }
        println!("  {label:<20} {count:>6}");
    }
    if !report.cleaned_up.is_empty() {
        println!("  {:<20} {:>6}", "Cleaned up", report.cleaned_up.len());
    }
}
