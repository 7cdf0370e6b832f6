use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use dialoguer::{Confirm, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressDrawTarget};
use isobatch_core::batch::{BatchOptions, BatchReport, Orchestrator};
use isobatch_core::correlate::PollPolicy;
use isobatch_core::dump::{CommandDumper, CopyDumper, Dumper};
use isobatch_core::platform::{SystemGateway, SystemInventory};
use std::io::{IsTerminal, stdin, stdout};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[cfg(unix)]
use libc::ECHOCTL;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;
#[cfg(unix)]
use termios::{TCSANOW, Termios, tcsetattr};

mod logging;
mod render;

/// Every image skipped or dumped.
const EXIT_OK: u8 = 0;
/// At least one image failed to mount, correlate, dump or delete.
const EXIT_PARTIAL: u8 = 1;
/// The source directory is missing or the output directory can't be created.
const EXIT_SETUP: u8 = 3;
/// Stopped by Ctrl+C.
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "isobatch")]
#[command(
    about = "Mount each disc image in a directory, dump it, and dismount it again",
    version
)]
struct Cli {
    /// Directory containing the .iso images
    source: PathBuf,

    /// Directory the dumps are written to (one subdirectory per image)
    output: PathBuf,

    /// Only print what would be dumped
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Include images in subdirectories of SOURCE
    #[arg(short, long)]
    recurse: bool,

    /// Delete each image after it was dumped successfully
    #[arg(short, long)]
    delete: bool,

    /// Don't ask for confirmation before deleting images
    #[arg(short, long)]
    yes: bool,

    /// How many times to look for the mounted drive before giving up
    #[arg(long, env = "ISOBATCH_ATTEMPTS", default_value_t = 10)]
    attempts: u32,

    /// Milliseconds to wait between looks for the mounted drive
    #[arg(long, env = "ISOBATCH_INTERVAL_MS", default_value_t = 500)]
    interval_ms: u64,

    /// External program that dumps a mounted disc (default: copy the files)
    #[arg(long, env = "ISOBATCH_DUMPER")]
    dumper: Option<PathBuf>,

    /// Argument for the dumper; may use {device}, {output} and {ird}
    #[arg(long = "dumper-arg", allow_hyphen_values = true)]
    dumper_args: Vec<String>,

    /// Directory of IRD files, substituted for {ird} in dumper arguments
    #[arg(long, env = "ISOBATCH_IRD_DIR")]
    ird_dir: Option<PathBuf>,

    /// Re-read every copied file and compare its SHA-256
    #[arg(long, conflicts_with = "dumper")]
    verify: bool,

    /// More diagnostic output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            source: self.source.clone(),
            output: self.output.clone(),
            dry_run: self.dry_run,
            recurse: self.recurse,
            delete: self.delete,
            poll: PollPolicy::new(self.attempts, Duration::from_millis(self.interval_ms)),
        }
    }

    /// Builds the dumper: the external program if one was given, otherwise
    /// the copy dumper reporting to `progress`.
    fn dumper(&self, progress: &ProgressBar) -> Box<dyn Dumper> {
        if let Some(program) = &self.dumper {
            return Box::new(CommandDumper::new(
                program,
                self.dumper_args.clone(),
                self.ird_dir.clone(),
            ));
        }

        let start = progress.clone();
        let advance = progress.clone();
        Box::new(CopyDumper::with_progress(
            self.verify,
            move |total| {
                start.reset();
                start.set_length(total);
                start.set_draw_target(ProgressDrawTarget::stderr());
            },
            move |bytes| advance.set_position(bytes),
        ))
    }
}

/// On Unix, disables `ECHOCTL` for the terminal so Ctrl+C isn't echoed as
/// `^C` over the progress output. Restores the original settings on drop.
struct TermRestorer {
    #[cfg(unix)]
    original: Option<Termios>,
}

impl TermRestorer {
    #[cfg(unix)]
    fn new() -> Self {
        let fd = stdout().as_raw_fd();
        let original = stdout()
            .is_terminal()
            .then(|| Termios::from_fd(fd).ok())
            .flatten()
            .filter(|original| {
                let mut quiet = *original;
                quiet.c_lflag &= !ECHOCTL;
                tcsetattr(fd, TCSANOW, &quiet).is_ok()
            });
        Self { original }
    }

    #[cfg(not(unix))]
    fn new() -> Self {
        Self {}
    }
}

impl Drop for TermRestorer {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(original) = &self.original {
            tcsetattr(stdout().as_raw_fd(), TCSANOW, original).ok();
        }
    }
}

/// Asks before a run that deletes images, unless `--yes` was given or there
/// is no terminal to ask on.
fn confirm_delete(cli: &Cli) -> Result<bool> {
    if !cli.delete || cli.dry_run || cli.yes || !stdin().is_terminal() {
        return Ok(true);
    }
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!(
            "Delete each image in '{}' after it is dumped?",
            cli.source.display()
        ))
        .default(false)
        .interact()?;
    Ok(confirmed)
}

fn exit_code(report: &BatchReport) -> u8 {
    if report.interrupted {
        EXIT_INTERRUPTED
    } else if report.is_clean() {
        EXIT_OK
    } else {
        EXIT_PARTIAL
    }
}

fn run(cli: Cli) -> Result<u8> {
    // This flag is cleared by Ctrl+C; the batch stops before the next image.
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        if r.swap(false, Ordering::SeqCst) {
            eprintln!(
                "\n{} Finishing the current image, then cleaning up...",
                style("Interrupted.").yellow().bold()
            );
        }
    })
    .context("failed to install Ctrl+C handler")?;

    if cli.dry_run {
        println!("Dry run: no discs will be dumped");
    }

    if !confirm_delete(&cli)? {
        println!("Cancelled.");
        return Ok(EXIT_OK);
    }

    let progress = render::dump_progress_bar();
    let mut renderer = render::Renderer::new(progress.clone());
    let mut orchestrator = Orchestrator::new(
        cli.batch_options(),
        SystemInventory,
        SystemGateway,
        cli.dumper(&progress),
    )
    .with_running_flag(running);

    match orchestrator.run(|event| renderer.on_event(event)) {
        Ok(report) => {
            render::print_summary(&report);
            Ok(exit_code(&report))
        }
        // Only setup problems come back as errors; per-image failures are in
        // the report.
        Err(e) => {
            eprintln!("{} {e}", style("ERROR:").red().bold());
            Ok(EXIT_SETUP)
        }
    }
}

fn main() -> ExitCode {
    // This guard will be dropped when main() exits, restoring the terminal.
    let _term_restorer = TermRestorer::new();

    // Usage errors exit here with clap's status 2.
    let cli = Cli::parse();
    logging::init_logging(cli.verbose, cli.quiet);
    tracing::debug!(?cli, "parsed arguments");

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{} {e:#}", style("ERROR:").red().bold());
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_map_onto_batch_options() {
        let cli = Cli::try_parse_from([
            "isobatch", "isos", "out", "-n", "-r", "-d", "--attempts", "3", "--interval-ms", "20",
        ])
        .unwrap();
        let options = cli.batch_options();
        assert!(options.dry_run && options.recurse && options.delete);
        assert_eq!(options.poll, PollPolicy::new(3, Duration::from_millis(20)));
        assert_eq!(options.source, PathBuf::from("isos"));
        assert_eq!(options.output, PathBuf::from("out"));
    }

    #[test]
    fn long_flags_are_accepted() {
        let cli =
            Cli::try_parse_from(["isobatch", "--dry-run", "--recurse", "--delete", "a", "b"])
                .unwrap();
        assert!(cli.dry_run && cli.recurse && cli.delete);
    }

    #[test]
    fn dumper_args_allow_leading_hyphens() {
        let cli = Cli::try_parse_from([
            "isobatch",
            "a",
            "b",
            "--dumper",
            "ps3dump",
            "--dumper-arg",
            "--ird={ird}",
        ])
        .unwrap();
        assert_eq!(cli.dumper_args, vec!["--ird={ird}".to_string()]);
    }

    #[test]
    fn missing_output_is_a_usage_error() {
        let err = Cli::try_parse_from(["isobatch", "isos"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn interrupted_report_wins_over_failures() {
        let report = BatchReport {
            interrupted: true,
            ..Default::default()
        };
        assert_eq!(exit_code(&report), EXIT_INTERRUPTED);
        assert_eq!(exit_code(&BatchReport::default()), EXIT_OK);
    }
}
