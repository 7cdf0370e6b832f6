//! The dumping capability the orchestrator hands each mounted disc to.
//!
//! Disc-specific work (key discovery, decryption, sector extraction) lives
//! outside this crate. Two adapters ship here:
//! - [`CopyDumper`] copies the mounted file tree, optionally verifying every
//!   file with SHA-256.
//! - [`CommandDumper`] runs an external dumping program.
use crate::device::Device;
use crate::error::DumpError;
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};
use walkdir::WalkDir;

// Use a 1 MiB buffer for copy and verify passes.
const BUFFER_SIZE: usize = 1024 * 1024;

/// Dumps the disc mounted at `device` into `output`.
pub trait Dumper {
    fn dump(&mut self, device: &Device, output: &Path) -> Result<(), DumpError>;
}

impl<T: Dumper + ?Sized> Dumper for &mut T {
    fn dump(&mut self, device: &Device, output: &Path) -> Result<(), DumpError> {
        (**self).dump(device, output)
    }
}

impl<T: Dumper + ?Sized> Dumper for Box<T> {
    fn dump(&mut self, device: &Device, output: &Path) -> Result<(), DumpError> {
        (**self).dump(device, output)
    }
}

/// Copies every file under the mounted root into the output directory.
///
/// Progress is reported through two callbacks: `on_start` receives the total
/// number of bytes before copying begins, and `on_progress` the running total
/// as data is written.
pub struct CopyDumper<S, P>
where
    S: FnMut(u64),
    P: FnMut(u64),
{
    verify: bool,
    on_start: S,
    on_progress: P,
}

impl CopyDumper<fn(u64), fn(u64)> {
    /// A copy dumper that reports no progress.
    pub fn new(verify: bool) -> Self {
        CopyDumper {
            verify,
            on_start: |_| {},
            on_progress: |_| {},
        }
    }
}

impl<S, P> CopyDumper<S, P>
where
    S: FnMut(u64),
    P: FnMut(u64),
{
    pub fn with_progress(verify: bool, on_start: S, on_progress: P) -> Self {
        Self {
            verify,
            on_start,
            on_progress,
        }
    }
}

/// A file to copy: its path relative to the root and its size.
struct Entry {
    relative: PathBuf,
    len: u64,
}

fn list_files(root: &Path) -> Result<Vec<Entry>, DumpError> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            DumpError::Io(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let len = entry
            .metadata()
            .map_err(|e| DumpError::Io(entry.path().to_path_buf(), e.into()))?
            .len();
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_path_buf();
        entries.push(Entry { relative, len });
    }
    Ok(entries)
}

/// Hashes the file at `path` in `BUFFER_SIZE` chunks.
fn sha256_file(path: &Path) -> Result<Vec<u8>, DumpError> {
    let mut file = File::open(path).map_err(|e| DumpError::Io(path.to_path_buf(), e))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        let n = file
            .read(&mut buffer)
            .map_err(|e| DumpError::Io(path.to_path_buf(), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize().to_vec())
}

impl<S, P> CopyDumper<S, P>
where
    S: FnMut(u64),
    P: FnMut(u64),
{
    /// Copies `source` to `dest`, returning the SHA-256 of the copied bytes.
    fn copy_file(
        &mut self,
        source: &Path,
        dest: &Path,
        buffer: &mut [u8],
        copied: &mut u64,
    ) -> Result<Vec<u8>, DumpError> {
        let mut input = File::open(source).map_err(|e| DumpError::Io(source.to_path_buf(), e))?;
        let output = File::create(dest).map_err(|e| DumpError::Io(dest.to_path_buf(), e))?;
        let mut writer = BufWriter::new(output);
        let mut hasher = Sha256::new();

        loop {
            let n = input
                .read(buffer)
                .map_err(|e| DumpError::Io(source.to_path_buf(), e))?;
            if n == 0 {
                break;
            }
            writer
                .write_all(&buffer[..n])
                .map_err(|e| DumpError::Io(dest.to_path_buf(), e))?;
            hasher.update(&buffer[..n]);
            *copied += n as u64;
            (self.on_progress)(*copied);
        }

        writer
            .flush()
            .map_err(|e| DumpError::Io(dest.to_path_buf(), e))?;
        Ok(hasher.finalize().to_vec())
    }
}

impl<S, P> Dumper for CopyDumper<S, P>
where
    S: FnMut(u64),
    P: FnMut(u64),
{
    fn dump(&mut self, device: &Device, output: &Path) -> Result<(), DumpError> {
        let root = device.root();
        let entries = list_files(&root)?;
        if entries.is_empty() {
            return Err(DumpError::Empty(root));
        }

        let total: u64 = entries.iter().map(|e| e.len).sum();
        info!(root = %root.display(), files = entries.len(), bytes = total, "copying disc contents");
        (self.on_start)(total);

        fs::create_dir_all(output).map_err(|e| DumpError::Io(output.to_path_buf(), e))?;

        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut copied: u64 = 0;
        for entry in &entries {
            let source = root.join(&entry.relative);
            let dest = output.join(&entry.relative);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| DumpError::Io(parent.to_path_buf(), e))?;
            }

            let digest = self.copy_file(&source, &dest, &mut buffer, &mut copied)?;
            if self.verify && sha256_file(&dest)? != digest {
                return Err(DumpError::Verify(dest));
            }
            debug!(file = %entry.relative.display(), bytes = entry.len, "copied");
        }

        Ok(())
    }
}

/// Runs an external program to dump each disc.
///
/// Arguments may contain `{device}`, `{output}` and `{ird}` placeholders.
/// When no argument mentions `{device}` or `{output}`, the device root and
/// output path are appended in that order.
#[derive(Clone, Debug)]
pub struct CommandDumper {
    program: OsString,
    args: Vec<String>,
    ird_dir: Option<PathBuf>,
}

impl CommandDumper {
    pub fn new(program: impl Into<OsString>, args: Vec<String>, ird_dir: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            ird_dir,
        }
    }

    /// Builds the argument list for one dump.
    pub fn expand_args(&self, device_root: &Path, output: &Path) -> Vec<OsString> {
        let device = device_root.to_string_lossy();
        let out = output.to_string_lossy();
        let ird = self
            .ird_dir
            .as_deref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        let positional = self
            .args
            .iter()
            .any(|a| a.contains("{device}") || a.contains("{output}"));

        let mut args: Vec<OsString> = self
            .args
            .iter()
            .map(|a| {
                a.replace("{device}", &device)
                    .replace("{output}", &out)
                    .replace("{ird}", &ird)
                    .into()
            })
            .collect();
        if !positional {
            args.push(device_root.as_os_str().to_owned());
            args.push(output.as_os_str().to_owned());
        }
        args
    }
}

impl Dumper for CommandDumper {
    fn dump(&mut self, device: &Device, output: &Path) -> Result<(), DumpError> {
        let program = self.program.to_string_lossy().into_owned();
        let args = self.expand_args(&device.root(), output);
        debug!(program, ?args, "running dumper");

        let result = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| DumpError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            return Err(DumpError::Command {
                program,
                status: result.status.to_string(),
                stderr: tail.into_iter().rev().collect::<Vec<_>>().join("\n"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceId;
    use std::cell::Cell;
    use tempfile::TempDir;

    fn device_at(root: &Path) -> Device {
        Device {
            id: DeviceId::new("/dev/loop0"),
            access: root.to_string_lossy().into_owned(),
        }
    }

    #[test]
    fn copies_tree_and_reports_progress() {
        let disc = TempDir::new().unwrap();
        fs::create_dir_all(disc.path().join("PS3_GAME/USRDIR")).unwrap();
        fs::write(disc.path().join("PS3_DISC.SFB"), b"sfb").unwrap();
        fs::write(disc.path().join("PS3_GAME/USRDIR/EBOOT.BIN"), vec![7u8; 4096]).unwrap();

        let out = TempDir::new().unwrap();
        let output = out.path().join("Game");

        let total = Cell::new(0);
        let last = Cell::new(0);
        let mut dumper =
            CopyDumper::with_progress(true, |t| total.set(t), |p| last.set(p));
        dumper.dump(&device_at(disc.path()), &output).unwrap();

        assert_eq!(total.get(), 4099);
        assert_eq!(last.get(), 4099);
        assert_eq!(fs::read(output.join("PS3_DISC.SFB")).unwrap(), b"sfb");
        assert_eq!(
            fs::read(output.join("PS3_GAME/USRDIR/EBOOT.BIN")).unwrap(),
            vec![7u8; 4096]
        );
    }

    #[test]
    fn empty_disc_is_a_failure() {
        let disc = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let err = CopyDumper::new(false)
            .dump(&device_at(disc.path()), &out.path().join("x"))
            .unwrap_err();
        assert!(matches!(err, DumpError::Empty(_)));
    }

    #[test]
    fn missing_root_is_a_failure() {
        let out = TempDir::new().unwrap();
        let err = CopyDumper::new(false)
            .dump(&device_at(&out.path().join("gone")), &out.path().join("x"))
            .unwrap_err();
        assert!(matches!(err, DumpError::Io(..)));
    }

    #[test]
    fn command_args_append_device_and_output() {
        let dumper = CommandDumper::new("ps3dump", vec!["--quiet".into()], None);
        let args = dumper.expand_args(Path::new("/mnt/disc"), Path::new("/out/Game"));
        assert_eq!(args, vec![
            OsString::from("--quiet"),
            OsString::from("/mnt/disc"),
            OsString::from("/out/Game"),
        ]);
    }

    #[test]
    fn command_args_substitute_placeholders() {
        let dumper = CommandDumper::new(
            "ps3dump",
            vec![
                "--source={device}".into(),
                "--ird".into(),
                "{ird}".into(),
                "{output}".into(),
            ],
            Some(PathBuf::from("/irds")),
        );
        let args = dumper.expand_args(Path::new("/mnt/disc"), Path::new("/out/Game"));
        assert_eq!(args, vec![
            OsString::from("--source=/mnt/disc"),
            OsString::from("--ird"),
            OsString::from("/irds"),
            OsString::from("/out/Game"),
        ]);
    }

    #[cfg(unix)]
    #[test]
    fn command_failure_carries_status() {
        let mut dumper = CommandDumper::new("false", Vec::new(), None);
        let err = dumper
            .dump(&device_at(Path::new("/")), Path::new("/tmp/out"))
            .unwrap_err();
        assert!(matches!(err, DumpError::Command { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn missing_program_is_a_spawn_error() {
        let mut dumper = CommandDumper::new("/nonexistent/dumper", Vec::new(), None);
        let err = dumper
            .dump(&device_at(Path::new("/")), Path::new("/tmp/out"))
            .unwrap_err();
        assert!(matches!(err, DumpError::Spawn { .. }));
    }
}
