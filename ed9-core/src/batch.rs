//! Directory drivers shared by the command-line tools.
//!
//! A batch never stops on a per-file error: each failure is logged with its
//! path and category and the walk continues.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use walkdir::WalkDir;

use crate::asm::dispatch::assemble;
use crate::asm::AsmOptions;
use crate::commands::CommandTable;
use crate::disasm::Disassembler;
use crate::error::{Diagnostic, Ed9Error, Located, Position, Result, Severity};
use crate::program::Program;
use crate::strings::{inject, StringMap};

/// Exit code when every file went through.
pub const EXIT_OK: i32 = 0;
/// Exit code for bad flags or unreadable configuration.
pub const EXIT_CONFIG: i32 = 1;
/// Exit code when at least one file failed.
pub const EXIT_FAILURES: i32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Written(PathBuf),
    Skipped(String),
}

#[derive(Debug, Clone)]
pub struct FileError {
    pub path: PathBuf,
    pub category: &'static str,
    pub message: String,
}

impl From<&Located> for FileError {
    fn from(e: &Located) -> Self {
        Self {
            path: e.path.clone(),
            category: e.source.category(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub ok: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<FileError>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn summary(&self) -> String {
        let mut s = format!(
            "{} ok, {} failed in {:.2}s",
            self.ok.len(),
            self.failed.len(),
            self.elapsed.as_secs_f64()
        );
        if !self.skipped.is_empty() {
            s.push_str(&format!(" ({} skipped)", self.skipped.len()));
        }
        s
    }

    pub fn exit_code(&self) -> i32 {
        if self.failed.is_empty() {
            EXIT_OK
        } else {
            EXIT_FAILURES
        }
    }

    fn sort(&mut self) {
        self.ok.sort();
        self.skipped.sort();
        self.failed.sort_by(|a, b| a.path.cmp(&b.path));
    }
}

/// Append-only batch log shared by all workers.
pub struct BatchLog {
    out: Mutex<Option<BufWriter<File>>>,
}

impl BatchLog {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            out: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    /// A log that only goes to the `log` facade.
    pub fn disabled() -> Self {
        Self {
            out: Mutex::new(None),
        }
    }

    pub fn line(&self, line: &str) {
        let mut guard = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(out) = guard.as_mut() {
            if let Err(e) = writeln!(out, "{}", line) {
                log::warn!("batch log write failed: {}", e);
            }
        }
    }

    fn diagnostics(&self, path: &Path, diags: &[Diagnostic]) {
        for d in diags {
            self.line(&format!("{}: {}", path.display(), d));
        }
    }

    pub fn flush(&self) {
        let mut guard = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(out) = guard.as_mut() {
            let _ = out.flush();
        }
    }
}

/// `input` itself when it is a file, else every file under it with extension
/// `ext`, in sorted order.
pub fn collect(input: &Path, ext: &str) -> Vec<PathBuf> {
    if input.is_file() {
        return vec![input.to_path_buf()];
    }
    WalkDir::new(input)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .map(|x| x.eq_ignore_ascii_case(ext))
                .unwrap_or(false)
        })
        .collect()
}

/// Where the output for `file` goes: mirrored under `out_root` when given,
/// otherwise next to the input.
pub fn output_path(input_root: &Path, file: &Path, out_root: Option<&Path>, ext: &str) -> PathBuf {
    let target = match out_root {
        Some(root) => {
            let rel = if input_root.is_file() {
                file.file_name().map(PathBuf::from).unwrap_or_default()
            } else {
                file.strip_prefix(input_root)
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|_| file.to_path_buf())
            };
            root.join(rel)
        }
        None => file.to_path_buf(),
    };
    target.with_extension(ext)
}

/// File one result into the shared report. A poisoned lock still records.
fn record(
    report: &Mutex<BatchReport>,
    log: &BatchLog,
    path: &Path,
    result: std::result::Result<Outcome, Located>,
) {
    let mut r = report.lock().unwrap_or_else(PoisonError::into_inner);
    match result {
        Ok(Outcome::Written(out)) => {
            log::info!("{} -> {}", path.display(), out.display());
            r.ok.push(path.to_path_buf());
        }
        Ok(Outcome::Skipped(why)) => {
            log::info!("{}: skipped, {}", path.display(), why);
            r.skipped.push(path.to_path_buf());
        }
        Err(e) => {
            log::error!("{}", e);
            let fe = FileError::from(&e);
            log.line(&format!("FAIL [{}] {}", fe.category, fe.message));
            r.failed.push(fe);
        }
    }
}

/// Run `work` over `files` on `jobs` threads.
pub fn run<F>(files: &[PathBuf], jobs: usize, log: &BatchLog, work: F) -> BatchReport
where
    F: Fn(&Path) -> std::result::Result<Outcome, Located> + Sync,
{
    let start = Instant::now();
    let report = Mutex::new(BatchReport::default());
    let next = AtomicUsize::new(0);

    let worker = || loop {
        let ix = next.fetch_add(1, Ordering::Relaxed);
        let Some(path) = files.get(ix) else {
            break;
        };
        record(&report, log, path, work(path));
    };

    let jobs = jobs.clamp(1, files.len().max(1));
    if jobs == 1 {
        worker();
    } else {
        std::thread::scope(|s| {
            for _ in 0..jobs {
                s.spawn(&worker);
            }
        });
    }

    let mut report = report.into_inner().unwrap_or_else(PoisonError::into_inner);
    report.elapsed = start.elapsed();
    report.sort();
    log.line(&report.summary());
    log.flush();
    report
}

/// A file written through `<target>.tmp` and renamed into place.
///
/// An existing target is moved to `<target>.bak` first and restored if the
/// rename fails. Dropping an uncommitted `OutputFile` removes the temporary.
pub struct OutputFile {
    target: PathBuf,
    tmp: PathBuf,
    committed: bool,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

impl OutputFile {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        let target = target.into();
        let tmp = with_suffix(&target, ".tmp");
        Self {
            target,
            tmp,
            committed: false,
        }
    }

    pub fn backup_path(&self) -> PathBuf {
        with_suffix(&self.target, ".bak")
    }

    pub fn write(mut self, bytes: &[u8]) -> Result<PathBuf> {
        if let Some(dir) = self.target.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(&self.tmp, bytes)?;

        let backup = self.backup_path();
        let had_target = self.target.exists();
        if had_target {
            fs::rename(&self.target, &backup)?;
        }
        if let Err(e) = fs::rename(&self.tmp, &self.target) {
            if had_target {
                if let Err(restore) = fs::rename(&backup, &self.target) {
                    log::error!("{}: backup not restored: {}", self.target.display(), restore);
                }
            }
            return Err(e.into());
        }
        self.committed = true;
        Ok(self.target.clone())
    }
}

impl Drop for OutputFile {
    fn drop(&mut self) {
        if !self.committed && self.tmp.exists() {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}

fn read_located(path: &Path) -> std::result::Result<Vec<u8>, Located> {
    fs::read(path).map_err(|e| Located::new(path, Position::Unknown, e.into()))
}

fn located(path: &Path) -> impl Fn(Ed9Error) -> Located + '_ {
    move |e| Located::new(path, e.position(), e)
}

/// `.dat` to `.txt`. Nothing is written when any function failed to decode.
pub fn disassemble_file(
    d: &Disassembler,
    log: &BatchLog,
    src: &Path,
    dst: &Path,
) -> std::result::Result<Outcome, Located> {
    let bytes = read_located(src)?;
    let name = src
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let out = d.disassemble(&name, &bytes).map_err(located(src))?;
    let diags = out.diagnostics.into_vec();
    log.diagnostics(src, &diags);
    let mut errors = diags.iter().filter(|x| x.severity == Severity::Error);
    if let Some(first) = errors.next() {
        return Err(Located::new(
            src,
            first.at,
            Ed9Error::EmittedInvalid(format!(
                "{} function(s) could not be decoded, first: {}",
                1 + errors.count(),
                first.error
            )),
        ));
    }
    let written = OutputFile::new(dst)
        .write(out.text.as_bytes())
        .map_err(located(dst))?;
    Ok(Outcome::Written(written))
}

const INJECTED_SUFFIX: &str = ".injected.txt";

/// Where `--emit-text` puts the injected program for `dst`.
pub fn injected_text_path(dst: &Path) -> PathBuf {
    dst.with_extension(&INJECTED_SUFFIX[1..])
}

/// Injected programs written by an earlier run; never read as sources.
pub fn is_injected_text(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().ends_with(INJECTED_SUFFIX))
        .unwrap_or(false)
}

/// Builder programs under `input`, leaving out injected copies.
pub fn collect_programs(input: &Path) -> Vec<PathBuf> {
    collect(input, "txt")
        .into_iter()
        .filter(|p| !is_injected_text(p))
        .collect()
}

/// Settings for `.txt` to `.dat`.
pub struct AssembleJob<'a> {
    pub commands: &'a CommandTable,
    pub options: AsmOptions,
    pub map: Option<&'a StringMap>,
    /// Skip programs in which nothing was replaced.
    pub only_translated: bool,
    /// Also write the injected program next to the `.dat`, as
    /// `<stem>.injected.txt`.
    pub emit_text: bool,
}

impl AssembleJob<'_> {
    pub fn run(&self, log: &BatchLog, src: &Path, dst: &Path) -> std::result::Result<Outcome, Located> {
        let text_out = injected_text_path(dst);
        if self.emit_text && text_out == src {
            return Err(Located::new(
                src,
                Position::Unknown,
                Ed9Error::EmittedInvalid(format!(
                    "injected program would overwrite its source {}",
                    text_out.display()
                )),
            ));
        }
        let text = fs::read_to_string(src).map_err(|e| Located::new(src, Position::Unknown, e.into()))?;
        let mut program = Program::parse(&text).map_err(located(src))?;

        if let Some(map) = self.map {
            let replaced = inject(&mut program, map);
            log::debug!("{}: {} strings replaced", src.display(), replaced);
            if replaced == 0 && self.only_translated {
                return Ok(Outcome::Skipped("no translated strings".into()));
            }
        }

        let asm = assemble(&program, src, self.commands, self.options.clone())?;
        log.diagnostics(src, &asm.diagnostics.into_vec());

        if self.emit_text {
            OutputFile::new(&text_out)
                .write(program.render().as_bytes())
                .map_err(located(&text_out))?;
        }
        let written = OutputFile::new(dst).write(&asm.bytes).map_err(located(dst))?;
        Ok(Outcome::Written(written))
    }
}
