use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use ed9_core::batch::{self, AssembleJob, BatchLog, EXIT_CONFIG};
use ed9_core::commands::CommandTable;
use ed9_core::strings::{StringMap, XliffDoc};
use ed9_core::AsmOptions;

#[derive(Parser, Debug)]
#[command(name = "ed9-asm")]
#[command(about = "Assemble ED9 builder programs (.txt) into #scp scripts, optionally injecting translations.")]
struct Cli {
    /// Directory of builder programs, searched recursively.
    #[arg(long)]
    py_dir: PathBuf,

    #[arg(long)]
    out_dir: PathBuf,

    /// Translations to inject.
    #[arg(long)]
    xliff: Option<PathBuf>,

    /// `{source: target}` JSON map to inject; applied over --xliff.
    #[arg(long)]
    map: Option<PathBuf>,

    /// Skip programs in which nothing was replaced.
    #[arg(long)]
    only_translated: bool,

    /// Only use XLIFF targets marked approved.
    #[arg(long)]
    approved_only: bool,

    /// RUNCMD name table (YAML).
    #[arg(long)]
    commands: Option<PathBuf>,

    /// Write unknown RUNCMD names as (0, 0) instead of failing.
    #[arg(long)]
    allow_unknown_commands: bool,

    /// Fail on unresolved labels instead of patching them to the end of code.
    #[arg(long)]
    strict_labels: bool,

    /// Also write the injected program next to each .dat as <stem>.injected.txt.
    #[arg(long)]
    emit_text: bool,

    /// Worker threads.
    #[arg(short, long, default_value_t = 1)]
    jobs: usize,

    /// Batch log; defaults to ed9-asm.log in the output directory.
    #[arg(long)]
    log: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

fn load_map(cli: &Cli) -> Result<Option<StringMap>> {
    let from_xliff = match &cli.xliff {
        Some(path) => {
            let doc = XliffDoc::load(path)
                .with_context(|| format!("loading xliff: {}", path.display()))?;
            Some(StringMap::from_xliff(&doc, cli.approved_only))
        }
        None => None,
    };
    let from_json = match &cli.map {
        Some(path) => Some(
            StringMap::load_json(path)
                .with_context(|| format!("loading string map: {}", path.display()))?,
        ),
        None => None,
    };
    Ok(match (from_xliff, from_json) {
        (Some(a), Some(b)) => Some(a.merged(b)),
        (a, b) => a.or(b),
    })
}

fn run(cli: &Cli) -> Result<ExitCode> {
    if !cli.py_dir.is_dir() {
        bail!("not a directory: {}", cli.py_dir.display());
    }
    if cli.only_translated && cli.xliff.is_none() && cli.map.is_none() {
        bail!("--only-translated needs --xliff or --map");
    }
    let commands = match &cli.commands {
        Some(path) => CommandTable::load(path)
            .with_context(|| format!("loading command table: {}", path.display()))?,
        None => CommandTable::default(),
    };
    let map = load_map(cli)?;
    if let Some(m) = &map {
        log::info!("{} translated string(s) loaded", m.len());
    }

    std::fs::create_dir_all(&cli.out_dir)
        .with_context(|| format!("creating {}", cli.out_dir.display()))?;
    let log_path = cli
        .log
        .clone()
        .unwrap_or_else(|| cli.out_dir.join("ed9-asm.log"));
    let log = BatchLog::open(&log_path)
        .with_context(|| format!("opening log: {}", log_path.display()))?;

    let job = AssembleJob {
        commands: &commands,
        options: AsmOptions {
            strict_labels: cli.strict_labels,
            allow_unknown_commands: cli.allow_unknown_commands,
        },
        map: map.as_ref(),
        only_translated: cli.only_translated,
        emit_text: cli.emit_text,
    };

    let files = batch::collect_programs(&cli.py_dir);
    log::info!("{} program(s) under {}", files.len(), cli.py_dir.display());
    let out_dir: &Path = &cli.out_dir;
    let report = batch::run(&files, cli.jobs, &log, |src| {
        let dst = batch::output_path(&cli.py_dir, src, Some(out_dir), "dat");
        job.run(&log, src, &dst)
    });
    println!("{}", report.summary());
    Ok(ExitCode::from(report.exit_code() as u8))
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(EXIT_CONFIG as u8)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::init_from_env(env_logger::Env::default().default_filter_or(level));

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::from(EXIT_CONFIG as u8)
        }
    }
}
