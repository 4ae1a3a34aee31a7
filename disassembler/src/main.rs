use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use ed9_core::batch::{self, BatchLog, EXIT_CONFIG};
use ed9_core::cle::CommandDecrypt;
use ed9_core::commands::CommandTable;
use ed9_core::{DisasmOptions, Disassembler};

#[derive(Parser, Debug)]
#[command(name = "ed9-disasm")]
#[command(about = "Disassemble ED9 #scp scripts (.dat) into builder programs (.txt).")]
struct Cli {
    /// A .dat file or a directory searched recursively.
    #[arg(long = "in")]
    input: PathBuf,

    /// Output directory; defaults to next to each input.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Keep LINE_MARKER instructions instead of blank lines.
    #[arg(long)]
    markers: bool,

    /// Leave out the stack-simulation comments.
    #[arg(long)]
    no_decomp: bool,

    /// RUNCMD name table (YAML).
    #[arg(long)]
    commands: Option<PathBuf>,

    /// External program that decrypts CLE-wrapped files (stdin to stdout).
    #[arg(long)]
    decrypt_cmd: Option<PathBuf>,

    /// Worker threads.
    #[arg(short, long, default_value_t = 1)]
    jobs: usize,

    /// Batch log; defaults to ed9-disasm.log in the input directory.
    #[arg(long)]
    log: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

fn default_log(input: &Path, tool: &str) -> PathBuf {
    let dir = if input.is_dir() {
        input
    } else {
        input.parent().unwrap_or(Path::new("."))
    };
    dir.join(format!("{}.log", tool))
}

fn run(cli: &Cli) -> Result<ExitCode> {
    if !cli.input.exists() {
        bail!("input not found: {}", cli.input.display());
    }
    let commands = match &cli.commands {
        Some(path) => CommandTable::load(path)
            .with_context(|| format!("loading command table: {}", path.display()))?,
        None => CommandTable::default(),
    };

    let mut disassembler = Disassembler::new(DisasmOptions {
        markers: cli.markers,
        decomp: !cli.no_decomp,
    })
    .with_commands(commands);
    if let Some(program) = &cli.decrypt_cmd {
        disassembler = disassembler.with_decrypt(Box::new(CommandDecrypt::new(program)));
    }

    let log_path = cli
        .log
        .clone()
        .unwrap_or_else(|| default_log(&cli.input, "ed9-disasm"));
    let log = BatchLog::open(&log_path)
        .with_context(|| format!("opening log: {}", log_path.display()))?;

    let files = batch::collect(&cli.input, "dat");
    log::info!("{} script(s) under {}", files.len(), cli.input.display());

    let report = batch::run(&files, cli.jobs, &log, |src| {
        let dst = batch::output_path(&cli.input, src, cli.out.as_deref(), "txt");
        batch::disassemble_file(&disassembler, &log, src, &dst)
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
