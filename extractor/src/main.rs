use anyhow::{bail, Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use ed9_core::batch::{EXIT_CONFIG, EXIT_FAILURES};
use ed9_core::strings::{extract_dir, string_map_json, ExtractFilter, XliffDoc};

#[derive(Parser, Debug)]
#[command(name = "ed9-extract")]
#[command(about = "Collect PUSHSTRING literals of ED9 builder programs into XLIFF 1.2 and a JSON map.")]
struct Cli {
    /// Directory of builder programs, searched recursively.
    #[arg(long)]
    py_dir: PathBuf,

    #[arg(long)]
    xliff: PathBuf,

    /// Companion `{source: target_or_source}` JSON map.
    #[arg(long)]
    map: PathBuf,

    /// Shortest literal kept, in chars.
    #[arg(long, default_value_t = 1)]
    min_len: usize,

    /// Keep every literal, including identifier-like ones.
    #[arg(long)]
    no_heuristics: bool,

    /// Existing XLIFF whose targets and approvals are carried over.
    #[arg(long)]
    merge: Option<PathBuf>,

    #[arg(long, default_value = "ja")]
    source_lang: String,

    #[arg(long, default_value = "en")]
    target_lang: String,

    #[arg(short, long)]
    verbose: bool,
}

fn run(cli: &Cli) -> Result<ExitCode> {
    if !cli.py_dir.is_dir() {
        bail!("not a directory: {}", cli.py_dir.display());
    }
    let previous = match &cli.merge {
        Some(path) => Some(
            XliffDoc::load(path).with_context(|| format!("loading xliff: {}", path.display()))?,
        ),
        None => None,
    };

    let filter = ExtractFilter {
        min_len: cli.min_len,
        heuristics: !cli.no_heuristics,
    };
    let (extraction, failed) = extract_dir(&cli.py_dir, filter)?;

    let template = XliffDoc {
        source_language: cli.source_lang.clone(),
        target_language: cli.target_lang.clone(),
        ..XliffDoc::default()
    };
    let doc = extraction.to_document(&template, previous.as_ref());
    doc.save(&cli.xliff)
        .with_context(|| format!("writing xliff: {}", cli.xliff.display()))?;
    fs::write(&cli.map, string_map_json(&doc)?)
        .with_context(|| format!("writing map: {}", cli.map.display()))?;

    println!(
        "{} unique strings, {} file(s) failed",
        doc.units.len(),
        failed.len()
    );
    Ok(if failed.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_FAILURES as u8)
    })
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
