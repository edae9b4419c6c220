#![forbid(unsafe_code)]

use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;

use ubc_harness::{run_scan_read, run_seq_write, ScanReadConfig, SeqWriteConfig};

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first() else {
        print_usage();
        return Ok(());
    };

    match command.as_str() {
        "seq-write" => seq_write(&args[1..]),
        "scan-read" => scan_read(&args[1..]),
        "--help" | "-h" | "help" => {
            print_usage();
            Ok(())
        }
        other => {
            print_usage();
            bail!("unknown command: {other}")
        }
    }
}

fn seq_write(args: &[String]) -> Result<()> {
    let mut config = SeqWriteConfig::default();
    let mut path = None;
    let mut json = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--iterations" => config.iterations = parse_next(&mut iter, "--iterations")?,
            "--file-size" => config.file_size = parse_next(&mut iter, "--file-size")?,
            "--chunk-size" => config.chunk_size = parse_next(&mut iter, "--chunk-size")?,
            "--use-cache" => config.use_cache = true,
            "--json" => json = true,
            other if path.is_none() && !other.starts_with('-') => {
                path = Some(PathBuf::from(other));
            }
            other => bail!("unexpected argument: {other}"),
        }
    }
    let Some(path) = path else {
        bail!("seq-write requires a target path");
    };

    let report = run_seq_write(&path, &config)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.summary());
    }
    Ok(())
}

fn scan_read(args: &[String]) -> Result<()> {
    let mut config = ScanReadConfig::default();
    let mut path = None;
    let mut json = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--iterations" => config.iterations = parse_next(&mut iter, "--iterations")?,
            "--chunk-size" => config.chunk_size = parse_next(&mut iter, "--chunk-size")?,
            "--use-cache" => config.use_cache = true,
            "--json" => json = true,
            other if path.is_none() && !other.starts_with('-') => {
                path = Some(PathBuf::from(other));
            }
            other => bail!("unexpected argument: {other}"),
        }
    }
    let Some(path) = path else {
        bail!("scan-read requires an input path");
    };

    let report = run_scan_read(&path, &config)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.summary());
    }
    Ok(())
}

fn parse_next<'a, T, I>(iter: &mut I, flag: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    I: Iterator<Item = &'a String>,
{
    let value = iter
        .next()
        .with_context(|| format!("{flag} requires a value"))?;
    value
        .parse()
        .with_context(|| format!("invalid value for {flag}: {value}"))
}

fn print_usage() {
    println!(
        "\
ubc-harness — block cache timing harness

USAGE:
  ubc-harness seq-write <path> [--iterations N] [--file-size BYTES]
                               [--chunk-size BYTES] [--use-cache] [--json]
  ubc-harness scan-read <path> [--iterations N] [--chunk-size BYTES]
                               [--use-cache] [--json]

seq-write creates/truncates <path>, writes --file-size bytes sequentially
in --chunk-size chunks, fsyncs, and closes; scan-read reads an existing
file to EOF in --chunk-size chunks. --use-cache routes the workload
through the block cache instead of direct file I/O."
    );
}
