#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand};
use flashprobe::{
    BlockIndex, BlockSize, CancelToken, Cleanup, DirBlockStore, FpError, GIB, KIB, MIB,
    MismatchPolicy, NoopObserver, RunConfig, RunResult, Verdict, read_header,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Exit status for usage and setup errors (`EX_USAGE`).
const EXIT_USAGE: u8 = 64;

#[derive(Debug, Parser)]
#[command(name = "flashprobe", version)]
#[command(about = "Detect storage that claims more capacity than it retains")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fill the target with blocks, then read them all back.
    Probe {
        #[command(flatten)]
        common: CommonArgs,

        /// Block size, e.g. `100M` (default 100 MiB).
        #[arg(long, value_name = "SIZE", value_parser = parse_block_size)]
        block_size: Option<BlockSize>,

        /// Stop writing once this many bytes are on the volume.
        #[arg(long, value_name = "SIZE", value_parser = parse_size)]
        limit: Option<u64>,

        /// Leave block files in place after the run.
        #[arg(long)]
        keep: bool,
    },
    /// Verify blocks left behind by an earlier `probe --keep`.
    Verify {
        #[command(flatten)]
        common: CommonArgs,

        /// Block size of the stored blocks; read from block 0 when omitted.
        #[arg(long, value_name = "SIZE", value_parser = parse_block_size)]
        block_size: Option<BlockSize>,

        /// Delete the blocks once verified. By default they are kept.
        #[arg(long)]
        clean: bool,
    },
    /// Remove leftover blocks from the target.
    Clean {
        /// Directory on the volume under test.
        target: PathBuf,
    },
}

#[derive(Debug, Args)]
struct CommonArgs {
    /// Directory on the volume under test.
    target: PathBuf,

    /// Keep verifying after the first bad block and report all of them.
    #[arg(long)]
    scan_all: bool,

    /// Print the result as JSON.
    #[arg(long)]
    json: bool,
}

impl CommonArgs {
    fn config(&self, block_size: BlockSize, cleanup: bool) -> RunConfig {
        let policy = if self.scan_all {
            MismatchPolicy::ScanAll
        } else {
            MismatchPolicy::StopAtFirst
        };
        RunConfig::new(&self.target)
            .with_block_size(block_size)
            .with_cleanup(cleanup)
            .with_mismatch_policy(policy)
    }
}

#[derive(Debug, Serialize)]
struct ReportOutput<'a> {
    verdict: Verdict,
    wraparound_detected: bool,
    #[serde(flatten)]
    result: &'a RunResult,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::from(EXIT_USAGE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    init_tracing(cli.verbose);

    match run(cli.command) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(EXIT_USAGE)
        }
    }
}

fn init_tracing(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbosity {
            0 => "warn",
            1 => "info",
            _ => "debug",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(command: Command) -> Result<ExitCode> {
    match command {
        Command::Probe {
            common,
            block_size,
            limit,
            keep,
        } => {
            let config = common
                .config(block_size.unwrap_or(BlockSize::DEFAULT), !keep)
                .with_max_total_bytes(limit);
            let cancel = install_cancel_handler();
            let result = flashprobe::run_probe(config, cancel, &NoopObserver)
                .with_context(|| format!("cannot probe {}", common.target.display()))?;
            report(&common.target, &result, common.json)?;
            Ok(ExitCode::from(exit_status(result.verdict())))
        }
        Command::Verify {
            common,
            block_size,
            clean,
        } => {
            let block_size = match block_size {
                Some(size) => size,
                None => infer_block_size(&common.target)?,
            };
            let config = common.config(block_size, clean);
            let cancel = install_cancel_handler();
            let result = flashprobe::verify_existing(config, cancel, &NoopObserver)
                .with_context(|| format!("cannot verify {}", common.target.display()))?;
            report(&common.target, &result, common.json)?;
            Ok(ExitCode::from(exit_status(result.verdict())))
        }
        Command::Clean { target } => clean(&target),
    }
}

fn install_cancel_handler() -> CancelToken {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    if let Err(err) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        warn!(target: "flashprobe::cli", error = %err, "cannot install Ctrl+C handler");
    }
    CancelToken::from_flag(interrupted)
}

fn infer_block_size(target: &Path) -> Result<BlockSize> {
    let store = DirBlockStore::open_existing(target)
        .with_context(|| format!("no earlier run found in {}", target.display()))?;
    let header = read_header(&store, BlockIndex::ZERO)
        .context("cannot read block 0 to infer the block size")?;
    let Some(header) = header else {
        bail!("block 0 has no valid header; pass --block-size explicitly");
    };
    info!(
        target: "flashprobe::cli",
        block_size = header.block_size,
        "block size inferred from block 0"
    );
    BlockSize::new(header.block_size)
        .map_err(|err| anyhow::anyhow!("block 0 declares an unusable block size: {err}"))
}

fn clean(target: &Path) -> Result<ExitCode> {
    let store = match DirBlockStore::open_existing(target) {
        Ok(store) => store,
        Err(FpError::NotFound(_)) => {
            println!("nothing to clean in {}", target.display());
            return Ok(ExitCode::SUCCESS);
        }
        Err(err) => return Err(err).context("cannot open block directory"),
    };
    let result = Cleanup::new(&store).cleanup_all();
    println!(
        "removed {} block(s), {} already absent",
        result.deleted, result.already_absent
    );
    for warning in &result.warnings {
        eprintln!("warning: {}", warning.detail);
    }
    Ok(if result.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn report(target: &Path, result: &RunResult, json: bool) -> Result<()> {
    if json {
        let output = ReportOutput {
            verdict: result.verdict(),
            wraparound_detected: result.wraparound_detected(),
            result,
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("serialize result")?
        );
        return Ok(());
    }

    println!("flashprobe report for {}", target.display());
    println!("block size:     {}", human_bytes(result.block_size));
    println!(
        "written:        {} ({} blocks)",
        human_bytes(result.bytes_written),
        result.blocks_written
    );
    if let Some(stop) = result.write_stop {
        println!("write stopped:  {stop:?}");
    }
    println!(
        "verified:       {} ({} blocks)",
        human_bytes(result.bytes_verified),
        result.blocks_verified
    );
    if let Some(index) = result.first_corrupted_index {
        println!("first corrupt:  block {index}");
    }
    if let Some(index) = result.first_read_error_index {
        println!("first unread:   block {index}");
    }
    if let Some(abort) = &result.abort {
        println!("aborted at:     block {} ({})", abort.index, abort.cause);
    }
    if result.wraparound_detected() {
        println!("note: earlier blocks hold later blocks' data (capacity wraparound)");
    }
    if let Some(cleanup) = &result.cleanup {
        println!(
            "cleanup:        {} removed, {} warning(s)",
            cleanup.deleted,
            cleanup.warnings.len()
        );
    }
    println!("verdict:        {}", result.verdict());
    Ok(())
}

fn exit_status(verdict: Verdict) -> u8 {
    match verdict {
        Verdict::Genuine => 0,
        Verdict::Corrupted => 1,
        Verdict::Aborted => 2,
        Verdict::Cancelled => 3,
        Verdict::Empty => 4,
    }
}

#[allow(clippy::cast_precision_loss)]
fn human_bytes(bytes: u64) -> String {
    if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Parse a byte count with an optional binary `K`/`M`/`G` suffix.
fn parse_size(raw: &str) -> Result<u64, String> {
    let text = raw.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, suffix) = text.split_at(split);
    if digits.is_empty() {
        return Err(format!("invalid size `{raw}`: expected a number"));
    }
    let value: u64 = digits
        .parse()
        .map_err(|err| format!("invalid size `{raw}`: {err}"))?;
    let multiplier = match suffix.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => KIB,
        "M" | "MB" | "MIB" => MIB,
        "G" | "GB" | "GIB" => GIB,
        _ => return Err(format!("invalid size `{raw}`: unknown suffix `{suffix}`")),
    };
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size `{raw}` is too large"))
}

fn parse_block_size(raw: &str) -> Result<BlockSize, String> {
    let bytes = parse_size(raw)?;
    BlockSize::new(bytes).map_err(|err| format!("invalid block size `{raw}`: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_accept_binary_suffixes() {
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("4K").unwrap(), 4096);
        assert_eq!(parse_size("100M").unwrap(), 100 * MIB);
        assert_eq!(parse_size("2gib").unwrap(), 2 * GIB);
        assert_eq!(parse_size(" 1 G ").unwrap(), GIB);
    }

    #[test]
    fn sizes_reject_garbage() {
        assert!(parse_size("").is_err());
        assert!(parse_size("M").is_err());
        assert!(parse_size("12X").is_err());
        assert!(parse_size("99999999999999999999").is_err());
        assert!(parse_size("18446744073709551615G").is_err());
    }

    #[test]
    fn block_size_is_range_checked() {
        assert_eq!(parse_block_size("1M").unwrap().get(), MIB);
        assert!(parse_block_size("100").is_err());
        assert!(parse_block_size("2G").is_err());
    }

    #[test]
    fn exit_codes_follow_verdict() {
        assert_eq!(exit_status(Verdict::Genuine), 0);
        assert_eq!(exit_status(Verdict::Corrupted), 1);
        assert_eq!(exit_status(Verdict::Cancelled), 3);
        assert_eq!(exit_status(Verdict::Empty), 4);
    }

    #[test]
    fn human_bytes_picks_a_unit() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(3 * MIB), "3.00 MiB");
        assert_eq!(human_bytes(GIB + GIB / 2), "1.50 GiB");
    }

    #[test]
    fn cli_parses_probe_flags() {
        let cli = Cli::try_parse_from([
            "flashprobe",
            "probe",
            "/mnt/stick",
            "--block-size",
            "64M",
            "--limit",
            "1G",
            "--keep",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Command::Probe {
            common,
            block_size,
            limit,
            keep,
        } = cli.command
        else {
            panic!("expected probe");
        };
        assert!(keep);
        assert_eq!(block_size.unwrap().get(), 64 * MIB);
        assert_eq!(limit, Some(GIB));
        assert!(!common.config(BlockSize::DEFAULT, !keep).cleanup);
    }

    #[test]
    fn verify_keeps_blocks_unless_asked_to_clean() {
        let cli = Cli::try_parse_from(["flashprobe", "verify", "/mnt/stick"]).unwrap();
        let Command::Verify { clean, .. } = cli.command else {
            panic!("expected verify");
        };
        assert!(!clean);

        let cli =
            Cli::try_parse_from(["flashprobe", "verify", "/mnt/stick", "--clean"]).unwrap();
        let Command::Verify { clean, .. } = cli.command else {
            panic!("expected verify");
        };
        assert!(clean);
        assert!(Cli::try_parse_from(["flashprobe", "verify", "/mnt/stick", "--keep"]).is_err());
    }
}
