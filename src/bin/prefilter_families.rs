//! Standalone region prefilter: writes <regions>.analysis.bed without calling variants

use anyhow::{Context, Result};
use clap::Parser;
use duplexcall_rs::prefilter::{prefilter_bed_file, PrefilterConfig};
use env_logger::Env;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "prefilter_families")]
#[command(about = "Drop crowded, shallow and excluded read families from a family BED")]
struct Args {
    /// BED of read family regions (family ID in column 4, Watson/Crick counts in 7 and 8)
    #[arg(short = 'b', long, value_name = "FILE")]
    regions: PathBuf,

    /// BED of regions to exclude; may be given more than once
    #[arg(short, long, value_name = "FILE")]
    exclude: Vec<PathBuf>,

    /// Minimum combined Watson and Crick read count
    #[arg(short = 'a', long, default_value_t = 8)]
    min_total_depth: u32,

    /// Minimum read count on each strand
    #[arg(short = 's', long, default_value_t = 4)]
    min_stranded_depth: u32,

    /// Drop clusters of more overlapping families than this; negative for no limit
    #[arg(long, default_value_t = 20, allow_hyphen_values = true)]
    max_overlapping_families: i64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn config(&self) -> PrefilterConfig {
        PrefilterConfig {
            max_overlapping_families: usize::try_from(self.max_overlapping_families).ok(),
            min_total_depth: self.min_total_depth,
            min_stranded_depth: self.min_stranded_depth,
        }
    }
}

fn run(args: &Args) -> Result<PathBuf> {
    if !args.regions.exists() {
        anyhow::bail!("regions BED not found: {}", args.regions.display());
    }

    let (out_path, _) = prefilter_bed_file(&args.regions, &args.exclude, &args.config())
        .with_context(|| format!("failed to prefilter {}", args.regions.display()))?;
    Ok(out_path)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();

    let out_path = run(&args)?;
    println!("{}", out_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_negative_limit_disables_crowding_check() {
        let args = Args::parse_from([
            "prefilter_families",
            "-b",
            "families.bed",
            "--max-overlapping-families",
            "-1",
        ]);
        assert_eq!(args.config().max_overlapping_families, None);
        assert_eq!(args.config().min_total_depth, 8);
    }

    #[test]
    fn test_run_writes_analysis_bed() {
        let dir = tempdir().unwrap();
        let bed = dir.path().join("families.bed.gz");
        let plain = dir.path().join("families.bed");
        std::fs::write(
            &plain,
            "chr1\t100\t200\tfam1\t0\t+\t5\t5\nchr1\t300\t400\tfam2\t0\t+\t2\t2\n",
        )
        .unwrap();

        let args = Args::parse_from([
            "prefilter_families",
            "-b",
            plain.to_str().unwrap(),
        ]);
        let out = run(&args).unwrap();
        assert_eq!(out, dir.path().join("families.analysis.bed"));
        assert_eq!(
            std::fs::read_to_string(out).unwrap(),
            "chr1\t100\t200\tfam1\t0\t+\t5\t5\n"
        );

        let missing = Args::parse_from(["prefilter_families", "-b", bed.to_str().unwrap()]);
        let err = run(&missing).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
