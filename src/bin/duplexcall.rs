//! Duplex consensus variant caller: read families in, strand-concordant calls out

use clap::Parser;
use duplexcall_rs::{
    pipeline::{call_variants, CallInputs, PipelineConfig},
    prefilter::PrefilterConfig,
    CallerConfig, DuplexError, DuplexResult,
};
use env_logger::Env;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "duplexcall")]
#[command(about = "Call variants supported by both strands of duplex read families")]
#[command(long_about = "
duplexcall calls variants from duplex sequencing data. Each read family, a set of
reads sharing a molecular barcode, is described by one line of the regions BED
(name = family ID, columns 7 and 8 = Watson and Crick read counts). Reads carry
the family ID in the RF tag and the strand (W or C) in the RS tag.

For every family the Watson and Crick reads are clipped, quality masked and piled
up separately. A variant is reported only when both strands agree on its type and
allele with enough depth and allele fraction.

The regions BED is prefiltered first; families that pass are written next to it
as <name>.analysis.bed. The BAM index (.bai) and FASTA index (.fai) must be present.
")]
struct Args {
    /// Input BAM file, indexed
    #[arg(short, long, value_name = "FILE")]
    input_bam: PathBuf,

    /// Reference FASTA file, indexed
    #[arg(short, long, value_name = "FILE")]
    reference: PathBuf,

    /// BED of read family regions
    #[arg(short = 'b', long, value_name = "FILE")]
    regions: PathBuf,

    /// Output VCF (.gz for gzip, - for stdout)
    #[arg(short, long, value_name = "FILE", default_value = "-")]
    output: PathBuf,

    /// BED of regions to exclude; may be given more than once
    #[arg(short, long, value_name = "FILE")]
    exclude: Vec<PathBuf>,

    /// Minimum mapping quality of a read
    #[arg(long, default_value_t = 20)]
    min_mapq: u8,

    /// Minimum combined Watson and Crick allele depth
    #[arg(short = 'a', long, default_value_t = 8)]
    min_total_depth: u32,

    /// Minimum allele depth on each strand
    #[arg(short = 's', long, default_value_t = 4)]
    min_stranded_depth: u32,

    /// Bases clipped from both ends of every read
    #[arg(long, default_value_t = 3)]
    end_pad: u32,

    /// Minimum allele fraction on each strand
    #[arg(long, default_value_t = 0.9)]
    min_af: f64,

    /// Bases below this quality are masked to N
    #[arg(long, default_value_t = 30)]
    min_base_quality: u8,

    /// Weight of masked bases in strand depth
    #[arg(long, default_value_t = 0.25)]
    base_qual_penalty: f64,

    /// Keep reads with supplementary alignments (SA tag)
    #[arg(long)]
    allow_supplementary: bool,

    /// Drop clusters of more overlapping families than this; negative for no limit
    #[arg(long, default_value_t = 20, allow_hyphen_values = true)]
    max_overlapping_families: i64,

    /// Number of worker threads
    #[arg(short, long, default_value_t = 1)]
    threads: usize,

    /// Write per-family diagnostic lines to this file (readable with one thread)
    #[arg(long, value_name = "FILE")]
    debug_log: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging, including throughput
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn caller_config(&self) -> CallerConfig {
        CallerConfig {
            min_mapq: self.min_mapq,
            min_total_depth: self.min_total_depth,
            min_stranded_depth: self.min_stranded_depth,
            end_pad: self.end_pad,
            min_af: self.min_af,
            min_base_quality: self.min_base_quality,
            base_qual_penalty: self.base_qual_penalty,
            allow_supplementary: self.allow_supplementary,
        }
    }

    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            threads: self.threads,
            debug_log: self.debug_log.clone(),
            ..PipelineConfig::default()
        }
    }

    fn inputs(&self) -> CallInputs {
        CallInputs {
            bam: self.input_bam.clone(),
            reference: self.reference.clone(),
            regions: self.regions.clone(),
            exclude: self.exclude.clone(),
            output: self.output.clone(),
        }
    }
}

fn run() -> DuplexResult<()> {
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

    log::info!("Input BAM: {:?}", args.input_bam);
    log::info!("Reference: {:?}", args.reference);
    log::info!("Regions: {:?}", args.regions);
    log::info!("Output VCF: {:?}", args.output);
    log::info!("Threads: {}", args.threads);

    if args.exclude.is_empty() {
        log::warn!(
            "No exclusion BED given (-e); calls in problematic regions will not be filtered"
        );
    }

    let caller = args.caller_config();
    let prefilter = PrefilterConfig::from_caller(&caller, args.max_overlapping_families);
    log::info!(
        "Thresholds: mapq>={}, depth>={} total/{} per strand, af>={}, baseq>={}, end pad {}",
        caller.min_mapq,
        caller.min_total_depth,
        caller.min_stranded_depth,
        caller.min_af,
        caller.min_base_quality,
        caller.end_pad
    );

    let stats = call_variants(&args.inputs(), &caller, &prefilter, &args.pipeline_config())?;

    log::info!(
        "Successfully completed: {} read families, {} variants written",
        stats.families,
        stats.written
    );
    Ok(())
}

/// Handle application errors and provide user-friendly messages
fn handle_error(error: DuplexError) -> ! {
    match error {
        DuplexError::FileNotFound(path) => {
            eprintln!("Error: File not found: {}", path);
            eprintln!("Please check that the file exists and is readable.");
            eprintln!("The BAM needs a .bai index and the FASTA a .fai index next to them.");
        }
        DuplexError::InvalidRegion(msg) => {
            eprintln!("Error: Invalid region: {}", msg);
            eprintln!("Regions must be tab separated BED with the family ID in column 4");
            eprintln!("and Watson/Crick read counts in columns 7 and 8.");
        }
        DuplexError::InvalidConfig(msg) => {
            eprintln!("Error: Invalid configuration: {}", msg);
        }
        DuplexError::UnknownContig(chrom) => {
            eprintln!("Error: Contig {} is missing from the BAM header or reference", chrom);
            eprintln!("Please check that the BAM, FASTA and regions use the same reference.");
        }
        DuplexError::WorkerPanicked(msg) => {
            eprintln!("Error: {}", msg);
            eprintln!("This is unexpected. Please report this issue.");
        }
        DuplexError::Htslib(ref e) => {
            eprintln!("Error: BAM/FASTA processing error: {}", e);
            eprintln!("Please check that your BAM and FASTA files are valid and indexed.");
        }
        DuplexError::Io(ref e) => {
            eprintln!("Error: I/O error: {}", e);
            eprintln!("Please check file permissions and disk space.");
        }
        DuplexError::Csv(ref e) => {
            eprintln!("Error: Could not parse BED input: {}", e);
        }
    }
    std::process::exit(1);
}

fn main() {
    if let Err(e) = run() {
        handle_error(e);
    }
}
