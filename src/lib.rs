//! # duplexcall - Duplex Consensus Variant Caller
//!
//! Calls variants from duplex sequencing read families. A read family is the set
//! of reads sharing a molecular barcode; its Watson and Crick strands are piled up
//! independently and a variant is reported only when both strands agree on it.

pub mod barcode;
pub mod bed;
pub mod consensus;
pub mod exclude;
pub mod family;
pub mod outlier;
pub mod pileup;
pub mod pipeline;
pub mod prefilter;
pub mod read;
pub mod reference;
pub mod utils;
pub mod vcf;

use serde::{Deserialize, Serialize};

/// Which strand of the original duplex molecule a read sequenced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strand {
    Watson,
    Crick,
}

impl Strand {
    /// Decode the single-character strand tag (`W` or `C`)
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'W' => Some(Strand::Watson),
            b'C' => Some(Strand::Crick),
            _ => None,
        }
    }
}

/// A variant supported by both strands of one read family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantCall {
    pub chrom: String,
    /// 1-based position, VCF style
    pub pos: u32,
    pub ref_allele: String,
    pub alt_allele: String,
    pub total_depth: u32,
    pub watson_depth: u32,
    pub crick_depth: u32,
    pub family_id: String,
}

impl VariantCall {
    /// 0-based half-open span of reference bases this call covers
    pub fn ref_span(&self) -> (u32, u32) {
        let start = self.pos.saturating_sub(1);
        (start, start + self.ref_allele.len().max(1) as u32)
    }
}

/// Optional sink for free-text diagnostic lines about rejected reads and piles.
///
/// Lines from several workers interleave, so the trace is only readable with a
/// single worker.
#[derive(Debug, Clone, Default)]
pub struct DebugTrace {
    sender: Option<crossbeam_channel::Sender<String>>,
}

impl DebugTrace {
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn new(sender: crossbeam_channel::Sender<String>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// Send a line, built only when tracing is on
    pub fn emit<F: FnOnce() -> String>(&self, line: F) {
        if let Some(sender) = &self.sender {
            // writer gone means tracing was shut down, nothing left to do
            let _ = sender.send(line());
        }
    }
}

/// Thresholds applied while preparing reads and calling a family
#[derive(Debug, Clone)]
pub struct CallerConfig {
    pub min_mapq: u8,
    pub min_total_depth: u32,
    pub min_stranded_depth: u32,
    pub end_pad: u32,
    pub min_af: f64,
    pub min_base_quality: u8,
    pub base_qual_penalty: f64,
    pub allow_supplementary: bool,
}

impl Default for CallerConfig {
    fn default() -> Self {
        Self {
            min_mapq: 20,
            min_total_depth: 8,
            min_stranded_depth: 4,
            end_pad: 3,
            min_af: 0.9,
            min_base_quality: 30,
            base_qual_penalty: 0.25,
            allow_supplementary: false,
        }
    }
}

impl CallerConfig {
    pub fn validate(&self) -> DuplexResult<()> {
        if self.min_stranded_depth * 2 > self.min_total_depth {
            return Err(DuplexError::InvalidConfig(format!(
                "twice the minimum stranded depth ({}) must not exceed \
                 the minimum total depth ({})",
                self.min_stranded_depth, self.min_total_depth
            )));
        }

        if !(0.0..=1.0).contains(&self.min_af) {
            return Err(DuplexError::InvalidConfig(
                "minimum allele fraction must be between 0 and 1".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.base_qual_penalty) {
            return Err(DuplexError::InvalidConfig(
                "base quality penalty must be between 0 and 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Error types for the duplexcall library
#[derive(Debug, thiserror::Error)]
pub enum DuplexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTSlib error: {0}")]
    Htslib(#[from] rust_htslib::errors::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid region record: {0}")]
    InvalidRegion(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown contig: {0}")]
    UnknownContig(String),

    #[error("Worker thread panicked: {0}")]
    WorkerPanicked(String),
}

pub type DuplexResult<T> = Result<T, DuplexError>;
