//! Per-family calling: fetch reads, prepare them, pile each strand and call

use crate::bed::ReadFamilyRegion;
use crate::consensus::piles_to_calls;
use crate::outlier::remove_positional_outliers;
use crate::pileup::build_piles;
use crate::read::PreparedRead;
use crate::reference::{FaidxReference, ReferenceSource};
use crate::utils::find_bam_index;
use crate::{CallerConfig, DebugTrace, DuplexError, DuplexResult, Strand, VariantCall};
use rust_htslib::bam::{IndexedReader, Read, Record};
use std::path::Path;

/// Indexed BAM access by read family region
pub struct FamilyReader {
    bam_reader: IndexedReader,
}

impl FamilyReader {
    pub fn from_path<P: AsRef<Path>>(bam_path: P) -> DuplexResult<Self> {
        let bam_path = bam_path.as_ref();
        let index = find_bam_index(bam_path)?;
        let bam_reader = IndexedReader::from_path_and_index(bam_path, &index)?;
        Ok(Self { bam_reader })
    }

    /// All alignments overlapping the region, whatever family they belong to
    pub fn fetch(&mut self, region: &ReadFamilyRegion) -> DuplexResult<Vec<Record>> {
        let tid = self
            .bam_reader
            .header()
            .tid(region.chrom.as_bytes())
            .ok_or_else(|| DuplexError::UnknownContig(region.chrom.clone()))?;

        self.bam_reader.fetch((tid, region.start, region.end))?;

        let mut records = Vec::new();
        for record in self.bam_reader.records() {
            records.push(record?);
        }
        Ok(records)
    }
}

/// Call one read family from its overlapping alignments.
///
/// Rejected reads and piles are reported on the trace only; a family with too
/// few reads on either strand yields no calls.
pub fn call_family(
    region: &ReadFamilyRegion,
    records: &[Record],
    reference: &dyn ReferenceSource,
    config: &CallerConfig,
    trace: &DebugTrace,
) -> DuplexResult<Vec<VariantCall>> {
    let mut watson = Vec::new();
    let mut crick = Vec::new();

    for record in records {
        match PreparedRead::from_record(record, &region.family_id, config) {
            Ok(read) => match read.strand {
                Strand::Watson => watson.push(read),
                Strand::Crick => crick.push(read),
            },
            Err(reason) => trace.emit(|| {
                format!(
                    "{}: read {} rejected ({:?})",
                    region.family_id,
                    String::from_utf8_lossy(record.qname()),
                    reason
                )
            }),
        }
    }

    let min_reads = config.min_stranded_depth as usize;
    if watson.len() < min_reads || crick.len() < min_reads {
        trace.emit(|| {
            format!(
                "{}: not enough reads (watson {}, crick {})",
                region.family_id,
                watson.len(),
                crick.len()
            )
        });
        return Ok(Vec::new());
    }

    watson.sort_by_key(|read| read.pos);
    crick.sort_by_key(|read| read.pos);

    let watson_piles = build_piles(&mut watson);
    let crick_piles = build_piles(&mut crick);
    let (watson_piles, crick_piles) =
        remove_positional_outliers(watson_piles, crick_piles, &watson, &crick);

    piles_to_calls(
        &watson_piles,
        &crick_piles,
        &region.chrom,
        &region.family_id,
        reference,
        config,
        trace,
    )
}

/// Private alignment and reference handles for one worker
pub struct FamilyCaller {
    reader: FamilyReader,
    reference: Box<dyn ReferenceSource>,
    config: CallerConfig,
    trace: DebugTrace,
}

impl FamilyCaller {
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(
        bam_path: P,
        reference_path: Q,
        config: CallerConfig,
        trace: DebugTrace,
    ) -> DuplexResult<Self> {
        Ok(Self {
            reader: FamilyReader::from_path(bam_path)?,
            reference: Box::new(FaidxReference::from_path(reference_path)?),
            config,
            trace,
        })
    }

    pub fn call(&mut self, region: &ReadFamilyRegion) -> DuplexResult<Vec<VariantCall>> {
        let records = self.reader.fetch(region)?;
        call_family(
            region,
            &records,
            self.reference.as_ref(),
            &self.config,
            &self.trace,
        )
    }
}
