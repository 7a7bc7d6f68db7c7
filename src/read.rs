//! Per-read preparation: filtering, end clipping and base quality masking

use crate::{barcode, CallerConfig, Strand};
use rust_htslib::bam::record::{Cigar, Record};

/// Symbol written over bases that fail the base quality threshold
pub const MASKED_BASE: u8 = b'N';

/// Why a raw alignment did not become a prepared read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadRejection {
    Unmapped,
    LowMappingQuality,
    MissingBarcode,
    ForeignFamily,
    SupplementaryAlignment,
    FullyClipped,
}

/// An aligned read after clipping and masking, ready to be piled up
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRead {
    /// 0-based leftmost aligned reference position
    pub pos: i64,
    pub cigar: Vec<Cigar>,
    pub bases: Vec<u8>,
    pub qualities: Vec<u8>,
    pub mapq: u8,
    pub is_reverse: bool,
    pub strand: Strand,
    pub family_id: String,
}

impl PreparedRead {
    /// Build a prepared read from a raw alignment belonging to `family`.
    ///
    /// Reads are screened in order: unmapped, mapping quality, barcode, family
    /// membership, then supplementary alignments. Survivors are clipped by
    /// `end_pad` on both ends and masked below `min_base_quality`.
    pub fn from_record(
        record: &Record,
        family: &str,
        config: &CallerConfig,
    ) -> Result<Self, ReadRejection> {
        if record.is_unmapped() || record.cigar_len() == 0 {
            return Err(ReadRejection::Unmapped);
        }
        if record.mapq() < config.min_mapq {
            return Err(ReadRejection::LowMappingQuality);
        }

        let (family_id, strand) =
            barcode::family_and_strand(record).ok_or(ReadRejection::MissingBarcode)?;
        if family_id != family {
            return Err(ReadRejection::ForeignFamily);
        }
        if !config.allow_supplementary && barcode::has_supplementary_alignment(record) {
            return Err(ReadRejection::SupplementaryAlignment);
        }

        let cigar = record
            .cigar()
            .iter()
            .filter_map(|op| match *op {
                Cigar::Equal(n) | Cigar::Diff(n) => Some(Cigar::Match(n)),
                Cigar::RefSkip(n) => Some(Cigar::Del(n)),
                Cigar::HardClip(_) | Cigar::Pad(_) => None,
                other => Some(other),
            })
            .collect();

        let mut read = PreparedRead {
            pos: record.pos(),
            cigar,
            bases: record.seq().as_bytes(),
            qualities: record.qual().to_vec(),
            mapq: record.mapq(),
            is_reverse: record.is_reverse(),
            strand,
            family_id,
        };

        read.clip_ends(config.end_pad);
        if read.is_fully_clipped() {
            return Err(ReadRejection::FullyClipped);
        }
        read.mask_low_quality_bases(config.min_base_quality);

        Ok(read)
    }

    /// Number of query bases described by the CIGAR
    pub fn query_len(&self) -> u32 {
        self.cigar
            .iter()
            .filter(|op| matches!(op, Cigar::Match(_) | Cigar::Ins(_) | Cigar::SoftClip(_)))
            .map(|op| op.len())
            .sum()
    }

    /// Number of reference bases spanned by the alignment
    pub fn ref_len(&self) -> u32 {
        self.cigar
            .iter()
            .filter(|op| matches!(op, Cigar::Match(_) | Cigar::Del(_)))
            .map(|op| op.len())
            .sum()
    }

    /// 0-based exclusive reference end
    pub fn ref_end(&self) -> i64 {
        self.pos + self.ref_len() as i64
    }

    /// True when nothing but soft clip is left of the alignment
    pub fn is_fully_clipped(&self) -> bool {
        self.cigar.iter().all(|op| matches!(op, Cigar::SoftClip(_)))
    }

    /// Soft clip `clip_len` query bases from both ends of the read.
    ///
    /// Deletions reached while clipping are dropped without using the clip budget;
    /// on the leading end they shift `pos` downstream like clipped matches do.
    pub fn clip_ends(&mut self, clip_len: u32) {
        if self.cigar.is_empty() || self.is_fully_clipped() || clip_len == 0 {
            return;
        }

        self.clip_front(clip_len);
        self.clip_back(clip_len);
        self.normalize_cigar();
    }

    fn clip_front(&mut self, clip_len: u32) {
        if !matches!(self.cigar[0], Cigar::SoftClip(_)) {
            self.cigar.insert(0, Cigar::SoftClip(0));
        }

        let mut remaining = clip_len;
        for i in 1..self.cigar.len() {
            let op = self.cigar[i];
            match op {
                Cigar::SoftClip(_) => break,
                Cigar::Del(n) => {
                    self.pos += n as i64;
                    self.cigar[i] = Cigar::Del(0);
                }
                op if remaining == 0 => {
                    if op.len() > 0 {
                        break;
                    }
                }
                Cigar::Match(n) => {
                    let take = n.min(remaining);
                    self.cigar[i] = Cigar::Match(n - take);
                    self.grow_soft_clip(0, take);
                    self.pos += take as i64;
                    remaining -= take;
                    if n > take {
                        break;
                    }
                }
                Cigar::Ins(n) => {
                    let take = n.min(remaining);
                    self.cigar[i] = Cigar::Ins(n - take);
                    self.grow_soft_clip(0, take);
                    remaining -= take;
                    if n > take {
                        break;
                    }
                }
                _ => {}
            }
        }
    }

    fn clip_back(&mut self, clip_len: u32) {
        if !matches!(self.cigar.last(), Some(Cigar::SoftClip(_))) {
            self.cigar.push(Cigar::SoftClip(0));
        }

        let last = self.cigar.len() - 1;
        let mut remaining = clip_len;
        for i in (0..last).rev() {
            let op = self.cigar[i];
            match op {
                Cigar::SoftClip(_) => break,
                Cigar::Del(_) => self.cigar[i] = Cigar::Del(0),
                op if remaining == 0 => {
                    if op.len() > 0 {
                        break;
                    }
                }
                Cigar::Match(n) => {
                    let take = n.min(remaining);
                    self.cigar[i] = Cigar::Match(n - take);
                    self.grow_soft_clip(last, take);
                    remaining -= take;
                    if n > take {
                        break;
                    }
                }
                Cigar::Ins(n) => {
                    let take = n.min(remaining);
                    self.cigar[i] = Cigar::Ins(n - take);
                    self.grow_soft_clip(last, take);
                    remaining -= take;
                    if n > take {
                        break;
                    }
                }
                _ => {}
            }
        }
    }

    fn grow_soft_clip(&mut self, idx: usize, by: u32) {
        if let Cigar::SoftClip(n) = self.cigar[idx] {
            self.cigar[idx] = Cigar::SoftClip(n + by);
        }
    }

    /// Drop zero-length operations and merge neighbouring soft clips
    pub fn normalize_cigar(&mut self) {
        let mut merged: Vec<Cigar> = Vec::with_capacity(self.cigar.len());
        for op in self.cigar.drain(..) {
            if op.len() == 0 {
                continue;
            }
            if let (Some(Cigar::SoftClip(prev)), Cigar::SoftClip(n)) = (merged.last_mut(), op) {
                *prev += n;
                continue;
            }
            merged.push(op);
        }
        self.cigar = merged;
    }

    /// Replace every base below `min_quality` with [`MASKED_BASE`]
    pub fn mask_low_quality_bases(&mut self, min_quality: u8) {
        for (base, qual) in self.bases.iter_mut().zip(self.qualities.iter()) {
            if *qual < min_quality {
                *base = MASKED_BASE;
            }
        }
    }

    /// Fold insertions at either end of the alignment into the edge soft clip.
    ///
    /// An insertion touching the physical end of a read, directly or through an
    /// existing soft clip, is an aligner artifact rather than evidence.
    pub fn soft_clip_terminal_insertions(&mut self) {
        let leading = self
            .cigar
            .iter()
            .take_while(|op| matches!(op, Cigar::SoftClip(_) | Cigar::Ins(_)))
            .count();
        if self.cigar[..leading].iter().any(|op| matches!(op, Cigar::Ins(_))) {
            let clip: u32 = self.cigar[..leading].iter().map(|op| op.len()).sum();
            self.cigar.drain(0..leading);
            self.cigar.insert(0, Cigar::SoftClip(clip));
        }

        let trailing = self
            .cigar
            .iter()
            .rev()
            .take_while(|op| matches!(op, Cigar::SoftClip(_) | Cigar::Ins(_)))
            .count();
        let tail = self.cigar.len() - trailing;
        if self.cigar[tail..].iter().any(|op| matches!(op, Cigar::Ins(_))) {
            let clip: u32 = self.cigar[tail..].iter().map(|op| op.len()).sum();
            self.cigar.truncate(tail);
            self.cigar.push(Cigar::SoftClip(clip));
        }
    }
}
