//! Per-position strand pileups built from prepared reads

use crate::read::PreparedRead;
use rust_htslib::bam::record::Cigar;
use std::collections::BTreeMap;

/// Index of the deletion-spanning gap count in [`Pile`] base arrays
pub const GAP: usize = 4;
/// Index of the ambiguous (masked) base count in [`Pile`] base arrays
pub const AMBIGUOUS: usize = 5;
/// Nucleotides in count order
pub const NUCLEOTIDES: [u8; 4] = [b'A', b'C', b'G', b'T'];

/// Map a sequence byte to its count slot
pub fn base_index(base: u8) -> usize {
    match base.to_ascii_uppercase() {
        b'A' => 0,
        b'C' => 1,
        b'G' => 2,
        b'T' => 3,
        _ => AMBIGUOUS,
    }
}

/// Observations split by read orientation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StrandCounts {
    pub forward: u32,
    pub reverse: u32,
}

impl StrandCounts {
    pub fn add(&mut self, is_reverse: bool) {
        if is_reverse {
            self.reverse += 1;
        } else {
            self.forward += 1;
        }
    }

    pub fn total(&self) -> u32 {
        self.forward + self.reverse
    }
}

/// All read evidence at one reference position for one strand of a family
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pile {
    /// 1-based reference position
    pub pos: u32,
    /// Counts for A, C, G, T, gap and ambiguous bases
    pub bases: [StrandCounts; 6],
    /// Deletion length starting at this position
    pub deletions: BTreeMap<u32, StrandCounts>,
    /// Inserted sequence following this position
    pub insertions: BTreeMap<String, StrandCounts>,
}

impl Pile {
    pub fn new(pos: u32) -> Self {
        Self {
            pos,
            ..Default::default()
        }
    }

    pub fn base_count(&self, idx: usize) -> u32 {
        self.bases[idx].total()
    }

    pub fn ambiguous_count(&self) -> u32 {
        self.base_count(AMBIGUOUS)
    }

    pub fn deletion_count(&self, len: u32) -> u32 {
        self.deletions.get(&len).map(StrandCounts::total).unwrap_or(0)
    }

    pub fn insertion_count(&self, seq: &str) -> u32 {
        self.insertions.get(seq).map(StrandCounts::total).unwrap_or(0)
    }

    /// Every observation at this position, masked bases included
    pub fn total_observations(&self) -> u32 {
        self.bases.iter().map(StrandCounts::total).sum()
    }

    /// Depth used for allele fractions.
    ///
    /// Masked bases count for `round(n * base_qual_penalty)` reads rather than
    /// being dropped, so they always weigh against the alternate allele.
    pub fn depth(&self, base_qual_penalty: f64) -> u32 {
        let unambiguous: u32 = self.bases[..AMBIGUOUS].iter().map(StrandCounts::total).sum();
        let penalty = (self.ambiguous_count() as f64 * base_qual_penalty).round() as u32;
        unambiguous + penalty
    }
}

/// Build the ordered piles covered by a strand's reads.
///
/// Terminal insertions are folded into soft clips before piling. Insertions are
/// recorded on the last aligned base before them, deletions on their first
/// deleted base.
pub fn build_piles(reads: &mut [PreparedRead]) -> Vec<Pile> {
    let mut piles: BTreeMap<u32, Pile> = BTreeMap::new();

    for read in reads.iter_mut() {
        read.soft_clip_terminal_insertions();
        add_read(&mut piles, read);
    }

    piles.into_values().collect()
}

fn add_read(piles: &mut BTreeMap<u32, Pile>, read: &PreparedRead) {
    let mut ref_pos = read.pos;
    let mut query_pos = 0usize;

    for op in &read.cigar {
        match *op {
            Cigar::SoftClip(n) => query_pos += n as usize,
            Cigar::Match(n) => {
                for k in 0..n as usize {
                    let Some(&base) = read.bases.get(query_pos + k) else {
                        break;
                    };
                    if let Some(pile) = pile_at(piles, ref_pos + k as i64) {
                        pile.bases[base_index(base)].add(read.is_reverse);
                    }
                }
                ref_pos += n as i64;
                query_pos += n as usize;
            }
            Cigar::Ins(n) => {
                let end = (query_pos + n as usize).min(read.bases.len());
                if ref_pos > read.pos {
                    let seq = String::from_utf8_lossy(&read.bases[query_pos.min(end)..end])
                        .to_ascii_uppercase();
                    if let Some(pile) = pile_at(piles, ref_pos - 1) {
                        pile.insertions.entry(seq).or_default().add(read.is_reverse);
                    }
                }
                query_pos += n as usize;
            }
            Cigar::Del(n) => {
                if let Some(pile) = pile_at(piles, ref_pos) {
                    pile.deletions.entry(n).or_default().add(read.is_reverse);
                }
                for k in 0..n as i64 {
                    if let Some(pile) = pile_at(piles, ref_pos + k) {
                        pile.bases[GAP].add(read.is_reverse);
                    }
                }
                ref_pos += n as i64;
            }
            _ => {}
        }
    }
}

/// Pile for a 0-based reference position, created on first touch
fn pile_at(piles: &mut BTreeMap<u32, Pile>, ref0: i64) -> Option<&mut Pile> {
    let pos = u32::try_from(ref0 + 1).ok()?;
    Some(piles.entry(pos).or_insert_with(|| Pile::new(pos)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read::tests::prepared;

    #[test]
    fn test_base_index() {
        assert_eq!(base_index(b'A'), 0);
        assert_eq!(base_index(b't'), 3);
        assert_eq!(base_index(b'N'), AMBIGUOUS);
    }

    #[test]
    fn test_matches_pile_by_position() {
        let mut reads = vec![
            prepared(99, vec![Cigar::Match(3)], b"ACG"),
            prepared(100, vec![Cigar::Match(3)], b"CGT"),
        ];
        reads[1].is_reverse = true;

        let piles = build_piles(&mut reads);
        let positions: Vec<u32> = piles.iter().map(|p| p.pos).collect();
        assert_eq!(positions, vec![100, 101, 102, 103]);

        // position 101 is C on both reads, one forward and one reverse
        assert_eq!(piles[1].bases[1], StrandCounts { forward: 1, reverse: 1 });
        assert_eq!(piles[3].bases[3].reverse, 1);
    }

    #[test]
    fn test_insertion_anchored_on_preceding_base() {
        let mut reads = vec![prepared(
            99,
            vec![Cigar::Match(2), Cigar::Ins(2), Cigar::Match(2)],
            b"ACttGT",
        )];
        let piles = build_piles(&mut reads);

        assert_eq!(piles.len(), 4);
        assert_eq!(piles[1].pos, 101);
        assert_eq!(piles[1].insertion_count("TT"), 1);
        assert!(piles[2].insertions.is_empty());
        assert_eq!(piles[2].base_count(2), 1);
    }

    #[test]
    fn test_deletion_recorded_on_first_deleted_base() {
        let mut reads = vec![prepared(
            99,
            vec![Cigar::Match(2), Cigar::Del(2), Cigar::Match(2)],
            b"ACGT",
        )];
        let piles = build_piles(&mut reads);

        let positions: Vec<u32> = piles.iter().map(|p| p.pos).collect();
        assert_eq!(positions, vec![100, 101, 102, 103, 104, 105]);
        assert_eq!(piles[2].deletion_count(2), 1);
        assert!(piles[3].deletions.is_empty());
        assert_eq!(piles[2].base_count(GAP), 1);
        assert_eq!(piles[3].base_count(GAP), 1);
    }

    #[test]
    fn test_terminal_insertion_is_not_piled() {
        let mut reads = vec![prepared(
            99,
            vec![Cigar::Match(3), Cigar::Ins(2)],
            b"ACGTT",
        )];
        let piles = build_piles(&mut reads);

        assert!(piles.iter().all(|p| p.insertions.is_empty()));
        assert_eq!(reads[0].cigar, vec![Cigar::Match(3), Cigar::SoftClip(2)]);
    }

    #[test]
    fn test_soft_clip_skips_query_bases() {
        let mut reads = vec![prepared(
            99,
            vec![Cigar::SoftClip(2), Cigar::Match(2)],
            b"TTGC",
        )];
        let piles = build_piles(&mut reads);
        assert_eq!(piles[0].base_count(2), 1);
        assert_eq!(piles[1].base_count(1), 1);
    }

    #[test]
    fn test_depth_penalty() {
        let mut pile = Pile::new(10);
        pile.bases[0].forward = 8;
        pile.bases[AMBIGUOUS].forward = 3;

        assert_eq!(pile.depth(0.0), 8);
        assert_eq!(pile.depth(0.25), 9);
        assert_eq!(pile.depth(1.0), 11);
        assert_eq!(pile.total_observations(), 11);
    }

    #[test]
    fn test_depth_counts_gaps() {
        let mut pile = Pile::new(10);
        pile.bases[0].forward = 2;
        pile.bases[GAP].reverse = 6;
        pile.bases[AMBIGUOUS].reverse = 2;

        assert_eq!(pile.depth(0.25), 9);
    }
}
