//! Positional outlier filtering of pileup columns
//!
//! A read family should share one start and one end per read orientation. Columns
//! outside the consensus footprint are mostly fed by misaligned read ends and are
//! dropped before the strands are compared.

use crate::pileup::Pile;
use crate::read::PreparedRead;
use std::collections::BTreeMap;

/// Open interval `(start, end)` around the consensus footprint of one orientation.
///
/// `start` is the 0-based alignment start and `end` the 0-based exclusive
/// alignment end, while pile positions are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsensusWindow {
    pub start: i64,
    pub end: i64,
}

impl ConsensusWindow {
    pub fn contains(&self, pos: u32) -> bool {
        let pos = pos as i64;
        self.start < pos && pos < self.end
    }
}

/// Consensus windows for forward and reverse oriented reads of a family
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Footprint {
    pub forward: Option<ConsensusWindow>,
    pub reverse: Option<ConsensusWindow>,
}

impl Footprint {
    /// Majority-vote footprint over every read of a family, both strands together
    pub fn from_reads<'a, I>(reads: I) -> Self
    where
        I: IntoIterator<Item = &'a PreparedRead>,
    {
        let mut fwd = EdgeVotes::default();
        let mut rev = EdgeVotes::default();

        for read in reads {
            let votes = if read.is_reverse { &mut rev } else { &mut fwd };
            *votes.starts.entry(read.pos).or_insert(0) += 1;
            *votes.ends.entry(read.ref_end()).or_insert(0) += 1;
        }

        Self {
            forward: fwd.window(),
            reverse: rev.window(),
        }
    }

    /// Whether a pile lies strictly inside either orientation's window
    pub fn contains(&self, pos: u32) -> bool {
        self.forward.is_some_and(|w| w.contains(pos))
            || self.reverse.is_some_and(|w| w.contains(pos))
    }

    pub fn filter(&self, piles: Vec<Pile>) -> Vec<Pile> {
        piles.into_iter().filter(|p| self.contains(p.pos)).collect()
    }
}

#[derive(Default)]
struct EdgeVotes {
    starts: BTreeMap<i64, u32>,
    ends: BTreeMap<i64, u32>,
}

impl EdgeVotes {
    // ties go to the smallest start and the largest end
    fn window(&self) -> Option<ConsensusWindow> {
        let start = most_frequent(self.starts.iter())?;
        let end = most_frequent(self.ends.iter().rev())?;
        Some(ConsensusWindow { start, end })
    }
}

fn most_frequent<'a>(votes: impl Iterator<Item = (&'a i64, &'a u32)>) -> Option<i64> {
    let mut best: Option<(i64, u32)> = None;
    for (&key, &count) in votes {
        if best.map_or(true, |(_, max)| count > max) {
            best = Some((key, count));
        }
    }
    best.map(|(key, _)| key)
}

/// Drop Watson and Crick piles that fall outside the family footprint
pub fn remove_positional_outliers(
    watson_piles: Vec<Pile>,
    crick_piles: Vec<Pile>,
    watson_reads: &[PreparedRead],
    crick_reads: &[PreparedRead],
) -> (Vec<Pile>, Vec<Pile>) {
    let footprint = Footprint::from_reads(watson_reads.iter().chain(crick_reads.iter()));
    (footprint.filter(watson_piles), footprint.filter(crick_piles))
}
