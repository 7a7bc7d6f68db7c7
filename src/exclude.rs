//! Excluded genomic intervals, indexed per chromosome

use crate::bed::{BedReader, BedRecord};
use crate::{DuplexResult, VariantCall};
use bio::data_structures::interval_tree::IntervalTree;
use std::collections::HashMap;
use std::path::Path;

/// Read-only interval index shared by the prefilter and the collector
#[derive(Default)]
pub struct ExclusionTree {
    trees: HashMap<String, IntervalTree<u32, ()>>,
    len: usize,
}

impl ExclusionTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge every interval of every BED file into one tree
    pub fn from_bed_files<P: AsRef<Path>>(paths: &[P]) -> DuplexResult<Self> {
        let mut tree = Self::new();
        for path in paths {
            for record in BedReader::from_path(path)? {
                tree.insert_record(&record?);
            }
        }
        Ok(tree)
    }

    pub fn insert_record(&mut self, record: &BedRecord) {
        self.insert(&record.chrom, record.start, record.end);
    }

    /// Add a 0-based half-open interval; empty intervals cannot contain anything and are skipped
    pub fn insert(&mut self, chrom: &str, start: u32, end: u32) {
        if end <= start {
            return;
        }
        self.trees
            .entry(chrom.to_string())
            .or_insert_with(IntervalTree::new)
            .insert(start..end, ());
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether `[start, end)` lies entirely within a single excluded interval
    pub fn contains_interval(&self, chrom: &str, start: u32, end: u32) -> bool {
        let Some(tree) = self.trees.get(chrom) else {
            return false;
        };

        // a zero-width query still has to sit inside an interval
        let query_end = end.max(start + 1);
        tree.find(start..query_end).any(|entry| {
            let excluded = entry.interval();
            excluded.start <= start && query_end <= excluded.end
        })
    }

    /// Whether the reference span of a call is fully excluded
    pub fn contains_call(&self, call: &VariantCall) -> bool {
        let (start, end) = call.ref_span();
        self.contains_interval(&call.chrom, start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn call(pos: u32, ref_allele: &str) -> VariantCall {
        VariantCall {
            chrom: "chr1".to_string(),
            pos,
            ref_allele: ref_allele.to_string(),
            alt_allele: "A".to_string(),
            total_depth: 10,
            watson_depth: 5,
            crick_depth: 5,
            family_id: "fam1".to_string(),
        }
    }

    #[test]
    fn test_full_containment_only() {
        let mut tree = ExclusionTree::new();
        tree.insert("chr1", 100, 200);

        assert!(tree.contains_interval("chr1", 100, 200));
        assert!(tree.contains_interval("chr1", 150, 160));
        assert!(!tree.contains_interval("chr1", 90, 110));
        assert!(!tree.contains_interval("chr1", 190, 201));
        assert!(!tree.contains_interval("chr2", 150, 160));
    }

    #[test]
    fn test_contains_call() {
        let mut tree = ExclusionTree::new();
        tree.insert("chr1", 100, 200);

        // 1-based 101 is 0-based 100
        assert!(tree.contains_call(&call(101, "G")));
        assert!(!tree.contains_call(&call(100, "G")));
        // deletion running out of the interval
        assert!(!tree.contains_call(&call(198, "GACT")));
        assert!(tree.contains_call(&call(197, "GACT")));
    }

    #[test]
    fn test_from_bed_files_merges_inputs() {
        let mut first = NamedTempFile::new().unwrap();
        writeln!(first, "chr1\t0\t50").unwrap();
        let mut second = NamedTempFile::new().unwrap();
        writeln!(second, "chr2\t10\t20\tblacklist").unwrap();
        writeln!(second, "chr2\t30\t30").unwrap();

        let tree = ExclusionTree::from_bed_files(&[first.path(), second.path()]).unwrap();
        assert_eq!(tree.len(), 2);
        assert!(tree.contains_interval("chr1", 10, 20));
        assert!(tree.contains_interval("chr2", 12, 13));
        assert!(!tree.contains_interval("chr2", 30, 31));
    }

    #[test]
    fn test_empty_tree() {
        let tree = ExclusionTree::new();
        assert!(tree.is_empty());
        assert!(!tree.contains_interval("chr1", 0, 10));
    }
}
