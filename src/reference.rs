//! Random access to reference sequence

use crate::{DuplexError, DuplexResult};
use rust_htslib::faidx;
use std::collections::HashMap;
use std::path::Path;

/// Source of upper-cased reference bases.
///
/// Coordinates are 0-based half-open. Implementations fail rather than
/// returning fewer bases than requested.
pub trait ReferenceSource {
    fn fetch(&self, chrom: &str, start: u64, end: u64) -> DuplexResult<Vec<u8>>;

    /// Single reference base at a 0-based position
    fn base(&self, chrom: &str, pos: u64) -> DuplexResult<u8> {
        let seq = self.fetch(chrom, pos, pos + 1)?;
        seq.first().copied().ok_or_else(|| {
            DuplexError::InvalidRegion(format!("no reference base at {}:{}", chrom, pos))
        })
    }
}

/// Indexed FASTA reader (requires a `.fai` next to the FASTA)
pub struct FaidxReference {
    reader: faidx::Reader,
}

impl FaidxReference {
    pub fn from_path<P: AsRef<Path>>(path: P) -> DuplexResult<Self> {
        let reader = faidx::Reader::from_path(path.as_ref())?;
        Ok(Self { reader })
    }

    /// Contig names and lengths in index order
    pub fn contigs(&self) -> DuplexResult<Vec<(String, u64)>> {
        let names = self.reader.seq_names()?;
        Ok(names
            .into_iter()
            .map(|name| {
                let len = self.reader.fetch_seq_len(&name);
                (name, len)
            })
            .collect())
    }
}

impl ReferenceSource for FaidxReference {
    fn fetch(&self, chrom: &str, start: u64, end: u64) -> DuplexResult<Vec<u8>> {
        if end <= start {
            return Ok(Vec::new());
        }

        // faidx takes an inclusive end
        let seq = self
            .reader
            .fetch_seq(chrom, start as usize, (end - 1) as usize)?;
        if (seq.len() as u64) < end - start {
            return Err(DuplexError::InvalidRegion(format!(
                "reference {}:{}-{} runs past the end of the contig",
                chrom, start, end
            )));
        }
        Ok(seq.iter().map(|b| b.to_ascii_uppercase()).collect())
    }
}

/// Reference held in memory, keyed by contig name
#[derive(Debug, Clone, Default)]
pub struct InMemoryReference {
    contigs: HashMap<String, Vec<u8>>,
}

impl InMemoryReference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contig(mut self, name: &str, seq: &[u8]) -> Self {
        self.contigs.insert(name.to_string(), seq.to_vec());
        self
    }
}

impl ReferenceSource for InMemoryReference {
    fn fetch(&self, chrom: &str, start: u64, end: u64) -> DuplexResult<Vec<u8>> {
        let seq = self
            .contigs
            .get(chrom)
            .ok_or_else(|| DuplexError::UnknownContig(chrom.to_string()))?;

        let (start, end) = (start as usize, end as usize);
        if start > end || end > seq.len() {
            return Err(DuplexError::InvalidRegion(format!(
                "reference {}:{}-{} runs past the end of the contig",
                chrom, start, end
            )));
        }
        Ok(seq[start..end].iter().map(|b| b.to_ascii_uppercase()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_in_memory_fetch_is_upper_cased() {
        let reference = InMemoryReference::new().with_contig("chr1", b"acgtACGT");
        assert_eq!(reference.fetch("chr1", 2, 6).unwrap(), b"GTAC".to_vec());
        assert_eq!(reference.base("chr1", 0).unwrap(), b'A');
    }

    #[test]
    fn test_in_memory_errors() {
        let reference = InMemoryReference::new().with_contig("chr1", b"ACGT");
        assert!(matches!(
            reference.fetch("chr2", 0, 1),
            Err(DuplexError::UnknownContig(_))
        ));
        assert!(matches!(
            reference.fetch("chr1", 2, 10),
            Err(DuplexError::InvalidRegion(_))
        ));
    }

    #[test]
    fn test_faidx_reference() {
        let dir = tempdir().unwrap();
        let fasta = dir.path().join("ref.fa");
        let mut file = std::fs::File::create(&fasta).unwrap();
        writeln!(file, ">chr1").unwrap();
        writeln!(file, "acgtacgtAA").unwrap();
        writeln!(file, ">chr2").unwrap();
        writeln!(file, "GGGG").unwrap();
        drop(file);

        std::fs::write(
            dir.path().join("ref.fa.fai"),
            "chr1\t10\t6\t10\t11\nchr2\t4\t23\t4\t5\n",
        )
        .unwrap();

        let reference = FaidxReference::from_path(&fasta).unwrap();
        assert_eq!(reference.fetch("chr1", 0, 4).unwrap(), b"ACGT".to_vec());
        assert_eq!(reference.fetch("chr1", 8, 10).unwrap(), b"AA".to_vec());
        assert_eq!(reference.base("chr2", 3).unwrap(), b'G');
        assert_eq!(
            reference.contigs().unwrap(),
            vec![("chr1".to_string(), 10), ("chr2".to_string(), 4)]
        );
    }
}
