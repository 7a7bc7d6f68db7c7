//! VCF output: header construction and record formatting for duplex calls

use crate::reference::FaidxReference;
use crate::utils::{create_output, OutputWriter};
use crate::{DuplexResult, VariantCall};
use std::io::Write;
use std::path::Path;

/// FORMAT keys written for every call, in column order
pub const FORMAT_KEYS: &str = "GT:DP:WS:CS:RF";

const FORMAT_LINES: [&str; 5] = [
    "##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">",
    "##FORMAT=<ID=DP,Number=1,Type=Integer,Description=\"Total Read Depth\">",
    "##FORMAT=<ID=WS,Number=1,Type=Integer,Description=\"Watson Strand Read Depth\">",
    "##FORMAT=<ID=CS,Number=1,Type=Integer,Description=\"Crick Strand Read Depth\">",
    "##FORMAT=<ID=RF,Number=1,Type=String,Description=\"Read Family Identifier\">",
];

/// Meta lines and the single sample column of the output VCF
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcfHeader {
    pub reference: String,
    pub contigs: Vec<(String, u64)>,
    pub sample: String,
}

impl VcfHeader {
    /// Header for calls on `bam_path` against an indexed FASTA
    pub fn from_inputs<P: AsRef<Path>, Q: AsRef<Path>>(
        bam_path: P,
        reference_path: Q,
    ) -> DuplexResult<Self> {
        let contigs = FaidxReference::from_path(&reference_path)?.contigs()?;
        Ok(Self {
            reference: reference_path.as_ref().display().to_string(),
            contigs,
            sample: sample_name(bam_path),
        })
    }

    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            "##fileformat=VCFv4.2".to_string(),
            format!("##reference={}", self.reference),
        ];
        lines.extend(
            self.contigs
                .iter()
                .map(|(name, len)| format!("##contig=<ID={},length={}>", name, len)),
        );
        lines.extend(FORMAT_LINES.iter().map(|l| l.to_string()));
        lines.push(format!(
            "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\t{}",
            self.sample
        ));
        lines
    }
}

/// Sample column name: the BAM file name without its `.bam` suffix
pub fn sample_name<P: AsRef<Path>>(bam_path: P) -> String {
    let name = bam_path
        .as_ref()
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    name.strip_suffix(".bam").unwrap_or(&name).to_string()
}

/// One VCF data line for a call
pub fn format_call(call: &VariantCall) -> String {
    format!(
        "{}\t{}\t.\t{}\t{}\t.\t.\t.\t{}\t1:{}:{}:{}:{}",
        call.chrom,
        call.pos,
        call.ref_allele,
        call.alt_allele,
        FORMAT_KEYS,
        call.total_depth,
        call.watson_depth,
        call.crick_depth,
        call.family_id
    )
}

/// Streaming VCF writer (plain, gzipped or standard output)
pub struct VcfWriter {
    writer: OutputWriter,
    records: usize,
}

impl VcfWriter {
    pub fn new(writer: OutputWriter, header: &VcfHeader) -> DuplexResult<Self> {
        let mut vcf = Self { writer, records: 0 };
        for line in header.lines() {
            writeln!(vcf.writer, "{}", line)?;
        }
        Ok(vcf)
    }

    pub fn create<P: AsRef<Path>>(path: P, header: &VcfHeader) -> DuplexResult<Self> {
        Self::new(create_output(path)?, header)
    }

    pub fn write_call(&mut self, call: &VariantCall) -> DuplexResult<()> {
        writeln!(self.writer, "{}", format_call(call))?;
        self.records += 1;
        Ok(())
    }

    /// Flush the output and, for `.gz` paths, write the gzip trailer
    pub fn finish(self) -> DuplexResult<usize> {
        self.writer.finish()?;
        Ok(self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::MultiGzDecoder;
    use std::io::Read;
    use tempfile::tempdir;

    fn header() -> VcfHeader {
        VcfHeader {
            reference: "ref.fa".to_string(),
            contigs: vec![("chr1".to_string(), 1000), ("chr2".to_string(), 500)],
            sample: "sample1".to_string(),
        }
    }

    fn call() -> VariantCall {
        VariantCall {
            chrom: "chr1".to_string(),
            pos: 1000,
            ref_allele: "G".to_string(),
            alt_allele: "A".to_string(),
            total_depth: 17,
            watson_depth: 8,
            crick_depth: 9,
            family_id: "fam7".to_string(),
        }
    }

    #[test]
    fn test_format_call() {
        assert_eq!(
            format_call(&call()),
            "chr1\t1000\t.\tG\tA\t.\t.\t.\tGT:DP:WS:CS:RF\t1:17:8:9:fam7"
        );
    }

    #[test]
    fn test_header_lines() {
        let lines = header().lines();
        assert_eq!(lines[0], "##fileformat=VCFv4.2");
        assert_eq!(lines[1], "##reference=ref.fa");
        assert_eq!(lines[2], "##contig=<ID=chr1,length=1000>");
        assert_eq!(lines[3], "##contig=<ID=chr2,length=500>");
        assert_eq!(lines.len(), 2 + 2 + 5 + 1);
        assert!(lines.last().unwrap().ends_with("FORMAT\tsample1"));
    }

    #[test]
    fn test_sample_name() {
        assert_eq!(sample_name("/data/run1/tumor.bam"), "tumor");
        assert_eq!(sample_name("reads.cram"), "reads.cram");
    }

    #[test]
    fn test_writer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("calls.vcf");
        let mut writer = VcfWriter::create(&path, &header()).unwrap();
        writer.write_call(&call()).unwrap();
        assert_eq!(writer.finish().unwrap(), 1);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 11);
        assert!(lines[10].starts_with("chr1\t1000"));
    }

    #[test]
    fn test_gzip_writer_is_complete_after_finish() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("calls.vcf.gz");
        let mut writer = VcfWriter::create(&path, &header()).unwrap();
        for _ in 0..500 {
            writer.write_call(&call()).unwrap();
        }
        assert_eq!(writer.finish().unwrap(), 500);

        // a missing trailer makes the decoder fail with UnexpectedEof
        let mut text = String::new();
        MultiGzDecoder::new(std::fs::File::open(&path).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        assert!(text.starts_with("##fileformat=VCFv4.2\n"));
        assert_eq!(text.lines().filter(|l| !l.starts_with('#')).count(), 500);
        assert!(text.ends_with("1:17:8:9:fam7\n"));
    }
}
