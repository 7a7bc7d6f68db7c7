//! BED reading and writing for read family regions and exclusion intervals

use crate::utils::is_gzipped;
use crate::{DuplexError, DuplexResult};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// One BED line: the three required columns plus whatever follows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BedRecord {
    pub chrom: String,
    pub start: u32,
    pub end: u32,
    pub name: Option<String>,
    pub score: Option<String>,
    pub strand: Option<String>,
    /// Columns after `chrom start end name score strand`
    pub annotation: Vec<String>,
}

/// Reference span occupied by one read family, with its annotated strand depths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadFamilyRegion {
    pub chrom: String,
    pub start: u32,
    pub end: u32,
    pub family_id: String,
    pub watson_depth: u32,
    pub crick_depth: u32,
    /// Score and strand columns, carried through to the analysis BED
    pub score: String,
    pub strand: String,
    /// Columns after the two depth annotations
    pub extra: Vec<String>,
}

impl ReadFamilyRegion {
    /// Region with score `0`, strand `.` and no extra columns
    pub fn new(
        chrom: &str,
        start: u32,
        end: u32,
        family_id: &str,
        watson_depth: u32,
        crick_depth: u32,
    ) -> Self {
        Self {
            chrom: chrom.to_string(),
            start,
            end,
            family_id: family_id.to_string(),
            watson_depth,
            crick_depth,
            score: "0".to_string(),
            strand: ".".to_string(),
            extra: Vec::new(),
        }
    }

    pub fn total_depth(&self) -> u32 {
        self.watson_depth + self.crick_depth
    }

    /// Half-open overlap on the same chromosome
    pub fn overlaps(&self, other: &ReadFamilyRegion) -> bool {
        self.chrom == other.chrom && self.start < other.end && other.start < self.end
    }

    /// Tab separated BED line with the columns the region was read with
    pub fn to_bed_line(&self) -> String {
        let mut line = format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.chrom,
            self.start,
            self.end,
            self.family_id,
            self.score,
            self.strand,
            self.watson_depth,
            self.crick_depth
        );
        for column in &self.extra {
            line.push('\t');
            line.push_str(column);
        }
        line
    }
}

impl TryFrom<BedRecord> for ReadFamilyRegion {
    type Error = DuplexError;

    fn try_from(record: BedRecord) -> DuplexResult<Self> {
        let location = format!("{}:{}-{}", record.chrom, record.start, record.end);
        let family_id = record
            .name
            .ok_or_else(|| DuplexError::InvalidRegion(format!("{} has no family name", location)))?;

        let depth = |idx: usize, label: &str| -> DuplexResult<u32> {
            let field = record.annotation.get(idx).ok_or_else(|| {
                DuplexError::InvalidRegion(format!(
                    "{} has no {} depth annotation",
                    location, label
                ))
            })?;
            field.trim().parse::<u32>().map_err(|_| {
                DuplexError::InvalidRegion(format!(
                    "{} has invalid {} depth: {}",
                    location, label, field
                ))
            })
        };

        Ok(Self {
            watson_depth: depth(0, "watson")?,
            crick_depth: depth(1, "crick")?,
            chrom: record.chrom,
            start: record.start,
            end: record.end,
            family_id,
            score: record.score.unwrap_or_else(|| "0".to_string()),
            strand: record.strand.unwrap_or_else(|| ".".to_string()),
            extra: record.annotation.into_iter().skip(2).collect(),
        })
    }
}

/// Streaming BED reader over plain or gzipped files
pub struct BedReader {
    records: csv::StringRecordsIntoIter<Box<dyn BufRead + Send>>,
}

impl BedReader {
    pub fn from_path<P: AsRef<Path>>(path: P) -> DuplexResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|_| DuplexError::FileNotFound(path.to_string_lossy().to_string()))?;

        let reader: Box<dyn BufRead + Send> = if is_gzipped(path)? {
            Box::new(BufReader::new(MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };

        Ok(Self::new(reader))
    }

    pub fn new(reader: Box<dyn BufRead + Send>) -> Self {
        let csv_reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .comment(Some(b'#'))
            .from_reader(reader);

        Self {
            records: csv_reader.into_records(),
        }
    }

    /// Iterate read family regions instead of raw records
    pub fn regions(self) -> impl Iterator<Item = DuplexResult<ReadFamilyRegion>> {
        self.map(|record| record.and_then(ReadFamilyRegion::try_from))
    }
}

impl Iterator for BedReader {
    type Item = DuplexResult<BedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let record = match self.records.next()? {
                Ok(record) => record,
                Err(e) => return Some(Err(e.into())),
            };

            let first = record.get(0).unwrap_or("");
            if first.is_empty() || first.starts_with("track") || first.starts_with("browser") {
                continue;
            }

            return Some(parse_record(&record));
        }
    }
}

fn parse_record(record: &csv::StringRecord) -> DuplexResult<BedRecord> {
    if record.len() < 3 {
        return Err(DuplexError::InvalidRegion(format!(
            "expected at least 3 columns, found {}",
            record.len()
        )));
    }

    let coord = |idx: usize| -> DuplexResult<u32> {
        record[idx].trim().parse::<u32>().map_err(|_| {
            DuplexError::InvalidRegion(format!("invalid coordinate: {}", &record[idx]))
        })
    };
    let (start, end) = (coord(1)?, coord(2)?);
    if end < start {
        return Err(DuplexError::InvalidRegion(format!(
            "{}:{}-{} ends before it starts",
            &record[0], start, end
        )));
    }

    Ok(BedRecord {
        chrom: record[0].to_string(),
        start,
        end,
        name: record.get(3).map(str::to_string),
        score: record.get(4).map(str::to_string),
        strand: record.get(5).map(str::to_string),
        annotation: record.iter().skip(6).map(str::to_string).collect(),
    })
}

/// Write regions as BED lines
pub fn write_regions<'a, W, I>(writer: &mut W, regions: I) -> DuplexResult<()>
where
    W: Write,
    I: IntoIterator<Item = &'a ReadFamilyRegion>,
{
    for region in regions {
        writeln!(writer, "{}", region.to_bed_line())?;
    }
    Ok(())
}
