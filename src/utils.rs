//! File helpers, output sinks and timing shared by the library and binaries

use crate::{DuplexError, DuplexResult};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Check for the gzip magic bytes
pub fn is_gzipped<P: AsRef<Path>>(path: P) -> DuplexResult<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0; 2];

    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1f, 0x8b]),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(DuplexError::Io(e)),
    }
}

pub fn get_num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

/// Fail with `FileNotFound` unless the path exists and can be opened
pub fn validate_file_readable<P: AsRef<Path>>(path: P) -> DuplexResult<()> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(DuplexError::FileNotFound(path.to_string_lossy().to_string()));
    }

    File::open(path).map_err(|_| DuplexError::FileNotFound(path.to_string_lossy().to_string()))?;
    Ok(())
}

/// Locate the BAM index, either `x.bam.bai` or `x.bai`
pub fn find_bam_index<P: AsRef<Path>>(bam_path: P) -> DuplexResult<PathBuf> {
    let bam_path = bam_path.as_ref();
    let bai_path = PathBuf::from(format!("{}.bai", bam_path.display()));
    let alt_bai_path = bam_path.with_extension("bai");

    if bai_path.exists() {
        Ok(bai_path)
    } else if alt_bai_path.exists() {
        Ok(alt_bai_path)
    } else {
        Err(DuplexError::FileNotFound(format!(
            "BAM index file not found. Expected {} or {}",
            bai_path.display(),
            alt_bai_path.display()
        )))
    }
}

/// `families.bed` becomes `families.analysis.bed`, next to the input
pub fn analysis_bed_path<P: AsRef<Path>>(bed_path: P) -> PathBuf {
    let path = bed_path.as_ref().to_string_lossy();
    let stem = path.strip_suffix(".bed").unwrap_or(&path);
    PathBuf::from(format!("{}.analysis.bed", stem))
}

/// Whether an output path names standard output
pub fn is_stdout<P: AsRef<Path>>(path: P) -> bool {
    matches!(path.as_ref().to_str(), Some("-") | Some("stdout"))
}

/// Output sink for VCF and BED text
pub enum OutputWriter {
    Stdout(BufWriter<io::Stdout>),
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl OutputWriter {
    /// Flush everything, writing the gzip trailer for compressed output.
    ///
    /// Dropping the writer instead would discard any error from these final writes.
    pub fn finish(self) -> io::Result<()> {
        match self {
            OutputWriter::Stdout(mut writer) => writer.flush(),
            OutputWriter::Plain(mut writer) => writer.flush(),
            OutputWriter::Gzip(encoder) => encoder.finish()?.flush(),
        }
    }
}

impl Write for OutputWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            OutputWriter::Stdout(writer) => writer.write(buf),
            OutputWriter::Plain(writer) => writer.write(buf),
            OutputWriter::Gzip(writer) => writer.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            OutputWriter::Stdout(writer) => writer.flush(),
            OutputWriter::Plain(writer) => writer.flush(),
            OutputWriter::Gzip(writer) => writer.flush(),
        }
    }
}

/// Open an output sink: standard output for `-`/`stdout`, gzip for `.gz`, plain file otherwise
pub fn create_output<P: AsRef<Path>>(path: P) -> DuplexResult<OutputWriter> {
    let path = path.as_ref();
    if is_stdout(path) {
        return Ok(OutputWriter::Stdout(BufWriter::new(io::stdout())));
    }

    ensure_parent_dirs(path)?;
    let file = BufWriter::new(File::create(path)?);
    if path.extension().and_then(|s| s.to_str()) == Some("gz") {
        Ok(OutputWriter::Gzip(GzEncoder::new(file, Compression::default())))
    } else {
        Ok(OutputWriter::Plain(file))
    }
}

pub fn ensure_parent_dirs<P: AsRef<Path>>(path: P) -> DuplexResult<()> {
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Logs how long a phase took when dropped
pub struct Timer {
    start: Instant,
    name: String,
}

impl Timer {
    pub fn new(name: &str) -> Self {
        log::info!("Starting: {}", name);
        Timer {
            start: Instant::now(),
            name: name.to_string(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        log::info!("Finished: {} in {:.2?}", self.name, self.elapsed());
    }
}
