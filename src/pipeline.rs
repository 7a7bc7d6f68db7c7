//! Worker pool driving family calling across a stream of regions
//!
//! ```text
//! producer --regions--> worker 1..N --batches (bounded)--> collector --> VCF
//!                          |                   ^
//!                          +--debug lines--> writer        watcher (joins workers)
//! ```
//!
//! Every worker owns its alignment and reference readers. The collector sees the
//! end of the batch stream only after the watcher has joined every worker.

use crate::bed::{BedReader, ReadFamilyRegion};
use crate::exclude::ExclusionTree;
use crate::family::FamilyCaller;
use crate::prefilter::{prefilter_bed_file, PrefilterConfig};
use crate::utils::{get_num_cpus, validate_file_readable, Timer};
use crate::vcf::{VcfHeader, VcfWriter};
use crate::{CallerConfig, DebugTrace, DuplexError, DuplexResult, VariantCall};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Instant;

type Batch = DuplexResult<Vec<VariantCall>>;

/// Something that turns one read family region into calls
pub trait RegionCaller {
    fn call(&mut self, region: &ReadFamilyRegion) -> DuplexResult<Vec<VariantCall>>;
}

impl RegionCaller for FamilyCaller {
    fn call(&mut self, region: &ReadFamilyRegion) -> DuplexResult<Vec<VariantCall>> {
        FamilyCaller::call(self, region)
    }
}

/// Threading and reporting settings
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub threads: usize,
    /// Family batches buffered between workers and the collector
    pub output_capacity: usize,
    /// Regions buffered between the producer and the workers
    pub region_capacity: usize,
    /// Families between throughput log lines
    pub progress_interval: usize,
    pub debug_log: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            output_capacity: 100,
            region_capacity: 1000,
            progress_interval: 1000,
            debug_log: None,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> DuplexResult<()> {
        if self.threads == 0 {
            return Err(DuplexError::InvalidConfig(
                "number of threads must be at least 1".to_string(),
            ));
        }
        if self.output_capacity == 0 || self.region_capacity == 0 {
            return Err(DuplexError::InvalidConfig(
                "channel capacities must be at least 1".to_string(),
            ));
        }
        if self.progress_interval == 0 {
            return Err(DuplexError::InvalidConfig(
                "progress interval must be at least 1".to_string(),
            ));
        }
        if self.threads > get_num_cpus() {
            log::warn!(
                "Requested {} threads but only {} CPUs are available",
                self.threads,
                get_num_cpus()
            );
        }
        if self.threads > 1 && self.debug_log.is_some() {
            log::warn!("Debug trace lines from {} workers will interleave", self.threads);
        }
        Ok(())
    }
}

/// Totals reported by the collector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub families: usize,
    pub calls: usize,
    pub excluded_calls: usize,
    pub written: usize,
}

/// Input and output locations for a full calling run
#[derive(Debug, Clone)]
pub struct CallInputs {
    pub bam: PathBuf,
    pub reference: PathBuf,
    pub regions: PathBuf,
    pub exclude: Vec<PathBuf>,
    pub output: PathBuf,
}

/// Prefilter the family BED, then call every surviving family into a VCF
pub fn call_variants(
    inputs: &CallInputs,
    caller: &CallerConfig,
    prefilter: &PrefilterConfig,
    pipeline: &PipelineConfig,
) -> DuplexResult<PipelineStats> {
    caller.validate()?;
    validate_file_readable(&inputs.bam)?;
    validate_file_readable(&inputs.reference)?;
    validate_file_readable(&inputs.regions)?;
    for path in &inputs.exclude {
        validate_file_readable(path)?;
    }

    let (analysis_bed, exclusions) =
        prefilter_bed_file(&inputs.regions, &inputs.exclude, prefilter)?;

    let header = VcfHeader::from_inputs(&inputs.bam, &inputs.reference)?;
    let mut writer = VcfWriter::create(&inputs.output, &header)?;
    let regions = BedReader::from_path(&analysis_bed)?.regions();

    let _timer = Timer::new("family calling");
    let stats = run_pipeline(
        regions,
        |trace| FamilyCaller::open(&inputs.bam, &inputs.reference, caller.clone(), trace),
        &exclusions,
        pipeline,
        |call| writer.write_call(call),
    )?;
    writer.finish()?;

    Ok(stats)
}

/// Fan regions out to `pipeline.threads` workers and collect their calls.
///
/// `open_caller` runs once inside each worker thread. Calls fully inside an
/// excluded interval are dropped; the rest go to `sink` in arrival order. The
/// first fatal error from the producer or any worker ends the run.
pub fn run_pipeline<I, F, C, S>(
    regions: I,
    open_caller: F,
    exclusions: &ExclusionTree,
    config: &PipelineConfig,
    mut sink: S,
) -> DuplexResult<PipelineStats>
where
    I: IntoIterator<Item = DuplexResult<ReadFamilyRegion>>,
    I::IntoIter: Send,
    F: Fn(DebugTrace) -> DuplexResult<C> + Sync,
    C: RegionCaller,
    S: FnMut(&VariantCall) -> DuplexResult<()>,
{
    config.validate()?;
    let debug_file = match &config.debug_log {
        Some(path) => Some(BufWriter::new(File::create(path)?)),
        None => None,
    };

    let regions = regions.into_iter();
    let open_caller = &open_caller;

    thread::scope(|scope| {
        let (region_tx, region_rx) = bounded::<ReadFamilyRegion>(config.region_capacity);
        let (batch_tx, batch_rx) = bounded::<Batch>(config.output_capacity);
        let (debug_tx, debug_rx) = unbounded::<String>();

        let debug_writer =
            debug_file.map(|file| scope.spawn(move || write_debug_lines(debug_rx, file)));

        let producer_tx = batch_tx.clone();
        scope.spawn(move || produce_regions(regions, region_tx, producer_tx));

        let mut workers = Vec::with_capacity(config.threads);
        for id in 0..config.threads {
            let regions = region_rx.clone();
            let batches = batch_tx.clone();
            let trace = if debug_writer.is_some() {
                DebugTrace::new(debug_tx.clone())
            } else {
                DebugTrace::disabled()
            };
            workers.push(scope.spawn(move || run_worker(id, regions, batches, open_caller, trace)));
        }
        drop(region_rx);

        // holding the last batch and debug senders, the watcher closes both channels
        scope.spawn(move || {
            for (id, worker) in workers.into_iter().enumerate() {
                if let Err(panic) = worker.join() {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    let _ = batch_tx.send(Err(DuplexError::WorkerPanicked(format!(
                        "worker {}: {}",
                        id, message
                    ))));
                }
            }
            drop(debug_tx);
        });

        let stats = collect_batches(batch_rx, exclusions, config.progress_interval, &mut sink)?;

        if let Some(handle) = debug_writer {
            match handle.join() {
                Ok(Ok(lines)) => log::debug!("Wrote {} debug trace lines", lines),
                Ok(Err(e)) => log::warn!("Debug trace writer failed: {}", e),
                Err(_) => log::warn!("Debug trace writer panicked"),
            }
        }

        log::info!(
            "Processed {} read families: {} calls, {} excluded, {} written",
            stats.families,
            stats.calls,
            stats.excluded_calls,
            stats.written
        );
        Ok(stats)
    })
}

fn produce_regions<I>(regions: I, region_tx: Sender<ReadFamilyRegion>, batch_tx: Sender<Batch>)
where
    I: Iterator<Item = DuplexResult<ReadFamilyRegion>>,
{
    for region in regions {
        match region {
            Ok(region) => {
                if region_tx.send(region).is_err() {
                    // all workers have stopped
                    return;
                }
            }
            Err(e) => {
                let _ = batch_tx.send(Err(e));
                return;
            }
        }
    }
}

fn run_worker<F, C>(
    id: usize,
    regions: Receiver<ReadFamilyRegion>,
    batches: Sender<Batch>,
    open_caller: &F,
    trace: DebugTrace,
) where
    F: Fn(DebugTrace) -> DuplexResult<C>,
    C: RegionCaller,
{
    let mut caller = match open_caller(trace) {
        Ok(caller) => caller,
        Err(e) => {
            let _ = batches.send(Err(e));
            return;
        }
    };

    let mut families = 0usize;
    for region in regions.iter() {
        let batch = caller.call(&region);
        let failed = batch.is_err();
        if batches.send(batch).is_err() || failed {
            break;
        }
        families += 1;
    }
    log::debug!("Worker {} finished after {} families", id, families);
}

fn collect_batches<S>(
    batches: Receiver<Batch>,
    exclusions: &ExclusionTree,
    progress_interval: usize,
    sink: &mut S,
) -> DuplexResult<PipelineStats>
where
    S: FnMut(&VariantCall) -> DuplexResult<()>,
{
    let mut stats = PipelineStats::default();
    let mut checkpoint = Instant::now();
    let mut last_position: Option<(String, u32)> = None;

    for batch in batches.iter() {
        let calls = batch?;
        stats.families += 1;
        stats.calls += calls.len();

        for call in &calls {
            if exclusions.contains_call(call) {
                stats.excluded_calls += 1;
                continue;
            }
            sink(call)?;
            stats.written += 1;
        }
        if let Some(call) = calls.last() {
            last_position = Some((call.chrom.clone(), call.pos));
        }

        if stats.families % progress_interval == 0 {
            let location = last_position
                .as_ref()
                .map(|(chrom, pos)| format!("{}:{}", chrom, pos))
                .unwrap_or_else(|| "-".to_string());
            log::debug!(
                "Processed {} read families in {:.1}s\t{}",
                progress_interval,
                checkpoint.elapsed().as_secs_f64(),
                location
            );
            checkpoint = Instant::now();
        }
    }

    Ok(stats)
}

fn write_debug_lines(lines: Receiver<String>, mut out: BufWriter<File>) -> DuplexResult<usize> {
    let mut count = 0;
    for line in lines.iter() {
        writeln!(out, "{}", line)?;
        count += 1;
    }
    out.flush()?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    /// Calls a fixed SNV for every family, keyed by family name
    struct ScriptedCaller {
        calls: HashMap<String, Vec<VariantCall>>,
        trace: DebugTrace,
    }

    impl RegionCaller for ScriptedCaller {
        fn call(&mut self, region: &ReadFamilyRegion) -> DuplexResult<Vec<VariantCall>> {
            self.trace.emit(|| format!("calling {}", region.family_id));
            if region.family_id == "broken" {
                return Err(DuplexError::UnknownContig(region.chrom.clone()));
            }
            if region.family_id == "panics" {
                panic!("boom");
            }
            Ok(self.calls.get(&region.family_id).cloned().unwrap_or_default())
        }
    }

    fn region(family: &str, start: u32) -> ReadFamilyRegion {
        ReadFamilyRegion::new("chr1", start, start + 100, family, 5, 5)
    }

    fn snv(family: &str, pos: u32) -> VariantCall {
        VariantCall {
            chrom: "chr1".to_string(),
            pos,
            ref_allele: "G".to_string(),
            alt_allele: "A".to_string(),
            total_depth: 10,
            watson_depth: 5,
            crick_depth: 5,
            family_id: family.to_string(),
        }
    }

    fn scripted() -> HashMap<String, Vec<VariantCall>> {
        let mut calls = HashMap::new();
        calls.insert("f1".to_string(), vec![snv("f1", 150)]);
        calls.insert("f2".to_string(), vec![snv("f2", 1050), snv("f2", 1060)]);
        calls
    }

    fn run(
        regions: Vec<ReadFamilyRegion>,
        exclusions: &ExclusionTree,
        config: &PipelineConfig,
    ) -> (DuplexResult<PipelineStats>, Vec<VariantCall>) {
        let mut written = Vec::new();
        let result = run_pipeline(
            regions.into_iter().map(Ok),
            |trace| {
                Ok(ScriptedCaller {
                    calls: scripted(),
                    trace,
                })
            },
            exclusions,
            config,
            |call| {
                written.push(call.clone());
                Ok(())
            },
        );
        (result, written)
    }

    #[test]
    fn test_collects_all_families() {
        let config = PipelineConfig {
            threads: 3,
            ..PipelineConfig::default()
        };
        let regions = vec![region("f1", 100), region("f2", 1000), region("f3", 2000)];
        let (result, mut written) = run(regions, &ExclusionTree::new(), &config);

        let stats = result.unwrap();
        assert_eq!(stats.families, 3);
        assert_eq!(stats.calls, 3);
        assert_eq!(stats.written, 3);

        written.sort_by_key(|c| c.pos);
        let positions: Vec<u32> = written.iter().map(|c| c.pos).collect();
        assert_eq!(positions, vec![150, 1050, 1060]);
    }

    #[test]
    fn test_excluded_calls_dropped() {
        let mut exclusions = ExclusionTree::new();
        exclusions.insert("chr1", 1000, 1055);

        let regions = vec![region("f1", 100), region("f2", 1000)];
        let (result, written) = run(regions, &exclusions, &PipelineConfig::default());

        let stats = result.unwrap();
        assert_eq!(stats.excluded_calls, 1);
        assert_eq!(written.len(), 2);
        assert!(written.iter().all(|c| c.pos != 1050));
    }

    #[test]
    fn test_worker_error_stops_run() {
        let config = PipelineConfig {
            threads: 2,
            output_capacity: 1,
            region_capacity: 1,
            ..PipelineConfig::default()
        };
        let mut regions: Vec<ReadFamilyRegion> = (0..50).map(|i| region("f3", i * 200)).collect();
        regions.insert(10, region("broken", 5000));

        let (result, _) = run(regions, &ExclusionTree::new(), &config);
        assert!(matches!(result, Err(DuplexError::UnknownContig(_))));
    }

    #[test]
    fn test_worker_panic_reported() {
        let regions = vec![region("f1", 100), region("panics", 200)];
        let (result, _) = run(regions, &ExclusionTree::new(), &PipelineConfig::default());

        match result {
            Err(DuplexError::WorkerPanicked(message)) => assert!(message.contains("boom")),
            other => panic!("expected a worker panic, got {:?}", other),
        }
    }

    #[test]
    fn test_region_error_stops_run() {
        let regions: Vec<DuplexResult<ReadFamilyRegion>> = vec![
            Ok(region("f1", 100)),
            Err(DuplexError::InvalidRegion("bad line".to_string())),
        ];
        let result = run_pipeline(
            regions,
            |trace| {
                Ok(ScriptedCaller {
                    calls: scripted(),
                    trace,
                })
            },
            &ExclusionTree::new(),
            &PipelineConfig::default(),
            |_| Ok(()),
        );
        assert!(matches!(result, Err(DuplexError::InvalidRegion(_))));
    }

    #[test]
    fn test_debug_trace_written() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("debug.txt");
        let config = PipelineConfig {
            debug_log: Some(log_path.clone()),
            ..PipelineConfig::default()
        };

        let (result, _) = run(
            vec![region("f1", 100), region("f2", 1000)],
            &ExclusionTree::new(),
            &config,
        );
        result.unwrap();

        let text = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(text, "calling f1\ncalling f2\n");
    }

    #[test]
    fn test_invalid_config() {
        let config = PipelineConfig {
            threads: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(DuplexError::InvalidConfig(_))));
    }
}
