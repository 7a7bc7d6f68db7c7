//! Region prefilter: drops crowded, shallow and excluded read families before calling

use crate::bed::{write_regions, BedReader, ReadFamilyRegion};
use crate::exclude::ExclusionTree;
use crate::utils::{analysis_bed_path, create_output, Timer};
use crate::{CallerConfig, DuplexResult};
use std::path::{Path, PathBuf};

/// Thresholds for the prefilter
#[derive(Debug, Clone)]
pub struct PrefilterConfig {
    /// Largest cluster of mutually overlapping families kept; `None` keeps every cluster
    pub max_overlapping_families: Option<usize>,
    pub min_total_depth: u32,
    pub min_stranded_depth: u32,
}

impl Default for PrefilterConfig {
    fn default() -> Self {
        Self {
            max_overlapping_families: Some(20),
            min_total_depth: 8,
            min_stranded_depth: 4,
        }
    }
}

impl PrefilterConfig {
    /// Share the depth thresholds of the caller; a negative limit disables the crowding check
    pub fn from_caller(config: &CallerConfig, max_overlapping_families: i64) -> Self {
        Self {
            max_overlapping_families: usize::try_from(max_overlapping_families).ok(),
            min_total_depth: config.min_total_depth,
            min_stranded_depth: config.min_stranded_depth,
        }
    }
}

/// Counts of what the prefilter did with each region
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefilterStats {
    pub regions_read: usize,
    pub clusters: usize,
    pub crowded: usize,
    pub shallow: usize,
    pub excluded: usize,
    pub kept: usize,
}

/// Stream sorted regions through the prefilter, handing survivors to `emit`.
///
/// Regions are grouped into clusters of entries overlapping the first region of
/// the cluster. Clusters larger than the overlap limit are dropped whole; in the
/// rest each region must pass the depth thresholds and not lie fully inside an
/// excluded interval.
pub fn filter_regions<I, F>(
    regions: I,
    exclusions: &ExclusionTree,
    config: &PrefilterConfig,
    mut emit: F,
) -> DuplexResult<PrefilterStats>
where
    I: IntoIterator<Item = DuplexResult<ReadFamilyRegion>>,
    F: FnMut(&ReadFamilyRegion) -> DuplexResult<()>,
{
    let mut stats = PrefilterStats::default();
    let mut cluster: Vec<ReadFamilyRegion> = Vec::new();

    for region in regions {
        let region = region?;
        stats.regions_read += 1;

        if let Some(first) = cluster.first() {
            if !first.overlaps(&region) {
                flush_cluster(&mut cluster, exclusions, config, &mut stats, &mut emit)?;
            }
        }
        cluster.push(region);
    }
    flush_cluster(&mut cluster, exclusions, config, &mut stats, &mut emit)?;

    Ok(stats)
}

fn flush_cluster<F>(
    cluster: &mut Vec<ReadFamilyRegion>,
    exclusions: &ExclusionTree,
    config: &PrefilterConfig,
    stats: &mut PrefilterStats,
    emit: &mut F,
) -> DuplexResult<()>
where
    F: FnMut(&ReadFamilyRegion) -> DuplexResult<()>,
{
    if cluster.is_empty() {
        return Ok(());
    }
    stats.clusters += 1;

    if config.max_overlapping_families.is_some_and(|max| cluster.len() > max) {
        stats.crowded += cluster.len();
        cluster.clear();
        return Ok(());
    }

    for region in cluster.drain(..) {
        if region.total_depth() < config.min_total_depth
            || region.watson_depth < config.min_stranded_depth
            || region.crick_depth < config.min_stranded_depth
        {
            stats.shallow += 1;
            continue;
        }
        if exclusions.contains_interval(&region.chrom, region.start, region.end) {
            stats.excluded += 1;
            continue;
        }
        stats.kept += 1;
        emit(&region)?;
    }

    Ok(())
}

/// Prefilter a family BED, writing survivors to `<stem>.analysis.bed`.
///
/// Returns the path of the analysis BED and the merged exclusion tree for reuse
/// by the collector.
pub fn prefilter_bed_file<P: AsRef<Path>>(
    bed_path: P,
    exclude_beds: &[PathBuf],
    config: &PrefilterConfig,
) -> DuplexResult<(PathBuf, ExclusionTree)> {
    let _timer = Timer::new("region prefilter");

    let exclusions = ExclusionTree::from_bed_files(exclude_beds)?;
    log::info!(
        "Loaded {} excluded intervals from {} file(s)",
        exclusions.len(),
        exclude_beds.len()
    );

    let out_path = analysis_bed_path(&bed_path);
    let mut writer = create_output(&out_path)?;
    let regions = BedReader::from_path(&bed_path)?.regions();

    let stats = filter_regions(regions, &exclusions, config, |region| {
        write_regions(&mut writer, [region])
    })?;
    writer.finish()?;

    log::info!(
        "Prefilter kept {} of {} families ({} in crowded clusters, {} too shallow, {} excluded)",
        stats.kept,
        stats.regions_read,
        stats.crowded,
        stats.shallow,
        stats.excluded
    );
    log::debug!("Analysis regions written to {}", out_path.display());

    Ok((out_path, exclusions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn region(start: u32, end: u32, family: &str, watson: u32, crick: u32) -> ReadFamilyRegion {
        ReadFamilyRegion::new("chr1", start, end, family, watson, crick)
    }

    fn run(
        regions: Vec<ReadFamilyRegion>,
        exclusions: &ExclusionTree,
        config: &PrefilterConfig,
    ) -> (Vec<String>, PrefilterStats) {
        let mut kept = Vec::new();
        let stats = filter_regions(regions.into_iter().map(Ok), exclusions, config, |r| {
            kept.push(r.family_id.clone());
            Ok(())
        })
        .unwrap();
        (kept, stats)
    }

    #[test]
    fn test_depth_filters() {
        let regions = vec![
            region(100, 200, "ok", 4, 4),
            region(300, 400, "low_total", 4, 3),
            region(500, 600, "low_watson", 2, 10),
            region(700, 800, "ok2", 10, 10),
        ];
        let (kept, stats) = run(regions, &ExclusionTree::new(), &PrefilterConfig::default());

        assert_eq!(kept, vec!["ok", "ok2"]);
        assert_eq!(stats.shallow, 2);
        assert_eq!(stats.clusters, 4);
    }

    #[test]
    fn test_crowded_clusters_dropped() {
        let config = PrefilterConfig {
            max_overlapping_families: Some(2),
            ..PrefilterConfig::default()
        };
        let regions = vec![
            region(100, 200, "a1", 5, 5),
            region(150, 250, "a2", 5, 5),
            region(199, 300, "a3", 5, 5),
            // overlaps a3 but not the cluster's first region
            region(200, 300, "b1", 5, 5),
            region(210, 300, "b2", 5, 5),
        ];
        let (kept, stats) = run(regions, &ExclusionTree::new(), &config);

        assert_eq!(kept, vec!["b1", "b2"]);
        assert_eq!(stats.crowded, 3);
    }

    #[test]
    fn test_last_cluster_filtered_like_the_rest() {
        let config = PrefilterConfig {
            max_overlapping_families: Some(1),
            ..PrefilterConfig::default()
        };
        let regions = vec![
            region(100, 200, "solo", 5, 5),
            region(300, 400, "c1", 5, 5),
            region(350, 450, "c2", 5, 5),
        ];
        let (kept, _) = run(regions, &ExclusionTree::new(), &config);
        assert_eq!(kept, vec!["solo"]);

        let (kept, _) = run(
            vec![region(100, 200, "shallow", 1, 1)],
            &ExclusionTree::new(),
            &PrefilterConfig::default(),
        );
        assert!(kept.is_empty());
    }

    #[test]
    fn test_unlimited_overlaps() {
        let config = PrefilterConfig::from_caller(&CallerConfig::default(), -1);
        assert_eq!(config.max_overlapping_families, None);

        let regions: Vec<ReadFamilyRegion> = (0..30)
            .map(|i| region(100 + i, 300, &format!("f{}", i), 5, 5))
            .collect();
        let (kept, _) = run(regions, &ExclusionTree::new(), &config);
        assert_eq!(kept.len(), 30);
    }

    #[test]
    fn test_contained_regions_excluded() {
        let mut exclusions = ExclusionTree::new();
        exclusions.insert("chr1", 1000, 2000);

        let regions = vec![
            region(1100, 1200, "inside", 5, 5),
            region(1950, 2050, "straddles", 5, 5),
        ];
        let (kept, stats) = run(regions, &exclusions, &PrefilterConfig::default());
        assert_eq!(kept, vec!["straddles"]);
        assert_eq!(stats.excluded, 1);
    }

    #[test]
    fn test_prefilter_bed_file() {
        let dir = tempdir().unwrap();
        let bed = dir.path().join("families.bed");
        let mut file = std::fs::File::create(&bed).unwrap();
        writeln!(file, "chr1\t100\t200\tfam1\t0\t+\t5\t5").unwrap();
        writeln!(file, "chr1\t500\t600\tfam2\t0\t+\t5\t5").unwrap();
        writeln!(file, "chr1\t900\t950\tfam3\t0\t+\t1\t9").unwrap();
        drop(file);

        let exclude = dir.path().join("exclude.bed");
        std::fs::write(&exclude, "chr1\t450\t700\n").unwrap();

        let (out, tree) =
            prefilter_bed_file(&bed, &[exclude], &PrefilterConfig::default()).unwrap();
        assert_eq!(out, dir.path().join("families.analysis.bed"));
        assert_eq!(tree.len(), 1);

        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written, "chr1\t100\t200\tfam1\t0\t+\t5\t5\n");
    }
}
