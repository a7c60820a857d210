//! The four modes of the tool, usable both as subcommands and as run-file jobs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use raster_common::{ScalarKind, NODATA_VALUE};
use raster_core::{CombineOptions, GridOptions, GroupId, Mask, RasterGrid, ReclassMap, Statistics};
use raster_storage::{
    load_subset_files, read_grid, read_grid_layers, store_grid_blob, write_combined, write_grid,
    write_subsets, GridPath, MaskCache, ObjectStorageConfig, ObjectStoreBackend, WriteOptions,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

/// Element type grids are processed in.
type Cell = f32;

#[derive(Debug, Clone, PartialEq, Subcommand, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Job {
    /// Mask input grid(s) to the extent of a mask grid
    Mask(MaskJob),
    /// Split a grid into one file per mask subset
    Decompose(DecomposeJob),
    /// Merge subset files back into one grid
    Combine(CombineJob),
    /// Print statistics of a grid as JSON
    Stats(StatsJob),
}

#[derive(Debug, Clone, PartialEq, Args, Serialize, Deserialize)]
pub struct MaskJob {
    /// Input grid(s), separated by ';'. Several files become layers.
    #[arg(short, long, value_delimiter = ';', required = true)]
    pub input: Vec<PathBuf>,

    /// Mask grid
    #[arg(short, long)]
    pub mask: PathBuf,

    /// Output file (default: <input>_masked.asc)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Value for mask cells the input has no data for
    #[arg(long)]
    pub default: Option<f64>,

    /// Output element type, e.g. INT16 or FLOAT
    #[arg(long)]
    pub out_kind: Option<String>,

    /// Also store the result in object storage under this name
    #[arg(long)]
    pub blob: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Args, Serialize, Deserialize)]
pub struct DecomposeJob {
    /// Input grid
    #[arg(short, long)]
    pub input: PathBuf,

    /// Mask grid whose values define the subsets
    #[arg(short, long)]
    pub mask: PathBuf,

    /// Output name; files are written as <group>_<name>
    #[arg(short, long)]
    pub output: PathBuf,

    /// Regroup mask values, e.g. "1=1,2=2,3=3,4=1"
    #[arg(short, long)]
    pub group: Option<String>,

    /// Output element type
    #[arg(long)]
    pub out_kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Args, Serialize, Deserialize)]
pub struct CombineJob {
    /// Subset files named <group>_<name>, separated by ';'
    #[arg(long, value_delimiter = ';', required = true)]
    pub inputs: Vec<PathBuf>,

    /// Mask grid the subsets were split by
    #[arg(short, long)]
    pub mask: PathBuf,

    /// Output name; the result is written as 0_<name>
    #[arg(short, long)]
    pub output: PathBuf,

    /// Grouping used when splitting
    #[arg(short, long)]
    pub group: Option<String>,

    /// Replace each group by fixed values, e.g. "1=10,2=20:21"
    #[arg(long)]
    pub reclass: Option<String>,

    /// Output element type
    #[arg(long)]
    pub out_kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Args, Serialize, Deserialize)]
pub struct StatsJob {
    /// Input grid
    #[arg(short, long)]
    pub input: PathBuf,

    /// Restrict statistics to a mask
    #[arg(short, long)]
    pub mask: Option<PathBuf>,
}

/// Outcome of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub mode: &'static str,
    pub valid_cells: usize,
    pub outputs: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<Vec<Statistics>>,
}

/// State shared by the jobs of one run.
pub struct JobContext {
    pub masks: MaskCache,
    pub storage: Option<ObjectStorageConfig>,
}

impl JobContext {
    pub fn new(mask_cache_size: usize, storage: Option<ObjectStorageConfig>) -> Self {
        Self {
            masks: MaskCache::new(mask_cache_size),
            storage,
        }
    }

    async fn mask(&self, path: &Path, subsets: bool, grouping: Option<&BTreeMap<i32, GroupId>>) -> Result<Arc<Mask>> {
        self.masks
            .get_or_load(path, subsets, grouping)
            .await
            .with_context(|| format!("Failed to load mask {}", path.display()))
    }
}

impl Job {
    pub fn mode(&self) -> &'static str {
        match self {
            Job::Mask(_) => "mask",
            Job::Decompose(_) => "decompose",
            Job::Combine(_) => "combine",
            Job::Stats(_) => "stats",
        }
    }

    #[instrument(skip_all, fields(mode = self.mode()))]
    pub async fn run(&self, ctx: &JobContext) -> Result<JobReport> {
        let report = match self {
            Job::Mask(job) => job.run(ctx).await?,
            Job::Decompose(job) => job.run(ctx).await?,
            Job::Combine(job) => job.run(ctx).await?,
            Job::Stats(job) => job.run(ctx).await?,
        };
        info!(valid_cells = report.valid_cells, outputs = report.outputs.len(), "Job finished");
        Ok(report)
    }
}

fn write_options(out_kind: Option<&str>) -> Result<WriteOptions> {
    let mut options = WriteOptions::default();
    if let Some(name) = out_kind {
        let kind = ScalarKind::from_str(name);
        if kind == ScalarKind::Unknown {
            bail!("Unknown output kind {:?}", name);
        }
        options = options.with_output_kind(kind);
    }
    Ok(options)
}

/// Parse "value=group,..." pairs.
pub fn parse_grouping(spec: &str) -> Result<BTreeMap<i32, GroupId>> {
    spec.split(',')
        .filter(|pair| !pair.trim().is_empty())
        .map(|pair| {
            let (value, group) = pair
                .split_once('=')
                .with_context(|| format!("Expected value=group, got {:?}", pair))?;
            Ok((
                value.trim().parse().with_context(|| format!("Bad value in {:?}", pair))?,
                group.trim().parse().with_context(|| format!("Bad group in {:?}", pair))?,
            ))
        })
        .collect()
}

/// Parse "group=v1[:v2...],..." where each `:`-separated value is one layer.
pub fn parse_reclass(spec: &str) -> Result<ReclassMap> {
    spec.split(',')
        .filter(|pair| !pair.trim().is_empty())
        .map(|pair| {
            let (key, values) = pair
                .split_once('=')
                .with_context(|| format!("Expected group=value, got {:?}", pair))?;
            let key = key.trim().parse().with_context(|| format!("Bad group in {:?}", pair))?;
            let values = values
                .split(':')
                .map(|v| v.trim().parse::<f64>())
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("Bad value in {:?}", pair))?;
            Ok((key, values))
        })
        .collect()
}

fn grouping(spec: Option<&str>) -> Result<Option<BTreeMap<i32, GroupId>>> {
    spec.map(parse_grouping).transpose()
}

impl MaskJob {
    async fn run(&self, ctx: &JobContext) -> Result<JobReport> {
        let mask = ctx.mask(&self.mask, false, None).await?;
        let mut options = GridOptions::from_env().with_use_mask_extent(true);
        if let Some(default) = self.default {
            options = options.with_default_value(default);
        }
        options.validate().map_err(anyhow::Error::msg)?;

        let grid: RasterGrid<Cell> =
            read_grid_layers(&self.input, Some(mask), options).context("Failed to mask input")?;

        let output = match &self.output {
            Some(path) => path.clone(),
            None => GridPath::masked_path(&self.input[0]),
        };
        let write = write_options(self.out_kind.as_deref())?;
        let outputs = write_grid(&grid, &output, &write)?;

        if let Some(name) = &self.blob {
            let config = ctx.storage.clone().unwrap_or_else(ObjectStorageConfig::from_env);
            let backend = ObjectStoreBackend::new(&config)?;
            store_grid_blob(&backend, name, &grid, &write).await?;
            info!(name = %name, bucket = %config.bucket, "Stored masked grid");
        }

        Ok(JobReport {
            mode: "mask",
            valid_cells: grid.valid_cell_count(),
            outputs,
            statistics: None,
        })
    }
}

impl DecomposeJob {
    async fn run(&self, ctx: &JobContext) -> Result<JobReport> {
        let grouping = grouping(self.group.as_deref())?;
        let mask = ctx.mask(&self.mask, true, grouping.as_ref()).await?;

        let grid: RasterGrid<Cell> = read_grid(&self.input, Some(mask), GridOptions::from_env())
            .with_context(|| format!("Failed to read {}", self.input.display()))?;
        let write = write_options(self.out_kind.as_deref())?;
        let outputs = write_subsets(&grid, &self.output, &CombineOptions::from_origin(), &write)?;

        Ok(JobReport {
            mode: "decompose",
            valid_cells: grid.valid_cell_count(),
            outputs,
            statistics: None,
        })
    }
}

impl CombineJob {
    async fn run(&self, ctx: &JobContext) -> Result<JobReport> {
        let grouping = grouping(self.group.as_deref())?;
        let mask = ctx.mask(&self.mask, true, grouping.as_ref()).await?;

        let nodata = NODATA_VALUE as Cell;
        let mut grid = RasterGrid::from_mask_values(Arc::clone(&mask), vec![nodata; mask.valid_count()], nodata)?;
        let loaded = load_subset_files(&mut grid, &self.inputs)?;
        info!(loaded = loaded.len(), subsets = grid.subsets().len(), "Loaded subset files");

        let mut combine = CombineOptions::default();
        if let Some(spec) = &self.reclass {
            combine = combine.with_reclass(parse_reclass(spec)?);
        } else if loaded.len() < grid.subsets().len() {
            // subsets without a file contribute nothing
            for subset in grid.subsets_mut() {
                if !subset.has_payload() {
                    subset.usable = false;
                }
            }
        }

        let write = write_options(self.out_kind.as_deref())?;
        let outputs = write_combined(&grid, &self.output, &combine, &write)?;

        Ok(JobReport {
            mode: "combine",
            valid_cells: grid.valid_cell_count(),
            outputs,
            statistics: None,
        })
    }
}

impl StatsJob {
    async fn run(&self, ctx: &JobContext) -> Result<JobReport> {
        let mask = match &self.mask {
            Some(path) => Some(ctx.mask(path, false, None).await?),
            None => None,
        };
        let grid: RasterGrid<Cell> = read_grid(&self.input, mask, GridOptions::compressed())
            .with_context(|| format!("Failed to read {}", self.input.display()))?;

        let statistics = (1..=grid.layers())
            .filter_map(|layer| grid.statistics(layer))
            .collect();

        Ok(JobReport {
            mode: "stats",
            valid_cells: grid.valid_cell_count(),
            outputs: Vec::new(),
            statistics: Some(statistics),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raster_storage::{read_full_grid, write_full_grid};
    use test_utils::{asc, create_test_grid, demo_mask_r4c7, unit_header, FixtureDir};

    fn context() -> JobContext {
        JobContext::new(4, None)
    }

    fn write_demo(fixtures: &FixtureDir) -> (PathBuf, PathBuf) {
        let (mask_header, mask_values) = demo_mask_r4c7();
        let mask = fixtures.path("mask.asc");
        write_full_grid(&mask, &mask_header, &mask_values, &WriteOptions::default()).unwrap();
        let input = fixtures.path("values.asc");
        write_full_grid(&input, &unit_header(4, 7), &create_test_grid(7, 4), &WriteOptions::default()).unwrap();
        (mask, input)
    }

    #[test]
    fn test_parse_grouping() {
        let grouping = parse_grouping("1=1, 2=2,3=3,4=1").unwrap();
        assert_eq!(grouping, BTreeMap::from([(1, 1), (2, 2), (3, 3), (4, 1)]));
        assert!(parse_grouping("1:1").is_err());
        assert!(parse_grouping("a=1").is_err());
    }

    #[test]
    fn test_parse_reclass_layers() {
        let reclass = parse_reclass("1=10,2=20:21").unwrap();
        assert_eq!(reclass[&1], vec![10.0]);
        assert_eq!(reclass[&2], vec![20.0, 21.0]);
        assert!(parse_reclass("1=x").is_err());
    }

    #[test]
    fn test_unknown_out_kind() {
        assert!(write_options(Some("COMPLEX64")).is_err());
        assert_eq!(
            write_options(Some("int16")).unwrap().output_kind,
            Some(ScalarKind::Int16)
        );
    }

    #[tokio::test]
    async fn test_mask_job_default_output() {
        let fixtures = FixtureDir::new();
        let (mask, input) = write_demo(&fixtures);
        let job = Job::Mask(MaskJob {
            input: vec![input],
            mask,
            output: None,
            default: None,
            out_kind: Some("INT32".to_string()),
            blob: None,
        });

        let report = job.run(&context()).await.unwrap();
        assert_eq!(report.outputs, vec![fixtures.path("values_masked.asc")]);

        let written = read_full_grid::<i32>(&report.outputs[0]).unwrap();
        assert_eq!(written.values[6], 6000);
        assert_eq!(written.values[1], -9999);
    }

    #[tokio::test]
    async fn test_decompose_then_combine() {
        let fixtures = FixtureDir::new();
        let (mask, input) = write_demo(&fixtures);
        let ctx = context();

        let split = Job::Decompose(DecomposeJob {
            input,
            mask: mask.clone(),
            output: fixtures.path("parts/values.asc"),
            group: Some("1=1,2=2,3=3,4=1".to_string()),
            out_kind: None,
        })
        .run(&ctx)
        .await
        .unwrap();
        assert_eq!(split.outputs.len(), 3);

        let merged = Job::Combine(CombineJob {
            inputs: split.outputs.clone(),
            mask,
            output: fixtures.path("parts/values.asc"),
            group: Some("1=1,2=2,3=3,4=1".to_string()),
            reclass: None,
            out_kind: None,
        })
        .run(&ctx)
        .await
        .unwrap();
        assert_eq!(merged.outputs, vec![fixtures.path("parts/0_values.asc")]);

        let original = create_test_grid(7, 4);
        let (_, mask_values) = demo_mask_r4c7();
        let combined = read_full_grid::<f32>(&merged.outputs[0]).unwrap();
        for (i, &m) in mask_values.iter().enumerate() {
            let expected = if m == -9999 { -9999.0 } else { original[i] };
            assert_eq!(combined.values[i], expected, "cell {}", i);
        }

        // second use of the same mask and grouping came from the cache
        assert_eq!(ctx.masks.stats().await.hits, 1);
    }

    #[tokio::test]
    async fn test_combine_with_missing_subset_file() {
        let fixtures = FixtureDir::new();
        let (mask, input) = write_demo(&fixtures);
        let ctx = context();

        let split = Job::Decompose(DecomposeJob {
            input,
            mask: mask.clone(),
            output: fixtures.path("values.asc"),
            group: None,
            out_kind: None,
        })
        .run(&ctx)
        .await
        .unwrap();

        // drop group 4
        let inputs: Vec<PathBuf> = split.outputs.into_iter().take(3).collect();
        let merged = Job::Combine(CombineJob {
            inputs,
            mask,
            output: fixtures.path("values.asc"),
            group: None,
            reclass: None,
            out_kind: None,
        })
        .run(&ctx)
        .await
        .unwrap();

        let combined = read_full_grid::<f32>(&merged.outputs[0]).unwrap();
        // (2,5) belongs to group 4
        assert_eq!(combined.values[2 * 7 + 5], -9999.0);
        assert_eq!(combined.values[0], 0.0);
    }

    #[tokio::test]
    async fn test_stats_job() {
        let fixtures = FixtureDir::new();
        let input = fixtures.write("tiny.asc", asc::TINY_CENTER);
        let report = Job::Stats(StatsJob { input, mask: None })
            .run(&context())
            .await
            .unwrap();

        assert_eq!(report.valid_cells, 3);
        let stats = report.statistics.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].min, 1.5);
        assert_eq!(stats[0].max, 4.0);

        let json = serde_json::to_value(&stats[0]).unwrap();
        assert_eq!(json["valid_count"], 3);
    }
}
