//! Run file: a YAML list of jobs plus shared settings.
//!
//! ```yaml
//! threads: 4
//! storage:
//!   endpoint: ${S3_ENDPOINT:-http://localhost:9000}
//!   bucket: rasters
//! jobs:
//!   - mode: mask
//!     input: [dem.asc]
//!     mask: basin.asc
//!   - mode: stats
//!     input: dem_masked.asc
//! ```
//!
//! `${VAR}` and `${VAR:-default}` are substituted from the environment
//! before parsing.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use raster_storage::ObjectStorageConfig;
use serde::{Deserialize, Serialize};

use crate::jobs::Job;

/// Masks kept in memory across the jobs of one run.
pub const DEFAULT_MASK_CACHE: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Worker threads for grid computations (default: one per core).
    pub threads: Option<usize>,
    /// Object storage used by jobs with a `blob` target.
    pub storage: Option<ObjectStorageConfig>,
    pub mask_cache_size: usize,
    pub jobs: Vec<Job>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            threads: None,
            storage: None,
            mask_cache_size: DEFAULT_MASK_CACHE,
            jobs: Vec::new(),
        }
    }
}

impl RunConfig {
    /// Load a run file, expanding environment variables first.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read run file {:?}", path.as_ref()))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid run file {:?}", path.as_ref()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content)?;
        let config: Self = serde_yaml::from_str(&expanded).context("Failed to parse run file YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.threads == Some(0) {
            anyhow::bail!("threads must be > 0");
        }
        if let Some(storage) = &self.storage {
            storage.validate().map_err(anyhow::Error::msg)?;
        }
        Ok(())
    }
}

/// Expand `${VAR}` and `${VAR:-default}`.
fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .with_context(|| format!("Unclosed variable substitution: ${{{}", after))?;
        result.push_str(&resolve_var_expr(&after[..end])?);
        rest = &after[end + 1..];
    }
    result.push_str(rest);

    Ok(result)
}

fn resolve_var_expr(expr: &str) -> Result<String> {
    if let Some((var_name, default)) = expr.split_once(":-") {
        match std::env::var(var_name.trim()) {
            Ok(val) if !val.is_empty() => Ok(val),
            _ => Ok(default.to_string()),
        }
    } else {
        std::env::var(expr.trim()).with_context(|| format!("Environment variable {} not set", expr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_job_list() {
        let yaml = r#"
threads: 2
jobs:
  - mode: mask
    input: [a.asc, b.asc]
    mask: m.asc
    default: 0
  - mode: decompose
    input: a.asc
    mask: m.asc
    output: parts/a.asc
    group: "1=1,2=1"
  - mode: stats
    input: a.asc
"#;
        let config = RunConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.threads, Some(2));
        assert_eq!(config.mask_cache_size, DEFAULT_MASK_CACHE);
        assert_eq!(config.jobs.len(), 3);
        match &config.jobs[0] {
            Job::Mask(job) => {
                assert_eq!(job.input.len(), 2);
                assert_eq!(job.default, Some(0.0));
                assert!(job.output.is_none());
            }
            other => panic!("unexpected job {:?}", other),
        }
        assert!(matches!(&config.jobs[2], Job::Stats(job) if job.mask.is_none()));
    }

    #[test]
    fn test_zero_threads_rejected() {
        assert!(RunConfig::from_yaml("threads: 0\n").is_err());
    }

    #[test]
    fn test_env_defaults_expand() {
        let out = expand_env_vars("bucket: ${RASTER_TOOLS_UNSET_VAR:-grids}").unwrap();
        assert_eq!(out, "bucket: grids");
        assert!(expand_env_vars("x: ${RASTER_TOOLS_UNSET_VAR}").is_err());
        assert!(expand_env_vars("x: ${OPEN").is_err());
    }
}
