//! Basic per-layer statistics over valid cells.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::scalar::RasterScalar;

/// Which statistic to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatKind {
    ValidCount,
    Mean,
    Min,
    Max,
    Std,
    Range,
}

impl StatKind {
    /// Parse a persisted statistic name (case-insensitive).
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "VALID_CELLNUMBER" | "COUNT" => Some(Self::ValidCount),
            "MEAN" | "AVERAGE" => Some(Self::Mean),
            "MIN" => Some(Self::Min),
            "MAX" => Some(Self::Max),
            "STD" => Some(Self::Std),
            "RANGE" => Some(Self::Range),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidCount => "VALID_CELLNUMBER",
            Self::Mean => "MEAN",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Std => "STD",
            Self::Range => "RANGE",
        }
    }
}

impl std::fmt::Display for StatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Statistics of one layer, computed over cells that are not no-data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub valid_count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
    pub range: f64,
}

impl Statistics {
    /// Statistics of a layer without any valid cell.
    pub fn empty(no_data: f64) -> Self {
        Self {
            valid_count: 0,
            min: no_data,
            max: no_data,
            mean: no_data,
            std: no_data,
            range: no_data,
        }
    }

    pub fn get(&self, kind: StatKind) -> f64 {
        match kind {
            StatKind::ValidCount => self.valid_count as f64,
            StatKind::Mean => self.mean,
            StatKind::Min => self.min,
            StatKind::Max => self.max,
            StatKind::Std => self.std,
            StatKind::Range => self.range,
        }
    }

    /// Compute in two parallel passes: extrema and sum, then squared deviations.
    pub fn compute<T: RasterScalar>(values: &[T], no_data: T) -> Self {
        let acc = values
            .par_iter()
            .filter(|v| !v.same_value(no_data))
            .map(|v| v.as_f64())
            .fold(Accumulator::default, Accumulator::push)
            .reduce(Accumulator::default, Accumulator::merge);

        if acc.count == 0 {
            return Self::empty(no_data.as_f64());
        }

        let mean = acc.sum / acc.count as f64;
        let sq_dev: f64 = values
            .par_iter()
            .filter(|v| !v.same_value(no_data))
            .map(|v| (v.as_f64() - mean).powi(2))
            .sum();

        Self {
            valid_count: acc.count,
            min: acc.min,
            max: acc.max,
            mean,
            std: (sq_dev / acc.count as f64).sqrt(),
            range: acc.max - acc.min,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Accumulator {
    count: usize,
    sum: f64,
    min: f64,
    max: f64,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl Accumulator {
    fn push(mut self, v: f64) -> Self {
        self.count += 1;
        self.sum += v;
        self.min = self.min.min(v);
        self.max = self.max.max(v);
        self
    }

    fn merge(self, other: Self) -> Self {
        Self {
            count: self.count + other.count,
            sum: self.sum + other.sum,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}
