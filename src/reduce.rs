//! # Reductions
//!
//! Statistical reductions over materialized hyperslabs. NaN marks a missing
//! value (decoded fill values included) and is skipped by every operation.
//! An operation over no valid values yields NaN, except `count`, which
//! yields 0.

use crate::selection::Coordinate;
use ndarray::{ArrayD, IxDyn};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    Mean,
    Sum,
    Max,
    Min,
    /// Population standard deviation
    Std,
    Count,
}

impl FromStr for Reduction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mean" | "avg" => Ok(Reduction::Mean),
            "sum" => Ok(Reduction::Sum),
            "max" => Ok(Reduction::Max),
            "min" => Ok(Reduction::Min),
            "std" => Ok(Reduction::Std),
            "count" => Ok(Reduction::Count),
            other => Err(format!(
                "Unknown reduction '{}', expected one of mean, sum, max, min, std, count",
                other
            )),
        }
    }
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Reduction::Mean => "mean",
            Reduction::Sum => "sum",
            Reduction::Max => "max",
            Reduction::Min => "min",
            Reduction::Std => "std",
            Reduction::Count => "count",
        };
        write!(f, "{}", name)
    }
}

/// Keeps only values compared true against a constant, e.g. `>2000`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum Threshold {
    Greater(f64),
    GreaterEq(f64),
    Less(f64),
    LessEq(f64),
}

impl Threshold {
    pub fn accepts(&self, value: f64) -> bool {
        match *self {
            Threshold::Greater(t) => value > t,
            Threshold::GreaterEq(t) => value >= t,
            Threshold::Less(t) => value < t,
            Threshold::LessEq(t) => value <= t,
        }
    }
}

impl FromStr for Threshold {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (ctor, rest): (fn(f64) -> Threshold, &str) = if let Some(rest) = s.strip_prefix(">=") {
            (Threshold::GreaterEq, rest)
        } else if let Some(rest) = s.strip_prefix("<=") {
            (Threshold::LessEq, rest)
        } else if let Some(rest) = s.strip_prefix('>') {
            (Threshold::Greater, rest)
        } else if let Some(rest) = s.strip_prefix('<') {
            (Threshold::Less, rest)
        } else {
            return Err(format!("Threshold '{}' must start with >, >=, < or <=", s));
        };
        rest.trim()
            .parse::<f64>()
            .map(ctor)
            .map_err(|_| format!("Invalid threshold value in '{}'", s))
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Threshold::Greater(t) => write!(f, ">{}", t),
            Threshold::GreaterEq(t) => write!(f, ">={}", t),
            Threshold::Less(t) => write!(f, "<{}", t),
            Threshold::LessEq(t) => write!(f, "<={}", t),
        }
    }
}

/// Result of a reduction
#[derive(Debug, Clone, PartialEq)]
pub enum MaterializedResult {
    Scalar(f64),
    /// Remaining dimensions with their labels
    Array {
        dims: Vec<String>,
        coords: Vec<Coordinate>,
        values: ArrayD<f64>,
    },
}

impl MaterializedResult {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            MaterializedResult::Scalar(value) => Some(*value),
            MaterializedResult::Array { .. } => None,
        }
    }

    pub fn values(&self) -> ArrayD<f64> {
        match self {
            MaterializedResult::Scalar(value) => ArrayD::from_elem(IxDyn(&[]), *value),
            MaterializedResult::Array { values, .. } => values.clone(),
        }
    }
}

/// Streaming accumulator, Welford's update for mean and variance.
#[derive(Debug, Clone, Copy)]
struct Accumulator {
    count: usize,
    mean: f64,
    m2: f64,
    sum: f64,
    min: f64,
    max: f64,
}

impl Default for Accumulator {
    fn default() -> Self {
        Accumulator {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl Accumulator {
    fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn finish(&self, op: Reduction) -> f64 {
        if op == Reduction::Count {
            return self.count as f64;
        }
        if self.count == 0 {
            return f64::NAN;
        }
        match op {
            Reduction::Mean => self.mean,
            Reduction::Sum => self.sum,
            Reduction::Max => self.max,
            Reduction::Min => self.min,
            Reduction::Std => (self.m2 / self.count as f64).sqrt(),
            Reduction::Count => self.count as f64,
        }
    }
}

/// Reduces `values` over the axes flagged in `reduce_axes`. The result keeps
/// the remaining axes in order; reducing every axis gives a 0-d array.
pub fn reduce_axes(
    values: &ArrayD<f64>,
    reduce_axes: &[bool],
    op: Reduction,
    threshold: Option<Threshold>,
) -> ArrayD<f64> {
    let kept: Vec<usize> = (0..values.ndim()).filter(|&ax| !reduce_axes[ax]).collect();
    let out_shape: Vec<usize> = kept.iter().map(|&ax| values.shape()[ax]).collect();
    let out_len: usize = out_shape.iter().product();
    let mut accumulators = vec![Accumulator::default(); out_len];

    for (idx, &value) in values.indexed_iter() {
        if value.is_nan() || !threshold.is_none_or(|t| t.accepts(value)) {
            continue;
        }
        let mut flat = 0;
        for (&ax, &len) in kept.iter().zip(&out_shape) {
            flat = flat * len + idx[ax];
        }
        accumulators[flat].push(value);
    }

    let reduced: Vec<f64> = accumulators.iter().map(|acc| acc.finish(op)).collect();
    // out_len is the product of out_shape, so the shape always fits.
    ArrayD::from_shape_vec(IxDyn(&out_shape), reduced)
        .unwrap_or_else(|_| ArrayD::from_elem(IxDyn(&out_shape), f64::NAN))
}
