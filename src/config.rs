//! Runtime configuration for auctions and simulation experiments.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::market::data::{TaskGenParams, WorkerGenParams};

/// Knobs of a single auction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionConfig {
    /// Minimum gain for the greedy selection to commit a worker.
    pub epsilon: f64,
    /// Record per-iteration selection steps and per-winner payment traces.
    pub debug: bool,
    /// Run the mechanism-property suite after the payment phase.
    pub verify_properties: bool,
    /// Seed of the verification RNG (truthfulness samples, submodularity trials).
    pub verification_seed: u64,
    pub submodularity_trials: usize,
    pub truthfulness_samples: usize,
    /// Bid perturbation size: max(delta_min, delta_factor * max(1, |x|)).
    pub delta_factor: f64,
    pub delta_min: f64,
}

impl Default for AuctionConfig {
    fn default() -> Self {
        Self {
            epsilon: 1e-9,
            debug: false,
            verify_properties: true,
            verification_seed: 42,
            submodularity_trials: 100,
            truthfulness_samples: 10,
            delta_factor: 1e-3,
            delta_min: 1e-6,
        }
    }
}

impl AuctionConfig {
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_verify_properties(mut self, verify: bool) -> Self {
        self.verify_properties = verify;
        self
    }

    pub fn with_verification_seed(mut self, seed: u64) -> Self {
        self.verification_seed = seed;
        self
    }

    /// Perturbation applied around a bid or payment when probing the
    /// mechanism properties.
    pub fn perturbation(&self, x: f64) -> f64 {
        (self.delta_factor * x.abs().max(1.0)).max(self.delta_min)
    }
}

/// Which behavioral assumptions the simulation runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Truthful cost-bidders, fresh population every hour, full verification.
    Truthful,
    /// Bounded-rationality cohort: heuristic bundles, noisy bids, moral hazard.
    Bounded,
    /// Bounded cohort plus platform-side Bayesian learning and
    /// reputation-weighted payments.
    Adaptive,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Truthful => "truthful",
            Phase::Bounded => "bounded",
            Phase::Adaptive => "adaptive",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "truthful" => Ok(Phase::Truthful),
            "bounded" => Ok(Phase::Bounded),
            "adaptive" => Ok(Phase::Adaptive),
            other => Err(crate::error::Error::Configuration(format!(
                "unknown phase {other:?}, expected truthful, bounded or adaptive"
            ))),
        }
    }
}

/// A full simulated-day experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    pub phase: Phase,
    /// Day label, used in report file names.
    pub day: String,
    pub hour_start: u32,
    /// Exclusive end hour.
    pub hour_end: u32,
    /// Assignment radius: a worker sees the tasks within this distance.
    pub task_radius_m: f64,
    pub seed: u64,
    pub tasks: TaskGenParams,
    pub workers: WorkerGenParams,
    pub auction: AuctionConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            phase: Phase::Truthful,
            day: "day-01".to_string(),
            hour_start: 0,
            hour_end: 24,
            task_radius_m: 3000.0,
            seed: 42,
            tasks: TaskGenParams::default(),
            workers: WorkerGenParams::default(),
            auction: AuctionConfig::default(),
        }
    }
}

impl SimConfig {
    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_day(mut self, day: impl Into<String>) -> Self {
        self.day = day.into();
        self
    }

    pub fn with_hours(mut self, start: u32, end: u32) -> Self {
        self.hour_start = start;
        self.hour_end = end;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_task_radius_m(mut self, radius_m: f64) -> Self {
        self.task_radius_m = radius_m;
        self
    }
}

pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let value = serde_json::from_str(&json).context("Failed to parse config json")?;
    Ok(value)
}

pub fn save_json<T: Serialize>(value: &T, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(value).context("Failed to serialize config")?;
    fs::write(path, json)
        .with_context(|| format!("Failed to write config file {}", path.display()))?;
    Ok(())
}
