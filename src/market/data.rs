//! Synthetic population generation and JSON persistence.
//!
//! Positions are drawn inside a configurable bounding box; the defaults
//! reproduce the value and cost distributions of the urban traces the
//! simulator was calibrated on.

use anyhow::{Context, Result as AnyResult};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, LogNormal};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::error::{Error, Result};
use crate::market::behavior::{
    Behavior, FrugalTreeKind, RATIONALITY_MAX, RATIONALITY_MIN, RATIONALITY_THRESHOLD_HIGH,
    RATIONALITY_THRESHOLD_LOW, RATIONALITY_THRESHOLD_MEDIUM,
};
use crate::market::reputation::Beliefs;
use crate::market::types::{GeoPos, Task, TaskId, Worker, WorkerId};
use crate::market::utils::{clamp01, lerp};

pub const VALUE_LOG_MEAN: f64 = 1.8;
pub const VALUE_LOG_STD: f64 = 0.6;
pub const VALUE_MIN: f64 = 1.8;
pub const VALUE_MAX: f64 = 15.0;
pub const COST_PER_KM_MIN: f64 = 0.45;
pub const COST_PER_KM_MAX: f64 = 0.70;

const DEFAULT_LAT_RANGE: (f64, f64) = (40.40, 40.46);
const DEFAULT_LON_RANGE: (f64, f64) = (-3.74, -3.66);

/// How rationality levels are distributed over a generated cohort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RationalityDistribution {
    High,
    #[default]
    Mixed,
    Low,
}

/// Parameters of the high-value task band that carries reliability and
/// quality requirements. Within the band every requirement is interpolated
/// linearly in the normalized task value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CriticalTaskParams {
    /// Fraction of the value range below the critical band.
    pub high_value_threshold_pct: f64,
    pub reliability_range: (f64, f64),
    pub quality_target_range: (f64, f64),
    pub feedback_weight_range: (f64, f64),
}

impl Default for CriticalTaskParams {
    fn default() -> Self {
        Self {
            high_value_threshold_pct: 0.80,
            reliability_range: (0.70, 0.85),
            quality_target_range: (0.40, 0.60),
            feedback_weight_range: (1.5, 2.5),
        }
    }
}

impl CriticalTaskParams {
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.high_value_threshold_pct) {
            return Err(Error::Validation(format!(
                "high_value_threshold_pct must be in [0, 1], got {}",
                self.high_value_threshold_pct
            )));
        }
        let (r0, r1) = self.reliability_range;
        if !(0.0 <= r0 && r0 <= r1 && r1 <= 1.0) {
            return Err(Error::Validation(format!(
                "critical reliability range must satisfy 0 <= min <= max <= 1, got ({r0}, {r1})"
            )));
        }
        let (q0, q1) = self.quality_target_range;
        if !(0.0 <= q0 && q0 <= q1 && q1 <= 1.0) {
            return Err(Error::Validation(format!(
                "critical quality-target range must satisfy 0 <= min <= max <= 1, got ({q0}, {q1})"
            )));
        }
        let (w0, w1) = self.feedback_weight_range;
        if w0 < 0.0 || w1 < w0 {
            return Err(Error::Validation(format!(
                "critical feedback-weight range must satisfy 0 <= min <= max, got ({w0}, {w1})"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGenParams {
    pub count: usize,
    pub lat_range: Option<(f64, f64)>,
    pub lon_range: Option<(f64, f64)>,
    /// Uniform value range; LogNormal(1.8, 0.6) clamped into [1.8, 15] when
    /// absent.
    pub value_range: Option<(f64, f64)>,
    /// Fraction of tasks flagged as community tasks.
    pub community_fraction: f64,
    /// High-value tasks get reliability/quality requirements when set.
    pub critical: Option<CriticalTaskParams>,
}

impl Default for TaskGenParams {
    fn default() -> Self {
        Self {
            count: 40,
            lat_range: None,
            lon_range: None,
            value_range: None,
            community_fraction: 0.0,
            critical: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerGenParams {
    pub count: usize,
    pub lat_range: Option<(f64, f64)>,
    pub lon_range: Option<(f64, f64)>,
    pub cost_per_km_range: Option<(f64, f64)>,
    /// `None` generates truthful cost-bidders without a behavioral profile.
    pub rationality: Option<RationalityDistribution>,
    pub tree_kind: FrugalTreeKind,
    /// Attach fresh Bayesian beliefs to every worker.
    pub with_beliefs: bool,
    /// Spread workers over a 5x5 grid of the bounding box instead of
    /// sampling positions uniformly.
    pub stratified: bool,
}

impl Default for WorkerGenParams {
    fn default() -> Self {
        Self {
            count: 60,
            lat_range: None,
            lon_range: None,
            cost_per_km_range: None,
            rationality: None,
            tree_kind: FrugalTreeKind::default(),
            with_beliefs: false,
            stratified: true,
        }
    }
}

pub fn generate_tasks(params: &TaskGenParams, rng: &mut StdRng) -> Result<Vec<Task>> {
    let (lat0, lat1) = params.lat_range.unwrap_or(DEFAULT_LAT_RANGE);
    let (lon0, lon1) = params.lon_range.unwrap_or(DEFAULT_LON_RANGE);
    if let Some(critical) = &params.critical {
        critical.validate()?;
    }
    let lognormal = LogNormal::new(VALUE_LOG_MEAN, VALUE_LOG_STD)
        .map_err(|e| Error::Validation(format!("task value distribution: {e}")))?;
    let (value_lo, value_hi) = params.value_range.unwrap_or((VALUE_MIN, VALUE_MAX));

    let mut tasks = Vec::with_capacity(params.count);
    let mut critical_count = 0usize;
    for i in 1..=params.count {
        let pos = GeoPos::new(
            rng.random_range(lat0..lat1),
            rng.random_range(lon0..lon1),
        )?;
        let value = match params.value_range {
            Some((lo, hi)) => rng.random_range(lo..hi),
            None => lognormal.sample(rng).clamp(VALUE_MIN, VALUE_MAX),
        };
        let community = params.community_fraction > 0.0
            && rng.random::<f64>() < params.community_fraction;
        let mut task = Task::new(TaskId(i as u32), pos, value)?.with_community(community);
        if let Some(critical) = &params.critical {
            let threshold =
                value_lo + (value_hi - value_lo) * critical.high_value_threshold_pct;
            if value >= threshold {
                let band = (value_hi - threshold).max(1e-9);
                let normalized = clamp01((value - threshold) / band);
                let (r0, r1) = critical.reliability_range;
                let (q0, q1) = critical.quality_target_range;
                let (w0, w1) = critical.feedback_weight_range;
                task = task
                    .with_required_reliability(lerp(r0, r1, normalized))?
                    .with_quality_target(lerp(q0, q1, normalized))?
                    .with_feedback_weight(lerp(w0, w1, normalized))?;
                critical_count += 1;
            }
        }
        tasks.push(task);
    }
    if params.critical.is_some() {
        info!(
            "generated {} tasks, {} critical",
            tasks.len(),
            critical_count
        );
    }
    Ok(tasks)
}

fn draw_rationality(distribution: RationalityDistribution, rng: &mut StdRng) -> f64 {
    match distribution {
        RationalityDistribution::High => {
            rng.random_range(RATIONALITY_THRESHOLD_HIGH..RATIONALITY_MAX)
        }
        RationalityDistribution::Mixed => {
            let r = rng.random::<f64>();
            if r < 0.25 {
                rng.random_range(RATIONALITY_THRESHOLD_HIGH..RATIONALITY_MAX)
            } else if r < 0.50 {
                rng.random_range(RATIONALITY_THRESHOLD_MEDIUM..RATIONALITY_THRESHOLD_HIGH)
            } else if r < 0.80 {
                rng.random_range(RATIONALITY_THRESHOLD_LOW..RATIONALITY_THRESHOLD_MEDIUM)
            } else {
                rng.random_range(RATIONALITY_MIN..RATIONALITY_THRESHOLD_LOW)
            }
        }
        RationalityDistribution::Low => {
            rng.random_range(RATIONALITY_MIN..RATIONALITY_THRESHOLD_MEDIUM)
        }
    }
}

/// Generate a worker cohort sorted by id. `global_seed` feeds the
/// worker-local RNG derivation and therefore pins every worker's private
/// random stream.
pub fn generate_workers(
    params: &WorkerGenParams,
    global_seed: u64,
    rng: &mut StdRng,
) -> Result<Vec<Worker>> {
    let (lat0, lat1) = params.lat_range.unwrap_or(DEFAULT_LAT_RANGE);
    let (lon0, lon1) = params.lon_range.unwrap_or(DEFAULT_LON_RANGE);
    let (cost_lo, cost_hi) = params
        .cost_per_km_range
        .unwrap_or((COST_PER_KM_MIN, COST_PER_KM_MAX));
    if cost_lo <= 0.0 || cost_hi < cost_lo {
        return Err(Error::Validation(format!(
            "cost_per_km range must satisfy 0 < min <= max, got ({cost_lo}, {cost_hi})"
        )));
    }

    let mut workers = Vec::with_capacity(params.count);
    for i in 1..=params.count {
        let id = WorkerId(i as u32);
        let pos = if params.stratified {
            stratified_position(i - 1, (lat0, lat1), (lon0, lon1), rng)?
        } else {
            GeoPos::new(
                rng.random_range(lat0..lat1),
                rng.random_range(lon0..lon1),
            )?
        };
        let cost_per_km = rng.random_range(cost_lo..cost_hi);
        let mut worker = Worker::new(id, pos, cost_per_km)?;
        if let Some(distribution) = params.rationality {
            let rationality = draw_rationality(distribution, rng);
            worker = worker.with_behavior(Behavior::new(
                id,
                rationality,
                params.tree_kind,
                global_seed,
            )?);
        }
        if params.with_beliefs {
            worker = worker.with_beliefs(Beliefs::new());
        }
        workers.push(worker);
    }
    Ok(workers)
}

/// Place the i-th worker uniformly inside cell i mod 25 of a 5x5 grid,
/// sweeping the grid row-major so the cohort covers the whole box.
fn stratified_position(
    index: usize,
    (lat0, lat1): (f64, f64),
    (lon0, lon1): (f64, f64),
    rng: &mut StdRng,
) -> Result<GeoPos> {
    const N: usize = 5;
    let cell = index % (N * N);
    let row = cell / N;
    let col = cell % N;
    let lat_step = (lat1 - lat0) / N as f64;
    let lon_step = (lon1 - lon0) / N as f64;
    let lat_lo = lat0 + row as f64 * lat_step;
    let lon_lo = lon0 + col as f64 * lon_step;
    GeoPos::new(
        rng.random_range(lat_lo..lat_lo + lat_step),
        rng.random_range(lon_lo..lon_lo + lon_step),
    )
}

pub fn load_tasks(path: &Path) -> AnyResult<Vec<Task>> {
    let json = fs::read_to_string(path).context("Failed to read tasks file")?;
    let tasks: Vec<Task> = serde_json::from_str(&json).context("Failed to parse tasks json")?;
    Ok(tasks)
}

pub fn save_tasks(tasks: &[Task], path: &Path) -> AnyResult<()> {
    let json = serde_json::to_string_pretty(tasks).context("Failed to serialize tasks")?;
    fs::write(path, json).context("Failed to write tasks file")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn task_values_stay_in_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        let params = TaskGenParams {
            count: 200,
            ..Default::default()
        };
        let tasks = generate_tasks(&params, &mut rng).unwrap();
        assert_eq!(tasks.len(), 200);
        for t in &tasks {
            assert!((VALUE_MIN..=VALUE_MAX).contains(&t.value));
            assert!(t.required_reliability.is_none());
        }
    }

    #[test]
    fn generation_is_deterministic_per_seed() {
        let params = TaskGenParams::default();
        let a = generate_tasks(&params, &mut StdRng::seed_from_u64(7)).unwrap();
        let b = generate_tasks(&params, &mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.value, y.value);
            assert_eq!(x.pos, y.pos);
        }
    }

    #[test]
    fn critical_band_carries_requirements() {
        let mut rng = StdRng::seed_from_u64(3);
        let params = TaskGenParams {
            count: 300,
            value_range: Some((2.0, 12.0)),
            critical: Some(CriticalTaskParams::default()),
            ..Default::default()
        };
        let tasks = generate_tasks(&params, &mut rng).unwrap();
        let threshold = 2.0 + 10.0 * 0.80;
        let mut saw_critical = false;
        for t in &tasks {
            if t.value >= threshold {
                saw_critical = true;
                let r = t.required_reliability.unwrap();
                let q = t.quality_target.unwrap();
                assert!((0.70..=0.85).contains(&r));
                assert!((0.40..=0.60).contains(&q));
                assert!((1.5..=2.5).contains(&t.feedback_weight));
            } else {
                assert!(t.required_reliability.is_none());
                assert!(t.quality_target.is_none());
                assert_eq!(t.feedback_weight, 1.0);
            }
        }
        assert!(saw_critical);
    }

    #[test]
    fn truthful_workers_have_no_profile() {
        let mut rng = StdRng::seed_from_u64(5);
        let params = WorkerGenParams {
            count: 10,
            ..Default::default()
        };
        let workers = generate_workers(&params, 42, &mut rng).unwrap();
        assert_eq!(workers.len(), 10);
        for w in &workers {
            assert!(w.behavior.is_none());
            assert!(w.beliefs.is_none());
            assert!((COST_PER_KM_MIN..=COST_PER_KM_MAX).contains(&w.cost_per_km));
        }
    }

    #[test]
    fn rationality_bands_respect_the_distribution() {
        let mut rng = StdRng::seed_from_u64(11);
        let params = WorkerGenParams {
            count: 100,
            rationality: Some(RationalityDistribution::High),
            with_beliefs: true,
            ..Default::default()
        };
        let workers = generate_workers(&params, 42, &mut rng).unwrap();
        for w in &workers {
            let rho = w.rationality().unwrap();
            assert!((RATIONALITY_THRESHOLD_HIGH..RATIONALITY_MAX).contains(&rho));
            assert!(w.beliefs.is_some());
        }
    }

    #[test]
    fn worker_ids_are_ascending() {
        let mut rng = StdRng::seed_from_u64(2);
        let params = WorkerGenParams {
            count: 30,
            rationality: Some(RationalityDistribution::Mixed),
            ..Default::default()
        };
        let workers = generate_workers(&params, 0, &mut rng).unwrap();
        for (i, w) in workers.iter().enumerate() {
            assert_eq!(w.id, WorkerId(i as u32 + 1));
        }
    }
}
