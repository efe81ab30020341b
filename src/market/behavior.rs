//! Bounded-rationality layer: heuristic task selection, bid noise and the
//! moral-hazard/blacklist machinery.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::market::types::{GeoPos, HonestyProfile, Task, Worker, WorkerId};
use crate::market::utils::{mean, std_dev};

pub const RATIONALITY_MIN: f64 = 0.30;
pub const RATIONALITY_MAX: f64 = 0.90;
pub const RATIONALITY_THRESHOLD_HIGH: f64 = 0.825;
pub const RATIONALITY_THRESHOLD_MEDIUM: f64 = 0.65;
pub const RATIONALITY_THRESHOLD_LOW: f64 = 0.475;

pub const THETA_D_MIN_KM: f64 = 0.5;
pub const THETA_D_MAX_KM: f64 = 4.0;
pub const THETA_R_MIN_EURO: f64 = 10.0;
pub const THETA_R_MAX_EURO: f64 = 120.0;
pub const EXPECTED_PAYMENT_FACTOR: f64 = 0.7;

pub const DEVIATION_PROB_MIN: f64 = 0.02;
pub const DEVIATION_PROB_MAX: f64 = 0.20;
pub const ATTENTION_KAPPA: f64 = 0.5;

pub const DEFECTION_BASE_MAX: f64 = 0.35;
pub const DEFECTION_GAMMA: f64 = 2.0;

pub const BETA_REPUTATION: f64 = 0.6;
pub const REPUTATION_DECAY: f64 = 0.85;
pub const DETECTION_PROBABILITY: f64 = 0.50;
pub const PENALTY_FACTOR: f64 = 2.0;

pub const BLACKLIST_STRIKES_THRESHOLD: u32 = 3;
pub const BLACKLIST_BASE_DURATION_H: f64 = 2.0;
pub const BLACKLIST_MAX_DURATION_H: f64 = 24.0;

pub const MAX_BUNDLE_TASKS: usize = 5;

/// Baseline defection probability, decaying exponentially in rationality.
/// Assumes the rationality level was validated at construction.
pub fn defection_baseline(rationality: f64) -> f64 {
    DEFECTION_BASE_MAX * (-DEFECTION_GAMMA * rationality).exp()
}

/// Probability of bypassing the selection heuristic entirely.
pub fn deviation_probability(rationality: f64) -> f64 {
    let range = DEVIATION_PROB_MAX - DEVIATION_PROB_MIN;
    (DEVIATION_PROB_MIN + range * (1.0 - rationality).powf(ATTENTION_KAPPA))
        .clamp(0.0, DEVIATION_PROB_MAX)
}

/// Dynamic anomaly threshold for relative bid deviations: mean + 3 sigma of
/// the observed |bid - cost| / cost, clipped into [0.10, 0.25]. Falls back
/// to 0.15 when no worker has a usable cost.
pub fn anomaly_threshold(workers: &[Worker]) -> f64 {
    let deviations: Vec<f64> = workers
        .iter()
        .filter(|w| w.cost > 1e-6)
        .map(|w| (w.bid - w.cost).abs() / w.cost)
        .collect();
    if deviations.is_empty() {
        return 0.15;
    }
    (mean(&deviations) + 3.0 * std_dev(&deviations)).clamp(0.10, 0.25)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cue {
    Distance,
    Reward,
    Community,
}

impl Cue {
    fn letter(&self) -> char {
        match self {
            Cue::Distance => 'D',
            Cue::Reward => 'R',
            Cue::Community => 'C',
        }
    }
}

/// Fast-and-frugal tree variants, named by how they resolve a cue outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FrugalTreeKind {
    /// Any passing cue accepts; only a full miss rejects.
    #[default]
    LenientPectinate,
    /// Any failing cue rejects; only a full pass accepts.
    StrictPectinate,
    /// A passing cue accepts, a failing one defers; exhausting the cues
    /// rejects.
    ZigzagAccept,
    /// A failing cue rejects, a passing one defers; exhausting the cues
    /// rejects as well.
    ZigzagReject,
}

impl FrugalTreeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LenientPectinate => "LenientPectinate",
            Self::StrictPectinate => "StrictPectinate",
            Self::ZigzagAccept => "ZigzagAccept",
            Self::ZigzagReject => "ZigzagReject",
        }
    }
}

impl std::fmt::Display for FrugalTreeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const CUE_RANKINGS: [[Cue; 3]; 6] = [
    [Cue::Distance, Cue::Community, Cue::Reward],
    [Cue::Distance, Cue::Reward, Cue::Community],
    [Cue::Reward, Cue::Distance, Cue::Community],
    [Cue::Reward, Cue::Community, Cue::Distance],
    [Cue::Community, Cue::Reward, Cue::Distance],
    [Cue::Community, Cue::Distance, Cue::Reward],
];

/// Behavioral profile of a bounded-rationality worker.
///
/// Carries its own RNG seeded from the worker id and the experiment seed so
/// every worker's random stream is reproducible independently of iteration
/// order.
#[derive(Debug, Clone)]
pub struct Behavior {
    pub rationality: f64,
    pub profile: HonestyProfile,
    pub reputation: f64,
    pub defect_base: f64,
    pub defect_prob: f64,
    pub deviation_prob: f64,
    pub tree_kind: FrugalTreeKind,
    pub cue_ranking: [Cue; 3],
    pub distance_threshold_km: f64,
    pub reward_threshold: f64,
    pub prefers_community: bool,
    pub penalty_accumulated: f64,
    pub strikes: u32,
    pub blacklisted_until: Option<u64>,
    pub completed: bool,
    pub actually_completed: bool,
    pub data_quality: f64,
    pub rng: StdRng,
}

impl Behavior {
    pub fn new(
        worker_id: WorkerId,
        rationality: f64,
        tree_kind: FrugalTreeKind,
        global_seed: u64,
    ) -> Result<Self> {
        if !(RATIONALITY_MIN..=RATIONALITY_MAX).contains(&rationality) {
            return Err(Error::Validation(format!(
                "rationality out of [{RATIONALITY_MIN}, {RATIONALITY_MAX}]: {rationality:.4}"
            )));
        }
        let seed = ((worker_id.0 as u64)
            .wrapping_mul(31337)
            .wrapping_add(global_seed))
            % (1 << 31);
        let mut rng = StdRng::seed_from_u64(seed);
        let cue_ranking = CUE_RANKINGS[rng.random_range(0..CUE_RANKINGS.len())];
        let distance_threshold_km = rng.random_range(THETA_D_MIN_KM..THETA_D_MAX_KM);
        let reward_threshold = rng.random_range(THETA_R_MIN_EURO..THETA_R_MAX_EURO);
        let prefers_community = rng.random::<bool>();
        Ok(Self {
            rationality,
            profile: HonestyProfile::from_rationality(rationality),
            reputation: 1.0,
            defect_base: defection_baseline(rationality),
            defect_prob: defection_baseline(rationality),
            deviation_prob: deviation_probability(rationality),
            tree_kind,
            cue_ranking,
            distance_threshold_km,
            reward_threshold,
            prefers_community,
            penalty_accumulated: 0.0,
            strikes: 0,
            blacklisted_until: None,
            completed: false,
            actually_completed: false,
            data_quality: 1.0,
            rng,
        })
    }

    /// Relative bid deviation ~ Normal(mu, sigma) clipped into [-0.15, 0.15].
    /// Less rational workers bid with a larger and noisier markup.
    pub fn draw_bid_deviation(&mut self) -> Result<f64> {
        let (mu, sigma) = if self.rationality < RATIONALITY_THRESHOLD_LOW {
            (0.03, 0.08 * (1.0 - self.rationality))
        } else {
            (
                0.02 + 0.06 * (1.0 - self.rationality),
                0.03 * (1.0 - self.rationality),
            )
        };
        let normal = Normal::new(mu, sigma)
            .map_err(|e| Error::InvalidBid(format!("bid deviation distribution: {e}")))?;
        Ok(normal.sample(&mut self.rng).clamp(-0.15, 0.15))
    }

    /// Run one task through the tree. Returns the decision and the cue that
    /// settled it (`None` when a zigzag tree fell through undecided).
    pub fn evaluate_cues(
        &self,
        dist_km: f64,
        expected_reward: f64,
        is_community: bool,
    ) -> (bool, Option<Cue>) {
        for (idx, cue) in self.cue_ranking.iter().enumerate() {
            let outcome = match cue {
                Cue::Distance => dist_km <= self.distance_threshold_km,
                Cue::Reward => expected_reward >= self.reward_threshold,
                Cue::Community => is_community == self.prefers_community,
            };
            let is_last = idx == self.cue_ranking.len() - 1;
            match self.tree_kind {
                FrugalTreeKind::LenientPectinate => {
                    if outcome {
                        return (true, Some(*cue));
                    }
                    if is_last {
                        return (false, Some(*cue));
                    }
                }
                FrugalTreeKind::StrictPectinate => {
                    if !outcome {
                        return (false, Some(*cue));
                    }
                    if is_last {
                        return (true, Some(*cue));
                    }
                }
                FrugalTreeKind::ZigzagAccept => {
                    if outcome {
                        return (true, Some(*cue));
                    }
                }
                FrugalTreeKind::ZigzagReject => {
                    if !outcome {
                        return (false, Some(*cue));
                    }
                }
            }
        }
        warn!("fast-and-frugal tree fell through without a decision, rejecting task");
        (false, None)
    }

    /// Pick a bundle from the offered tasks. With the deviation probability
    /// the heuristic is bypassed and a uniform random subset is taken;
    /// otherwise tasks are screened in offer order until the bundle is full.
    pub fn select_bundle(&mut self, pos: &GeoPos, offers: &[Task]) -> Vec<Task> {
        if self.rng.random::<f64>() < self.deviation_prob {
            let k = MAX_BUNDLE_TASKS.min(offers.len());
            let picked = rand::seq::index::sample(&mut self.rng, offers.len(), k);
            return picked.iter().map(|i| offers[i].clone()).collect();
        }
        let mut selected = Vec::new();
        for task in offers {
            let expected_reward = task.value * EXPECTED_PAYMENT_FACTOR;
            let dist_km = pos.distance_m(&task.pos) / 1000.0;
            let (accept, _) = self.evaluate_cues(dist_km, expected_reward, task.community);
            if accept {
                selected.push(task.clone());
                if selected.len() >= MAX_BUNDLE_TASKS {
                    break;
                }
            }
        }
        selected
    }

    pub fn record_strike(&mut self, worker_id: WorkerId, now_s: u64) {
        self.strikes += 1;
        if self.strikes >= BLACKLIST_STRIKES_THRESHOLD {
            let exponent = self.strikes - BLACKLIST_STRIKES_THRESHOLD;
            let duration_h = (BLACKLIST_BASE_DURATION_H * 2f64.powi(exponent as i32))
                .min(BLACKLIST_MAX_DURATION_H);
            self.blacklisted_until = Some(now_s + (duration_h * 3600.0) as u64);
            warn!(
                "worker {} blacklisted for {:.1} h (strike {})",
                worker_id, duration_h, self.strikes
            );
        }
    }

    pub fn is_eligible_at(&self, now_s: u64) -> bool {
        match self.blacklisted_until {
            None => true,
            Some(until) => now_s > until,
        }
    }

    /// Compact label of the assigned heuristic, e.g. `(DCR,StrictPectinate)`.
    pub fn tree_label(&self) -> String {
        let letters: String = self.cue_ranking.iter().map(|c| c.letter()).collect();
        format!("({},{})", letters, self.tree_kind)
    }
}
