//! Platform-side beliefs about a worker: a Beta posterior over the
//! rationality level plus a two-component (reliability, quality) reputation.
//!
//! The platform never observes the true rationality. It starts from the
//! prior, learns from completion ground truth and task feedback, and feeds
//! the resulting aggregate into effective bids and trust-adjusted payments.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::market::behavior::{RATIONALITY_MAX, RATIONALITY_MIN, REPUTATION_DECAY};
use crate::market::utils::clamp01;

pub const RHO_PRIOR_ALPHA: f64 = 6.5;
pub const RHO_PRIOR_BETA: f64 = 3.5;

pub const WEIGHT_RELIABILITY: f64 = 0.60;
pub const WEIGHT_QUALITY: f64 = 0.40;

pub const KAPPA_RELIABILITY: f64 = 1.0;
pub const TRUST_BONUS: f64 = 0.50;
pub const REPUTATION_BONUS_THRESHOLD: f64 = 0.90;
pub const REPUTATION_MALUS_THRESHOLD: f64 = 0.70;

pub const PENALTY_BASE_FACTOR: f64 = 0.85;
pub const PENALTY_REPUTATION_DECAY: f64 = 0.15;
pub const MIN_PENALTY_FLOOR: f64 = 0.20;
pub const IR_SAFETY_MARGIN: f64 = 0.10;

/// Workers below this aggregate reputation are excluded from auctions.
pub const REPUTATION_MIN_THRESHOLD: f64 = 0.30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beliefs {
    pub alpha: f64,
    pub beta: f64,
    pub estimated_rationality: f64,
    pub observations: u32,
    pub reliability: f64,
    pub quality: f64,
    pub aggregate: f64,
    pub reputation_observations: u32,
}

impl Default for Beliefs {
    fn default() -> Self {
        Self::new()
    }
}

impl Beliefs {
    /// Fresh beliefs: the Beta prior for the rationality estimate, and full
    /// trust (both reputation components at 1.0) until evidence arrives.
    pub fn new() -> Self {
        let mut beliefs = Self {
            alpha: RHO_PRIOR_ALPHA,
            beta: RHO_PRIOR_BETA,
            estimated_rationality: RATIONALITY_MIN,
            observations: 0,
            reliability: 1.0,
            quality: 1.0,
            aggregate: 1.0,
            reputation_observations: 0,
        };
        beliefs.estimated_rationality = beliefs.rationality_estimate();
        beliefs.recalculate_aggregate();
        beliefs
    }

    fn rationality_estimate(&self) -> f64 {
        let total = self.alpha + self.beta;
        if total <= 0.0 {
            return RATIONALITY_MIN;
        }
        let scaled =
            RATIONALITY_MIN + (self.alpha / total) * (RATIONALITY_MAX - RATIONALITY_MIN);
        scaled.clamp(RATIONALITY_MIN, RATIONALITY_MAX)
    }

    fn recalculate_aggregate(&mut self) {
        self.aggregate =
            clamp01(WEIGHT_RELIABILITY * self.reliability + WEIGHT_QUALITY * self.quality);
    }

    /// One observed round for a winner: completion ground truth updates the
    /// Beta posterior and the reliability component, the feedback quality
    /// updates the quality component (forced to zero on a defection).
    pub fn record_round(&mut self, actually_completed: bool, observed_quality: f64) {
        if actually_completed {
            self.alpha += 1.0;
        } else {
            self.beta += 1.0;
        }
        self.observations += 1;
        self.estimated_rationality = self.rationality_estimate();

        let current_weight = 1.0 - REPUTATION_DECAY;
        let obs_reliability = if actually_completed { 1.0 } else { 0.0 };
        self.reliability = REPUTATION_DECAY * self.reliability + current_weight * obs_reliability;
        let obs_quality = if actually_completed { observed_quality } else { 0.0 };
        self.quality = REPUTATION_DECAY * self.quality + current_weight * obs_quality;
        self.reputation_observations += 1;
        self.recalculate_aggregate();
    }

    /// Immediate reputation hit on a detected defection. Only the stored
    /// aggregate decays; the components are untouched and overwrite it at
    /// the next `record_round`.
    pub fn apply_detection_decay(&mut self) {
        self.aggregate = (self.aggregate - PENALTY_REPUTATION_DECAY * self.aggregate).max(0.0);
    }

    /// Variance of the Beta posterior over the completion propensity.
    pub fn posterior_variance(&self) -> f64 {
        let total = self.alpha + self.beta;
        (self.alpha * self.beta) / (total * total * (total + 1.0))
    }

    /// Bid as seen by the selection rule: unreliable workers compete with a
    /// proportionally inflated bid.
    pub fn effective_bid(&self, bid: f64) -> f64 {
        let adjustment = self.aggregate.max(0.01).powf(KAPPA_RELIABILITY);
        bid / adjustment.max(1e-9)
    }

    /// Trust adjustment of the base critical-value payment: bonus at high
    /// reputation, proportional malus at low reputation, and a final
    /// individual-rationality floor at cost * 1.10. A non-positive base pays
    /// nothing.
    pub fn incentive_payment(&self, base_payment: f64, cost: f64) -> f64 {
        if base_payment <= 0.0 {
            return 0.0;
        }
        let adjustment = if self.aggregate >= REPUTATION_BONUS_THRESHOLD {
            base_payment * TRUST_BONUS
        } else if self.aggregate < REPUTATION_MALUS_THRESHOLD {
            let gap = (REPUTATION_MALUS_THRESHOLD - self.aggregate) / REPUTATION_MALUS_THRESHOLD;
            -base_payment * TRUST_BONUS * gap
        } else {
            0.0
        };
        let mut final_payment = (base_payment + adjustment).max(0.0);
        if cost > 0.0 {
            let floor = cost * (1.0 + IR_SAFETY_MARGIN);
            if final_payment < floor {
                warn!(
                    "incentive payment raised to the IR floor ({:.2} -> {:.2})",
                    final_payment, floor
                );
                final_payment = floor;
            }
        }
        final_payment
    }
}
