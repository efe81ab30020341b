//! Tasks, workers and identifiers for the crowdsourcing marketplace.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::error::{Error, Result};
use crate::market::behavior::{
    Behavior, BETA_REPUTATION, DETECTION_PROBABILITY, PENALTY_FACTOR, RATIONALITY_MAX,
    RATIONALITY_THRESHOLD_HIGH, RATIONALITY_THRESHOLD_LOW, RATIONALITY_THRESHOLD_MEDIUM,
    REPUTATION_DECAY,
};
use crate::market::reputation::{Beliefs, MIN_PENALTY_FLOOR, PENALTY_BASE_FACTOR};
use crate::market::routing::{self, RoutingStrategy};
use crate::market::utils::haversine_m;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct TaskId(pub u32);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct WorkerId(pub u32);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// WGS84 position, validated at construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPos {
    pub lat_deg: f64,
    pub lon_deg: f64,
}

impl GeoPos {
    pub fn new(lat_deg: f64, lon_deg: f64) -> Result<Self> {
        if !lat_deg.is_finite() || !lon_deg.is_finite() {
            return Err(Error::Validation(format!(
                "coordinates must be finite, got ({lat_deg}, {lon_deg})"
            )));
        }
        if !(-90.0..=90.0).contains(&lat_deg) {
            return Err(Error::Validation(format!(
                "latitude out of [-90, 90]: {lat_deg}"
            )));
        }
        if !(-180.0..=180.0).contains(&lon_deg) {
            return Err(Error::Validation(format!(
                "longitude out of [-180, 180]: {lon_deg}"
            )));
        }
        Ok(Self { lat_deg, lon_deg })
    }

    pub fn distance_m(&self, other: &GeoPos) -> f64 {
        haversine_m(self.lat_deg, self.lon_deg, other.lat_deg, other.lon_deg)
    }
}

/// Platform feedback attached to a task after its round resolves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaskFeedback {
    pub quality: f64,
    pub timestamp_s: u64,
}

fn default_feedback_weight() -> f64 {
    1.0
}

/// A sensing task offered on the marketplace.
///
/// The base fields (`id`, `pos`, `value`) drive the mechanism itself; the
/// remaining fields feed the behavioral heuristics, the eligibility filter
/// and the reputation feedback loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub pos: GeoPos,
    pub value: f64,
    #[serde(default)]
    pub community: bool,
    #[serde(default)]
    pub quality_target: Option<f64>,
    #[serde(default)]
    pub group: Option<u32>,
    #[serde(default)]
    pub required_reliability: Option<f64>,
    #[serde(default = "default_feedback_weight")]
    pub feedback_weight: f64,
    #[serde(default)]
    pub budget: Option<f64>,
    #[serde(default)]
    pub feedback: Option<TaskFeedback>,
}

impl Task {
    pub fn new(id: TaskId, pos: GeoPos, value: f64) -> Result<Self> {
        if !value.is_finite() || value < 0.0 {
            return Err(Error::Validation(format!(
                "task value must be finite and non-negative, got {value}"
            )));
        }
        Ok(Self {
            id,
            pos,
            value,
            community: false,
            quality_target: None,
            group: None,
            required_reliability: None,
            feedback_weight: 1.0,
            budget: None,
            feedback: None,
        })
    }

    pub fn with_community(mut self, community: bool) -> Self {
        self.community = community;
        self
    }

    pub fn with_group(mut self, group: u32) -> Self {
        self.group = Some(group);
        self
    }

    pub fn with_quality_target(mut self, target: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&target) {
            return Err(Error::Validation(format!(
                "quality_target must be in [0, 1], got {target}"
            )));
        }
        self.quality_target = Some(target);
        Ok(self)
    }

    pub fn with_required_reliability(mut self, reliability: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&reliability) {
            return Err(Error::Validation(format!(
                "required_reliability must be in [0, 1], got {reliability}"
            )));
        }
        self.required_reliability = Some(reliability);
        Ok(self)
    }

    pub fn with_feedback_weight(mut self, weight: f64) -> Result<Self> {
        if !weight.is_finite() || weight < 0.0 {
            return Err(Error::Validation(format!(
                "feedback_weight must be finite and non-negative, got {weight}"
            )));
        }
        self.feedback_weight = weight;
        Ok(self)
    }

    pub fn with_budget(mut self, budget: f64) -> Result<Self> {
        if !budget.is_finite() || budget < 0.0 {
            return Err(Error::Validation(format!(
                "budget must be finite and non-negative, got {budget}"
            )));
        }
        self.budget = Some(budget);
        Ok(self)
    }

    /// Record the platform's quality feedback for this task. Overwriting an
    /// earlier feedback is allowed but logged.
    pub fn mark_completed(&mut self, quality: f64, timestamp_s: u64) -> Result<()> {
        if !(0.0..=1.0).contains(&quality) {
            return Err(Error::Validation(format!(
                "feedback quality must be in [0, 1], got {quality}"
            )));
        }
        if self.feedback.is_some() {
            warn!("task {} already has feedback, overwriting", self.id);
        }
        self.feedback = Some(TaskFeedback {
            quality,
            timestamp_s,
        });
        Ok(())
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{}", self.id)
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Task {}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Task {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl std::hash::Hash for Task {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Honesty profile derived from the rationality level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HonestyProfile {
    QuasiRational,
    BoundedHonest,
    BoundedModerate,
    BoundedOpportunistic,
}

impl HonestyProfile {
    pub fn from_rationality(rationality: f64) -> Self {
        if rationality >= RATIONALITY_THRESHOLD_HIGH {
            Self::QuasiRational
        } else if rationality >= RATIONALITY_THRESHOLD_MEDIUM {
            Self::BoundedHonest
        } else if rationality >= RATIONALITY_THRESHOLD_LOW {
            Self::BoundedModerate
        } else {
            Self::BoundedOpportunistic
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QuasiRational => "Quasi-Rational",
            Self::BoundedHonest => "Bounded Honest",
            Self::BoundedModerate => "Bounded Moderate",
            Self::BoundedOpportunistic => "Bounded Opportunistic",
        }
    }
}

impl std::fmt::Display for HonestyProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A worker on the marketplace.
///
/// Phase 1 workers carry neither `behavior` nor `beliefs` and bid their true
/// cost. Attaching a [`Behavior`] enables the bounded-rationality extensions
/// (heuristic bundle selection, bid noise, moral hazard); attaching
/// [`Beliefs`] additionally enables the platform-side Bayesian learning and
/// reputation-weighted bidding.
#[derive(Debug, Clone)]
pub struct Worker {
    pub id: WorkerId,
    pub pos: GeoPos,
    pub cost_per_km: f64,
    pub tasks: Vec<Task>,
    pub cost: f64,
    pub bid: f64,
    pub payment: f64,
    pub utility: f64,
    pub is_winner: bool,
    pub behavior: Option<Behavior>,
    pub beliefs: Option<Beliefs>,
}

impl Worker {
    pub fn new(id: WorkerId, pos: GeoPos, cost_per_km: f64) -> Result<Self> {
        if !cost_per_km.is_finite() || cost_per_km <= 0.0 {
            return Err(Error::Validation(format!(
                "cost_per_km must be finite and positive, got {cost_per_km}"
            )));
        }
        Ok(Self {
            id,
            pos,
            cost_per_km,
            tasks: Vec::new(),
            cost: 0.0,
            bid: 0.0,
            payment: 0.0,
            utility: 0.0,
            is_winner: false,
            behavior: None,
            beliefs: None,
        })
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = Some(behavior);
        self
    }

    pub fn with_beliefs(mut self, beliefs: Beliefs) -> Self {
        self.beliefs = Some(beliefs);
        self
    }

    /// Replace the bundle, deduplicating by task id. The first occurrence
    /// keeps its position, later duplicates replace the stored task.
    pub fn set_tasks(&mut self, tasks: Vec<Task>) {
        let mut index: HashMap<TaskId, usize> = HashMap::with_capacity(tasks.len());
        let mut unique: Vec<Task> = Vec::with_capacity(tasks.len());
        for task in tasks {
            match index.get(&task.id) {
                Some(&at) => unique[at] = task,
                None => {
                    index.insert(task.id, unique.len());
                    unique.push(task);
                }
            }
        }
        self.tasks = unique;
    }

    pub fn add_task(&mut self, task: Task) {
        if !self.tasks.iter().any(|t| t.id == task.id) {
            self.tasks.push(task);
        }
    }

    pub fn distance_to_m(&self, task: &Task) -> f64 {
        self.pos.distance_m(&task.pos)
    }

    pub fn rationality(&self) -> Option<f64> {
        self.behavior.as_ref().map(|b| b.rationality)
    }

    /// Reputation as the platform sees it: the aggregate belief when the
    /// worker is under Bayesian tracking, the scalar behavioral reputation
    /// otherwise, 1.0 for plain truthful workers.
    pub fn reputation(&self) -> f64 {
        if let Some(beliefs) = &self.beliefs {
            beliefs.aggregate
        } else if let Some(behavior) = &self.behavior {
            behavior.reputation
        } else {
            1.0
        }
    }

    /// Bid as seen by the selection rule: reputation-discounted when the
    /// worker is under Bayesian tracking, the raw bid otherwise.
    pub fn effective_bid(&self) -> f64 {
        match &self.beliefs {
            Some(beliefs) => beliefs.effective_bid(self.bid),
            None => self.bid,
        }
    }

    /// Estimate the travel distance over the current bundle and derive the
    /// true cost. The routing strategy and the urban correction factor both
    /// depend on the rationality level when a behavioral profile is present.
    pub fn compute_cost(&mut self) -> Result<f64> {
        let strategy = match &self.behavior {
            Some(b) => RoutingStrategy::for_rationality(b.rationality),
            None => RoutingStrategy::Star,
        };
        let correction = routing::urban_correction(self.rationality());
        let km = routing::travel_distance_km(
            &self.pos,
            &self.tasks,
            strategy,
            correction,
            self.behavior.as_mut().map(|b| &mut b.rng),
        );
        let cost = self.cost_per_km * km;
        if !cost.is_finite() || cost < 0.0 {
            return Err(Error::Validation(format!(
                "invalid cost {cost:.4} for worker {} (cost_per_km={:.2}, km={km:.2})",
                self.id, self.cost_per_km
            )));
        }
        self.cost = cost;
        Ok(cost)
    }

    /// Compute the true cost and derive the bid. Without a behavioral
    /// profile the bid equals the cost; with one, a rationality-dependent
    /// relative deviation is drawn (or overridden) and the bid is floored at
    /// 0.01.
    pub fn generate_bid(&mut self, manual_deviation: Option<f64>) -> Result<f64> {
        let cost = self.compute_cost()?;
        let bid = match (&mut self.behavior, manual_deviation) {
            (None, None) => cost,
            (behavior, manual) => {
                let deviation = match manual {
                    Some(d) => d,
                    None => match behavior {
                        Some(b) => b.draw_bid_deviation()?,
                        None => 0.0,
                    },
                };
                (cost * (1.0 + deviation)).max(0.01)
            }
        };
        self.bid = bid;
        Ok(bid)
    }

    /// Simulate the completion attempt for a winning worker. Returns what
    /// the platform observes (`completed`); the ground truth lands in
    /// `actually_completed`. Workers without a behavioral profile always
    /// complete.
    pub fn attempt_completion(&mut self) -> bool {
        let payment = self.payment;
        let Some(behavior) = self.behavior.as_mut() else {
            return true;
        };
        match self.beliefs.as_mut() {
            // Bayesian-tracked worker: payment-scaled penalties, reputation
            // decay on the aggregate, free-riding when undetected.
            Some(beliefs) => {
                if behavior.rationality >= RATIONALITY_MAX {
                    behavior.completed = true;
                    behavior.actually_completed = true;
                    behavior.defect_prob = 0.0;
                    return true;
                }
                let factor = 1.0 + BETA_REPUTATION * (1.0 - beliefs.aggregate);
                behavior.defect_prob = (behavior.defect_base * factor).min(0.95);
                if behavior.rng.random::<f64>() >= behavior.defect_prob {
                    behavior.completed = true;
                    behavior.actually_completed = true;
                    return true;
                }
                let detected = behavior.rng.random::<f64>() < DETECTION_PROBABILITY;
                if !detected {
                    behavior.completed = true;
                    behavior.actually_completed = false;
                    return true;
                }
                let penalty = (PENALTY_BASE_FACTOR * payment * (1.0 + (1.0 - beliefs.aggregate)))
                    .max(MIN_PENALTY_FLOOR * payment);
                behavior.penalty_accumulated += penalty;
                beliefs.apply_detection_decay();
                behavior.completed = false;
                behavior.actually_completed = false;
                warn!(
                    "worker {}: defection detected, penalty {:.2}, reputation {:.2}",
                    self.id, penalty, beliefs.aggregate
                );
                false
            }
            // Bounded-rationality worker: fixed double-payment penalty and a
            // hard scalar reputation hit on detection.
            None => {
                let factor = 1.0 + BETA_REPUTATION * (1.0 - behavior.reputation);
                behavior.defect_prob = (behavior.defect_base * factor).min(0.95);
                if behavior.rng.random::<f64>() >= behavior.defect_prob {
                    behavior.completed = true;
                    behavior.actually_completed = true;
                    behavior.data_quality = 1.0;
                    return true;
                }
                let detected = behavior.rng.random::<f64>() < DETECTION_PROBABILITY;
                if detected {
                    let penalty = PENALTY_FACTOR * payment;
                    behavior.penalty_accumulated += penalty;
                    behavior.reputation = (behavior.reputation - 0.5).max(0.0);
                    behavior.completed = false;
                    behavior.actually_completed = false;
                    behavior.data_quality = 0.0;
                    warn!(
                        "worker {}: defection detected, penalty {:.2}, reputation {:.2}",
                        self.id, penalty, behavior.reputation
                    );
                } else {
                    behavior.completed = true;
                    behavior.actually_completed = false;
                    behavior.data_quality = behavior.rng.random_range(0.1..0.4);
                }
                behavior.completed
            }
        }
    }

    /// Record a detected defection against the blacklist. From the third
    /// strike the worker is suspended with exponentially growing duration,
    /// capped at 24 hours.
    pub fn record_detected_defection(&mut self, now_s: u64) {
        if let Some(behavior) = &mut self.behavior {
            behavior.record_strike(self.id, now_s);
        }
    }

    /// Exponential scalar reputation update from the platform-observed
    /// completion flag.
    pub fn update_reputation(&mut self, completed: bool) {
        if let Some(behavior) = &mut self.behavior {
            let indicator = if completed { 1.0 } else { 0.0 };
            behavior.reputation = (REPUTATION_DECAY * behavior.reputation
                + (1.0 - REPUTATION_DECAY) * indicator)
                .clamp(0.0, 1.0);
        }
    }

    /// Bayesian belief update after a round. Only winners with a non-empty
    /// bundle generate an observation; everyone else keeps their posterior.
    pub fn update_platform_beliefs(&mut self, was_winner: bool) {
        let actually = self
            .behavior
            .as_ref()
            .map(|b| b.actually_completed)
            .unwrap_or(false);
        let Some(beliefs) = self.beliefs.as_mut() else {
            return;
        };
        if !was_winner || self.tasks.is_empty() {
            return;
        }
        let mut total_weight = 0.0;
        let mut weighted_quality = 0.0;
        for task in &self.tasks {
            if let Some(fb) = &task.feedback {
                total_weight += task.feedback_weight;
                weighted_quality += fb.quality * task.feedback_weight;
            }
        }
        let avg_quality = if total_weight > 0.0 {
            weighted_quality / total_weight
        } else {
            0.5
        };
        beliefs.record_round(actually, avg_quality);
    }

    pub fn is_eligible_at(&self, now_s: u64) -> bool {
        match &self.behavior {
            Some(behavior) => behavior.is_eligible_at(now_s),
            None => true,
        }
    }

    /// Clear the per-round auction state, the task bundle included.
    /// Reputation, penalties, strikes and beliefs survive across rounds.
    pub fn reset_round(&mut self) {
        self.tasks.clear();
        self.cost = 0.0;
        self.bid = 0.0;
        self.payment = 0.0;
        self.utility = 0.0;
        self.is_winner = false;
        if let Some(behavior) = &mut self.behavior {
            behavior.completed = false;
            behavior.actually_completed = false;
            behavior.data_quality = 1.0;
        }
    }

    /// Full reset, including reputation, penalties, the blacklist record and
    /// the Bayesian posterior.
    pub fn reset_full(&mut self) {
        self.reset_round();
        if let Some(behavior) = &mut self.behavior {
            behavior.reputation = 1.0;
            behavior.penalty_accumulated = 0.0;
            behavior.strikes = 0;
            behavior.blacklisted_until = None;
        }
        if let Some(beliefs) = &mut self.beliefs {
            *beliefs = Beliefs::new();
        }
    }
}

impl std::fmt::Display for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "W{}", self.id)
    }
}

impl PartialEq for Worker {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Worker {}

impl PartialOrd for Worker {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Worker {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl std::hash::Hash for Worker {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::behavior::FrugalTreeKind;

    fn pos(lat: f64, lon: f64) -> GeoPos {
        GeoPos::new(lat, lon).unwrap()
    }

    fn task(id: u32, value: f64, lat: f64, lon: f64) -> Task {
        Task::new(TaskId(id), pos(lat, lon), value).unwrap()
    }

    fn behavioral(id: u32, rationality: f64, seed: u64) -> Worker {
        let behavior = Behavior::new(
            WorkerId(id),
            rationality,
            FrugalTreeKind::LenientPectinate,
            seed,
        )
        .unwrap();
        Worker::new(WorkerId(id), pos(40.42, -3.70), 0.5)
            .unwrap()
            .with_behavior(behavior)
    }

    #[test]
    fn truthful_workers_bid_their_cost() {
        let mut w = Worker::new(WorkerId(1), pos(40.42, -3.70), 0.5).unwrap();
        w.set_tasks(vec![task(1, 5.0, 40.45, -3.70)]);
        let bid = w.generate_bid(None).unwrap();
        assert!(w.cost > 0.0);
        assert!((bid - w.cost).abs() < 1e-12);
        assert_eq!(w.bid, bid);
    }

    #[test]
    fn manual_deviation_overrides_the_draw() {
        let mut w = behavioral(2, 0.6, 9);
        w.set_tasks(vec![task(1, 5.0, 40.45, -3.70)]);
        let bid = w.generate_bid(Some(0.10)).unwrap();
        assert!((bid - w.cost * 1.10).abs() < 1e-9);
        // a large negative override lands on the bid floor
        let bid = w.generate_bid(Some(-2.0)).unwrap();
        assert!((bid - 0.01).abs() < 1e-12);
    }

    #[test]
    fn bundles_deduplicate_by_task_id() {
        let mut w = Worker::new(WorkerId(3), pos(40.42, -3.70), 0.5).unwrap();
        w.set_tasks(vec![
            task(1, 5.0, 40.42, -3.70),
            task(2, 4.0, 40.42, -3.70),
            task(1, 9.0, 40.42, -3.70),
        ]);
        assert_eq!(w.tasks.len(), 2);
        assert_eq!(w.tasks[0].id, TaskId(1));
        // the later duplicate replaced the stored task in place
        assert_eq!(w.tasks[0].value, 9.0);
        w.add_task(task(2, 1.0, 40.42, -3.70));
        assert_eq!(w.tasks.len(), 2);
    }

    #[test]
    fn feedback_overwrites_and_validates() {
        let mut t = task(1, 5.0, 40.42, -3.70);
        assert!(t.mark_completed(1.2, 0).is_err());
        t.mark_completed(0.8, 100).unwrap();
        t.mark_completed(0.4, 200).unwrap();
        let fb = t.feedback.unwrap();
        assert_eq!(fb.quality, 0.4);
        assert_eq!(fb.timestamp_s, 200);
    }

    #[test]
    fn completion_branches_cover_detection_and_free_riding() {
        let mut w = behavioral(4, 0.35, 11);
        w.payment = 1.0;
        // near-certain defection so every branch shows up in a short run
        w.behavior.as_mut().unwrap().defect_base = 10.0;

        let (mut honest, mut detected, mut undetected) = (0u32, 0u32, 0u32);
        for _ in 0..300 {
            let observed = w.attempt_completion();
            let b = w.behavior.as_ref().unwrap();
            assert_eq!(observed, b.completed);
            match (b.completed, b.actually_completed) {
                (true, true) => {
                    honest += 1;
                    assert_eq!(b.data_quality, 1.0);
                }
                (false, _) => {
                    detected += 1;
                    assert_eq!(b.data_quality, 0.0);
                }
                (true, false) => {
                    undetected += 1;
                    assert!((0.1..0.4).contains(&b.data_quality));
                }
            }
        }
        assert!(honest > 0);
        assert!(detected > 0);
        assert!(undetected > 0);
        let b = w.behavior.as_ref().unwrap();
        assert!((b.penalty_accumulated - 2.0 * f64::from(detected)).abs() < 1e-9);
        assert_eq!(b.reputation, 0.0);
    }

    #[test]
    fn fully_rational_tracked_workers_always_complete() {
        let mut w = behavioral(5, RATIONALITY_MAX, 13).with_beliefs(Beliefs::new());
        w.payment = 5.0;
        for _ in 0..50 {
            assert!(w.attempt_completion());
            let b = w.behavior.as_ref().unwrap();
            assert!(b.completed && b.actually_completed);
            assert_eq!(b.defect_prob, 0.0);
        }
        assert_eq!(w.behavior.as_ref().unwrap().penalty_accumulated, 0.0);
    }

    #[test]
    fn tracked_defections_decay_the_aggregate_and_free_ride_when_missed() {
        let mut w = behavioral(6, 0.35, 17).with_beliefs(Beliefs::new());
        w.payment = 2.0;
        w.behavior.as_mut().unwrap().defect_base = 10.0;

        let (mut detected, mut undetected) = (0u32, 0u32);
        for _ in 0..300 {
            let observed = w.attempt_completion();
            let b = w.behavior.as_ref().unwrap();
            if !b.completed {
                detected += 1;
                assert!(!observed);
                assert!(!b.actually_completed);
            } else if !b.actually_completed {
                undetected += 1;
                assert!(observed);
            }
        }
        assert!(detected > 0);
        assert!(undetected > 0);
        let b = w.behavior.as_ref().unwrap();
        assert!(w.beliefs.as_ref().unwrap().aggregate < 1.0);
        assert!(b.penalty_accumulated >= MIN_PENALTY_FLOOR * w.payment * f64::from(detected) - 1e-9);
    }

    #[test]
    fn round_reset_clears_the_bundle_and_keeps_learning_state() {
        let mut w = behavioral(7, 0.5, 19).with_beliefs(Beliefs::new());
        w.set_tasks(vec![task(1, 5.0, 40.43, -3.70)]);
        w.bid = 3.0;
        w.cost = 2.5;
        w.payment = 4.0;
        w.utility = 1.5;
        w.is_winner = true;
        {
            let b = w.behavior.as_mut().unwrap();
            b.reputation = 0.6;
            b.strikes = 2;
            b.penalty_accumulated = 3.0;
            b.completed = true;
        }
        w.beliefs.as_mut().unwrap().record_round(false, 0.2);

        w.reset_round();
        assert!(w.tasks.is_empty());
        assert_eq!(w.bid, 0.0);
        assert_eq!(w.payment, 0.0);
        assert!(!w.is_winner);
        let b = w.behavior.as_ref().unwrap();
        assert!(!b.completed);
        assert_eq!(b.reputation, 0.6);
        assert_eq!(b.strikes, 2);
        assert_eq!(b.penalty_accumulated, 3.0);
        assert_eq!(w.beliefs.as_ref().unwrap().observations, 1);

        w.reset_full();
        let b = w.behavior.as_ref().unwrap();
        assert_eq!(b.reputation, 1.0);
        assert_eq!(b.strikes, 0);
        assert_eq!(b.penalty_accumulated, 0.0);
        assert_eq!(w.beliefs.as_ref().unwrap(), &Beliefs::new());
    }
}
