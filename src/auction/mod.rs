//! Combinatorial reverse auction with greedy winner selection and
//! critical-value payments.
//!
//! The selection phase picks, in each iteration, the worker whose bundle adds
//! the largest uncovered value net of its bid, until no candidate clears the
//! gain threshold. The payment phase pays each winner its critical value, the
//! highest bid at which it would still have been selected against the field
//! of competitors. When workers carry platform beliefs, their reputation-
//! discounted effective bid replaces the raw bid in both phases, payments are
//! capped by per-task budgets and adjusted by a reputation bonus or malus.

pub mod logging;
pub mod metrics;
pub mod properties;

pub use logging::*;

use crate::config::AuctionConfig;
use crate::error::{Error, Result};
use crate::market::reputation::REPUTATION_MIN_THRESHOLD;
use crate::market::types::{Task, TaskId, Worker, WorkerId};
use crate::{auction_info, auction_warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

/// Value a worker's bundle adds on top of an already covered task set.
/// Each task id counts once even when the bundle repeats it.
pub fn marginal_value(worker: &Worker, covered: &BTreeSet<TaskId>) -> f64 {
    let mut seen = BTreeSet::new();
    let mut mv = 0.0;
    for t in &worker.tasks {
        if seen.insert(t.id) && !covered.contains(&t.id) {
            mv += t.value;
        }
    }
    mv
}

/// Total distinct-task value over a set of workers' bundles.
pub fn coalition_value<'a, I>(workers: I) -> f64
where
    I: IntoIterator<Item = &'a Worker>,
{
    let mut seen = BTreeSet::new();
    let mut total = 0.0;
    for w in workers {
        for t in &w.tasks {
            if seen.insert(t.id) {
                total += t.value;
            }
        }
    }
    total
}

/// Tightest per-task budget in a bundle, if any task carries one.
fn bundle_budget_cap(tasks: &[Task]) -> Option<f64> {
    tasks.iter().filter_map(|t| t.budget).reduce(f64::min)
}

fn distinct_task_count(workers: &[Worker]) -> usize {
    let mut ids = BTreeSet::new();
    for w in workers {
        for t in &w.tasks {
            ids.insert(t.id);
        }
    }
    ids.len()
}

/// Run-level measurements and structured traces, mirrored into the
/// diagnostics JSON dump.
#[derive(Debug, Clone, Serialize, Default)]
pub struct Diagnostics {
    pub winners_count: usize,
    pub covered_tasks_count: usize,
    pub payments_sum: f64,
    pub platform_value_vs: f64,
    pub platform_utility_u0: f64,
    pub selection_time_s: f64,
    pub payment_time_s: f64,
    pub total_time_s: f64,
    pub mv_calls_selection: u64,
    pub mv_calls_payment: u64,
    pub n_workers: usize,
    pub m_tasks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_workers_original: Option<usize>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub excluded_workers: BTreeMap<WorkerId, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub selection_steps: Vec<SelectionStep>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub payment_traces: Vec<PaymentTrace>,
    /// Critical value after the budget cap, before any reputation adjustment.
    pub payment_base: BTreeMap<WorkerId, f64>,
    pub payment_final: BTreeMap<WorkerId, f64>,
    pub property_checks: BTreeMap<String, serde_json::Value>,
}

/// Result of one auction round.
#[derive(Debug, Clone, Serialize)]
pub struct AuctionOutcome {
    pub winner_ids: BTreeSet<WorkerId>,
    pub payments: BTreeMap<WorkerId, f64>,
    pub diagnostics: Diagnostics,
}

struct Auction<'a> {
    /// Participants in ascending id order.
    workers: Vec<&'a Worker>,
    config: &'a AuctionConfig,
    mv_calls_selection: u64,
    mv_calls_payment: u64,
    selection_steps: Vec<SelectionStep>,
    payment_traces: Vec<PaymentTrace>,
}

impl<'a> Auction<'a> {
    fn new(workers: &'a [Worker], config: &'a AuctionConfig) -> Self {
        let mut sorted: Vec<&Worker> = workers.iter().collect();
        sorted.sort_by_key(|w| w.id);
        Self {
            workers: sorted,
            config,
            mv_calls_selection: 0,
            mv_calls_payment: 0,
            selection_steps: Vec::new(),
            payment_traces: Vec::new(),
        }
    }

    /// Greedy winner selection. Returns the winners as indices into the
    /// sorted participant list, plus the covered task ids.
    fn selection_phase(&mut self) -> (Vec<usize>, BTreeSet<TaskId>) {
        let mut winners: Vec<usize> = Vec::new();
        let mut remaining: Vec<usize> = (0..self.workers.len()).collect();
        let mut covered: BTreeSet<TaskId> = BTreeSet::new();
        let mut iteration = 0usize;
        loop {
            iteration += 1;
            let covered_before = covered.len();
            // Strict > over ascending ids keeps the smallest id on ties.
            let mut best: Option<(usize, f64)> = None;
            let mut candidates = Vec::new();
            for (slot, &idx) in remaining.iter().enumerate() {
                let w = self.workers[idx];
                self.mv_calls_selection += 1;
                let mv = marginal_value(w, &covered);
                let effective_bid = w.effective_bid();
                let gain = mv - effective_bid;
                if self.config.debug {
                    candidates.push(CandidateEval {
                        id: w.id,
                        marginal_value: mv,
                        bid: w.bid,
                        effective_bid,
                        gain,
                    });
                }
                if best.map_or(true, |(_, best_gain)| gain > best_gain) {
                    best = Some((slot, gain));
                }
            }
            match best {
                Some((slot, gain)) if gain > self.config.epsilon => {
                    let idx = remaining.remove(slot);
                    let w = self.workers[idx];
                    for t in &w.tasks {
                        covered.insert(t.id);
                    }
                    winners.push(idx);
                    if self.config.debug {
                        let step = SelectionStep {
                            iteration,
                            covered_before,
                            candidates,
                            chosen: Some(w.id),
                            chosen_gain: Some(gain),
                            covered_after: covered.len(),
                        };
                        log_selection_step(&step);
                        self.selection_steps.push(step);
                    }
                }
                other => {
                    if self.config.debug {
                        let step = SelectionStep {
                            iteration,
                            covered_before,
                            candidates,
                            chosen: None,
                            chosen_gain: other.map(|(_, gain)| gain),
                            covered_after: covered.len(),
                        };
                        log_selection_step(&step);
                        self.selection_steps.push(step);
                    }
                    break;
                }
            }
        }
        auction_info!(
            "selection done in {} iterations: {}/{} workers win, {} tasks covered",
            iteration,
            winners.len(),
            self.workers.len(),
            covered.len()
        );
        (winners, covered)
    }

    /// Critical-value payment per winner: replay the greedy selection as if
    /// the winner were absent, recording the bid it would have needed to beat
    /// each displacing competitor. Returns (base, final) payments keyed by
    /// winner id, where base is the budget-capped critical value and final
    /// additionally carries the reputation bonus or malus.
    fn payment_phase(&mut self, winner_idxs: &[usize]) -> BTreeMap<WorkerId, (f64, f64)> {
        let mut payments = BTreeMap::new();
        for &w_idx in winner_idxs {
            let w = self.workers[w_idx];
            let mut critical = w.effective_bid();
            let mut covered: BTreeSet<TaskId> = BTreeSet::new();
            let mut prefix: BTreeSet<usize> = BTreeSet::new();
            let mut steps: Vec<PaymentStep> = Vec::new();
            let final_threshold;
            loop {
                let mut best: Option<(usize, f64)> = None;
                for (idx, c) in self.workers.iter().enumerate() {
                    if idx == w_idx || prefix.contains(&idx) {
                        continue;
                    }
                    self.mv_calls_payment += 1;
                    let mv = marginal_value(c, &covered);
                    let gain = mv - c.effective_bid();
                    if best.map_or(true, |(_, best_gain)| gain > best_gain) {
                        best = Some((idx, gain));
                    }
                }
                match best {
                    Some((j_idx, gain)) if gain > self.config.epsilon => {
                        let j = self.workers[j_idx];
                        self.mv_calls_payment += 1;
                        let v_i = marginal_value(w, &covered);
                        self.mv_calls_payment += 1;
                        let v_j = marginal_value(j, &covered);
                        let b_j = j.effective_bid();
                        // The bid w would have needed to beat j here, capped
                        // at w's own achievable marginal value.
                        let candidate = (v_i - v_j + b_j).min(v_i);
                        critical = critical.max(candidate);
                        if self.config.debug {
                            steps.push(PaymentStep {
                                position: prefix.len() + 1,
                                v_i,
                                competitor: j.id,
                                v_j,
                                competitor_effective_bid: b_j,
                                candidate_threshold: candidate,
                                critical_so_far: critical,
                            });
                        }
                        prefix.insert(j_idx);
                        for t in &j.tasks {
                            covered.insert(t.id);
                        }
                    }
                    _ => {
                        self.mv_calls_payment += 1;
                        let threshold = marginal_value(w, &covered);
                        critical = critical.max(threshold);
                        final_threshold = threshold;
                        break;
                    }
                }
            }
            let mut base = critical;
            if let Some(cap) = bundle_budget_cap(&w.tasks) {
                if base > cap {
                    auction_warn!(
                        "{}: payment capped by task budget ({:.2} -> {:.2})",
                        w,
                        base,
                        cap
                    );
                    base = cap;
                }
            }
            let final_payment = match &w.beliefs {
                Some(beliefs) => beliefs.incentive_payment(base, w.cost),
                None => base,
            };
            if self.config.debug {
                let trace = PaymentTrace {
                    winner: w.id,
                    steps,
                    final_threshold,
                    final_payment,
                };
                log_payment_trace(&trace);
                self.payment_traces.push(trace);
            }
            payments.insert(w.id, (base, final_payment));
        }
        let total: f64 = payments.values().map(|(_, f)| f).sum();
        auction_info!(
            "payments done for {} winners, total {:.2}",
            payments.len(),
            total
        );
        payments
    }
}

fn validate_workers(workers: &[Worker]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for w in workers {
        if !w.bid.is_finite() || w.bid < 0.0 {
            return Err(Error::InvalidBid(format!(
                "worker {} has bid {}",
                w.id, w.bid
            )));
        }
        if !seen.insert(w.id) {
            return Err(Error::Validation(format!("duplicate worker id {}", w.id)));
        }
    }
    Ok(())
}

/// Selection and payment without any property verification. Counterfactual
/// re-runs in the verification suite go through this entry point.
pub(crate) fn run_core(workers: &[Worker], config: &AuctionConfig) -> Result<AuctionOutcome> {
    validate_workers(workers)?;
    let t_start = Instant::now();
    let mut auction = Auction::new(workers, config);

    let t0 = Instant::now();
    let (winner_idxs, covered) = auction.selection_phase();
    let selection_time_s = t0.elapsed().as_secs_f64();

    let t1 = Instant::now();
    let paid = auction.payment_phase(&winner_idxs);
    let payment_time_s = t1.elapsed().as_secs_f64();

    let winner_ids: BTreeSet<WorkerId> =
        winner_idxs.iter().map(|&i| auction.workers[i].id).collect();
    let payments: BTreeMap<WorkerId, f64> =
        paid.iter().map(|(&id, &(_, f))| (id, f)).collect();
    let payment_base: BTreeMap<WorkerId, f64> =
        paid.iter().map(|(&id, &(b, _))| (id, b)).collect();
    let payments_sum: f64 = payments.values().sum();
    let platform_value_vs =
        coalition_value(winner_idxs.iter().map(|&i| auction.workers[i]));

    let diagnostics = Diagnostics {
        winners_count: winner_ids.len(),
        covered_tasks_count: covered.len(),
        payments_sum,
        platform_value_vs,
        platform_utility_u0: platform_value_vs - payments_sum,
        selection_time_s,
        payment_time_s,
        total_time_s: t_start.elapsed().as_secs_f64(),
        mv_calls_selection: auction.mv_calls_selection,
        mv_calls_payment: auction.mv_calls_payment,
        n_workers: workers.len(),
        m_tasks: distinct_task_count(workers),
        n_workers_original: None,
        excluded_workers: BTreeMap::new(),
        selection_steps: auction.selection_steps,
        payment_traces: auction.payment_traces,
        payment_base,
        payment_final: payments.clone(),
        property_checks: BTreeMap::new(),
    };
    Ok(AuctionOutcome {
        winner_ids,
        payments,
        diagnostics,
    })
}

/// Winner ids from the selection phase alone, with step recording off.
/// The verification suite re-runs selection on perturbed bid profiles and
/// only needs the winner set, not payments.
pub(crate) fn selection_winners(
    workers: &[Worker],
    config: &AuctionConfig,
) -> Result<BTreeSet<WorkerId>> {
    validate_workers(workers)?;
    let quiet = AuctionConfig {
        debug: false,
        verify_properties: false,
        ..config.clone()
    };
    let mut auction = Auction::new(workers, &quiet);
    let (winner_idxs, _) = auction.selection_phase();
    Ok(winner_idxs
        .into_iter()
        .map(|i| auction.workers[i].id)
        .collect())
}

/// Run one auction round over an id-unique worker population.
///
/// Empty input yields a zero outcome rather than an error. When property
/// verification is enabled and no worker carries platform beliefs, the
/// mechanism properties are certified on the spot and a violation surfaces
/// as [`Error::PropertyViolation`].
pub fn run_auction(workers: &[Worker], config: &AuctionConfig) -> Result<AuctionOutcome> {
    let mut outcome = run_core(workers, config)?;
    let reputation_weighted = workers.iter().any(|w| w.beliefs.is_some());
    if config.verify_properties && !reputation_weighted {
        let report = properties::verify_all(workers, &outcome, config)?;
        outcome.diagnostics.property_checks = report;
    }
    Ok(outcome)
}

/// Adaptive round: filter each worker's bundle down to the tasks it is
/// currently trusted to serve, drop workers left with nothing, then run the
/// auction over the reduced field. Property verification is skipped because
/// reputation-weighted bids break the truthful-baseline assumptions.
pub fn run_auction_with_eligibility(
    workers: &[Worker],
    tasks: &[Task],
    now_s: u64,
    config: &AuctionConfig,
) -> Result<AuctionOutcome> {
    let (eligible, excluded) = filter_eligible(workers, tasks, now_s);
    run_eligible(&eligible, excluded, workers.len(), tasks.len(), config)
}

/// Trust screen for one round. Returns admitted copies of the workers with
/// their bundles reduced to the tasks they may serve, plus a reason per
/// excluded worker.
pub(crate) fn filter_eligible(
    workers: &[Worker],
    tasks: &[Task],
    now_s: u64,
) -> (Vec<Worker>, BTreeMap<WorkerId, String>) {
    let task_index: BTreeMap<TaskId, &Task> = tasks.iter().map(|t| (t.id, t)).collect();
    let mut eligible: Vec<Worker> = Vec::new();
    let mut excluded: BTreeMap<WorkerId, String> = BTreeMap::new();
    for w in workers {
        if !w.is_eligible_at(now_s) {
            excluded.insert(w.id, "blacklisted".to_string());
            continue;
        }
        let aggregate = w.reputation();
        if aggregate < REPUTATION_MIN_THRESHOLD {
            excluded.insert(
                w.id,
                format!("reputation {:.2} below minimum", aggregate),
            );
            continue;
        }
        let estimated = w
            .beliefs
            .as_ref()
            .map(|b| b.estimated_rationality)
            .unwrap_or(1.0);
        let bundle: Vec<Task> = w
            .tasks
            .iter()
            .filter_map(|t| task_index.get(&t.id).copied())
            .filter(|t| {
                if let Some(target) = t.quality_target {
                    // Quality-sensitive tasks require an estimated
                    // rationality proportional to the target.
                    if estimated < 0.3 + 0.7 * target {
                        return false;
                    }
                }
                if let Some(required) = t.required_reliability {
                    if aggregate < required {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();
        if bundle.is_empty() {
            excluded.insert(w.id, "no eligible tasks".to_string());
            continue;
        }
        let mut admitted = w.clone();
        admitted.set_tasks(bundle);
        eligible.push(admitted);
    }
    auction_info!(
        "eligibility: {}/{} workers admitted ({} excluded)",
        eligible.len(),
        workers.len(),
        excluded.len()
    );
    (eligible, excluded)
}

/// Run the auction over an already screened field and stamp the eligibility
/// context into the diagnostics.
pub(crate) fn run_eligible(
    eligible: &[Worker],
    excluded: BTreeMap<WorkerId, String>,
    n_original: usize,
    m_tasks: usize,
    config: &AuctionConfig,
) -> Result<AuctionOutcome> {
    let mut outcome = run_core(eligible, config)?;
    outcome.diagnostics.n_workers_original = Some(n_original);
    outcome.diagnostics.m_tasks = m_tasks;
    outcome.diagnostics.excluded_workers = excluded;
    Ok(outcome)
}

/// Write an outcome back onto the population. Winners get their payment and
/// the utility against realized cost (or against the bid when no cost was
/// computed); losers are zeroed.
pub fn apply_outcome(workers: &mut [Worker], outcome: &AuctionOutcome) {
    for w in workers.iter_mut() {
        match outcome.payments.get(&w.id) {
            Some(&payment) => {
                w.is_winner = true;
                w.payment = payment;
                let base_cost = if w.cost > 0.0 { w.cost } else { w.bid };
                w.utility = payment - base_cost;
            }
            None => {
                w.is_winner = false;
                w.payment = 0.0;
                w.utility = 0.0;
            }
        }
    }
}
