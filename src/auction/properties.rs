//! Empirical certification of the mechanism properties.
//!
//! Each check perturbs bids and re-runs the real selection rule (the
//! truthfulness check re-runs the full auction) instead of relying on a
//! closed-form argument. A violated property surfaces as
//! [`Error::PropertyViolation`]; the per-property reports are returned only
//! when every check passes.

use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Map, Value};

use super::{marginal_value, run_core, selection_winners, AuctionOutcome};
use crate::auction_debug;
use crate::config::AuctionConfig;
use crate::error::{Error, Result};
use crate::market::types::{TaskId, Worker, WorkerId};
use crate::market::utils::{mean, std_dev};

/// Bundles whose task values spread wider than this coefficient of variation
/// count as frugally accepted rather than value-optimized.
pub const ACCEPTANCE_CV_THRESHOLD: f64 = 0.5;
/// Acceptable share of frugally accepted bundles among multi-task winners.
pub const ACCEPTANCE_RATE_BOUNDS: (f64, f64) = (0.10, 0.30);
/// Range the share typically lands in for a mixed-rationality cohort.
pub const ACCEPTANCE_EXPECTED_RANGE: (f64, f64) = (0.15, 0.25);

const EXAMPLE_LIMIT: usize = 5;

/// Run every property check against a finished auction.
///
/// Winners are processed in ascending id order so the verification RNG draws
/// an identical sample sequence for a given seed. Cohorts with behavioral
/// profiles keep their bids as submitted; for them the bidding check is
/// reported under `TruthfulnessBidding` and a bundle-acceptance proxy is
/// added under `TruthfulnessAcceptance`.
pub fn verify_all(
    workers: &[Worker],
    outcome: &AuctionOutcome,
    config: &AuctionConfig,
) -> Result<BTreeMap<String, Value>> {
    let mut winners: Vec<&Worker> = workers
        .iter()
        .filter(|w| outcome.winner_ids.contains(&w.id))
        .collect();
    winners.sort_by_key(|w| w.id);
    let bounded = workers.iter().any(|w| w.behavior.is_some());
    auction_debug!(
        "verifying mechanism properties over {} winner(s), bounded={}",
        winners.len(),
        bounded
    );

    let mut report = BTreeMap::new();
    check_individual_rationality(&winners, outcome, config, &mut report)?;
    check_profitability(outcome, config, &mut report)?;
    check_monotonicity(workers, &winners, config, &mut report)?;
    check_critical_value(workers, &winners, outcome, config, &mut report)?;
    check_payment_bound(&winners, outcome, config, &mut report)?;
    check_truthful_bidding(workers, &winners, outcome, config, bounded, &mut report)?;
    if bounded {
        report.insert(
            "TruthfulnessAcceptance".to_string(),
            acceptance_quality(&winners),
        );
    }
    report.insert(
        "Submodularity".to_string(),
        empirical_submodularity(workers, config.submodularity_trials, config.verification_seed),
    );
    Ok(report)
}

/// Every winner must be paid at least its submitted bid.
fn check_individual_rationality(
    winners: &[&Worker],
    outcome: &AuctionOutcome,
    config: &AuctionConfig,
    report: &mut BTreeMap<String, Value>,
) -> Result<()> {
    let mut violations = Vec::new();
    for w in winners {
        let payment = outcome.payments.get(&w.id).copied().unwrap_or(0.0);
        if payment + config.epsilon < w.bid {
            violations.push(format!("{} paid {:.6} below bid {:.6}", w, payment, w.bid));
        }
    }
    if !violations.is_empty() {
        return Err(Error::PropertyViolation(format!(
            "individual rationality violated for {} winner(s): {}",
            violations.len(),
            violations.join("; ")
        )));
    }
    report.insert(
        "IndividualRationality".to_string(),
        json!({ "passed": true, "violations": 0 }),
    );
    Ok(())
}

/// The platform never pays out more than the value of the winning coalition.
fn check_profitability(
    outcome: &AuctionOutcome,
    config: &AuctionConfig,
    report: &mut BTreeMap<String, Value>,
) -> Result<()> {
    let d = &outcome.diagnostics;
    if d.platform_value_vs + config.epsilon < d.payments_sum {
        return Err(Error::PropertyViolation(format!(
            "profitability violated: coalition value {:.6} below total payments {:.6}",
            d.platform_value_vs, d.payments_sum
        )));
    }
    report.insert(
        "Profitability".to_string(),
        json!({
            "passed": true,
            "platform_value": d.platform_value_vs,
            "total_payments": d.payments_sum,
            "platform_utility": d.platform_value_vs - d.payments_sum,
        }),
    );
    Ok(())
}

/// A winner that lowers its bid must still win.
fn check_monotonicity(
    workers: &[Worker],
    winners: &[&Worker],
    config: &AuctionConfig,
    report: &mut BTreeMap<String, Value>,
) -> Result<()> {
    let mut entries = Map::new();
    for w in winners {
        let reduced = (w.bid - config.perturbation(w.bid)).max(0.0);
        let modified = clone_with_bid(workers, w.id, reduced);
        let still_wins = selection_winners(&modified, config)?.contains(&w.id);
        entries.insert(
            w.id.to_string(),
            json!({
                "original_bid": w.bid,
                "reduced_bid": reduced,
                "still_wins": still_wins,
            }),
        );
        if !still_wins {
            return Err(Error::PropertyViolation(format!(
                "monotonicity violated: {} loses after lowering its bid from {:.6} to {:.6}",
                w, w.bid, reduced
            )));
        }
    }
    report.insert("Monotonicity".to_string(), Value::Object(entries));
    Ok(())
}

/// The payment is the winner's critical bid: bidding just above it loses,
/// bidding just below it wins.
fn check_critical_value(
    workers: &[Worker],
    winners: &[&Worker],
    outcome: &AuctionOutcome,
    config: &AuctionConfig,
    report: &mut BTreeMap<String, Value>,
) -> Result<()> {
    let mut entries = Map::new();
    for w in winners {
        let payment = outcome.payments.get(&w.id).copied().unwrap_or(0.0);
        let delta = config.perturbation(payment);
        let bid_above = payment + delta;
        let wins_above =
            selection_winners(&clone_with_bid(workers, w.id, bid_above), config)?.contains(&w.id);
        let bid_below = (payment - delta).max(0.0);
        let wins_below =
            selection_winners(&clone_with_bid(workers, w.id, bid_below), config)?.contains(&w.id);
        entries.insert(
            w.id.to_string(),
            json!({
                "payment": payment,
                "bid_above": bid_above,
                "wins_above": wins_above,
                "bid_below": bid_below,
                "wins_below": wins_below,
            }),
        );
        if wins_above {
            return Err(Error::PropertyViolation(format!(
                "critical value violated: {} still wins bidding {:.6}, above its payment {:.6}",
                w, bid_above, payment
            )));
        }
        if !wins_below {
            return Err(Error::PropertyViolation(format!(
                "critical value violated: {} loses bidding {:.6}, below its payment {:.6}",
                w, bid_below, payment
            )));
        }
    }
    report.insert("CriticalValue".to_string(), Value::Object(entries));
    Ok(())
}

/// No winner is paid more than the standalone value of its bundle. Needs the
/// per-winner payment traces, so the check only runs in debug mode.
fn check_payment_bound(
    winners: &[&Worker],
    outcome: &AuctionOutcome,
    config: &AuctionConfig,
    report: &mut BTreeMap<String, Value>,
) -> Result<()> {
    if outcome.diagnostics.payment_traces.is_empty() {
        report.insert(
            "PaymentBound".to_string(),
            json!({ "skipped": "payment traces are only recorded in debug mode" }),
        );
        return Ok(());
    }
    let empty = BTreeSet::new();
    let mut entries = Map::new();
    for trace in &outcome.diagnostics.payment_traces {
        let Some(w) = winners.iter().find(|w| w.id == trace.winner) else {
            continue;
        };
        let v_empty = marginal_value(w, &empty);
        if trace.final_payment > v_empty + config.epsilon {
            return Err(Error::PropertyViolation(format!(
                "payment bound violated: {} is paid {:.6}, above its standalone value {:.6}",
                w, trace.final_payment, v_empty
            )));
        }
        entries.insert(
            trace.winner.to_string(),
            json!({
                "payment": trace.final_payment,
                "v_i_empty": v_empty,
                "satisfies_bound": true,
            }),
        );
    }
    report.insert("PaymentBound".to_string(), Value::Object(entries));
    Ok(())
}

/// No sampled cost-anchored bid may yield a winner more utility than its
/// submitted bid did. A single RNG is drawn sequentially across winners in
/// ascending id order.
fn check_truthful_bidding(
    workers: &[Worker],
    winners: &[&Worker],
    outcome: &AuctionOutcome,
    config: &AuctionConfig,
    bounded: bool,
    report: &mut BTreeMap<String, Value>,
) -> Result<()> {
    let quiet = AuctionConfig {
        debug: false,
        verify_properties: false,
        ..config.clone()
    };
    let mut rng = StdRng::seed_from_u64(config.verification_seed);
    let mut entries = Map::new();
    for w in winners {
        let payment = outcome.payments.get(&w.id).copied().unwrap_or(0.0);
        let true_utility = (payment - w.cost).max(0.0);
        let mut tested = 0usize;
        let mut best_gain = 0.0f64;
        let mut dominating: Vec<Value> = Vec::new();
        for _ in 0..config.truthfulness_samples {
            let multiplier: f64 = rng.random_range(0.5..2.0);
            if (multiplier - 1.0).abs() < 1e-9 {
                continue;
            }
            let fake_bid = w.cost * multiplier;
            let modified = clone_with_bid(workers, w.id, fake_bid);
            let fake = run_core(&modified, &quiet)?;
            let fake_utility = if fake.winner_ids.contains(&w.id) {
                fake.payments.get(&w.id).copied().unwrap_or(0.0) - w.cost
            } else {
                0.0
            };
            tested += 1;
            if fake_utility > true_utility + config.epsilon {
                best_gain = best_gain.max(fake_utility - true_utility);
                if dominating.len() < EXAMPLE_LIMIT {
                    dominating.push(json!({
                        "multiplier": multiplier,
                        "fake_bid": fake_bid.max(0.0),
                        "fake_utility": fake_utility,
                        "utility_gain": fake_utility - true_utility,
                    }));
                }
            }
        }
        if !dominating.is_empty() {
            return Err(Error::PropertyViolation(format!(
                "truthful bidding violated: {} gains up to {:.6} from a non-truthful bid",
                w, best_gain
            )));
        }
        entries.insert(
            w.id.to_string(),
            json!({
                "true_utility": true_utility,
                "fake_bids_tested": tested,
                "dominating_bids_count": 0,
                "dominating_bids_examples": [],
            }),
        );
    }
    let key = if bounded {
        entries.insert(
            "note".to_string(),
            json!(
                "bids deviate from cost under bounded rationality; the samples \
                 test cost-anchored alternatives against the realized utility"
            ),
        );
        "TruthfulnessBidding"
    } else {
        "Truthfulness"
    };
    report.insert(key.to_string(), Value::Object(entries));
    Ok(())
}

/// Share of multi-task winners whose accepted bundle mixes task values more
/// widely than [`ACCEPTANCE_CV_THRESHOLD`]. A wide spread marks a bundle
/// accepted by cue order rather than by value.
fn acceptance_quality(winners: &[&Worker]) -> Value {
    let multi: Vec<&&Worker> = winners.iter().filter(|w| w.tasks.len() >= 2).collect();
    if multi.is_empty() {
        return json!({
            "checked_winners": 0,
            "suboptimal_acceptances": 0,
            "suboptimal_rate": 0.0,
            "within_expected_bounds": true,
            "expected_range": [ACCEPTANCE_EXPECTED_RANGE.0, ACCEPTANCE_EXPECTED_RANGE.1],
            "cv_threshold": ACCEPTANCE_CV_THRESHOLD,
        });
    }
    let mut suboptimal = 0usize;
    for w in &multi {
        let values: Vec<f64> = w.tasks.iter().map(|t| t.value).collect();
        let mu = mean(&values);
        let cv = if mu <= 1e-9 { 0.0 } else { std_dev(&values) / mu };
        if cv > ACCEPTANCE_CV_THRESHOLD {
            suboptimal += 1;
        }
    }
    let rate = suboptimal as f64 / multi.len() as f64;
    json!({
        "checked_winners": multi.len(),
        "suboptimal_acceptances": suboptimal,
        "suboptimal_rate": rate,
        "within_expected_bounds":
            (ACCEPTANCE_RATE_BOUNDS.0..=ACCEPTANCE_RATE_BOUNDS.1).contains(&rate),
        "expected_range": [ACCEPTANCE_EXPECTED_RANGE.0, ACCEPTANCE_EXPECTED_RANGE.1],
        "cv_threshold": ACCEPTANCE_CV_THRESHOLD,
    })
}

/// Sample random nested coalitions S ⊂ T and count how often a worker's
/// marginal value over T exceeds its marginal value over S. Coverage values
/// are submodular, so any hit points at a broken marginal-value computation.
///
/// Populations of fewer than three workers cannot form a strict nesting and
/// report zero trials.
pub fn empirical_submodularity(workers: &[Worker], trials: usize, seed: u64) -> Value {
    let tolerance = 1e-9;
    if workers.len() < 3 {
        return json!({ "violations": 0, "trials": 0, "examples": [] });
    }
    let mut sorted: Vec<&Worker> = workers.iter().collect();
    sorted.sort_by_key(|w| w.id);
    let bundles: Vec<BTreeSet<TaskId>> = sorted
        .iter()
        .map(|w| w.tasks.iter().map(|t| t.id).collect())
        .collect();
    let n = sorted.len();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut violations = 0usize;
    let mut examples: Vec<Value> = Vec::new();
    for _ in 0..trials {
        let t_size = rng.random_range(1..n);
        let t_idx: BTreeSet<usize> = rand::seq::index::sample(&mut rng, n, t_size)
            .into_iter()
            .collect();
        let outside: Vec<usize> = (0..n).filter(|i| !t_idx.contains(i)).collect();
        let probe = outside[rng.random_range(0..outside.len())];
        if t_size == 1 {
            continue;
        }
        let t_vec: Vec<usize> = t_idx.iter().copied().collect();
        let s_size = rng.random_range(1..t_vec.len());
        let s_vec: Vec<usize> = rand::seq::index::sample(&mut rng, t_vec.len(), s_size)
            .into_iter()
            .map(|k| t_vec[k])
            .collect();
        let dv_s = marginal_value(sorted[probe], &cover(&bundles, &s_vec));
        let dv_t = marginal_value(sorted[probe], &cover(&bundles, &t_vec));
        if dv_s < dv_t - tolerance {
            violations += 1;
            if examples.len() < EXAMPLE_LIMIT {
                examples.push(json!({
                    "worker_id": sorted[probe].id,
                    "s_size": s_size,
                    "t_size": t_size,
                    "marginal_over_subset": dv_s,
                    "marginal_over_superset": dv_t,
                }));
            }
        }
    }
    json!({ "violations": violations, "trials": trials, "examples": examples })
}

fn cover(bundles: &[BTreeSet<TaskId>], idxs: &[usize]) -> BTreeSet<TaskId> {
    let mut covered = BTreeSet::new();
    for &i in idxs {
        covered.extend(bundles[i].iter().copied());
    }
    covered
}

/// Copy of the population with one worker's bid replaced. A negative
/// replacement bid is clamped to zero so the modified profile stays valid.
fn clone_with_bid(workers: &[Worker], id: WorkerId, new_bid: f64) -> Vec<Worker> {
    workers
        .iter()
        .map(|w| {
            let mut clone = w.clone();
            if clone.id == id {
                clone.bid = new_bid.max(0.0);
            }
            clone
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::run_auction;
    use crate::market::behavior::{Behavior, FrugalTreeKind};
    use crate::market::types::{GeoPos, Task, Worker};

    fn pos() -> GeoPos {
        GeoPos::new(40.42, -3.70).unwrap()
    }

    fn task(id: u32, value: f64) -> Task {
        Task::new(TaskId(id), pos(), value).unwrap()
    }

    fn worker(id: u32, bid: f64, cost: f64, tasks: Vec<Task>) -> Worker {
        let mut w = Worker::new(WorkerId(id), pos(), 0.5).unwrap();
        w.set_tasks(tasks);
        w.cost = cost;
        w.bid = bid;
        w
    }

    fn population() -> Vec<Worker> {
        vec![
            worker(1, 3.0, 3.0, vec![task(1, 5.0), task(2, 4.0)]),
            worker(2, 2.0, 2.0, vec![task(2, 4.0), task(3, 6.0)]),
            worker(3, 4.0, 4.0, vec![task(4, 3.0)]),
        ]
    }

    #[test]
    fn full_suite_passes_on_an_overlapping_population() {
        let workers = population();
        let config = AuctionConfig::default().with_debug(true);
        let outcome = run_auction(&workers, &config).unwrap();
        let checks = &outcome.diagnostics.property_checks;

        assert_eq!(checks["IndividualRationality"]["passed"], json!(true));
        assert_eq!(checks["Profitability"]["passed"], json!(true));
        let u0 = checks["Profitability"]["platform_utility"].as_f64().unwrap();
        assert!((u0 - 4.0).abs() < 1e-9);
        assert_eq!(checks["Monotonicity"]["1"]["still_wins"], json!(true));
        assert_eq!(checks["Monotonicity"]["2"]["still_wins"], json!(true));
        assert_eq!(checks["CriticalValue"]["1"]["wins_above"], json!(false));
        assert_eq!(checks["CriticalValue"]["1"]["wins_below"], json!(true));
        assert_eq!(checks["PaymentBound"]["2"]["satisfies_bound"], json!(true));
        assert_eq!(checks["Truthfulness"]["1"]["dominating_bids_count"], json!(0));
        assert_eq!(checks["Submodularity"]["violations"], json!(0));
    }

    #[test]
    fn payment_bound_is_skipped_without_traces() {
        let workers = population();
        let config = AuctionConfig::default();
        let outcome = run_auction(&workers, &config).unwrap();
        assert!(outcome.diagnostics.property_checks["PaymentBound"]
            .get("skipped")
            .is_some());
    }

    #[test]
    fn verification_leaves_the_population_untouched() {
        let workers = population();
        let bids: Vec<f64> = workers.iter().map(|w| w.bid).collect();
        let config = AuctionConfig::default().with_debug(true);
        run_auction(&workers, &config).unwrap();
        let after: Vec<f64> = workers.iter().map(|w| w.bid).collect();
        assert_eq!(bids, after);
    }

    #[test]
    fn coverage_marginals_are_submodular() {
        let workers = vec![
            worker(1, 1.0, 1.0, vec![task(1, 2.0), task(2, 3.0)]),
            worker(2, 1.0, 1.0, vec![task(2, 3.0), task(3, 1.0)]),
            worker(3, 1.0, 1.0, vec![task(1, 2.0), task(3, 1.0), task(4, 5.0)]),
            worker(4, 1.0, 1.0, vec![task(4, 5.0), task(5, 2.5)]),
            worker(5, 1.0, 1.0, vec![task(5, 2.5), task(6, 0.5)]),
        ];
        let summary = empirical_submodularity(&workers, 200, 42);
        assert_eq!(summary["violations"], json!(0));
        assert_eq!(summary["trials"], json!(200));
        assert!(summary["examples"].as_array().unwrap().is_empty());
    }

    #[test]
    fn tiny_populations_report_zero_trials() {
        let workers = vec![
            worker(1, 1.0, 1.0, vec![task(1, 2.0)]),
            worker(2, 1.0, 1.0, vec![task(2, 3.0)]),
        ];
        let summary = empirical_submodularity(&workers, 100, 42);
        assert_eq!(summary["trials"], json!(0));
        assert_eq!(summary["violations"], json!(0));
    }

    #[test]
    fn bounded_cohorts_relabel_the_bidding_check() {
        let mut workers = population();
        for w in &mut workers {
            w.behavior =
                Some(Behavior::new(w.id, 0.9, FrugalTreeKind::LenientPectinate, 7).unwrap());
        }
        let config = AuctionConfig::default();
        let outcome = run_auction(&workers, &config).unwrap();
        let checks = &outcome.diagnostics.property_checks;

        assert!(checks.contains_key("TruthfulnessBidding"));
        assert!(!checks.contains_key("Truthfulness"));
        let acceptance = &checks["TruthfulnessAcceptance"];
        assert_eq!(acceptance["checked_winners"], json!(2));
        assert_eq!(acceptance["suboptimal_acceptances"], json!(0));
        assert_eq!(acceptance["within_expected_bounds"], json!(false));
    }
}
