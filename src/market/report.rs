//! Result files of a run: per-round KPI rows, the day summary, auction
//! diagnostics and the worker end state.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;

use crate::auction::Diagnostics;
use crate::market::types::Worker;
use crate::market::utils::mean;

/// One simulated hour: the market KPIs next to the auction diagnostics.
///
/// `v_mech` is the value of the tasks the mechanism could have served,
/// `v_eff` the value of the tasks that were actually completed. `u0_mech`
/// and `u0_eff` are the corresponding platform utilities after payments.
#[derive(Debug, Clone, Serialize)]
pub struct RoundReport {
    pub day: String,
    pub hour: u32,
    pub n_tasks: usize,
    pub n_workers: usize,
    pub n_bidders: usize,
    pub n_winners: usize,
    pub v_mech: f64,
    pub sum_payments: f64,
    pub u0_mech: f64,
    pub v_eff: f64,
    pub u0_eff: f64,
    pub efficiency_ratio: f64,
    pub winner_profiles: BTreeMap<String, usize>,
    pub defections_detected: usize,
    pub defections_total: usize,
    pub blacklisted: usize,
    pub diagnostics: Diagnostics,
}

/// Aggregate of a full simulated day.
#[derive(Debug, Clone, Serialize)]
pub struct DaySummary {
    pub rounds: usize,
    pub v_mech_total: f64,
    pub sum_payments_total: f64,
    pub u0_mech_total: f64,
    pub v_eff_total: f64,
    pub u0_eff_total: f64,
    pub efficiency_ratio_mean: f64,
    pub defections_detected_total: usize,
    pub defections_total: usize,
}

#[derive(Serialize)]
struct RunReport<'a> {
    rounds: &'a [RoundReport],
    summary: DaySummary,
}

pub fn day_summary(rounds: &[RoundReport]) -> DaySummary {
    let ratios: Vec<f64> = rounds.iter().map(|r| r.efficiency_ratio).collect();
    DaySummary {
        rounds: rounds.len(),
        v_mech_total: rounds.iter().map(|r| r.v_mech).sum(),
        sum_payments_total: rounds.iter().map(|r| r.sum_payments).sum(),
        u0_mech_total: rounds.iter().map(|r| r.u0_mech).sum(),
        v_eff_total: rounds.iter().map(|r| r.v_eff).sum(),
        u0_eff_total: rounds.iter().map(|r| r.u0_eff).sum(),
        efficiency_ratio_mean: mean(&ratios),
        defections_detected_total: rounds.iter().map(|r| r.defections_detected).sum(),
        defections_total: rounds.iter().map(|r| r.defections_total).sum(),
    }
}

/// Create `<base>/<label>_<YYYYmmdd_HHMMSS>/` and return its path.
pub fn create_result_dir<P: AsRef<Path>>(base: P, label: &str) -> Result<PathBuf> {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let dir = base.as_ref().join(format!("{label}_{stamp}"));
    fs::create_dir_all(&dir)
        .with_context(|| format!("creating result dir {}", dir.display()))?;
    Ok(dir)
}

/// Full run report as pretty JSON under `<result_dir>/summary.json`.
pub fn write_report_json<P: AsRef<Path>>(
    rounds: &[RoundReport],
    result_dir: P,
) -> Result<PathBuf> {
    let path = result_dir.as_ref().join("summary.json");
    let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    let report = RunReport {
        rounds,
        summary: day_summary(rounds),
    };
    serde_json::to_writer_pretty(file, &report)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

/// Diagnostics of a single auction as pretty JSON under
/// `<result_dir>/diagnostics.json`.
pub fn write_diagnostics_json<P: AsRef<Path>>(
    diagnostics: &Diagnostics,
    result_dir: P,
) -> Result<PathBuf> {
    let path = result_dir.as_ref().join("diagnostics.json");
    let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(file, diagnostics)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

/// One KPI row per simulated hour.
pub fn write_rounds_csv(path: &Path, rounds: &[RoundReport]) -> Result<()> {
    let mut file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    writeln!(
        file,
        "day,hour,n_tasks,n_workers,n_bidders,n_winners,v_mech,sum_payments,u0_mech,\
         v_eff,u0_eff,efficiency_ratio,defections_detected,defections_total,blacklisted"
    )?;
    for r in rounds {
        writeln!(
            file,
            "{},{},{},{},{},{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{},{},{}",
            r.day,
            r.hour,
            r.n_tasks,
            r.n_workers,
            r.n_bidders,
            r.n_winners,
            r.v_mech,
            r.sum_payments,
            r.u0_mech,
            r.v_eff,
            r.u0_eff,
            r.efficiency_ratio,
            r.defections_detected,
            r.defections_total,
            r.blacklisted,
        )?;
    }
    Ok(())
}

/// Single-row aggregate of the day.
pub fn write_day_summary_csv(path: &Path, summary: &DaySummary) -> Result<()> {
    let mut file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    writeln!(
        file,
        "rounds,v_mech_total,sum_payments_total,u0_mech_total,v_eff_total,u0_eff_total,\
         efficiency_ratio_mean,defections_detected_total,defections_total"
    )?;
    writeln!(
        file,
        "{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{},{}",
        summary.rounds,
        summary.v_mech_total,
        summary.sum_payments_total,
        summary.u0_mech_total,
        summary.v_eff_total,
        summary.u0_eff_total,
        summary.efficiency_ratio_mean,
        summary.defections_detected_total,
        summary.defections_total,
    )?;
    Ok(())
}

/// Per-candidate rows of the recorded selection steps. Terminal steps with
/// no remaining candidate produce a single row with blank candidate fields.
pub fn write_selection_csv(path: &Path, diagnostics: &Diagnostics) -> Result<()> {
    let mut file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    writeln!(
        file,
        "iteration,covered_before,chosen_id,chosen_gain,candidate_id,candidate_mv,\
         candidate_bid,candidate_gain"
    )?;
    for step in &diagnostics.selection_steps {
        let chosen = step.chosen.map(|id| id.to_string()).unwrap_or_default();
        let gain = step
            .chosen_gain
            .map(|g| format!("{g:.6}"))
            .unwrap_or_default();
        if step.candidates.is_empty() {
            writeln!(
                file,
                "{},{},{},{},,,,",
                step.iteration, step.covered_before, chosen, gain
            )?;
        } else {
            for c in &step.candidates {
                writeln!(
                    file,
                    "{},{},{},{},{},{:.6},{:.6},{:.6}",
                    step.iteration,
                    step.covered_before,
                    chosen,
                    gain,
                    c.id,
                    c.marginal_value,
                    c.effective_bid,
                    c.gain,
                )?;
            }
        }
    }
    Ok(())
}

/// Per-competitor rows of the recorded payment traces. Winners whose
/// threshold never moved past their own bid produce a single row with blank
/// step fields.
pub fn write_payments_csv(path: &Path, diagnostics: &Diagnostics) -> Result<()> {
    let mut file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    writeln!(
        file,
        "winner_id,position,competitor_id,v_i,v_j,competitor_bid,candidate_threshold,\
         critical_so_far,final_threshold,final_payment"
    )?;
    for trace in &diagnostics.payment_traces {
        if trace.steps.is_empty() {
            writeln!(
                file,
                "{},,,,,,,,{:.6},{:.6}",
                trace.winner, trace.final_threshold, trace.final_payment
            )?;
        } else {
            for s in &trace.steps {
                writeln!(
                    file,
                    "{},{},{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6}",
                    trace.winner,
                    s.position,
                    s.competitor,
                    s.v_i,
                    s.v_j,
                    s.competitor_effective_bid,
                    s.candidate_threshold,
                    s.critical_so_far,
                    trace.final_threshold,
                    trace.final_payment,
                )?;
            }
        }
    }
    Ok(())
}

/// End state of every worker: true and estimated behavioral parameters,
/// reputation components and the sanction counters. Columns a worker does
/// not carry stay blank.
pub fn write_worker_state_csv(path: &Path, workers: &[Worker]) -> Result<()> {
    let mut file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    writeln!(
        file,
        "worker_id,rationality_true,rationality_estimated,alpha,beta,reliability,quality,\
         aggregate,observations,strikes,penalty_accumulated,blacklisted_until_s"
    )?;
    for w in workers {
        let (estimated, alpha, beta, reliability, quality, aggregate, observations) =
            match &w.beliefs {
                Some(b) => (
                    format!("{:.4}", b.estimated_rationality),
                    format!("{:.4}", b.alpha),
                    format!("{:.4}", b.beta),
                    format!("{:.4}", b.reliability),
                    format!("{:.4}", b.quality),
                    format!("{:.4}", b.aggregate),
                    b.observations.to_string(),
                ),
                None => Default::default(),
            };
        let (strikes, penalty, blacklisted_until) = match &w.behavior {
            Some(b) => (
                b.strikes.to_string(),
                format!("{:.4}", b.penalty_accumulated),
                b.blacklisted_until
                    .map(|t| t.to_string())
                    .unwrap_or_default(),
            ),
            None => Default::default(),
        };
        let rationality = w
            .rationality()
            .map(|r| format!("{r:.4}"))
            .unwrap_or_default();
        writeln!(
            file,
            "{},{},{},{},{},{},{},{},{},{},{},{}",
            w.id,
            rationality,
            estimated,
            alpha,
            beta,
            reliability,
            quality,
            aggregate,
            observations,
            strikes,
            penalty,
            blacklisted_until,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::{CandidateEval, PaymentStep, PaymentTrace, SelectionStep};
    use crate::market::reputation::Beliefs;
    use crate::market::types::{GeoPos, WorkerId};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("imcu_{}_{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn round(hour: u32) -> RoundReport {
        RoundReport {
            day: "day-01".to_string(),
            hour,
            n_tasks: 10,
            n_workers: 20,
            n_bidders: 15,
            n_winners: 4,
            v_mech: 30.0,
            sum_payments: 12.0,
            u0_mech: 18.0,
            v_eff: 25.0,
            u0_eff: 13.0,
            efficiency_ratio: 25.0 / 30.0,
            winner_profiles: BTreeMap::new(),
            defections_detected: 1,
            defections_total: 2,
            blacklisted: 0,
            diagnostics: Diagnostics::default(),
        }
    }

    #[test]
    fn rounds_csv_has_one_row_per_hour() {
        let dir = scratch_dir("rounds");
        let path = dir.join("rounds.csv");
        write_rounds_csv(&path, &[round(8), round(9)]).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("day,hour,"));
        assert!(lines[1].starts_with("day-01,8,10,20,15,4,"));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn day_summary_totals_the_rounds() {
        let summary = day_summary(&[round(8), round(9)]);
        assert_eq!(summary.rounds, 2);
        assert!((summary.v_mech_total - 60.0).abs() < 1e-12);
        assert!((summary.efficiency_ratio_mean - 25.0 / 30.0).abs() < 1e-12);
        assert_eq!(summary.defections_total, 4);
    }

    #[test]
    fn selection_csv_writes_candidate_and_terminal_rows() {
        let mut diagnostics = Diagnostics::default();
        diagnostics.selection_steps = vec![
            SelectionStep {
                iteration: 1,
                covered_before: 0,
                candidates: vec![
                    CandidateEval {
                        id: WorkerId(1),
                        marginal_value: 9.0,
                        bid: 3.0,
                        effective_bid: 3.0,
                        gain: 6.0,
                    },
                    CandidateEval {
                        id: WorkerId(2),
                        marginal_value: 10.0,
                        bid: 2.0,
                        effective_bid: 2.0,
                        gain: 8.0,
                    },
                ],
                chosen: Some(WorkerId(2)),
                chosen_gain: Some(8.0),
                covered_after: 2,
            },
            SelectionStep {
                iteration: 2,
                covered_before: 2,
                candidates: Vec::new(),
                chosen: None,
                chosen_gain: None,
                covered_after: 2,
            },
        ];
        let dir = scratch_dir("selection");
        let path = dir.join("selection.csv");
        write_selection_csv(&path, &diagnostics).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("1,0,2,8.000000,1,"));
        let terminal: Vec<&str> = lines[3].split(',').collect();
        assert_eq!(terminal.len(), 8);
        assert_eq!(terminal[0], "2");
        assert_eq!(terminal[2], "");
        assert_eq!(terminal[4], "");
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn payments_csv_keeps_no_step_winners() {
        let mut diagnostics = Diagnostics::default();
        diagnostics.payment_traces = vec![
            PaymentTrace {
                winner: WorkerId(1),
                steps: vec![PaymentStep {
                    position: 1,
                    v_i: 9.0,
                    competitor: WorkerId(2),
                    v_j: 10.0,
                    competitor_effective_bid: 2.0,
                    candidate_threshold: 1.0,
                    critical_so_far: 3.0,
                }],
                final_threshold: 5.0,
                final_payment: 5.0,
            },
            PaymentTrace {
                winner: WorkerId(3),
                steps: Vec::new(),
                final_threshold: 4.0,
                final_payment: 4.0,
            },
        ];
        let dir = scratch_dir("payments");
        let path = dir.join("payments.csv");
        write_payments_csv(&path, &diagnostics).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("1,1,2,9.000000,10.000000,"));
        let blank: Vec<&str> = lines[2].split(',').collect();
        assert_eq!(blank.len(), 10);
        assert_eq!(blank[0], "3");
        assert_eq!(blank[1], "");
        assert_eq!(blank[8], "4.000000");
        assert_eq!(blank[9], "4.000000");
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn worker_state_csv_leaves_missing_layers_blank() {
        let mut plain = Worker::new(WorkerId(1), GeoPos::new(40.42, -3.70).unwrap(), 0.5).unwrap();
        plain.bid = 2.0;
        let mut tracked =
            Worker::new(WorkerId(2), GeoPos::new(40.43, -3.71).unwrap(), 0.5).unwrap();
        tracked.beliefs = Some(Beliefs::new());

        let dir = scratch_dir("state");
        let path = dir.join("workers.csv");
        write_worker_state_csv(&path, &[plain, tracked]).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let plain_fields: Vec<&str> = lines[1].split(',').collect();
        assert_eq!(plain_fields.len(), 12);
        assert_eq!(plain_fields[0], "1");
        assert_eq!(plain_fields[2], "");
        let tracked_fields: Vec<&str> = lines[2].split(',').collect();
        assert_ne!(tracked_fields[2], "");
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn report_json_round_trips() {
        let dir = scratch_dir("json");
        let path = write_report_json(&[round(8)], &dir).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["rounds"].as_array().unwrap().len(), 1);
        assert_eq!(value["summary"]["rounds"], serde_json::json!(1));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn diagnostics_default_serializes_without_traces() {
        let text = serde_json::to_string(&Diagnostics::default()).unwrap();
        assert!(!text.contains("selection_steps"));
        assert!(!text.contains("payment_traces"));
    }
}
