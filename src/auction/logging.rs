use crate::market::types::WorkerId;
use serde::Serialize;

#[macro_export]
macro_rules! auction_info {
    ($($arg:tt)+) => {
        tracing::info!(target: "auction", $($arg)+)
    }
}

#[macro_export]
macro_rules! auction_debug {
    ($($arg:tt)+) => {
        tracing::debug!(target: "auction", $($arg)+)
    }
}

#[macro_export]
macro_rules! auction_warn {
    ($($arg:tt)+) => {
        tracing::warn!(target: "auction", $($arg)+)
    }
}

/// One candidate's standing in a selection iteration.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateEval {
    pub id: WorkerId,
    pub marginal_value: f64,
    pub bid: f64,
    pub effective_bid: f64,
    pub gain: f64,
}

/// One greedy selection iteration, including the terminal one in which no
/// candidate clears the gain threshold.
#[derive(Debug, Clone, Serialize)]
pub struct SelectionStep {
    pub iteration: usize,
    pub covered_before: usize,
    pub candidates: Vec<CandidateEval>,
    pub chosen: Option<WorkerId>,
    pub chosen_gain: Option<f64>,
    pub covered_after: usize,
}

/// One displacement step of the critical-value search for a winner.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentStep {
    pub position: usize,
    pub v_i: f64,
    pub competitor: WorkerId,
    pub v_j: f64,
    pub competitor_effective_bid: f64,
    pub candidate_threshold: f64,
    pub critical_so_far: f64,
}

/// Full critical-value trace for one winner.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentTrace {
    pub winner: WorkerId,
    pub steps: Vec<PaymentStep>,
    pub final_threshold: f64,
    pub final_payment: f64,
}

/// Log one selection iteration at debug level.
pub fn log_selection_step(step: &SelectionStep) {
    let candidates = step
        .candidates
        .iter()
        .map(|c| format!("W{}(mv={:.3}, gain={:.3})", c.id, c.marginal_value, c.gain))
        .collect::<Vec<_>>()
        .join(", ");
    match step.chosen {
        Some(id) => auction_debug!(
            "iteration {}: covered {} -> {}, chose W{} (gain {:.4}) among [{}]",
            step.iteration,
            step.covered_before,
            step.covered_after,
            id,
            step.chosen_gain.unwrap_or(0.0),
            candidates
        ),
        None => auction_debug!(
            "iteration {}: covered {}, no candidate clears the threshold among [{}]",
            step.iteration,
            step.covered_before,
            candidates
        ),
    }
}

/// Log the full critical-value search of one winner at debug level.
pub fn log_payment_trace(trace: &PaymentTrace) {
    auction_debug!(
        "payment for W{}: {} displacement steps, threshold {:.4}, payment {:.4}",
        trace.winner,
        trace.steps.len(),
        trace.final_threshold,
        trace.final_payment
    );
    for step in &trace.steps {
        auction_debug!(
            "  step {}: displaced by W{} (v_i={:.3}, v_j={:.3}, b_j={:.3}), candidate {:.4}, critical {:.4}",
            step.position,
            step.competitor,
            step.v_i,
            step.v_j,
            step.competitor_effective_bid,
            step.candidate_threshold,
            step.critical_so_far
        );
    }
}
