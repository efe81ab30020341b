//! Travel-distance estimation over a task bundle.
//!
//! Workers do not solve a TSP. The strategy models how well a worker plans
//! a route as a function of their rationality level, and a fixed urban
//! correction factor inflates the geometric distance to street distance.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::market::types::{GeoPos, Task};

pub const URBAN_CORRECTION_BASE: f64 = 1.30;
pub const ROUTING_INEFFICIENCY_MAX: f64 = 0.40;
pub const ROUTING_GAMMA: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingStrategy {
    /// Out-and-back per task, no chaining.
    Star,
    /// Greedy nearest-neighbor closed tour.
    NearestNeighborTour,
    /// Closed tour over a randomly shuffled visit order.
    ShuffledTour,
}

impl RoutingStrategy {
    pub fn for_rationality(rationality: f64) -> Self {
        if rationality >= 0.70 {
            Self::NearestNeighborTour
        } else if rationality >= 0.50 {
            Self::Star
        } else {
            Self::ShuffledTour
        }
    }
}

/// Street-distance correction: the urban base, inflated further for less
/// rational planners (decays toward the base as rationality grows).
pub fn urban_correction(rationality: Option<f64>) -> f64 {
    match rationality {
        Some(rho) => {
            URBAN_CORRECTION_BASE
                * (1.0 + ROUTING_INEFFICIENCY_MAX * (-ROUTING_GAMMA * rho.max(0.0)).exp())
        }
        None => URBAN_CORRECTION_BASE,
    }
}

/// Corrected travel distance in kilometers over the bundle. A single task is
/// always an out-and-back trip regardless of strategy; the shuffled tour
/// draws its visit order from the given RNG and degrades to offer order
/// without one.
pub fn travel_distance_km(
    origin: &GeoPos,
    tasks: &[Task],
    strategy: RoutingStrategy,
    correction: f64,
    rng: Option<&mut StdRng>,
) -> f64 {
    if tasks.is_empty() {
        return 0.0;
    }
    let total_m = if tasks.len() == 1 {
        2.0 * origin.distance_m(&tasks[0].pos)
    } else {
        match strategy {
            RoutingStrategy::Star => star_m(origin, tasks),
            RoutingStrategy::NearestNeighborTour => nearest_neighbor_tour_m(origin, tasks),
            RoutingStrategy::ShuffledTour => shuffled_tour_m(origin, tasks, rng),
        }
    };
    total_m * correction / 1000.0
}

fn star_m(origin: &GeoPos, tasks: &[Task]) -> f64 {
    tasks.iter().map(|t| 2.0 * origin.distance_m(&t.pos)).sum()
}

fn nearest_neighbor_tour_m(origin: &GeoPos, tasks: &[Task]) -> f64 {
    let mut remaining: Vec<&Task> = tasks.iter().collect();
    let mut route: Vec<&Task> = Vec::with_capacity(tasks.len());
    let mut current = *origin;
    while !remaining.is_empty() {
        let mut best = 0;
        let mut best_d = current.distance_m(&remaining[0].pos);
        for (i, t) in remaining.iter().enumerate().skip(1) {
            let d = current.distance_m(&t.pos);
            if d < best_d {
                best = i;
                best_d = d;
            }
        }
        let next = remaining.swap_remove(best);
        current = next.pos;
        route.push(next);
    }
    closed_tour_m(origin, &route)
}

fn shuffled_tour_m(origin: &GeoPos, tasks: &[Task], rng: Option<&mut StdRng>) -> f64 {
    let mut order: Vec<&Task> = tasks.iter().collect();
    if let Some(rng) = rng {
        order.shuffle(rng);
    }
    closed_tour_m(origin, &order)
}

fn closed_tour_m(origin: &GeoPos, route: &[&Task]) -> f64 {
    let mut total = origin.distance_m(&route[0].pos);
    for pair in route.windows(2) {
        total += pair[0].pos.distance_m(&pair[1].pos);
    }
    total + route[route.len() - 1].pos.distance_m(origin)
}
