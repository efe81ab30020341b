//! # imcu - Reverse-Auction Incentive Mechanisms for Mobile Crowdsourcing
//!
//! imcu simulates a combinatorial reverse auction in which mobile workers bid
//! to serve bundles of sensing tasks. Winners are picked greedily by marginal
//! coverage value and paid their critical value, which keeps the mechanism
//! truthful, individually rational and profitable. On top of that baseline
//! the behavioral phases let workers deviate under bounded rationality and
//! let the platform learn worker reliability through Bayesian beliefs.
//!
//! ## Modules
//!
//! - [`auction`] - Winner selection, critical-value payments, property verification, round metrics
//! - [`market`] - Tasks, workers, behavior and belief models, population generation, reports
//! - [`sim`] - Day-scale hourly simulation driver for the three phases
//! - [`config`] - Simulation and auction configuration
//! - [`error`] - Error types and handling
//! - [`logger`] - Console and file tracing setup
//!
//! ## Quick Start
//!
//! ```rust
//! use imcu::*;
//!
//! // Three tasks and two truthful workers bidding their cost.
//! let t1 = Task::new(TaskId(1), GeoPos::new(40.42, -3.70)?, 5.0)?;
//! let t2 = Task::new(TaskId(2), GeoPos::new(40.43, -3.71)?, 4.0)?;
//! let t3 = Task::new(TaskId(3), GeoPos::new(40.44, -3.72)?, 6.0)?;
//!
//! let mut alice = Worker::new(WorkerId(1), GeoPos::new(40.42, -3.70)?, 0.9)?;
//! alice.set_tasks(vec![t1, t2.clone()]);
//! alice.cost = 3.0;
//! alice.bid = 3.0;
//!
//! let mut bob = Worker::new(WorkerId(2), GeoPos::new(40.43, -3.71)?, 1.1)?;
//! bob.set_tasks(vec![t2, t3]);
//! bob.cost = 2.0;
//! bob.bid = 2.0;
//!
//! let outcome = run_auction(&[alice, bob], &AuctionConfig::default())?;
//! assert_eq!(outcome.winner_ids.len(), 2);
//! assert!(outcome.diagnostics.payments_sum >= 5.0);
//! # Ok::<(), imcu::Error>(())
//! ```

pub mod auction;
pub mod config;
pub mod error;
pub mod logger;
pub mod market;
pub mod sim;

pub use auction::*;
pub use config::*;
pub use error::*;
pub use market::*;
pub use sim::*;
