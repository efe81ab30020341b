//! Single-round walkthrough: build a small marketplace by hand, run the
//! reverse auction with tracing on, and print who wins, what they are paid
//! and what the property suite concluded.

use imcu::logger;
use imcu::*;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    logger::init_stdout("info");

    println!("Simple Reverse-Auction Example");
    println!("==============================");

    // Five sensing tasks spread along a short corridor.
    let t1 = Task::new(TaskId(1), GeoPos::new(40.420, -3.700)?, 5.0)?;
    let t2 = Task::new(TaskId(2), GeoPos::new(40.425, -3.705)?, 4.0)?;
    let t3 = Task::new(TaskId(3), GeoPos::new(40.430, -3.710)?, 6.0)?;
    let t4 = Task::new(TaskId(4), GeoPos::new(40.435, -3.715)?, 3.0)?;
    let t5 = Task::new(TaskId(5), GeoPos::new(40.440, -3.720)?, 7.0)?;

    // Three truthful workers with overlapping bundles, bidding their cost.
    let mut workers = vec![
        Worker::new(WorkerId(1), GeoPos::new(40.420, -3.700)?, 0.9)?,
        Worker::new(WorkerId(2), GeoPos::new(40.428, -3.707)?, 1.1)?,
        Worker::new(WorkerId(3), GeoPos::new(40.438, -3.718)?, 1.0)?,
    ];
    workers[0].set_tasks(vec![t1, t2.clone()]);
    workers[0].cost = 3.0;
    workers[0].bid = 3.0;
    workers[1].set_tasks(vec![t2, t3]);
    workers[1].cost = 2.0;
    workers[1].bid = 2.0;
    workers[2].set_tasks(vec![t4, t5]);
    workers[2].cost = 4.0;
    workers[2].bid = 4.0;

    for w in &workers {
        let task_ids: Vec<String> = w.tasks.iter().map(|t| t.to_string()).collect();
        println!("{} offers [{}] for a bid of {:.2}", w, task_ids.join(", "), w.bid);
    }

    println!("\nRunning selection, payments and the property suite...");
    let config = AuctionConfig::default().with_debug(true);
    let outcome = run_auction(&workers, &config)?;
    apply_outcome(&mut workers, &outcome);

    println!("\nWinners and critical-value payments:");
    for w in &workers {
        if w.is_winner {
            println!(
                "  {} wins, paid {:.2} (bid {:.2}, utility {:+.2})",
                w, w.payment, w.bid, w.utility
            );
        } else {
            println!("  {} loses", w);
        }
    }

    let diag = &outcome.diagnostics;
    println!("\nPlatform view:");
    println!("  covered tasks:    {}/{}", diag.covered_tasks_count, diag.m_tasks);
    println!("  coalition value:  {:.2}", diag.platform_value_vs);
    println!("  total payments:   {:.2}", diag.payments_sum);
    println!("  platform utility: {:.2}", diag.platform_utility_u0);
    println!(
        "  marginal-value calls: {} selection, {} payment",
        diag.mv_calls_selection, diag.mv_calls_payment
    );

    println!("\nProperty checks:");
    for (name, result) in &diag.property_checks {
        println!("  {name}: {result}");
    }

    println!("\nSelection trace:");
    for step in &diag.selection_steps {
        match (step.chosen, step.chosen_gain) {
            (Some(id), Some(gain)) => println!(
                "  iteration {}: W{} committed with gain {:.2} ({} candidates evaluated)",
                step.iteration,
                id,
                gain,
                step.candidates.len()
            ),
            _ => println!(
                "  iteration {}: no candidate above epsilon, selection stops",
                step.iteration
            ),
        }
    }

    Ok(())
}
