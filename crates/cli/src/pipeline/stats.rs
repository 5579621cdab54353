//! Run summary.

use std::time::Duration;

use contracts::{EntityKind, EntityName};
use observability::HealthReport;
use store_client::ReconcileReport;

/// Outcome of one `run`
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub reconcile: ReconcileReport,
    /// Final health report, taken after every task stopped
    pub health: HealthReport,
    /// Sensors whose adapter or task could not be started
    pub not_started: Vec<EntityName>,
    /// Tasks aborted at the shutdown deadline
    pub aborted: Vec<EntityName>,
    pub duration: Duration,
}

impl RunSummary {
    pub fn observations_created(&self) -> u64 {
        self.health
            .sensors
            .iter()
            .map(|s| s.observations_created)
            .sum()
    }

    pub fn print_summary(&self) {
        println!("\n=== Run Summary ===\n");
        println!("Duration: {:.1}s", self.duration.as_secs_f64());
        println!("Reconciliation:");
        for kind in EntityKind::ALL {
            println!(
                "  {:<18} {} created, {} existing",
                kind.as_str(),
                self.reconcile.created_count(kind),
                self.reconcile.existing_count(kind)
            );
        }
        println!("Observations created: {}", self.observations_created());
        if !self.not_started.is_empty() {
            println!("Sensors not started: {}", join(&self.not_started));
        }
        if !self.aborted.is_empty() {
            println!("Tasks aborted at shutdown: {}", join(&self.aborted));
        }
        println!("\n{}", self.health);
    }
}

fn join(names: &[EntityName]) -> String {
    names.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(", ")
}
