//! Synthetic alert generation for the producer.

use crate::alert::{Alert, AlertMetadata, AlertType};
use chrono::{SubsecRound, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

const SYSTEMS: [&str; 5] = [
    "Payments",
    "Authentication",
    "Monitoring",
    "Backup",
    "API Gateway",
];

/// Produces the next alert to publish.
pub trait AlertSource: Send + Sync {
    fn next_alert(&mut self) -> Alert;
}

/// Draws alerts at random from a fixed catalog.
pub struct RandomAlertGenerator {
    rng: StdRng,
    environment: String,
}

impl RandomAlertGenerator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            environment: "production".to_string(),
        }
    }

    /// Deterministic generator for tests.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            environment: "production".to_string(),
        }
    }

    fn templates(alert_type: AlertType) -> [&'static str; 3] {
        match alert_type {
            AlertType::Critical => [
                "Critical failure detected in {system}",
                "{system} is not responding",
                "CPU overload on {system}",
            ],
            AlertType::Warning => [
                "High memory usage on {system}",
                "Increased latency on {system}",
                "Error rate above normal on {system}",
            ],
            AlertType::Info => [
                "{system} restarted successfully",
                "Update applied to {system}",
                "Backup completed on {system}",
            ],
            AlertType::Error => [
                "Failed to process request on {system}",
                "Database connection failure on {system}",
                "Timeout while reaching {system}",
            ],
        }
    }
}

impl Default for RandomAlertGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertSource for RandomAlertGenerator {
    fn next_alert(&mut self) -> Alert {
        let alert_type = *AlertType::ALL
            .choose(&mut self.rng)
            .unwrap_or(&AlertType::Info);
        let system = *SYSTEMS.choose(&mut self.rng).unwrap_or(&SYSTEMS[0]);
        let template = *Self::templates(alert_type)
            .choose(&mut self.rng)
            .unwrap_or(&"{system}");

        // Millisecond precision keeps the wire timestamp identical to the id clock.
        let now = Utc::now().trunc_subsecs(3);

        Alert {
            id: Alert::make_id(now, self.rng.gen_range(0..1000)),
            alert_type,
            system: system.to_string(),
            message: template.replace("{system}", system),
            timestamp: Alert::format_timestamp(now),
            metadata: Some(AlertMetadata {
                hostname: Some(format!("server-{}", self.rng.gen_range(1..=10))),
                environment: Some(self.environment.clone()),
            }),
        }
    }
}
