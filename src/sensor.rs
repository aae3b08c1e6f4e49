use crate::gateway::GatewayError;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Temperature,
    Humidity,
    Other,
}

/// One configured sensor. `id` doubles as the storage column name and must be
/// unique within a batch.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorSpec {
    pub id: String,
    pub kind: SensorKind,
    pub address: String,
}

/// Result of one gateway attempt for one sensor. A successful retry supersedes
/// the first-wave outcome; outcomes are never mutated in place.
#[derive(Debug)]
pub struct ReadOutcome {
    pub sensor_id: String,
    pub attempted_at: DateTime<Utc>,
    pub reading: Result<String, GatewayError>,
}

impl ReadOutcome {
    pub fn is_failure(&self) -> bool {
        self.reading.is_err()
    }
}

/// Per-sensor outcomes for one batch, keyed by sensor id. After `read_batch`
/// completes this holds exactly one entry per configured sensor, reflecting the
/// most recent attempt for that sensor.
#[derive(Debug, Default)]
pub struct BatchOutcomeSet {
    outcomes: HashMap<String, ReadOutcome>,
}

impl BatchOutcomeSet {
    /// Records an outcome, replacing any previous outcome for the same sensor.
    pub fn insert(&mut self, outcome: ReadOutcome) {
        self.outcomes.insert(outcome.sensor_id.clone(), outcome);
    }

    pub fn get(&self, sensor_id: &str) -> Option<&ReadOutcome> {
        self.outcomes.get(sensor_id)
    }

    /// Ids of sensors whose current outcome is a failure, in configuration order.
    pub fn failed_ids(&self, sensors: &[SensorSpec]) -> Vec<String> {
        sensors
            .iter()
            .filter(|spec| {
                self.outcomes
                    .get(&spec.id)
                    .map(ReadOutcome::is_failure)
                    .unwrap_or(false)
            })
            .map(|spec| spec.id.clone())
            .collect()
    }
}
