use crate::sensor::{BatchOutcomeSet, SensorKind, SensorSpec};
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("all sensor readings failed; nothing to record")]
    AllSensorsFailed,
}

/// One storable row: sensor columns in configuration order plus the single
/// batch-finalize timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub columns: Vec<(String, f64)>,
    pub finalized_at: DateTime<Utc>,
}

impl Record {
    /// Flat JSON object for read-only runs, shaped like the stored row.
    pub fn to_json(&self) -> serde_json::Value {
        let mut row = serde_json::Map::with_capacity(self.columns.len() + 1);
        for (column, value) in &self.columns {
            row.insert(column.clone(), serde_json::json!(value));
        }
        row.insert(
            "timestamp".to_string(),
            serde_json::json!(self.finalized_at.to_rfc3339()),
        );
        serde_json::Value::Object(row)
    }
}

/// Shapes the finalized outcomes of one batch into a record.
///
/// Raw values are coerced to `f64` and normalized by kind: humidity rounds to
/// the nearest integer, temperature to two decimals (half away from zero),
/// other kinds pass through unrounded. Failed sensors contribute no column (the
/// row stays sparse; storage columns must be nullable), and a raw value that is
/// not a finite number is dropped the same way. Fails with `AllSensorsFailed`
/// when no sensor produced a usable value.
///
/// Pure: no I/O, no clock. `finalized_at` is captured once by the caller after
/// the retry wave settles.
pub fn build_record(
    outcomes: &BatchOutcomeSet,
    sensors: &[SensorSpec],
    finalized_at: DateTime<Utc>,
) -> Result<Record, RecordError> {
    let mut columns = Vec::with_capacity(sensors.len());
    for spec in sensors {
        let Some(outcome) = outcomes.get(&spec.id) else {
            continue;
        };
        let Ok(raw) = &outcome.reading else {
            continue;
        };
        match raw.trim().parse::<f64>() {
            Ok(value) if value.is_finite() => {
                columns.push((spec.id.clone(), normalize(spec.kind, value)));
            }
            _ => {
                tracing::warn!(sensor = %spec.id, raw = %raw, "discarding non-numeric reading");
            }
        }
    }

    if columns.is_empty() {
        return Err(RecordError::AllSensorsFailed);
    }

    Ok(Record {
        columns,
        finalized_at,
    })
}

fn normalize(kind: SensorKind, value: f64) -> f64 {
    match kind {
        SensorKind::Humidity => value.round(),
        SensorKind::Temperature => (value * 100.0).round() / 100.0,
        SensorKind::Other => value,
    }
}
