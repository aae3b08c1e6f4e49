use crate::gateway::Gateway;
use crate::sensor::{BatchOutcomeSet, ReadOutcome, SensorSpec};
use chrono::Utc;
use futures::future::join_all;
use std::time::Duration;

/// Reads every configured sensor concurrently, then retries only the failures
/// after one flat delay. A failing read never aborts its siblings: each read
/// resolves to its own outcome and failures are captured, not propagated.
///
/// There is exactly one retry wave. A retry success replaces the first-wave
/// outcome for that sensor; a second failure leaves the first-wave outcome in
/// place. Sensors whose final outcome is a failure are warned about and carry
/// no value into the record.
pub async fn read_batch<G: Gateway + Sync>(
    sensors: &[SensorSpec],
    gateway: &G,
    retry_delay: Duration,
) -> BatchOutcomeSet {
    let mut outcomes = BatchOutcomeSet::default();
    for outcome in read_wave(sensors.iter(), gateway).await {
        outcomes.insert(outcome);
    }

    let failed = outcomes.failed_ids(sensors);
    if !failed.is_empty() {
        tracing::info!(
            failed = failed.len(),
            delay_ms = retry_delay.as_millis() as u64,
            "retrying failed sensors after delay"
        );
        tokio::time::sleep(retry_delay).await;

        let retries = sensors.iter().filter(|spec| failed.contains(&spec.id));
        for outcome in read_wave(retries, gateway).await {
            if !outcome.is_failure() {
                outcomes.insert(outcome);
            }
        }
    }

    for spec in sensors {
        if let Some(outcome) = outcomes.get(&spec.id) {
            if let Err(err) = &outcome.reading {
                tracing::warn!(
                    sensor = %spec.id,
                    address = %spec.address,
                    attempted_at = %outcome.attempted_at,
                    error = %err,
                    "sensor read failed after retry; no value recorded"
                );
            }
        }
    }

    outcomes
}

/// One concurrent fan-out. All reads are launched together and the wave settles
/// only once every read has resolved; completion order is irrelevant because
/// outcomes carry their sensor id.
async fn read_wave<'a, G: Gateway + Sync>(
    sensors: impl Iterator<Item = &'a SensorSpec>,
    gateway: &G,
) -> Vec<ReadOutcome> {
    join_all(sensors.map(|spec| attempt(spec, gateway))).await
}

async fn attempt<G: Gateway>(spec: &SensorSpec, gateway: &G) -> ReadOutcome {
    let attempted_at = Utc::now();
    let reading = gateway.read(&spec.address).await;
    ReadOutcome {
        sensor_id: spec.id.clone(),
        attempted_at,
        reading,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayError;
    use crate::record::build_record;
    use crate::sensor::SensorKind;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Instant;

    /// Gateway that pops a scripted response per address per attempt. Addresses
    /// with an exhausted (or missing) script time out.
    struct ScriptedGateway {
        responses: Mutex<HashMap<String, VecDeque<Result<String, GatewayError>>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedGateway {
        fn new(scripts: Vec<(&str, Vec<Result<String, GatewayError>>)>) -> Self {
            let responses = scripts
                .into_iter()
                .map(|(address, attempts)| (address.to_string(), attempts.into_iter().collect()))
                .collect();
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls_for(&self, address: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|called| called.as_str() == address)
                .count()
        }

        fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl Gateway for ScriptedGateway {
        async fn read(&self, address: &str) -> Result<String, GatewayError> {
            self.calls.lock().unwrap().push(address.to_string());
            self.responses
                .lock()
                .unwrap()
                .get_mut(address)
                .and_then(VecDeque::pop_front)
                .unwrap_or(Err(GatewayError::Timeout))
        }
    }

    fn spec(id: &str, kind: SensorKind) -> SensorSpec {
        SensorSpec {
            id: id.to_string(),
            kind,
            address: format!("/{id}"),
        }
    }

    fn ok(raw: &str) -> Result<String, GatewayError> {
        Ok(raw.to_string())
    }

    #[tokio::test]
    async fn all_success_first_wave_skips_retry_and_delay() {
        let sensors = vec![
            spec("office_humidity", SensorKind::Humidity),
            spec("outdoor_temperature", SensorKind::Temperature),
        ];
        let gateway = ScriptedGateway::new(vec![
            ("/office_humidity", vec![ok("55.4")]),
            ("/outdoor_temperature", vec![ok("21.234")]),
        ]);

        let started = Instant::now();
        let outcomes = read_batch(&sensors, &gateway, Duration::from_secs(30)).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(gateway.total_calls(), 2);
        assert!(!outcomes.get("office_humidity").unwrap().is_failure());
        assert!(!outcomes.get("outdoor_temperature").unwrap().is_failure());
    }

    #[tokio::test]
    async fn retry_success_replaces_first_wave_failure() {
        let sensors = vec![
            spec("a", SensorKind::Humidity),
            spec("b", SensorKind::Temperature),
        ];
        let gateway = ScriptedGateway::new(vec![
            ("/a", vec![ok("55.4")]),
            ("/b", vec![Err(GatewayError::Timeout), ok("19.97")]),
        ]);

        let outcomes = read_batch(&sensors, &gateway, Duration::ZERO).await;

        assert_eq!(gateway.calls_for("/a"), 1);
        assert_eq!(gateway.calls_for("/b"), 2);
        assert_eq!(
            outcomes.get("b").unwrap().reading.as_deref().unwrap(),
            "19.97"
        );
    }

    #[tokio::test]
    async fn second_failure_retains_first_wave_outcome() {
        let sensors = vec![spec("b", SensorKind::Temperature)];
        let gateway = ScriptedGateway::new(vec![(
            "/b",
            vec![
                Err(GatewayError::Protocol { code: -5 }),
                Err(GatewayError::Timeout),
            ],
        )]);

        let outcomes = read_batch(&sensors, &gateway, Duration::ZERO).await;

        assert_eq!(gateway.calls_for("/b"), 2);
        let outcome = outcomes.get("b").unwrap();
        assert!(matches!(
            outcome.reading,
            Err(GatewayError::Protocol { code: -5 })
        ));
    }

    #[tokio::test]
    async fn retry_waits_for_the_configured_delay() {
        let sensors = vec![spec("b", SensorKind::Temperature)];
        let gateway = ScriptedGateway::new(vec![(
            "/b",
            vec![Err(GatewayError::Timeout), ok("19.97")],
        )]);

        let started = Instant::now();
        let outcomes = read_batch(&sensors, &gateway, Duration::from_millis(150)).await;

        assert!(started.elapsed() >= Duration::from_millis(150));
        assert!(!outcomes.get("b").unwrap().is_failure());
    }

    #[tokio::test]
    async fn zero_delay_still_retries() {
        let sensors = vec![spec("b", SensorKind::Temperature)];
        let gateway = ScriptedGateway::new(vec![(
            "/b",
            vec![Err(GatewayError::Timeout), ok("19.97")],
        )]);

        let outcomes = read_batch(&sensors, &gateway, Duration::ZERO).await;

        assert_eq!(gateway.calls_for("/b"), 2);
        assert!(!outcomes.get("b").unwrap().is_failure());
    }

    #[tokio::test]
    async fn batch_then_record_end_to_end() {
        let sensors = vec![
            spec("a", SensorKind::Humidity),
            spec("b", SensorKind::Temperature),
        ];
        let gateway = ScriptedGateway::new(vec![
            ("/a", vec![ok("55.4")]),
            ("/b", vec![Err(GatewayError::Timeout), ok("19.97")]),
        ]);

        let outcomes = read_batch(&sensors, &gateway, Duration::ZERO).await;
        let finalized_at = Utc::now();
        let record = build_record(&outcomes, &sensors, finalized_at).unwrap();

        assert_eq!(
            record.columns,
            vec![("a".to_string(), 55.0), ("b".to_string(), 19.97)]
        );
        assert_eq!(record.finalized_at, finalized_at);
    }
}
