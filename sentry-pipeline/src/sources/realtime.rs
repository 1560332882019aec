//! Kafka-backed live source with a per-key reorder buffer.
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use rdkafka::config::RDKafkaLogLevel;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::message::Message;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::sources::handoff::{spawn_reader, HandoffIter};
use crate::stage::{Source, TripleIter};
use crate::triple::Triple;

const STAGE: &str = "Realtime";
const POLL_TIMEOUT: Duration = Duration::from_millis(500);
const EOF_STREAK_LIMIT: u32 = 10;

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub expressions: Vec<Regex>,
    pub interval: i64,
    pub timeout: i64,
    pub brokers: String,
    pub consumergroup: String,
    pub topicprefix: String,
    pub channelname: String,
}

/// The wire shape of one realtime message: a header timestamp (the `msg_cb`
/// in the original) plus a set of key/value readings sharing that timestamp
/// (the `kv_cb` in the original).
#[derive(Debug, Deserialize)]
struct WireMessage {
    time: i64,
    values: HashMap<String, f64>,
}

struct KeyState {
    last_key_time: Option<i64>,
    buf: BTreeMap<i64, f64>,
    timer: Instant,
}

impl KeyState {
    fn new() -> Self {
        Self {
            last_key_time: None,
            buf: BTreeMap::new(),
            timer: Instant::now(),
        }
    }
}

/// Per-key reorder buffer that releases points in time order, holding
/// out-of-order arrivals until their predecessor shows up or a timeout
/// forces them out.
#[derive(Default)]
struct ReorderBuffer {
    keys: HashMap<String, KeyState>,
}

impl ReorderBuffer {
    fn new() -> Self {
        Self::default()
    }

    /// Processes one incoming `(key, time, value)`, returning any triples
    /// that become emittable as a result (the point itself and, if it makes
    /// the buffer contiguous, any buffered follow-ons).
    fn ingest(&mut self, key: &str, time: i64, value: f64, interval: i64) -> Vec<Triple> {
        let state = self
            .keys
            .entry(key.to_string())
            .or_insert_with(KeyState::new);
        let mut out = Vec::new();

        match state.last_key_time {
            None => {
                state.last_key_time = Some(time);
                state.timer = Instant::now();
                out.push(Triple::new(key, Some(value), time));
                drain_contiguous(key, state, interval, &mut out);
            }
            Some(last) if time == last + interval => {
                state.last_key_time = Some(time);
                state.timer = Instant::now();
                out.push(Triple::new(key, Some(value), time));
                drain_contiguous(key, state, interval, &mut out);
            }
            Some(last) if time > last + interval => {
                state.buf.insert(time, value);
                state.timer = Instant::now();
            }
            _ => {
                trace!(key, time, "dropping duplicate or stale realtime point");
            }
        }
        out
    }

    /// Force-releases exactly one buffered entry per key whose timer has
    /// expired, re-checking contiguity afterwards.
    fn sweep_timeouts(&mut self, timeout: i64, interval: i64) -> Vec<Triple> {
        let mut out = Vec::new();
        let expiry = Duration::from_secs(timeout.max(0) as u64);
        for (key, state) in self.keys.iter_mut() {
            if state.timer.elapsed() < expiry {
                continue;
            }
            if let Some((&time, &value)) = state.buf.iter().next() {
                state.buf.remove(&time);
                state.last_key_time = Some(time);
                state.timer = Instant::now();
                out.push(Triple::new(key.as_str(), Some(value), time));
                drain_contiguous(key, state, interval, &mut out);
            } else {
                state.timer = Instant::now();
            }
        }
        out
    }
}

fn drain_contiguous(key: &str, state: &mut KeyState, interval: i64, out: &mut Vec<Triple>) {
    loop {
        let Some(last) = state.last_key_time else { break };
        let next_time = last + interval;
        let Some(&value) = state.buf.get(&next_time) else {
            break;
        };
        state.buf.remove(&next_time);
        state.last_key_time = Some(next_time);
        state.timer = Instant::now();
        out.push(Triple::new(key, Some(value), next_time));
    }
}

pub struct Realtime {
    config: RealtimeConfig,
}

impl Realtime {
    pub fn new(config: RealtimeConfig) -> Self {
        Self { config }
    }
}

impl Source for Realtime {
    fn into_stream(self: Box<Self>) -> TripleIter {
        let config = self.config;
        let consumer = spawn_reader::<Vec<Triple>, _>(STAGE, move |producer| {
            let topic = format!("{}{}", config.topicprefix, config.channelname);
            let kafka_consumer: BaseConsumer = match sentry_common::kafka::consumer_config(
                &config.brokers,
                &config.consumergroup,
            )
            .set_log_level(RDKafkaLogLevel::Warning)
            .create()
            {
                Ok(c) => c,
                Err(e) => {
                    producer.send(Err(format!("failed to create kafka consumer: {e}")));
                    return;
                }
            };
            if let Err(e) = kafka_consumer.subscribe(&[topic.as_str()]) {
                producer.send(Err(format!("failed to subscribe to {topic}: {e}")));
                return;
            }

            let mut buffer = ReorderBuffer::new();
            let mut eof_streak = 0u32;

            loop {
                match kafka_consumer.poll(POLL_TIMEOUT) {
                    None => {
                        let triples = buffer.sweep_timeouts(config.timeout, config.interval);
                        if !triples.is_empty() && !producer.send(Ok(triples)) {
                            return;
                        }
                    }
                    Some(Ok(message)) => {
                        eof_streak = 0;
                        let payload = match message.payload() {
                            Some(p) => p,
                            None => continue,
                        };
                        let wire: WireMessage = match serde_json::from_slice(payload) {
                            Ok(w) => w,
                            Err(e) => {
                                warn!(error = %e, "dropping malformed realtime message");
                                continue;
                            }
                        };
                        let mut emitted = Vec::new();
                        for (key, value) in wire.values {
                            if !config.expressions.iter().any(|re| re.is_match(&key)) {
                                continue;
                            }
                            emitted.extend(buffer.ingest(
                                &key,
                                wire.time,
                                value,
                                config.interval,
                            ));
                        }
                        emitted.extend(buffer.sweep_timeouts(config.timeout, config.interval));
                        if !emitted.is_empty() && !producer.send(Ok(emitted)) {
                            return;
                        }
                    }
                    Some(Err(e)) if e.is_partition_eof() => {
                        eof_streak += 1;
                        debug!(eof_streak, "partition eof");
                        if eof_streak >= EOF_STREAK_LIMIT {
                            let triples = buffer.sweep_timeouts(config.timeout, config.interval);
                            if !triples.is_empty() && !producer.send(Ok(triples)) {
                                return;
                            }
                            eof_streak = 0;
                        }
                    }
                    Some(Err(e)) => {
                        producer.send(Err(format!("fatal kafka error: {e}")));
                        return;
                    }
                }
            }
        });
        Box::new(HandoffIter::new(STAGE, consumer, |batch: Vec<Triple>| {
            batch.into_iter().map(Ok)
        }))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn in_order_arrivals_emit_immediately() {
        let mut buf = ReorderBuffer::new();
        let out = buf.ingest("k", 0, 1.0, 60);
        assert_eq!(out.len(), 1);
        assert_eq!(out.first().unwrap().time, 0);
        let out = buf.ingest("k", 60, 2.0, 60);
        assert_eq!(out.len(), 1);
        assert_eq!(out.first().unwrap().time, 60);
    }

    #[test]
    fn out_of_order_arrivals_are_reordered() {
        let mut buf = ReorderBuffer::new();
        assert_eq!(buf.ingest("k", 0, 1.0, 60).len(), 1);
        assert!(buf.ingest("k", 120, 3.0, 60).is_empty());
        let out = buf.ingest("k", 60, 2.0, 60);
        assert_eq!(out.iter().map(|t| t.time).collect::<Vec<_>>(), vec![60, 120]);
    }

    #[test]
    fn stale_duplicate_is_dropped() {
        let mut buf = ReorderBuffer::new();
        assert_eq!(buf.ingest("k", 60, 1.0, 60).len(), 1);
        assert!(buf.ingest("k", 0, 1.0, 60).is_empty());
        assert!(buf.ingest("k", 60, 1.0, 60).is_empty());
    }
}
