//! Paginated HTTP historical-query source.
use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::sources::handoff::{spawn_reader, HandoffIter};
use crate::stage::{Source, TripleIter};
use crate::triple::Triple;

const STAGE: &str = "Historical";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration for the [`Historical`] source, as parsed from the
/// `pipeline[]` config entry.
#[derive(Debug, Clone)]
pub struct HistoricalConfig {
    pub expression: String,
    pub starttime: i64,
    pub endtime: i64,
    pub batchduration: i64,
    pub url: String,
    pub queryparams: HashMap<String, String>,
    /// When true, points whose JSON value is `null` are dropped rather than
    /// forwarded as `Triple { value: None }`.
    pub ignorenull: bool,
}

pub struct Historical {
    config: HistoricalConfig,
}

impl Historical {
    pub fn new(config: HistoricalConfig) -> Self {
        Self { config }
    }
}

#[derive(Debug, Deserialize)]
struct HistoricalResponse {
    data: HistoricalData,
}

#[derive(Debug, Deserialize)]
struct HistoricalData {
    series: HashMap<String, SeriesData>,
}

#[derive(Debug, Deserialize)]
struct SeriesData {
    from: i64,
    step: i64,
    values: Vec<Option<f64>>,
}

fn fetch_slice(
    client: &reqwest::blocking::Client,
    config: &HistoricalConfig,
    from: i64,
    until: i64,
) -> Result<Vec<Triple>, String> {
    let mut form: Vec<(&str, String)> = vec![
        ("from", from.to_string()),
        ("until", until.to_string()),
        ("expression", config.expression.clone()),
    ];
    for (k, v) in &config.queryparams {
        form.push((k.as_str(), v.clone()));
    }

    let response = client
        .post(&config.url)
        .form(&form)
        .send()
        .map_err(|e| format!("request failed: {e}"))?;
    let response = response
        .error_for_status()
        .map_err(|e| format!("server returned an error: {e}"))?;
    let parsed: HistoricalResponse = response
        .json()
        .map_err(|e| format!("malformed response body: {e}"))?;

    let mut out = Vec::new();
    for (key, series) in parsed.data.series {
        for (i, value) in series.values.into_iter().enumerate() {
            if value.is_none() && config.ignorenull {
                continue;
            }
            let time = series.from + (i as i64) * series.step;
            out.push(Triple::new(key.clone(), value, time));
        }
    }
    Ok(out)
}

impl Source for Historical {
    fn into_stream(self: Box<Self>) -> TripleIter {
        let config = self.config;
        let consumer = spawn_reader::<Vec<Triple>, _>(STAGE, move |producer| {
            let client = match reqwest::blocking::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
            {
                Ok(c) => c,
                Err(e) => {
                    producer.send(Err(format!("failed to build http client: {e}")));
                    return;
                }
            };

            let mut from = config.starttime;
            while from < config.endtime {
                let until = (from + config.batchduration).min(config.endtime);
                debug!(from, until, "fetching historical slice");
                let result = fetch_slice(&client, &config, from, until);
                let stop = result.is_err();
                if !producer.send(result) {
                    return;
                }
                if stop {
                    return;
                }
                from = until;
            }
            producer.finish();
        });
        Box::new(HandoffIter::new(STAGE, consumer, |batch: Vec<Triple>| {
            batch.into_iter().map(Ok)
        }))
    }
}

/// Extracts the string-valued extra query parameters the config layer leaves
/// as an untyped JSON object, rejecting non-string values up front rather
/// than at request time.
pub fn queryparams_from_json(value: &Value) -> Result<HashMap<String, String>, String> {
    let mut out = HashMap::new();
    let Value::Object(map) = value else {
        if value.is_null() {
            return Ok(out);
        }
        return Err("queryparams must be an object of strings".to_string());
    };
    for (k, v) in map {
        match v.as_str() {
            Some(s) => {
                out.insert(k.clone(), s.to_string());
            }
            None => {
                warn!(key = %k, "queryparams value is not a string, coercing");
                out.insert(k.clone(), v.to_string());
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_series_into_triples() {
        let body = serde_json::json!({
            "queryParameters": {"from": 0, "until": 120},
            "data": {
                "series": {
                    "a.b.c": {"from": 0, "step": 60, "values": [1.0, null]}
                }
            }
        });
        let parsed: HistoricalResponse = serde_json::from_value(body).unwrap();
        let series = parsed.data.series.get("a.b.c").unwrap();
        assert_eq!(series.from, 0);
        assert_eq!(series.step, 60);
        assert_eq!(series.values, vec![Some(1.0), None]);
    }

    #[test]
    fn queryparams_rejects_non_object() {
        assert!(queryparams_from_json(&serde_json::json!([1, 2])).is_err());
    }

    #[test]
    fn queryparams_accepts_empty_null() {
        assert_eq!(
            queryparams_from_json(&Value::Null).unwrap(),
            HashMap::new()
        );
    }
}
