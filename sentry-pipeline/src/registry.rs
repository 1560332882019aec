//! Static module-name → constructor table: configuration references a stage
//! by a dotted module name string, which resolves to an entry in this table
//! rather than being loaded dynamically.
use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::sinks::{AlertKafka, AlertKafkaConfig};
use crate::sources::historical::queryparams_from_json;
use crate::sources::{Historical, HistoricalConfig, Realtime, RealtimeConfig};
use crate::stage::{Filter, Sink, Source};
use crate::stages::moving_stat::{statistic_from_spec, Inpainting, MovingStatConfig};
use crate::stages::{AggSum, AggSumConfig, MovingStat};
use sentry_common::error::ConfigError;

/// The constructed form of a single pipeline entry: exactly one of these
/// variants depending on which trait the named module implements.
pub enum StageKind {
    Source(Box<dyn Source>),
    Filter(Box<dyn Filter>),
    Sink(Box<dyn Sink>),
}

type Constructor = fn(&str, serde_json::Value) -> Result<StageKind, ConfigError>;

fn registry() -> &'static HashMap<&'static str, Constructor> {
    static REGISTRY: OnceLock<HashMap<&'static str, Constructor>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut m: HashMap<&'static str, Constructor> = HashMap::new();
        m.insert("Historical", build_historical);
        m.insert("Realtime", build_realtime);
        m.insert("AggSum", build_agg_sum);
        m.insert("MovingStat", build_moving_stat);
        m.insert("AlertKafka", build_alert_kafka);
        m
    })
}

/// Looks up and constructs the stage named `module` from its raw `options`
/// JSON object. `location` identifies this pipeline entry for error
/// messages (e.g. `"pipeline[2]"`).
pub fn build_stage(
    location: &str,
    module: &str,
    options: serde_json::Value,
) -> Result<StageKind, ConfigError> {
    let constructor = registry()
        .get(module)
        .ok_or_else(|| ConfigError::new(location, format!("unknown module '{module}'")))?;
    constructor(location, options)
}

fn deny_unknown<T: serde::de::DeserializeOwned>(
    location: &str,
    options: serde_json::Value,
) -> Result<T, ConfigError> {
    serde_json::from_value(options).map_err(|e| ConfigError::new(location, e.to_string()))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct HistoricalOptions {
    expression: String,
    starttime: String,
    endtime: String,
    batchduration: i64,
    url: String,
    #[serde(default)]
    queryparams: serde_json::Value,
    #[serde(default)]
    ignorenull: bool,
}

fn build_historical(location: &str, options: serde_json::Value) -> Result<StageKind, ConfigError> {
    let opts: HistoricalOptions = deny_unknown(location, options)?;
    let starttime = sentry_common::time::parse_utc_timestamp(location, &opts.starttime)?;
    let endtime = sentry_common::time::parse_utc_timestamp(location, &opts.endtime)?;
    let queryparams = queryparams_from_json(&opts.queryparams)
        .map_err(|e| ConfigError::new(location, e))?;
    Ok(StageKind::Source(Box::new(Historical::new(
        HistoricalConfig {
            expression: opts.expression,
            starttime,
            endtime,
            batchduration: opts.batchduration,
            url: opts.url,
            queryparams,
            ignorenull: opts.ignorenull,
        },
    ))))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RealtimeOptions {
    expressions: Vec<String>,
    interval: i64,
    timeout: i64,
    brokers: String,
    consumergroup: String,
    topicprefix: String,
    channelname: String,
}

fn build_realtime(location: &str, options: serde_json::Value) -> Result<StageKind, ConfigError> {
    let opts: RealtimeOptions = deny_unknown(location, options)?;
    let expressions = opts
        .expressions
        .iter()
        .map(|g| globmatch::compile(g).map_err(|e| ConfigError::new(location, e.to_string())))
        .collect::<Result<Vec<Regex>, ConfigError>>()?;
    Ok(StageKind::Source(Box::new(Realtime::new(RealtimeConfig {
        expressions,
        interval: opts.interval,
        timeout: opts.timeout,
        brokers: opts.brokers,
        consumergroup: opts.consumergroup,
        topicprefix: opts.topicprefix,
        channelname: opts.channelname,
    }))))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct AggSumOptions {
    expression: String,
    groupsize: Option<u32>,
    timeout: i64,
    #[serde(default)]
    droppartial: bool,
}

fn build_agg_sum(location: &str, options: serde_json::Value) -> Result<StageKind, ConfigError> {
    let opts: AggSumOptions = deny_unknown(location, options)?;
    let translated = globmatch::translate(&opts.expression)
        .map_err(|e| ConfigError::new(location, e.to_string()))?;
    let matcher = Regex::new(&translated.pattern)
        .map_err(|e| ConfigError::new(location, format!("internal regex error: {e}")))?;
    Ok(StageKind::Filter(Box::new(AggSum::new(AggSumConfig {
        glob: opts.expression,
        matcher,
        groupsize: opts.groupsize,
        timeout: opts.timeout,
        droppartial: opts.droppartial,
    }))))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct InpaintingOptions {
    min: Option<f64>,
    max: Option<f64>,
    maxduration: i64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MovingStatOptions {
    #[serde(rename = "type")]
    kind: Vec<serde_json::Value>,
    history: i64,
    warmup: i64,
    #[serde(default)]
    inpainting: Option<InpaintingOptions>,
}

fn build_moving_stat(location: &str, options: serde_json::Value) -> Result<StageKind, ConfigError> {
    let opts: MovingStatOptions = deny_unknown(location, options)?;
    if opts.warmup >= opts.history {
        return Err(ConfigError::new(
            location,
            "'warmup' must be less than 'history'",
        ));
    }
    let mut iter = opts.kind.into_iter();
    let name = iter
        .next()
        .and_then(|v| v.as_str().map(str::to_string))
        .ok_or_else(|| ConfigError::new(location, "'type' must start with a statistic name"))?;
    let params: Vec<f64> = iter.filter_map(|v| v.as_f64()).collect();
    let maker_name = name.clone();
    let maker_params = params.clone();
    statistic_from_spec(&name, &params).map_err(|e| ConfigError::new(location, e))?;

    let inpainting = opts.inpainting.map(|i| Inpainting {
        min: i.min,
        max: i.max,
        maxduration: i.maxduration,
    });
    if let Some(i) = inpainting {
        if i.min.is_none() && i.max.is_none() {
            return Err(ConfigError::new(
                location,
                "inpainting requires at least one of 'min' or 'max'",
            ));
        }
    }

    Ok(StageKind::Filter(Box::new(MovingStat::new(
        MovingStatConfig {
            history: opts.history,
            warmup: opts.warmup,
            inpainting,
        },
        move || statistic_from_spec(&maker_name, &maker_params).expect("validated at build time"),
    ))))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct AlertKafkaOptions {
    fqid: String,
    name: String,
    min: Option<f64>,
    max: Option<f64>,
    minduration: Option<i64>,
    brokers: String,
    topic: String,
    #[serde(default)]
    disable: bool,
}

fn build_alert_kafka(location: &str, options: serde_json::Value) -> Result<StageKind, ConfigError> {
    let opts: AlertKafkaOptions = deny_unknown(location, options)?;
    if opts.min.is_none() && opts.max.is_none() {
        return Err(ConfigError::new(
            location,
            "AlertKafka requires at least one of 'min' or 'max'",
        ));
    }
    let sink = AlertKafka::new(AlertKafkaConfig {
        fqid: opts.fqid,
        name: opts.name,
        min: opts.min,
        max: opts.max,
        minduration: opts.minduration,
        brokers: opts.brokers,
        topic: opts.topic,
        disable: opts.disable,
    })
    .map_err(|e| ConfigError::new(location, e.to_string()))?;
    Ok(StageKind::Sink(Box::new(sink)))
}
