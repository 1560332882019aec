//! The data unit every pipeline stage consumes and produces.

/// A single `(key, value, time)` observation.
///
/// `key` is the ascii-encoded metric identifier (e.g. `if.eth0.octets.in`).
/// `value` is `None` for a null reading (a source couldn't get a value for
/// this key at this time) and `Some` otherwise. `time` is a unix timestamp
/// in seconds, matching the original's `epoch_time` convention.
#[derive(Debug, Clone, PartialEq)]
pub struct Triple {
    pub key: String,
    pub value: Option<f64>,
    pub time: i64,
}

impl Triple {
    pub fn new(key: impl Into<String>, value: Option<f64>, time: i64) -> Self {
        Self {
            key: key.into(),
            value,
            time,
        }
    }
}
