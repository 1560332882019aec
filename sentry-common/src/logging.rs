//! Tracing/logging initialization, driven by the top-level `loglevel`
//! configuration key. Per-stage `loglevel` overrides are applied
//! by each stage via [`tracing::Span`] targets rather than a second global
//! subscriber, since `tracing-subscriber`'s `EnvFilter` already supports
//! per-target directives.
use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber.
///
/// `default_level` is the top-level `loglevel` config key, or `"info"` if
/// unset. Per-stage overrides (`<module-name>=<level>`) are appended as
/// additional `EnvFilter` directives, matching the original's per-module
/// `logger.setLevel` capability.
pub fn init_logging(default_level: &str, stage_overrides: &[(String, String)]) {
    let mut filter = EnvFilter::try_new(default_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    for (module, level) in stage_overrides {
        if let Ok(directive) = format!("{module}={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .ok();
}
