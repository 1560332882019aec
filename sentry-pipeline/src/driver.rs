//! Composes a config's `pipeline` list into a runnable chain.
use sentry_common::config::RawConfig;
use sentry_common::error::ConfigError;

use crate::registry::{build_stage, StageKind};
use crate::stage::{Filter, Sink, Source, TripleIter};

/// A fully-wired pipeline, ready to run.
pub struct Pipeline {
    sink: Box<dyn Sink>,
    stream: TripleIter,
}

impl Pipeline {
    /// Walks `config.pipeline`, instantiating each stage in order and
    /// wiring its output into the next stage's input. Validates that
    /// exactly one source sits at position 0 and exactly one sink sits at
    /// the end.
    pub fn build(config: &RawConfig) -> Result<Self, ConfigError> {
        if config.pipeline.is_empty() {
            return Err(ConfigError::new("pipeline", "pipeline must not be empty"));
        }

        let mut stream: Option<TripleIter> = None;
        let mut sink: Option<Box<dyn Sink>> = None;
        let last_index = config.pipeline.len() - 1;

        for (i, entry) in config.pipeline.iter().enumerate() {
            let location = format!("pipeline[{i}]");
            let kind = build_stage(&location, &entry.module, entry.options.clone())?;
            match kind {
                StageKind::Source(source) => {
                    if i != 0 {
                        return Err(ConfigError::new(
                            location,
                            format!("'{}' is a source but is not the first stage", entry.module),
                        ));
                    }
                    stream = Some(source.into_stream());
                }
                StageKind::Filter(filter) => {
                    if i == 0 {
                        return Err(ConfigError::new(
                            location,
                            "pipeline must start with a source",
                        ));
                    }
                    if i == last_index {
                        return Err(ConfigError::new(
                            location,
                            "pipeline must end with a sink",
                        ));
                    }
                    let input = stream.take().ok_or_else(|| {
                        ConfigError::new(&location, "no upstream stream to filter")
                    })?;
                    stream = Some(filter.apply(input));
                }
                StageKind::Sink(s) => {
                    if i != last_index {
                        return Err(ConfigError::new(
                            location,
                            format!("'{}' is a sink but is not the last stage", entry.module),
                        ));
                    }
                    sink = Some(s);
                }
            }
        }

        let stream = stream
            .ok_or_else(|| ConfigError::new("pipeline", "pipeline has no source"))?;
        let sink = sink.ok_or_else(|| ConfigError::new("pipeline", "pipeline has no sink"))?;

        Ok(Self { sink, stream })
    }

    /// Drives the pipeline to completion by running the sink over the
    /// wired stream.
    pub fn run(self) -> Result<(), crate::error::StageError> {
        self.sink.run(self.stream)
    }
}
