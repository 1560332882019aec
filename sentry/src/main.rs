//! CLI entry point: loads a pipeline configuration, builds the pipeline from
//! the module registry, drives it to completion, and maps failures to the
//! process exit codes.
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use miette::IntoDiagnostic;
use sentry_common::{config, logging};
use sentry_pipeline::error::{EXIT_INTERNAL_ERROR, EXIT_SUCCESS, EXIT_USER_ERROR};
use sentry_pipeline::Pipeline;
use tracing::error;

/// Streaming time-series anomaly detector.
#[derive(Parser, Debug)]
#[command(name = "sentry", version, about)]
struct Cli {
    /// Path to the pipeline configuration file (YAML or JSON).
    config: PathBuf,

    /// Address to expose Prometheus metrics on.
    #[arg(long, default_value = "0.0.0.0:9184")]
    metrics_address: SocketAddr,

    /// Disables the metrics HTTP listener entirely.
    #[arg(long)]
    no_metrics: bool,
}

fn exit(code: i32) -> ExitCode {
    ExitCode::from(code as u8)
}

fn stage_overrides(config: &config::RawConfig) -> Vec<(String, String)> {
    config
        .pipeline
        .iter()
        .filter_map(|stage| stage.loglevel.clone().map(|lvl| (stage.module.clone(), lvl)))
        .collect()
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if !cli.no_metrics
        && let Err(e) = PrometheusBuilder::new()
            .with_http_listener(cli.metrics_address)
            .install()
    {
        eprintln!("failed to install metrics exporter: {e}");
    }

    let raw_config = match config::load_config(&cli.config).into_diagnostic() {
        Ok(c) => c,
        Err(report) => {
            eprintln!("{report:?}");
            return exit(EXIT_USER_ERROR);
        }
    };

    logging::init_logging(
        raw_config.loglevel.as_deref().unwrap_or("info"),
        &stage_overrides(&raw_config),
    );

    let pipeline = match Pipeline::build(&raw_config) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "configuration error");
            return exit(EXIT_USER_ERROR);
        }
    };

    match pipeline.run() {
        Ok(()) => exit(EXIT_SUCCESS),
        Err(e) => {
            error!(error = %e, "pipeline failed");
            exit(EXIT_INTERNAL_ERROR)
        }
    }
}
