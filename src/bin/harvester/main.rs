// SPDX-License-Identifier: Apache-2.0

use clap::{Parser, ValueEnum};
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::select;
use tracing::metadata::LevelFilter;
use tracing::{error, info, warn};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use harvester::bounded_channel::{BoundedReceiver, bounded};
use harvester::harvester::{ExitReason, HarvestEvent, Harvester, HarvesterHandle};
use harvester::init::BoxError;
use harvester::init::args::HarvesterArgs;

#[derive(Debug, Parser)]
#[command(name = "harvester")]
#[command(bin_name = "harvester")]
#[command(version, about, long_about = None)]
struct Arguments {
    #[arg(value_enum, long, env = "HARVESTER_LOG_FORMAT", default_value = "text")]
    /// Log format
    log_format: LogFormatArg,

    #[command(flatten)]
    harvester: HarvesterArgs,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

fn main() -> ExitCode {
    let opt = Arguments::parse();

    let _guard = match setup_logging(&opt.log_format) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ERROR: failed to setup logging: {}", e);
            return ExitCode::from(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = ?e, "Failed to start runtime");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(opt.harvester)) {
        Ok(code) => code,
        Err(e) => {
            error!(error = ?e, "Failed to run harvester");
            ExitCode::from(1)
        }
    }
}

async fn run(args: HarvesterArgs) -> Result<ExitCode, BoxError> {
    let config = args.build_config();
    config.validate()?;
    let config = Arc::new(config);

    let registry = Arc::new(harvester::harvester::Registry::new());
    let (tx, rx) = bounded::<HarvestEvent>(args.channel_size);

    let successors = args.successor_map();
    let targets: HashSet<&Path> = successors.values().copied().collect();

    let mut handles = Vec::with_capacity(args.paths.len());
    for path in &args.paths {
        // The predecessor resumes on it after verifying continuity.
        if targets.contains(path.as_path()) {
            info!(?path, "Path is a successor target, waiting for hand-off");
            continue;
        }

        let mut builder = Harvester::builder(path.clone(), tx.clone(), Arc::clone(&registry))
            .tags(args.tags())
            .rotated(args.rotated)
            .config(Arc::clone(&config));
        if let Some(next) = successors.get(path.as_path()) {
            builder = builder.successor(*next);
        }
        handles.push(builder.build().spawn(args.offset, args.options()));
    }
    drop(tx);

    if handles.is_empty() {
        return Err("no paths left to harvest".into());
    }

    if !write_events(rx).await? {
        // Harvester threads may be sleeping or blocked on I/O; they are
        // abandoned at process exit.
        return Ok(ExitCode::SUCCESS);
    }

    let failures = tokio::task::spawn_blocking(move || reap(handles)).await?;
    if failures > 0 {
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

/// Writes events to stdout as JSON lines. Returns `true` once every
/// harvester has dropped its sender, `false` when interrupted.
async fn write_events(mut rx: BoundedReceiver<HarvestEvent>) -> Result<bool, BoxError> {
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        select! {
            event = rx.next() => match event {
                Some(event) => {
                    let mut out = std::io::stdout().lock();
                    serde_json::to_writer(&mut out, &event)?;
                    out.write_all(b"\n")?;
                }
                None => {
                    info!("All harvesters stopped");
                    return Ok(true);
                }
            },
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping");
                return Ok(false);
            }
        }
    }
}

/// Joins finished harvesters and their successors, returning how many failed.
fn reap(mut handles: Vec<HarvesterHandle>) -> usize {
    let mut failures = 0;
    while let Some(handle) = handles.pop() {
        let path = handle.path().to_path_buf();
        let Some(exit) = handle.join() else {
            failures += 1;
            continue;
        };
        match &exit.reason {
            ExitReason::Failed(e) => {
                warn!(?path, error = %e, "Harvester failed");
                failures += 1;
            }
            reason => info!(?path, ?reason, "Harvester exited"),
        }
        handles.extend(exit.successors);
    }
    failures
}

type LoggerGuard = tracing_appender::non_blocking::WorkerGuard;

fn setup_logging(log_format: &LogFormatArg) -> Result<LoggerGuard, BoxError> {
    LogTracer::init()?;

    // stdout carries the harvested events
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;

    if *log_format == LogFormatArg::Json {
        let app_name = format!("{}-{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        let bunyan_formatting_layer = BunyanFormattingLayer::new(app_name, non_blocking_writer);

        let subscriber = Registry::default()
            .with(filter)
            .with(JsonStorageLayer)
            .with(bunyan_formatting_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        use std::io::IsTerminal;

        let use_ansi = std::io::stderr().is_terminal();

        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_target(false)
            .with_level(true)
            .with_ansi(use_ansi)
            .compact();

        let subscriber = Registry::default().with(filter).with(layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(guard)
}
