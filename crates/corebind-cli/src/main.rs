//! `corebind` – command line front end of the binding engine.
//!
//! 1. Loads `~/.corebind/config.toml`, writing the defaults on first run.
//! 2. Initialises tracing (`RUST_LOG`, `COREBIND_LOG_FORMAT`,
//!    `OTEL_EXPORTER_OTLP_ENDPOINT`).
//! 3. Runs the simulated host + DSP scenario of [`demo`] while printing the
//!    trace records and alerts the engine publishes, then a report.
//!
//! `corebind config` prints the effective configuration instead.

mod config;
mod demo;

use colored::Colorize;
use corebind_runtime::init_tracing;
use corebind_transport::{Lane, LaneReceiver};
use corebind_types::{Diagnostic, TraceOperation};
use tracing::warn;

#[tokio::main]
async fn main() {
    let cfg = load_or_create_config();
    let _guard = init_tracing("corebind", cfg.log_format());

    if std::env::args().nth(1).as_deref() == Some("config") {
        print_config(&cfg);
        return;
    }

    print_banner();

    let scenario = demo::Scenario::new(cfg.engine.clone());
    let bindings = tokio::spawn(watch(scenario.subscribe(Lane::Bindings)));
    let alerts = tokio::spawn(watch(scenario.subscribe(Lane::Alerts)));

    let steps = match tokio::task::spawn_blocking(move || scenario.run()).await {
        Ok(steps) => steps,
        Err(e) => {
            eprintln!("{}: {}", "Scenario aborted".red(), e);
            std::process::exit(1);
        }
    };
    let records = bindings.await.unwrap_or(0);
    let panics = alerts.await.unwrap_or(0);

    print_report(&steps, records, panics);
    if steps.iter().any(|s| s.outcome.is_err()) {
        std::process::exit(1);
    }
}

fn load_or_create_config() -> config::Config {
    match config::load() {
        Ok(Some(cfg)) => cfg,
        Ok(None) => {
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            if let Err(e) = config::save(&cfg) {
                eprintln!("{}: {}", "Error saving config".red(), e);
            }
            cfg
        }
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            eprintln!("  Using default configuration.");
            config::Config::default()
        }
    }
}

/// Print every diagnostic on `rx` until the engine goes away; returns how
/// many were seen.
async fn watch(mut rx: LaneReceiver) -> usize {
    let mut seen = 0;
    while let Some(diagnostic) = rx.recv().await {
        seen += 1;
        match diagnostic {
            Diagnostic::Binding(record) => {
                let op = match record.operation {
                    TraceOperation::Bind => "bind".green(),
                    TraceOperation::Unbind => "unbind".yellow(),
                };
                println!(
                    "    {} {:<8} {:<12} {}",
                    "·".dimmed(),
                    op,
                    format!("{:?}", record.kind),
                    record.interface.dimmed()
                );
            }
            Diagnostic::ProcessorPanic { processor, reason, .. } => {
                warn!(%processor, %reason, "processor marked unusable");
                println!("    {} {} {}", "!".red().bold(), processor, reason.red());
            }
        }
    }
    seen
}

fn print_report(steps: &[demo::Step], records: usize, panics: usize) {
    println!();
    println!("{}", "  Scenario report".bold());
    for step in steps {
        match &step.outcome {
            Ok(detail) => println!("  {} {}\n      {}", "✓".green().bold(), step.name, detail.dimmed()),
            Err(e) => println!("  {} {}\n      {}", "✗".red().bold(), step.name, e.to_string().red()),
        }
    }
    println!();
    println!(
        "  {} trace record(s), {} processor alert(s)",
        records.to_string().bold(),
        panics.to_string().bold()
    );
}

fn print_config(cfg: &config::Config) {
    println!("  {}", config::config_path().display().to_string().bold());
    match toml::to_string_pretty(cfg) {
        Ok(raw) => println!("{raw}"),
        Err(e) => eprintln!("{}: {}", "Failed to render config".red(), e),
    }
}

fn print_banner() {
    println!();
    println!(
        "  {} {}",
        "corebind".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Multi-processor component binding engine, simulated platform");
    println!();
}
