//! Scenario runner for the Decision Arbitration Engine
//!
//! Drives the canonical verification scenarios against a freshly wired
//! engine and reports pass/fail per scenario. Exits non-zero if any
//! scenario fails, so it can gate CI.

use clap::Parser;
use dae_harness::run_matching;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Decision Arbitration Engine scenario runner
#[derive(Parser, Debug)]
#[command(
    name = "dae-scenarios",
    about = "Runs the arbitration engine verification scenarios",
    version
)]
struct Args {
    /// Only run scenarios whose name contains this substring
    #[arg(short, long)]
    scenario: Option<String>,

    /// Logging level
    #[arg(
        short,
        long,
        default_value = "info",
        env = "RUST_LOG",
        help = "Logging level (trace, debug, info, warn, error)"
    )]
    log_level: String,

    /// Enable JSON formatted logs
    #[arg(long, default_value = "false", env = "DAE_JSON_LOGS")]
    json_logs: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));
    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let reports = run_matching(args.scenario.as_deref()).await;
    if reports.is_empty() {
        eprintln!("no scenario matched");
        std::process::exit(2);
    }

    let mut failed = 0;
    println!("{:<22} {:>8} {:>10}  details", "scenario", "result", "time");
    for report in &reports {
        let result = if report.success { "ok" } else { "FAILED" };
        if !report.success {
            failed += 1;
        }
        println!(
            "{:<22} {:>8} {:>8} ms  {}",
            report.name, result, report.duration_ms, report.details
        );
    }
    println!(
        "\n{} scenarios, {} failed",
        reports.len(),
        failed
    );

    if failed > 0 {
        std::process::exit(1);
    }
}
