//! fanout-probe: report host resources and the throttle limit the engine
//! would pick for each workload class.

use clap::{Parser, ValueEnum};
use serde_json::json;
use tracing::{info, warn};

use fanout_core::EngineConfig;
use fanout_core::config::load_dotenv;
use fanout_engine::{Engine, WorkloadClass};

// ── CLI ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

/// Inspect resource pressure and per-workload concurrency limits.
#[derive(Parser, Debug)]
#[command(name = "fanout-probe", version, about)]
struct Cli {
    /// Path to a TOML engine config. Defaults plus FANOUT_* overrides when absent.
    #[arg(long, env = "FANOUT_CONFIG")]
    config: Option<String>,

    /// Upper bound for every limit (defaults to throttle.default_max_limit).
    #[arg(long)]
    max_limit: Option<usize>,

    /// External load hint in 0.1..=1.0 (defaults to throttle.default_load_factor).
    #[arg(long)]
    load_factor: Option<f64>,

    /// Restrict output to one workload class (cpu, io, network, mixed).
    #[arg(long)]
    workload: Option<WorkloadClass>,

    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
}

fn load_config(path: Option<&str>) -> anyhow::Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::from_env()?);
    };
    match EngineConfig::from_file(path) {
        Ok(cfg) => {
            info!(path, "loaded engine config");
            Ok(cfg)
        }
        Err(e) => {
            warn!(error = %e, path, "failed to load config, using defaults");
            Ok(EngineConfig::from_env()?)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    config.log_summary();

    let max_limit = cli.max_limit.unwrap_or(config.throttle.default_max_limit);
    let load_factor = cli.load_factor.unwrap_or(config.throttle.default_load_factor);
    let engine = Engine::new(config)?;

    let classes: Vec<WorkloadClass> = match cli.workload {
        Some(class) => vec![class],
        None => WorkloadClass::ALL.to_vec(),
    };

    let (snapshot, decisions) = engine.throttle_report(&classes, max_limit, load_factor)?;

    match cli.format {
        Format::Json => {
            let limits: Vec<_> = decisions
                .iter()
                .map(|d| json!({ "workload": d.workload, "limit": d.limit }))
                .collect();
            let report = json!({
                "snapshot": snapshot,
                "max_limit": max_limit,
                "load_factor": load_factor,
                "limits": limits,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Format::Text => {
            println!(
                "cpus: {}  memory: {:.1}%  pressure: {:?}  reduction: {}",
                snapshot.cpu_count, snapshot.memory_pressure, snapshot.level, snapshot.reduction_factor
            );
            println!("max_limit: {max_limit}  load_factor: {load_factor}");
            for d in &decisions {
                println!("  {:<8} {}", d.workload.to_string(), d.limit);
            }
        }
    }

    Ok(())
}
