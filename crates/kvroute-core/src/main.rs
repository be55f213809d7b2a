//! KV-Route CLI: simulate cache-aware routing without GPUs.

use clap::{Parser, Subcommand};
use kvroute_core::config::KvRouteConfig;
use kvroute_core::logging::{self, LogFormat};
use kvroute_core::report;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "kvroute",
    about = "Simulate cache-aware request routing for LLM clusters",
    version
)]
struct Cli {
    /// Log level used when RUST_LOG is unset.
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulation with a single routing policy.
    Simulate {
        /// Path to TOML configuration file. Defaults apply when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Routing policy name, overriding `router.policy`.
        #[arg(short, long)]
        policy: Option<String>,
        /// Pre-populate workers and the index with synthetic history.
        #[arg(long)]
        seed_baseline: bool,
        /// Output results to JSON file.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Compare several policies on the same workload.
    Compare {
        /// Path to TOML configuration file. Defaults apply when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Comma-separated list of policy names (default: all).
        #[arg(short = 'P', long, value_delimiter = ',')]
        policies: Vec<String>,
        /// Output results to JSON file.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List available routing policies.
    ListPolicies,
    /// Print the default configuration as TOML.
    DefaultConfig,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = logging::init(cli.log_level.as_deref(), LogFormat::from_env()) {
        eprintln!("Error initializing logging: {}", e);
    }

    match cli.command {
        Commands::Simulate {
            config,
            policy,
            seed_baseline,
            output,
        } => {
            let mut config = load_config(config.as_deref());
            if let Some(policy) = policy {
                config.router.policy = policy;
            }
            config.simulation.seed_baseline |= seed_baseline;
            if let Err(e) = config.validate() {
                exit_with("Invalid configuration", e);
            }

            let result = kvroute_core::run_simulation(&config)
                .unwrap_or_else(|e| exit_with("Simulation failed", e));
            println!("{}", report::format_report(&result));

            if let Some(output_path) = output {
                write_json(&output_path, &result);
            }
        }
        Commands::Compare {
            config,
            policies,
            output,
        } => {
            let config = load_config(config.as_deref());
            let names: Vec<&str> = if policies.is_empty() {
                kvroute_algorithms::available_policies()
            } else {
                policies.iter().map(|s| s.as_str()).collect()
            };
            if let Some(unknown) = names
                .iter()
                .find(|n| kvroute_algorithms::policy_by_name(n).is_none())
            {
                eprintln!(
                    "Unknown policy: {}. Available: {:?}",
                    unknown,
                    kvroute_algorithms::available_policies()
                );
                std::process::exit(1);
            }

            let results = kvroute_core::compare_policies(&config, &names)
                .unwrap_or_else(|e| exit_with("Simulation failed", e));
            println!("{}", report::format_comparison_table(&results));
            for result in &results {
                println!("{}", report::format_report(result));
            }

            if let Some(output_path) = output {
                write_json(&output_path, &results);
            }
        }
        Commands::ListPolicies => {
            println!("Available routing policies:");
            for name in kvroute_algorithms::available_policies() {
                println!("  - {}", name);
            }
        }
        Commands::DefaultConfig => match KvRouteConfig::default().to_toml() {
            Ok(toml) => print!("{}", toml),
            Err(e) => exit_with("Error rendering config", e),
        },
    }
}

fn load_config(path: Option<&Path>) -> KvRouteConfig {
    match path {
        Some(p) => KvRouteConfig::from_file(p)
            .unwrap_or_else(|e| exit_with("Error loading config", e)),
        None => KvRouteConfig::default(),
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) {
    let json = serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| exit_with("Error serializing results", e));
    std::fs::write(path, json).unwrap_or_else(|e| exit_with("Error writing output", e));
    println!("Results written to {}", path.display());
}

fn exit_with(context: &str, error: impl std::fmt::Display) -> ! {
    eprintln!("{}: {}", context, error);
    std::process::exit(1);
}
