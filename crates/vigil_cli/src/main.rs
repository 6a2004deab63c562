//! Vigil CLI
//!
//! Runs the orchestration loop against simulated infrastructure, or makes
//! one-shot decisions and workflow runs from JSON files.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod logging;
mod sim;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use vigil_decision::{DecisionContext, DecisionOption};
use vigil_monitor::default_catalog;
use vigil_orchestrator::{Orchestrator, OrchestratorConfig};
use vigil_plan::Workflow;

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "vigil - autonomous operations control loop", long_about = None)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run monitoring, healing and decision loops until Ctrl-C
    Run {
        /// Configuration file
        #[arg(short, long, default_value = "vigil.toml")]
        config: PathBuf,
        /// Probability a simulated action fails
        #[arg(long, default_value_t = 0.1)]
        failure_rate: f64,
        /// Stop on its own after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,
    },
    /// Choose among the options in a request file
    Decide {
        /// JSON file with `context` and `options`
        #[arg(short, long)]
        file: PathBuf,
        /// Also run the implementation workflow with simulated actions
        #[arg(long)]
        execute: bool,
        /// Probability a simulated action fails
        #[arg(long, default_value_t = 0.0)]
        failure_rate: f64,
    },
    /// Run a workflow file with simulated actions
    Workflow {
        /// JSON workflow file
        #[arg(short, long)]
        file: PathBuf,
        /// Probability a simulated action fails
        #[arg(long, default_value_t = 0.0)]
        failure_rate: f64,
    },
    /// Load and validate a configuration file
    CheckConfig {
        /// Configuration file
        #[arg(short, long, default_value = "vigil.toml")]
        config: PathBuf,
        /// Print the effective configuration
        #[arg(long)]
        print: bool,
    },
}

#[derive(Debug, Deserialize)]
struct DecisionRequest {
    #[serde(default)]
    context: DecisionContext,
    options: Vec<DecisionOption>,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).wrap_err_with(|| format!("failed to parse {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn check_rate(rate: f64) -> Result<f64> {
    if (0.0..=1.0).contains(&rate) {
        Ok(rate)
    } else {
        Err(eyre!("failure rate must be in [0, 1], got {rate}"))
    }
}

async fn run(config: &Path, failure_rate: f64, duration: Option<Duration>) -> Result<()> {
    let config = OrchestratorConfig::load(config)?;
    let orchestrator = Arc::new(Orchestrator::new(config)?);
    sim::install_actions(&orchestrator, failure_rate);
    for spec in default_catalog() {
        let probe = sim::probe_for(&spec.name);
        orchestrator.register_check(spec, probe)?;
    }

    orchestrator.start_monitoring();
    tracing::info!("vigil running, press Ctrl-C to stop");
    match duration {
        Some(limit) => {
            tokio::select! {
                res = tokio::signal::ctrl_c() => res?,
                () = tokio::time::sleep(limit) => {}
            }
        }
        None => tokio::signal::ctrl_c().await?,
    }
    orchestrator.stop_monitoring().await;
    print_json(&orchestrator.status())
}

async fn decide(file: &Path, execute: bool, failure_rate: f64) -> Result<()> {
    let request: DecisionRequest = read_json(file)?;
    let orchestrator = Orchestrator::new(OrchestratorConfig::default())?;
    if execute {
        sim::install_actions(&orchestrator, failure_rate);
        let outcome = orchestrator
            .decide_and_execute(&request.context, request.options)
            .await?;
        print_json(&outcome)
    } else {
        let decision = orchestrator.submit_decision_request(&request.context, request.options)?;
        print_json(&decision)
    }
}

async fn workflow(file: &Path, failure_rate: f64) -> Result<()> {
    let workflow: Workflow = read_json(file)?;
    let orchestrator = Orchestrator::new(OrchestratorConfig::default())?;
    sim::install_workflow_actions(&orchestrator, &workflow, failure_rate);
    let result = orchestrator.submit_workflow(workflow).await?;
    print_json(&result)?;
    if !result.is_success() {
        return Err(eyre!(
            "workflow {} ended {:?}",
            result.name,
            result.status
        ));
    }
    Ok(())
}

fn check_config(path: &Path, print: bool) -> Result<()> {
    let config = OrchestratorConfig::load(path)?;
    if print {
        print!("{}", config.to_toml()?);
    } else {
        println!("{}: ok", path.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    logging::init(cli.json_logs);

    match cli.command {
        Commands::Run {
            config,
            failure_rate,
            duration_secs,
        } => run(&config, check_rate(failure_rate)?, duration_secs.map(Duration::from_secs)).await,
        Commands::Decide {
            file,
            execute,
            failure_rate,
        } => decide(&file, execute, check_rate(failure_rate)?).await,
        Commands::Workflow { file, failure_rate } => {
            workflow(&file, check_rate(failure_rate)?).await
        }
        Commands::CheckConfig { config, print } => check_config(&config, print),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_decision_request_defaults_context() {
        let request: DecisionRequest = serde_json::from_str(
            r#"{"options": [{"id": "a", "risk_level": 0.2, "confidence": 0.9,
                "implementation_complexity": 0.3, "stakeholder_alignment": 0.7}]}"#,
        )
        .unwrap();
        assert_eq!(request.options.len(), 1);
        assert_eq!(request.context, DecisionContext::default());
    }

    #[test]
    fn test_rate_bounds() {
        assert!(check_rate(0.5).is_ok());
        assert!(check_rate(1.5).is_err());
        assert!(check_rate(f64::NAN).is_err());
    }

    #[tokio::test]
    async fn test_workflow_file_runs() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"name": "demo", "tasks": [
                {{"id": "a", "action_type": "demo.step"}},
                {{"id": "b", "action_type": "demo.step", "dependencies": ["a"]}}
            ]}}"#
        )
        .unwrap();
        assert!(workflow(file.path(), 0.0).await.is_ok());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::parse_from(["vigil", "--json-logs", "decide", "--file", "req.json", "--execute"]);
        assert!(cli.json_logs);
        assert!(matches!(cli.command, Commands::Decide { execute: true, .. }));
    }
}
