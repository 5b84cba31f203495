//! Zentinel Mock Engine - CLI Entry Point
//!
//! Validates scenario files and dry-runs requests against them.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zentinel_mock_engine::{EngineConfig, MockEngine, RequestContext};

#[derive(Parser, Debug)]
#[command(
    name = "zentinel-mock-engine",
    about = "Mock response resolution engine - validate scenarios and dry-run requests",
    version
)]
struct Args {
    /// Path to scenario configuration file
    #[arg(short, long, default_value = "mock-scenarios.yaml")]
    config: PathBuf,

    /// JSON file with one request or an array of requests to resolve
    #[arg(short, long, value_name = "FILE")]
    request: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print a sample configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

/// One request in a `--request` file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DryRunRequest {
    #[serde(default = "default_test_id")]
    test_id: String,
    /// Scenario to activate before resolving
    #[serde(default)]
    scenario: Option<String>,
    method: String,
    url: String,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    query: HashMap<String, String>,
    /// URL parameters, as a route matcher would extract them
    #[serde(default)]
    params: HashMap<String, String>,
}

impl DryRunRequest {
    fn context(&self) -> RequestContext {
        let mut context = RequestContext::new(self.method.as_str(), self.url.as_str());
        context.body = self.body.clone();
        context.headers = self.headers.clone();
        context.query.extend(self.query.clone());
        context
    }
}

fn default_test_id() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DryRunInput {
    Many(Vec<DryRunRequest>),
    One(DryRunRequest),
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        println!("{}", include_str!("../demos/default-scenarios.yaml"));
        return Ok(());
    }

    let config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        EngineConfig::from_file(&args.config)
            .with_context(|| format!("Failed to load {}", args.config.display()))?
    } else if args.validate || args.request.is_some() {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using empty configuration (no scenarios)");
        EngineConfig::default()
    };

    if args.validate {
        println!(
            "Configuration is valid ({} scenarios, {} mocks defined)",
            config.scenarios.len(),
            config.mock_count()
        );
        return Ok(());
    }

    let Some(request_path) = args.request else {
        info!("No --request given, nothing to resolve");
        return Ok(());
    };

    let mut engine = MockEngine::new(config)?;
    let content = std::fs::read_to_string(&request_path)
        .with_context(|| format!("Failed to read {}", request_path.display()))?;
    let requests = match serde_json::from_str(&content)? {
        DryRunInput::Many(requests) => requests,
        DryRunInput::One(request) => vec![request],
    };

    for request in requests {
        if let Some(scenario) = &request.scenario {
            if engine.registry().active_scenario(&request.test_id) != scenario.as_str() {
                engine.activate_scenario(&request.test_id, scenario)?;
            }
        }

        let context = request.context();
        let line: Value = match engine.resolve_with_params(&request.test_id, &context, &request.params) {
            Ok(response) => json!({ "ok": response }),
            Err(e) => json!({ "error": { "kind": e.kind(), "message": e.message() } }),
        };
        println!("{line}");
    }

    let stats = engine.stats();
    info!(
        total = stats.requests_total,
        matched = stats.requests_matched,
        unmatched = stats.requests_unmatched,
        invalid = stats.requests_invalid,
        "Dry run complete"
    );

    Ok(())
}
