//! `sluice` command-line entry point.
//!
//! - `query`: run SQL through the guarded path (validation, LIMIT correction, cache, retry)
//! - `validate`: check SQL without touching the database
//! - `invalidate`: drop cached results matching a key pattern

use std::sync::Arc;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use serde_json::json;
use sluice_common::config::AppConfig;
use sluice_common::telemetry::init_logging;
use sluice_error::{ErrorCategory, SluiceError};
use sluice_runtime::query::cache::ResultCache;
use sluice_runtime::query::validator::SqlValidator;
use sluice_runtime::{EngineContext, QueryExecutor, QueryPlan, SemanticLayer, SqlRenderer};

const GENERAL_ERROR: i32 = 1;
const CONFIG_ERROR: i32 = 3;
const CONNECTION_ERROR: i32 = 4;
const VALIDATION_ERROR: i32 = 5;
const EXECUTION_ERROR: i32 = 6;

#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "Validate, cache and execute analytics SQL", long_about = None)]
struct Cli {
    /// Configuration file (YAML or TOML); SLUICE_* variables override it
    #[arg(long, global = true, env = "SLUICE_CONFIG", default_value = "config/sluice.yaml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a read query and print the result as JSON
    Query {
        sql: String,
        /// Run once against a named target instead of the pool (no cache, no retry)
        #[arg(long)]
        target: Option<String>,
    },
    /// Check a query against the safety rules
    Validate { sql: String },
    /// Remove cached results whose key matches `query:<pattern>`
    Invalidate {
        #[arg(default_value = "*")]
        pattern: String,
    },
}

/// Treats the plan as literal SQL text.
struct RawSqlRenderer;

impl SqlRenderer for RawSqlRenderer {
    fn render(&self, plan: &QueryPlan, _semantic_layer: &SemanticLayer) -> anyhow::Result<String> {
        plan.0
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("plan is not SQL text"))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match AppConfig::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(CONFIG_ERROR);
        }
    };
    init_logging(&config.logging)?;

    if let Err(e) = run(&cli, &config).await {
        match e.downcast_ref::<SluiceError>() {
            Some(err) => eprintln!("{}", err.to_json()),
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(exit_code(&e));
    }
    Ok(())
}

async fn run(cli: &Cli, config: &AppConfig) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Query { sql, target } => {
            let context = EngineContext::new(config).await?;
            let executor = QueryExecutor::new(&context, Arc::new(RawSqlRenderer));
            let plan = QueryPlan(json!(sql));
            let semantic_layer = SemanticLayer::default();

            let result = match target {
                Some(id) => executor.execute_plan_on(&plan, &semantic_layer, id).await,
                None => executor.execute_plan(&plan, &semantic_layer).await,
            };
            context.shutdown();

            println!("{}", serde_json::to_string_pretty(&result?)?);
        }
        Commands::Validate { sql } => {
            let validator = SqlValidator::new(config.validator);
            let outcome = validator.validate(sql);
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "valid": outcome.is_valid(),
                    "errors": outcome.errors(),
                }))?
            );
            validator.validate_or_fail(sql)?;
        }
        Commands::Invalidate { pattern } => {
            let cache = ResultCache::connect(&config.cache).await;
            if !cache.is_enabled() {
                return Err(anyhow!("result cache is disabled or unreachable"));
            }
            let removed = cache.invalidate(pattern).await;
            println!("{}", json!({ "pattern": pattern, "removed": removed }));
        }
    }
    Ok(())
}

fn exit_code(e: &anyhow::Error) -> i32 {
    match e.downcast_ref::<SluiceError>() {
        Some(err) => match err.code.category() {
            ErrorCategory::Connection => CONNECTION_ERROR,
            ErrorCategory::Config => CONFIG_ERROR,
            ErrorCategory::Query => VALIDATION_ERROR,
            ErrorCategory::Execution => EXECUTION_ERROR,
            _ => GENERAL_ERROR,
        },
        None => GENERAL_ERROR,
    }
}
