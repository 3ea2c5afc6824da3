use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use common::logging::{self, LogConfig};
use condsrv::{build_manager, create_routes, AppState, CondsrvConfig};
use std::path::PathBuf;
use tracing::{error, info};
use verdant_conditional::{init_schema, list_conditionals};

#[derive(Parser, Debug)]
#[command(author, version, about = "Verdant conditional controller service", long_about = None)]
struct Args {
    /// Path to configuration file (YAML, TOML or JSON)
    #[arg(short, long, value_name = "FILE", env = "CONDSRV_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the controllers and the management API (default)
    Service,

    /// Evaluate a literal expression, e.g. `25.3 > 20 and true`
    Check {
        expression: String,
    },

    /// List conditionals stored in the database
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = CondsrvConfig::load(args.config.as_deref())?;

    match args.command {
        Some(Commands::Check { expression }) => check_expression(&expression),
        Some(Commands::List) => list_rules(&config).await,
        Some(Commands::Service) | None => {
            logging::init_with_config(
                LogConfig::new("condsrv")
                    .with_level(&config.logging.level)
                    .with_log_dir(config.logging.dir.clone())
                    .with_json(config.logging.json),
            )
            .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

            if let Err(e) = run_service(&config).await {
                error!("condsrv terminated: {:#}", e);
                return Err(e);
            }
            Ok(())
        },
    }
}

async fn run_service(config: &CondsrvConfig) -> Result<()> {
    info!("Starting condsrv");

    let pool = common::sqlite::connect(&config.database.path).await?;
    let manager = build_manager(config, pool.clone()).await?;
    manager.start_all().await?;

    let app = create_routes(AppState::new(manager.clone()));
    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Management API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(common::wait_for_shutdown())
        .await
        .context("API server error")?;

    manager.stop_all().await;
    pool.close().await;
    info!("condsrv stopped");
    Ok(())
}

fn check_expression(expression: &str) -> Result<()> {
    match verdant_expr::evaluate_str(expression) {
        Ok(result) => {
            println!("{}", result);
            Ok(())
        },
        Err(e) => Err(anyhow!("{}: {}", expression, e)),
    }
}

async fn list_rules(config: &CondsrvConfig) -> Result<()> {
    let pool = common::sqlite::connect(&config.database.path).await?;
    init_schema(&pool).await?;
    let rules = list_conditionals(&pool).await?;

    if rules.is_empty() {
        println!("No conditionals configured");
    }
    for rule in rules {
        println!(
            "{} [{}] {} (every {}s): {}",
            rule.id,
            if rule.activated { "on" } else { "off" },
            rule.name,
            rule.period_secs,
            rule.expression
        );
        for condition in &rule.conditions {
            println!("    {{{}}} {:?}", condition.placeholder(), condition.kind);
        }
    }
    pool.close().await;
    Ok(())
}
