use std::process;
use std::sync::Arc;

use bersn_api::config::{Cli, Commands, DbArgs, ServeArgs, StoreKind};
use bersn_core::{HttpCalcEngine, Orchestrator, OrchestratorConfig};
use bersn_storage::{CalcStorage, MemoryStorage, PostgresStorage};
use clap::Parser;
use tracing_subscriber::EnvFilter;

type CommandResult = Result<(), Box<dyn std::error::Error>>;

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to create tokio runtime: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Serve(args) => rt.block_on(serve(args)),
        Commands::Migrate(db) => rt.block_on(migrate(db)),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "command failed");
        process::exit(1);
    }
}

async fn serve(args: ServeArgs) -> CommandResult {
    match args.store {
        StoreKind::Postgres => {
            let storage = PostgresStorage::connect(&args.db.postgres_config()).await?;
            tracing::info!(
                host = %args.db.db_host,
                database = %args.db.db_name,
                "connected to PostgreSQL"
            );
            run_with(storage, &args).await
        }
        StoreKind::Memory => {
            tracing::warn!("using in-memory store; data will not survive a restart");
            run_with(MemoryStorage::new(), &args).await
        }
    }
}

async fn run_with<S: CalcStorage>(storage: S, args: &ServeArgs) -> CommandResult {
    let engine = HttpCalcEngine::new(&args.calc_url, args.calc_timeout());
    tracing::info!(calc_url = %engine.run_url(), "calc engine configured");

    let orchestrator = Orchestrator::new(
        Arc::new(storage),
        Arc::new(engine),
        OrchestratorConfig {
            engine_timeout: args.calc_timeout(),
        },
    );
    bersn_api::start_server(args.port, orchestrator).await
}

async fn migrate(db: DbArgs) -> CommandResult {
    let storage = PostgresStorage::connect(&db.postgres_config()).await?;
    storage.migrate().await?;
    storage.close().await;
    tracing::info!(database = %db.db_name, "schema is up to date");
    Ok(())
}
