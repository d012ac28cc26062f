//! Command-line and environment configuration.
//!
//! Every option can be given as a flag or through the environment variable
//! named in its `env` attribute.

use std::time::Duration;

use bersn_storage::PostgresConfig;
use clap::{Args, Parser, Subcommand, ValueEnum};

/// BERSn calc-run API.
#[derive(Parser, Debug)]
#[command(name = "bersn-api", version, about = "BERSn calc-run API server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP API server
    Serve(ServeArgs),

    /// Create the calc-run tables in PostgreSQL if they do not exist
    Migrate(DbArgs),
}

/// Which storage backend the server runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    Postgres,
    /// Process-local store; all data is lost on exit.
    Memory,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(long, env = "API_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Base URL of the calc engine
    #[arg(long, env = "CALC_URL", default_value = "http://bersn_calc:8000")]
    pub calc_url: String,

    /// Upper bound, in seconds, on one calc engine call
    #[arg(long, env = "CALC_TIMEOUT_SECS", default_value_t = 30)]
    pub calc_timeout_secs: u64,

    /// Storage backend
    #[arg(long, env = "BERSN_STORE", value_enum, default_value_t = StoreKind::Postgres)]
    pub store: StoreKind,

    #[command(flatten)]
    pub db: DbArgs,
}

impl ServeArgs {
    pub fn calc_timeout(&self) -> Duration {
        Duration::from_secs(self.calc_timeout_secs)
    }
}

/// PostgreSQL connection parameters.
#[derive(Args, Debug, Clone)]
pub struct DbArgs {
    #[arg(long, env = "DB_HOST", default_value = "postgres")]
    pub db_host: String,

    #[arg(long, env = "DB_PORT", default_value_t = 5432)]
    pub db_port: u16,

    #[arg(long, env = "DB_NAME", default_value = "bersn")]
    pub db_name: String,

    #[arg(long, env = "DB_USER", default_value = "bersn")]
    pub db_user: String,

    #[arg(long, env = "DB_PASSWORD", default_value = "bersn", hide_env_values = true)]
    pub db_password: String,

    /// Maximum pooled connections
    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 10)]
    pub db_max_connections: u32,
}

impl DbArgs {
    pub fn postgres_config(&self) -> PostgresConfig {
        PostgresConfig {
            host: self.db_host.clone(),
            port: self.db_port,
            database: self.db_name.clone(),
            user: self.db_user.clone(),
            password: self.db_password.clone(),
            max_connections: self.db_max_connections,
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serve_args(argv: &[&str]) -> ServeArgs {
        let mut full = vec!["bersn-api", "serve"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Commands::Serve(args) => args,
            other => panic!("expected serve, got {:?}", other),
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_defaults() {
        let args = serve_args(&[
            "--port",
            "9090",
            "--calc-url",
            "http://localhost:8000",
            "--store",
            "memory",
            "--db-host",
            "db.internal",
            "--calc-timeout-secs",
            "5",
        ]);
        assert_eq!(args.port, 9090);
        assert_eq!(args.calc_url, "http://localhost:8000");
        assert_eq!(args.store, StoreKind::Memory);
        assert_eq!(args.calc_timeout(), Duration::from_secs(5));

        let pg = args.db.postgres_config();
        assert_eq!(pg.host, "db.internal");
        assert_eq!(pg.database, "bersn");
    }

    #[test]
    fn migrate_takes_db_args() {
        let cli = Cli::try_parse_from(["bersn-api", "migrate", "--db-port", "6543"]).unwrap();
        match cli.command {
            Commands::Migrate(db) => assert_eq!(db.db_port, 6543),
            other => panic!("expected migrate, got {:?}", other),
        }
    }
}
