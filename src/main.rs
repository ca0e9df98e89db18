//! scriptrun - Run an SQL script against a database and report progress.

mod cli;
mod logging;

use cli::Cli;
use sql_scriptrun::config::{Config, ConnectionConfig};
use sql_scriptrun::db::{self, Connection};
use sql_scriptrun::error::{Result, ScriptError};
use sql_scriptrun::script::{ConsoleObserver, ExecutorOptions, RunSummary, ScriptExecutor};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Exit status of a run that finished with failed statements.
const EXIT_STATEMENT_FAILURES: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is not an error
    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();
    match &cli.log_file {
        Some(path) => logging::init_file_logging(path),
        None => logging::init_stderr_logging(),
    }

    match run(&cli).await {
        Ok(summary) if summary.has_failures() => ExitCode::from(EXIT_STATEMENT_FAILURES),
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}: {}", e.category(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<RunSummary> {
    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let config = Config::load_from_file(&config_path)?;

    let connection = resolve_connection(cli, &config)?.ok_or_else(|| {
        ScriptError::config(
            "No database connection configured. Use --url, --connection or DATABASE_URL",
        )
    })?;
    info!("Connection: {}", connection.display_string());

    let mut options = config.runner.clone();
    cli.apply_to(&mut options);

    let mut conn = db::connect(&connection.url).await?;
    let outcome = run_script(cli, &mut *conn, options).await;
    if let Err(e) = conn.close().await {
        warn!("Could not close connection: {e}");
    }
    let summary = outcome?;

    if cli.json {
        let json = serde_json::to_string_pretty(&summary)
            .map_err(|e| ScriptError::io(format!("Could not serialize summary: {e}")))?;
        println!("{json}");
    }

    Ok(summary)
}

async fn run_script(
    cli: &Cli,
    conn: &mut dyn Connection,
    options: ExecutorOptions,
) -> Result<RunSummary> {
    let mut executor = ScriptExecutor::with_options(conn, options);
    if !cli.quiet {
        executor.add_observer(Arc::new(ConsoleObserver::stdout()));
    }

    if cli.reads_stdin() {
        return executor.run_reader(tokio::io::stdin()).await;
    }

    let file = tokio::fs::File::open(&cli.script)
        .await
        .map_err(|e| ScriptError::io(format!("Could not open {}: {e}", cli.script)))?;
    executor.run_reader(file).await
}

/// Resolves the connection from CLI args, config file, and environment.
fn resolve_connection(cli: &Cli, config: &Config) -> Result<Option<ConnectionConfig>> {
    // Precedence:
    // 1. --url (highest)
    // 2. Named connection from config
    // 3. Default connection from config
    // 4. DATABASE_URL
    let mut connection = cli.to_connection_config()?;

    if connection.is_none() {
        if let Some(name) = cli.connection_name() {
            connection = config.get_connection(Some(name)).cloned();
            if connection.is_none() {
                return Err(ScriptError::config(format!(
                    "Connection '{name}' not found in config file"
                )));
            }
        }
    }

    if connection.is_none() {
        connection = config.get_connection(None).cloned();
    }

    if connection.is_none() {
        connection = ConnectionConfig::from_env()?;
    }

    Ok(connection)
}
