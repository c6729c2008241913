mod render;

use clap::{Parser, Subcommand};
use muster::{Auditor, FixResult, PgChannel, Remediator, RuleSet};
use muster_config::{Config, ConfigError, mask_password};
use render::Style;
use std::io::IsTerminal;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Verify the application's Postgres schema and repair what is missing.
#[derive(Parser, Debug)]
#[command(name = "muster", version)]
struct Cli {
    /// Database connection URL (overrides DATABASE_URL and the config file)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Route statements through this SQL function; pass "" to run them directly
    #[arg(long, global = true)]
    rpc: Option<String>,

    /// Postgres schema holding the application's tables
    #[arg(long, global = true)]
    schema: Option<String>,

    /// Print the JSON wire format instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compare the live schema to the rules (exits 1 if anything is wrong)
    Verify,
    /// Re-verify one table and add whatever is missing
    FixTable {
        /// Table name, as listed by `muster rules`
        table: String,
    },
    /// Verify every table, then fix everything that can be fixed
    FixAll,
    /// Run raw SQL against the database, unchecked
    Exec {
        /// The statement(s) to run
        sql: String,
    },
    /// Print the compiled-in rules
    Rules,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Muster(#[from] muster::Error),

    #[error("failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match Config::load() {
        Ok(loaded) => loaded.config,
        Err(err) => {
            eprintln!("muster: {}", err);
            return ExitCode::FAILURE;
        }
    };
    if let Some(url) = &cli.database_url {
        config.database.url = Some(url.clone());
    }
    if let Some(rpc) = &cli.rpc {
        config.database.rpc_function = (!rpc.trim().is_empty()).then(|| rpc.trim().to_string());
    }
    if let Some(schema) = &cli.schema {
        config.database.schema = schema.clone();
    }

    init_tracing(&config.log.filter);

    match run(cli, config).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("muster: {}", err);
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so `--json` output stays clean.
fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn connect(config: &Config) -> Result<PgChannel, CliError> {
    let url = config.database_url()?;
    tracing::info!(database = %mask_password(url), "connecting");
    let channel =
        PgChannel::connect(url, config.database.pool_size).map_err(muster::Error::from)?;
    Ok(match &config.database.rpc_function {
        Some(function) => channel.with_rpc(function.clone()),
        None => channel,
    })
}

async fn run(cli: Cli, config: Config) -> Result<ExitCode, CliError> {
    let style = Style {
        color: std::io::stdout().is_terminal(),
    };
    let rules = RuleSet::application();
    let schema = config.database.schema.as_str();

    match cli.command {
        Commands::Rules => {
            if cli.json {
                let body = serde_json::json!({ "tables": rules });
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                print!("{}", render::rules(&rules));
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Verify => {
            let channel = connect(&config)?;
            let report = Auditor::new(&channel, &rules).in_schema(schema).run().await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", render::report(&report, style));
            }
            Ok(if report.success && report.is_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::FixTable { table } => {
            let channel = connect(&config)?;
            let result = Remediator::new(&channel, &rules)
                .in_schema(schema)
                .fix_table(&table)
                .await
                .map_err(muster::Error::from)?;
            print_fix(&result, cli.json, style)
        }
        Commands::FixAll => {
            let channel = connect(&config)?;
            let report = Auditor::new(&channel, &rules).in_schema(schema).run().await;
            let result = if report.success {
                Remediator::new(&channel, &rules)
                    .fix_all(&report.all_issues())
                    .await
            } else {
                FixResult::failed(report.error.unwrap_or_default())
            };
            print_fix(&result, cli.json, style)
        }
        Commands::Exec { sql } => {
            let channel = connect(&config)?;
            let result = Remediator::new(&channel, &rules).run_custom_fix(&sql).await;
            print_fix(&result, cli.json, style)
        }
    }
}

fn print_fix(result: &FixResult, json: bool, style: Style) -> Result<ExitCode, CliError> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        print!("{}", render::fix(result, style));
    }
    Ok(if result.success && result.errors.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_fix_table() {
        let cli = Cli::try_parse_from([
            "muster",
            "fix-table",
            "user_roles",
            "--database-url",
            "postgres://localhost/app",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::FixTable { ref table } if table == "user_roles"));
        assert_eq!(cli.database_url.as_deref(), Some("postgres://localhost/app"));
    }

    #[test]
    fn test_parse_verify_json() {
        let cli = Cli::try_parse_from(["muster", "verify", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Verify));
        assert!(cli.json);
    }

    #[test]
    fn test_fix_table_requires_name() {
        assert!(Cli::try_parse_from(["muster", "fix-table"]).is_err());
    }
}
