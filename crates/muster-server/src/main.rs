use muster::{PgChannel, RuleSet};
use muster_config::{Config, mask_password};
use muster_server::{AppState, build_router};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let loaded = match Config::load() {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("muster-server: {}", err);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&loaded.config.log.filter);

    if let Some(path) = &loaded.path {
        tracing::info!(path = %path.display(), "loaded config");
    }

    match run(loaded.config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "server failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let url = config.database_url()?;
    let mut channel = PgChannel::connect(url, config.database.pool_size)?;
    if let Some(function) = &config.database.rpc_function {
        channel = channel.with_rpc(function.clone());
    }
    tracing::info!(
        database = %mask_password(url),
        rpc = config.database.rpc_function.as_deref().unwrap_or("(direct)"),
        schema = %config.database.schema,
        "database configured"
    );

    let state = AppState::with_config(Arc::new(channel), RuleSet::application(), &config);
    let listener = TcpListener::bind(&config.server.bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
