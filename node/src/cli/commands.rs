use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::cli::{Args, Commands, DatabaseCommands};
use crate::config::Config;
use crate::container::{ContainerRuntime, DockerRuntime};
use crate::manager::Manager;
use crate::probes::{NetnsProber, TunnelProber};
use crate::scheduler::spawn_recurring_tasks;
use crate::services::database::DatabaseService;

pub async fn execute(args: Args) -> Result<()> {
    setup_logging(&args)?;

    match args.command {
        Commands::Start { bind, database_url } => {
            start_server(args.config, bind, database_url).await
        }
        Commands::Config { show } => validate_config(args.config, show).await,
        Commands::Database { command, url } => handle_database_command(args.config, command, url).await,
    }
}

fn setup_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));

    match args.log_format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        "compact" => tracing_subscriber::fmt()
            .compact()
            .with_env_filter(filter)
            .init(),
        _ => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    Ok(())
}

fn load_config(
    file: Option<std::path::PathBuf>,
    bind: Option<u16>,
    database_url: Option<String>,
) -> Result<Config> {
    let mut config = Config::load(file.as_deref())?;

    if let Some(port) = bind {
        config.server.bind_port = port;
    }
    if let Some(url) = database_url {
        config.database.url = url;
    }

    config.validate()?;
    Ok(config)
}

fn build_runtime(config: &Config) -> Arc<dyn ContainerRuntime> {
    #[cfg(feature = "mock-node")]
    if config.federation.ci_mock_wg_container {
        info!("CI mode: using mock container runtime");
        return Arc::new(crate::mock::MockRuntime::new());
    }

    let _ = config;
    Arc::new(DockerRuntime::default())
}

async fn start_server(
    file: Option<std::path::PathBuf>,
    bind: Option<u16>,
    database_url: Option<String>,
) -> Result<()> {
    let config = load_config(file, bind, database_url)?;
    info!(run_mode = %config.run_mode, "starting tpn node");

    let _sentry_guard = crate::sentry::init_sentry(config.sentry.as_ref())?;

    let database = Arc::new(DatabaseService::new(&config.database.url).await?);
    database.migrate().await?;

    let runtime = build_runtime(&config);
    let prober: Arc<dyn TunnelProber> = Arc::new(NetnsProber::default());

    let config = Arc::new(config);
    let manager = Arc::new(Manager::new(
        config.clone(),
        database,
        runtime,
        prober,
    )?);

    let tasks = spawn_recurring_tasks(manager.clone());

    let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.server.bind_port));
    let server = tokio::spawn(crate::http::serve(manager, bind_addr));

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("received shutdown signal");
        }
        result = server => {
            if let Ok(Err(e)) = result {
                error!("http server failed: {e}");
            }
        }
    }

    for task in tasks {
        task.abort();
    }
    info!("node shut down");

    Ok(())
}

async fn validate_config(file: Option<std::path::PathBuf>, show: bool) -> Result<()> {
    let config = load_config(file, None, None)?;
    info!("configuration is valid");

    if show {
        println!("{:#?}", config);
    }

    Ok(())
}

async fn handle_database_command(
    file: Option<std::path::PathBuf>,
    command: DatabaseCommands,
    url: Option<String>,
) -> Result<()> {
    let config = load_config(file, None, url)?;
    let database = DatabaseService::new(&config.database.url).await?;

    match command {
        DatabaseCommands::Migrate => {
            database.migrate().await?;
            println!("migrations applied");
        }
        DatabaseCommands::Status => {
            database.health_check().await?;
            println!("database reachable at {}", database.url());
        }
    }

    Ok(())
}
