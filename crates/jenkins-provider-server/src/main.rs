use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use jenkins_provider_server::config::loader::{DEFAULT_CONFIG_PATH, load_config};
use jenkins_provider_server::{App, observability};
use tokio::sync::watch;

#[derive(Debug, Parser)]
#[command(
    name = "jenkins-provider",
    version,
    about = "Reconciles Jenkins jobs, folders and agents toward their declared state"
)]
struct Cli {
    /// Configuration file
    #[arg(long, env = "JENKINS_PROVIDER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// JSON manifest of secrets, ProviderConfigs and resources to load at startup
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Overrides logging.level
    #[arg(long)]
    log_level: Option<String>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist - it's optional
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    observability::init_tracing();
    let cli = Cli::parse();

    let mut cfg = load_config(Some(cli.config.as_path()))
        .map_err(anyhow::Error::msg)
        .context("configuration error")?;
    if let Some(level) = cli.log_level {
        cfg.logging.level = level;
    }
    if let Some(manifest) = cli.manifest {
        cfg.bootstrap.manifest = Some(manifest);
    }
    cfg.validate()
        .map_err(anyhow::Error::msg)
        .context("configuration error")?;

    if cli.print_config {
        println!("{}", toml::to_string_pretty(&cfg)?);
        return Ok(());
    }

    observability::apply_logging_level(&cfg.logging.level);
    tracing::info!(path = %cli.config.display(), "Configuration loaded");

    let app = App::new(&cfg);
    if let Some(path) = &cfg.bootstrap.manifest {
        app.load_manifest(path)
            .await
            .with_context(|| format!("cannot bootstrap from {}", path.display()))?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = tokio::spawn(app.run(shutdown_rx));

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "Cannot listen for shutdown signal"),
    }
    let _ = shutdown_tx.send(true);

    running.await.context("controller task failed")??;
    Ok(())
}
