use certbroker::{
    cli::run_cli,
    observability::{init_logging, log_config_info},
    AppConfig, APP_NAME, VERSION,
};
use tracing::debug;

fn install_rustls_provider() -> anyhow::Result<()> {
    use rustls::crypto::{ring, CryptoProvider};

    if CryptoProvider::get_default().is_none() {
        ring::default_provider()
            .install_default()
            .map_err(|_| anyhow::anyhow!("failed to install ring crypto provider"))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    install_rustls_provider()?;

    // Load .env file if it exists (optional - won't fail if missing)
    // This must happen before any config is read from environment
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    let config = AppConfig::from_env()?;
    init_logging(&config.logging);
    debug!(app_name = APP_NAME, version = VERSION, "Starting");
    log_config_info(&config);

    run_cli(config).await
}
