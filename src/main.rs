use clap::Parser;
use tracing::info;

use service_billing_manager::cli::{self, Cli};
use service_billing_manager::config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    // Logs go to stderr so command output stays pipeable
    tracing_subscriber::fmt()
        .with_max_level(settings.log_level())
        .with_writer(std::io::stderr)
        .init();
    info!(
        source = %Settings::source(cli.config.as_deref()).display(),
        backend = ?settings.storage.backend,
        "Configuration loaded"
    );

    cli::run(cli, settings).await
}
