// Entrypoint for the CLI application.
// - Keeps `main` small: load settings, install logging, hand off to the menu.
// - Returns `anyhow::Result` so configuration errors print with context.

use customvision_cli::{config::Settings, progress::LogWriter, ui::main_menu};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Log lines go to stderr around whatever spinner is on screen.
    let log = LogWriter::stderr();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(log.clone())
        .init();

    // Keys, endpoint and sample locations come from the environment; see
    // `config::Settings::from_env`.
    let settings = Settings::from_env()?;

    main_menu(settings, log)?;
    Ok(())
}
