use anyhow::Result;
use std::sync::Arc;
use techie_app::config::ClientConfig;
use techie_app::logging::init_logging;
use techie_app::providers::{ConfiguredToken, HttpUsageReporter};
use techie_app::repl::Repl;
use techie_core::{Session, SessionDeps};
use techie_executor::{HostProbe, ProcessEngine};
use techie_interfaces::{EventSink, TerminalSink, TokenProvider};
use techie_policy::SettingsStore;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let config_path = ClientConfig::path_from_env();
    let mut config = ClientConfig::load(&config_path)?;
    config.apply_env();
    if let Err(e) = config.validate() {
        eprintln!("❌ Invalid configuration in {}: {}", config_path.display(), e);
        return Err(e);
    }
    info!(endpoint = %config.ws_endpoint, "Configuration loaded");

    let events: Arc<dyn EventSink> = Arc::new(TerminalSink::new());
    let shell = config.shell();
    let engine = Arc::new(ProcessEngine::new(shell.clone(), Arc::clone(&events)));

    let tokens: Arc<dyn TokenProvider> = Arc::new(ConfiguredToken::new(config.token.clone()));
    let settings = Arc::new(SettingsStore::new(&config.settings_path));
    let usage = Arc::new(HttpUsageReporter::new(
        config.api_endpoint.clone(),
        Arc::clone(&tokens),
    ));

    let session = Session::start(
        config.ws_endpoint.clone(),
        engine,
        SessionDeps {
            tokens,
            probe: Arc::new(HostProbe::new(shell)),
            usage,
            settings: settings.clone(),
            events,
        },
    );

    Repl::new(session, settings).run().await
}
