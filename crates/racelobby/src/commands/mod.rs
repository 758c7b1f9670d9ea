//! Command handlers plus the shared wiring from config to `OnlineManager`.

pub mod config_cmd;
pub mod lists;
pub mod scan;

use std::sync::Arc;

use racelobby_api::{LanDiscovery, LobbyClient, TransportConfig};
use racelobby_config::Config;
use racelobby_core::{HttpProber, LanSource, LobbySource, OnlineManager, ServerProber, Source};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Load the config file (or `--config`) and apply global flag overrides.
pub fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    let path = global
        .config
        .clone()
        .unwrap_or_else(racelobby_config::config_path);
    let mut config = racelobby_config::load_config_from(&path)?;

    if let Some(ref url) = global.lobby_url {
        config.lobby_url.clone_from(url);
    }
    if let Some(ref dir) = global.lists_dir {
        config.lists_dir = Some(dir.clone());
    }
    if let Some(timeout) = global.timeout {
        config.timeout = timeout;
    }
    config.validate()?;
    Ok(config)
}

/// Sources a command wants registered.
#[derive(Debug, Clone, Copy)]
pub struct SourceSet {
    pub lobby: bool,
    pub lan: bool,
}

/// Build the manager and register the network sources.
/// File lists are attached separately by the callers that need them.
pub fn build_manager(config: &Config, sources: SourceSet) -> Result<OnlineManager, CliError> {
    let online = config.to_online_config();
    let transport = TransportConfig::default().with_timeout(config.request_timeout());
    let client = LobbyClient::new(config.lobby_url()?, &transport)?;

    let prober: Arc<dyn ServerProber> =
        Arc::new(HttpProber::new(client.clone(), online.fix_names));
    let manager = OnlineManager::new(online, Arc::clone(&prober));

    if sources.lobby {
        manager.register_source(Source::batch(LobbySource::new(
            Arc::new(client),
            manager.config().fix_names,
        )));
    }
    if sources.lan && config.lan.enabled {
        let discovery = LanDiscovery::new(config.lan_ports(), config.lan_window());
        manager.register_source(Source::streaming(LanSource::new(
            Arc::new(discovery),
            prober,
        )));
    }
    Ok(manager)
}
