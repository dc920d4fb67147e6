use crate::api::client::ApiClient;
use crate::api::socket;
use crate::controller::{Controller, UserCommand, View};
use crate::error::{ClientError, Result};
use crate::storage::SqliteStore;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Overrides the configured server address.
pub const SERVER_ENV: &str = "PINCHAT_SERVER";

fn default_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server_url: String,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self { server_url: String::new(), request_timeout_secs: default_timeout() }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    fn toml_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        Some(base.config_dir().join("pinchat.toml"))
    }

    /// Config file, then `PINCHAT_SERVER`. A missing or unreadable file
    /// yields defaults.
    pub fn load() -> Self {
        let mut config = Self::toml_path()
            .and_then(|path| fs::read_to_string(path).ok())
            .and_then(|text| match Self::from_toml(&text) {
                Ok(config) => Some(config),
                Err(e) => {
                    log::warn!("ignoring config file: {e}");
                    None
                }
            })
            .unwrap_or_default();
        if let Ok(server) = std::env::var(SERVER_ENV) {
            config.server_url = crate::utils::normalize_url(&server);
        }
        config
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| ClientError::Config(e.to_string()))
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::toml_path().ok_or_else(|| ClientError::Config("no config directory".into()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let toml = toml::to_string_pretty(self).map_err(|e| ClientError::Config(e.to_string()))?;
        fs::write(path, toml)?;
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        !self.server_url.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Connect to the configured server and run the chat session until the
/// command sender is dropped.
pub async fn run_session<V>(config: AppConfig, view: V, commands: mpsc::UnboundedReceiver<UserCommand>) -> Result<()>
where
    V: View + Send + 'static,
{
    let api = ApiClient::new(&config.server_url, config.timeout())?;
    let store = SqliteStore::open_default()?;
    match store.contacts_updated_at() {
        Ok(Some(at)) => log::debug!("contact cache last refreshed {at}"),
        Ok(None) => log::debug!("no cached contacts yet"),
        Err(e) => log::warn!("could not read contact cache age: {e}"),
    }
    let (socket, events) = socket::connect(&api.base_url).await?;
    let controller = Controller::new(api, socket.clone(), store, view);
    controller.run(commands, events).await;
    socket.close();
    Ok(())
}

#[cfg(feature = "gui")]
pub fn build_ui(app: &adw::Application) {
    let config = AppConfig::load();
    if config.is_configured() {
        crate::ui::main_window::show_main_window(app, config);
    } else {
        crate::ui::setup::show_setup_window(app);
    }
}
