//! Config file watcher feeding hot-reloadable sections to the running service.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::OrchestratorConfig;

/// Sections read once at startup. Changing them on disk has no effect until
/// the process restarts.
fn restart_sections(config: &OrchestratorConfig) -> serde_json::Value {
    serde_json::json!({
        "networks": config.networks,
        "signers": config.signers,
        "store": config.store,
        "admin": config.admin,
    })
}

/// Watches the orchestrator config file and publishes every valid reload.
pub struct ConfigWatcher {
    path: PathBuf,
    startup: serde_json::Value,
    update_tx: mpsc::UnboundedSender<OrchestratorConfig>,
}

impl ConfigWatcher {
    /// `running` is the config the process started with.
    pub fn new(
        path: &Path,
        running: &OrchestratorConfig,
    ) -> (Self, mpsc::UnboundedReceiver<OrchestratorConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                startup: restart_sections(running),
                update_tx,
            },
            update_rx,
        )
    }

    /// Load `path` and publish it. Invalid files are logged and skipped.
    fn reload(path: &Path, startup: &serde_json::Value, tx: &mpsc::UnboundedSender<OrchestratorConfig>) {
        match load_config(path) {
            Ok(config) => {
                if restart_sections(&config) != *startup {
                    tracing::warn!(
                        path = ?path,
                        "Network, signer, store or admin settings changed; restart to apply them"
                    );
                }
                let _ = tx.send(config);
            }
            Err(e) => {
                tracing::error!(path = ?path, error = %e, "Config reload rejected, keeping current preferences");
            }
        }
    }

    /// Start watching in notify's background thread.
    ///
    /// The returned watcher must be kept alive for updates to flow.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self {
            path,
            startup,
            update_tx,
        } = self;
        let file_name = path.file_name().map(|n| n.to_os_string());
        let watch_path = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let ours = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if ours && (event.kind.is_modify() || event.kind.is_create()) {
                        tracing::info!(path = ?path, "Config file changed");
                        Self::reload(&path, &startup, &update_tx);
                    }
                }
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&watch_path, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?watch_path, "Config watcher started");
        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GatewayKind, NetworkConfig};

    fn temp_config(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("orchestrator-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_reload_publishes_valid_config() {
        let path = temp_config("[preferences]\ndefault_tier = \"high\"\n");
        let (watcher, mut rx) = ConfigWatcher::new(&path, &OrchestratorConfig::default());
        ConfigWatcher::reload(&path, &watcher.startup, &watcher.update_tx);

        let config = rx.try_recv().unwrap();
        assert_eq!(config.preferences.default_tier, "high");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_reload_skips_invalid_config() {
        let path = temp_config("[fees]\nwindow_blocks = 0\n");
        let (watcher, mut rx) = ConfigWatcher::new(&path, &OrchestratorConfig::default());
        ConfigWatcher::reload(&path, &watcher.startup, &watcher.update_tx);

        assert!(rx.try_recv().is_err());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_restart_sections_track_networks() {
        let base = OrchestratorConfig::default();
        let mut changed = base.clone();
        changed.networks.push(NetworkConfig {
            chain_id: 31337,
            gateway: GatewayKind::Memory,
            ..NetworkConfig::default()
        });
        assert_eq!(restart_sections(&base), restart_sections(&base.clone()));
        assert_ne!(restart_sections(&base), restart_sections(&changed));
    }
}
