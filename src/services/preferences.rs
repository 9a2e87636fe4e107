//! Hot-reloadable user defaults.

use arc_swap::ArcSwap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::{OrchestratorConfig, PreferencesConfig};
use crate::networks::ChainId;

/// Default fee tier and default network, read at submission time.
pub struct PreferenceService {
    current: ArcSwap<PreferencesConfig>,
}

impl PreferenceService {
    pub fn new(preferences: PreferencesConfig) -> Self {
        Self {
            current: ArcSwap::from_pointee(preferences),
        }
    }

    pub fn get(&self) -> Arc<PreferencesConfig> {
        self.current.load_full()
    }

    pub fn update(&self, preferences: PreferencesConfig) {
        self.current.store(Arc::new(preferences));
    }

    pub fn default_tier(&self) -> String {
        self.current.load().default_tier.clone()
    }

    pub fn default_chain_id(&self) -> ChainId {
        ChainId(self.current.load().default_chain_id)
    }

    /// Apply the preferences section of every reloaded config until the
    /// channel closes.
    pub async fn run_updates(&self, mut updates: mpsc::UnboundedReceiver<OrchestratorConfig>) {
        while let Some(config) = updates.recv().await {
            if *self.get() == config.preferences {
                continue;
            }
            tracing::info!(
                default_tier = %config.preferences.default_tier,
                default_chain_id = config.preferences.default_chain_id,
                "Preferences updated"
            );
            self.update(config.preferences);
        }
    }
}

impl Default for PreferenceService {
    fn default() -> Self {
        Self::new(PreferencesConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_swaps_preferences() {
        let prefs = PreferenceService::default();
        assert_eq!(prefs.default_tier(), "medium");
        prefs.update(PreferencesConfig {
            default_tier: "high".to_string(),
            default_chain_id: 10,
        });
        assert_eq!(prefs.default_tier(), "high");
        assert_eq!(prefs.default_chain_id(), ChainId(10));
    }

    #[tokio::test]
    async fn test_run_updates_applies_reloads() {
        let prefs = PreferenceService::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut config = OrchestratorConfig::default();
        config.preferences.default_tier = "low".to_string();
        tx.send(config).unwrap();
        drop(tx);
        prefs.run_updates(rx).await;
        assert_eq!(prefs.default_tier(), "low");
    }
}
