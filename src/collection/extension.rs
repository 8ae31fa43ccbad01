//! Game-specific manifest payloads.
//!
//! Providers are registered per game id once at startup and consulted
//! once per export. Each returns extra top-level manifest keys.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use super::model::Mod;
use super::types::PluginInfo;
use crate::error::Result;
use crate::games::GameType;

/// Contributes extra manifest fields for a game
pub trait ExtensionProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Extra top-level keys for the manifest of `container`
    fn generate(
        &self,
        game_id: &str,
        members: &[&Mod],
        staging_dir: &Path,
        container: &Mod,
    ) -> Result<Map<String, Value>>;
}

/// Providers keyed by game id
#[derive(Default, Clone)]
pub struct ExtensionRegistry {
    providers: HashMap<String, Vec<Arc<dyn ExtensionProvider>>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in providers of every known game
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for game in GameType::ALL {
            if game.is_gamebryo() {
                registry.register(game.id(), Arc::new(GamebryoPlugins::new(game)));
            }
        }
        registry
    }

    pub fn register(&mut self, game_id: &str, provider: Arc<dyn ExtensionProvider>) {
        self.providers
            .entry(game_id.to_string())
            .or_default()
            .push(provider);
    }

    pub fn providers_for(&self, game_id: &str) -> &[Arc<dyn ExtensionProvider>] {
        self.providers.get(game_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Merge the payloads of every provider for `game_id`.
    ///
    /// Later providers win on key collisions.
    pub fn generate(
        &self,
        game_id: &str,
        members: &[&Mod],
        staging_dir: &Path,
        container: &Mod,
    ) -> Result<Map<String, Value>> {
        let mut extras = Map::new();
        for provider in self.providers_for(game_id) {
            let data = provider.generate(game_id, members, staging_dir, container)?;
            debug!("{} contributed {} manifest keys", provider.name(), data.len());
            extras.extend(data);
        }
        Ok(extras)
    }
}

/// Lists the plugin files shipped by members of a Gamebryo game
pub struct GamebryoPlugins {
    extensions: &'static [&'static str],
}

impl GamebryoPlugins {
    pub fn new(game: GameType) -> Self {
        Self {
            extensions: game.plugin_extensions(),
        }
    }

    fn is_plugin(&self, file_name: &str) -> bool {
        let lower = file_name.to_lowercase();
        self.extensions.iter().any(|ext| lower.ends_with(ext))
    }

    /// Plugin files at the root of each member's folder, sorted, without duplicates
    pub fn find_plugins(&self, members: &[&Mod], staging_dir: &Path) -> Result<Vec<PluginInfo>> {
        let mut names: Vec<String> = Vec::new();
        for m in members {
            let dir = staging_dir.join(&m.installation_path);
            let Ok(entries) = fs::read_dir(&dir) else {
                debug!("no folder for {}, no plugins", m.id);
                continue;
            };
            for entry in entries {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                if self.is_plugin(&name) {
                    names.push(name);
                }
            }
        }

        names.sort_by_key(|n| n.to_lowercase());
        names.dedup_by(|a, b| a.eq_ignore_ascii_case(b));
        Ok(names
            .into_iter()
            .map(|name| PluginInfo {
                name,
                enabled: true,
            })
            .collect())
    }
}

impl ExtensionProvider for GamebryoPlugins {
    fn name(&self) -> &str {
        "gamebryo-plugins"
    }

    fn generate(
        &self,
        _game_id: &str,
        members: &[&Mod],
        staging_dir: &Path,
        _container: &Mod,
    ) -> Result<Map<String, Value>> {
        let plugins = self.find_plugins(members, staging_dir)?;
        let mut map = Map::new();
        map.insert("plugins".to_string(), serde_json::to_value(plugins)?);
        Ok(map)
    }
}
