//! Game type definitions.
//!
//! Games are identified locally by a short id (`skyrimse`) and remotely by
//! their Nexus Mods domain (`skyrimspecialedition`). Manifests carry the
//! domain, local state carries the id.

/// Supported game types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameType {
    /// The Elder Scrolls V: Skyrim Special Edition
    SkyrimSE,
    /// The Elder Scrolls V: Skyrim (original release)
    Skyrim,
    /// The Elder Scrolls IV: Oblivion
    Oblivion,
    /// Fallout 4
    Fallout4,
    /// Fallout: New Vegas
    FalloutNV,
    /// Fallout 3
    Fallout3,
    /// Cyberpunk 2077
    Cyberpunk2077,
    /// Stardew Valley
    StardewValley,
}

impl GameType {
    pub const ALL: [GameType; 8] = [
        GameType::SkyrimSE,
        GameType::Skyrim,
        GameType::Oblivion,
        GameType::Fallout4,
        GameType::FalloutNV,
        GameType::Fallout3,
        GameType::Cyberpunk2077,
        GameType::StardewValley,
    ];

    /// Returns the display name for this game.
    pub fn name(&self) -> &'static str {
        match self {
            GameType::SkyrimSE => "Skyrim Special Edition",
            GameType::Skyrim => "Skyrim",
            GameType::Oblivion => "Oblivion",
            GameType::Fallout4 => "Fallout 4",
            GameType::FalloutNV => "Fallout: New Vegas",
            GameType::Fallout3 => "Fallout 3",
            GameType::Cyberpunk2077 => "Cyberpunk 2077",
            GameType::StardewValley => "Stardew Valley",
        }
    }

    /// Returns the local game id used as key in the mod store.
    pub fn id(&self) -> &'static str {
        match self {
            GameType::SkyrimSE => "skyrimse",
            GameType::Skyrim => "skyrim",
            GameType::Oblivion => "oblivion",
            GameType::Fallout4 => "fallout4",
            GameType::FalloutNV => "falloutnv",
            GameType::Fallout3 => "fallout3",
            GameType::Cyberpunk2077 => "cyberpunk2077",
            GameType::StardewValley => "stardewvalley",
        }
    }

    /// Returns the Nexus Mods domain name for this game.
    pub fn nexus_domain(&self) -> &'static str {
        match self {
            GameType::SkyrimSE => "skyrimspecialedition",
            GameType::Skyrim => "skyrim",
            GameType::Oblivion => "oblivion",
            GameType::Fallout4 => "fallout4",
            GameType::FalloutNV => "newvegas",
            GameType::Fallout3 => "fallout3",
            GameType::Cyberpunk2077 => "cyberpunk2077",
            GameType::StardewValley => "stardewvalley",
        }
    }

    /// Whether the game uses Gamebryo/Creation engine plugin files
    pub fn is_gamebryo(&self) -> bool {
        !matches!(self, GameType::Cyberpunk2077 | GameType::StardewValley)
    }

    /// Plugin file extensions (lowercase, with dot) the game loads.
    ///
    /// Light plugins (`.esl`) only exist for Skyrim SE and Fallout 4.
    pub fn plugin_extensions(&self) -> &'static [&'static str] {
        match self {
            GameType::SkyrimSE | GameType::Fallout4 => &[".esp", ".esm", ".esl"],
            g if g.is_gamebryo() => &[".esp", ".esm"],
            _ => &[],
        }
    }

    /// Parses a game type from its local id.
    pub fn from_id(id: &str) -> Option<Self> {
        let id = id.to_lowercase();
        Self::ALL.into_iter().find(|g| g.id() == id)
    }

    /// Parses a game type from a Nexus domain name.
    pub fn from_nexus_domain(domain: &str) -> Option<Self> {
        let domain = domain.to_lowercase();
        Self::ALL.into_iter().find(|g| g.nexus_domain() == domain)
    }
}

impl std::fmt::Display for GameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Map a local game id to the domain used in manifests.
///
/// Unknown games pass through unchanged.
pub fn nexus_domain_for(game_id: &str) -> String {
    GameType::from_id(game_id)
        .map(|g| g.nexus_domain().to_string())
        .unwrap_or_else(|| game_id.to_string())
}

/// Map a manifest domain back to a local game id, passing unknown domains through.
pub fn game_id_for_domain(domain: &str) -> String {
    GameType::from_nexus_domain(domain)
        .map(|g| g.id().to_string())
        .unwrap_or_else(|| domain.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_type_properties() {
        let skyrim = GameType::SkyrimSE;
        assert_eq!(skyrim.name(), "Skyrim Special Edition");
        assert_eq!(skyrim.id(), "skyrimse");
        assert_eq!(skyrim.nexus_domain(), "skyrimspecialedition");
        assert!(skyrim.plugin_extensions().contains(&".esl"));
        assert!(!GameType::Oblivion.plugin_extensions().contains(&".esl"));
        assert!(GameType::StardewValley.plugin_extensions().is_empty());
    }

    #[test]
    fn test_game_type_display() {
        assert_eq!(GameType::FalloutNV.to_string(), "Fallout: New Vegas");
    }

    #[test]
    fn test_from_nexus_domain() {
        assert_eq!(
            GameType::from_nexus_domain("SKYRIMSPECIALEDITION"),
            Some(GameType::SkyrimSE)
        );
        assert_eq!(GameType::from_nexus_domain("newvegas"), Some(GameType::FalloutNV));
        assert_eq!(GameType::from_nexus_domain("morrowind"), None);
    }

    #[test]
    fn test_domain_mapping_round_trip() {
        assert_eq!(nexus_domain_for("falloutnv"), "newvegas");
        assert_eq!(game_id_for_domain("newvegas"), "falloutnv");
        assert_eq!(nexus_domain_for("unknowngame"), "unknowngame");
    }
}
