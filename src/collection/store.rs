//! SQLite storage for local mod state.
//!
//! Mods, archives and profiles are stored as JSON rows keyed by game. All
//! mutation is whole-row or whole-attribute replacement so batched updates
//! can't interleave partial writes.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::model::{Mod, Rule};
use super::table::{ArchiveInfo, ModTable};

/// A profile: which mods are enabled for a game
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub game_id: String,
    pub name: String,
    /// Mod id -> enabled
    #[serde(default)]
    pub mod_state: BTreeMap<String, bool>,
}

impl Profile {
    pub fn is_enabled(&self, mod_id: &str) -> bool {
        self.mod_state.get(mod_id).copied().unwrap_or(false)
    }
}

/// SQLite-backed mod state
pub struct ModStore {
    conn: Connection,
}

impl ModStore {
    /// Open or create a state database
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;",
        )
        .context("Failed to configure SQLite pragmas")?;

        let store = Self { conn };
        store.create_tables()?;
        Ok(store)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to create in-memory database")?;
        let store = Self { conn };
        store.create_tables()?;
        Ok(store)
    }

    fn create_tables(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
            CREATE TABLE IF NOT EXISTS mods (
                game_id TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at TEXT DEFAULT (datetime('now')),
                PRIMARY KEY (game_id, id)
            );

            CREATE TABLE IF NOT EXISTS archives (
                game_id TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (game_id, id)
            );

            CREATE TABLE IF NOT EXISTS profiles (
                id TEXT PRIMARY KEY,
                game_id TEXT NOT NULL,
                data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_profiles_game ON profiles(game_id);
            "#,
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    /// Load every mod and archive of a game
    pub fn load_game(&self, game_id: &str) -> Result<ModTable> {
        let mut table = ModTable::new(game_id);

        let mut stmt = self
            .conn
            .prepare_cached("SELECT data FROM mods WHERE game_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map([game_id], |row| row.get::<_, String>(0))?;
        for row in rows {
            let m: Mod = serde_json::from_str(&row?).context("Corrupt mod row")?;
            table.insert(m);
        }

        let mut stmt = self
            .conn
            .prepare_cached("SELECT data FROM archives WHERE game_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map([game_id], |row| row.get::<_, String>(0))?;
        for row in rows {
            let a: ArchiveInfo = serde_json::from_str(&row?).context("Corrupt archive row")?;
            table.insert_archive(a);
        }

        debug!(
            "loaded {} mods, {} archives for {}",
            table.mods.len(),
            table.archives.len(),
            game_id
        );
        Ok(table)
    }

    pub fn get_mod(&self, game_id: &str, mod_id: &str) -> Result<Option<Mod>> {
        let data: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM mods WHERE game_id = ?1 AND id = ?2",
                params![game_id, mod_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query mod")?;

        data.map(|d| serde_json::from_str(&d).context("Corrupt mod row"))
            .transpose()
    }

    /// Insert or replace a mod
    pub fn save_mod(&self, game_id: &str, m: &Mod) -> Result<()> {
        let data = serde_json::to_string(m)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO mods (game_id, id, data, updated_at) VALUES (?1, ?2, ?3, datetime('now'))",
            params![game_id, m.id, data],
        )?;
        Ok(())
    }

    pub fn remove_mod(&self, game_id: &str, mod_id: &str) -> Result<bool> {
        let n = self.conn.execute(
            "DELETE FROM mods WHERE game_id = ?1 AND id = ?2",
            params![game_id, mod_id],
        )?;
        Ok(n > 0)
    }

    pub fn save_archive(&self, game_id: &str, archive: &ArchiveInfo) -> Result<()> {
        let data = serde_json::to_string(archive)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO archives (game_id, id, data) VALUES (?1, ?2, ?3)",
            params![game_id, archive.id, data],
        )?;
        Ok(())
    }

    /// Read-modify-write of one mod inside a transaction
    fn update_mod(&mut self, game_id: &str, mod_id: &str, f: impl FnOnce(&mut Mod) -> Result<()>) -> Result<()> {
        let tx = self.conn.transaction()?;
        let data: Option<String> = tx
            .query_row(
                "SELECT data FROM mods WHERE game_id = ?1 AND id = ?2",
                params![game_id, mod_id],
                |row| row.get(0),
            )
            .optional()?;
        let data = data.with_context(|| format!("Mod not found: {}", mod_id))?;

        let mut m: Mod = serde_json::from_str(&data).context("Corrupt mod row")?;
        f(&mut m)?;

        tx.execute(
            "UPDATE mods SET data = ?3, updated_at = datetime('now') WHERE game_id = ?1 AND id = ?2",
            params![game_id, mod_id, serde_json::to_string(&m)?],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Replace one top-level attribute of a mod as a whole.
    ///
    /// `Value::Null` removes the attribute.
    pub fn set_mod_attribute(&mut self, game_id: &str, mod_id: &str, key: &str, value: Value) -> Result<()> {
        self.update_mod(game_id, mod_id, |m| {
            let mut attrs = serde_json::to_value(&m.attributes)?;
            if let Value::Object(map) = &mut attrs {
                if value.is_null() {
                    map.remove(key);
                } else {
                    map.insert(key.to_string(), value);
                }
            }
            m.attributes = serde_json::from_value(attrs)
                .with_context(|| format!("Invalid value for attribute {}", key))?;
            Ok(())
        })
    }

    pub fn add_mod_rule(&mut self, game_id: &str, mod_id: &str, rule: Rule) -> Result<()> {
        self.update_mod(game_id, mod_id, |m| {
            if !m.rules.contains(&rule) {
                m.rules.push(rule);
            }
            Ok(())
        })
    }

    pub fn remove_mod_rule(&mut self, game_id: &str, mod_id: &str, rule: &Rule) -> Result<()> {
        self.update_mod(game_id, mod_id, |m| {
            m.rules.retain(|r| r != rule);
            Ok(())
        })
    }

    /// Replace the complete rule list of a mod
    pub fn set_mod_rules(&mut self, game_id: &str, mod_id: &str, rules: Vec<Rule>) -> Result<()> {
        self.update_mod(game_id, mod_id, |m| {
            m.rules = rules;
            Ok(())
        })
    }

    pub fn save_profile(&self, profile: &Profile) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO profiles (id, game_id, data) VALUES (?1, ?2, ?3)",
            params![profile.id, profile.game_id, serde_json::to_string(profile)?],
        )?;
        info!("saved profile {} ({})", profile.name, profile.id);
        Ok(())
    }

    pub fn get_profile(&self, profile_id: &str) -> Result<Option<Profile>> {
        let data: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM profiles WHERE id = ?1",
                [profile_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query profile")?;

        data.map(|d| serde_json::from_str(&d).context("Corrupt profile row"))
            .transpose()
    }

    pub fn profiles_for_game(&self, game_id: &str) -> Result<Vec<Profile>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT data FROM profiles WHERE game_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map([game_id], |row| row.get::<_, String>(0))?;

        let mut profiles = Vec::new();
        for row in rows {
            profiles.push(serde_json::from_str(&row?).context("Corrupt profile row")?);
        }
        Ok(profiles)
    }
}
