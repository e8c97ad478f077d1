use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

/// Engine configuration. Every value has a default matching the constants
/// the engine was tuned with, so embedders can start from
/// `Settings::default()` and override selectively.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub caches: CacheSettings,
    pub sync: SyncSettings,
}

impl Settings {
    /// Loads settings from `config/{RUN_MODE}.toml` (if present) plus
    /// environment variables (e.g. `DTT_CACHES__ITEM_STATE_CAPACITY=8192`).
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(
                File::with_name(&format!("config/{}", run_mode))
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(Environment::with_prefix("DTT").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            logging: LoggingSettings::default(),
            caches: CacheSettings::default(),
            sync: SyncSettings::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingSettings {
    pub directory: String,
    pub filename: String,
    pub log_level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: "logs".into(),
            filename: "dynamic_tooltips.log".into(),
            log_level: "info".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheSettings {
    /// Capacity of the (item, state) fast-path cache. Once full, new
    /// entries are rejected rather than evicted; a rejection degrades to a
    /// cache miss on the next lookup.
    pub item_state_capacity: usize,
    /// Capacity of the LRU cache holding cloned virtual item definitions.
    pub definition_capacity: usize,
    /// Capacity of the LRU cache holding built description strings.
    pub built_description_capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            item_state_capacity: 4096,
            definition_capacity: 10_000,
            built_description_capacity: 10_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SyncSettings {
    /// Seconds to wait after a world transition before replaying the
    /// observer's inventory with tooltips applied. The delay keeps
    /// auxiliary pushes out of the client's time-sensitive ready handshake.
    pub post_transition_refresh_delay_secs: u64,
    /// Section names processed with the translation-only strategy: the slot
    /// keeps its canonical item id and only the translation string bound to
    /// that canonical type is overridden. Sections not listed here get
    /// virtual item ids. Use this for sections whose contents the client
    /// echoes back in interaction messages that the host cannot rewrite.
    pub translation_only_sections: Vec<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            post_transition_refresh_delay_secs: 2,
            translation_only_sections: Vec::new(),
        }
    }
}
