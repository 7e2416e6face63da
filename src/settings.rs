use anyhow::Context;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::DEFAULT_CHUNK_CAPACITY;
use crate::share::DEFAULT_SHARE_BASE;

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "folio";

/// How pages are laid out for reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReadingMode {
    /// Continuous virtualized scroll
    #[default]
    Scroll,
    /// One page resident at a time, addressed by URL
    SinglePage,
}

impl ReadingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingMode::Scroll => "Scroll",
            ReadingMode::SinglePage => "Single page",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Pages per backend fetch
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Pages materialized beyond each edge of the visible window
    #[serde(default = "default_overscan")]
    pub overscan: usize,

    /// Fetched chunks kept in memory per document
    #[serde(default = "default_chunk_cache_capacity")]
    pub chunk_cache_capacity: usize,

    #[serde(default)]
    pub reading_mode: ReadingMode,

    /// Version id that share links leave implicit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_version: Option<String>,

    #[serde(default = "default_share_base_url")]
    pub share_base_url: String,

    #[serde(default = "default_history_size")]
    pub history_size: usize,

    /// Locale passed along with document fetches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_chunk_size() -> usize {
    10
}

fn default_overscan() -> usize {
    3
}

fn default_chunk_cache_capacity() -> usize {
    DEFAULT_CHUNK_CAPACITY
}

fn default_share_base_url() -> String {
    DEFAULT_SHARE_BASE.to_string()
}

fn default_history_size() -> usize {
    100
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            chunk_size: default_chunk_size(),
            overscan: default_overscan(),
            chunk_cache_capacity: default_chunk_cache_capacity(),
            reading_mode: ReadingMode::default(),
            default_version: None,
            share_base_url: default_share_base_url(),
            history_size: default_history_size(),
            locale: None,
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

impl Settings {
    /// Load settings from `path` (or the default location).
    ///
    /// A missing file is created with defaults; a broken one is logged and
    /// ignored. Either way the reader gets usable settings.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let path = match path.map(Path::to_path_buf).or_else(default_config_path) {
            Some(path) => path,
            None => {
                warn!("Could not determine config directory, using default settings");
                return Self::default();
            }
        };

        if !path.exists() {
            info!("Settings file not found, creating with defaults at {path:?}");
            let settings = Self::default();
            if let Err(e) = settings.save_to(&path) {
                error!("Failed to save settings to {path:?}: {e:#}");
            }
            return settings;
        }

        match Self::load_from_path(&path) {
            Ok(settings) => settings,
            Err(e) => {
                error!("Failed to load settings from {path:?}: {e:#}");
                Self::default()
            }
        }
    }

    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading settings file {}", path.display()))?;
        let mut settings: Settings = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing settings file {}", path.display()))?;
        debug!("Loaded settings from {path:?}");

        if settings.version < CURRENT_VERSION {
            migrate_settings(&mut settings);
            if let Err(e) = settings.save_to(path) {
                error!("Failed to save migrated settings to {path:?}: {e:#}");
            }
        }

        settings.sanitize();
        Ok(settings)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating config directory {}", parent.display()))?;
            }
        }

        let mut content = String::from(SETTINGS_HEADER);
        content.push_str(&serde_yaml::to_string(self)?);
        fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
        debug!("Saved settings to {path:?}");
        Ok(())
    }

    /// Zero sizes would make chunk math and history meaningless
    fn sanitize(&mut self) {
        if self.chunk_size == 0 {
            warn!("chunk_size 0 is invalid, using {}", default_chunk_size());
            self.chunk_size = default_chunk_size();
        }
        self.chunk_cache_capacity = self.chunk_cache_capacity.max(1);
        self.history_size = self.history_size.max(1);
    }
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );

    // Future migrations go here:
    // if settings.version < 2 {
    //     migrate_v1_to_v2(settings);
    // }

    settings.version = CURRENT_VERSION;
}

const SETTINGS_HEADER: &str = r#"# ============================================================================
# folio reader settings
# ============================================================================
# chunk_size:            pages fetched per backend request
# overscan:              pages kept materialized beyond the visible window
# chunk_cache_capacity:  fetched chunks kept in memory per document
# reading_mode:          scroll | single_page
# default_version:       version id omitted from share links
# share_base_url:        prefix of generated share links
# history_size:          back/forward navigation entries

"#;
