use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const SETTINGS_FILE_NAME: &str = "settings.json";
const CONFIG_DIR_NAME: &str = "clarity-assist";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Where the dispatcher submits chunks for classification.
    pub analyzer_url: String,

    /// Bind address for the bundled analyze proxy.
    pub proxy_addr: String,

    /// Recognition language passed to the speech engine.
    pub language: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            analyzer_url: "http://127.0.0.1:8787/analyze".to_string(),
            proxy_addr: "127.0.0.1:8787".to_string(),
            language: "en-US".to_string(),
        }
    }
}

fn settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(SETTINGS_FILE_NAME))
}

pub fn load_settings() -> AppSettings {
    let Some(path) = settings_path() else {
        log::warn!("Settings: could not determine config directory");
        return AppSettings::default();
    };
    load_settings_from(&path)
}

/// Tolerant load: a missing or unparsable file falls back to defaults.
pub fn load_settings_from(path: &Path) -> AppSettings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<AppSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                AppSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            AppSettings::default()
        }
    }
}
