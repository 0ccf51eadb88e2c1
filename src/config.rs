use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = ".ipguardian.json";

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub debug: Option<bool>,
    pub answer: AnswerConfig,
    pub history: HistoryConfig,
    pub reveal: RevealSettings,
    pub ui: UiConfig,
    pub data: DataDirConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnswerProvider {
    #[default]
    Mock,
    OpenAi,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct AnswerConfig {
    pub provider: AnswerProvider,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub mock_delay_ms: u64,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        AnswerConfig {
            provider: AnswerProvider::Mock,
            api_key: None,
            model: None,
            base_url: None,
            mock_delay_ms: 1500,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HistoryBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryConfig {
    pub backend: HistoryBackend,
    pub database_url: String,
    pub mock_delay_ms: u64,
}

fn default_database_url() -> String {
    "sqlite:ipguardian.db".to_string()
}

impl Default for HistoryConfig {
    fn default() -> Self {
        HistoryConfig {
            backend: HistoryBackend::Memory,
            database_url: default_database_url(),
            mock_delay_ms: 600,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RevealSettings {
    pub recency_window_ms: u64,
    pub tick_ms: u64,
    pub chunk_size: usize,
}

impl Default for RevealSettings {
    fn default() -> Self {
        RevealSettings { recency_window_ms: 10_000, tick_ms: 15, chunk_size: 3 }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct UiConfig {
    pub theme: Theme,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct DataDirConfig {
    pub directory: String,
}

fn default_data_directory() -> String {
    ".ipguardian".to_string()
}

impl Default for DataDirConfig {
    fn default() -> Self {
        DataDirConfig { directory: default_data_directory() }
    }
}

impl Config {
    /// Layered load: global files, then the working directory, then `explicit`, then env.
    pub fn load(explicit: Option<&Path>) -> Self {
        let mut paths: Vec<PathBuf> = [
            dirs::home_dir().map(|p| p.join(CONFIG_FILE_NAME)),
            dirs::config_dir().map(|p| p.join("ipguardian").join(CONFIG_FILE_NAME)),
            Some(PathBuf::from(".").join(CONFIG_FILE_NAME)),
        ]
        .into_iter()
        .flatten()
        .collect();
        if let Some(path) = explicit {
            paths.push(path.to_path_buf());
        }

        let mut cfg = Self::load_from_files(&paths);
        cfg.apply_env_overrides(|key| env::var(key).ok());
        cfg
    }

    fn load_from_files(paths: &[PathBuf]) -> Self {
        let mut merged = Value::Object(Default::default());
        for path in paths {
            if !path.exists() {
                continue;
            }
            log::debug!("Attempting to load config from: {:?}", path);
            match fs::read_to_string(path) {
                Ok(content) => match serde_json::from_str::<Value>(&content) {
                    Ok(layer) => {
                        merge_json(&mut merged, layer);
                        log::info!("Loaded config layer from: {:?}", path);
                    }
                    Err(e) => log::warn!("Failed to parse config file at {:?}: {}", path, e),
                },
                Err(e) => log::warn!("Failed to read config file at {:?}: {}", path, e),
            }
        }

        match serde_json::from_value::<Config>(merged) {
            Ok(cfg) => cfg,
            Err(e) => {
                log::warn!("Merged config is invalid, falling back to defaults: {}", e);
                Config::default()
            }
        }
    }

    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(api_key) = lookup("OPENAI_API_KEY") {
            self.answer.api_key = Some(api_key);
        }
        if let Some(url) = lookup("IPGUARDIAN_DATABASE_URL") {
            self.history.database_url = url;
        }
        if let Some(debug) = lookup("IPGUARDIAN_DEBUG").and_then(|s| s.parse::<bool>().ok()) {
            self.debug = Some(debug);
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.data.directory)
    }
}

/// Objects merge key by key; everything else in `layer` replaces what was there.
fn merge_json(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Object(base), Value::Object(layer)) => {
            for (key, value) in layer {
                merge_json(base.entry(key).or_insert(Value::Null), value);
            }
        }
        (slot, value) => *slot = value,
    }
}
