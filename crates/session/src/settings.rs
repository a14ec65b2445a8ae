use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use super::error::{
    CreateDirSnafu, RenameTempFileSnafu, SerializeSettingsSnafu, SessionResult, WriteFileSnafu,
};

pub const DEFAULT_EVENT_CAPACITY: usize = 64;
/// Near-bottom distance used when callers do not pass their own threshold.
pub const DEFAULT_AT_BOTTOM_THRESHOLD_PX: f32 = 24.0;
pub const DEFAULT_DATE_LABEL_FORMAT: &str = "%Y-%m-%d";
pub const DEFAULT_TIME_LABEL_FORMAT: &str = "%H:%M";
pub const SETTINGS_DIRECTORY_NAME: &str = "parley";
pub const SETTINGS_FILE_NAME: &str = "session.json";
pub const SETTINGS_ENV_PREFIX: &str = "PARLEY_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[serde(default = "default_at_bottom_threshold_px")]
    pub at_bottom_threshold_px: f32,
    #[serde(default = "default_date_label_format")]
    pub date_label_format: String,
    #[serde(default = "default_time_label_format")]
    pub time_label_format: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
            at_bottom_threshold_px: default_at_bottom_threshold_px(),
            date_label_format: default_date_label_format(),
            time_label_format: default_time_label_format(),
        }
    }
}

impl SessionSettings {
    pub fn normalized(mut self) -> Self {
        self.event_capacity = self.event_capacity.max(1);
        if !self.at_bottom_threshold_px.is_finite() || self.at_bottom_threshold_px < 0.0 {
            self.at_bottom_threshold_px = default_at_bottom_threshold_px();
        }
        self.date_label_format = self.date_label_format.trim().to_string();
        if self.date_label_format.is_empty() {
            self.date_label_format = default_date_label_format();
        }
        self.time_label_format = self.time_label_format.trim().to_string();
        if self.time_label_format.is_empty() {
            self.time_label_format = default_time_label_format();
        }
        self
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<SessionSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".parley"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<SessionSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: SessionSettings) -> SessionResult<()> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn load_from_disk(path: &Path) -> SessionSettings {
        let mut figment = Figment::from(Serialized::defaults(SessionSettings::default()));
        if path.exists() {
            figment = figment.merge(Json::file(path));
        } else {
            tracing::info!("settings file not found at {:?}, using defaults", path);
        }
        figment = figment.merge(Env::prefixed(SETTINGS_ENV_PREFIX));

        match figment.extract::<SessionSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                SessionSettings::default()
            }
        }
    }

    fn persist(&self, settings: &SessionSettings) -> SessionResult<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeSettingsSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

fn default_at_bottom_threshold_px() -> f32 {
    DEFAULT_AT_BOTTOM_THRESHOLD_PX
}

fn default_date_label_format() -> String {
    DEFAULT_DATE_LABEL_FORMAT.to_string()
}

fn default_time_label_format() -> String {
    DEFAULT_TIME_LABEL_FORMAT.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SettingsStore::new(dir.path().join("absent.json"));
        assert_eq!(*store.settings(), SessionSettings::default());
    }

    #[test]
    fn partial_file_merges_over_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.json");
        std::fs::write(&path, r#"{ "event_capacity": 8, "time_label_format": "  " }"#)
            .expect("write settings");

        let settings = SettingsStore::new(path).settings();
        assert_eq!(settings.event_capacity, 8);
        assert_eq!(settings.at_bottom_threshold_px, DEFAULT_AT_BOTTOM_THRESHOLD_PX);
        assert_eq!(settings.time_label_format, DEFAULT_TIME_LABEL_FORMAT);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{ not json").expect("write settings");

        assert_eq!(*SettingsStore::new(path).settings(), SessionSettings::default());
    }

    #[test]
    fn update_persists_normalized_settings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("session.json");
        let store = SettingsStore::new(path.clone());

        store
            .update(SessionSettings {
                event_capacity: 0,
                at_bottom_threshold_px: -5.0,
                ..SessionSettings::default()
            })
            .expect("update settings");

        assert_eq!(store.settings().event_capacity, 1);
        assert_eq!(
            store.settings().at_bottom_threshold_px,
            DEFAULT_AT_BOTTOM_THRESHOLD_PX
        );

        let reloaded = SettingsStore::new(path).settings();
        assert_eq!(reloaded.event_capacity, 1);
    }
}
