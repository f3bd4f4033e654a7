use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_DIR_NAME: &str = "BleController";
const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_true(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "ble_controller".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    // Controller
    #[serde(default = "default_rescan_interval_ms")]
    pub rescan_interval_ms: u64,
    #[serde(default = "default_true")]
    pub timer_repeats: bool,
    #[serde(default = "default_true")]
    pub discover_services_on_connect: bool,

    // Adapter
    #[serde(default)]
    pub adapter_index: usize,
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,

    // Console consumer
    #[serde(default)]
    pub auto_connect_name: Option<String>,
    #[serde(default = "default_true")]
    pub auto_read_readable: bool,

    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rescan_interval_ms: default_rescan_interval_ms(),
            timer_repeats: true,
            discover_services_on_connect: true,
            adapter_index: 0,
            connect_timeout_ms: None,
            auto_connect_name: None,
            auto_read_readable: true,
            log_settings: LogSettings::default(),
        }
    }
}

fn default_rescan_interval_ms() -> u64 {
    3000
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load settings from the user config directory, falling back to
    /// defaults when the file is missing or unreadable.
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    pub fn with_path(settings_path: PathBuf) -> Self {
        // Logging is not up yet, so a missing or broken file is silent
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push(CONFIG_DIR_NAME);
        fs::create_dir_all(&path)?;
        path.push(SETTINGS_FILE_NAME);
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn set_auto_connect_name(&mut self, name: Option<String>) -> anyhow::Result<()> {
        self.settings.auto_connect_name = name;
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_settings_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("ble_controller_test_{}_{}", name, std::process::id()))
            .join(SETTINGS_FILE_NAME)
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"timer_repeats": false}"#).unwrap();
        assert!(!settings.timer_repeats);
        assert_eq!(settings.rescan_interval_ms, 3000);
        assert!(settings.discover_services_on_connect);
        assert_eq!(settings.log_settings.file_name_prefix, "ble_controller");
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let service = SettingsService::with_path(temp_settings_path("missing"));
        assert_eq!(service.get(), &Settings::default());
    }

    #[test]
    fn test_save_and_reload() {
        let path = temp_settings_path("roundtrip");
        let mut service = SettingsService::with_path(path.clone());
        service.get_mut().rescan_interval_ms = 1500;
        service
            .set_auto_connect_name(Some("Thermometer".to_string()))
            .unwrap();

        let reloaded = SettingsService::with_path(path.clone());
        assert_eq!(reloaded.get().rescan_interval_ms, 1500);
        assert_eq!(
            reloaded.get().auto_connect_name.as_deref(),
            Some("Thermometer")
        );

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let path = temp_settings_path("corrupt");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();

        let service = SettingsService::with_path(path.clone());
        assert_eq!(service.get(), &Settings::default());

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
