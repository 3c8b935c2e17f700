use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            ansi_colors: default_true(),
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
    "polar_hr_monitor".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Case-insensitive name fragments a peripheral must advertise to be
    /// surfaced by the scanner.
    #[serde(default = "default_name_prefixes")]
    pub device_name_prefixes: Vec<String>,
    #[serde(default = "default_scan_duration_ms")]
    pub scan_duration_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    // Liveness watchdog
    #[serde(default = "default_stale_threshold_ms")]
    pub stale_signal_threshold_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub liveness_poll_interval_ms: u64,

    /// Age assumed by the calorie/zone formulas when no profile is supplied.
    #[serde(default = "default_assumed_age")]
    pub assumed_age_years: u8,

    #[serde(default)]
    pub known_device_ids: Vec<String>,
    #[serde(default)]
    pub last_connected_id: Option<String>,

    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_name_prefixes: default_name_prefixes(),
            scan_duration_ms: default_scan_duration_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            stale_signal_threshold_ms: default_stale_threshold_ms(),
            liveness_poll_interval_ms: default_poll_interval_ms(),
            assumed_age_years: default_assumed_age(),
            known_device_ids: Vec::new(),
            last_connected_id: None,
            log_settings: LogSettings::default(),
        }
    }
}

impl Settings {
    pub fn scan_duration(&self) -> Duration {
        Duration::from_millis(self.scan_duration_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn stale_signal_threshold(&self) -> Duration {
        Duration::from_millis(self.stale_signal_threshold_ms)
    }

    pub fn liveness_poll_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_poll_interval_ms)
    }
}

fn default_name_prefixes() -> Vec<String> {
    ["Polar", "H10", "H9", "OH1", "Verity Sense"]
        .into_iter()
        .map(str::to_string)
        .collect()
}
fn default_scan_duration_ms() -> u64 {
    10_000
}
fn default_connect_timeout_ms() -> u64 {
    15_000
}
fn default_stale_threshold_ms() -> u64 {
    5_000
}
fn default_poll_interval_ms() -> u64 {
    2_000
}
fn default_assumed_age() -> u8 {
    30
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();

        Ok(Self {
            settings,
            settings_path,
        })
    }

    /// In-memory settings, never touching the filesystem. Used by tests and
    /// by consumers that manage configuration themselves.
    pub fn ephemeral(settings: Settings) -> Self {
        Self {
            settings,
            settings_path: PathBuf::new(),
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("PolarHrMonitor");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &PathBuf) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if self.settings_path.as_os_str().is_empty() {
            return Ok(());
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

    /// Record a successfully connected peripheral so consumers can offer it
    /// for reconnection.
    pub fn remember_device(&mut self, id: &str) -> anyhow::Result<()> {
        if !self.settings.known_device_ids.iter().any(|d| d == id) {
            self.settings.known_device_ids.push(id.to_string());
        }
        self.settings.last_connected_id = Some(id.to_string());
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.assumed_age_years, 30);
        assert_eq!(settings.stale_signal_threshold_ms, 5_000);
        assert!(settings.device_name_prefixes.iter().any(|p| p == "Polar"));
    }

    #[test]
    fn test_remember_device_deduplicates() {
        let mut service = SettingsService::ephemeral(Settings::default());
        service.remember_device("aa:bb").unwrap();
        service.remember_device("aa:bb").unwrap();
        assert_eq!(service.get().known_device_ids, vec!["aa:bb".to_string()]);
        assert_eq!(service.get().last_connected_id.as_deref(), Some("aa:bb"));
    }
}
