use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable consulted for the OpenWeatherMap key.
/// Takes precedence over the `weather.api_key` config field.
pub const API_KEY_ENV: &str = "OPENWEATHER_API_KEY";

/// Root configuration. Every section has defaults, so the binary runs
/// with no config file at all (auto-discovery + built-in thresholds).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub location: LocationConfig,
    pub poll: PollConfig,
    pub weather: WeatherConfig,
    pub chime: ChimeConfig,
}

/// Where to check the wind.
///
/// Explicit coordinates win over a city name; with neither set the
/// location is auto-discovered from the public IP at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// City name for the weather query (e.g. "London")
    pub city: Option<String>,
    /// Explicit coordinates; both must be set to take effect
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// City used when IP auto-discovery fails
    pub fallback_city: String,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            city: None,
            latitude: None,
            longitude: None,
            fallback_city: "London".to_string(),
        }
    }
}

/// Polling cadence and the decision threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Seconds between checks
    pub interval_secs: u64,
    /// Wind speed (m/s) at or above which the chime rings
    pub threshold_mps: f64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 600,
            threshold_mps: 5.0,
        }
    }
}

/// Weather provider settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    /// OpenWeatherMap API key; the environment variable wins if set
    pub api_key: Option<String>,
}

/// Chime playback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChimeConfig {
    /// Path to the chime sound (mp3 or wav). Missing file falls back to
    /// a synthesized strike.
    pub sound: PathBuf,
    /// Output device name; default device when unset
    pub output_device: Option<String>,
    /// Linear playback gain
    pub gain: f32,
}

impl Default for ChimeConfig {
    fn default() -> Self {
        Self {
            sound: PathBuf::from("furin.mp3"),
            output_device: None,
            gain: 1.0,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the API key: environment first, config second.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.is_empty())
            .or_else(|| self.weather.api_key.clone())
    }

    /// Check cross-field constraints. `parse` runs this; callers that
    /// mutate a config afterwards (CLI overrides) should re-run it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll.interval_secs must be greater than zero".to_string(),
            ));
        }
        if !self.poll.threshold_mps.is_finite() || self.poll.threshold_mps < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "poll.threshold_mps must be a non-negative number, got {}",
                self.poll.threshold_mps
            )));
        }
        if let Some(lat) = self.location.latitude {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(ConfigError::Invalid(format!(
                    "location.latitude out of range: {}",
                    lat
                )));
            }
        }
        if let Some(lon) = self.location.longitude {
            if !(-180.0..=180.0).contains(&lon) {
                return Err(ConfigError::Invalid(format!(
                    "location.longitude out of range: {}",
                    lon
                )));
            }
        }
        if self.location.latitude.is_some() != self.location.longitude.is_some() {
            return Err(ConfigError::Invalid(
                "location.latitude and location.longitude must be set together".to_string(),
            ));
        }
        if !(0.0..=4.0).contains(&self.chime.gain) {
            return Err(ConfigError::Invalid(format!(
                "chime.gain must be within 0.0..=4.0, got {}",
                self.chime.gain
            )));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid config: {0}")]
    Invalid(String),
}
