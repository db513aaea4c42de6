//! Furin rings a wind chime when it is windy outside.
//!
//! The crate resolves a location (auto-discovered from the public IP, or
//! pinned in the config), polls current wind speed on a fixed interval and
//! plays a chime sound whenever the reading crosses the configured
//! threshold. Everything is driven by a single tokio loop; there is no
//! state beyond the last reading.

pub mod chime;
pub mod config;
pub mod location;
pub mod monitor;
pub mod shutdown;
pub mod weather;

pub use chime::{ChimeError, ChimeNotifier, LogNotifier, Notifier};
pub use config::{ChimeConfig, Config, ConfigError, LocationConfig, PollConfig};
pub use location::{resolve_location, LocationError, Place, ResolvedLocation};
pub use monitor::{WeatherSource, WindMonitor};
pub use weather::{ApiError, CurrentConditions, WeatherClient};
