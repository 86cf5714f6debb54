// Process configuration.
//
// Loaded once at startup from a JSON file (every field defaulted) and then
// patched from the environment, which may itself come from a `.env` file.

use crate::error::{BoardError, Result};
use chrono_tz::Tz;
use log::{info, warn};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config.json";

const STM_GTFS_REALTIME_URL: &str = "https://api.stm.info/pub/od/gtfs-rt/ic/v2/tripUpdates";
const STM_GTFS_STATIC_URL: &str = "https://www.stm.info/sites/default/files/gtfs/gtfs_stm.zip";
const BIXI_STATUS_URL: &str = "https://gbfs.velobixi.com/gbfs/en/station_status.json";
const BIXI_INFO_URL: &str = "https://gbfs.velobixi.com/gbfs/en/station_information.json";
const OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1/forecast";
const OPEN_METEO_AIR_QUALITY_URL: &str = "https://air-quality-api.open-meteo.com/v1/air-quality";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub transit: TransitConfig,
    pub bixi: BixiConfig,
    pub location: LocationConfig,
    pub weather: WeatherConfig,
    pub cache: CacheConfig,
    pub server: ServerConfig,
    /// Minutes needed to walk to the stop.
    pub walking_time: i64,
    /// Extra minutes of slack before a departure.
    pub buffer_time: i64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransitConfig {
    pub api_key: String,
    pub stop_ids: Vec<String>,
    pub feed_url: String,
    pub static_gtfs_url: String,
    pub window_min_minutes: i64,
    pub window_max_minutes: i64,
    pub max_departures: usize,
    /// Replaces the built-in override table when present.
    pub overrides: Option<Vec<OverrideEntry>>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OverrideEntry {
    pub route: String,
    pub direction: String,
    pub terminus: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BixiConfig {
    pub station_ids: Vec<String>,
    pub status_url: String,
    pub info_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub lat: f64,
    pub lon: f64,
    pub timezone: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub forecast_url: String,
    pub air_quality_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Defaults to the platform cache directory.
    pub directory: Option<PathBuf>,
    pub ttl_days: u64,
    pub retry_after_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for BoardConfig {
    fn default() -> Self {
        BoardConfig {
            transit: TransitConfig::default(),
            bixi: BixiConfig::default(),
            location: LocationConfig::default(),
            weather: WeatherConfig::default(),
            cache: CacheConfig::default(),
            server: ServerConfig::default(),
            walking_time: 5,
            buffer_time: 2,
            request_timeout_secs: 10,
        }
    }
}

impl Default for TransitConfig {
    fn default() -> Self {
        TransitConfig {
            api_key: String::new(),
            stop_ids: Vec::new(),
            feed_url: STM_GTFS_REALTIME_URL.to_string(),
            static_gtfs_url: STM_GTFS_STATIC_URL.to_string(),
            window_min_minutes: 0,
            window_max_minutes: 60,
            max_departures: 20,
            overrides: None,
        }
    }
}

impl Default for BixiConfig {
    fn default() -> Self {
        BixiConfig {
            station_ids: Vec::new(),
            status_url: BIXI_STATUS_URL.to_string(),
            info_url: BIXI_INFO_URL.to_string(),
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        // Montreal
        LocationConfig {
            lat: 45.5017,
            lon: -73.5673,
            timezone: "America/Montreal".to_string(),
        }
    }
}

impl Default for WeatherConfig {
    fn default() -> Self {
        WeatherConfig {
            forecast_url: OPEN_METEO_URL.to_string(),
            air_quality_url: OPEN_METEO_AIR_QUALITY_URL.to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            directory: None,
            ttl_days: 7,
            retry_after_secs: 300,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 5001,
        }
    }
}

impl BoardConfig {
    /// Reads `.env`, the config file named by `BOARD_CONFIG` (or
    /// `config.json`), then applies environment overrides.
    pub fn load() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            info!("No .env file loaded ({})", e);
        }

        let path = std::env::var("BOARD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = Self::from_file(&path).unwrap_or_else(|e| {
            warn!("{}, using defaults", e);
            BoardConfig::default()
        });
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            BoardError::FileError(format!("Config file {:?} not readable: {}", path, e))
        })?;
        let config = Self::from_json(&contents)?;
        info!("Configuration loaded from {:?}", path);
        Ok(config)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents)
            .map_err(|e| BoardError::FileError(format!("Invalid config: {}", e)))
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("STM_API_KEY").filter(|k| !k.is_empty()) {
            self.transit.api_key = key;
        }
        if let Some(port) = lookup("PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(lat) = lookup("BOARD_LAT").and_then(|v| v.parse().ok()) {
            self.location.lat = lat;
        }
        if let Some(lon) = lookup("BOARD_LON").and_then(|v| v.parse().ok()) {
            self.location.lon = lon;
        }
    }

    pub fn transit_api_key(&self) -> Result<&str> {
        let key = self.transit.api_key.trim();
        if key.is_empty() {
            return Err(BoardError::ConfigMissing("transit.api_key".to_string()));
        }
        Ok(key)
    }

    pub fn timezone(&self) -> Tz {
        self.location.timezone.parse::<Tz>().unwrap_or_else(|e| {
            warn!(
                "Invalid timezone {:?} ({}), using America/Montreal",
                self.location.timezone, e
            );
            chrono_tz::America::Montreal
        })
    }

    pub fn cache_directory(&self) -> PathBuf {
        self.cache.directory.clone().unwrap_or_else(|| {
            let mut path = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
            path.push("departure_board");
            path
        })
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}
