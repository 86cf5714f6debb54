// Response models served by the board.
//
// Every value here is built fresh per request and serialised straight into
// the JSON responses; nothing is persisted.

use serde::{Deserialize, Serialize};

// ============================================================================
// Transit
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DepartureRecord {
    pub route_number: String,
    /// Human-facing direction; `None` when nothing could be resolved.
    pub direction: Option<String>,
    /// Raw direction flag from the feed (0 outbound, 1 inbound).
    pub direction_id: Option<u32>,
    /// Name of the trip's last stop, from the static schedule.
    pub terminus: Option<String>,
    pub stop_code: String,
    pub arrival_minutes: i64,
    /// `HH:MM` in the board's timezone.
    pub arrival_time: String,
    /// RFC 3339 in the board's timezone.
    pub scheduled_time: String,
    pub trip_id: String,
    pub is_live: bool,
    pub delay_seconds: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaveNow {
    pub status: String,
    pub message: String,
    pub leave_in_minutes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub departure_in_minutes: Option<i64>,
}

// ============================================================================
// Bike-share
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StationStatus {
    pub station_id: String,
    pub name: String,
    pub bikes_available: u32,
    pub docks_available: u32,
    pub is_renting: bool,
    pub is_returning: bool,
}

// ============================================================================
// Weather, air quality, solar times
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeatherUnits {
    pub temperature: String,
    pub wind_speed: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CurrentConditions {
    pub temperature: f64,
    pub feels_like: f64,
    pub condition: String,
    pub weather_code: i64,
    pub wind_speed: f64,
    pub wind_direction: f64,
    pub precipitation_probability: f64,
    pub humidity: f64,
    pub units: WeatherUnits,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Aqi {
    pub value: i64,
    pub category: String,
    pub severity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pm2_5: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pm10: Option<f64>,
}

impl Aqi {
    /// Placeholder served when the air-quality source is down.
    pub fn unknown() -> Self {
        Aqi {
            value: 0,
            category: "Unknown".to_string(),
            severity: "info".to_string(),
            pm2_5: None,
            pm10: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SolarTimes {
    pub sunrise: String,
    pub sunset: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sunrise_iso: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sunset_iso: Option<String>,
}

impl SolarTimes {
    pub fn unavailable() -> Self {
        SolarTimes {
            sunrise: "N/A".to_string(),
            sunset: "N/A".to_string(),
            sunrise_iso: None,
            sunset_iso: None,
        }
    }
}

/// Weather as served to clients: current conditions (when the provider
/// answered) with the air-quality and solar results merged in.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Weather {
    #[serde(flatten)]
    pub current: Option<CurrentConditions>,
    pub aqi: Aqi,
    #[serde(flatten)]
    pub solar: Option<SolarTimes>,
}

impl Weather {
    pub fn empty() -> Self {
        Weather {
            current: None,
            aqi: Aqi::unknown(),
            solar: None,
        }
    }
}

// ============================================================================
// Dashboard
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub departures: Vec<DepartureRecord>,
    pub stations: Vec<StationStatus>,
    pub weather: Weather,
    pub leave_now: LeaveNow,
    /// No alert provider is wired, so this is always empty.
    pub alerts: Vec<serde_json::Value>,
    pub last_updated: String,
}
