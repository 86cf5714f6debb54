// Weather, air quality and sunrise/sunset from Open-Meteo.
// - Forecast: https://api.open-meteo.com/v1/forecast
// - Air quality: https://air-quality-api.open-meteo.com/v1/air-quality

use crate::config::BoardConfig;
use crate::error::{BoardError, Result};
use crate::http::{create_http_client, get_json};
use crate::models::{Aqi, CurrentConditions, SolarTimes, WeatherUnits};
use chrono::{DateTime, NaiveDateTime};
use log::{error, info};
use serde::Deserialize;

const CURRENT_FIELDS: &str = "temperature_2m,relative_humidity_2m,apparent_temperature,weather_code,wind_speed_10m,wind_direction_10m,precipitation_probability";

/// WMO weather interpretation codes as published by Open-Meteo.
pub fn condition_for_code(code: i64) -> &'static str {
    match code {
        0 => "Clear",
        1 => "Mainly Clear",
        2 => "Partly Cloudy",
        3 => "Overcast",
        45 => "Foggy",
        48 => "Depositing Rime Fog",
        51 => "Light Drizzle",
        53 => "Moderate Drizzle",
        55 => "Dense Drizzle",
        56 => "Light Freezing Drizzle",
        57 => "Dense Freezing Drizzle",
        61 => "Slight Rain",
        63 => "Moderate Rain",
        65 => "Heavy Rain",
        66 => "Light Freezing Rain",
        67 => "Heavy Freezing Rain",
        71 => "Slight Snow",
        73 => "Moderate Snow",
        75 => "Heavy Snow",
        77 => "Snow Grains",
        80 => "Slight Rain Showers",
        81 => "Moderate Rain Showers",
        82 => "Violent Rain Showers",
        85 => "Slight Snow Showers",
        86 => "Heavy Snow Showers",
        95 => "Thunderstorm",
        96 => "Thunderstorm with Hail",
        99 => "Thunderstorm with Heavy Hail",
        _ => "Unknown",
    }
}

/// (category, severity) for an AQI reading.
pub fn categorize_aqi(value: f64) -> (&'static str, &'static str) {
    if value <= 50.0 {
        ("Good", "info")
    } else if value <= 100.0 {
        ("Moderate", "info")
    } else if value <= 150.0 {
        ("Unhealthy for Sensitive Groups", "warning")
    } else if value <= 200.0 {
        ("Unhealthy", "warning")
    } else if value <= 300.0 {
        ("Very Unhealthy", "critical")
    } else {
        ("Hazardous", "critical")
    }
}

// ============================================================================
// Response shapes
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    current: ForecastCurrent,
    #[serde(default)]
    current_units: ForecastUnits,
}

#[derive(Debug, Default, Deserialize)]
struct ForecastCurrent {
    temperature_2m: Option<f64>,
    relative_humidity_2m: Option<f64>,
    apparent_temperature: Option<f64>,
    weather_code: Option<i64>,
    wind_speed_10m: Option<f64>,
    wind_direction_10m: Option<f64>,
    precipitation_probability: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct ForecastUnits {
    temperature_2m: Option<String>,
    wind_speed_10m: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AirQualityResponse {
    #[serde(default)]
    current: AirQualityCurrent,
}

#[derive(Debug, Default, Deserialize)]
struct AirQualityCurrent {
    european_aqi: Option<f64>,
    pm2_5: Option<f64>,
    pm10: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct DailyResponse {
    #[serde(default)]
    daily: Daily,
}

#[derive(Debug, Default, Deserialize)]
struct Daily {
    #[serde(default)]
    sunrise: Vec<String>,
    #[serde(default)]
    sunset: Vec<String>,
}

impl From<ForecastResponse> for CurrentConditions {
    fn from(response: ForecastResponse) -> Self {
        let current = response.current;
        let weather_code = current.weather_code.unwrap_or(0);
        CurrentConditions {
            temperature: current.temperature_2m.unwrap_or(0.0),
            feels_like: current.apparent_temperature.unwrap_or(0.0),
            condition: condition_for_code(weather_code).to_string(),
            weather_code,
            wind_speed: current.wind_speed_10m.unwrap_or(0.0),
            wind_direction: current.wind_direction_10m.unwrap_or(0.0),
            precipitation_probability: current.precipitation_probability.unwrap_or(0.0),
            humidity: current.relative_humidity_2m.unwrap_or(0.0),
            units: WeatherUnits {
                temperature: response
                    .current_units
                    .temperature_2m
                    .unwrap_or_else(|| "°C".to_string()),
                wind_speed: response
                    .current_units
                    .wind_speed_10m
                    .unwrap_or_else(|| "km/h".to_string()),
            },
        }
    }
}

impl From<AirQualityResponse> for Aqi {
    fn from(response: AirQualityResponse) -> Self {
        let value = response.current.european_aqi.unwrap_or(0.0);
        let (category, severity) = categorize_aqi(value);
        Aqi {
            value: value as i64,
            category: category.to_string(),
            severity: severity.to_string(),
            pm2_5: Some(response.current.pm2_5.unwrap_or(0.0)),
            pm10: Some(response.current.pm10.unwrap_or(0.0)),
        }
    }
}

/// `HH:MM` from an Open-Meteo timestamp (local, minute precision) or RFC 3339.
fn clock_time(iso: &str) -> Option<String> {
    if let Ok(local) = NaiveDateTime::parse_from_str(iso, "%Y-%m-%dT%H:%M") {
        return Some(local.format("%H:%M").to_string());
    }
    DateTime::parse_from_rfc3339(iso)
        .ok()
        .map(|dt| dt.format("%H:%M").to_string())
}

impl TryFrom<DailyResponse> for SolarTimes {
    type Error = BoardError;

    fn try_from(response: DailyResponse) -> Result<Self> {
        let (Some(sunrise_iso), Some(sunset_iso)) =
            (response.daily.sunrise.first(), response.daily.sunset.first())
        else {
            return Err(BoardError::DecodeError("No sunrise/sunset in response".to_string()));
        };

        let sunrise = clock_time(sunrise_iso)
            .ok_or_else(|| BoardError::DecodeError(format!("Bad sunrise time: {}", sunrise_iso)))?;
        let sunset = clock_time(sunset_iso)
            .ok_or_else(|| BoardError::DecodeError(format!("Bad sunset time: {}", sunset_iso)))?;

        Ok(SolarTimes {
            sunrise,
            sunset,
            sunrise_iso: Some(sunrise_iso.clone()),
            sunset_iso: Some(sunset_iso.clone()),
        })
    }
}

// ============================================================================
// Fetching
// ============================================================================

fn location_query(config: &BoardConfig) -> Vec<(&'static str, String)> {
    vec![
        ("latitude", config.location.lat.to_string()),
        ("longitude", config.location.lon.to_string()),
        ("timezone", config.location.timezone.clone()),
    ]
}

pub fn fetch_weather(config: &BoardConfig) -> Result<CurrentConditions> {
    info!(
        "Fetching weather for location: {}, {}",
        config.location.lat, config.location.lon
    );
    let client = create_http_client(config.request_timeout())?;

    let mut query = location_query(config);
    query.push(("current", CURRENT_FIELDS.to_string()));
    query.push(("forecast_days", "1".to_string()));

    let response: ForecastResponse =
        get_json(&client, "Open-Meteo forecast", &config.weather.forecast_url, &query)?;
    let weather = CurrentConditions::from(response);

    info!("Weather fetched: {}{}, {}", weather.temperature, weather.units.temperature, weather.condition);
    Ok(weather)
}

pub fn fetch_aqi(config: &BoardConfig) -> Result<Aqi> {
    info!(
        "Fetching AQI for location: {}, {}",
        config.location.lat, config.location.lon
    );
    let client = create_http_client(config.request_timeout())?;

    let mut query = location_query(config);
    query.push(("current", "european_aqi,pm2_5,pm10".to_string()));

    let response: AirQualityResponse = get_json(
        &client,
        "Open-Meteo air quality",
        &config.weather.air_quality_url,
        &query,
    )?;
    let aqi = Aqi::from(response);

    info!("AQI fetched: {} ({})", aqi.value, aqi.category);
    Ok(aqi)
}

pub fn fetch_solar_times(config: &BoardConfig) -> Result<SolarTimes> {
    let client = create_http_client(config.request_timeout())?;

    let mut query = location_query(config);
    query.push(("daily", "sunrise,sunset".to_string()));
    query.push(("forecast_days", "1".to_string()));

    let response: DailyResponse =
        get_json(&client, "Open-Meteo daily", &config.weather.forecast_url, &query)?;
    let times = SolarTimes::try_from(response)?;

    info!("Sunrise: {}, Sunset: {}", times.sunrise, times.sunset);
    Ok(times)
}

pub fn weather_or_none(config: &BoardConfig) -> Option<CurrentConditions> {
    fetch_weather(config)
        .map_err(|e| error!("Error fetching weather: {}", e))
        .ok()
}

pub fn aqi_or_default(config: &BoardConfig) -> Aqi {
    fetch_aqi(config).unwrap_or_else(|e| {
        error!("Error fetching AQI: {}", e);
        Aqi::unknown()
    })
}

pub fn solar_times_or_none(config: &BoardConfig) -> Option<SolarTimes> {
    fetch_solar_times(config)
        .map_err(|e| error!("Error fetching sunrise/sunset: {}", e))
        .ok()
}
