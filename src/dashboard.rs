// Dashboard aggregation.
//
// Each source is fetched on tokio's blocking pool and folded into its neutral
// value on failure, so one dead upstream only empties its own field.

use crate::bixi;
use crate::config::BoardConfig;
use crate::departures;
use crate::direction::{DirectionResolver, OverrideTable};
use crate::models::{
    Aqi, CurrentConditions, DashboardSnapshot, DepartureRecord, SolarTimes, StationStatus, Weather,
};
use crate::schedule_cache::ScheduleCache;
use crate::weather;
use chrono::{DateTime, Utc};
use log::{error, info};
use std::sync::Arc;

/// Services shared by every request. Built once in `main`.
#[derive(Clone)]
pub struct BoardState {
    pub config: Arc<BoardConfig>,
    pub schedule: Arc<ScheduleCache>,
    pub overrides: Arc<OverrideTable>,
}

impl BoardState {
    pub fn new(config: BoardConfig, schedule: ScheduleCache, overrides: OverrideTable) -> Self {
        BoardState {
            config: Arc::new(config),
            schedule: Arc::new(schedule),
            overrides: Arc::new(overrides),
        }
    }

    pub fn departures(&self, now: DateTime<Utc>) -> Vec<DepartureRecord> {
        let resolver = DirectionResolver::new(&self.schedule, &self.overrides);
        departures::departures_or_default(&self.config, &resolver, now)
    }
}

/// Runs a blocking fetch off the reactor. A panicked task yields `fallback()`.
pub async fn run_blocking<T, F, D>(source: &str, task: F, fallback: D) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
    D: FnOnce() -> T,
{
    match tokio::task::spawn_blocking(task).await {
        Ok(value) => value,
        Err(e) => {
            error!("{} task panicked: {}", source, e);
            fallback()
        }
    }
}

pub async fn load_departures(state: &BoardState, now: DateTime<Utc>) -> Vec<DepartureRecord> {
    let state = state.clone();
    run_blocking("Departures", move || state.departures(now), Vec::new).await
}

pub async fn load_stations(state: &BoardState) -> Vec<StationStatus> {
    let config = state.config.clone();
    run_blocking("BIXI", move || bixi::stations_or_default(&config), Vec::new).await
}

pub async fn load_current_conditions(state: &BoardState) -> Option<CurrentConditions> {
    let config = state.config.clone();
    run_blocking("Weather", move || weather::weather_or_none(&config), || None).await
}

pub async fn load_aqi(state: &BoardState) -> Aqi {
    let config = state.config.clone();
    run_blocking("AQI", move || weather::aqi_or_default(&config), Aqi::unknown).await
}

pub async fn load_solar_times(state: &BoardState) -> Option<SolarTimes> {
    let config = state.config.clone();
    run_blocking("Sunrise/sunset", move || weather::solar_times_or_none(&config), || None).await
}

/// Current conditions with the air-quality and solar results nested inside.
/// Without current conditions only the (possibly neutral) AQI is kept.
pub fn merge_weather(
    current: Option<CurrentConditions>,
    aqi: Aqi,
    solar: Option<SolarTimes>,
) -> Weather {
    let solar = current.as_ref().and(solar);
    Weather {
        current,
        aqi,
        solar,
    }
}

/// Weather, AQI and solar times fetched together and merged.
pub async fn load_weather(state: &BoardState) -> Weather {
    let (current, aqi, solar) = tokio::join!(
        load_current_conditions(state),
        load_aqi(state),
        load_solar_times(state)
    );
    merge_weather(current, aqi, solar)
}

pub async fn build_snapshot(state: &BoardState) -> DashboardSnapshot {
    let now = Utc::now();
    let (departures, stations, weather) =
        tokio::join!(load_departures(state, now), load_stations(state), load_weather(state));

    let leave_now = departures::leave_now(
        &departures,
        state.config.walking_time,
        state.config.buffer_time,
    );

    info!(
        "Dashboard built: {} departures, {} stations, weather {}",
        departures.len(),
        stations.len(),
        if weather.current.is_some() { "ok" } else { "unavailable" }
    );

    DashboardSnapshot {
        departures,
        stations,
        weather,
        leave_now,
        alerts: Vec::new(),
        last_updated: now.with_timezone(&state.config.timezone()).to_rfc3339(),
    }
}
