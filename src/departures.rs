// Departure selection: which live stop-time updates make it onto the board.

use crate::config::BoardConfig;
use crate::direction::{self, DirectionResolver, ResolvedDirection};
use crate::error::{BoardError, Result};
use crate::feed::{self, TripUpdate};
use crate::models::{DepartureRecord, LeaveNow};
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use log::{error, info, warn};
use std::collections::HashSet;

/// Inclusion window and result cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionLimits {
    pub window_min_minutes: i64,
    pub window_max_minutes: i64,
    pub max_results: usize,
}

impl Default for SelectionLimits {
    fn default() -> Self {
        SelectionLimits {
            window_min_minutes: 0,
            window_max_minutes: 60,
            max_results: 20,
        }
    }
}

impl SelectionLimits {
    pub fn from_config(config: &BoardConfig) -> Self {
        SelectionLimits {
            window_min_minutes: config.transit.window_min_minutes,
            window_max_minutes: config.transit.window_max_minutes,
            max_results: config.transit.max_departures,
        }
    }

    fn contains(&self, minutes: i64) -> bool {
        (self.window_min_minutes..=self.window_max_minutes).contains(&minutes)
    }
}

/// Whole minutes from `now` to `event_time`, rounded down. `None` when the
/// timestamp is too large to represent in milliseconds.
pub fn minutes_until(event_time: i64, now: DateTime<Utc>) -> Option<i64> {
    let event_millis = event_time.checked_mul(1000)?;
    Some(
        event_millis
            .saturating_sub(now.timestamp_millis())
            .div_euclid(60_000),
    )
}

/// Builds the departure list for `target_stop_ids`.
///
/// `resolve` is called at most once per trip, and only for trips with a
/// departure inside the window.
pub fn select<F>(
    trip_updates: &[TripUpdate],
    target_stop_ids: &HashSet<String>,
    now: DateTime<Utc>,
    tz: Tz,
    limits: SelectionLimits,
    mut resolve: F,
) -> Vec<DepartureRecord>
where
    F: FnMut(&TripUpdate) -> ResolvedDirection,
{
    let mut departures = Vec::new();

    for trip in trip_updates {
        let mut resolved: Option<ResolvedDirection> = None;

        for stu in &trip.stop_time_updates {
            let Some(stop_id) = stu.stop_id.as_deref() else {
                continue;
            };
            if !target_stop_ids.contains(stop_id) {
                continue;
            }
            let Some(event_time) = stu.event_time() else {
                continue;
            };

            let Some(minutes) = minutes_until(event_time, now) else {
                continue;
            };
            if !limits.contains(minutes) {
                continue;
            }

            let resolved = resolved.get_or_insert_with(|| resolve(trip));
            if direction::is_suppressed(trip.route_id.as_deref(), resolved) {
                continue;
            }

            let Some(local) = tz.timestamp_opt(event_time, 0).single() else {
                continue;
            };

            departures.push(DepartureRecord {
                route_number: trip.route_id.clone().unwrap_or_else(|| "N/A".to_string()),
                direction: resolved.direction.clone(),
                terminus: resolved.terminus.clone(),
                direction_id: trip.direction_id,
                stop_code: stop_id.to_string(),
                arrival_minutes: minutes,
                arrival_time: local.format("%H:%M").to_string(),
                scheduled_time: local.to_rfc3339(),
                trip_id: trip.trip_id.clone(),
                is_live: stu.is_live(),
                delay_seconds: stu.delay,
            });
        }
    }

    departures.sort_by_key(|d| d.arrival_minutes);
    departures.truncate(limits.max_results);
    departures
}

/// Fetches the live feed and selects departures for the configured stops.
pub fn fetch_departures(
    config: &BoardConfig,
    resolver: &DirectionResolver<'_>,
    now: DateTime<Utc>,
) -> Result<Vec<DepartureRecord>> {
    let stop_ids: HashSet<String> = config.transit.stop_ids.iter().cloned().collect();
    if stop_ids.is_empty() {
        info!("No transit stop_ids configured, skipping STM fetch");
        return Ok(Vec::new());
    }

    info!("Fetching STM departures for stops: {:?}", config.transit.stop_ids);
    let trip_updates = feed::fetch_trip_updates(config)?;

    let departures = select(
        &trip_updates,
        &stop_ids,
        now,
        config.timezone(),
        SelectionLimits::from_config(config),
        |trip| resolver.resolve_trip(trip),
    );
    info!("Found {} departures", departures.len());
    Ok(departures)
}

/// `fetch_departures`, with every failure logged and turned into an empty list.
pub fn departures_or_default(
    config: &BoardConfig,
    resolver: &DirectionResolver<'_>,
    now: DateTime<Utc>,
) -> Vec<DepartureRecord> {
    match fetch_departures(config, resolver, now) {
        Ok(departures) => departures,
        Err(BoardError::ConfigMissing(key)) => {
            warn!(
                "STM API key not configured ({}). Get one from https://portail.developpeurs.stm.info/apihub",
                key
            );
            Vec::new()
        }
        Err(BoardError::AuthRejected { status }) => {
            error!(
                "STM API rejected the API key (HTTP {}). Check transit.api_key in the config",
                status
            );
            Vec::new()
        }
        Err(e) => {
            error!("Error fetching STM departures: {}", e);
            Vec::new()
        }
    }
}

// ============================================================================
// Leave-now indicator
// ============================================================================

pub fn leave_now(departures: &[DepartureRecord], walking_time: i64, buffer_time: i64) -> LeaveNow {
    let Some(soonest) = departures.iter().map(|d| d.arrival_minutes).min() else {
        return LeaveNow {
            status: "no_departures".to_string(),
            message: "No departures available".to_string(),
            leave_in_minutes: None,
            departure_in_minutes: None,
        };
    };

    let leave_in = soonest - (walking_time + buffer_time);
    if leave_in <= 0 {
        LeaveNow {
            status: "leave_now".to_string(),
            message: "Leave now!".to_string(),
            leave_in_minutes: Some(0),
            departure_in_minutes: Some(soonest),
        }
    } else {
        LeaveNow {
            status: "leave_soon".to_string(),
            message: format!("Leave in {} minutes", leave_in),
            leave_in_minutes: Some(leave_in),
            departure_in_minutes: Some(soonest),
        }
    }
}
