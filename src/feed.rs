// GTFS-Realtime trip updates: fetching and decoding.
//
// STM endpoint: https://api.stm.info/pub/od/gtfs-rt/ic/v2/tripUpdates
// (requires an `apikey` header from https://portail.developpeurs.stm.info/apihub)

use crate::config::BoardConfig;
use crate::error::{BoardError, Result};
use crate::http::create_http_client;
use gtfs_rt::FeedMessage;
use log::{debug, info};
use prost::Message;

#[derive(Debug, Clone, PartialEq)]
pub struct TripUpdate {
    pub trip_id: String,
    pub route_id: Option<String>,
    /// 0 outbound, 1 inbound.
    pub direction_id: Option<u32>,
    pub stop_time_updates: Vec<StopTimeUpdate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopTimeUpdate {
    pub stop_id: Option<String>,
    pub arrival: Option<i64>,   // epoch seconds
    pub departure: Option<i64>, // epoch seconds
    /// Present only when the agency published a live prediction.
    pub delay: Option<i32>,
}

impl StopTimeUpdate {
    /// Arrival if known, otherwise departure.
    pub fn event_time(&self) -> Option<i64> {
        self.arrival.or(self.departure)
    }

    pub fn is_live(&self) -> bool {
        self.delay.is_some()
    }
}

/// Decodes a GTFS-Realtime `FeedMessage`, keeping only trip-update entities.
pub fn decode(bytes: &[u8]) -> Result<Vec<TripUpdate>> {
    let feed = FeedMessage::decode(bytes)
        .map_err(|e| BoardError::DecodeError(format!("Failed to decode trip updates feed: {}", e)))?;

    let updates = feed
        .entity
        .into_iter()
        .filter_map(|entity| entity.trip_update)
        .map(|trip_update| {
            let stop_time_updates = trip_update
                .stop_time_update
                .into_iter()
                .map(|stu| {
                    let arrival_delay = stu.arrival.as_ref().and_then(|e| e.delay);
                    let departure_delay = stu.departure.as_ref().and_then(|e| e.delay);

                    StopTimeUpdate {
                        stop_id: stu.stop_id,
                        arrival: stu.arrival.and_then(|e| e.time).filter(|t| *t > 0),
                        departure: stu.departure.and_then(|e| e.time).filter(|t| *t > 0),
                        delay: arrival_delay.or(departure_delay),
                    }
                })
                .collect();

            TripUpdate {
                trip_id: trip_update.trip.trip_id.unwrap_or_default(),
                route_id: trip_update.trip.route_id,
                direction_id: trip_update.trip.direction_id,
                stop_time_updates,
            }
        })
        .collect();

    Ok(updates)
}

/// Downloads and decodes the live trip-updates feed. No retries.
pub fn fetch_trip_updates(config: &BoardConfig) -> Result<Vec<TripUpdate>> {
    let api_key = config.transit_api_key()?;

    let client = create_http_client(config.request_timeout())?;

    let response = client
        .get(&config.transit.feed_url)
        .header("apikey", api_key)
        .header("Accept", "application/x-protobuf")
        .send()
        .map_err(|e| BoardError::UpstreamUnavailable(format!("Failed to fetch trip updates: {}", e)))?;

    if !response.status().is_success() {
        return Err(BoardError::from_status("STM trip updates", response.status()));
    }

    let body = response
        .bytes()
        .map_err(|e| BoardError::UpstreamUnavailable(format!("Failed to read trip updates response: {}", e)))?;
    info!("STM feed received: {} bytes", body.len());

    let updates = decode(&body)?;
    debug!("Decoded {} trip updates", updates.len());
    Ok(updates)
}
