// Departure board API server
// STM departures, BIXI availability and Open-Meteo weather for one location

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpResponse, HttpServer};
use chrono::Utc;
use log::{error, info};

mod bixi;
mod config;
mod dashboard;
mod departures;
mod direction;
mod error;
mod feed;
mod http;
mod models;
mod schedule_cache;
mod weather;

use config::BoardConfig;
use dashboard::BoardState;
use direction::OverrideTable;
use models::SolarTimes;
use schedule_cache::ScheduleCache;

const SERVICE_NAME: &str = "Montreal Departure Board";

// ============================================================================
// Data Routes
// ============================================================================

async fn get_transit(state: web::Data<BoardState>) -> HttpResponse {
    let departures = dashboard::load_departures(&state, Utc::now()).await;
    HttpResponse::Ok().json(serde_json::json!({ "departures": departures }))
}

async fn get_bixi(state: web::Data<BoardState>) -> HttpResponse {
    let stations = dashboard::load_stations(&state).await;
    HttpResponse::Ok().json(serde_json::json!({ "stations": stations }))
}

async fn get_weather(state: web::Data<BoardState>) -> HttpResponse {
    HttpResponse::Ok().json(dashboard::load_weather(&state).await)
}

async fn get_aqi(state: web::Data<BoardState>) -> HttpResponse {
    HttpResponse::Ok().json(dashboard::load_aqi(&state).await)
}

async fn get_sunrise_sunset(state: web::Data<BoardState>) -> HttpResponse {
    let times = dashboard::load_solar_times(&state)
        .await
        .unwrap_or_else(SolarTimes::unavailable);
    HttpResponse::Ok().json(times)
}

async fn get_leave_now(state: web::Data<BoardState>) -> HttpResponse {
    let upcoming = dashboard::load_departures(&state, Utc::now()).await;
    HttpResponse::Ok().json(departures::leave_now(
        &upcoming,
        state.config.walking_time,
        state.config.buffer_time,
    ))
}

async fn get_alerts() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "alerts": [] }))
}

async fn get_dashboard(state: web::Data<BoardState>) -> HttpResponse {
    HttpResponse::Ok().json(dashboard::build_snapshot(&state).await)
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339()
    }))
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/transit", web::get().to(get_transit))
        .route("/bixi", web::get().to(get_bixi))
        .route("/weather", web::get().to(get_weather))
        .route("/aqi", web::get().to(get_aqi))
        .route("/sunrise-sunset", web::get().to(get_sunrise_sunset))
        .route("/leave-now", web::get().to(get_leave_now))
        .route("/alerts", web::get().to(get_alerts))
        .route("/dashboard", web::get().to(get_dashboard));
}

// ============================================================================
// Server Setup
// ============================================================================

async fn run_server(state: BoardState) -> std::io::Result<()> {
    let host = state.config.server.host.clone();
    let port = state.config.server.port;

    info!("{} v{}", SERVICE_NAME, env!("CARGO_PKG_VERSION"));
    info!("Server running on: http://{}:{}", host, port);
    info!("Stops: {:?}", state.config.transit.stop_ids);
    info!("BIXI stations: {:?}", state.config.bixi.station_ids);
    info!(
        "Location: {}, {} ({})",
        state.config.location.lat, state.config.location.lon, state.config.location.timezone
    );
    info!(
        "Routes: /transit /bixi /weather /aqi /sunrise-sunset /leave-now /alerts /dashboard /health"
    );

    let data = web::Data::new(state);

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .app_data(data.clone())
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .configure(routes)
    })
    .bind((host.as_str(), port))?
    .run()
    .await
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = BoardConfig::load();
    if config.transit_api_key().is_err() {
        error!("STM API key not configured: set transit.api_key or STM_API_KEY. Departures will be empty");
    }

    info!("Initializing schedule cache...");
    let schedule = ScheduleCache::from_config(&config);
    schedule.initialize();

    let overrides = OverrideTable::from_config(&config);
    info!("Direction overrides loaded: {} entries", overrides.len());

    let state = BoardState::new(config, schedule, overrides);
    actix_web::rt::System::new().block_on(run_server(state))
}
