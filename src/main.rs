// ABOUTME: Entry point for the Mongo Warden service
// ABOUTME: Starts the REST server and the background sync-schedule driver

use actix_web::{web, App, HttpServer};
use env_logger::Env;
use log::info;

use mongo_warden::config::AppConfig;
use mongo_warden::{api, ops, AppState};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("could not load config, using defaults: {}", e);
        AppConfig::default()
    });
    let host = config.host.clone();
    let port = config.port;

    let state = web::Data::new(
        AppState::new(config.clone()).expect("failed to initialize application state"),
    );

    // Thin driver for the persisted sync schedule
    let driver = ops::sync::spawn_schedule_driver(
        state.registry.clone(),
        config,
        state.cancel.clone(),
    );

    info!("mongo-warden listening on http://{}:{}", host, port);

    let server = HttpServer::new({
        let state = state.clone();
        move || {
            App::new()
                .app_data(web::JsonConfig::default().limit(10 * 1024 * 1024)) // 10 MB
                .app_data(state.clone())
                .service(api::configure_routes())
        }
    })
    .bind((host.as_str(), port))?
    .run()
    .await;

    state.cancel.cancel();
    driver.abort();
    server
}
