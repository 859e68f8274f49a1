use std::io;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};

use pixel_server::config::Config;
use pixel_server::handlers;
use pixel_server::hub::spawn_hub;
use pixel_server::pipeline::{Pipeline, PipelineSettings};
use pixel_server::AppState;
use pixel_system::MemoryStore;

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config =
        Config::from_env().map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    log::info!("starting with {:?}", config);

    let hub = spawn_hub();
    let pipeline = Pipeline::new(
        Arc::new(MemoryStore::new()),
        hub.clone(),
        PipelineSettings::from(&config),
    );
    let state = web::Data::new(AppState::new(hub, pipeline, &config));

    let cors_origin = config.cors_origin.clone();
    HttpServer::new(move || {
        let cors = match &cors_origin {
            Some(origin) => Cors::default().allowed_origin(origin),
            None => Cors::default().allow_any_origin(),
        }
        .allow_any_method()
        .allow_any_header();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(handlers::root)
    })
    .bind(config.bind_address())?
    .run()
    .await
}
