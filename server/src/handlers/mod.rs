use crate::connection::ws_index;
use crate::handlers::health::configure_health_handlers;
use actix_web::web;

mod health;

pub fn root(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/ws").route(web::get().to(ws_index)));

    configure_health_handlers(cfg);
}
