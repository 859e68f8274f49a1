use crate::AppState;
use actix_web::{web, HttpResponse, Responder};
use serde_json::json;

const SERVICE_NAME: &str = "pixel-canvas";

pub fn configure_health_handlers(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(get)));
}

async fn get(state: web::Data<AppState>) -> impl Responder {
    match state.hub.online_count().await {
        Ok(online) => HttpResponse::Ok().json(json!({
            "status": "ok",
            "service": SERVICE_NAME,
            "online": online,
        })),
        Err(err) => {
            log::error!("Health check failed: {}", err);
            HttpResponse::ServiceUnavailable().json(json!({
                "status": "unavailable",
                "service": SERVICE_NAME,
            }))
        }
    }
}
