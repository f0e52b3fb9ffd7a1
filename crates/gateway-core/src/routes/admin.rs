//! Reserved endpoints `GET /docs/swagger/*` and `GET /test-ip` (§6).

use actix_files::Files;
use actix_web::{web, HttpRequest, HttpResponse, Result};
use serde_json::json;

use crate::models::settings::AuthSettings;

/// Diagnostic echo of the client IP, forwarded headers, and which auth
/// method (if any) the request presented.
pub async fn test_ip(req: HttpRequest, auth: web::Data<AuthSettings>) -> Result<HttpResponse> {
    let conn_info = req.connection_info();
    let remote_addr = conn_info.realip_remote_addr().map(|s| s.to_string());
    let peer_addr = conn_info.peer_addr().map(|s| s.to_string());

    let forwarded_for = req
        .headers()
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let real_ip = req
        .headers()
        .get("X-Real-IP")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let has_api_key = req.headers().contains_key(auth.api_key_header.as_str());
    let has_jwt = req.headers().contains_key(auth.jwt_header.as_str());
    let detected_auth_method = if has_api_key {
        "api_key"
    } else if has_jwt {
        "jwt"
    } else {
        "none"
    };

    Ok(HttpResponse::Ok().json(json!({
        "remote_addr": remote_addr,
        "peer_addr": peer_addr,
        "x_forwarded_for": forwarded_for,
        "x_real_ip": real_ip,
        "detected_auth_method": detected_auth_method,
    })))
}

/// Registers `/test-ip` and a static file server rooted at `docs_dir` under
/// `/docs/swagger`.
pub fn configure_admin(cfg: &mut web::ServiceConfig, docs_dir: &str) {
    cfg.route("/test-ip", web::get().to(test_ip)).service(
        Files::new("/docs/swagger", docs_dir)
            .index_file("index.html")
            .use_last_modified(true),
    );
}
