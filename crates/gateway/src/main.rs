//! Gateway server entry point.
//!
//! Loads and validates the configuration document, builds the request
//! dispatcher (§4.2), and serves the reserved endpoints (§6) alongside it.

use actix_cors::Cors;
use actix_web::{
    http,
    middleware::{Compress, Condition, Logger},
    web, App, HttpServer,
};
use gateway_core::config::settings::load_settings;
use gateway_core::config::validation::ConfigValidator;
use gateway_core::logs::logger::configure_logger;
use gateway_core::models::settings::Settings;
use gateway_core::routes::{admin, dispatch::GatewayDispatcher, health, metrics};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

fn build_cors(settings: &Settings) -> Cors {
    let cors_settings = &settings.cors;
    if !cors_settings.enabled {
        return Cors::default();
    }

    let mut cors = Cors::default();
    if cors_settings.allowed_origins.iter().any(|o| o == "*") {
        cors = cors.allow_any_origin();
    } else {
        for origin in &cors_settings.allowed_origins {
            cors = cors.allowed_origin(origin);
        }
    }
    for method in &cors_settings.allowed_methods {
        if let Ok(method) = http::Method::from_bytes(method.as_bytes()) {
            cors = cors.allowed_methods(vec![method]);
        }
    }
    for header in &cors_settings.expose_headers {
        cors = cors.expose_headers(vec![header.clone()]);
    }
    if cors_settings.allow_credentials {
        cors = cors.supports_credentials();
    }
    cors
}

async fn dispatch_handler(
    dispatcher: web::Data<Arc<GatewayDispatcher>>,
    req: actix_web::HttpRequest,
    payload: web::Payload,
) -> Result<actix_web::HttpResponse, actix_web::Error> {
    dispatcher.dispatch(req, payload).await
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    configure_logger();

    let settings: Settings = match load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            error!("failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "starting gateway v{} ({} route(s) configured)",
        settings.version,
        settings.routers.len()
    );

    let validation = ConfigValidator::validate_comprehensive(&settings);
    for warning in &validation.warnings {
        warn!("{}", warning);
    }
    for recommendation in &validation.recommendations {
        info!("recommendation: {}", recommendation);
    }
    if !validation.is_valid {
        for err in &validation.errors {
            error!("configuration error: {}", err);
        }
        std::process::exit(1);
    }

    let dispatcher = match GatewayDispatcher::new(&settings) {
        Ok(dispatcher) => Arc::new(dispatcher),
        Err(e) => {
            error!("failed to build route table: {:?}", e);
            std::process::exit(1);
        }
    };

    let docs_dir = std::env::var("DOCS_DIR").unwrap_or_else(|_| "./docs".to_string());
    let metrics_enabled = settings.metrics.enabled;
    let bind_address = settings.server.address.clone();
    let shutdown_deadline = settings.server.shutdown_deadline_seconds;
    let read_timeout = settings.server.read_timeout_seconds;
    let idle_timeout = settings.server.idle_timeout_seconds;
    let compression = settings.server.compression;

    let settings_for_app = settings.clone();

    let server = HttpServer::new(move || {
        let cors = build_cors(&settings_for_app);
        let docs_dir = docs_dir.clone();

        let app = App::new()
            .app_data(web::Data::new(dispatcher.clone()))
            .app_data(web::Data::new(dispatcher.metrics.clone()))
            .app_data(web::Data::new(settings_for_app.auth.clone()))
            .wrap(Logger::new(r#"%a "%r" %s %b "%{Referer}i" "%{User-Agent}i" %T"#))
            .wrap(cors)
            .wrap(Condition::new(compression, Compress::default()));

        let mut app = app.configure(health::configure_health);
        if metrics_enabled {
            app = app.configure(metrics::configure_metrics);
        }
        app.configure(move |cfg| admin::configure_admin(cfg, &docs_dir))
            .default_service(web::route().to(dispatch_handler))
    })
    .client_request_timeout(Duration::from_secs(read_timeout))
    .client_disconnect_timeout(Duration::from_secs(idle_timeout))
    .shutdown_timeout(shutdown_deadline)
    .bind(&bind_address)?
    .run();

    info!("listening on {}", bind_address);

    tokio::select! {
        result = server => {
            match result {
                Ok(_) => info!("server stopped"),
                Err(e) => error!("server error: {}", e),
            }
        }
        _ = signal::ctrl_c() => {
            info!("shutdown signal received, draining in-flight requests (deadline {}s)", shutdown_deadline);
        }
    }

    Ok(())
}
