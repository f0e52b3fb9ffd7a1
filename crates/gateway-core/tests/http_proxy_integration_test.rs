//! End-to-end HTTP proxy scenarios against a real upstream server, covering
//! the strip-prefix and custom error template cases from the concrete test
//! scenarios for the request-processing fabric.

mod common;

use actix_web::{test, web, App, HttpRequest, HttpResponse};
use gateway_core::models::route::{ErrorHandlingConfig, MiddlewaresConfig, Route};
use gateway_core::models::protocol::Protocol;
use gateway_core::models::settings::Settings;
use gateway_core::routes::dispatch::GatewayDispatcher;
use std::collections::HashMap;
use std::sync::Arc;

fn base_route(path: &str, upstream: &str, strip_prefix: bool) -> Route {
    Route {
        path: path.to_string(),
        methods: vec!["GET".to_string()],
        protocol: Protocol::Http,
        endpoints_protocol: Protocol::Http,
        upstream: Some(upstream.to_string()),
        strip_prefix,
        timeout_seconds: 5,
        load_balancing: None,
        websocket: None,
        middlewares: MiddlewaresConfig::default(),
        compression: false,
        ip_whitelist: Vec::new(),
        ip_blacklist: Vec::new(),
        error_handling: None,
    }
}

fn settings_with(routers: Vec<Route>) -> Settings {
    let mut settings = Settings {
        version: 1,
        env: None,
        service: None,
        server: Default::default(),
        auth: Default::default(),
        cache: Default::default(),
        cors: Default::default(),
        security: Default::default(),
        metrics: Default::default(),
        tracing: Default::default(),
        grpc: Default::default(),
        routers,
    };
    settings.auth.jwt_secret = "please-change-this-secret".to_string();
    settings
}

async fn dispatch_handler(
    dispatcher: web::Data<Arc<GatewayDispatcher>>,
    req: HttpRequest,
    payload: web::Payload,
) -> Result<HttpResponse, actix_web::Error> {
    dispatcher.dispatch(req, payload).await
}

#[actix_web::test]
async fn strip_prefix_rewrites_path_seen_by_upstream() {
    let upstream = common::spawn_upstream(|req: HttpRequest| {
        HttpResponse::Ok().body(req.path().to_string())
    });

    let route = base_route("/api/*", &upstream, true);
    let dispatcher = Arc::new(GatewayDispatcher::new(&settings_with(vec![route])).unwrap());

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(dispatcher.clone()))
            .default_service(web::route().to(dispatch_handler)),
    )
    .await;

    let req = test::TestRequest::get().uri("/api/test").to_request();
    let body = test::call_and_read_body(&app, req).await;
    assert_eq!(body, web::Bytes::from_static(b"/test"));
}

#[actix_web::test]
async fn without_strip_prefix_upstream_sees_full_path() {
    let upstream = common::spawn_upstream(|req: HttpRequest| {
        HttpResponse::Ok().body(req.path().to_string())
    });

    let route = base_route("/api/*", &upstream, false);
    let dispatcher = Arc::new(GatewayDispatcher::new(&settings_with(vec![route])).unwrap());

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(dispatcher.clone()))
            .default_service(web::route().to(dispatch_handler)),
    )
    .await;

    let req = test::TestRequest::get().uri("/api/test").to_request();
    let body = test::call_and_read_body(&app, req).await;
    assert_eq!(body, web::Bytes::from_static(b"/api/test"));
}

#[actix_web::test]
async fn custom_error_template_replaces_5xx_body() {
    let upstream =
        common::spawn_upstream(|_req: HttpRequest| HttpResponse::InternalServerError().body("X"));

    let mut route = base_route("/api", &upstream, false);
    route.path = "/api".to_string();
    let mut status_messages = HashMap::new();
    status_messages.insert(500u16, "Custom error".to_string());
    route.error_handling = Some(ErrorHandlingConfig {
        default_message: Some("Custom error".to_string()),
        status_messages,
    });

    let dispatcher = Arc::new(GatewayDispatcher::new(&settings_with(vec![route])).unwrap());
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(dispatcher.clone()))
            .default_service(web::route().to(dispatch_handler)),
    )
    .await;

    let req = test::TestRequest::get().uri("/api").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 500);
    assert_eq!(
        resp.headers().get("Content-Length").unwrap(),
        "13"
    );
    let body = test::read_body(resp).await;
    assert_eq!(body, web::Bytes::from_static(b"Custom error"));
}

#[actix_web::test]
async fn unmatched_path_returns_404() {
    let route = base_route("/api", "http://127.0.0.1:1", false);
    let dispatcher = Arc::new(GatewayDispatcher::new(&settings_with(vec![route])).unwrap());
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(dispatcher.clone()))
            .default_service(web::route().to(dispatch_handler)),
    )
    .await;

    let req = test::TestRequest::get().uri("/nope").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}
