//! End-to-end circuit-breaker trip/recover and token-bucket rate-limit
//! scenarios, driven through the full dispatcher against a real upstream.

mod common;

use actix_web::{test, web, App, HttpRequest, HttpResponse};
use gateway_core::models::protocol::Protocol;
use gateway_core::models::route::{
    CircuitBreakerRouteConfig, MiddlewaresConfig, RateLimitConfig, Route,
};
use gateway_core::models::settings::Settings;
use gateway_core::routes::dispatch::GatewayDispatcher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn settings_with(routers: Vec<Route>) -> Settings {
    Settings {
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
    }
}

async fn dispatch_handler(
    dispatcher: web::Data<Arc<GatewayDispatcher>>,
    req: HttpRequest,
    payload: web::Payload,
) -> Result<HttpResponse, actix_web::Error> {
    dispatcher.dispatch(req, payload).await
}

#[actix_web::test]
async fn circuit_breaker_trips_then_recovers() {
    let hit_count = Arc::new(AtomicU64::new(0));
    let counter_for_upstream = hit_count.clone();
    let upstream = common::spawn_upstream(move |_req: HttpRequest| {
        counter_for_upstream.fetch_add(1, Ordering::SeqCst);
        HttpResponse::InternalServerError().finish()
    });

    let mut route = Route {
        path: "/svc".to_string(),
        methods: vec!["GET".to_string()],
        protocol: Protocol::Http,
        endpoints_protocol: Protocol::Http,
        upstream: Some(upstream),
        strip_prefix: false,
        timeout_seconds: 5,
        load_balancing: None,
        websocket: None,
        middlewares: MiddlewaresConfig::default(),
        compression: false,
        ip_whitelist: Vec::new(),
        ip_blacklist: Vec::new(),
        error_handling: None,
    };
    route.middlewares.circuit_breaker = Some(CircuitBreakerRouteConfig {
        threshold: 3,
        timeout_seconds: 1,
        max_concurrent: None,
    });

    let dispatcher = Arc::new(GatewayDispatcher::new(&settings_with(vec![route])).unwrap());
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(dispatcher.clone()))
            .default_service(web::route().to(dispatch_handler)),
    )
    .await;

    // Three consecutive upstream 500s trip the breaker (502, since no
    // retry_policy is configured to retry on 500 by default).
    for _ in 0..3 {
        let req = test::TestRequest::get().uri("/svc").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 502);
    }
    assert_eq!(hit_count.load(Ordering::SeqCst), 3);

    // Fourth request is rejected by the open breaker without reaching the
    // upstream at all.
    let req = test::TestRequest::get().uri("/svc").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 503);
    assert!(resp.headers().get("X-Circuit-Breaker").is_some());
    assert_eq!(hit_count.load(Ordering::SeqCst), 3);

    // After the cool-down, the next call probes the upstream again.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let req = test::TestRequest::get().uri("/svc").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 502);
    assert_eq!(hit_count.load(Ordering::SeqCst), 4);
}

#[actix_web::test]
async fn token_bucket_limits_then_refills() {
    let upstream = common::spawn_upstream(|_req: HttpRequest| HttpResponse::Ok().body("ok"));

    let mut route = Route {
        path: "/limited".to_string(),
        methods: vec!["GET".to_string()],
        protocol: Protocol::Http,
        endpoints_protocol: Protocol::Http,
        upstream: Some(upstream),
        strip_prefix: false,
        timeout_seconds: 5,
        load_balancing: None,
        websocket: None,
        middlewares: MiddlewaresConfig::default(),
        compression: false,
        ip_whitelist: Vec::new(),
        ip_blacklist: Vec::new(),
        error_handling: None,
    };
    route.middlewares.rate_limit = Some(RateLimitConfig {
        requests: 2,
        period_seconds: 1,
    });

    let dispatcher = Arc::new(GatewayDispatcher::new(&settings_with(vec![route])).unwrap());
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(dispatcher.clone()))
            .default_service(web::route().to(dispatch_handler)),
    )
    .await;

    for _ in 0..2 {
        let req = test::TestRequest::get()
            .uri("/limited")
            .insert_header(("X-Real-IP", "10.0.0.1"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
    }

    let req = test::TestRequest::get()
        .uri("/limited")
        .insert_header(("X-Real-IP", "10.0.0.1"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 429);
    assert!(resp.headers().get("Retry-After").is_some());

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let req = test::TestRequest::get()
        .uri("/limited")
        .insert_header(("X-Real-IP", "10.0.0.1"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
}

#[actix_web::test]
async fn distinct_client_keys_have_independent_buckets() {
    let upstream = common::spawn_upstream(|_req: HttpRequest| HttpResponse::Ok().body("ok"));

    let mut route = Route {
        path: "/limited".to_string(),
        methods: vec!["GET".to_string()],
        protocol: Protocol::Http,
        endpoints_protocol: Protocol::Http,
        upstream: Some(upstream),
        strip_prefix: false,
        timeout_seconds: 5,
        load_balancing: None,
        websocket: None,
        middlewares: MiddlewaresConfig::default(),
        compression: false,
        ip_whitelist: Vec::new(),
        ip_blacklist: Vec::new(),
        error_handling: None,
    };
    route.middlewares.rate_limit = Some(RateLimitConfig {
        requests: 1,
        period_seconds: 60,
    });

    let dispatcher = Arc::new(GatewayDispatcher::new(&settings_with(vec![route])).unwrap());
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(dispatcher.clone()))
            .default_service(web::route().to(dispatch_handler)),
    )
    .await;

    let req_a = test::TestRequest::get()
        .uri("/limited")
        .insert_header(("X-Real-IP", "10.0.0.1"))
        .to_request();
    assert_eq!(test::call_service(&app, req_a).await.status(), 200);

    let req_b = test::TestRequest::get()
        .uri("/limited")
        .insert_header(("X-Real-IP", "10.0.0.2"))
        .to_request();
    assert_eq!(test::call_service(&app, req_b).await.status(), 200);
}
