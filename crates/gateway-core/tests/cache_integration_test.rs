//! End-to-end response-cache scenario: two GETs with the same cache key
//! within TTL return byte-identical bodies and the upstream handler is
//! invoked exactly once.

mod common;

use actix_web::{test, web, App, HttpRequest, HttpResponse};
use gateway_core::models::protocol::Protocol;
use gateway_core::models::route::{CacheRouteConfig, MiddlewaresConfig, Route};
use gateway_core::models::settings::Settings;
use gateway_core::routes::dispatch::GatewayDispatcher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

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
async fn repeated_get_hits_cache_not_upstream() {
    let calls = Arc::new(AtomicU64::new(0));
    let calls_for_upstream = calls.clone();
    let upstream = common::spawn_upstream(move |_req: HttpRequest| {
        let n = calls_for_upstream.fetch_add(1, Ordering::SeqCst);
        HttpResponse::Ok().body(format!("response #{n}"))
    });

    let mut route = Route {
        path: "/cached".to_string(),
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
    route.middlewares.cache = Some(CacheRouteConfig {
        ttl_seconds: 60,
        max_size: None,
        cache_authenticated: false,
        vary_headers: vec!["Accept".to_string()],
    });

    let dispatcher = Arc::new(GatewayDispatcher::new(&settings_with(vec![route])).unwrap());
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(dispatcher.clone()))
            .default_service(web::route().to(dispatch_handler)),
    )
    .await;

    let req1 = test::TestRequest::get().uri("/cached").to_request();
    let body1 = test::call_and_read_body(&app, req1).await;

    let req2 = test::TestRequest::get().uri("/cached").to_request();
    let body2 = test::call_and_read_body(&app, req2).await;

    assert_eq!(body1, body2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn non_get_requests_bypass_the_cache() {
    let calls = Arc::new(AtomicU64::new(0));
    let calls_for_upstream = calls.clone();
    let upstream = common::spawn_upstream(move |_req: HttpRequest| {
        calls_for_upstream.fetch_add(1, Ordering::SeqCst);
        HttpResponse::Ok().body("ok")
    });

    let mut route = Route {
        path: "/cached".to_string(),
        methods: vec!["GET".to_string(), "POST".to_string()],
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
    route.middlewares.cache = Some(CacheRouteConfig {
        ttl_seconds: 60,
        max_size: None,
        cache_authenticated: false,
        vary_headers: vec![],
    });

    let dispatcher = Arc::new(GatewayDispatcher::new(&settings_with(vec![route])).unwrap());
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(dispatcher.clone()))
            .default_service(web::route().to(dispatch_handler)),
    )
    .await;

    let req1 = test::TestRequest::post().uri("/cached").to_request();
    test::call_service(&app, req1).await;
    let req2 = test::TestRequest::post().uri("/cached").to_request();
    test::call_service(&app, req2).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
