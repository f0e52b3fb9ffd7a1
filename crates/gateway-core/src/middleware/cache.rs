//! Response cache (§4.10). GET-only, keyed on the full request URL plus
//! `vary_headers` and, when configured, the `Authorization` header.

use actix_web::http::{header::HeaderName, StatusCode};
use actix_web::{HttpRequest, HttpResponse};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::models::route::CacheRouteConfig;

#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: actix_web::web::Bytes,
    pub expires_at: Instant,
}

enum Store {
    Unbounded(std::collections::HashMap<String, CachedResponse>),
    Lru(LruCache<String, CachedResponse>),
}

/// Shared cache state for a single route.
pub struct ResponseCacheState {
    store: Mutex<Store>,
    ttl: Duration,
    cache_authenticated: bool,
    vary_headers: Vec<String>,
}

impl ResponseCacheState {
    pub fn new(config: &CacheRouteConfig) -> Self {
        let store = match config.max_size {
            Some(size) if size > 0 => Store::Lru(LruCache::new(
                NonZeroUsize::new(size).expect("max_size checked > 0"),
            )),
            _ => Store::Unbounded(std::collections::HashMap::new()),
        };
        Self {
            store: Mutex::new(store),
            ttl: Duration::from_secs(config.ttl_seconds),
            cache_authenticated: config.cache_authenticated,
            vary_headers: config.vary_headers.clone(),
        }
    }

    pub fn build_key(&self, req: &HttpRequest) -> String {
        let mut key = req.uri().to_string();
        for name in &self.vary_headers {
            if let Some(value) = req.headers().get(name.as_str()).and_then(|v| v.to_str().ok()) {
                key.push('|');
                key.push_str(name);
                key.push('=');
                key.push_str(value);
            }
        }
        if self.cache_authenticated {
            if let Some(auth) = req.headers().get("Authorization").and_then(|v| v.to_str().ok()) {
                key.push('|');
                key.push_str(auth);
            }
        }
        key
    }

    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        let now = Instant::now();
        let mut store = self.store.lock().expect("cache mutex poisoned");
        let entry = match &mut *store {
            Store::Unbounded(map) => map.get(key).cloned(),
            Store::Lru(lru) => lru.get(key).cloned(),
        };
        match entry {
            Some(cached) if cached.expires_at > now => Some(cached),
            Some(_) => {
                match &mut *store {
                    Store::Unbounded(map) => {
                        map.remove(key);
                    }
                    Store::Lru(lru) => {
                        lru.pop(key);
                    }
                }
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, response: CachedResponse) {
        let mut store = self.store.lock().expect("cache mutex poisoned");
        match &mut *store {
            Store::Unbounded(map) => {
                map.insert(key, response);
            }
            Store::Lru(lru) => {
                lru.put(key, response);
            }
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// Rebuilds an `HttpResponse` from a cache hit.
pub fn to_http_response(cached: &CachedResponse) -> HttpResponse {
    let mut builder =
        HttpResponse::build(StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK));
    for (name, value) in &cached.headers {
        if let Ok(header_name) = HeaderName::try_from(name.as_str()) {
            builder.insert_header((header_name, value.as_str()));
        }
    }
    builder.body(cached.body.clone())
}

/// Consumes `response`'s body to capture it for caching (only `200 OK`
/// responses are cached), returning a response the caller can still hand
/// back to the client plus the entry to store, if any.
pub async fn capture(response: HttpResponse, ttl: Duration) -> (HttpResponse, Option<CachedResponse>) {
    if response.status() != StatusCode::OK {
        return (response, None);
    }

    let status_code = response.status();
    let status = status_code.as_u16();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(n, v)| v.to_str().ok().map(|v| (n.to_string(), v.to_string())))
        .collect::<Vec<_>>();
    let bytes = actix_web::body::to_bytes(response.into_body())
        .await
        .unwrap_or_default();

    let cached = CachedResponse {
        status,
        headers: headers.clone(),
        body: bytes.clone(),
        expires_at: Instant::now() + ttl,
    };

    let mut builder = HttpResponse::build(status_code);
    for (name, value) in &headers {
        if let Ok(header_name) = HeaderName::try_from(name.as_str()) {
            builder.insert_header((header_name, value.as_str()));
        }
    }
    (builder.body(bytes), Some(cached))
}
