//! HTTP↔gRPC bridging (§4.9).
//!
//! A `protocol: GRPC` route accepts JSON-over-HTTP and bridges it onto a
//! real gRPC call: the request path doubles as the gRPC method name
//! (`/package.Service/Method`), the JSON body is converted to the method's
//! input message using a process-wide [`DescriptorPool`], and the response
//! message is converted back to JSON (`use_proto_names=true,
//! emit_unpopulated=true`).
//!
//! Connections are pooled per upstream address; `tonic::transport::Endpoint`
//! already multiplexes HTTP/2 streams over one connection, so the pool only
//! needs to avoid re-dialing on every request.

use bytes::Buf;
use log::{debug, warn};
use prost_reflect::{DescriptorPool, DynamicMessage, MethodDescriptor, SerializeOptions};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::transport::{Channel, Endpoint};
use tonic::Status;

use crate::models::route::RetryPolicy;
use crate::models::settings::GrpcSettings;
use crate::routes::metrics::MetricsRegistry;

/// Maps a gRPC status code to its canonical HTTP status, per the table in
/// §4.9 ("OK"→200, "Cancelled"→408, ... "Unauthenticated"→401).
pub fn grpc_code_to_http(code: i32) -> u16 {
    match tonic::Code::from_i32(code) {
        tonic::Code::Ok => 200,
        tonic::Code::Cancelled => 408,
        tonic::Code::Unknown => 500,
        tonic::Code::InvalidArgument => 400,
        tonic::Code::DeadlineExceeded => 504,
        tonic::Code::NotFound => 404,
        tonic::Code::AlreadyExists => 409,
        tonic::Code::PermissionDenied => 403,
        tonic::Code::ResourceExhausted => 429,
        tonic::Code::FailedPrecondition => 412,
        tonic::Code::Aborted => 409,
        tonic::Code::OutOfRange => 400,
        tonic::Code::Unimplemented => 501,
        tonic::Code::Internal => 500,
        tonic::Code::Unavailable => 503,
        tonic::Code::DataLoss => 500,
        tonic::Code::Unauthenticated => 401,
    }
}

struct PooledChannel {
    channel: Channel,
    last_used: Instant,
    /// Cleared by [`GrpcPool::mark_unhealthy`] after an `Unavailable` RPC
    /// result; the next `get` for the same target then redials instead of
    /// handing back this entry (§4.9 "a different connection after an
    /// unhealthy transition").
    healthy: bool,
    in_use: usize,
}

/// Per-process pool of gRPC channels, keyed by upstream target address.
pub struct GrpcPool {
    channels: Mutex<HashMap<String, PooledChannel>>,
    settings: GrpcSettings,
    metrics: Arc<MetricsRegistry>,
}

impl GrpcPool {
    pub fn new(settings: GrpcSettings, metrics: Arc<MetricsRegistry>) -> Arc<Self> {
        Arc::new(Self {
            channels: Mutex::new(HashMap::new()),
            settings,
            metrics,
        })
    }

    fn dial(&self, target: &str) -> Result<Channel, tonic::transport::Error> {
        let endpoint = Endpoint::from_shared(target.to_string())?
            .keep_alive_timeout(Duration::from_secs(self.settings.keepalive_seconds))
            .tcp_keepalive(Some(Duration::from_secs(self.settings.keepalive_seconds)));
        Ok(endpoint.connect_lazy())
    }

    /// Returns a healthy cached channel for `target`, dialing lazily on
    /// first use or after the cached entry was marked unhealthy. Pair every
    /// successful `get` with a [`GrpcPool::release`] once the caller is done
    /// with the connection (§3 `ReleaseConn`).
    pub async fn get(&self, target: &str) -> Result<Channel, tonic::transport::Error> {
        {
            let mut channels = self.channels.lock().expect("grpc pool poisoned");
            if let Some(entry) = channels.get_mut(target) {
                if entry.healthy {
                    entry.last_used = Instant::now();
                    entry.in_use += 1;
                    return Ok(entry.channel.clone());
                }
            }
        }

        let channel = match self.dial(target) {
            Ok(channel) => channel,
            Err(e) => {
                self.metrics.record_grpc_pool_connection_error();
                return Err(e);
            }
        };

        let mut channels = self.channels.lock().expect("grpc pool poisoned");
        let had_prior = channels.remove(target).is_some();
        channels.insert(
            target.to_string(),
            PooledChannel {
                channel: channel.clone(),
                last_used: Instant::now(),
                healthy: true,
                in_use: 1,
            },
        );
        drop(channels);
        if had_prior {
            self.metrics.record_grpc_pool_connection_closed();
        }
        self.metrics.record_grpc_pool_connection_opened();
        Ok(channel)
    }

    /// Releases a connection acquired via `get` (§3 `ReleaseConn`).
    pub fn release(&self, target: &str) {
        let mut channels = self.channels.lock().expect("grpc pool poisoned");
        if let Some(entry) = channels.get_mut(target) {
            entry.in_use = entry.in_use.saturating_sub(1);
        }
    }

    /// Marks the pooled connection for `target` unhealthy so the next `get`
    /// redials rather than reusing it.
    pub fn mark_unhealthy(&self, target: &str) {
        let mut channels = self.channels.lock().expect("grpc pool poisoned");
        if let Some(entry) = channels.get_mut(target) {
            entry.healthy = false;
        }
        self.metrics.record_health_check(target, false);
    }

    /// Drops channels idle longer than `pool_max_idle_seconds`. Intended to
    /// be driven by a periodic background task.
    pub fn evict_idle(&self) {
        if self.settings.pool_max_idle_seconds == 0 {
            return;
        }
        let idle_cutoff = Duration::from_secs(self.settings.pool_max_idle_seconds);
        let mut channels = self.channels.lock().expect("grpc pool poisoned");
        let before = channels.len();
        channels.retain(|_, entry| entry.in_use > 0 || entry.last_used.elapsed() < idle_cutoff);
        let evicted = before - channels.len();
        for _ in 0..evicted {
            self.metrics.record_grpc_pool_connection_closed();
        }
    }
}

/// Spawns the periodic idle-channel sweep for a pool.
pub fn spawn_pool_cleanup(pool: Arc<GrpcPool>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            pool.evict_idle();
        }
    });
}

/// A `Codec` over dynamically-typed protobuf messages, keyed to one method's
/// input/output descriptors. `tonic`'s built-in `ProstCodec` requires
/// `Default`, which `DynamicMessage` cannot provide without a descriptor, so
/// bridging needs its own encoder/decoder pair.
#[derive(Clone)]
struct DynamicCodec {
    output: prost_reflect::MessageDescriptor,
}

impl Codec for DynamicCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;
    type Encoder = DynamicEncoder;
    type Decoder = DynamicDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        DynamicDecoder {
            descriptor: self.output.clone(),
        }
    }
}

#[derive(Clone)]
struct DynamicEncoder;

impl Encoder for DynamicEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, buf: &mut EncodeBuf<'_>) -> Result<(), Status> {
        item.encode(buf)
            .map_err(|e| Status::internal(format!("failed to encode gRPC request: {e}")))
    }
}

#[derive(Clone)]
struct DynamicDecoder {
    descriptor: prost_reflect::MessageDescriptor,
}

impl Decoder for DynamicDecoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(&mut self, buf: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Status> {
        let message = DynamicMessage::decode(self.descriptor.clone(), buf.chunk())
            .map_err(|e| Status::internal(format!("failed to decode gRPC response: {e}")))?;
        buf.advance(buf.remaining());
        Ok(Some(message))
    }
}

/// Bridges a single HTTP↔gRPC call, resolving method descriptors from a
/// process-wide pool loaded from `grpc.descriptor_set_path`.
pub struct GrpcBridge {
    pool: Arc<GrpcPool>,
    descriptors: Arc<DescriptorPool>,
    metrics: Arc<MetricsRegistry>,
}

impl GrpcBridge {
    pub fn new(pool: Arc<GrpcPool>, descriptors: Arc<DescriptorPool>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            pool,
            descriptors,
            metrics,
        }
    }

    /// Finds the method descriptor for `/package.Service/Method`.
    fn resolve_method(&self, full_path: &str) -> Result<MethodDescriptor, GrpcBridgeError> {
        let trimmed = full_path.trim_start_matches('/');
        let (service, method) = trimmed
            .rsplit_once('/')
            .ok_or_else(|| GrpcBridgeError::BadMethodPath(full_path.to_string()))?;
        let service_desc = self
            .descriptors
            .get_service_by_name(service)
            .ok_or_else(|| GrpcBridgeError::UnknownService(service.to_string()))?;
        service_desc
            .methods()
            .find(|m| m.name() == method)
            .ok_or_else(|| GrpcBridgeError::UnknownMethod(full_path.to_string()))
    }

    /// Performs the bridged unary call and returns the response message as
    /// proto-JSON bytes, retrying per `retry` on transient failures.
    pub async fn call(
        &self,
        target: &str,
        full_method_path: &str,
        json_body: &[u8],
        timeout: Duration,
        retry: &RetryPolicy,
    ) -> Result<Vec<u8>, GrpcBridgeError> {
        let started = Instant::now();
        let result = self
            .call_inner(target, full_method_path, json_body, timeout, retry)
            .await;
        self.metrics.record_rpc(
            full_method_path,
            started.elapsed().as_millis() as u64,
            result.is_err(),
        );
        result
    }

    async fn call_inner(
        &self,
        target: &str,
        full_method_path: &str,
        json_body: &[u8],
        timeout: Duration,
        retry: &RetryPolicy,
    ) -> Result<Vec<u8>, GrpcBridgeError> {
        let method_desc = self.resolve_method(full_method_path)?;
        let input_desc = method_desc.input();
        let output_desc = method_desc.output();

        let mut request_message = DynamicMessage::new(input_desc);
        let mut deserializer = serde_json::Deserializer::from_slice(json_body);
        request_message
            .deserialize(&mut deserializer)
            .map_err(|e| GrpcBridgeError::InvalidJson(e.to_string()))?;

        let mut attempt = 0u32;
        let mut backoff = Duration::from_millis(retry.initial_backoff_ms);
        loop {
            attempt += 1;
            let channel = self
                .pool
                .get(target)
                .await
                .map_err(|e| GrpcBridgeError::Connect(e.to_string()))?;

            let codec = DynamicCodec {
                output: output_desc.clone(),
            };
            let mut grpc = tonic::client::Grpc::new(channel);
            let path: tonic::codegen::http::uri::PathAndQuery = full_method_path
                .parse()
                .map_err(|_| GrpcBridgeError::BadMethodPath(full_method_path.to_string()))?;

            let call = async {
                grpc.ready().await.map_err(|e| {
                    Status::unavailable(format!("gRPC channel not ready: {e}"))
                })?;
                grpc.unary(tonic::Request::new(request_message.clone()), path, codec)
                    .await
            };

            let result = tokio::time::timeout(timeout, call).await;
            self.pool.release(target);

            match result {
                Ok(Ok(response)) => {
                    let options = SerializeOptions::new()
                        .use_proto_names(true)
                        .skip_default_fields(false);
                    let mut out = Vec::new();
                    let mut serializer = serde_json::Serializer::new(&mut out);
                    response
                        .into_inner()
                        .serialize_with_options(&mut serializer, &options)
                        .map_err(|e| GrpcBridgeError::Internal(e.to_string()))?;
                    return Ok(out);
                }
                Ok(Err(status)) => {
                    if status.code() == tonic::Code::Unavailable {
                        self.pool.mark_unhealthy(target);
                    }
                    if attempt >= retry.max_attempts || !is_retryable(&status) {
                        return Err(GrpcBridgeError::Status {
                            code: status.code() as i32,
                            message: status.message().to_string(),
                        });
                    }
                }
                Err(_) => {
                    if attempt >= retry.max_attempts {
                        return Err(GrpcBridgeError::Timeout);
                    }
                }
            }

            debug!(
                "gRPC bridge retrying {} (attempt {}/{})",
                full_method_path, attempt, retry.max_attempts
            );
            tokio::time::sleep(backoff).await;
            backoff = Duration::from_millis(
                ((backoff.as_millis() as f64) * retry.multiplier) as u64,
            )
            .min(Duration::from_millis(retry.max_backoff_ms));
        }
    }
}

fn is_retryable(status: &Status) -> bool {
    matches!(
        status.code(),
        tonic::Code::Unavailable | tonic::Code::DeadlineExceeded | tonic::Code::ResourceExhausted
    )
}

#[derive(Debug, thiserror::Error)]
pub enum GrpcBridgeError {
    #[error("malformed gRPC method path: {0}")]
    BadMethodPath(String),
    #[error("unknown gRPC service: {0}")]
    UnknownService(String),
    #[error("unknown gRPC method: {0}")]
    UnknownMethod(String),
    #[error("invalid JSON request body: {0}")]
    InvalidJson(String),
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("gRPC call timed out")]
    Timeout,
    #[error("gRPC status {code}: {message}")]
    Status { code: i32, message: String },
    #[error("internal bridging error: {0}")]
    Internal(String),
}

impl GrpcBridgeError {
    pub fn http_status(&self) -> u16 {
        match self {
            GrpcBridgeError::BadMethodPath(_)
            | GrpcBridgeError::UnknownService(_)
            | GrpcBridgeError::UnknownMethod(_)
            | GrpcBridgeError::InvalidJson(_) => 400,
            GrpcBridgeError::Connect(_) => 502,
            GrpcBridgeError::Timeout => 504,
            GrpcBridgeError::Status { code, .. } => grpc_code_to_http(*code),
            GrpcBridgeError::Internal(_) => 500,
        }
    }
}

/// Loads the process-wide descriptor pool from a compiled `FileDescriptorSet`
/// on disk (§4.9 "process-wide registry"). Returns an empty pool (every
/// method lookup fails) when no path is configured, so gRPC routes without
/// `descriptor_set_path` fail loudly at request time rather than at startup.
pub fn load_descriptor_pool(path: Option<&str>) -> Arc<DescriptorPool> {
    let Some(path) = path else {
        warn!("grpc.descriptor_set_path not configured; gRPC routes will fail to resolve methods");
        return Arc::new(DescriptorPool::new());
    };
    match std::fs::read(path) {
        Ok(bytes) => match DescriptorPool::decode(bytes.as_ref()) {
            Ok(pool) => Arc::new(pool),
            Err(e) => {
                warn!("failed to parse descriptor set at {}: {}", path, e);
                Arc::new(DescriptorPool::new())
            }
        },
        Err(e) => {
            warn!("failed to read descriptor set at {}: {}", path, e);
            Arc::new(DescriptorPool::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_table_matches_spec() {
        assert_eq!(grpc_code_to_http(tonic::Code::Ok as i32), 200);
        assert_eq!(grpc_code_to_http(tonic::Code::NotFound as i32), 404);
        assert_eq!(grpc_code_to_http(tonic::Code::Unauthenticated as i32), 401);
        assert_eq!(grpc_code_to_http(tonic::Code::Unavailable as i32), 503);
        assert_eq!(grpc_code_to_http(tonic::Code::Cancelled as i32), 408);
        assert_eq!(grpc_code_to_http(tonic::Code::FailedPrecondition as i32), 412);
    }

    #[test]
    fn http_status_from_error_variants() {
        assert_eq!(GrpcBridgeError::Timeout.http_status(), 504);
        assert_eq!(GrpcBridgeError::Connect("x".into()).http_status(), 502);
    }

    #[tokio::test]
    async fn unhealthy_connection_is_redialed_on_next_get() {
        let pool = GrpcPool::new(GrpcSettings::default(), Arc::new(MetricsRegistry::new()));
        let target = "http://127.0.0.1:50999";

        pool.get(target).await.unwrap();
        pool.release(target);
        {
            let channels = pool.channels.lock().unwrap();
            assert!(channels.get(target).unwrap().healthy);
        }

        pool.mark_unhealthy(target);
        {
            let channels = pool.channels.lock().unwrap();
            assert!(!channels.get(target).unwrap().healthy);
        }

        pool.get(target).await.unwrap();
        {
            let channels = pool.channels.lock().unwrap();
            assert!(channels.get(target).unwrap().healthy);
        }
    }

    #[test]
    fn evict_idle_never_drops_in_use_connections() {
        let mut settings = GrpcSettings::default();
        settings.pool_max_idle_seconds = 1;
        let pool = GrpcPool::new(settings, Arc::new(MetricsRegistry::new()));
        {
            let mut channels = pool.channels.lock().unwrap();
            channels.insert(
                "held".to_string(),
                PooledChannel {
                    channel: Endpoint::from_static("http://127.0.0.1:1").connect_lazy(),
                    last_used: Instant::now() - Duration::from_secs(10),
                    healthy: true,
                    in_use: 1,
                },
            );
        }
        pool.evict_idle();
        assert!(pool.channels.lock().unwrap().contains_key("held"));
    }
}
