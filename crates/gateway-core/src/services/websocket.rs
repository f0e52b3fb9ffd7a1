//! WebSocket bidirectional pump (§4.8).
//!
//! Upgrades the client connection with `actix-ws`, dials the upstream with
//! `tokio-tungstenite`, and runs two independent pump tasks translating
//! frames each way. The first error or clean close on either side closes
//! both ends of the bridge.

use actix_web::{web, Error as ActixError, HttpRequest, HttpResponse};
use actix_ws::Message;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as TungsteniteMessage};

use crate::models::route::Route;
use crate::utils::path::to_ws_scheme;

const HOP_BY_HOP: &[&str] = &["connection", "upgrade", "host"];

/// Builds the upstream WebSocket URL for `route`, honoring
/// `websocket.upstream_path` when set and otherwise reusing the
/// (possibly prefix-stripped) request path, with the original query string
/// carried through unchanged.
fn build_upstream_url(upstream: &str, route: &Route, forwarded_path: &str, query: &str) -> String {
    let path = route
        .websocket
        .as_ref()
        .and_then(|w| w.upstream_path.as_deref())
        .unwrap_or(forwarded_path);
    let base = to_ws_scheme(upstream);
    let mut url = crate::utils::path::join_url(&base, path);
    if !query.is_empty() {
        url.push('?');
        url.push_str(query);
    }
    url
}

fn tungstenite_close_code(
    code: tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode,
) -> actix_ws::CloseCode {
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as T;
    match code {
        T::Normal => actix_ws::CloseCode::Normal,
        T::Away => actix_ws::CloseCode::Away,
        T::Protocol => actix_ws::CloseCode::Protocol,
        T::Unsupported => actix_ws::CloseCode::Unsupported,
        T::Abnormal => actix_ws::CloseCode::Abnormal,
        T::Invalid => actix_ws::CloseCode::Invalid,
        T::Policy => actix_ws::CloseCode::Policy,
        T::Size => actix_ws::CloseCode::Size,
        T::Extension => actix_ws::CloseCode::Extension,
        T::Error => actix_ws::CloseCode::Error,
        T::Restart => actix_ws::CloseCode::Restart,
        T::Again => actix_ws::CloseCode::Again,
        _ => actix_ws::CloseCode::Error,
    }
}

/// Copies request headers onto the upstream dial, dropping hop-by-hop and
/// `Sec-WebSocket-*` headers (the handshake negotiates its own), and adding
/// `Origin`/`X-Forwarded-*`/`X-Gateway-Proxy` per §4.8.
fn build_upstream_request(
    url: &str,
    req: &HttpRequest,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, ActixError> {
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    let mut request = url
        .into_client_request()
        .map_err(actix_web::error::ErrorBadGateway)?;
    let headers = request.headers_mut();

    for (name, value) in req.headers() {
        let lower = name.as_str().to_lowercase();
        if HOP_BY_HOP.contains(&lower.as_str()) || lower.starts_with("sec-websocket") {
            continue;
        }
        if let Ok(header_name) = tokio_tungstenite::tungstenite::http::HeaderName::from_bytes(
            name.as_str().as_bytes(),
        ) {
            if let Ok(header_value) =
                tokio_tungstenite::tungstenite::http::HeaderValue::from_bytes(value.as_bytes())
            {
                headers.insert(header_name, header_value);
            }
        }
    }

    let conn_info = req.connection_info();
    let origin = format!("{}://{}", conn_info.scheme(), conn_info.host());
    if let Ok(value) = tokio_tungstenite::tungstenite::http::HeaderValue::from_str(&origin) {
        headers.insert(
            tokio_tungstenite::tungstenite::http::HeaderName::from_static("origin"),
            value,
        );
    }
    if let Some(client_ip) = conn_info.realip_remote_addr() {
        if let Ok(value) = tokio_tungstenite::tungstenite::http::HeaderValue::from_str(client_ip) {
            headers.insert(
                tokio_tungstenite::tungstenite::http::HeaderName::from_static(
                    "x-forwarded-for",
                ),
                value,
            );
        }
    }
    headers.insert(
        tokio_tungstenite::tungstenite::http::HeaderName::from_static("x-gateway-proxy"),
        tokio_tungstenite::tungstenite::http::HeaderValue::from_static("true"),
    );

    Ok(request)
}

/// Upgrades `req` to a WebSocket connection and bridges it to `upstream`
/// (the already load-balanced endpoint URL) per §4.8. Dial failure closes
/// the client side with close code 1011 ("Internal Error") and a
/// descriptive reason.
pub async fn bridge(
    req: &HttpRequest,
    stream: web::Payload,
    route: &Route,
    upstream: &str,
    forwarded_path: &str,
) -> Result<HttpResponse, ActixError> {
    let url = build_upstream_url(upstream, route, forwarded_path, req.query_string());
    info!("upgrading websocket connection to {}", url);

    let (response, mut client_session, mut client_msg_stream) = actix_ws::handle(req, stream)?;

    let upstream_request = build_upstream_request(&url, req)?;

    let (backend_ws, _) = match connect_async(upstream_request).await {
        Ok(conn) => conn,
        Err(e) => {
            error!("failed to connect to websocket upstream {}: {}", url, e);
            let _ = client_session
                .close(Some(actix_ws::CloseReason {
                    code: actix_ws::CloseCode::Error,
                    description: Some(format!("Cannot connect to service: {}", e)),
                }))
                .await;
            return Ok(response);
        }
    };

    let (mut backend_write, mut backend_read) = backend_ws.split();

    let mut client_session_clone = client_session.clone();
    actix_web::rt::spawn(async move {
        while let Some(Ok(msg)) = client_msg_stream.next().await {
            let backend_msg = match msg {
                Message::Text(text) => TungsteniteMessage::Text(text.to_string()),
                Message::Binary(bin) => TungsteniteMessage::Binary(bin.to_vec()),
                Message::Ping(bytes) => TungsteniteMessage::Ping(bytes.to_vec()),
                Message::Pong(bytes) => TungsteniteMessage::Pong(bytes.to_vec()),
                Message::Close(reason) => {
                    debug!("client closed websocket: {:?}", reason);
                    let _ = backend_write.close().await;
                    break;
                }
                _ => continue,
            };

            if let Err(e) = backend_write.send(backend_msg).await {
                error!("failed to forward frame to websocket upstream: {}", e);
                let _ = client_session_clone.close(None).await;
                break;
            }
        }
    });

    actix_web::rt::spawn(async move {
        while let Some(msg_result) = backend_read.next().await {
            match msg_result {
                Ok(TungsteniteMessage::Text(text)) => {
                    if client_session.text(text).await.is_err() {
                        break;
                    }
                }
                Ok(TungsteniteMessage::Binary(bin)) => {
                    if client_session.binary(bin).await.is_err() {
                        break;
                    }
                }
                Ok(TungsteniteMessage::Ping(bytes)) => {
                    if client_session.ping(&bytes).await.is_err() {
                        break;
                    }
                }
                Ok(TungsteniteMessage::Pong(bytes)) => {
                    if client_session.pong(&bytes).await.is_err() {
                        break;
                    }
                }
                Ok(TungsteniteMessage::Close(reason)) => {
                    let close_reason = reason.map(|r| actix_ws::CloseReason {
                        code: tungstenite_close_code(r.code),
                        description: Some(r.reason.to_string()),
                    });
                    let _ = client_session.close(close_reason).await;
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    error!("error reading from websocket upstream: {}", e);
                    let _ = client_session
                        .close(Some(actix_ws::CloseReason {
                            code: actix_ws::CloseCode::Error,
                            description: Some(format!("Upstream error: {}", e)),
                        }))
                        .await;
                    break;
                }
            }
        }
    });

    Ok(response)
}
