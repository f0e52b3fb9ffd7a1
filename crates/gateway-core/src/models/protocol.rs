use serde::{Deserialize, Serialize};

/// Protocol a route speaks on the client-facing side.
///
/// Distinct from the scheme of an individual upstream URL: a route's
/// `protocol` decides which proxy bridge (`services::http`,
/// `services::websocket`, `services::grpc`) handles matched requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Http,
    Grpc,
    Socket,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Http
    }
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "HTTP",
            Protocol::Grpc => "GRPC",
            Protocol::Socket => "SOCKET",
        }
    }
}
