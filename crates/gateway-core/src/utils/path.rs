//! Path manipulation helpers shared by the route matcher and proxy services.

/// Joins an upstream base URL (possibly with a path of its own) and a
/// request path into one URL, avoiding a doubled or missing `/`.
pub fn join_url(upstream: &str, path: &str) -> String {
    let base = upstream.trim_end_matches('/');
    if path.is_empty() {
        return base.to_string();
    }
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

/// Strips `prefix` from `path`, restoring a leading `/` if the remainder is
/// empty (§4.1 "`strip_prefix`").
pub fn strip_prefix(path: &str, prefix: &str) -> String {
    let stripped = path.strip_prefix(prefix).unwrap_or(path);
    if stripped.is_empty() {
        "/".to_string()
    } else if !stripped.starts_with('/') {
        format!("/{}", stripped)
    } else {
        stripped.to_string()
    }
}

/// Converts an `http`/`https` URL into its WebSocket-scheme equivalent
/// (`ws`/`wss`) for dialing an upstream, per §4.8.
pub fn to_ws_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_without_doubling_slash() {
        assert_eq!(join_url("http://backend/", "/v1/users"), "http://backend/v1/users");
        assert_eq!(join_url("http://backend", "/v1/users"), "http://backend/v1/users");
    }

    #[test]
    fn strip_prefix_restores_root_slash() {
        assert_eq!(strip_prefix("/api/test", "/api"), "/test");
        assert_eq!(strip_prefix("/api", "/api"), "/");
    }

    #[test]
    fn strip_prefix_noop_on_non_match() {
        assert_eq!(strip_prefix("/other", "/api"), "/other");
    }

    #[test]
    fn scheme_conversion() {
        assert_eq!(to_ws_scheme("http://backend:8080"), "ws://backend:8080");
        assert_eq!(to_ws_scheme("https://backend:8080"), "wss://backend:8080");
    }
}
