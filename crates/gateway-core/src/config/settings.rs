//! Loads the top-level [`Settings`] document from disk.
//!
//! Two environment variables control the load:
//!
//! - `CONFIG_PATH` (default `./config.json`) — the main document: server,
//!   auth, cache, cors, security, metrics, tracing, grpc settings, and
//!   (unless `ROUTES_PATH` is set) the route table.
//! - `ROUTES_PATH` — when set, routes are loaded from this second document
//!   instead of `config.routers`, matching §6's "Routes document" being
//!   separate from the global config document.
//!
//! Every `${VAR}` occurrence in either raw file is substituted against the
//! process environment before JSON parsing (§6 "`${VAR}` substitution").

use crate::models::route::Route;
use crate::models::settings::Settings;
use log::debug;
use std::env;
use std::fs;
use std::path::Path;

const MAX_CONFIG_SIZE: u64 = 10 * 1024 * 1024;

fn default_config_path() -> String {
    env::var("CONFIG_PATH").unwrap_or_else(|_| "./config.json".to_string())
}

/// Substitutes every `${VAR}` in `input` with the value of the environment
/// variable `VAR`. Unset variables are substituted with an empty string.
pub fn substitute_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
            if let Some(end) = input[i + 2..].find('}') {
                let name = &input[i + 2..i + 2 + end];
                out.push_str(&env::var(name).unwrap_or_default());
                i += 2 + end + 1;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}

fn read_and_substitute(path: &str) -> Result<String, Box<dyn std::error::Error>> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(format!("cannot resolve config path '{}'", path.display()).into());
    }

    let metadata = fs::metadata(path)
        .map_err(|e| format!("cannot read config file metadata: {}", e))?;
    if metadata.len() > MAX_CONFIG_SIZE {
        return Err(format!(
            "config file too large: {} bytes (max: {} bytes)",
            metadata.len(),
            MAX_CONFIG_SIZE
        )
        .into());
    }

    let raw = fs::read_to_string(path).map_err(|e| format!("cannot read config file: {}", e))?;
    Ok(substitute_env_vars(&raw))
}

/// Loads, substitutes and parses the gateway's configuration document(s).
/// Does not call [`Settings::validate`] — callers must do that explicitly
/// so startup failures can be reported with full context.
pub fn load_settings() -> Result<Settings, Box<dyn std::error::Error>> {
    let config_path = default_config_path();
    debug!("loading configuration from {}", config_path);

    let resolved = read_and_substitute(&config_path)?;
    let mut settings: Settings =
        serde_json::from_str(&resolved).map_err(|e| format!("invalid config JSON: {}", e))?;

    if let Ok(routes_path) = env::var("ROUTES_PATH") {
        debug!("loading routes from {}", routes_path);
        let resolved_routes = read_and_substitute(&routes_path)?;
        let routers: Vec<Route> = serde_json::from_str(&resolved_routes)
            .map_err(|e| format!("invalid routes JSON: {}", e))?;
        settings.routers = routers;
    }

    debug!(
        "loaded configuration with {} route(s)",
        settings.routers.len()
    );
    Ok(settings)
}
