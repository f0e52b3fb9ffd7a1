//! Header and URL rewrite transforms (§4.7 "Director rewrites" / "URL
//! rewrite" and §4.2 stage 5/9).

use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue};
use regex::Regex;

use crate::models::route::HeaderTransformRule;

/// Applies an ordered list of header rules in place. `Set` overrides any
/// existing value, `Add` only appends, `Remove` drops all values for the
/// name, `Replace` substitutes the first regex match in the current value.
pub fn apply_header_rules(headers: &mut HeaderMap, rules: &[HeaderTransformRule]) {
    for rule in rules {
        match rule {
            HeaderTransformRule::Set { name, value } => {
                if let (Ok(name), Ok(value)) = (
                    HeaderName::try_from(name.as_str()),
                    HeaderValue::from_str(value),
                ) {
                    headers.insert(name, value);
                }
            }
            HeaderTransformRule::Add { name, value } => {
                if let (Ok(name), Ok(value)) = (
                    HeaderName::try_from(name.as_str()),
                    HeaderValue::from_str(value),
                ) {
                    headers.append(name, value);
                }
            }
            HeaderTransformRule::Remove { name } => {
                if let Ok(name) = HeaderName::try_from(name.as_str()) {
                    headers.remove(name);
                }
            }
            HeaderTransformRule::Replace {
                name,
                pattern,
                replacement,
            } => {
                let Ok(header_name) = HeaderName::try_from(name.as_str()) else {
                    continue;
                };
                let Ok(re) = Regex::new(pattern) else {
                    continue;
                };
                if let Some(current) = headers.get(&header_name).and_then(|v| v.to_str().ok()) {
                    let replaced = re.replacen(current, 1, replacement.as_str()).into_owned();
                    if let Ok(value) = HeaderValue::from_str(&replaced) {
                        headers.insert(header_name, value);
                    }
                }
            }
        }
    }
}

/// Resolves `url_rewrite`: an ordered `(match, replacement)` list where the
/// first prefix match on `path` wins, and a single `replace-first` of
/// `match` with `replacement` is performed. No rule matches → `path`
/// unchanged.
pub fn rewrite_url(path: &str, rules: &[(String, String)]) -> String {
    for (pattern, replacement) in rules {
        if path.starts_with(pattern.as_str()) {
            return path.replacen(pattern.as_str(), replacement.as_str(), 1);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header::HeaderMap;

    #[test]
    fn set_overrides_existing_value() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-custom"),
            HeaderValue::from_static("old"),
        );
        apply_header_rules(
            &mut headers,
            &[HeaderTransformRule::Set {
                name: "x-custom".to_string(),
                value: "new".to_string(),
            }],
        );
        assert_eq!(headers.get("x-custom").unwrap(), "new");
    }

    #[test]
    fn add_appends_without_removing_existing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-tag"),
            HeaderValue::from_static("a"),
        );
        apply_header_rules(
            &mut headers,
            &[HeaderTransformRule::Add {
                name: "x-tag".to_string(),
                value: "b".to_string(),
            }],
        );
        let values: Vec<_> = headers.get_all("x-tag").collect();
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn remove_drops_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-drop"),
            HeaderValue::from_static("gone"),
        );
        apply_header_rules(
            &mut headers,
            &[HeaderTransformRule::Remove {
                name: "x-drop".to_string(),
            }],
        );
        assert!(headers.get("x-drop").is_none());
    }

    #[test]
    fn replace_substitutes_first_match() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-id"),
            HeaderValue::from_static("user-123-456"),
        );
        apply_header_rules(
            &mut headers,
            &[HeaderTransformRule::Replace {
                name: "x-id".to_string(),
                pattern: r"\d+".to_string(),
                replacement: "X".to_string(),
            }],
        );
        assert_eq!(headers.get("x-id").unwrap(), "user-X-456");
    }

    #[test]
    fn url_rewrite_uses_first_matching_prefix() {
        let rules = vec![
            ("/old".to_string(), "/new".to_string()),
            ("/old/v2".to_string(), "/newer".to_string()),
        ];
        assert_eq!(rewrite_url("/old/v2/thing", &rules), "/new/v2/thing");
    }

    #[test]
    fn url_rewrite_passes_through_when_no_match() {
        let rules = vec![("/old".to_string(), "/new".to_string())];
        assert_eq!(rewrite_url("/other", &rules), "/other");
    }
}
