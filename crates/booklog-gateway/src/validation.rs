use url::Url;

use crate::config::ConfigError;
use crate::error::GatewayError;

/// Validate an upstream base URL (http/https, has a host, no query, fragment
/// or credentials).
pub fn validate_upstream_url(url: &str) -> Result<(), ConfigError> {
    let parsed = Url::parse(url).map_err(|_| ConfigError::InvalidUrl(url.to_string()))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "{url}: upstream must use http or https"
        )));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(ConfigError::InvalidUrl(format!("{url}: upstream must have a host")));
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(ConfigError::InvalidUrl(format!(
            "{url}: upstream must not carry a query or fragment"
        )));
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(ConfigError::InvalidUrl(format!(
            "{url}: upstream must not embed credentials"
        )));
    }

    Ok(())
}

/// Route prefixes are absolute, have no trailing slash and no wildcard or
/// query characters.
pub fn validate_route_prefix(prefix: &str) -> Result<(), ConfigError> {
    let invalid = !prefix.starts_with('/')
        || prefix.len() < 2
        || prefix.ends_with('/')
        || prefix.contains("//")
        || prefix
            .chars()
            .any(|c| matches!(c, '*' | '?' | '#' | '%') || c.is_whitespace() || c.is_control());

    if invalid {
        return Err(ConfigError::InvalidRoute(prefix.to_string()));
    }
    Ok(())
}

/// Reject request paths that could escape the upstream's path space once the
/// prefix is stripped. Checks both the raw and the percent-decoded bytes; the
/// decoded form need not be UTF-8.
pub fn sanitize_request_path(path: &str) -> Result<(), GatewayError> {
    let decoded = urlencoding::decode_binary(path.as_bytes());

    for candidate in [path.as_bytes(), &*decoded] {
        if candidate.contains(&b'\r') || candidate.contains(&b'\n') {
            return Err(GatewayError::BadRequest(
                "path must not contain newlines".to_string(),
            ));
        }
        if candidate.contains(&0) {
            return Err(GatewayError::BadRequest(
                "path must not contain null bytes".to_string(),
            ));
        }
        if candidate.split(|b| *b == b'/').any(|segment| segment == b"..") {
            return Err(GatewayError::BadRequest(
                "path traversal not allowed".to_string(),
            ));
        }
    }

    Ok(())
}
