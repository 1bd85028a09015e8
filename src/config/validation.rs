//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses, origins and the path prefix
//! - Check that prefix routing has a fixed target
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use url::Url;

use crate::config::schema::{ProxyConfig, RoutingMode};

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("not a socket address: {}", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be > 0"));
    }

    let prefix = &config.proxy.path_prefix;
    if !prefix.starts_with('/') || prefix.ends_with('/') {
        errors.push(ValidationError::new(
            "proxy.path_prefix",
            format!("must start with '/' and not end with '/': {prefix:?}"),
        ));
    }
    if prefix.contains('?') || prefix.contains('#') {
        errors.push(ValidationError::new(
            "proxy.path_prefix",
            "must not contain a query or fragment",
        ));
    }

    if let Some(origin) = &config.proxy.public_origin {
        if let Err(message) = check_origin(origin) {
            errors.push(ValidationError::new("proxy.public_origin", message));
        }
    }

    match (config.routing.mode, &config.routing.target) {
        (RoutingMode::Prefix, None) => {
            errors.push(ValidationError::new(
                "routing.target",
                "required when routing.mode = \"prefix\"",
            ));
        }
        (_, Some(target)) => {
            if let Err(message) = check_origin(target) {
                errors.push(ValidationError::new("routing.target", message));
            }
        }
        (RoutingMode::Query, None) => {}
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be > 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }

    if config.security.max_rewrite_body == 0 {
        errors.push(ValidationError::new("security.max_rewrite_body", "must be > 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("not a socket address: {}", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// An origin is an http(s) URL with a host and nothing past the authority.
fn check_origin(raw: &str) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|e| format!("invalid URL {raw:?}: {e}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("scheme must be http or https: {raw}"));
    }
    if url.host_str().is_none() {
        return Err(format!("missing host: {raw}"));
    }
    if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
        return Err(format!("must be an origin without path or query: {raw}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ProxyConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = ProxyConfig::default();
        config.listener.bind_address = "nope".into();
        config.proxy.path_prefix = "proxy/".into();
        config.timeouts.request_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["listener.bind_address", "proxy.path_prefix", "timeouts.request_secs"]
        );
    }

    #[test]
    fn root_prefix_rejected() {
        let mut config = ProxyConfig::default();
        config.proxy.path_prefix = "/".into();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn origins_must_not_carry_paths() {
        let mut config = ProxyConfig::default();
        config.proxy.public_origin = Some("https://proxy.test/app".into());
        assert!(validate_config(&config).is_err());

        config.proxy.public_origin = Some("https://proxy.test".into());
        assert!(validate_config(&config).is_ok());

        config.routing.target = Some("ftp://files.test".into());
        assert!(validate_config(&config).is_err());
    }
}
