//! Static host metadata and region to endpoint resolution.

use std::collections::HashMap;

use crate::traits::{EndpointResolver, HostMetadata, MetadataError};

/// Scheme prefix for gateway endpoints.
pub const HTTPS_PREFIX: &str = "https://";

/// Service name used in gateway hostnames.
const SERVICE_NAME: &str = "ssmmessages";

/// Host metadata taken from fixed values (config, env, or tests).
#[derive(Debug, Clone, Default)]
pub struct StaticHostMetadata {
    instance_id: Option<String>,
    region: Option<String>,
}

impl StaticHostMetadata {
    /// Create metadata from optional values; empty strings count as absent.
    #[must_use]
    pub fn new(instance_id: Option<String>, region: Option<String>) -> Self {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        Self {
            instance_id: non_empty(instance_id),
            region: non_empty(region),
        }
    }
}

impl HostMetadata for StaticHostMetadata {
    fn instance_id(&self) -> Result<String, MetadataError> {
        self.instance_id
            .clone()
            .ok_or_else(|| MetadataError::Unavailable("no instance id configured".to_string()))
    }

    fn region(&self) -> Result<String, MetadataError> {
        self.region
            .clone()
            .ok_or_else(|| MetadataError::Unavailable("no region configured".to_string()))
    }
}

/// Resolves `{service}.{region}.{domain}` hostnames, with per-region overrides.
#[derive(Debug, Clone, Default)]
pub struct StaticEndpointResolver {
    overrides: HashMap<String, String>,
}

impl StaticEndpointResolver {
    /// Create a resolver with no overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin a hostname for one region.
    #[must_use]
    pub fn with_override(mut self, region: impl Into<String>, hostname: impl Into<String>) -> Self {
        self.overrides.insert(region.into(), hostname.into());
        self
    }
}

impl EndpointResolver for StaticEndpointResolver {
    fn resolve(&self, region: &str) -> Option<String> {
        if let Some(host) = self.overrides.get(region) {
            return Some(host.clone());
        }
        let region = region.trim();
        if region.is_empty() || !region.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return None;
        }
        let domain = if region.starts_with("cn-") {
            "amazonaws.com.cn"
        } else {
            "amazonaws.com"
        };
        Some(format!("{SERVICE_NAME}.{region}.{domain}"))
    }
}

/// Compose the gateway endpoint URL for `region`.
///
/// Returns `None` when the resolver has no (or an empty) hostname.
#[must_use]
pub fn gateway_endpoint(resolver: &dyn EndpointResolver, region: &str) -> Option<String> {
    resolver
        .resolve(region)
        .filter(|host| !host.is_empty())
        .map(|host| format!("{HTTPS_PREFIX}{host}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_standard_and_china_regions() {
        let resolver = StaticEndpointResolver::new();
        assert_eq!(
            gateway_endpoint(&resolver, "us-east-1").as_deref(),
            Some("https://ssmmessages.us-east-1.amazonaws.com")
        );
        assert_eq!(
            resolver.resolve("cn-north-1").as_deref(),
            Some("ssmmessages.cn-north-1.amazonaws.com.cn")
        );
    }

    #[test]
    fn test_unknown_region_has_no_endpoint() {
        let resolver = StaticEndpointResolver::new();
        assert!(gateway_endpoint(&resolver, "").is_none());
        assert!(gateway_endpoint(&resolver, "us east/1").is_none());
    }

    #[test]
    fn test_empty_override_is_a_failure() {
        let resolver = StaticEndpointResolver::new().with_override("local", "");
        assert!(gateway_endpoint(&resolver, "local").is_none());
    }

    #[test]
    fn test_static_metadata_treats_blank_as_missing() {
        let meta = StaticHostMetadata::new(Some(" ".into()), Some("us-west-2".into()));
        assert!(meta.instance_id().is_err());
        assert_eq!(meta.region().unwrap(), "us-west-2");
    }
}
