//! Enumerated configuration surface.

use url::Url;

/// Static configuration for the identity and trust core.
///
/// Built with a `ConfigBuilder` (`#[must_use]` setters returning `Self`).
#[derive(Debug, Clone)]
pub struct Config {
    pub client_id: String,
    pub oauth2_base_url: Url,
    pub oauth1_base_url: Url,
    pub sitecheck_host: String,
    pub allow_insecure_oauth1: bool,
    pub allow_insecure_oauth2: bool,
    pub full_metrics_enabled: bool,
}

impl Config {
    #[must_use]
    pub fn builder(client_id: impl Into<String>, oauth2_base_url: Url, oauth1_base_url: Url) -> ConfigBuilder {
        ConfigBuilder::new(client_id, oauth2_base_url, oauth1_base_url)
    }
}

/// Builder for [`Config`]. Defaults: `sitecheck_host` =
/// `sitecheck2.opera.com`, both `allow_insecure_*` = `false`,
/// `full_metrics_enabled` = `false`.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    client_id: String,
    oauth2_base_url: Url,
    oauth1_base_url: Url,
    sitecheck_host: String,
    allow_insecure_oauth1: bool,
    allow_insecure_oauth2: bool,
    full_metrics_enabled: bool,
}

impl ConfigBuilder {
    #[must_use]
    pub fn new(client_id: impl Into<String>, oauth2_base_url: Url, oauth1_base_url: Url) -> Self {
        Self {
            client_id: client_id.into(),
            oauth2_base_url,
            oauth1_base_url,
            sitecheck_host: "sitecheck2.opera.com".to_string(),
            allow_insecure_oauth1: false,
            allow_insecure_oauth2: false,
            full_metrics_enabled: false,
        }
    }

    #[must_use]
    pub fn sitecheck_host(mut self, host: impl Into<String>) -> Self {
        self.sitecheck_host = host.into();
        self
    }

    #[must_use]
    pub fn allow_insecure_oauth1(mut self, allow: bool) -> Self {
        self.allow_insecure_oauth1 = allow;
        self
    }

    #[must_use]
    pub fn allow_insecure_oauth2(mut self, allow: bool) -> Self {
        self.allow_insecure_oauth2 = allow;
        self
    }

    #[must_use]
    pub fn full_metrics_enabled(mut self, enabled: bool) -> Self {
        self.full_metrics_enabled = enabled;
        self
    }

    #[must_use]
    pub fn build(self) -> Config {
        Config {
            client_id: self.client_id,
            oauth2_base_url: self.oauth2_base_url,
            oauth1_base_url: self.oauth1_base_url,
            sitecheck_host: self.sitecheck_host,
            allow_insecure_oauth1: self.allow_insecure_oauth1,
            allow_insecure_oauth2: self.allow_insecure_oauth2,
            full_metrics_enabled: self.full_metrics_enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sitecheck_host() {
        let cfg = Config::builder(
            "client",
            "https://id.example.com".parse().unwrap(),
            "https://id.example.com".parse().unwrap(),
        )
        .build();
        assert_eq!(cfg.sitecheck_host, "sitecheck2.opera.com");
        assert!(!cfg.allow_insecure_oauth2);
    }

    #[test]
    fn overrides_apply() {
        let cfg = Config::builder(
            "client",
            "https://id.example.com".parse().unwrap(),
            "https://id.example.com".parse().unwrap(),
        )
        .sitecheck_host("custom.example.com")
        .full_metrics_enabled(true)
        .build();
        assert_eq!(cfg.sitecheck_host, "custom.example.com");
        assert!(cfg.full_metrics_enabled);
    }
}
