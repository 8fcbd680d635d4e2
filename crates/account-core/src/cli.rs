//! The one documented CLI override: `--fraud-check-server=<host>`.

use crate::config::Config;

/// Command-line overrides recognised by embedders of this crate.
#[derive(Debug, Clone, Default, clap::Parser)]
pub struct CliArgs {
    /// Replace the built-in sitecheck host used by the fraud-rating engine.
    #[arg(long = "fraud-check-server", value_name = "HOST")]
    pub fraud_check_server: Option<String>,
}

impl CliArgs {
    /// Apply any overrides onto an existing [`Config`] in place.
    pub fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.fraud_check_server {
            config.sitecheck_host = host.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[test]
    fn overrides_sitecheck_host_when_present() {
        let mut config = Config::builder(
            "client",
            Url::parse("https://id.example.com").unwrap(),
            Url::parse("https://id.example.com").unwrap(),
        )
        .build();
        let args = CliArgs {
            fraud_check_server: Some("override.example.com".to_string()),
        };
        args.apply(&mut config);
        assert_eq!(config.sitecheck_host, "override.example.com");
    }

    #[test]
    fn leaves_default_when_absent() {
        let mut config = Config::builder(
            "client",
            Url::parse("https://id.example.com").unwrap(),
            Url::parse("https://id.example.com").unwrap(),
        )
        .build();
        let original = config.sitecheck_host.clone();
        CliArgs::default().apply(&mut config);
        assert_eq!(config.sitecheck_host, original);
    }
}
