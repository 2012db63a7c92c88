//! Model provider credentials passed to execution units.

use gamegen_core::Provider;

/// Base URL used when `ZAI_BASE_URL` is unset.
pub const DEFAULT_BASE_URL: &str = "https://api.z.ai/api/anthropic";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderCredentials {
    pub api_key: String,
    pub base_url: String,
}

/// Credentials for every provider a job may select.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub default: ProviderCredentials,
    /// `None` when no alternate provider is configured.
    pub alternate: Option<ProviderCredentials>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            default: ProviderCredentials {
                api_key: String::new(),
                base_url: DEFAULT_BASE_URL.to_string(),
            },
            alternate: None,
        }
    }
}

impl ProviderConfig {
    /// Read `ZAI_API_KEY`/`ZAI_BASE_URL` and `ALT_API_KEY`/`ALT_BASE_URL`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let default = ProviderCredentials {
            api_key: non_empty("ZAI_API_KEY").unwrap_or_default(),
            base_url: non_empty("ZAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        };
        let alternate = non_empty("ALT_API_KEY").map(|api_key| ProviderCredentials {
            api_key,
            base_url: non_empty("ALT_BASE_URL").unwrap_or_else(|| default.base_url.clone()),
        });

        Self { default, alternate }
    }

    /// Credentials for `provider`. An unconfigured alternate falls back to the default.
    pub fn credentials(&self, provider: Provider) -> &ProviderCredentials {
        match provider {
            Provider::Default => &self.default,
            Provider::Alternate => self.alternate.as_ref().unwrap_or(&self.default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_without_env() {
        let config = ProviderConfig::from_lookup(|_| None);
        assert_eq!(config.default.base_url, DEFAULT_BASE_URL);
        assert!(config.default.api_key.is_empty());
        assert!(config.alternate.is_none());
        assert_eq!(config.credentials(Provider::Alternate), &config.default);
    }

    #[test]
    fn test_alternate_credentials() {
        let vars = HashMap::from([
            ("ZAI_API_KEY", "zai-key"),
            ("ALT_API_KEY", "alt-key"),
            ("ALT_BASE_URL", "https://alt.example.com"),
        ]);
        let config = ProviderConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.credentials(Provider::Default).api_key, "zai-key");
        let alt = config.credentials(Provider::Alternate);
        assert_eq!(alt.api_key, "alt-key");
        assert_eq!(alt.base_url, "https://alt.example.com");
    }
}
