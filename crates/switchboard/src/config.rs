//! Switchboard configuration
//!
//! Every timing value is expressed in milliseconds so the configuration can be
//! written by hand in TOML:
//!
//! ```toml
//! [lookup]
//! provider_timeout_ms = 100
//! selector_timeout_ms = 100
//!
//! [expiry]
//! sweep_interval_ms = 250
//! new_call_budget_ms = 5000
//!
//! [emergency]
//! numbers = ["112", "911"]
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Sections and fields that are left out keep their defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SwitchboardError};
use crate::logging::LoggingConfig;
use crate::types::ComponentName;

/// Switchboard configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchboardConfig {
    /// Registry lookup configuration
    pub lookup: LookupConfig,

    /// New-call expiry configuration
    pub expiry: ExpiryConfig,

    /// Emergency routing configuration
    pub emergency: EmergencyConfig,

    /// Subscriber installed by [`crate::logging::setup_logging`]
    pub logging: LoggingConfig,
}

/// Registry lookup configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    /// Deadline for one provider lookup cycle
    pub provider_timeout_ms: u64,

    /// Deadline for one selector lookup cycle
    pub selector_timeout_ms: u64,

    /// Selector that is always ranked last
    pub fallback_selector: Option<ComponentName>,
}

/// New-call expiry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpiryConfig {
    /// Whether queued calls are swept at all
    pub sweep_enabled: bool,

    /// Interval between two sweeps
    pub sweep_interval_ms: u64,

    /// Age after which a call that is still new or pending is aborted
    pub new_call_budget_ms: u64,
}

/// Emergency routing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergencyConfig {
    /// Destinations that are routed over the PSTN provider only
    pub numbers: Vec<String>,
}

impl SwitchboardConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.lookup.provider_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_selector_timeout(mut self, timeout: Duration) -> Self {
        self.lookup.selector_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_fallback_selector(mut self, selector: Option<ComponentName>) -> Self {
        self.lookup.fallback_selector = selector;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.expiry.sweep_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_new_call_budget(mut self, budget: Duration) -> Self {
        self.expiry.new_call_budget_ms = budget.as_millis() as u64;
        self
    }

    pub fn with_sweep_enabled(mut self, enabled: bool) -> Self {
        self.expiry.sweep_enabled = enabled;
        self
    }

    pub fn with_emergency_numbers(mut self, numbers: Vec<String>) -> Self {
        self.emergency.numbers = numbers;
        self
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup.provider_timeout_ms)
    }

    pub fn selector_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup.selector_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.expiry.sweep_interval_ms)
    }

    pub fn new_call_budget(&self) -> Duration {
        Duration::from_millis(self.expiry.new_call_budget_ms)
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<()> {
        if self.lookup.provider_timeout_ms == 0 {
            return Err(SwitchboardError::config("provider_timeout_ms must be greater than 0"));
        }

        if self.lookup.selector_timeout_ms == 0 {
            return Err(SwitchboardError::config("selector_timeout_ms must be greater than 0"));
        }

        if self.expiry.sweep_interval_ms == 0 {
            return Err(SwitchboardError::config("sweep_interval_ms must be greater than 0"));
        }

        if self.expiry.new_call_budget_ms == 0 {
            return Err(SwitchboardError::config("new_call_budget_ms must be greater than 0"));
        }

        if self.expiry.sweep_interval_ms > self.expiry.new_call_budget_ms {
            return Err(SwitchboardError::config(format!(
                "sweep_interval_ms ({}) cannot exceed new_call_budget_ms ({})",
                self.expiry.sweep_interval_ms, self.expiry.new_call_budget_ms
            )));
        }

        if self.emergency.numbers.iter().any(|n| n.trim().is_empty()) {
            return Err(SwitchboardError::config("emergency numbers cannot be empty"));
        }

        self.logging.validate()
    }
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            provider_timeout_ms: 100,
            selector_timeout_ms: 100,
            fallback_selector: Some(ComponentName::new(
                "rvoip.telephony",
                "TelephonyCallSelector",
            )),
        }
    }
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            sweep_enabled: true,
            sweep_interval_ms: 250,
            new_call_budget_ms: 5000,
        }
    }
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            numbers: vec!["112".to_string(), "911".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SwitchboardConfig::default();
        assert_eq!(config.provider_timeout(), Duration::from_millis(100));
        assert_eq!(config.selector_timeout(), Duration::from_millis(100));
        assert_eq!(config.sweep_interval(), Duration::from_millis(250));
        assert_eq!(config.new_call_budget(), Duration::from_millis(5000));
        assert!(config.expiry.sweep_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SwitchboardConfig::from_toml_str(
            r#"
            [lookup]
            provider_timeout_ms = 250

            [emergency]
            numbers = ["999"]
            "#,
        )
        .unwrap();

        assert_eq!(config.lookup.provider_timeout_ms, 250);
        assert_eq!(config.lookup.selector_timeout_ms, 100);
        assert_eq!(config.emergency.numbers, vec!["999".to_string()]);
        assert_eq!(config.expiry, ExpiryConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = SwitchboardConfig::new().with_sweep_interval(Duration::ZERO);
        assert!(matches!(config.validate(), Err(SwitchboardError::Config(_))));

        let config = SwitchboardConfig::new()
            .with_sweep_interval(Duration::from_secs(10))
            .with_new_call_budget(Duration::from_secs(5));
        assert!(config.validate().is_err());

        let result = SwitchboardConfig::from_toml_str("[expiry]\nnew_call_budget_ms = 0\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_logging_section() {
        let config = SwitchboardConfig::from_toml_str("[logging]\nlevel = \"debug\"\nformat = \"json\"\n").unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, crate::logging::LogFormat::Json);

        let result = SwitchboardConfig::from_toml_str("[logging]\nlevel = \"chatty\"\n");
        assert!(matches!(result, Err(SwitchboardError::Config(_))));
    }

    #[test]
    fn test_malformed_toml() {
        let result = SwitchboardConfig::from_toml_str("[lookup\nprovider_timeout_ms = ");
        assert!(matches!(result, Err(SwitchboardError::ConfigParse(_))));
    }
}
