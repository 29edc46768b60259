//! Signer configuration.
//!
//! Settings are read from the `signer` section of a YAML file, then
//! overridden by `WEBBUNDLE_*` environment variables and finally by
//! command-line flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use webbundle_wire::DEFAULT_RECORD_SIZE;

/// Settings for `webbundle sign`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    /// PEM certificate chain, leaf first
    pub cert_file: Option<PathBuf>,
    /// PEM private key of the leaf certificate
    pub key_file: Option<PathBuf>,
    /// DER OCSP response for the leaf certificate
    pub ocsp_file: Option<PathBuf>,
    /// Serialized SCT list for the leaf certificate
    pub sct_file: Option<PathBuf>,
    /// Where updated signatures can be fetched
    pub validity_url: Option<String>,
    /// Signature lifetime in humantime syntax, e.g. `7days`
    pub expiry: String,
    /// MICE record size
    pub record_size: usize,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            cert_file: None,
            key_file: None,
            ocsp_file: None,
            sct_file: None,
            validity_url: None,
            expiry: "1day".to_string(),
            record_size: DEFAULT_RECORD_SIZE,
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    signer: Option<SignerConfig>,
}

impl SignerConfig {
    /// Load the `signer` section of a YAML file and apply environment overrides
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let root: RootConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        info!("Loaded configuration from {:?}", path);

        let mut config = root.signer.unwrap_or_default();
        config.apply_environment_overrides();
        Ok(config)
    }

    /// Defaults plus environment overrides, for runs without a config file
    pub fn from_environment() -> Self {
        let mut config = Self::default();
        config.apply_environment_overrides();
        config
    }

    /// Parsed signature lifetime
    pub fn expiry(&self) -> Result<Duration> {
        humantime::parse_duration(&self.expiry)
            .with_context(|| format!("invalid expiry {:?}", self.expiry))
    }

    /// Apply environment variable overrides
    pub fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("WEBBUNDLE_CERT_FILE") {
            info!("Certificate file overridden by environment: {}", path);
            self.cert_file = Some(path.into());
        }
        if let Some(path) = lookup("WEBBUNDLE_KEY_FILE") {
            info!("Key file overridden by environment: {}", path);
            self.key_file = Some(path.into());
        }
        if let Some(path) = lookup("WEBBUNDLE_OCSP_FILE") {
            self.ocsp_file = Some(path.into());
        }
        if let Some(path) = lookup("WEBBUNDLE_SCT_FILE") {
            self.sct_file = Some(path.into());
        }
        if let Some(url) = lookup("WEBBUNDLE_VALIDITY_URL") {
            info!("Validity URL overridden by environment: {}", url);
            self.validity_url = Some(url);
        }
        if let Some(expiry) = lookup("WEBBUNDLE_EXPIRY") {
            self.expiry = expiry;
        }
        if let Some(record_size) = lookup("WEBBUNDLE_RECORD_SIZE") {
            if let Ok(size) = record_size.parse::<usize>() {
                self.record_size = size;
            }
        }
    }
}
