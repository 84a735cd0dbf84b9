use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Result, Context};
use crate::error::SignError;

/// Where the unsigned packages are published
pub const DEFAULT_PACKAGE_BASE_URL: &str = "https://xenbits.xen.org/pvdrivers/win/";

/// Zip archive holding the cross-signing root certificate
pub const DEFAULT_CERTIFICATE_URL: &str = "http://download.microsoft.com/download/2/4/E/24E730E6-C012-448F-92B6-78744D3B77E1/DigiCert%20High%20Assurance%20EV%20Root%20CA.zip";

/// Name of the certificate entry inside the certificate archive
pub const DEFAULT_CERTIFICATE_NAME: &str = "DigiCert High Assurance EV Root CA.crt";

/// RFC3161 timestamp server
pub const DEFAULT_TIMESTAMP_URL: &str = "http://timestamp.digicert.com";

/// Digest used for both the file signature and the timestamp
pub const DEFAULT_DIGEST: &str = "sha256";

/// Signer configuration (optionally loaded from a YAML file)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    /// Base URL of the unsigned package repository
    pub package_base_url: String,
    /// URL of the zip archive containing the root certificate
    pub certificate_url: String,
    /// Certificate entry to extract from the archive
    pub certificate_name: String,
    /// RFC3161 timestamp server passed to the signing tool
    pub timestamp_url: String,
    /// Timestamp digest algorithm
    pub timestamp_digest: String,
    /// File digest algorithm
    pub file_digest: String,
    /// Extensions of signable files, in signing order
    pub extensions: Vec<String>,
    /// Explicit signing tool, bypassing KIT/PROCESSOR_ARCHITECTURE resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sign_tool: Option<PathBuf>,
    /// Keep going when the signing tool exits non-zero
    pub allow_sign_failure: bool,
}

fn default_extensions() -> Vec<String> {
    ["cat", "dll", "exe", "sys"].iter().map(|e| e.to_string()).collect()
}

impl Default for SignerConfig {
    fn default() -> Self {
        SignerConfig {
            package_base_url: DEFAULT_PACKAGE_BASE_URL.to_string(),
            certificate_url: DEFAULT_CERTIFICATE_URL.to_string(),
            certificate_name: DEFAULT_CERTIFICATE_NAME.to_string(),
            timestamp_url: DEFAULT_TIMESTAMP_URL.to_string(),
            timestamp_digest: DEFAULT_DIGEST.to_string(),
            file_digest: DEFAULT_DIGEST.to_string(),
            extensions: default_extensions(),
            sign_tool: None,
            allow_sign_failure: false,
        }
    }
}

impl SignerConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_yaml(&contents)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: SignerConfig = serde_yaml::from_str(yaml)
            .with_context(|| "Failed to parse config YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Convert configuration to YAML string
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .with_context(|| "Failed to serialize config to YAML")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("package_base_url", &self.package_base_url),
            ("certificate_url", &self.certificate_url),
            ("certificate_name", &self.certificate_name),
            ("timestamp_url", &self.timestamp_url),
            ("timestamp_digest", &self.timestamp_digest),
            ("file_digest", &self.file_digest),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(SignError::InvalidConfig(format!("{} cannot be empty", key)).into());
            }
        }

        if self.extensions.is_empty() {
            return Err(SignError::InvalidConfig("extensions cannot be empty".to_string()).into());
        }
        if let Some(bad) = self.extensions.iter().find(|e| e.is_empty() || e.contains('.')) {
            return Err(SignError::InvalidConfig(
                format!("extension {:?} must be a bare suffix like \"sys\"", bad),
            ).into());
        }

        // The certificate is written next to other run files; keep it a plain name
        if Path::new(&self.certificate_name).components().count() != 1 {
            return Err(SignError::InvalidConfig(
                format!("certificate_name must be a file name: {}", self.certificate_name),
            ).into());
        }

        Ok(())
    }

    /// URL of the unsigned `<name>.tar` for a given version
    pub fn package_url(&self, name: &str, version: &str) -> String {
        format!(
            "{}/{}/{}.tar",
            self.package_base_url.trim_end_matches('/'),
            version,
            name
        )
    }
}
