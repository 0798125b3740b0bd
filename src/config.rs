//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object `{}` is a valid configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of entries in a sequential pool
    #[serde(default = "default_sequential_capacity")]
    pub sequential_capacity: usize,

    /// Maximum number of sets in a rotating pool
    #[serde(default = "default_rotating_capacity")]
    pub rotating_capacity: usize,

    /// Maximum number of members per pseudonym set
    #[serde(default = "default_max_pseudonym_members")]
    pub max_pseudonym_members: usize,

    /// Maximum number of members per identification set
    #[serde(default = "default_max_identification_members")]
    pub max_identification_members: usize,

    /// Look-ahead used to report that the active rotating set is about to expire.
    /// Zero disables the check.
    #[serde(default)]
    pub signing_interval_ms: u64,

    /// Maximum number of records per revocation bucket
    #[serde(default = "default_revocation_bucket_capacity")]
    pub revocation_bucket_capacity: usize,

    #[serde(default)]
    pub precompute: PrecomputeConfig,

    /// Where revocation blobs are downloaded from
    #[serde(default)]
    pub crl_source: Option<SourceConfig>,

    /// Where certificate chain files are downloaded from
    #[serde(default)]
    pub chain_source: Option<SourceConfig>,

    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

/// Background refill of signing nonces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecomputeConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Number of (nonce, R) pairs the worker keeps ready
    #[serde(default = "default_precompute_target")]
    pub target: usize,

    #[serde(default = "default_wake_interval_ms")]
    pub wake_interval_ms: u64,
}

impl Default for PrecomputeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target: default_precompute_target(),
            wake_interval_ms: default_wake_interval_ms(),
        }
    }
}

/// Remote endpoint of an authenticated download
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceConfig {
    pub url: String,
    /// PEM or DER encoded root certificate the server must chain to
    pub pinned_root_path: PathBuf,
}

fn default_sequential_capacity() -> usize {
    32
}

fn default_rotating_capacity() -> usize {
    64
}

fn default_max_pseudonym_members() -> usize {
    20
}

fn default_max_identification_members() -> usize {
    4
}

fn default_revocation_bucket_capacity() -> usize {
    1024
}

fn default_precompute_target() -> usize {
    16
}

fn default_wake_interval_ms() -> u64 {
    100
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sequential_capacity: default_sequential_capacity(),
            rotating_capacity: default_rotating_capacity(),
            max_pseudonym_members: default_max_pseudonym_members(),
            max_identification_members: default_max_identification_members(),
            signing_interval_ms: 0,
            revocation_bucket_capacity: default_revocation_bucket_capacity(),
            precompute: PrecomputeConfig::default(),
            crl_source: None,
            chain_source: None,
            fetch_timeout_ms: default_fetch_timeout_ms(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid configuration: {e}")))?;
        config.check()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    #[must_use]
    pub fn fetch_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Member counts are encoded in a single byte in credential files
    pub(crate) fn check(&self) -> Result<()> {
        for (name, value) in [
            ("max_pseudonym_members", self.max_pseudonym_members),
            ("max_identification_members", self.max_identification_members),
        ] {
            if value == 0 || value > usize::from(u8::MAX) {
                return Err(Error::Config(format!("{name} must be in 1..=255, found {value}")));
            }
        }
        if self.sequential_capacity == 0 || self.rotating_capacity == 0 {
            return Err(Error::Config("pool capacities must be non-zero".into()));
        }
        if self.revocation_bucket_capacity == 0 {
            return Err(Error::Config(
                "revocation_bucket_capacity must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_object_yields_defaults() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config.sequential_capacity, 32);
        assert_eq!(config.max_pseudonym_members, 20);
        assert_eq!(config.max_identification_members, 4);
        assert_eq!(config.signing_interval_ms, 0);
        assert!(!config.precompute.enabled);
        assert!(config.crl_source.is_none());
    }

    #[test]
    fn parses_sources_and_overrides() {
        let json = r#"{
            "rotating_capacity": 8,
            "signing_interval_ms": 60000,
            "precompute": { "enabled": true, "target": 4 },
            "crl_source": { "url": "https://ra.example/crl", "pinned_root_path": "/etc/v2x/root.pem" }
        }"#;
        let config = EngineConfig::from_json(json).unwrap();
        assert_eq!(config.rotating_capacity, 8);
        assert_eq!(config.signing_interval_ms, 60_000);
        assert!(config.precompute.enabled);
        assert_eq!(config.precompute.target, 4);
        assert_eq!(config.precompute.wake_interval_ms, 100);
        assert_eq!(
            config.crl_source.unwrap().pinned_root_path,
            PathBuf::from("/etc/v2x/root.pem")
        );
    }

    #[test]
    fn rejects_zero_revocation_bucket_capacity() {
        let err =
            EngineConfig::from_json(r#"{ "revocation_bucket_capacity": 0 }"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.kind(), crate::ErrorKind::Malformed);
    }

    #[test]
    fn rejects_member_limits_beyond_one_byte() {
        let err = EngineConfig::from_json(r#"{ "max_pseudonym_members": 300 }"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "sequential_capacity": 3 }}"#).unwrap();
        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.sequential_capacity, 3);
    }
}
