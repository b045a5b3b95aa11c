// crates/fleetup-server/src/config.rs
// ============================================================================
// Module: Server Configuration
// Description: Configuration loading and validation for the Fleetup server.
// Purpose: Provide strict, fail-closed config parsing with env overrides.
// Dependencies: serde, thiserror, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file and overridden by environment
//! variables with the `FLEETUP_` prefix, mapping dots to underscores
//! (`storage.bucket` → `FLEETUP_STORAGE_BUCKET`). Every section validates
//! fail-closed before the process serves traffic.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use fleetup_core::ports::object_store::MAX_PRESIGN_TTL;
use fleetup_core::ports::object_store::MIN_PRESIGN_TTL;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "fleetup.toml";
/// Environment variable used to override the config path.
const CONFIG_ENV_VAR: &str = "FLEETUP_CONFIG";
/// Environment variable prefix for key overrides.
const ENV_PREFIX: &str = "FLEETUP_";
/// Maximum configuration file size in bytes.
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;
/// Default HTTP bind address.
const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
/// Default ingestion size cap: 10 GiB.
const DEFAULT_MAX_IMAGE_SIZE: u64 = 10 * 1024 * 1024 * 1024;
/// Default presigned download TTL in seconds.
const DEFAULT_DOWNLOAD_EXPIRE_SECONDS: u64 = 900;
/// Default presigned direct-upload TTL in seconds.
const DEFAULT_UPLOAD_EXPIRE_SECONDS: u64 = 3_600;
/// Default storage-daemon scan interval in seconds.
const DEFAULT_DAEMON_INTERVAL_SECONDS: u64 = 300;
/// Default storage-daemon expiry grace jitter in seconds.
const DEFAULT_DAEMON_JITTER_SECONDS: u64 = 60;
/// Default SQLite database path.
const DEFAULT_STORE_PATH: &str = "fleetup.db";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("config read failed: {0}")]
    Read(String),
    /// The file could not be parsed.
    #[error("config parse failed: {0}")]
    Parse(String),
    /// A value failed validation.
    #[error("config invalid: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Sections
// ============================================================================

/// TLS material for HTTPS serving.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpsConfig {
    /// PEM certificate chain path.
    #[serde(default)]
    pub certificate: String,
    /// PEM private key path.
    #[serde(default)]
    pub key: String,
}

impl HttpsConfig {
    /// True when TLS serving is requested.
    #[must_use]
    pub fn enabled(&self) -> bool {
        !self.certificate.is_empty() || !self.key.is_empty()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled() && (self.certificate.is_empty() || self.key.is_empty()) {
            return Err(ConfigError::Invalid(
                "https requires both certificate and key".to_string(),
            ));
        }
        Ok(())
    }
}

/// Object-storage section.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend selector (`storage.default` on the wire); only `aws` is
    /// implemented.
    #[serde(default = "default_storage_backend", alias = "default")]
    pub backend: String,
    /// Bucket (container) name.
    #[serde(default)]
    pub bucket: String,
    /// Ingestion size cap in bytes.
    #[serde(default = "default_max_image_size")]
    pub max_image_size: u64,
    /// Presigned download TTL in seconds.
    #[serde(default = "default_download_expire")]
    pub download_expire_seconds: u64,
    /// Presigned direct-upload TTL in seconds.
    #[serde(default = "default_upload_expire")]
    pub upload_expire_seconds: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            bucket: String::new(),
            max_image_size: default_max_image_size(),
            download_expire_seconds: default_download_expire(),
            upload_expire_seconds: default_upload_expire(),
        }
    }
}

impl StorageConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.backend != "aws" {
            return Err(ConfigError::Invalid(format!(
                "unsupported storage backend: {}",
                self.backend
            )));
        }
        if self.max_image_size == 0 {
            return Err(ConfigError::Invalid("max_image_size must be positive".to_string()));
        }
        for (key, seconds) in [
            ("download_expire_seconds", self.download_expire_seconds),
            ("upload_expire_seconds", self.upload_expire_seconds),
        ] {
            let ttl = Duration::from_secs(seconds);
            if ttl < MIN_PRESIGN_TTL || ttl > MAX_PRESIGN_TTL {
                return Err(ConfigError::Invalid(format!(
                    "{key} must be within {}..{} seconds",
                    MIN_PRESIGN_TTL.as_secs(),
                    MAX_PRESIGN_TTL.as_secs()
                )));
            }
        }
        Ok(())
    }

    /// Presigned download TTL as a duration.
    #[must_use]
    pub const fn download_ttl(&self) -> Duration {
        Duration::from_secs(self.download_expire_seconds)
    }

    /// Presigned direct-upload TTL as a duration.
    #[must_use]
    pub const fn upload_ttl(&self) -> Duration {
        Duration::from_secs(self.upload_expire_seconds)
    }
}

/// AWS/S3-compatible backend settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AwsConfig {
    /// Region name.
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint URL for S3-compatible stores.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Force path-style addressing.
    #[serde(default)]
    pub force_path_style: bool,
    /// Static access key id; environment credentials are used when unset.
    #[serde(default)]
    pub access_key_id: Option<String>,
    /// Static secret access key.
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

impl AwsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            return Err(ConfigError::Invalid(
                "aws credentials require both access_key_id and secret_access_key".to_string(),
            ));
        }
        Ok(())
    }
}

/// Metadata store section.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Gateway-wrapped presign section.
#[derive(Debug, Clone, Deserialize)]
pub struct PresignConfig {
    /// Base64 signing secret; generated at startup when empty.
    #[serde(default)]
    pub secret: String,
    /// Wrapped-link TTL in seconds.
    #[serde(default = "default_download_expire")]
    pub expire_seconds: u64,
    /// Public hostname devices reach the gateway on; enables wrapping.
    #[serde(default)]
    pub url_hostname: String,
    /// Public scheme of the wrapped URL.
    #[serde(default = "default_presign_scheme")]
    pub url_scheme: String,
}

impl Default for PresignConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            expire_seconds: default_download_expire(),
            url_hostname: String::new(),
            url_scheme: default_presign_scheme(),
        }
    }
}

impl PresignConfig {
    /// True when gateway-wrapped URLs are enabled.
    #[must_use]
    pub fn enabled(&self) -> bool {
        !self.url_hostname.is_empty()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.url_scheme.as_str(), "http" | "https") {
            return Err(ConfigError::Invalid("presign url_scheme must be http or https".to_string()));
        }
        let ttl = Duration::from_secs(self.expire_seconds);
        if ttl < MIN_PRESIGN_TTL || ttl > MAX_PRESIGN_TTL {
            return Err(ConfigError::Invalid(format!(
                "presign expire_seconds must be within {}..{} seconds",
                MIN_PRESIGN_TTL.as_secs(),
                MAX_PRESIGN_TTL.as_secs()
            )));
        }
        Ok(())
    }
}

/// Storage-daemon section.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageDaemonConfig {
    /// Scan interval in seconds.
    #[serde(default = "default_daemon_interval")]
    pub interval_seconds: u64,
    /// Expiry grace jitter in seconds.
    #[serde(default = "default_daemon_jitter")]
    pub time_jitter_seconds: u64,
}

impl Default for StorageDaemonConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_daemon_interval(),
            time_jitter_seconds: default_daemon_jitter(),
        }
    }
}

impl StorageDaemonConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "storage_daemon interval_seconds must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Root Configuration
// ============================================================================

/// Fleetup server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FleetupConfig {
    /// HTTP bind address.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// TLS material.
    #[serde(default)]
    pub https: HttpsConfig,
    /// Object-storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// AWS backend settings.
    #[serde(default)]
    pub aws: AwsConfig,
    /// Metadata store settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Workflows service base URL.
    #[serde(default)]
    pub workflows_addr: String,
    /// Inventory service base URL.
    #[serde(default)]
    pub inventory_addr: String,
    /// Reporting service base URL; optional.
    #[serde(default)]
    pub reporting_addr: String,
    /// Gateway-wrapped presign settings.
    #[serde(default)]
    pub presign: PresignConfig,
    /// Storage-daemon settings.
    #[serde(default)]
    pub storage_daemon: StorageDaemonConfig,
}

impl FleetupConfig {
    /// Loads configuration from the resolved file plus env overrides.
    ///
    /// Resolution order: explicit `path` argument, the `FLEETUP_CONFIG`
    /// environment variable, then `fleetup.toml` in the working directory
    /// (missing default file yields built-in defaults).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on unreadable, unparsable, or invalid input.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from);
        let resolved = path.map(Path::to_path_buf).or(env_path);
        let mut config = match resolved {
            Some(path) => Self::from_file(&path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_NAME);
                if default.exists() { Self::from_file(default)? } else { Self::default_config() }
            }
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parses one TOML file.
    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let metadata =
            fs::metadata(path).map_err(|err| ConfigError::Read(format!("{}: {err}", path.display())))?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Read("config file exceeds size limit".to_string()));
        }
        let raw = fs::read_to_string(path)
            .map_err(|err| ConfigError::Read(format!("{}: {err}", path.display())))?;
        toml::from_str(&raw).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Built-in defaults when no file is present.
    #[must_use]
    pub fn default_config() -> Self {
        Self {
            listen: default_listen(),
            ..Self::default()
        }
    }

    /// Applies `FLEETUP_*` environment overrides (dots map to underscores).
    fn apply_env_overrides(&mut self) {
        override_string(&mut self.listen, "LISTEN");
        override_string(&mut self.https.certificate, "HTTPS_CERTIFICATE");
        override_string(&mut self.https.key, "HTTPS_KEY");
        override_string(&mut self.storage.backend, "STORAGE_DEFAULT");
        override_string(&mut self.storage.bucket, "STORAGE_BUCKET");
        override_u64(&mut self.storage.max_image_size, "STORAGE_MAX_IMAGE_SIZE");
        override_u64(&mut self.storage.download_expire_seconds, "STORAGE_DOWNLOAD_EXPIRE_SECONDS");
        override_u64(&mut self.storage.upload_expire_seconds, "STORAGE_UPLOAD_EXPIRE_SECONDS");
        override_option(&mut self.aws.region, "AWS_REGION");
        override_option(&mut self.aws.endpoint, "AWS_ENDPOINT");
        override_bool(&mut self.aws.force_path_style, "AWS_FORCE_PATH_STYLE");
        override_option(&mut self.aws.access_key_id, "AWS_ACCESS_KEY_ID");
        override_option(&mut self.aws.secret_access_key, "AWS_SECRET_ACCESS_KEY");
        if let Some(value) = env_value("STORE_PATH") {
            self.store.path = PathBuf::from(value);
        }
        override_string(&mut self.workflows_addr, "WORKFLOWS_ADDR");
        override_string(&mut self.inventory_addr, "INVENTORY_ADDR");
        override_string(&mut self.reporting_addr, "REPORTING_ADDR");
        override_string(&mut self.presign.secret, "PRESIGN_SECRET");
        override_u64(&mut self.presign.expire_seconds, "PRESIGN_EXPIRE_SECONDS");
        override_string(&mut self.presign.url_hostname, "PRESIGN_URL_HOSTNAME");
        override_string(&mut self.presign.url_scheme, "PRESIGN_URL_SCHEME");
        override_u64(&mut self.storage_daemon.interval_seconds, "STORAGE_DAEMON_INTERVAL_SECONDS");
        override_u64(
            &mut self.storage_daemon.time_jitter_seconds,
            "STORAGE_DAEMON_TIME_JITTER_SECONDS",
        );
    }

    /// Validates every section fail-closed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::Invalid(format!("listen address invalid: {}", self.listen)))?;
        self.https.validate()?;
        self.storage.validate()?;
        self.aws.validate()?;
        self.presign.validate()?;
        self.storage_daemon.validate()?;
        for (key, value) in [
            ("workflows_addr", &self.workflows_addr),
            ("inventory_addr", &self.inventory_addr),
            ("reporting_addr", &self.reporting_addr),
        ] {
            if !value.is_empty() && url::Url::parse(value).is_err() {
                return Err(ConfigError::Invalid(format!("{key} is not a valid url: {value}")));
            }
        }
        Ok(())
    }

    /// Parsed bind address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the address does not parse.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("listen address invalid: {}", self.listen)))
    }
}

// ============================================================================
// SECTION: Override Helpers
// ============================================================================

/// Reads one prefixed environment value.
fn env_value(key: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{key}")).ok().filter(|value| !value.is_empty())
}

/// Overrides a string field from the environment.
fn override_string(slot: &mut String, key: &str) {
    if let Some(value) = env_value(key) {
        *slot = value;
    }
}

/// Overrides an optional string field from the environment.
fn override_option(slot: &mut Option<String>, key: &str) {
    if let Some(value) = env_value(key) {
        *slot = Some(value);
    }
}

/// Overrides a numeric field from the environment; ignores junk values.
fn override_u64(slot: &mut u64, key: &str) {
    if let Some(value) = env_value(key)
        && let Ok(parsed) = value.parse()
    {
        *slot = parsed;
    }
}

/// Overrides a boolean field from the environment.
fn override_bool(slot: &mut bool, key: &str) {
    if let Some(value) = env_value(key) {
        *slot = matches!(value.as_str(), "1" | "true" | "yes");
    }
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

fn default_storage_backend() -> String {
    "aws".to_string()
}

const fn default_max_image_size() -> u64 {
    DEFAULT_MAX_IMAGE_SIZE
}

const fn default_download_expire() -> u64 {
    DEFAULT_DOWNLOAD_EXPIRE_SECONDS
}

const fn default_upload_expire() -> u64 {
    DEFAULT_UPLOAD_EXPIRE_SECONDS
}

fn default_store_path() -> PathBuf {
    PathBuf::from(DEFAULT_STORE_PATH)
}

fn default_presign_scheme() -> String {
    "https".to_string()
}

const fn default_daemon_interval() -> u64 {
    DEFAULT_DAEMON_INTERVAL_SECONDS
}

const fn default_daemon_jitter() -> u64 {
    DEFAULT_DAEMON_JITTER_SECONDS
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::FleetupConfig;

    #[test]
    fn defaults_validate() {
        let config = FleetupConfig::default_config();
        config.validate().expect("defaults are valid");
        assert_eq!(config.listen, "0.0.0.0:8080");
        assert_eq!(config.storage.max_image_size, 10 * 1024 * 1024 * 1024);
    }

    #[test]
    fn toml_sections_parse() {
        let raw = r#"
listen = "127.0.0.1:9000"

[storage]
bucket = "fleetup-artifacts"
download_expire_seconds = 600

[aws]
region = "eu-west-1"
force_path_style = true

[presign]
url_hostname = "gateway.example.com"
"#;
        let config: FleetupConfig = toml::from_str(raw).expect("parse");
        config.validate().expect("valid");
        assert_eq!(config.listen, "127.0.0.1:9000");
        assert_eq!(config.storage.bucket, "fleetup-artifacts");
        assert!(config.aws.force_path_style);
        assert!(config.presign.enabled());
    }

    #[test]
    fn out_of_range_presign_ttl_is_rejected() {
        let raw = r#"
[storage]
download_expire_seconds = 10
"#;
        let config: FleetupConfig = toml::from_str(raw).expect("parse");
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_listen_survives_empty_toml() {
        let config: FleetupConfig = toml::from_str("").expect("parse");
        assert_eq!(config.listen, "0.0.0.0:8080");
    }

    #[test]
    fn lopsided_aws_credentials_are_rejected() {
        let raw = r#"
[aws]
access_key_id = "AKIA"
"#;
        let config: FleetupConfig = toml::from_str(raw).expect("parse");
        assert!(config.validate().is_err());
    }
}
