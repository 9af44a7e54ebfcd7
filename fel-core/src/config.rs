//! Endpoint configuration, loaded from a `.properties` file with environment overrides.
use java_properties::read;
use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

use crate::invoice::Nit;

/// Public SAT verifier used to build QR verification URLs.
pub const DEFAULT_QR_VERIFICATION_URL: &str =
    "https://felpub.c.sat.gob.gt/verificador-web/publico/vistas/verificacionDte.jsf";

/// Notification address used when neither the invoice, the configuration nor the
/// company supply one.
pub const DEFAULT_NOTIFICATION_EMAIL: &str = "facturacion@localhost";

pub const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CERTIFY_TIMEOUT: Duration = Duration::from_secs(60);

const KEY_TOKEN_URL: &str = "fel.token.url";
const KEY_CERTIFY_URL: &str = "fel.certify.url";
const KEY_NIT_URL: &str = "fel.nit.validation.url";
const KEY_QR_URL: &str = "fel.qr.verification.url";
const KEY_PERMITTED: &str = "fel.permitted.nits";
const KEY_ERROR_EMAIL: &str = "fel.error.email";
const KEY_TOKEN_TIMEOUT: &str = "fel.timeout.token.secs";
const KEY_CERTIFY_TIMEOUT: &str = "fel.timeout.certify.secs";

const ENV_TOKEN_URL: &str = "FEL_TOKEN_URL";
const ENV_CERTIFY_URL: &str = "FEL_CERTIFY_URL";
const ENV_NIT_URL: &str = "FEL_NIT_VALIDATION_URL";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to open FEL config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse FEL properties from '{path}': {source}")]
    PropertiesRead {
        path: PathBuf,
        #[source]
        source: java_properties::PropertiesError,
    },

    #[error("missing required FEL property '{key}'")]
    MissingProperty { key: String },

    #[error("invalid value '{value}' for FEL property '{key}'")]
    InvalidValue { key: String, value: String },

    #[error("validation error: {message}")]
    Validation { message: String },
}

impl From<String> for ConfigError {
    fn from(message: String) -> Self {
        ConfigError::Validation { message }
    }
}

/// Endpoints and policy for talking to the certifier.
///
/// # Examples
/// ```rust
/// use std::time::Duration;
/// use fel_core::config::FelConfig;
///
/// let config = FelConfig::new("https://fel.example/token", "https://fel.example/certify")
///     .with_permitted_nits(["1234567-8"])
///     .with_error_email("contabilidad@example.com")
///     .with_timeouts(Duration::from_secs(5), Duration::from_secs(30));
/// assert!(config.is_permitted("12345678"));
/// assert!(!config.is_permitted("999"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FelConfig {
    token_url: String,
    certify_url: String,
    nit_validation_url: Option<String>,
    qr_verification_url: String,
    permitted_nits: Vec<String>,
    error_email: Option<String>,
    token_timeout: Duration,
    certify_timeout: Duration,
}

impl FelConfig {
    pub fn new(token_url: impl Into<String>, certify_url: impl Into<String>) -> Self {
        Self {
            token_url: token_url.into(),
            certify_url: certify_url.into(),
            nit_validation_url: None,
            qr_verification_url: DEFAULT_QR_VERIFICATION_URL.to_string(),
            permitted_nits: Vec::new(),
            error_email: None,
            token_timeout: DEFAULT_TOKEN_TIMEOUT,
            certify_timeout: DEFAULT_CERTIFY_TIMEOUT,
        }
    }

    pub fn with_nit_validation_url(mut self, url: impl Into<String>) -> Self {
        self.nit_validation_url = Some(url.into());
        self
    }

    pub fn with_qr_verification_url(mut self, url: impl Into<String>) -> Self {
        self.qr_verification_url = url.into();
        self
    }

    pub fn with_permitted_nits<I, S>(mut self, nits: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.permitted_nits = nits
            .into_iter()
            .map(|nit| Nit::normalize(nit.as_ref()))
            .filter(|nit| !nit.is_empty())
            .collect();
        self
    }

    pub fn with_error_email(mut self, email: impl Into<String>) -> Self {
        self.error_email = Some(email.into());
        self
    }

    pub fn with_timeouts(mut self, token: Duration, certify: Duration) -> Self {
        self.token_timeout = token;
        self.certify_timeout = certify;
        self
    }

    /// Load a properties file and apply `FEL_*` environment overrides.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when the file cannot be read or a required key is missing.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let pathbuf = path.to_path_buf();
        let file = File::open(path).map_err(|e| ConfigError::Io {
            path: pathbuf.clone(),
            source: e,
        })?;
        Self::from_reader(BufReader::new(file), &pathbuf)
    }

    /// Parse properties from any reader; `origin` is only used in error messages.
    pub fn from_reader<R: Read>(reader: R, origin: &Path) -> Result<Self, ConfigError> {
        let mut props = read(reader).map_err(|e| ConfigError::PropertiesRead {
            path: origin.to_path_buf(),
            source: e,
        })?;
        apply_env_overrides(&mut props);
        Self::from_properties(&props)
    }

    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |key: &str| -> Option<String> {
            props
                .get(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let req = |key: &str| -> Result<String, ConfigError> {
            get(key).ok_or_else(|| ConfigError::MissingProperty {
                key: key.to_string(),
            })
        };
        let secs = |key: &str, default: Duration| -> Result<Duration, ConfigError> {
            match get(key) {
                None => Ok(default),
                Some(value) => value
                    .parse::<u64>()
                    .ok()
                    .filter(|secs| *secs > 0)
                    .map(Duration::from_secs)
                    .ok_or(ConfigError::InvalidValue {
                        key: key.to_string(),
                        value,
                    }),
            }
        };

        let mut config = FelConfig::new(req(KEY_TOKEN_URL)?, req(KEY_CERTIFY_URL)?).with_timeouts(
            secs(KEY_TOKEN_TIMEOUT, DEFAULT_TOKEN_TIMEOUT)?,
            secs(KEY_CERTIFY_TIMEOUT, DEFAULT_CERTIFY_TIMEOUT)?,
        );
        if let Some(url) = get(KEY_NIT_URL) {
            config = config.with_nit_validation_url(url);
        }
        if let Some(url) = get(KEY_QR_URL) {
            config = config.with_qr_verification_url(url);
        }
        if let Some(list) = get(KEY_PERMITTED) {
            config = config.with_permitted_nits(list.split(','));
        }
        if let Some(email) = get(KEY_ERROR_EMAIL) {
            config = config.with_error_email(email);
        }
        Ok(config)
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    pub fn certify_url(&self) -> &str {
        &self.certify_url
    }

    pub fn nit_validation_url(&self) -> Option<&str> {
        self.nit_validation_url.as_deref()
    }

    pub fn qr_verification_url(&self) -> &str {
        &self.qr_verification_url
    }

    pub fn permitted_nits(&self) -> &[String] {
        &self.permitted_nits
    }

    pub fn error_email(&self) -> Option<&str> {
        self.error_email.as_deref()
    }

    pub fn token_timeout(&self) -> Duration {
        self.token_timeout
    }

    pub fn certify_timeout(&self) -> Duration {
        self.certify_timeout
    }

    /// An empty list permits every company.
    pub fn is_permitted(&self, nit: &str) -> bool {
        if self.permitted_nits.is_empty() {
            return true;
        }
        let nit = Nit::normalize(nit);
        self.permitted_nits.iter().any(|allowed| *allowed == nit)
    }
}

fn apply_env_overrides(props: &mut HashMap<String, String>) {
    for (env, key) in [
        (ENV_TOKEN_URL, KEY_TOKEN_URL),
        (ENV_CERTIFY_URL, KEY_CERTIFY_URL),
        (ENV_NIT_URL, KEY_NIT_URL),
    ] {
        if let Some(value) = std::env::var(env).ok().filter(|v| !v.trim().is_empty()) {
            props.insert(key.to_string(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    const SAMPLE: &str = "\
fel.token.url=https://fel.example/login
fel.certify.url=https://fel.example/certify
fel.nit.validation.url=https://fel.example/nit
fel.permitted.nits=1234567-8, 576937K
fel.error.email=errores@example.com
fel.timeout.certify.secs=45
";

    #[test]
    fn parses_properties_with_defaults() {
        let _lock = env_lock().lock().unwrap_or_else(|e| e.into_inner());
        let config = FelConfig::from_reader(SAMPLE.as_bytes(), Path::new("sample")).expect("config");

        assert_eq!(config.token_url(), "https://fel.example/login");
        assert_eq!(config.certify_url(), "https://fel.example/certify");
        assert_eq!(config.nit_validation_url(), Some("https://fel.example/nit"));
        assert_eq!(config.qr_verification_url(), DEFAULT_QR_VERIFICATION_URL);
        assert_eq!(config.permitted_nits(), ["12345678", "576937K"]);
        assert_eq!(config.error_email(), Some("errores@example.com"));
        assert_eq!(config.token_timeout(), DEFAULT_TOKEN_TIMEOUT);
        assert_eq!(config.certify_timeout(), Duration::from_secs(45));
        assert!(config.is_permitted("1234567-8"));
        assert!(config.is_permitted("576937k"));
        assert!(!config.is_permitted("1111111"));
    }

    #[test]
    fn missing_required_url_is_reported() {
        let _lock = env_lock().lock().unwrap_or_else(|e| e.into_inner());
        let err = FelConfig::from_reader(
            "fel.token.url=https://fel.example/login\n".as_bytes(),
            Path::new("sample"),
        )
        .expect_err("missing certify url");
        match err {
            ConfigError::MissingProperty { key } => assert_eq!(key, "fel.certify.url"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rejects_zero_timeout() {
        let _lock = env_lock().lock().unwrap_or_else(|e| e.into_inner());
        let props = format!("{SAMPLE}fel.timeout.token.secs=0\n");
        let err = FelConfig::from_reader(props.as_bytes(), Path::new("sample")).expect_err("zero");
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn environment_overrides_file_values() {
        let _lock = env_lock().lock().unwrap_or_else(|e| e.into_inner());
        unsafe {
            std::env::set_var(ENV_CERTIFY_URL, "http://127.0.0.1:9/certify");
        }
        let config = FelConfig::from_reader(SAMPLE.as_bytes(), Path::new("sample"));
        unsafe {
            std::env::remove_var(ENV_CERTIFY_URL);
        }
        assert_eq!(config.expect("config").certify_url(), "http://127.0.0.1:9/certify");
    }

    #[test]
    fn load_reports_missing_file() {
        let err = FelConfig::load(Path::new("/definitely/not/here.properties")).expect_err("io");
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn empty_permitted_list_allows_everyone() {
        let config = FelConfig::new("a", "b");
        assert!(config.is_permitted("anything"));
    }
}
