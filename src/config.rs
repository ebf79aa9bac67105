use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::directive::{self, DirectiveError};
use crate::rate_limit::Limits;

pub const DEFAULT_VERIFY_PATH: &str = "/api/v1/user";
pub const DEFAULT_COOKIE_NAME: &str = "i_like_gitea";
pub const DEFAULT_LIMIT: u32 = 100;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_TRUSTED_FOR: Duration = Duration::from_secs(6 * 60 * 60);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_VERIFY_COOLDOWN: Duration = Duration::from_secs(10);

// CLI argument structure
#[derive(Parser, Debug, Clone)]
#[command(name = "gitea-ip-limit")]
#[command(about = "Per-IP rate limiting gateway that lifts limits for verified Gitea users")]
pub struct Args {
    // Port the gateway listens on
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    // Port for /health and /metrics
    #[arg(long, default_value_t = 9090)]
    pub admin_port: u16,

    // Protected application, e.g. "http://127.0.0.1:3000"
    #[arg(short, long)]
    pub upstream: String,

    // Gate config: *.json for the structured form, anything else is read as directives
    #[arg(short, long)]
    pub config: PathBuf,

    // Emit logs as JSON lines
    #[arg(long, default_value_t = false)]
    pub json_logs: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Directive(#[from] DirectiveError),
    #[error("gitea_url is required")]
    MissingGiteaUrl,
    #[error("invalid gitea_url {url:?}: {reason}")]
    InvalidGiteaUrl { url: String, reason: String },
    #[error("{0} must be > 0")]
    NotPositive(&'static str),
    #[error("failed to build verification client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Settings of the admission gate.
///
/// Both the JSON form and the directive file deserialize into this struct;
/// missing keys fall back to the defaults above.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GateConfig {
    pub gitea_url: String,
    pub verify_path: String,
    pub cookie_name: String,
    /// Whether a valid `Authorization` header (basic auth or token) can also lift the limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust_authorization: Option<bool>,
    /// Minimum spacing between verification calls for one IP.
    #[serde(
        with = "duration_format::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub verify_cooldown: Option<Duration>,
    pub limit: u32,
    #[serde(with = "duration_format")]
    pub window: Duration,
    #[serde(with = "duration_format")]
    pub trusted_for: Duration,
    #[serde(with = "duration_format")]
    pub timeout: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            gitea_url: String::new(),
            verify_path: DEFAULT_VERIFY_PATH.to_string(),
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            trust_authorization: None,
            verify_cooldown: None,
            limit: DEFAULT_LIMIT,
            window: DEFAULT_WINDOW,
            trusted_for: DEFAULT_TRUSTED_FOR,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl GateConfig {
    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config = if is_json {
            Self::from_json(&text)?
        } else {
            directive::parse(&text)?
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gitea_url.trim().is_empty() {
            return Err(ConfigError::MissingGiteaUrl);
        }
        let invalid = |reason: String| ConfigError::InvalidGiteaUrl {
            url: self.gitea_url.clone(),
            reason,
        };
        let url = Url::parse(&self.gitea_url).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(invalid("expected an absolute http(s) URL".to_string()));
        }

        if self.limit == 0 {
            return Err(ConfigError::NotPositive("limit"));
        }
        if self.window.is_zero() {
            return Err(ConfigError::NotPositive("window"));
        }
        if self.trusted_for.is_zero() {
            return Err(ConfigError::NotPositive("trusted_for"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::NotPositive("timeout"));
        }
        Ok(())
    }

    /// `gitea_url` joined with `verify_path`.
    pub fn verify_endpoint(&self) -> Result<Url, ConfigError> {
        let base = self.gitea_url.trim_end_matches('/');
        let joined = if self.verify_path.starts_with('/') {
            format!("{}{}", base, self.verify_path)
        } else {
            format!("{}/{}", base, self.verify_path)
        };
        Url::parse(&joined).map_err(|e| ConfigError::InvalidGiteaUrl {
            url: joined,
            reason: e.to_string(),
        })
    }

    pub fn trusts_authorization(&self) -> bool {
        self.trust_authorization.unwrap_or(false)
    }

    pub fn cooldown(&self) -> Duration {
        self.verify_cooldown.unwrap_or(DEFAULT_VERIFY_COOLDOWN)
    }

    pub fn limits(&self) -> Limits {
        Limits {
            limit: self.limit,
            window: self.window,
            trusted_for: self.trusted_for,
            verify_cooldown: self.cooldown(),
        }
    }
}

// "5m", "1h 30m", "250ms"
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    humantime::parse_duration(text.trim()).map_err(|e| e.to_string())
}

pub fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

// Durations are written as humantime strings; integers are read as nanoseconds
mod duration_format {
    use serde::{Deserialize, Deserializer, Serializer, de};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Nanos(u64),
        Text(String),
    }

    fn from_raw<E: de::Error>(raw: Raw) -> Result<Duration, E> {
        match raw {
            Raw::Nanos(nanos) => Ok(Duration::from_nanos(nanos)),
            Raw::Text(text) => super::parse_duration(&text).map_err(E::custom),
        }
    }

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        from_raw(Raw::deserialize(deserializer)?)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(duration) => super::serialize(duration, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<Raw>::deserialize(deserializer)?
                .map(from_raw)
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> GateConfig {
        GateConfig {
            gitea_url: "https://git.example.com".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = GateConfig::default();
        assert_eq!(config.verify_path, "/api/v1/user");
        assert_eq!(config.cookie_name, "i_like_gitea");
        assert_eq!(config.limit, 100);
        assert_eq!(config.window, Duration::from_secs(300));
        assert_eq!(config.trusted_for, Duration::from_secs(21600));
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert!(!config.trusts_authorization());
        assert_eq!(config.cooldown(), DEFAULT_VERIFY_COOLDOWN);
    }

    #[test]
    fn validate_requires_gitea_url() {
        let err = GateConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingGiteaUrl));
    }

    #[test]
    fn validate_rejects_malformed_gitea_url() {
        for bad in ["git.example.com", "/relative/path", "ftp://git.example.com", "http://"] {
            let config = GateConfig {
                gitea_url: bad.to_string(),
                ..Default::default()
            };
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidGiteaUrl { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn validate_rejects_non_positive_settings() {
        let cases: [(GateConfig, &str); 4] = [
            (GateConfig { limit: 0, ..valid() }, "limit"),
            (GateConfig { window: Duration::ZERO, ..valid() }, "window"),
            (GateConfig { trusted_for: Duration::ZERO, ..valid() }, "trusted_for"),
            (GateConfig { timeout: Duration::ZERO, ..valid() }, "timeout"),
        ];
        for (config, field) in cases {
            match config.validate() {
                Err(ConfigError::NotPositive(name)) => assert_eq!(name, field),
                other => panic!("expected {field} to be rejected, got {other:?}"),
            }
        }
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn verify_endpoint_joins_base_and_path() {
        let mut config = GateConfig {
            gitea_url: "https://git.example.com/gitea/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.verify_endpoint().unwrap().as_str(),
            "https://git.example.com/gitea/api/v1/user"
        );

        config.verify_path = "api/v1/user".to_string();
        assert_eq!(
            config.verify_endpoint().unwrap().as_str(),
            "https://git.example.com/gitea/api/v1/user"
        );
    }

    #[test]
    fn json_config_accepts_strings_and_nanoseconds() {
        let config = GateConfig::from_json(
            r#"{
                "gitea_url": "http://gitea.local:3000",
                "trust_authorization": true,
                "verify_cooldown": "30s",
                "limit": 20,
                "window": "1m",
                "trusted_for": 3600000000000
            }"#,
        )
        .unwrap();

        assert_eq!(config.gitea_url, "http://gitea.local:3000");
        assert!(config.trusts_authorization());
        assert_eq!(config.cooldown(), Duration::from_secs(30));
        assert_eq!(config.limit, 20);
        assert_eq!(config.window, Duration::from_secs(60));
        assert_eq!(config.trusted_for, Duration::from_secs(3600));
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.cookie_name, DEFAULT_COOKIE_NAME);
    }

    #[test]
    fn serialized_durations_are_readable() {
        let value = serde_json::to_value(valid()).unwrap();
        assert_eq!(value["window"], "5m");
        assert_eq!(value["trusted_for"], "6h");
        assert!(value.get("verify_cooldown").is_none());
    }

    #[test]
    fn json_config_rejects_unknown_keys_and_bad_durations() {
        assert!(GateConfig::from_json(r#"{"gitea_url": "http://x", "limt": 5}"#).is_err());
        assert!(GateConfig::from_json(r#"{"window": "five minutes"}"#).is_err());
    }

    #[test]
    fn load_picks_surface_by_extension() {
        let dir = std::env::temp_dir().join(format!("gitea-ip-limit-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let json = dir.join("gate.json");
        std::fs::write(&json, r#"{"gitea_url": "https://git.example.com", "limit": 7}"#).unwrap();
        assert_eq!(GateConfig::load(&json).unwrap().limit, 7);

        let text = dir.join("Gatefile");
        std::fs::write(
            &text,
            "gitea_ip_limit {\n    gitea_url https://git.example.com\n    limit 8\n}\n",
        )
        .unwrap();
        assert_eq!(GateConfig::load(&text).unwrap().limit, 8);

        // parsed fine but fails validation
        let missing = dir.join("missing-url.json");
        std::fs::write(&missing, r#"{"limit": 7}"#).unwrap();
        assert!(matches!(
            GateConfig::load(&missing),
            Err(ConfigError::MissingGiteaUrl)
        ));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        for yes in ["true", "1", "YES", " on "] {
            assert_eq!(parse_bool(yes), Some(true));
        }
        for no in ["false", "0", "No", "OFF"] {
            assert_eq!(parse_bool(no), Some(false));
        }
        assert_eq!(parse_bool("maybe"), None);
    }
}
