use std::env;
use std::time::Duration;

const DEFAULT_PORT: &str = "8081";
const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_INFERENCE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_LEADERBOARD_INDEX: &str = "points-index";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreConfig {
    DynamoDb {
        users_table: String,
        events_table: String,
        leaderboard_index: String,
    },
    Memory,
}

#[derive(Debug, Clone)]
pub struct CognitoConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: String,
    pub static_dir: Option<String>,
    pub jwt_secret: String,
    pub inference: InferenceConfig,
    pub max_image_bytes: usize,
    pub store: StoreConfig,
    pub s3_bucket: Option<String>,
    pub cognito: Option<CognitoConfig>,
    pub maps_api_key: Option<String>,
    pub map_locations_file: Option<String>,
    pub anonymous_points: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let jwt_secret = require("JWT_SECRET")?;

        let timeout_secs = parse_or(
            "INFERENCE_TIMEOUT_SECS",
            get("INFERENCE_TIMEOUT_SECS"),
            DEFAULT_INFERENCE_TIMEOUT_SECS,
        )?;

        let inference = InferenceConfig {
            api_key: require("GEMINI_API_KEY")?,
            model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            base_url: get("GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
            timeout: Duration::from_secs(timeout_secs),
        };

        let store = match get("STORE_BACKEND").as_deref() {
            None | Some("dynamodb") => StoreConfig::DynamoDb {
                users_table: require("DYNAMODB_USERS_TABLE")?,
                events_table: require("DYNAMODB_EVENTS_TABLE")?,
                leaderboard_index: get("DYNAMODB_LEADERBOARD_INDEX")
                    .unwrap_or_else(|| DEFAULT_LEADERBOARD_INDEX.to_string()),
            },
            Some("memory") => StoreConfig::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "STORE_BACKEND",
                    value: other.to_string(),
                });
            }
        };

        let cognito = get("COGNITO_CLIENT_ID").map(|client_id| CognitoConfig {
            client_id,
            client_secret: get("COGNITO_CLIENT_SECRET"),
        });

        Ok(Self {
            port: get("PORT").unwrap_or_else(|| DEFAULT_PORT.to_string()),
            static_dir: get("STATIC_DIR"),
            jwt_secret,
            inference,
            max_image_bytes: parse_or("MAX_IMAGE_BYTES", get("MAX_IMAGE_BYTES"), DEFAULT_MAX_IMAGE_BYTES)?,
            store,
            s3_bucket: get("S3_BUCKET_NAME"),
            cognito,
            maps_api_key: get("GOOGLE_MAPS_API_KEY"),
            map_locations_file: get("MAP_LOCATIONS_FILE"),
            anonymous_points: parse_or("ANONYMOUS_POINTS", get("ANONYMOUS_POINTS"), false)?,
        })
    }
}

fn parse_or<T: std::str::FromStr>(name: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    const BASE: &[(&str, &str)] = &[
        ("JWT_SECRET", "secret"),
        ("GEMINI_API_KEY", "key"),
        ("STORE_BACKEND", "memory"),
    ];

    #[test]
    fn defaults_apply() {
        let config = AppConfig::from_lookup(lookup(BASE)).unwrap();
        assert_eq!(config.port, "8081");
        assert_eq!(config.store, StoreConfig::Memory);
        assert_eq!(config.inference.model, DEFAULT_GEMINI_MODEL);
        assert_eq!(config.max_image_bytes, DEFAULT_MAX_IMAGE_BYTES);
        assert!(!config.anonymous_points);
        assert!(config.maps_api_key.is_none());
        assert!(config.cognito.is_none());
    }

    #[test]
    fn missing_secret_is_an_error() {
        let err = AppConfig::from_lookup(lookup(&[("GEMINI_API_KEY", "key")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("JWT_SECRET"));

        let err = AppConfig::from_lookup(lookup(&[("GEMINI_API_KEY", "key"), ("STORE_BACKEND", "memory")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("JWT_SECRET"));
    }

    #[test]
    fn blank_maps_key_counts_as_missing() {
        let mut vars = BASE.to_vec();
        vars.push(("GOOGLE_MAPS_API_KEY", "   "));
        let config = AppConfig::from_lookup(lookup(&vars)).unwrap();
        assert!(config.maps_api_key.is_none());
    }

    #[test]
    fn dynamodb_requires_tables() {
        let err = AppConfig::from_lookup(lookup(&[("JWT_SECRET", "s"), ("GEMINI_API_KEY", "k")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("DYNAMODB_USERS_TABLE"));
    }

    #[test]
    fn invalid_flag_is_rejected() {
        let mut vars = BASE.to_vec();
        vars.push(("ANONYMOUS_POINTS", "sometimes"));
        assert!(matches!(
            AppConfig::from_lookup(lookup(&vars)),
            Err(ConfigError::Invalid { name: "ANONYMOUS_POINTS", .. })
        ));
    }
}
