use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::Level;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing credential: {0} must be set")]
    MissingCredential(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub api_key: String,
    pub base_url: String,
    pub chat_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Attempts per completion request.
    pub max_retries: u32,
    /// Empty capture sessions tolerated before the user is told.
    pub speech_retries: u32,
    pub persona_name: String,
    pub log_level: Level,
    pub prompts_path: PathBuf,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address = parse_var("BIND_ADDRESS", "0.0.0.0:3000")?;

        let api_key = std::env::var("COMPLETION_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingCredential("COMPLETION_API_KEY".to_string()))?;

        let base_url =
            std::env::var("COMPLETION_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let chat_model =
            std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let temperature: f32 = parse_var("TEMPERATURE", "0.7")?;
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::InvalidValue(
                "TEMPERATURE".to_string(),
                format!("{temperature} is outside 0.0..=2.0"),
            ));
        }
        let max_tokens = parse_var("MAX_TOKENS", "300")?;
        let max_retries = parse_var("MAX_RETRIES", "3")?;
        let speech_retries = parse_var("SPEECH_RETRIES", "3")?;

        let persona_name = std::env::var("PERSONA_NAME").unwrap_or_else(|_| "Charla".to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let prompts_path = std::env::var("PROMPTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./prompts"));

        Ok(Self {
            bind_address,
            api_key,
            base_url,
            chat_model,
            temperature,
            max_tokens,
            max_retries,
            speech_retries,
            persona_name,
            log_level,
            prompts_path,
        })
    }
}

fn parse_var<T>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(name).unwrap_or_else(|_| default.to_string());
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tracing::Level;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("BIND_ADDRESS");
            env::remove_var("COMPLETION_API_KEY");
            env::remove_var("COMPLETION_BASE_URL");
            env::remove_var("CHAT_MODEL");
            env::remove_var("TEMPERATURE");
            env::remove_var("MAX_TOKENS");
            env::remove_var("MAX_RETRIES");
            env::remove_var("SPEECH_RETRIES");
            env::remove_var("PERSONA_NAME");
            env::remove_var("RUST_LOG");
            env::remove_var("PROMPTS_PATH");
        }
    }

    fn set_minimal_env() {
        unsafe {
            env::set_var("COMPLETION_API_KEY", "test-key");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing = ConfigError::MissingCredential("COMPLETION_API_KEY".to_string());
        assert_eq!(
            missing.to_string(),
            "Missing credential: COMPLETION_API_KEY must be set"
        );

        let invalid = ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            invalid.to_string(),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_defaults() {
        clear_env_vars();
        set_minimal_env();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "0.0.0.0:3000");
        assert_eq!(config.api_key, "test-key");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.chat_model, "gpt-4o-mini");
        assert!((config.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.max_tokens, 300);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.speech_retries, 3);
        assert_eq!(config.persona_name, "Charla");
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.prompts_path, PathBuf::from("./prompts"));
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("BIND_ADDRESS", "127.0.0.1:8080");
            env::set_var("COMPLETION_API_KEY", "custom-key");
            env::set_var("COMPLETION_BASE_URL", "http://localhost:11434/v1");
            env::set_var("CHAT_MODEL", "llama3");
            env::set_var("TEMPERATURE", "0.2");
            env::set_var("MAX_TOKENS", "120");
            env::set_var("MAX_RETRIES", "5");
            env::set_var("SPEECH_RETRIES", "2");
            env::set_var("PERSONA_NAME", "Toby");
            env::set_var("RUST_LOG", "debug");
            env::set_var("PROMPTS_PATH", "/custom/prompts");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "127.0.0.1:8080");
        assert_eq!(config.base_url, "http://localhost:11434/v1");
        assert_eq!(config.chat_model, "llama3");
        assert!((config.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.max_tokens, 120);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.speech_retries, 2);
        assert_eq!(config.persona_name, "Toby");
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.prompts_path, PathBuf::from("/custom/prompts"));
    }

    #[test]
    #[serial]
    fn test_config_missing_api_key() {
        clear_env_vars();

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingCredential(var) => assert_eq!(var, "COMPLETION_API_KEY"),
            _ => panic!("Expected MissingCredential for COMPLETION_API_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_blank_api_key_is_missing() {
        clear_env_vars();
        unsafe {
            env::set_var("COMPLETION_API_KEY", "   ");
        }

        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::MissingCredential(_))
        ));
    }

    #[test]
    #[serial]
    fn test_config_invalid_bind_address() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("BIND_ADDRESS", "not-a-valid-address");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "BIND_ADDRESS"),
            _ => panic!("Expected InvalidValue for BIND_ADDRESS"),
        }
    }

    #[test]
    #[serial]
    fn test_config_temperature_out_of_range() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("TEMPERATURE", "3.5");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "TEMPERATURE"),
            _ => panic!("Expected InvalidValue for TEMPERATURE"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_retry_count() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("MAX_RETRIES", "many");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "MAX_RETRIES"),
            _ => panic!("Expected InvalidValue for MAX_RETRIES"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }
}
