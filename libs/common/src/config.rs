//! Layered configuration loading
//!
//! Priority (highest to lowest):
//! 1. Explicit overrides (command-line flags)
//! 2. Environment variables (`<PREFIX>`, nested keys split on `__`)
//! 3. TOML config file
//! 4. Default values

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

fn base_figment<T: Serialize>(defaults: &T, file: Option<&Path>, env_prefix: &str) -> Result<Figment> {
    let mut figment = Figment::from(Serialized::defaults(defaults));

    if let Some(path) = file {
        if !path.is_file() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        debug!("Loading config file {}", path.display());
        figment = figment.merge(Toml::file(path));
    }

    Ok(figment.merge(Env::prefixed(env_prefix).split("__")))
}

/// Load configuration from defaults, an optional TOML file and the environment
pub fn load_config<T>(defaults: T, file: Option<&Path>, env_prefix: &str) -> Result<T>
where
    T: Serialize + DeserializeOwned,
{
    base_figment(&defaults, file, env_prefix)?
        .extract()
        .map_err(|e| Error::Config(format!("Failed to load configuration: {e}")))
}

/// Like [`load_config`], with `overrides` merged on top of everything.
///
/// Fields of `overrides` that serialize to nothing (e.g. `None` with
/// `skip_serializing_if`) leave the lower layers untouched.
pub fn load_config_with_overrides<T, O>(
    defaults: T,
    file: Option<&Path>,
    env_prefix: &str,
    overrides: &O,
) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    O: Serialize,
{
    base_figment(&defaults, file, env_prefix)?
        .merge(Serialized::defaults(overrides))
        .extract()
        .map_err(|e| Error::Config(format!("Failed to load configuration: {e}")))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestConfig {
        host: String,
        port: u16,
        nested: NestedConfig,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct NestedConfig {
        timeout_ms: u64,
        units: Vec<u8>,
    }

    #[derive(Serialize)]
    struct Overrides {
        #[serde(skip_serializing_if = "Option::is_none")]
        host: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
    }

    fn defaults() -> TestConfig {
        TestConfig {
            host: "127.0.0.1".to_string(),
            port: 502,
            nested: NestedConfig {
                timeout_ms: 3000,
                units: vec![1, 2, 3],
            },
        }
    }

    fn write_toml(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_only() {
        let config = load_config(defaults(), None, "COMMON_TEST_DEFAULTS_").unwrap();
        assert_eq!(config, defaults());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = write_toml(
            r#"
            port = 1001

            [nested]
            timeout_ms = 500
            "#,
        );
        let config = load_config(defaults(), Some(file.path()), "COMMON_TEST_FILE_").unwrap();
        assert_eq!(config.port, 1001);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.nested.timeout_ms, 500);
        assert_eq!(config.nested.units, vec![1, 2, 3]);
    }

    #[test]
    fn test_env_overrides_file() {
        let file = write_toml("port = 1001\n");
        std::env::set_var("COMMON_TEST_ENV_PORT", "2002");
        std::env::set_var("COMMON_TEST_ENV_NESTED__TIMEOUT_MS", "750");

        let config = load_config(defaults(), Some(file.path()), "COMMON_TEST_ENV_").unwrap();
        assert_eq!(config.port, 2002);
        assert_eq!(config.nested.timeout_ms, 750);

        std::env::remove_var("COMMON_TEST_ENV_PORT");
        std::env::remove_var("COMMON_TEST_ENV_NESTED__TIMEOUT_MS");
    }

    #[test]
    fn test_overrides_win() {
        let file = write_toml("host = \"10.0.0.9\"\nport = 1001\n");
        let overrides = Overrides {
            host: Some("10.0.0.5".to_string()),
            port: None,
        };
        let config = load_config_with_overrides(
            defaults(),
            Some(file.path()),
            "COMMON_TEST_OVERRIDE_",
            &overrides,
        )
        .unwrap();
        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.port, 1001);
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = load_config(
            defaults(),
            Some(Path::new("/nonexistent/meter.toml")),
            "COMMON_TEST_MISSING_",
        )
        .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_bad_value_is_config_error() {
        let file = write_toml("port = \"not a number\"\n");
        let err = load_config(defaults(), Some(file.path()), "COMMON_TEST_BAD_").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
