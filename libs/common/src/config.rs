//! Configuration loading
//!
//! Thin figment wrappers. Priority for layered loads (highest first):
//! 1. Environment variables with the given prefix
//! 2. Config file (if present)
//! 3. `T::default()`

use crate::{CommonError, Result};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

fn file_figment(path: &Path) -> Result<Figment> {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| CommonError::Config("Config file must have an extension".to_string()))?;

    let figment = match extension {
        "toml" => Figment::new().merge(Toml::file(path)),
        "yaml" | "yml" => Figment::new().merge(Yaml::file(path)),
        "json" => Figment::new().merge(Json::file(path)),
        _ => {
            return Err(CommonError::Config(format!(
                "Unsupported config file format: {}",
                extension
            )))
        },
    };
    Ok(figment)
}

/// Load configuration from a specific file, format chosen by extension
pub fn load_config_from_file<T, P>(path: P) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if !path.exists() {
        return Err(CommonError::Config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }

    file_figment(path)?
        .extract()
        .map_err(|e| CommonError::Config(format!("Failed to load configuration from file: {}", e)))
}

/// Load defaults, then an optional file, then prefixed environment variables
///
/// `env_prefix` includes the separator, e.g. `"VIGIL_"` maps
/// `VIGIL_TICK_MS` onto `tick_ms`.
pub fn load_layered<T, P>(path: Option<P>, env_prefix: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Serialize + Default,
    P: AsRef<Path>,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()));

    if let Some(path) = path {
        let path = path.as_ref();
        if path.exists() {
            debug!("Config file: {}", path.display());
            figment = figment.merge(file_figment(path)?);
        } else {
            debug!("Config file absent, using defaults: {}", path.display());
        }
    }

    figment
        .merge(Env::prefixed(env_prefix))
        .extract()
        .map_err(|e| CommonError::Config(format!("Failed to load configuration: {}", e)))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct TestConfig {
        name: String,
        interval_ms: u64,
        enabled: bool,
    }

    impl Default for TestConfig {
        fn default() -> Self {
            Self {
                name: "default".to_string(),
                interval_ms: 1000,
                enabled: false,
            }
        }
    }

    #[test]
    fn test_load_yaml_and_json() {
        let temp_dir = TempDir::new().unwrap();

        let yaml_path = temp_dir.path().join("test.yaml");
        std::fs::write(&yaml_path, "name: a\ninterval_ms: 250\nenabled: true\n").unwrap();
        let loaded: TestConfig = load_config_from_file(&yaml_path).unwrap();
        assert_eq!(loaded.interval_ms, 250);

        let json_path = temp_dir.path().join("test.json");
        std::fs::write(
            &json_path,
            r#"{"name":"b","interval_ms":500,"enabled":false}"#,
        )
        .unwrap();
        let loaded: TestConfig = load_config_from_file(&json_path).unwrap();
        assert_eq!(loaded.name, "b");
    }

    #[test]
    fn test_unsupported_extension() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.ini");
        std::fs::write(&path, "x=1").unwrap();
        let err = load_config_from_file::<TestConfig, _>(&path).unwrap_err();
        assert!(err.to_string().contains("Unsupported"));
    }

    #[test]
    fn test_missing_file() {
        let err = load_config_from_file::<TestConfig, _>("/nonexistent/vigil.yaml").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_layered_file_then_env() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("engine.toml", "interval_ms = 250\nname = \"file\"")?;
            jail.set_env("TESTCFG_ENABLED", "true");

            let cfg: TestConfig =
                load_layered(Some("engine.toml"), "TESTCFG_").map_err(|e| e.to_string())?;
            assert_eq!(cfg.interval_ms, 250);
            assert_eq!(cfg.name, "file");
            assert!(cfg.enabled);

            jail.set_env("TESTCFG_INTERVAL_MS", "100");
            let cfg: TestConfig =
                load_layered(None::<&str>, "TESTCFG_").map_err(|e| e.to_string())?;
            assert_eq!(cfg.interval_ms, 100);
            assert_eq!(cfg.name, "default");
            Ok(())
        });
    }
}
