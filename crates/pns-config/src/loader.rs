//! Settings loader: TOML file plus environment overrides.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};

use crate::Result;
use crate::settings::AppConfig;

/// File consulted when no path is given
pub const DEFAULT_CONFIG_PATH: &str = "pns.toml";

/// Load and validate settings.
///
/// A missing file is not an error; defaults and environment overrides apply,
/// e.g. `PNS__POOL__MAX_CONCURRENT_TASKS=8`.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut builder = Config::builder();
    if path.exists() {
        builder = builder.add_source(File::from(path));
    }
    builder = builder.add_source(
        Environment::with_prefix("PNS")
            .try_parsing(true)
            .separator("__"),
    );

    let cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(cfg.enabled_cache.max_entries, 65_536);
    }

    #[test]
    fn test_load_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pns.toml");
        std::fs::write(
            &path,
            r#"
[pool]
max_concurrent_tasks = 4

[properties]
"pns.transport.apns.enabled" = true
"#,
        )
        .unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.pool.max_concurrent_tasks, 4);
        assert_eq!(
            cfg.properties.get("pns.transport.apns.enabled"),
            Some(&serde_json::Value::Bool(true))
        );
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pns.toml");
        std::fs::write(&path, "[pool]\nmax_concurrent_tasks = 0\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
