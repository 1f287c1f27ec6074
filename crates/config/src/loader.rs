//! Locating and loading the config file.

use std::path::{Path, PathBuf};

use {
    anyhow::{Context, Result, bail},
    directories::ProjectDirs,
    tracing::{debug, info},
};

use crate::schema::FolioConfig;

pub const ENV_API_URL: &str = "FOLIO_API_URL";
pub const ENV_REALTIME_URL: &str = "FOLIO_REALTIME_URL";

const CONFIG_FILE: &str = "folio.toml";
const STORAGE_FILE: &str = "session.json";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "folio", "folio")
}

/// `<config dir>/folio.toml`, if the platform has a config directory.
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

/// `<data dir>/session.json`, where persisted session state lives by default.
pub fn default_storage_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().join(STORAGE_FILE))
}

/// Load configuration.
///
/// An explicit `path` must exist. Without one, the default location is used
/// when present and built-in defaults otherwise. Environment overrides are
/// applied last, then the result is validated.
pub fn load_config(path: Option<&Path>) -> Result<FolioConfig> {
    let mut config = match path {
        Some(path) => {
            if !path.exists() {
                bail!("config file not found: {}", path.display());
            }
            read_config(path)?
        },
        None => match default_config_path() {
            Some(path) if path.exists() => read_config(&path)?,
            _ => {
                debug!("no config file, using defaults");
                FolioConfig::default()
            },
        },
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

fn read_config(path: &Path) -> Result<FolioConfig> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config = FolioConfig::from_toml(&source)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    info!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Apply `FOLIO_*` overrides using `lookup` to read variables.
pub fn apply_env_overrides(config: &mut FolioConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.is_empty()) {
        debug!(api_url = %url, "api_url overridden from environment");
        config.api_url = url;
    }
    if let Some(url) = lookup(ENV_REALTIME_URL).filter(|v| !v.is_empty()) {
        debug!(realtime_url = %url, "realtime_url overridden from environment");
        config.realtime_url = url;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {super::*, std::collections::HashMap};

    #[test]
    fn explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = load_config(Some(&missing)).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn loads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("folio.toml");
        std::fs::write(
            &path,
            r#"
            api_url = "https://api.folio.test"
            realtime_url = "wss://api.folio.test/ws/transactions/"
            connect_timeout_secs = 5
            storage_path = "/tmp/folio-session.json"
            "#,
        )
        .unwrap();

        let cfg = read_config(&path).unwrap();
        assert_eq!(cfg.api_url, "https://api.folio.test");
        assert_eq!(cfg.connect_timeout_secs, 5);
        assert_eq!(
            cfg.storage_path.as_deref(),
            Some(Path::new("/tmp/folio-session.json"))
        );
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("folio.toml");
        std::fs::write(&path, "api_url = [").unwrap();
        let err = read_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("folio.toml"));
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_API_URL, "https://override.test"),
            (ENV_REALTIME_URL, ""),
        ]);
        let mut cfg = FolioConfig::default();
        apply_env_overrides(&mut cfg, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(cfg.api_url, "https://override.test");
        // Empty values are ignored.
        assert_eq!(cfg.realtime_url, FolioConfig::default().realtime_url);
    }

    #[test]
    fn default_paths_use_expected_file_names() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with(CONFIG_FILE));
        }
        if let Some(path) = default_storage_path() {
            assert!(path.ends_with(STORAGE_FILE));
        }
    }
}
